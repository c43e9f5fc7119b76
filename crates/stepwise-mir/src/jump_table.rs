// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Resumption dispatch.
//!
//! While suspended, the machine's state field holds the key of the jump case
//! it suspended at. On re-entry the dispatch table maps that key to the
//! resume state. Cases of nested try scopes are flattened into the table of
//! the top-level scope, each recording the chain of scopes it enters.

use crate::state::{LoweringResult, ScopeId, StateId};

/// State field value while a step is running.
pub const STATE_RUNNING: i64 = -1;
/// State field value once the machine has completed.
pub const STATE_DONE: i64 = -2;
/// State field value before the first step.
pub const STATE_START: i64 = -3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchCase {
    pub key: i64,
    pub target: StateId,
    /// Scopes entered on the way to `target`, outermost first.
    pub route: Vec<ScopeId>,
}

#[derive(Debug, Clone)]
pub struct DispatchTable {
    pub scope: ScopeId,
    pub cases: Vec<DispatchCase>,
}

impl DispatchTable {
    pub fn lookup(&self, key: i64) -> Option<&DispatchCase> {
        self.cases.iter().find(|c| c.key == key)
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

/// Dispatch table for `scope`, including every descendant scope's cases.
pub fn build(result: &LoweringResult, scope: ScopeId) -> DispatchTable {
    let mut cases = Vec::new();
    collect(result, scope, &mut Vec::new(), &mut cases);
    DispatchTable { scope, cases }
}

fn collect(
    result: &LoweringResult,
    scope: ScopeId,
    route: &mut Vec<ScopeId>,
    out: &mut Vec<DispatchCase>,
) {
    route.push(scope);
    for case in &result.scope(scope).jump_cases {
        out.push(DispatchCase {
            key: case.key,
            target: case.resume,
            route: route.clone(),
        });
    }
    let children: Vec<ScopeId> = result.child_scopes(scope).map(|s| s.id).collect();
    for child in children {
        collect(result, child, route, out);
    }
    route.pop();
}

#[cfg(test)]
mod tests {
    use stepwise_ast::{AsyncBlock, CatchBlock, MachineKind, Node, Ty, Var};
    use stepwise_rt::HostEnv;

    use super::*;
    use crate::lower::lower;
    use crate::TransformOptions;

    #[test]
    fn nested_try_cases_are_flattened() {
        let f = Var::new("f", Ty::Task);
        let inner = Node::try_catch(
            Node::await_(Node::var(&f)),
            vec![CatchBlock::any(None, Node::unit())],
            None,
        );
        let outer = Node::try_catch(
            Node::seq(vec![Node::await_(Node::var(&f)), inner]),
            vec![CatchBlock::any(None, Node::unit())],
            None,
        );
        let block = AsyncBlock {
            name: "nested".into(),
            kind: MachineKind::Async,
            result_ty: Ty::Unit,
            vars: vec![],
            body: vec![Node::await_(Node::var(&f)), outer],
        };
        let r = lower(
            &block,
            std::slice::from_ref(&f),
            &HostEnv::empty(),
            &TransformOptions::default(),
        )
        .unwrap();
        let table = build(&r, ScopeId(0));
        assert_eq!(table.len(), 3);
        let routes: Vec<usize> = table.cases.iter().map(|c| c.route.len()).collect();
        assert_eq!(routes, vec![1, 2, 3]);
        let keys: std::collections::HashSet<i64> = table.cases.iter().map(|c| c.key).collect();
        assert_eq!(keys.len(), 3);
    }
}

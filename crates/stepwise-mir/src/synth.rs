// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Machine synthesis.
//!
//! Turns an optimized lowering result into a runnable unit: a storage
//! layout with one slot per hoisted or shared variable, the dispatch order
//! of the reachable states, and the resumption table. Each run allocates
//! its own storage (see `exec`).

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use stepwise_ast::{MachineKind, Ty, Var, VarId};
use stepwise_rt::{Fault, HostEnv, Task, Value};

use crate::error::LoweringError;
use crate::exec::{self, GeneratorHandle};
use crate::jump_table::{self, DispatchCase, DispatchTable};
use crate::state::{LoweringResult, ScopeId, StateId, VarKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Current state, or the key of the suspension the machine waits in.
    State,
    /// Completion source behind the returned task.
    Completion,
    /// Final result.
    Final,
    Hoisted,
    Awaiter,
    /// Cell shared with the enclosing machine.
    Extern,
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub ty: Ty,
    pub kind: FieldKind,
    pub var: Option<VarId>,
    /// Storage slot; bookkeeping fields have none.
    pub slot: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct StorageLayout {
    pub fields: Vec<Field>,
}

impl StorageLayout {
    pub fn slot_count(&self) -> usize {
        self.fields.iter().filter(|f| f.slot.is_some()).count()
    }

    pub fn count(&self, kind: FieldKind) -> usize {
        self.fields.iter().filter(|f| f.kind == kind).count()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Everything a running instance needs. Shared by all instances.
pub struct MachineDefinition {
    pub lowering: LoweringResult,
    pub layout: StorageLayout,
    pub slot_of: HashMap<VarId, usize>,
    pub slot_types: Vec<Ty>,
    /// Reachable states sorted by `StateOrder`: the entry first, each
    /// fallthrough successor right after its predecessor.
    pub order: Vec<StateId>,
    pub dispatch: DispatchTable,
    pub(crate) env: Arc<HostEnv>,
}

impl MachineDefinition {
    pub fn name(&self) -> &str {
        &self.lowering.name
    }

    pub fn kind(&self) -> MachineKind {
        self.lowering.kind
    }

    pub fn resume_target(&self, key: i64) -> Option<&DispatchCase> {
        self.dispatch.lookup(key)
    }
}

impl fmt::Debug for MachineDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineDefinition")
            .field("name", &self.lowering.name)
            .field("kind", &self.lowering.kind)
            .field("slots", &self.slot_types.len())
            .field("states", &self.order.len())
            .finish()
    }
}

/// Build the runnable definition of `lowering`.
pub fn synthesize(
    lowering: LoweringResult,
    env: Arc<HostEnv>,
) -> Result<CompiledMachine, LoweringError> {
    if lowering.suspension_count == 0 {
        return Err(LoweringError::NoSuspensionPoints {
            machine: lowering.name.clone(),
        });
    }

    let mut layout = StorageLayout::default();
    layout.fields.push(Field {
        name: "<>state".into(),
        ty: Ty::Int,
        kind: FieldKind::State,
        var: None,
        slot: None,
    });
    if lowering.kind == MachineKind::Async {
        layout.fields.push(Field {
            name: "<>builder".into(),
            ty: Ty::future(lowering.result_ty.clone()),
            kind: FieldKind::Completion,
            var: None,
            slot: None,
        });
    }

    let mut slot_of = HashMap::new();
    let mut slot_types = Vec::new();
    for info in lowering.variables.values().filter(|v| v.hoisted) {
        let kind = match info.kind {
            VarKind::Final => FieldKind::Final,
            VarKind::Awaiter => FieldKind::Awaiter,
            VarKind::Extern => FieldKind::Extern,
            VarKind::Declared | VarKind::Temp | VarKind::Region => FieldKind::Hoisted,
        };
        let slot = slot_types.len();
        slot_types.push(info.var.ty.clone());
        slot_of.insert(info.var.id, slot);
        layout.fields.push(Field {
            name: info.field.clone(),
            ty: info.var.ty.clone(),
            kind,
            var: Some(info.var.id),
            slot: Some(slot),
        });
    }

    let mut order: Vec<StateId> = lowering
        .scopes
        .iter()
        .flat_map(|s| s.states.iter().copied())
        .collect();
    order.sort_by_key(|s| lowering.state(*s).order);

    let dispatch = jump_table::build(&lowering, ScopeId(0));

    tracing::debug!(
        target: "stepwise::synth",
        machine = %lowering.name,
        slots = slot_types.len(),
        awaiters = layout.count(FieldKind::Awaiter),
        externs = layout.count(FieldKind::Extern),
        states = order.len(),
        resume_points = dispatch.len(),
        "synthesized"
    );

    Ok(CompiledMachine {
        def: Arc::new(MachineDefinition {
            lowering,
            layout,
            slot_of,
            slot_types,
            order,
            dispatch,
            env,
        }),
    })
}

/// A synthesized machine, ready to run.
#[derive(Debug, Clone)]
pub struct CompiledMachine {
    def: Arc<MachineDefinition>,
}

impl CompiledMachine {
    pub fn lowering(&self) -> &LoweringResult {
        &self.def.lowering
    }

    pub fn definition(&self) -> &Arc<MachineDefinition> {
        &self.def
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.def.layout
    }

    pub fn name(&self) -> &str {
        self.def.name()
    }

    /// Reachable states in dispatch order.
    pub fn dispatch_order(&self) -> &[StateId] {
        &self.def.order
    }

    /// Run an async machine until it first suspends and return its task.
    ///
    /// `externs` seeds the variables the body shares with its caller;
    /// unseeded ones start at their type's zero value.
    pub fn start(&self, externs: &[(&Var, Value)]) -> Task {
        if self.def.kind() != MachineKind::Async {
            return Task::failed(Fault::invalid_state(format!(
                "`{}` is a generator; iterate it instead",
                self.name()
            )));
        }
        exec::start(&self.def, self.seed(externs))
    }

    /// Iterate a generator machine. Nothing runs until the first `next`.
    pub fn iterate(&self, externs: &[(&Var, Value)]) -> GeneratorHandle {
        exec::iterate(&self.def, self.seed(externs))
    }

    fn seed(&self, externs: &[(&Var, Value)]) -> HashMap<VarId, Arc<Mutex<Value>>> {
        externs
            .iter()
            .filter(|(var, _)| self.def.slot_of.contains_key(&var.id))
            .map(|(var, value)| (var.id, Arc::new(Mutex::new(value.clone()))))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use stepwise_ast::{AsyncBlock, CatchBlock, Node};

    use super::*;
    use crate::{transform, TransformOptions};

    #[test]
    fn body_without_suspension_is_rejected() {
        let block = AsyncBlock {
            name: "plain".into(),
            kind: MachineKind::Async,
            result_ty: Ty::Int,
            vars: vec![],
            body: vec![Node::int(1)],
        };
        let err = transform(&block, &[], HostEnv::empty(), &TransformOptions::default())
            .err()
            .unwrap();
        assert_eq!(
            err,
            LoweringError::NoSuspensionPoints {
                machine: "plain".into()
            }
        );
    }

    #[test]
    fn layout_has_bookkeeping_and_one_awaiter_per_suspension() {
        let f = Var::new("f", Ty::future(Ty::Int));
        let x = Var::new("x", Ty::Int);
        let block = AsyncBlock {
            name: "layout".into(),
            kind: MachineKind::Async,
            result_ty: Ty::Int,
            vars: vec![x.clone()],
            body: vec![
                Node::assign(&x, Node::await_(Node::var(&f))),
                Node::add(Node::var(&x), Node::await_(Node::var(&f))),
            ],
        };
        let m = transform(
            &block,
            std::slice::from_ref(&f),
            HostEnv::empty(),
            &TransformOptions::named("Layout"),
        )
        .unwrap();
        let layout = m.layout();
        assert_eq!(m.name(), "Layout");
        assert_eq!(layout.fields[0].kind, FieldKind::State);
        assert_eq!(layout.fields[1].kind, FieldKind::Completion);
        assert_eq!(layout.count(FieldKind::Awaiter), 2);
        assert_eq!(layout.count(FieldKind::Final), 1);
        assert_eq!(layout.count(FieldKind::Extern), 1);
        assert!(layout.fields.iter().any(|f| f.var == Some(x.id)));
        assert!(layout.field("f@s0").is_some());
    }

    #[test]
    fn dispatch_order_starts_at_entry_and_skips_pruned_states() {
        let f = Var::new("f", Ty::Task);
        let block = AsyncBlock {
            name: "order".into(),
            kind: MachineKind::Async,
            result_ty: Ty::Unit,
            vars: vec![],
            body: vec![Node::loop_(Node::await_(Node::var(&f)), None, None)],
        };
        let m = transform(
            &block,
            std::slice::from_ref(&f),
            HostEnv::empty(),
            &TransformOptions::default(),
        )
        .unwrap();
        let order = m.dispatch_order();
        assert_eq!(order[0], m.lowering().entry);
        // The loop has no break, so its join is gone.
        assert!(order.len() < m.lowering().states.len());
        let orders: Vec<_> = order.iter().map(|s| m.lowering().state(*s).order).collect();
        assert!(orders.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn resume_inside_try_routes_through_its_scope() {
        let f = Var::new("f", Ty::Task);
        let block = AsyncBlock {
            name: "routed".into(),
            kind: MachineKind::Async,
            result_ty: Ty::Unit,
            vars: vec![],
            body: vec![
                Node::await_(Node::var(&f)),
                Node::try_catch(
                    Node::await_(Node::var(&f)),
                    vec![CatchBlock::any(None, Node::unit())],
                    None,
                ),
            ],
        };
        let m = transform(
            &block,
            std::slice::from_ref(&f),
            HostEnv::empty(),
            &TransformOptions::default(),
        )
        .unwrap();
        let def = m.definition();
        let depths: Vec<usize> = def
            .dispatch
            .cases
            .iter()
            .map(|c| def.resume_target(c.key).unwrap().route.len())
            .collect();
        assert_eq!(depths, vec![1, 2]);
        assert!(def.resume_target(-7).is_none());
    }

    #[test]
    fn starting_a_generator_as_a_task_fails() {
        let block = AsyncBlock {
            name: "gen".into(),
            kind: MachineKind::Generator,
            result_ty: Ty::Int,
            vars: vec![],
            body: vec![Node::yield_(Node::int(1))],
        };
        let m = transform(&block, &[], HostEnv::empty(), &TransformOptions::default()).unwrap();
        let task = m.start(&[]);
        assert!(matches!(task.outcome(), Some(Err(_))));
    }
}

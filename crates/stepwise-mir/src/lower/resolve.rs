// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Variable resolution and hoisting.
//!
//! Every variable the machine touches gets an entry in one ordered table.
//! Variables declared by lowered constructs, construct temps and externs are
//! hoisted into machine storage; variables of leaf blocks stay in the local
//! frame unless a nested machine captures them.

use indexmap::IndexMap;
use stepwise_ast::{Ty, Var, VarId};

use crate::error::LoweringError;
use crate::state::{StateId, VarInfo, VarKind};

pub struct VariableResolver {
    scopes: Vec<Vec<VarId>>,
    vars: IndexMap<VarId, VarInfo>,
    temps: u32,
}

impl VariableResolver {
    /// Resolver for a machine whose enclosing machine makes `externs` available.
    pub fn new(externs: &[Var]) -> Self {
        let mut vars = IndexMap::new();
        for var in externs {
            vars.insert(
                var.id,
                VarInfo {
                    var: var.clone(),
                    kind: VarKind::Extern,
                    hoisted: false,
                    field: var.name.clone(),
                },
            );
        }
        Self {
            scopes: Vec::new(),
            vars,
            temps: 0,
        }
    }

    pub fn push_scope(&mut self, declared: &[Var], hoisted: bool) {
        for var in declared {
            let info = self.vars.entry(var.id).or_insert_with(|| VarInfo {
                var: var.clone(),
                kind: VarKind::Declared,
                hoisted: false,
                field: format!("{}#{}", var.name, var.id.0),
            });
            info.hoisted |= hoisted;
        }
        self.scopes.push(declared.iter().map(|v| v.id).collect());
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Truncate back to `depth` scopes.
    pub fn restore(&mut self, depth: usize) {
        self.scopes.truncate(depth);
    }

    /// Fresh hoisted variable.
    pub fn temp(&mut self, prefix: &str, ty: Ty, kind: VarKind) -> VarId {
        self.fresh(prefix, ty, kind, true)
    }

    /// Fresh variable that stays in the local frame.
    pub fn local_temp(&mut self, prefix: &str, ty: Ty) -> VarId {
        self.fresh(prefix, ty, VarKind::Temp, false)
    }

    fn fresh(&mut self, prefix: &str, ty: Ty, kind: VarKind, hoisted: bool) -> VarId {
        self.temps += 1;
        let var = Var::new(format!("<{}>{}", prefix, self.temps), ty);
        let id = var.id;
        self.vars.insert(
            id,
            VarInfo {
                field: var.name.clone(),
                var,
                kind,
                hoisted,
            },
        );
        id
    }

    /// Resolve a reference made while lowering state `at`.
    pub fn resolve(&mut self, var: &Var, at: StateId) -> Result<VarId, LoweringError> {
        if self.scopes.iter().any(|s| s.contains(&var.id)) {
            return Ok(var.id);
        }
        match self.vars.get_mut(&var.id) {
            Some(info) if info.kind == VarKind::Extern => {
                if !info.hoisted {
                    // Sibling branches may reuse a source name; the first
                    // referencing state keeps field names distinct.
                    info.hoisted = true;
                    info.field = format!("{}@{}", info.var.name, at);
                }
                Ok(var.id)
            }
            _ => Err(LoweringError::UnscopedVariable {
                name: var.name.clone(),
            }),
        }
    }

    /// A nested machine shares `id`: it must live in storage.
    pub fn capture(&mut self, id: VarId, at: StateId) {
        if let Some(info) = self.vars.get_mut(&id) {
            if !info.hoisted && info.kind == VarKind::Extern {
                info.field = format!("{}@{}", info.var.name, at);
            }
            info.hoisted = true;
        }
    }

    /// Variables a nested machine created here may reference.
    pub fn live_vars(&self) -> Vec<Var> {
        let mut out: Vec<Var> = Vec::new();
        let in_scope = self.scopes.iter().flatten();
        let externs = self
            .vars
            .values()
            .filter(|v| v.kind == VarKind::Extern)
            .map(|v| &v.var.id);
        for id in in_scope.chain(externs) {
            if out.iter().any(|v| v.id == *id) {
                continue;
            }
            if let Some(info) = self.vars.get(id) {
                out.push(info.var.clone());
            }
        }
        out
    }

    pub fn info(&self, id: VarId) -> Option<&VarInfo> {
        self.vars.get(&id)
    }

    pub fn into_variables(self) -> IndexMap<VarId, VarInfo> {
        self.vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_scope_reference_fails() {
        let mut r = VariableResolver::new(&[]);
        let x = Var::new("x", Ty::Int);
        let depth = r.depth();
        r.push_scope(std::slice::from_ref(&x), false);
        assert_eq!(r.resolve(&x, StateId(0)), Ok(x.id));
        r.restore(depth);
        assert_eq!(
            r.resolve(&x, StateId(0)),
            Err(LoweringError::UnscopedVariable { name: "x".into() })
        );
    }

    #[test]
    fn externs_hoist_on_first_reference() {
        let a = Var::new("a", Ty::Int);
        let mut r = VariableResolver::new(std::slice::from_ref(&a));
        assert!(!r.info(a.id).unwrap().hoisted);
        r.resolve(&a, StateId(3)).unwrap();
        r.resolve(&a, StateId(7)).unwrap();
        let info = r.info(a.id).unwrap();
        assert!(info.hoisted);
        assert_eq!(info.field, "a@s3");
    }

    #[test]
    fn captured_local_is_hoisted() {
        let mut r = VariableResolver::new(&[]);
        let x = Var::new("x", Ty::Int);
        r.push_scope(std::slice::from_ref(&x), false);
        assert_eq!(r.live_vars(), vec![x.clone()]);
        r.capture(x.id, StateId(0));
        assert!(r.info(x.id).unwrap().hoisted);
    }

    #[test]
    fn temps_are_distinct() {
        let mut r = VariableResolver::new(&[]);
        let a = r.temp("result", Ty::Int, VarKind::Temp);
        let b = r.temp("result", Ty::Int, VarKind::Temp);
        assert_ne!(a, b);
        assert_ne!(r.info(a).unwrap().field, r.info(b).unwrap().field);
    }
}

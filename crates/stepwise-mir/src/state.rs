// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! State graph: states, scopes, try regions and the lowering result.
//!
//! States live in one arena indexed by `StateId`. Scopes, transitions and
//! jump cases refer to states by id only; pruning removes a state from its
//! scope's list but never from the arena.

use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;
use stepwise_ast::{FaultFilter, LabelId, MachineKind, Ty, Var, VarId};

use crate::expr::Expr;
use crate::transition::Transition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub u32);

/// Dispatch position assigned by the optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct StateOrder(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GuardId(pub u32);

impl StateId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope{}", self.0)
    }
}

/// Implicit assignment performed when a state exits: `variable = value`.
#[derive(Clone, Default)]
pub struct ResultDescriptor {
    pub variable: Option<VarId>,
    pub value: Option<Expr>,
}

impl ResultDescriptor {
    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }
}

/// A basic block: leaves run in order, then the transition.
#[derive(Clone)]
pub struct State {
    pub id: StateId,
    pub scope: ScopeId,
    pub group: GroupId,
    pub order: StateOrder,
    pub result: ResultDescriptor,
    pub leaves: Vec<Expr>,
    /// `None` only for scaffolding that never became reachable.
    pub transition: Option<Transition>,
    /// Innermost try region guarding this state.
    pub guard: Option<GuardId>,
}

/// A resumption point owned by a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpCase {
    /// State that runs when the machine is resumed.
    pub resume: StateId,
    /// State control reaches after the resumed state finishes.
    pub continue_: StateId,
    /// Value stored in the state field while suspended.
    pub key: i64,
    pub parent_scope: Option<ScopeId>,
}

#[derive(Clone)]
pub struct Scope {
    pub id: ScopeId,
    pub parent: Option<ScopeId>,
    /// First entry is the scope's entry point.
    pub states: Vec<StateId>,
    pub jump_cases: Vec<JumpCase>,
}

impl Scope {
    pub fn entry(&self) -> Option<StateId> {
        self.states.first().copied()
    }
}

/// A catch handler target inside a `TryCatch` transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchTarget {
    pub filter: FaultFilter,
    pub state: StateId,
    /// Catch index stored in the try-state variable. Starts at 1; 0 means
    /// no failure has been caught.
    pub index: u32,
}

/// Bookkeeping for one lowered try/catch/finally.
#[derive(Debug, Clone)]
pub struct TryRegion {
    pub id: RegionId,
    pub try_state_var: VarId,
    pub exception_var: VarId,
    pub pending_fault_var: VarId,
    pub pending_jump_var: VarId,
    pub catches: Vec<CatchTarget>,
    pub finally: Option<StateId>,
    pub join: StateId,
    /// Guard active where the try statement itself sits.
    pub parent_guard: Option<GuardId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardPhase {
    /// Failures are matched against the region's handlers.
    Body,
    /// Failures skip the handlers and go to the finally.
    Handler,
}

#[derive(Debug, Clone, Copy)]
pub struct Guard {
    pub region: RegionId,
    pub phase: GuardPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    /// Declared by the input tree.
    Declared,
    /// Intermediate value or construct result.
    Temp,
    Awaiter,
    /// Try region bookkeeping.
    Region,
    /// The machine's final result.
    Final,
    /// Owned by an enclosing machine.
    Extern,
}

#[derive(Debug, Clone)]
pub struct VarInfo {
    pub var: Var,
    pub kind: VarKind,
    /// Lives in machine storage rather than the step's local frame.
    pub hoisted: bool,
    /// Storage field name.
    pub field: String,
}

/// Output of lowering: the state graph plus everything synthesis needs.
pub struct LoweringResult {
    pub name: String,
    pub kind: MachineKind,
    pub result_ty: Ty,
    pub states: Vec<State>,
    pub scopes: Vec<Scope>,
    pub regions: Vec<TryRegion>,
    pub guards: Vec<Guard>,
    pub variables: IndexMap<VarId, VarInfo>,
    pub suspension_count: usize,
    pub final_result_has_explicit_assignment: bool,
    pub final_var: Option<VarId>,
    pub entry: StateId,
    pub return_state: Option<StateId>,
    pub labels: HashMap<LabelId, StateId>,
    /// Label states jumped to from inside leaves.
    pub leaf_targets: Vec<StateId>,
}

impl LoweringResult {
    pub fn state(&self, id: StateId) -> &State {
        &self.states[id.index()]
    }

    pub fn state_mut(&mut self, id: StateId) -> &mut State {
        &mut self.states[id.index()]
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    pub fn root_scope(&self) -> &Scope {
        &self.scopes[0]
    }

    pub fn region(&self, id: RegionId) -> &TryRegion {
        &self.regions[id.0 as usize]
    }

    pub fn guard(&self, id: GuardId) -> &Guard {
        &self.guards[id.0 as usize]
    }

    /// States still listed in some scope.
    pub fn state_count(&self) -> usize {
        self.scopes.iter().map(|s| s.states.len()).sum()
    }

    pub fn jump_case_count(&self) -> usize {
        self.scopes.iter().map(|s| s.jump_cases.len()).sum()
    }

    /// Variables relocated to machine storage, in declaration order.
    pub fn hoisted(&self) -> impl Iterator<Item = &VarInfo> {
        self.variables
            .values()
            .filter(|v| v.hoisted && v.kind != VarKind::Extern)
    }

    /// Enclosing-machine variables this machine references.
    pub fn externs(&self) -> impl Iterator<Item = &VarInfo> {
        self.variables
            .values()
            .filter(|v| v.hoisted && v.kind == VarKind::Extern)
    }

    /// Scopes whose parent is `id`.
    pub fn child_scopes(&self, id: ScopeId) -> impl Iterator<Item = &Scope> {
        self.scopes.iter().filter(move |s| s.parent == Some(id))
    }

    /// True if `state` runs under `region` (in its body or a handler).
    pub fn guarded_by(&self, state: StateId, region: RegionId) -> bool {
        let mut guard = self.state(state).guard;
        while let Some(g) = guard {
            let g = self.guard(g);
            if g.region == region {
                return true;
            }
            guard = self.region(g.region).parent_guard;
        }
        false
    }
}

// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! GraphBuilder - arena of states and scopes built during lowering.

use crate::expr::Expr;
use crate::state::{
    Guard, GuardId, GroupId, JumpCase, ResultDescriptor, Scope, ScopeId, State, StateId,
    StateOrder, TryRegion,
};
use crate::transition::Transition;

pub struct GraphBuilder {
    pub states: Vec<State>,
    pub scopes: Vec<Scope>,
    pub regions: Vec<TryRegion>,
    pub guards: Vec<Guard>,
    next_group: u32,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            states: Vec::new(),
            scopes: vec![Scope {
                id: ScopeId(0),
                parent: None,
                states: Vec::new(),
                jump_cases: Vec::new(),
            }],
            regions: Vec::new(),
            guards: Vec::new(),
            next_group: 1,
        }
    }

    pub fn new_scope(&mut self, parent: ScopeId) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            id,
            parent: Some(parent),
            states: Vec::new(),
            jump_cases: Vec::new(),
        });
        id
    }

    pub fn new_group(&mut self) -> GroupId {
        let id = GroupId(self.next_group);
        self.next_group += 1;
        id
    }

    pub fn new_state(&mut self, scope: ScopeId, group: GroupId, guard: Option<GuardId>) -> StateId {
        let id = StateId(self.states.len() as u32);
        self.states.push(State {
            id,
            scope,
            group,
            order: StateOrder(id.0),
            result: ResultDescriptor::default(),
            leaves: Vec::new(),
            transition: None,
            guard,
        });
        self.scope_mut(scope).states.push(id);
        id
    }

    pub fn state(&self, id: StateId) -> &State {
        &self.states[id.index()]
    }

    pub fn state_mut(&mut self, id: StateId) -> &mut State {
        &mut self.states[id.index()]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0 as usize]
    }

    pub fn push_leaf(&mut self, id: StateId, leaf: Expr) {
        self.state_mut(id).leaves.push(leaf);
    }

    pub fn is_open(&self, id: StateId) -> bool {
        self.state(id).transition.is_none()
    }

    pub fn set_transition(&mut self, id: StateId, transition: Transition) {
        self.state_mut(id).transition = Some(transition);
    }

    /// Set the transition unless the state already has one.
    pub fn close(&mut self, id: StateId, transition: Transition) {
        if self.is_open(id) {
            self.set_transition(id, transition);
        }
    }

    /// Re-home a state created ahead of its position (a forward label).
    pub fn relocate(&mut self, id: StateId, scope: ScopeId, group: GroupId, guard: Option<GuardId>) {
        let old = self.state(id).scope;
        if old != scope {
            self.scope_mut(old).states.retain(|s| *s != id);
            self.scope_mut(scope).states.push(id);
        }
        let state = self.state_mut(id);
        state.scope = scope;
        state.group = group;
        state.guard = guard;
    }

    pub fn add_jump_case(&mut self, scope: ScopeId, case: JumpCase) {
        self.scope_mut(scope).jump_cases.push(case);
    }

    pub fn new_guard(&mut self, guard: Guard) -> GuardId {
        let id = GuardId(self.guards.len() as u32);
        self.guards.push(guard);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relocated_state_moves_between_scopes() {
        let mut g = GraphBuilder::new();
        let group = g.new_group();
        let child = g.new_scope(ScopeId(0));
        let s = g.new_state(ScopeId(0), group, None);
        g.relocate(s, child, group, None);
        assert!(g.scopes[0].states.is_empty());
        assert_eq!(g.scopes[child.0 as usize].states, vec![s]);
        assert_eq!(g.state(s).scope, child);
    }

    #[test]
    fn close_keeps_existing_transition() {
        let mut g = GraphBuilder::new();
        let group = g.new_group();
        let a = g.new_state(ScopeId(0), group, None);
        let b = g.new_state(ScopeId(0), group, None);
        g.set_transition(a, Transition::Final);
        g.close(a, Transition::Goto { target: b });
        assert!(matches!(g.state(a).transition, Some(Transition::Final)));
    }
}

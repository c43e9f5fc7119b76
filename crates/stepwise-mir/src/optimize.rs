// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Graph optimizer: reachability pruning and state linearization.
//!
//! Reachability starts from the entry, every jump case's resume and
//! continue states, label states targeted from inside leaves, and the return
//! state. Ordering walks fallthrough chains depth-first within a scope so
//! that a state's usual successor sits right after it.

use std::collections::VecDeque;

use crate::state::{LoweringResult, StateId, StateOrder};

/// Prune unreachable states and assign dispatch order. Mutates in place.
pub fn optimize(result: &mut LoweringResult) {
    let before = result.state_count();
    let reachable = reachable(result);

    linearize(result);

    for scope in &mut result.scopes {
        scope.states.retain(|s| reachable[s.index()]);
    }

    tracing::debug!(
        target: "stepwise::optimize",
        machine = %result.name,
        before,
        after = result.state_count(),
        "pruned unreachable states"
    );
}

/// States reachable from the externally addressable ones.
pub fn reachable(result: &LoweringResult) -> Vec<bool> {
    let mut seen = vec![false; result.states.len()];
    let mut queue: VecDeque<StateId> = VecDeque::new();

    queue.push_back(result.entry);
    for scope in &result.scopes {
        for case in &scope.jump_cases {
            queue.push_back(case.resume);
            queue.push_back(case.continue_);
        }
    }
    queue.extend(result.leaf_targets.iter().copied());
    queue.extend(result.return_state);

    while let Some(id) = queue.pop_front() {
        if seen[id.index()] {
            continue;
        }
        seen[id.index()] = true;
        if let Some(t) = &result.state(id).transition {
            for target in t.targets() {
                if !seen[target.index()] {
                    queue.push_back(target);
                }
            }
        }
    }
    seen
}

/// Assign `StateOrder` by greedy depth-first fallthrough walks and sort
/// every scope's states by it.
pub fn linearize(result: &mut LoweringResult) {
    let mut visited = vec![false; result.states.len()];
    let mut next = 0u32;

    for scope_idx in 0..result.scopes.len() {
        let scope_id = result.scopes[scope_idx].id;
        let states = result.scopes[scope_idx].states.clone();
        for start in states {
            let mut cursor = Some(start);
            while let Some(id) = cursor {
                if visited[id.index()] || result.state(id).scope != scope_id {
                    break;
                }
                visited[id.index()] = true;
                let state = result.state_mut(id);
                state.order = StateOrder(next);
                next += 1;
                cursor = state.transition.as_ref().and_then(|t| t.fallthrough_target());
            }
        }
    }

    let orders: Vec<StateOrder> = result.states.iter().map(|s| s.order).collect();
    for scope in &mut result.scopes {
        scope.states.sort_by_key(|s| orders[s.index()]);
    }
}

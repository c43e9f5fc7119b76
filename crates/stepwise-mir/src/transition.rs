// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! How control leaves a state.

use std::sync::Arc;

use stepwise_ast::VarId;
use stepwise_rt::AwaiterBinding;

use crate::expr::Expr;
use crate::state::{CatchTarget, RegionId, ScopeId, StateId};

#[derive(Clone)]
pub enum Transition {
    Goto {
        target: StateId,
    },
    Conditional {
        test: Expr,
        if_true: StateId,
        if_false: StateId,
    },
    Switch {
        value: Expr,
        cases: Vec<(Vec<Expr>, StateId)>,
        default: StateId,
    },
    /// Enter a try region: reset its bookkeeping and run the body.
    TryCatch {
        try_state: StateId,
        catches: Vec<CatchTarget>,
        finally: Option<StateId>,
        scope: ScopeId,
        region: RegionId,
    },
    Loop {
        body: StateId,
        continue_target: Option<StateId>,
        /// Join after the loop. Reached only through a jump to the break
        /// label, never by falling out of the body.
        break_target: Option<StateId>,
    },
    /// Get an awaiter for `target`; continue at `completion` if it is
    /// already complete, otherwise register for resumption and suspend.
    Suspend {
        target: Expr,
        awaiter: VarId,
        completion: StateId,
        binding: Arc<AwaiterBinding>,
        configure_await: bool,
        key: i64,
    },
    /// Fetch the awaiter's result into `result` and continue at `target`.
    SuspendResume {
        target: StateId,
        awaiter: VarId,
        result: VarId,
        binding: Arc<AwaiterBinding>,
    },
    /// Produce an item and suspend until the consumer asks for the next.
    Yield {
        value: Expr,
        resume: StateId,
        key: i64,
    },
    /// End of a finally: rethrow a parked failure, resume a parked jump,
    /// or fall through to `join`.
    EndFinally {
        region: RegionId,
        join: StateId,
    },
    /// The machine completes with its final result.
    Final,
}

impl Transition {
    /// The successor assuming no branch is taken.
    pub fn fallthrough_target(&self) -> Option<StateId> {
        match self {
            Transition::Goto { target } => Some(*target),
            Transition::Conditional { if_true, .. } => Some(*if_true),
            Transition::Switch { cases, default, .. } => {
                Some(cases.first().map_or(*default, |(_, s)| *s))
            }
            Transition::TryCatch { try_state, .. } => Some(*try_state),
            Transition::Loop { body, .. } => Some(*body),
            Transition::Suspend { completion, .. } => Some(*completion),
            Transition::SuspendResume { target, .. } => Some(*target),
            Transition::Yield { resume, .. } => Some(*resume),
            Transition::EndFinally { join, .. } => Some(*join),
            Transition::Final => None,
        }
    }

    /// Every state this transition can reach directly.
    pub fn targets(&self) -> Vec<StateId> {
        match self {
            Transition::Goto { target } => vec![*target],
            Transition::Conditional {
                if_true, if_false, ..
            } => vec![*if_true, *if_false],
            Transition::Switch { cases, default, .. } => {
                let mut out: Vec<StateId> = cases.iter().map(|(_, s)| *s).collect();
                out.push(*default);
                out
            }
            Transition::TryCatch {
                try_state,
                catches,
                finally,
                ..
            } => {
                let mut out = vec![*try_state];
                out.extend(catches.iter().map(|c| c.state));
                out.extend(finally.iter().copied());
                out
            }
            Transition::Loop {
                body,
                continue_target,
                ..
            } => {
                let mut out = vec![*body];
                out.extend(continue_target.iter().copied());
                out
            }
            Transition::Suspend { completion, .. } => vec![*completion],
            Transition::SuspendResume { target, .. } => vec![*target],
            Transition::Yield { resume, .. } => vec![*resume],
            Transition::EndFinally { join, .. } => vec![*join],
            Transition::Final => Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Transition::Goto { .. } => "goto",
            Transition::Conditional { .. } => "conditional",
            Transition::Switch { .. } => "switch",
            Transition::TryCatch { .. } => "try",
            Transition::Loop { .. } => "loop",
            Transition::Suspend { .. } => "suspend",
            Transition::SuspendResume { .. } => "resume",
            Transition::Yield { .. } => "yield",
            Transition::EndFinally { .. } => "end_finally",
            Transition::Final => "final",
        }
    }
}

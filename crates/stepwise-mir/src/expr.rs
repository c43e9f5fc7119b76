// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Leaf computations.
//!
//! A leaf is ordinary synchronous code that runs inside one state. Variables
//! are referenced by `VarId`; whether a variable lives in machine storage or
//! in the step's local frame is decided by the synthesizer.

use std::fmt;
use std::sync::Arc;

use stepwise_ast::{BinOp, FaultFilter, LabelId, Literal, Ty, UnaryOp, VarId};
use stepwise_rt::HostFn;

use crate::synth::MachineDefinition;

/// A host function resolved at lowering time.
#[derive(Clone)]
pub struct HostCall {
    pub name: String,
    pub func: HostFn,
}

#[derive(Clone)]
pub struct LeafCatch {
    pub filter: FaultFilter,
    /// Receives the caught failure. Always present; rethrow reads it.
    pub var: VarId,
    pub body: Expr,
}

#[derive(Clone)]
pub enum Expr {
    Const(Literal),
    Load(VarId),
    /// Assign and evaluate to the assigned value.
    Store {
        var: VarId,
        value: Box<Expr>,
    },
    /// Reset a variable to its type's zero value.
    Init {
        var: VarId,
        ty: Ty,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Call {
        call: HostCall,
        args: Vec<Expr>,
    },
    Block {
        locals: Vec<(VarId, Ty)>,
        body: Vec<Expr>,
    },
    If {
        test: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Option<Box<Expr>>,
    },
    Loop {
        body: Box<Expr>,
        break_label: Option<LabelId>,
        continue_label: Option<LabelId>,
    },
    Switch {
        value: Box<Expr>,
        cases: Vec<(Vec<Expr>, Expr)>,
        default: Option<Box<Expr>>,
    },
    Try {
        body: Box<Expr>,
        handlers: Vec<LeafCatch>,
        finally: Option<Box<Expr>>,
    },
    /// Leave the leaf for a label's state.
    Goto(LabelId),
    /// Leave the leaf for the return state. The value, if any, is a store
    /// into the final-result variable.
    Return(Option<Box<Expr>>),
    Throw(Box<Expr>),
    /// Start a nested machine sharing `captures` with this one.
    Spawn {
        machine: Arc<MachineDefinition>,
        captures: Vec<VarId>,
    },
}

impl Expr {
    pub fn unit() -> Self {
        Expr::Const(Literal::Unit)
    }

    /// Evaluating this has no effect and its value cannot change.
    pub fn is_const(&self) -> bool {
        matches!(self, Expr::Const(_))
    }

    /// Evaluating this has no effect.
    pub fn is_pure(&self) -> bool {
        matches!(self, Expr::Const(_) | Expr::Load(_))
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

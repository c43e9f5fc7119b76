// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Input tree for the state machine compiler.
//!
//! A program arrives already structured: blocks, branches, loops, try regions
//! and suspension points (`Await`, `Yield`). Every node carries the static
//! type the builder assigned it; nothing here infers types.

pub mod build;
pub mod node;
pub mod ty;
pub mod walk;

pub use node::{
    AsyncBlock, BinOp, CatchBlock, FaultFilter, Label, LabelId, Literal, MachineKind, Node,
    NodeKind, SwitchCase, UnaryOp, Var, VarId,
};
pub use ty::Ty;

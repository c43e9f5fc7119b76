// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Resumable state machines from trees with suspension points.
//!
//! A body containing `Await` (or `Yield`) nodes is lowered into a graph of
//! states: leaves run synchronously inside a state, and every suspension
//! splits the graph at a state pair registered in a jump table. The
//! optimizer prunes and orders the graph, and the synthesizer turns it into
//! a runnable machine whose step function re-enters through the jump table
//! each time the awaited operation completes.

mod display;
mod error;
mod eval;
mod exec;
mod expr;
mod options;
mod state;
mod transition;

pub mod describe;
pub mod jump_table;
pub mod lower;
pub mod optimize;
pub mod synth;

use std::sync::Arc;

use stepwise_ast::{AsyncBlock, Var};
use stepwise_rt::HostEnv;

pub use describe::{describe_json, MachineDescription};
pub use error::LoweringError;
pub use eval::Flow;
pub use exec::GeneratorHandle;
pub use expr::{Expr, HostCall, LeafCatch};
pub use options::{TransformOptions, DUMP_ENV};
pub use state::{
    CatchTarget, Guard, GuardId, GuardPhase, GroupId, JumpCase, LoweringResult, RegionId,
    ResultDescriptor, Scope, ScopeId, State, StateId, StateOrder, TryRegion, VarInfo, VarKind,
};
pub use synth::{CompiledMachine, Field, FieldKind, MachineDefinition, StorageLayout};
pub use transition::Transition;

/// Lower, optimize and synthesize `block`.
///
/// `externs` are the variables of an enclosing scope the body may use;
/// values for the ones it references are supplied when the machine starts.
pub fn transform(
    block: &AsyncBlock,
    externs: &[Var],
    env: Arc<HostEnv>,
    options: &TransformOptions,
) -> Result<CompiledMachine, LoweringError> {
    let mut lowering = lower::lower(block, externs, &env, options)?;
    if options.optimize {
        optimize::optimize(&mut lowering);
    } else {
        optimize::linearize(&mut lowering);
    }
    let dump = options.dump.then(|| lowering.to_string());
    let machine = synth::synthesize(lowering, env)?;
    if let Some(text) = dump {
        eprintln!("{}", text);
    }
    Ok(machine)
}

// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime support for synthesized state machines.
//!
//! Components:
//! - values and failures that flow through machine storage
//! - completion source / task handle returned by async machines
//! - awaiter binding: how to suspend on any awaitable type
//! - host environment: functions, capabilities, resume context

pub mod awaiter;
pub mod capability;
pub mod fault;
pub mod host;
pub mod task;
pub mod value;

pub use awaiter::{AwaitableShape, AwaiterBinding, AwaiterResolver, BindingError};
pub use capability::{CapabilityTable, HostMethod, Receiver, Returns};
pub use fault::Fault;
pub use host::{HostEnv, HostEnvBuilder, HostFn, HostFunctions, JobQueue, ResumeContext};
pub use task::{CompletionSource, Task};
pub use value::{Object, Value};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if a panicking holder poisoned it.
/// Machine and task state stays consistent across panics: every writer
/// finishes its update before calling out to host code.
pub fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

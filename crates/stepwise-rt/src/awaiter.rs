// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Awaiter binding resolution.
//!
//! Suspending on a value needs four operations: get an awaiter from the
//! awaited value, ask the awaiter whether it is complete, fetch its result,
//! and register a continuation. Built-in futures provide these directly.
//! Any host type can take part by exposing `get_awaiter` in the capability
//! table, where the returned awaiter type exposes `is_completed`,
//! `get_result` and `on_completed`. Discovery runs once per awaited type;
//! the resulting binding is cached and shared.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::Waker;

use stepwise_ast::Ty;
use thiserror::Error;

use crate::capability::{CapabilityTable, HostMethod, Returns};
use crate::{lock, Fault, Value};

pub const GET_AWAITER: &str = "get_awaiter";
pub const IS_COMPLETED: &str = "is_completed";
pub const GET_RESULT: &str = "get_result";
pub const ON_COMPLETED: &str = "on_completed";

/// Why a type cannot be suspended on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error("type `{ty}` is not awaitable")]
    NotAwaitable { ty: Ty },
    #[error("type `{ty}` has no `{method}` capability")]
    MissingCapability { ty: Ty, method: String },
    #[error("`{ty}.{method}` must return {expected}")]
    InvalidShape {
        ty: Ty,
        method: String,
        expected: String,
    },
}

/// Which protocol a binding follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwaitableShape {
    /// Built-in future without a result.
    Task,
    /// Built-in future with a result.
    Future,
    /// Host type discovered through the capability table.
    Custom,
}

type AwaiterOp = Arc<dyn Fn(&Value) -> Result<Value, Fault> + Send + Sync>;
type CompletedOp = Arc<dyn Fn(&Value) -> Result<bool, Fault> + Send + Sync>;
type ContinueOp = Arc<dyn Fn(&Value, Waker) -> Result<(), Fault> + Send + Sync>;

/// How to suspend on one awaited type. Immutable once built.
pub struct AwaiterBinding {
    pub awaitable: Ty,
    pub awaiter: Ty,
    /// Type of the value a resumed suspension produces.
    pub result: Ty,
    pub shape: AwaitableShape,
    get_awaiter: AwaiterOp,
    is_completed: CompletedOp,
    get_result: AwaiterOp,
    on_completed: ContinueOp,
}

impl AwaiterBinding {
    pub fn get_awaiter(&self, awaitable: &Value) -> Result<Value, Fault> {
        (self.get_awaiter)(awaitable)
    }

    pub fn is_completed(&self, awaiter: &Value) -> Result<bool, Fault> {
        (self.is_completed)(awaiter)
    }

    /// Result of a completed awaiter. A failed operation surfaces its fault.
    pub fn get_result(&self, awaiter: &Value) -> Result<Value, Fault> {
        (self.get_result)(awaiter)
    }

    pub fn on_completed(&self, awaiter: &Value, waker: Waker) -> Result<(), Fault> {
        (self.on_completed)(awaiter, waker)
    }

    fn builtin(awaitable: Ty, result: Ty, shape: AwaitableShape) -> Self {
        let discard = shape == AwaitableShape::Task;
        Self {
            awaiter: awaitable.clone(),
            awaitable,
            result,
            shape,
            // A task is its own awaiter.
            get_awaiter: Arc::new(|v| {
                v.as_task()?;
                Ok(v.clone())
            }),
            is_completed: Arc::new(|v| Ok(v.as_task()?.is_complete())),
            get_result: Arc::new(move |v| match v.as_task()?.outcome() {
                Some(Ok(_)) if discard => Ok(Value::Unit),
                Some(outcome) => outcome,
                None => Err(Fault::invalid_state(
                    "result requested from a task that has not completed",
                )),
            }),
            on_completed: Arc::new(|v, waker| {
                v.as_task()?.on_complete(waker);
                Ok(())
            }),
        }
    }
}

impl fmt::Debug for AwaiterBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwaiterBinding")
            .field("awaitable", &self.awaitable)
            .field("awaiter", &self.awaiter)
            .field("result", &self.result)
            .field("shape", &self.shape)
            .finish()
    }
}

/// Resolves and caches awaiter bindings by awaited type.
pub struct AwaiterResolver {
    capabilities: Arc<CapabilityTable>,
    cache: Mutex<HashMap<Ty, Arc<AwaiterBinding>>>,
    discoveries: AtomicUsize,
}

impl AwaiterResolver {
    pub fn new(capabilities: Arc<CapabilityTable>) -> Self {
        Self {
            capabilities,
            cache: Mutex::new(HashMap::new()),
            discoveries: AtomicUsize::new(0),
        }
    }

    /// Binding for `ty`. Repeated calls return the same `Arc`.
    pub fn resolve(&self, ty: &Ty) -> Result<Arc<AwaiterBinding>, BindingError> {
        let mut cache = lock(&self.cache);
        if let Some(binding) = cache.get(ty) {
            tracing::trace!(target: "stepwise::await", ty = %ty, "binding cache hit");
            return Ok(binding.clone());
        }
        self.discoveries.fetch_add(1, Ordering::Relaxed);
        let binding = Arc::new(self.discover(ty)?);
        tracing::debug!(
            target: "stepwise::await",
            ty = %ty,
            awaiter = %binding.awaiter,
            result = %binding.result,
            shape = ?binding.shape,
            "resolved awaiter binding"
        );
        cache.insert(ty.clone(), binding.clone());
        Ok(binding)
    }

    /// How many times capability discovery has run.
    pub fn discovery_count(&self) -> usize {
        self.discoveries.load(Ordering::Relaxed)
    }

    fn discover(&self, ty: &Ty) -> Result<AwaiterBinding, BindingError> {
        match ty {
            Ty::Task => Ok(AwaiterBinding::builtin(
                ty.clone(),
                Ty::Unit,
                AwaitableShape::Task,
            )),
            Ty::Future(inner) => Ok(AwaiterBinding::builtin(
                ty.clone(),
                (**inner).clone(),
                AwaitableShape::Future,
            )),
            Ty::Object(name) => self.discover_custom(ty, name),
            _ => Err(BindingError::NotAwaitable { ty: ty.clone() }),
        }
    }

    fn discover_custom(&self, ty: &Ty, name: &str) -> Result<AwaiterBinding, BindingError> {
        let get_awaiter = self.method(ty, name, GET_AWAITER)?;
        let awaiter_name = match &get_awaiter.returns {
            Returns::Value(Ty::Object(n)) => n.clone(),
            _ => {
                return Err(BindingError::InvalidShape {
                    ty: ty.clone(),
                    method: GET_AWAITER.to_string(),
                    expected: "an awaiter object".to_string(),
                })
            }
        };
        let awaiter_ty = Ty::Object(awaiter_name.clone());

        let is_completed = self.method(&awaiter_ty, &awaiter_name, IS_COMPLETED)?;
        if is_completed.returns != Returns::Value(Ty::Bool) {
            return Err(BindingError::InvalidShape {
                ty: awaiter_ty,
                method: IS_COMPLETED.to_string(),
                expected: "bool".to_string(),
            });
        }
        let get_result = self.method(&awaiter_ty, &awaiter_name, GET_RESULT)?;
        let result = match &get_result.returns {
            Returns::Void => Ty::Unit,
            Returns::Value(t) => t.clone(),
        };
        let on_completed = self.method(&awaiter_ty, &awaiter_name, ON_COMPLETED)?;

        // Adapters normalize instance/extension and void/value methods into
        // the uniform call shape the machine uses.
        Ok(AwaiterBinding {
            awaitable: ty.clone(),
            awaiter: awaiter_ty,
            result,
            shape: AwaitableShape::Custom,
            get_awaiter: Arc::new(move |v| get_awaiter.invoke(v, &[])),
            is_completed: Arc::new(move |v| is_completed.invoke(v, &[])?.as_bool()),
            get_result: Arc::new(move |v| get_result.invoke(v, &[])),
            on_completed: Arc::new(move |v, waker| {
                on_completed.invoke(v, &[Value::Continuation(waker)])?;
                Ok(())
            }),
        })
    }

    fn method(&self, ty: &Ty, name: &str, method: &str) -> Result<HostMethod, BindingError> {
        self.capabilities
            .find(name, method)
            .cloned()
            .ok_or_else(|| BindingError::MissingCapability {
                ty: ty.clone(),
                method: method.to_string(),
            })
    }
}

impl fmt::Debug for AwaiterResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwaiterResolver")
            .field("cached", &lock(&self.cache).len())
            .field("discoveries", &self.discovery_count())
            .finish()
    }
}

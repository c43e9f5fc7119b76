// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Execution failures.
//!
//! A `Fault` is what a leaf computation raises and what a failed future
//! carries. Catch handlers select on `kind`.

use thiserror::Error;

use crate::Value;

pub const KIND_ERROR: &str = "error";
pub const KIND_TYPE: &str = "type";
pub const KIND_DIVIDE_BY_ZERO: &str = "divide_by_zero";
pub const KIND_PANIC: &str = "panic";
pub const KIND_INVALID_STATE: &str = "invalid_state";

/// A failure raised while a machine runs.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct Fault {
    pub kind: String,
    pub message: String,
    /// Value thrown by user code, when the failure came from a `Throw`.
    pub payload: Option<Box<Value>>,
}

impl Fault {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            payload: None,
        }
    }

    /// Failure carrying an arbitrary thrown value.
    pub fn thrown(value: Value) -> Self {
        match value {
            Value::Fault(f) => f,
            other => Self {
                kind: KIND_ERROR.to_string(),
                message: other.to_string(),
                payload: Some(Box::new(other)),
            },
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(KIND_TYPE, message)
    }

    pub fn divide_by_zero() -> Self {
        Self::new(KIND_DIVIDE_BY_ZERO, "division by zero; check divisor before dividing")
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(KIND_INVALID_STATE, message)
    }

    /// Failure for a caught panic payload.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Self::new(KIND_PANIC, msg)
    }
}

impl PartialEq for Fault {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.message == other.message
    }
}

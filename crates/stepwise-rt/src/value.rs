// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime values held in machine storage.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::task::Waker;

use stepwise_ast::{Literal, Ty};

use crate::{Fault, Task};

/// A runtime value.
#[derive(Clone)]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    /// Built-in future handle.
    Task(Task),
    /// Host object. Custom awaitables and awaiters are objects.
    Object(Object),
    /// A caught failure, as bound by a catch handler.
    Fault(Fault),
    /// Continuation handed to a custom awaiter's `on_completed`.
    Continuation(Waker),
}

/// Host object: a type name plus an opaque payload.
#[derive(Clone)]
pub struct Object {
    pub type_name: Arc<str>,
    pub payload: Arc<dyn Any + Send + Sync>,
}

impl Object {
    pub fn new<T: Any + Send + Sync>(type_name: &str, payload: T) -> Self {
        Self {
            type_name: Arc::from(type_name),
            payload: Arc::new(payload),
        }
    }

    pub fn downcast<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    pub fn object<T: Any + Send + Sync>(type_name: &str, payload: T) -> Self {
        Value::Object(Object::new(type_name, payload))
    }

    /// Zero value a fresh storage slot of type `ty` holds.
    pub fn default_for(ty: &Ty) -> Self {
        match ty {
            Ty::Bool => Value::Bool(false),
            Ty::Int => Value::Int(0),
            Ty::Float => Value::Float(0.0),
            Ty::Str => Value::str(""),
            _ => Value::Unit,
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            Value::Unit => "()",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Task(_) => "Task",
            Value::Object(o) => &o.type_name,
            Value::Fault(_) => "Fault",
            Value::Continuation(_) => "Continuation",
        }
    }

    pub fn as_bool(&self) -> Result<bool, Fault> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(Fault::type_error(format!(
                "expected bool, found {}",
                other.type_name()
            ))),
        }
    }

    pub fn as_int(&self) -> Result<i64, Fault> {
        match self {
            Value::Int(n) => Ok(*n),
            other => Err(Fault::type_error(format!(
                "expected int, found {}",
                other.type_name()
            ))),
        }
    }

    pub fn as_task(&self) -> Result<&Task, Fault> {
        match self {
            Value::Task(t) => Ok(t),
            other => Err(Fault::type_error(format!(
                "expected Task, found {}",
                other.type_name()
            ))),
        }
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Value::Unit)
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Unit
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Unit, Value::Unit) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Task(a), Value::Task(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(&a.payload, &b.payload),
            (Value::Fault(a), Value::Fault(b)) => a == b,
            (Value::Continuation(a), Value::Continuation(b)) => a.will_wake(b),
            _ => false,
        }
    }
}

impl From<Literal> for Value {
    fn from(lit: Literal) -> Self {
        match lit {
            Literal::Unit => Value::Unit,
            Literal::Bool(b) => Value::Bool(b),
            Literal::Int(n) => Value::Int(n),
            Literal::Float(n) => Value::Float(n),
            Literal::Str(s) => Value::Str(Arc::from(s)),
        }
    }
}

impl From<&Literal> for Value {
    fn from(lit: &Literal) -> Self {
        Value::from(lit.clone())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<Task> for Value {
    fn from(t: Task) -> Self {
        Value::Task(t)
    }
}

impl From<Fault> for Value {
    fn from(f: Fault) -> Self {
        Value::Fault(f)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => write!(f, "()"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{}", s),
            Value::Task(t) => write!(f, "<task {}>", if t.is_complete() { "done" } else { "pending" }),
            Value::Object(o) => write!(f, "<{}>", o.type_name),
            Value::Fault(fault) => write!(f, "{}", fault),
            Value::Continuation(_) => write!(f, "<continuation>"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Fault(fault) => write!(f, "Fault({:?})", fault.kind),
            other => write!(f, "{}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_numeric_equality() {
        assert_eq!(Value::Int(2), Value::Float(2.0));
        assert_ne!(Value::Int(2), Value::str("2"));
    }

    #[test]
    fn default_slots_match_type() {
        assert_eq!(Value::default_for(&Ty::Int), Value::Int(0));
        assert_eq!(Value::default_for(&Ty::future(Ty::Int)), Value::Unit);
    }

    #[test]
    fn objects_compare_by_identity() {
        let a = Value::object("Timer", 5u32);
        let b = a.clone();
        let c = Value::object("Timer", 5u32);
        assert_eq!(a, b);
        assert_ne!(a, c);
        if let Value::Object(o) = &a {
            assert_eq!(o.downcast::<u32>(), Some(&5));
        }
    }
}

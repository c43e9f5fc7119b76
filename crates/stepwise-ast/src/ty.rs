// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Static types attached to nodes by the tree builder.

use std::fmt;

/// Node type. All types are concrete; the builder decides them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Ty {
    Unit,
    Bool,
    Int,
    Float,
    Str,
    /// Built-in future with no result.
    Task,
    /// Built-in future producing a value of the inner type.
    Future(Box<Ty>),
    /// Generator handle producing items of the inner type.
    Stream(Box<Ty>),
    /// Host-defined type, identified by name. Custom awaitables live here.
    Object(String),
    /// A caught failure.
    Fault,
    /// Dynamically typed slot.
    Any,
}

impl Ty {
    pub fn future(inner: Ty) -> Self {
        Ty::Future(Box::new(inner))
    }

    pub fn stream(inner: Ty) -> Self {
        Ty::Stream(Box::new(inner))
    }

    pub fn object(name: impl Into<String>) -> Self {
        Ty::Object(name.into())
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Ty::Unit)
    }
}

impl Default for Ty {
    fn default() -> Self {
        Ty::Unit
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Unit => write!(f, "()"),
            Ty::Bool => write!(f, "bool"),
            Ty::Int => write!(f, "int"),
            Ty::Float => write!(f, "float"),
            Ty::Str => write!(f, "string"),
            Ty::Task => write!(f, "Task"),
            Ty::Future(inner) => write!(f, "Future<{}>", inner),
            Ty::Stream(inner) => write!(f, "Stream<{}>", inner),
            Ty::Object(name) => write!(f, "{}", name),
            Ty::Fault => write!(f, "Fault"),
            Ty::Any => write!(f, "any"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_nested_generics() {
        let ty = Ty::future(Ty::stream(Ty::Int));
        assert_eq!(ty.to_string(), "Future<Stream<int>>");
        assert_eq!(Ty::object("Timer").to_string(), "Timer");
    }
}

// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Capability table: methods a host type exposes, looked up by name.
//!
//! A method is either declared on the type itself (instance) or supplied from
//! outside as an extension that takes the receiver as its first argument.
//! Awaiter discovery searches instance methods first.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use stepwise_ast::Ty;

use crate::{Fault, Value};

pub type InstanceFn = Arc<dyn Fn(&Value, &[Value]) -> Result<Value, Fault> + Send + Sync>;
pub type ExtensionFn = Arc<dyn Fn(&[Value]) -> Result<Value, Fault> + Send + Sync>;

#[derive(Clone)]
pub enum Receiver {
    Instance(InstanceFn),
    /// Receiver passed as the first argument.
    Extension(ExtensionFn),
}

/// What a method declares it returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Returns {
    Void,
    Value(Ty),
}

#[derive(Clone)]
pub struct HostMethod {
    pub name: String,
    pub receiver: Receiver,
    pub returns: Returns,
}

impl HostMethod {
    pub fn is_extension(&self) -> bool {
        matches!(self.receiver, Receiver::Extension(_))
    }

    /// Call with a uniform shape regardless of how the method was declared.
    /// A void method yields `Value::Unit`.
    pub fn invoke(&self, this: &Value, args: &[Value]) -> Result<Value, Fault> {
        let out = match &self.receiver {
            Receiver::Instance(f) => f(this, args)?,
            Receiver::Extension(f) => {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(this.clone());
                full.extend_from_slice(args);
                f(&full)?
            }
        };
        Ok(match self.returns {
            Returns::Void => Value::Unit,
            Returns::Value(_) => out,
        })
    }
}

impl fmt::Debug for HostMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostMethod")
            .field("name", &self.name)
            .field("extension", &self.is_extension())
            .field("returns", &self.returns)
            .finish()
    }
}

/// Methods keyed by (type name, method name).
#[derive(Default)]
pub struct CapabilityTable {
    instance: HashMap<(String, String), HostMethod>,
    extension: HashMap<(String, String), HostMethod>,
}

impl CapabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_instance<F>(&mut self, ty: &str, name: &str, returns: Returns, f: F)
    where
        F: Fn(&Value, &[Value]) -> Result<Value, Fault> + Send + Sync + 'static,
    {
        self.instance.insert(
            (ty.to_string(), name.to_string()),
            HostMethod {
                name: name.to_string(),
                receiver: Receiver::Instance(Arc::new(f)),
                returns,
            },
        );
    }

    pub fn register_extension<F>(&mut self, ty: &str, name: &str, returns: Returns, f: F)
    where
        F: Fn(&[Value]) -> Result<Value, Fault> + Send + Sync + 'static,
    {
        self.extension.insert(
            (ty.to_string(), name.to_string()),
            HostMethod {
                name: name.to_string(),
                receiver: Receiver::Extension(Arc::new(f)),
                returns,
            },
        );
    }

    /// Find `name` on `ty`, preferring an instance method.
    pub fn find(&self, ty: &str, name: &str) -> Option<&HostMethod> {
        let key = (ty.to_string(), name.to_string());
        self.instance.get(&key).or_else(|| self.extension.get(&key))
    }

    pub fn is_empty(&self) -> bool {
        self.instance.is_empty() && self.extension.is_empty()
    }
}

// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Construction errors. All of them are fatal to the transform.

use stepwise_rt::BindingError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoweringError {
    #[error("variable `{name}` is not in scope")]
    UnscopedVariable { name: String },

    #[error("switch case test cannot suspend")]
    SuspendInCaseTest,

    #[error("generator `{machine}` cannot await")]
    AwaitInGenerator { machine: String },

    #[error("async body `{machine}` cannot yield")]
    YieldOutsideGenerator { machine: String },

    #[error("jump to undefined label `{label}`")]
    UndefinedLabel { label: String },

    #[error("unknown host function `{name}`")]
    UnknownFunction { name: String },

    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error("`{machine}` has no suspension points; run it directly instead")]
    NoSuspensionPoints { machine: String },

    #[error("rethrow outside of a catch handler")]
    RethrowOutsideCatch,

    #[error("in nested machine `{name}`: {source}")]
    Nested {
        name: String,
        source: Box<LoweringError>,
    },
}

impl LoweringError {
    /// The innermost error, looking through nested machines.
    pub fn root(&self) -> &LoweringError {
        match self {
            LoweringError::Nested { source, .. } => source.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_ast::Ty;

    #[test]
    fn binding_errors_pass_through() {
        let err: LoweringError = BindingError::NotAwaitable { ty: Ty::Int }.into();
        assert_eq!(err.to_string(), "type `int` is not awaitable");
    }

    #[test]
    fn nested_root() {
        let err = LoweringError::Nested {
            name: "outer".into(),
            source: Box::new(LoweringError::Nested {
                name: "inner".into(),
                source: Box::new(LoweringError::SuspendInCaseTest),
            }),
        };
        assert_eq!(err.root(), &LoweringError::SuspendInCaseTest);
        assert!(err.to_string().starts_with("in nested machine `outer`"));
    }
}

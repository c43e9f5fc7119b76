// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Transform configuration.

/// Environment variable that turns on the machine dump.
pub const DUMP_ENV: &str = "STEPWISE_DUMP_MACHINE";

#[derive(Debug, Clone)]
pub struct TransformOptions {
    /// Overrides the body's own name in field names and dumps.
    pub name: Option<String>,
    /// Prune unreachable states and linearize. Off keeps every state.
    pub optimize: bool,
    /// Print the text dump to stderr after synthesis.
    pub dump: bool,
}

impl TransformOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn without_optimization(mut self) -> Self {
        self.optimize = false;
        self
    }

    /// Options for a nested machine: same switches, no name override.
    pub(crate) fn nested(&self) -> Self {
        Self {
            name: None,
            ..self.clone()
        }
    }
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            name: None,
            optimize: true,
            dump: std::env::var(DUMP_ENV).map_or(false, |v| !v.is_empty() && v != "0"),
        }
    }
}

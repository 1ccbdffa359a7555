//! Sandboxed execution of validated generated code.
//!
//! The sandbox re-checks imports and forbidden names against its own
//! configured capability set before anything runs; the static validator
//! uses the widest possible allow-list, but a config may grant less.

pub mod capabilities;
pub mod config;
pub mod output;
mod vm;

use serde_json::Value;

use crate::error::{Result, SandboxError};
use crate::validation::rules::allowed_modules;
use crate::validation::validator::{collect_forbidden_uses, collect_import_violations, parse_suite};

pub use config::{ExecutionConfig, ExecutionConfigBuilder};
pub use output::{CapturedStream, SandboxOutput};

/// A configured sandbox. Cheap to construct; every [`execute`](Sandbox::execute)
/// call builds its own interpreter, so instances carry no interpreter state.
#[derive(Debug, Clone)]
pub struct Sandbox {
    config: ExecutionConfig,
}

impl Sandbox {
    /// Create a sandbox with the given configuration.
    pub fn new(config: ExecutionConfig) -> Self {
        Self { config }
    }

    /// The configuration this sandbox enforces.
    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Run `code` and call `entry(target)`, returning the entry function's
    /// value serialized to JSON.
    ///
    /// Blocking: this compiles and interprets on the calling thread. The
    /// executor wraps it in a worker thread and applies the timeout; the
    /// timeout is not enforced here.
    pub fn execute(&self, code: &str, entry: &str, target: &str) -> Result<Value> {
        let suite = parse_suite(code)?;

        let allowed = allowed_modules(&self.config.allowed_capabilities);
        let import_violations = collect_import_violations(&suite, &allowed);
        if !import_violations.is_empty() {
            return Err(SandboxError::Security(import_violations.join("; ")));
        }
        let forbidden = collect_forbidden_uses(code);
        if !forbidden.is_empty() {
            return Err(SandboxError::Security(forbidden.join("; ")));
        }

        tracing::debug!(%target, entry, "starting sandboxed execution");
        vm::run_entry(code, entry, target, &self.config)
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new(ExecutionConfig::default())
    }
}

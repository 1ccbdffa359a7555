//! Execution configuration with builder pattern.

use std::collections::HashSet;
use std::time::Duration;

use crate::validation::rules::DEFAULT_CAPABILITIES;

/// Configuration for a sandboxed run.
///
/// Capabilities are deny-by-default: anything not named in
/// `allowed_capabilities` is unavailable to the generated code, both as an
/// import and as an injected object.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Maximum wall-clock time per target before the worker is abandoned.
    pub timeout: Duration,
    /// Optional byte budget. The embedded interpreter has no allocation
    /// hook, so this bounds what the sandbox can bound: captured output and
    /// fetched response bodies.
    pub memory_limit: Option<u64>,
    /// Capabilities the generated code may use.
    pub allowed_capabilities: HashSet<String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            memory_limit: Some(8 * 1024 * 1024), // 8MB
            allowed_capabilities: DEFAULT_CAPABILITIES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl ExecutionConfig {
    /// Create a new builder for ExecutionConfig.
    pub fn builder() -> ExecutionConfigBuilder {
        ExecutionConfigBuilder::default()
    }
}

/// Builder for creating ExecutionConfig instances.
#[derive(Debug, Clone, Default)]
pub struct ExecutionConfigBuilder {
    timeout: Option<Duration>,
    memory_limit: Option<Option<u64>>,
    allowed_capabilities: Option<HashSet<String>>,
}

impl ExecutionConfigBuilder {
    /// Set the per-target execution timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the byte budget for captured output and response bodies.
    pub fn memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit = Some(Some(bytes));
        self
    }

    /// Remove the byte budget entirely.
    pub fn unlimited_memory(mut self) -> Self {
        self.memory_limit = Some(None);
        self
    }

    /// Replace the capability allow-list.
    pub fn allowed_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_capabilities =
            Some(capabilities.into_iter().map(Into::into).collect());
        self
    }

    /// Build the ExecutionConfig.
    pub fn build(self) -> ExecutionConfig {
        let default = ExecutionConfig::default();
        ExecutionConfig {
            timeout: self.timeout.unwrap_or(default.timeout),
            memory_limit: self.memory_limit.unwrap_or(default.memory_limit),
            allowed_capabilities: self
                .allowed_capabilities
                .unwrap_or(default.allowed_capabilities),
        }
    }
}

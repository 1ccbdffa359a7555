//! Timed, multi-target execution of validated code.
//!
//! One preprocessing pass, then one sandboxed run per target, each under
//! its own wall-clock budget. A timed-out worker thread cannot be killed,
//! so its join handle is dropped and the thread is left to finish on its
//! own; its eventual result is discarded. Per-target failures never abort
//! the batch.

pub mod normalize;
pub mod preprocess;

use std::time::Instant;

use serde_json::Value;

use crate::error::SandboxError;
use crate::model::{ExecutionResult, SourceOutcome};
use crate::sandbox::{ExecutionConfig, Sandbox};
use crate::validation::rules::ENTRY_FUNCTION;

pub use normalize::normalize_return;
pub use preprocess::preprocess;

/// Key added to each record when a run covers more than one target.
const SOURCE_TARGET_KEY: &str = "source_target";

/// Runs generated code against one or more targets.
#[derive(Debug, Clone)]
pub struct Executor {
    config: ExecutionConfig,
}

impl Executor {
    /// Create an executor with the given configuration.
    pub fn new(config: ExecutionConfig) -> Self {
        Self { config }
    }

    /// Run against a single target.
    pub async fn run_single(&self, code: &str, target: &str) -> ExecutionResult {
        self.run_multi(code, &[target.to_string()]).await
    }

    /// Run against every target in order, aggregating records and errors.
    ///
    /// The aggregate succeeds when at least one target does; `per_target`
    /// always has exactly one entry per input target, in input order.
    pub async fn run_multi(&self, code: &str, targets: &[String]) -> ExecutionResult {
        let started = Instant::now();
        let processed = preprocess(code);
        let tag_records = targets.len() > 1;

        let mut records = Vec::new();
        let mut errors = Vec::new();
        let mut per_target = Vec::with_capacity(targets.len());

        for target in targets {
            let (outcome, mut target_records) =
                self.run_target(&processed, target).await;

            if let Some(error) = &outcome.error {
                errors.push(format!("{target}: {error}"));
            }
            if tag_records {
                for record in &mut target_records {
                    tag_record(record, target);
                }
            }
            records.append(&mut target_records);
            per_target.push(outcome);
        }

        let succeeded = per_target.iter().any(|o| o.succeeded);
        let result = ExecutionResult {
            succeeded,
            records,
            errors,
            per_target,
            total_duration: started.elapsed(),
            produced_at: chrono::Utc::now(),
        };
        tracing::info!(
            targets = targets.len(),
            successes = result.success_count(),
            records = result.records.len(),
            duration_ms = result.total_duration.as_millis() as u64,
            "execution finished"
        );
        result
    }

    /// One target under the configured timeout. The sandbox call blocks, so
    /// it runs on a blocking worker and is raced against the deadline.
    async fn run_target(&self, code: &str, target: &str) -> (SourceOutcome, Vec<Value>) {
        let target_started = Instant::now();
        let sandbox = Sandbox::new(self.config.clone());
        let worker_code = code.to_string();
        let worker_target = target.to_string();
        let handle = tokio::task::spawn_blocking(move || {
            sandbox.execute(&worker_code, ENTRY_FUNCTION, &worker_target)
        });

        match tokio::time::timeout(self.config.timeout, handle).await {
            Err(_elapsed) => {
                tracing::warn!(
                    %target,
                    timeout_ms = self.config.timeout.as_millis() as u64,
                    "target timed out; abandoning worker thread"
                );
                let err = SandboxError::Timeout(self.config.timeout);
                (
                    SourceOutcome::failure(
                        target,
                        format!("{}: {}", err.kind(), err),
                        target_started.elapsed(),
                    ),
                    Vec::new(),
                )
            }
            Ok(Err(join_error)) => {
                tracing::error!(%target, %join_error, "sandbox worker panicked");
                let err =
                    SandboxError::ExecutionFailed("sandbox worker panicked".to_string());
                (
                    SourceOutcome::failure(
                        target,
                        format!("{}: {}", err.kind(), err),
                        target_started.elapsed(),
                    ),
                    Vec::new(),
                )
            }
            Ok(Ok(Err(err))) => {
                tracing::debug!(%target, error = %err, kind = err.kind(), "target failed");
                (
                    SourceOutcome::failure(
                        target,
                        format!("{}: {}", err.kind(), err),
                        target_started.elapsed(),
                    ),
                    Vec::new(),
                )
            }
            Ok(Ok(Ok(value))) => normalize_return(target, value, target_started.elapsed()),
        }
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(ExecutionConfig::default())
    }
}

/// Stamp a record with the target it came from. Only object records can
/// carry the tag; scalar or list records pass through untouched.
fn tag_record(record: &mut Value, target: &str) {
    if let Value::Object(map) = record {
        map.insert(
            SOURCE_TARGET_KEY.to_string(),
            Value::String(target.to_string()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tag_record_only_touches_objects() {
        let mut object = json!({"a": 1});
        tag_record(&mut object, "https://example.com");
        assert_eq!(object["source_target"], "https://example.com");

        let mut scalar = json!(42);
        tag_record(&mut scalar, "https://example.com");
        assert_eq!(scalar, json!(42));
    }

    #[tokio::test]
    async fn test_invalid_import_becomes_failed_outcome() {
        let executor = Executor::default();
        let code = "import subprocess\n\ndef scrape_data(url):\n    return []\n";
        let result = executor.run_single(code, "https://example.com").await;

        assert!(!result.succeeded);
        assert_eq!(result.per_target.len(), 1);
        assert!(!result.per_target[0].succeeded);
        assert!(result.errors[0].starts_with("https://example.com: security:"));
    }

    #[tokio::test]
    async fn test_syntax_error_becomes_failed_outcome() {
        let executor = Executor::default();
        let result = executor.run_single("def scrape_data(url:\n", "t").await;
        assert!(!result.succeeded);
        assert!(result.errors[0].contains("syntax"));
    }
}

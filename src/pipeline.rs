//! End-to-end pipeline: generate, validate, execute, publish.
//!
//! Code generation is a collaborator behind [`CodeGenerator`]; the
//! pipeline owns the retry loop around it and feeds each failing verdict
//! back so the next attempt can correct itself. Execution results go to
//! every registered [`ResultSink`]; a sink failure is logged and never
//! fails the run.

use async_trait::async_trait;

use crate::error::{Result, SandboxError};
use crate::executor::Executor;
use crate::model::{ExecutionResult, GeneratedCode, ValidationVerdict};
use crate::sandbox::ExecutionConfig;
use crate::validation::validate;

/// Produces candidate source for a scraping request. Implementations wrap
/// whatever backs generation (an LLM client, a template library, a fixture
/// in tests).
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Generate source for `request`. When a previous attempt failed
    /// validation, its verdict is passed as `feedback`.
    async fn generate(
        &self,
        request: &str,
        feedback: Option<&ValidationVerdict>,
    ) -> anyhow::Result<String>;
}

/// Receives finished execution results.
pub trait ResultSink: Send + Sync {
    /// Publish one result. Errors are logged by the pipeline, not
    /// propagated.
    fn publish(&self, result: &ExecutionResult) -> anyhow::Result<()>;
}

/// The generate-validate-execute pipeline.
pub struct ScraperPipeline<G> {
    generator: G,
    executor: Executor,
    max_generation_attempts: usize,
    sinks: Vec<Box<dyn ResultSink>>,
}

impl<G: CodeGenerator> ScraperPipeline<G> {
    /// Create a pipeline with the default retry budget of three generation
    /// attempts.
    pub fn new(generator: G, config: ExecutionConfig) -> Self {
        Self {
            generator,
            executor: Executor::new(config),
            max_generation_attempts: 3,
            sinks: Vec::new(),
        }
    }

    /// Override the generation retry budget. Clamped to at least one.
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_generation_attempts = attempts.max(1);
        self
    }

    /// Register a sink for finished results.
    pub fn add_sink(mut self, sink: Box<dyn ResultSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Run one request end to end: obtain validated code, execute it
    /// against every target, publish the result.
    ///
    /// Fails only when no valid code could be obtained within the retry
    /// budget or the generator itself errors; execution failures are
    /// reported inside the returned [`ExecutionResult`].
    pub async fn run_request(
        &self,
        request: &str,
        targets: &[String],
    ) -> Result<ExecutionResult> {
        let code = self.generate_validated(request).await?;
        let result = self.executor.run_multi(code.source(), targets).await;

        for sink in &self.sinks {
            if let Err(error) = sink.publish(&result) {
                tracing::warn!(%error, "result sink failed");
            }
        }
        Ok(result)
    }

    async fn generate_validated(&self, request: &str) -> Result<GeneratedCode> {
        let mut feedback: Option<ValidationVerdict> = None;

        for attempt in 1..=self.max_generation_attempts {
            let source = self
                .generator
                .generate(request, feedback.as_ref())
                .await
                .map_err(SandboxError::Generation)?;

            let verdict = validate(&source);
            if verdict.overall_valid {
                tracing::info!(attempt, "generated code passed validation");
                return Ok(GeneratedCode::new(source).with_verdict(verdict));
            }
            tracing::warn!(
                attempt,
                errors = ?verdict.errors,
                "generated code failed validation"
            );
            feedback = Some(verdict);
        }

        let reason = feedback
            .and_then(|v| v.errors.first().cloned())
            .unwrap_or_else(|| "no verdict recorded".to_string());
        Err(SandboxError::Rejected {
            attempts: self.max_generation_attempts,
            reason,
        })
    }
}

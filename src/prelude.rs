//! Prelude module for convenient imports.

pub use crate::error::{Result, SandboxError};
pub use crate::executor::Executor;
pub use crate::model::{Confidence, ExecutionResult, SourceOutcome, ValidationVerdict};
pub use crate::pipeline::{CodeGenerator, ResultSink, ScraperPipeline};
pub use crate::sandbox::{ExecutionConfig, Sandbox};
pub use crate::validation::validate;

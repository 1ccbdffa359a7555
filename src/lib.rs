//! # Scraper Sandbox
//!
//! Validation and sandboxed execution for untrusted generated Python
//! scraping code.
//!
//! Generated scripts pass through two independent gates before anything
//! runs: a static validator (syntax, import allow-list, forbidden
//! operations, entry-function signature) and a hardened embedded
//! interpreter that only exposes explicitly granted capabilities. The
//! executor then drives the script against one or more targets under a
//! per-target timeout and aggregates the results.
//!
//! ## Example
//!
//! ```rust,ignore
//! use scraper_sandbox_rs::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let code = r#"
//! def scrape_data(url):
//!     response = requests.get(url)
//!     titles = html_utils.find_all(response.text, "h2")
//!     return [{"title": t} for t in titles]
//! "#;
//!
//!     let verdict = validate(code);
//!     assert!(verdict.overall_valid);
//!
//!     let config = ExecutionConfig::builder()
//!         .timeout(Duration::from_secs(10))
//!         .build();
//!     let targets = vec!["https://example.com/news".to_string()];
//!     let result = run(code, &targets, config).await;
//!
//!     println!("{} records from {} target(s)", result.records.len(), targets.len());
//! }
//! ```
//!
//! ## Security Model
//!
//! Enforcement is layered; each layer assumes the ones before it were
//! bypassed:
//!
//! 1. **Static validation**: imports outside the allow-list and
//!    reflective builtins are rejected before compilation
//! 2. **Capability injection**: network, HTML parsing, and date/time are
//!    host-controlled objects; there is no ambient I/O to reach for
//! 3. **Hardened interpreter**: escape-prone builtins are replaced with
//!    raising stubs and every import goes through a checking hook
//! 4. **Timeout isolation**: each target runs on a worker thread that is
//!    abandoned when its wall-clock budget expires

pub mod error;
pub mod executor;
pub mod model;
pub mod pipeline;
pub mod prelude;
pub mod sandbox;
pub mod validation;

// Re-export main types at crate root for convenience
pub use error::{Result, SandboxError};
pub use executor::Executor;
pub use model::{
    Confidence, ExecutionResult, GeneratedCode, SourceOutcome, ValidationVerdict,
};
pub use pipeline::{CodeGenerator, ResultSink, ScraperPipeline};
pub use sandbox::{ExecutionConfig, ExecutionConfigBuilder, Sandbox};
pub use validation::validate;

/// Run already-validated code against `targets` with the given config.
///
/// The convenience entry point for callers that manage generation and
/// validation themselves. Never returns an error: every failure mode is
/// folded into the result's per-target outcomes.
pub async fn run(code: &str, targets: &[String], config: ExecutionConfig) -> ExecutionResult {
    Executor::new(config).run_multi(code, targets).await
}

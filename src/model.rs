//! Data model shared by the validator, executor, and collaborators.
//!
//! `ValidationVerdict` and `ExecutionResult` are the serialization boundary
//! of the core: every field round-trips losslessly through serde_json.
//! Both are created once and never mutated after being handed out; retries
//! produce new objects.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Untrusted generated source text, optionally paired with the verdict it
/// already received. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedCode {
    source: String,
    verdict: Option<ValidationVerdict>,
}

impl GeneratedCode {
    /// Wrap a raw source string with no verdict attached.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            verdict: None,
        }
    }

    /// Attach a validation verdict, consuming self.
    pub fn with_verdict(self, verdict: ValidationVerdict) -> Self {
        Self {
            verdict: Some(verdict),
            ..self
        }
    }

    /// The source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The previously-computed verdict, if any.
    pub fn verdict(&self) -> Option<&ValidationVerdict> {
        self.verdict.as_ref()
    }
}

/// Structured validity verdict produced by the static validator.
///
/// `overall_valid` is true iff all four sub-checks are true; every failing
/// sub-check appends a human-readable reason to `errors`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    /// Conjunction of the four sub-checks below.
    pub overall_valid: bool,
    /// The code parsed successfully.
    pub syntax_valid: bool,
    /// Every import is on the module allow-list.
    pub imports_valid: bool,
    /// No deny-listed operation or introspection hook appears.
    pub forbidden_ops_absent: bool,
    /// A correctly-shaped entry function is defined.
    pub entry_signature_valid: bool,
    /// Reasons for each failed sub-check.
    pub errors: Vec<String>,
    /// Non-fatal observations.
    pub warnings: Vec<String>,
}

impl ValidationVerdict {
    /// A verdict with every check passing and no messages.
    pub(crate) fn passing() -> Self {
        Self {
            overall_valid: true,
            syntax_valid: true,
            imports_valid: true,
            forbidden_ops_absent: true,
            entry_signature_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Recompute `overall_valid` from the sub-checks. Called exactly once,
    /// when the validator finishes.
    pub(crate) fn finish(mut self) -> Self {
        self.overall_valid = self.syntax_valid
            && self.imports_valid
            && self.forbidden_ops_absent
            && self.entry_signature_valid;
        self
    }
}

/// Extraction confidence reported by generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// Parse a metadata confidence string; anything unrecognized defaults
    /// to [`Confidence::Medium`].
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "high" => Confidence::High,
            "low" => Confidence::Low,
            _ => Confidence::Medium,
        }
    }
}

impl Default for Confidence {
    fn default() -> Self {
        Confidence::Medium
    }
}

/// The result of running generated code against exactly one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceOutcome {
    /// The target this outcome describes.
    pub target: String,
    /// Whether extraction succeeded.
    pub succeeded: bool,
    /// Number of records this target contributed.
    pub record_count: usize,
    /// Records dropped by the generated code's own filtering.
    pub filtered_count: usize,
    /// Duplicate records the generated code reported removing.
    pub duplicate_count: usize,
    /// Failure description, when `succeeded` is false.
    pub error: Option<String>,
    /// Wall-clock time spent on this target.
    pub duration: Duration,
    /// Extraction method the generated code reported.
    pub method_used: String,
    /// Extraction confidence.
    pub confidence: Confidence,
}

impl SourceOutcome {
    /// A failed outcome carrying an error description.
    pub fn failure(target: impl Into<String>, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            target: target.into(),
            succeeded: false,
            record_count: 0,
            filtered_count: 0,
            duplicate_count: 0,
            error: Some(error.into()),
            duration,
            method_used: "unknown".to_string(),
            confidence: Confidence::Low,
        }
    }
}

/// The aggregate returned to collaborators after a run.
///
/// `succeeded` is true iff at least one per-target outcome succeeded;
/// partial success is still success at the aggregate level but remains
/// distinguishable via [`ExecutionResult::is_partial`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// At least one target succeeded.
    pub succeeded: bool,
    /// Concatenation, in target-iteration order, of every successful
    /// target's records.
    pub records: Vec<Value>,
    /// One entry per failed target, prefixed with the target identifier.
    pub errors: Vec<String>,
    /// Per-target outcomes, in input order.
    pub per_target: Vec<SourceOutcome>,
    /// Wall-clock time for the whole run.
    pub total_duration: Duration,
    /// When this result was produced.
    pub produced_at: DateTime<Utc>,
}

impl ExecutionResult {
    /// Number of targets that succeeded.
    pub fn success_count(&self) -> usize {
        self.per_target.iter().filter(|o| o.succeeded).count()
    }

    /// True when some but not all targets succeeded.
    pub fn is_partial(&self) -> bool {
        let successes = self.success_count();
        successes > 0 && successes < self.per_target.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(target: &str, succeeded: bool, record_count: usize) -> SourceOutcome {
        SourceOutcome {
            target: target.to_string(),
            succeeded,
            record_count,
            filtered_count: 0,
            duplicate_count: 0,
            error: if succeeded { None } else { Some("boom".into()) },
            duration: Duration::from_millis(10),
            method_used: "unknown".to_string(),
            confidence: Confidence::Medium,
        }
    }

    fn result_with(per_target: Vec<SourceOutcome>, records: Vec<Value>) -> ExecutionResult {
        let succeeded = per_target.iter().any(|o| o.succeeded);
        ExecutionResult {
            succeeded,
            records,
            errors: Vec::new(),
            per_target,
            total_duration: Duration::from_millis(20),
            produced_at: Utc::now(),
        }
    }

    #[test]
    fn test_verdict_overall_follows_subchecks() {
        let verdict = ValidationVerdict::passing().finish();
        assert!(verdict.overall_valid);

        let mut verdict = ValidationVerdict::passing();
        verdict.imports_valid = false;
        verdict.errors.push("import of 'os' is not allowed".into());
        let verdict = verdict.finish();
        assert!(!verdict.overall_valid);
        assert_eq!(verdict.errors.len(), 1);
    }

    #[test]
    fn test_is_partial() {
        let all = result_with(vec![outcome("a", true, 1), outcome("b", true, 1)], vec![]);
        assert!(!all.is_partial());
        assert!(all.succeeded);

        let some = result_with(vec![outcome("a", true, 1), outcome("b", false, 0)], vec![]);
        assert!(some.is_partial());
        assert!(some.succeeded);

        let none = result_with(vec![outcome("a", false, 0), outcome("b", false, 0)], vec![]);
        assert!(!none.is_partial());
        assert!(!none.succeeded);
    }

    #[test]
    fn test_confidence_parse() {
        assert_eq!(Confidence::parse("HIGH"), Confidence::High);
        assert_eq!(Confidence::parse("low"), Confidence::Low);
        assert_eq!(Confidence::parse("whatever"), Confidence::Medium);
    }

    #[test]
    fn test_verdict_serde_round_trip() {
        let mut verdict = ValidationVerdict::passing();
        verdict.forbidden_ops_absent = false;
        verdict.errors.push("use of forbidden name 'eval'".into());
        verdict.warnings.push("wildcard import".into());
        let verdict = verdict.finish();

        let encoded = serde_json::to_string(&verdict).unwrap();
        let decoded: ValidationVerdict = serde_json::from_str(&encoded).unwrap();
        assert_eq!(verdict, decoded);
    }

    #[test]
    fn test_result_serde_round_trip() {
        let result = result_with(
            vec![outcome("https://example.com", true, 1)],
            vec![serde_json::json!({"a": 1})],
        );
        let encoded = serde_json::to_string(&result).unwrap();
        let decoded: ExecutionResult = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.records, result.records);
        assert_eq!(decoded.per_target.len(), 1);
        assert_eq!(decoded.per_target[0].target, "https://example.com");
        assert_eq!(decoded.produced_at, result.produced_at);
    }

    #[test]
    fn test_generated_code_is_read_only() {
        let code = GeneratedCode::new("def scrape_data(url):\n    return []\n");
        assert!(code.verdict().is_none());
        let code = code.with_verdict(ValidationVerdict::passing().finish());
        assert!(code.verdict().unwrap().overall_valid);
        assert!(code.source().starts_with("def scrape_data"));
    }
}

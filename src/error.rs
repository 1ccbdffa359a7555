//! Error types for the scraper sandbox.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while validating or executing generated code.
///
/// Every variant is a distinct, inspectable kind. The executor converts all
/// of them into per-target `SourceOutcome`s at its boundary, so callers of
/// the public `run` entry point never see these directly.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// The generated code could not be parsed.
    #[error("syntax error at line {line}, column {column}: {message}")]
    Syntax {
        /// Parser message.
        message: String,
        /// 1-based line of the failure.
        line: usize,
        /// 1-based column of the failure.
        column: usize,
    },

    /// A forbidden import, operation, or entry point. Never retried: the
    /// same code would fail identically.
    #[error("security violation: {0}")]
    Security(String),

    /// The execution exceeded the configured timeout.
    #[error("execution timed out after {0:?}")]
    Timeout(Duration),

    /// The generated code raised during execution.
    #[error("Python {exception_type}: {message}")]
    Runtime {
        /// The exception type name (e.g. "ValueError", "TypeError").
        exception_type: String,
        /// The exception message.
        message: String,
        /// A trimmed traceback, if available.
        traceback: Option<String>,
    },

    /// A fetch performed by the injected network capability failed.
    #[error("network error fetching {url}: {message}")]
    Network {
        /// The address that failed.
        url: String,
        /// Transport or status detail.
        message: String,
    },

    /// The injected parsing capability rejected its input.
    #[error("parse error ({context}): {message}")]
    Parse {
        /// The selector or tag that was being applied.
        context: String,
        /// Failure detail.
        message: String,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Failed to initialize the embedded interpreter.
    #[error("failed to initialize interpreter: {0}")]
    RuntimeInit(#[source] anyhow::Error),

    /// The execution machinery itself failed (e.g. a panicked worker).
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The code-generation collaborator failed.
    #[error("code generation failed: {0}")]
    Generation(#[source] anyhow::Error),

    /// Generated code kept failing validation across the retry budget.
    #[error("generated code failed validation after {attempts} attempt(s): {reason}")]
    Rejected {
        /// How many generation attempts were made.
        attempts: usize,
        /// The last verdict's first error.
        reason: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    /// Check if this error represents a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SandboxError::Timeout(_))
    }

    /// Check if this error represents a security violation.
    pub fn is_security(&self) -> bool {
        matches!(self, SandboxError::Security(_))
    }

    /// Check if this error represents an exception raised by generated code.
    pub fn is_runtime(&self) -> bool {
        matches!(self, SandboxError::Runtime { .. })
    }

    /// Stable label for this error kind, used as a prefix in per-target
    /// outcome error strings.
    pub fn kind(&self) -> &'static str {
        match self {
            SandboxError::Syntax { .. } => "syntax",
            SandboxError::Security(_) => "security",
            SandboxError::Timeout(_) => "timeout",
            SandboxError::Runtime { .. } => "runtime",
            SandboxError::Network { .. } => "network",
            SandboxError::Parse { .. } => "parse",
            SandboxError::Config(_) => "config",
            SandboxError::RuntimeInit(_) => "init",
            SandboxError::ExecutionFailed(_) => "execution",
            SandboxError::Generation(_) => "generation",
            SandboxError::Rejected { .. } => "rejected",
            SandboxError::Io(_) => "io",
        }
    }
}

/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Maximum number of traceback lines kept on a `Runtime` error.
const MAX_TRACEBACK_LINES: usize = 20;

/// Parse a rendered Python exception into a [`SandboxError::Runtime`].
///
/// `rendered` is the text produced by formatting the exception with its
/// traceback ("Traceback (most recent call last): ... TypeError: msg").
/// Extracts the exception type, message, and a trimmed traceback.
pub fn parse_rendered_exception(rendered: &str) -> Option<SandboxError> {
    if rendered.trim().is_empty() {
        return None;
    }

    let lines: Vec<&str> = rendered.lines().collect();

    // The exception line is the last unindented line that looks like
    // "SomethingError: message" or a bare exception name.
    let mut exception_line = None;
    let mut traceback_start = None;

    for (i, line) in lines.iter().enumerate() {
        if line.starts_with("Traceback (most recent call last):") {
            traceback_start = Some(i);
        }
        if !line.starts_with(' ')
            && !line.is_empty()
            && !line.starts_with("Traceback")
            && looks_like_exception(line)
        {
            exception_line = Some((i, *line));
        }
    }

    let (line_idx, exception_str) = exception_line?;
    let (exception_type, message) = match exception_str.find(':') {
        Some(colon_pos) => (
            exception_str[..colon_pos].trim().to_string(),
            exception_str[colon_pos + 1..].trim().to_string(),
        ),
        None => (exception_str.trim().to_string(), String::new()),
    };

    let traceback = traceback_start.map(|start| {
        let tb: Vec<&str> = lines[start..=line_idx].to_vec();
        if tb.len() > MAX_TRACEBACK_LINES {
            // Keep the header plus the innermost frames.
            let mut trimmed = vec![tb[0], "  ..."];
            trimmed.extend_from_slice(&tb[tb.len() - (MAX_TRACEBACK_LINES - 2)..]);
            trimmed.join("\n")
        } else {
            tb.join("\n")
        }
    });

    Some(SandboxError::Runtime {
        exception_type,
        message,
        traceback,
    })
}

/// Check if a line looks like a Python exception header.
fn looks_like_exception(line: &str) -> bool {
    let exception_suffixes = ["Error", "Exception", "Warning"];
    let standalone_exceptions = [
        "KeyboardInterrupt",
        "SystemExit",
        "StopIteration",
        "GeneratorExit",
    ];

    let first_char = line.chars().next();
    if !first_char.map(|c| c.is_ascii_uppercase()).unwrap_or(false) {
        return false;
    }

    let boundary_ok = |after_idx: usize| {
        after_idx >= line.len()
            || line.as_bytes()[after_idx] == b':'
            || line.as_bytes()[after_idx] == b' '
            || line.as_bytes()[after_idx] == b'\n'
    };

    for suffix in exception_suffixes.iter() {
        if let Some(idx) = line.find(suffix) {
            if boundary_ok(idx + suffix.len()) {
                return true;
            }
        }
    }

    for exc in standalone_exceptions.iter() {
        if line.starts_with(exc) && boundary_ok(exc.len()) {
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_exception() {
        let rendered = "ValueError: invalid literal for int() with base 10: 'abc'";
        let result = parse_rendered_exception(rendered);

        assert!(result.is_some());
        if let Some(SandboxError::Runtime {
            exception_type,
            message,
            traceback,
        }) = result
        {
            assert_eq!(exception_type, "ValueError");
            assert_eq!(message, "invalid literal for int() with base 10: 'abc'");
            assert!(traceback.is_none());
        } else {
            panic!("Expected Runtime error");
        }
    }

    #[test]
    fn test_parse_exception_with_traceback() {
        let rendered = r#"Traceback (most recent call last):
  File "<scraper>", line 3, in scrape_data
ZeroDivisionError: division by zero"#;

        let result = parse_rendered_exception(rendered);

        assert!(result.is_some());
        if let Some(SandboxError::Runtime {
            exception_type,
            message,
            traceback,
        }) = result
        {
            assert_eq!(exception_type, "ZeroDivisionError");
            assert_eq!(message, "division by zero");
            assert!(traceback.unwrap().contains("Traceback"));
        } else {
            panic!("Expected Runtime error");
        }
    }

    #[test]
    fn test_parse_exception_no_message() {
        let result = parse_rendered_exception("StopIteration");

        assert!(result.is_some());
        if let Some(SandboxError::Runtime {
            exception_type,
            message,
            ..
        }) = result
        {
            assert_eq!(exception_type, "StopIteration");
            assert!(message.is_empty());
        } else {
            panic!("Expected Runtime error");
        }
    }

    #[test]
    fn test_parse_empty_rendered() {
        assert!(parse_rendered_exception("").is_none());
        assert!(parse_rendered_exception("   ").is_none());
    }

    #[test]
    fn test_long_traceback_is_trimmed() {
        let mut rendered = String::from("Traceback (most recent call last):\n");
        for i in 0..50 {
            rendered.push_str(&format!("  File \"<scraper>\", line {}, in helper\n", i));
        }
        rendered.push_str("RuntimeError: deep");

        if let Some(SandboxError::Runtime { traceback, .. }) = parse_rendered_exception(&rendered)
        {
            let tb = traceback.unwrap();
            assert!(tb.lines().count() <= MAX_TRACEBACK_LINES);
            assert!(tb.contains("..."));
            assert!(tb.ends_with("RuntimeError: deep"));
        } else {
            panic!("Expected Runtime error");
        }
    }

    #[test]
    fn test_error_helpers() {
        let timeout = SandboxError::Timeout(Duration::from_secs(5));
        assert!(timeout.is_timeout());
        assert!(!timeout.is_security());
        assert_eq!(timeout.kind(), "timeout");

        let security = SandboxError::Security("import of 'os' is not allowed".to_string());
        assert!(security.is_security());
        assert!(!security.is_timeout());
        assert_eq!(security.kind(), "security");

        let runtime = SandboxError::Runtime {
            exception_type: "ValueError".to_string(),
            message: "test".to_string(),
            traceback: None,
        };
        assert!(runtime.is_runtime());
        assert_eq!(runtime.kind(), "runtime");
    }
}

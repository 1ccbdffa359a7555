//! Source-level normalization applied once per execution batch.
//!
//! Generated code tends to carry two script-isms that break under the
//! sandbox contract: a `if __name__ == "__main__":` block that calls the
//! entry function with a hardcoded target, and the
//! `from datetime import datetime` / `datetime.datetime.now()` mismatch.
//! Both are rewritten textually before compilation.

use std::sync::LazyLock;

use regex::Regex;

static MAIN_GUARD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^if\s+__name__\s*==\s*["']__main__["']\s*:(.*)$"#).unwrap());

static FROM_DATETIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^from\s+datetime\s+import\s+.*\bdatetime\b").unwrap());

static QUALIFIED_DATETIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bdatetime\.datetime\.").unwrap());

/// Normalize generated source before handing it to the sandbox.
pub fn preprocess(code: &str) -> String {
    let without_guard = strip_main_guard(code);
    normalize_datetime_usage(&without_guard)
}

/// Drop any `if __name__ == "__main__":` block, body included. The sandbox
/// sets `__name__` to `"__main__"`, so a surviving guard would fire and
/// call the entry function with whatever hardcoded target it carries.
fn strip_main_guard(code: &str) -> String {
    let mut out = Vec::new();
    let mut skipping = false;

    for line in code.lines() {
        if skipping {
            let blank = line.trim().is_empty();
            let indented = line.starts_with(' ') || line.starts_with('\t');
            if blank || indented {
                continue;
            }
            skipping = false;
        }
        if let Some(caps) = MAIN_GUARD_RE.captures(line) {
            // An inline body (`if ...: call()`) ends on the same line, so
            // there is no indented block to skip afterwards.
            skipping = caps[1].trim().is_empty();
            continue;
        }
        out.push(line);
    }

    let mut result = out.join("\n");
    if code.ends_with('\n') && !result.ends_with('\n') {
        result.push('\n');
    }
    result
}

/// When the class itself was imported (`from datetime import datetime`),
/// rewrite `datetime.datetime.` references to match the imported binding.
fn normalize_datetime_usage(code: &str) -> String {
    if FROM_DATETIME_RE.is_match(code) {
        QUALIFIED_DATETIME_RE.replace_all(code, "datetime.").to_string()
    } else {
        code.to_string()
    }
}

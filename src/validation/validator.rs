//! Static pre-execution validation of generated code.
//!
//! `validate` never returns an error: every problem it finds is reported as
//! a field of the returned [`ValidationVerdict`]. The verdict is advisory
//! for callers that regenerate code on failure; the sandbox independently
//! re-runs the import and forbidden-operation scans at execution time.

use std::collections::HashSet;

use rustpython_parser::{ast, lexer::lex, Mode, Parse, Tok};

use crate::error::SandboxError;
use crate::model::ValidationVerdict;
use crate::validation::rules::{
    is_module_allowed, ENTRY_FUNCTION, ENTRY_TARGET_PARAM, FORBIDDEN_ATTRIBUTES, FORBIDDEN_NAMES,
    STATIC_IMPORT_ALLOWLIST,
};

/// Validate a code string without executing anything.
///
/// Checks run in order: syntax, imports, forbidden operations, entry
/// signature. A syntax failure short-circuits the rest (they cannot be
/// evaluated against unparsable input and are reported as not passing).
pub fn validate(code: &str) -> ValidationVerdict {
    let mut verdict = ValidationVerdict::passing();

    let suite = match parse_suite(code) {
        Ok(suite) => suite,
        Err(SandboxError::Syntax {
            message,
            line,
            column,
        }) => {
            verdict.syntax_valid = false;
            verdict.imports_valid = false;
            verdict.forbidden_ops_absent = false;
            verdict.entry_signature_valid = false;
            verdict
                .errors
                .push(format!("syntax error at line {line}, column {column}: {message}"));
            return verdict.finish();
        }
        Err(other) => {
            verdict.syntax_valid = false;
            verdict.imports_valid = false;
            verdict.forbidden_ops_absent = false;
            verdict.entry_signature_valid = false;
            verdict.errors.push(other.to_string());
            return verdict.finish();
        }
    };

    let import_violations = collect_import_violations(&suite, &STATIC_IMPORT_ALLOWLIST);
    if !import_violations.is_empty() {
        verdict.imports_valid = false;
        verdict.errors.extend(import_violations);
    }

    let forbidden = collect_forbidden_uses(code);
    if !forbidden.is_empty() {
        verdict.forbidden_ops_absent = false;
        verdict.errors.extend(forbidden);
    }

    if let Err(reason) = check_entry_signature(&suite) {
        verdict.entry_signature_valid = false;
        verdict.errors.push(reason);
    }

    verdict.warnings.extend(collect_warnings(&suite));

    verdict.finish()
}

/// Parse a code string into a statement list, mapping parser failures to
/// [`SandboxError::Syntax`] with a 1-based line/column.
pub(crate) fn parse_suite(code: &str) -> Result<Vec<ast::Stmt>, SandboxError> {
    ast::Suite::parse(code, "<scraper>").map_err(|err| {
        let (line, column) = line_col(code, err.offset.to_usize());
        SandboxError::Syntax {
            message: err.error.to_string(),
            line,
            column,
        }
    })
}

/// Collect one message per import (top-level or nested) whose module root is
/// not on `allowed`. Relative imports are always violations: generated code
/// has no package to be relative to.
pub(crate) fn collect_import_violations(
    suite: &[ast::Stmt],
    allowed: &HashSet<&str>,
) -> Vec<String> {
    let mut violations = Vec::new();

    for_each_stmt(suite, &mut |stmt| match stmt {
        ast::Stmt::Import(import) => {
            for alias in &import.names {
                let name = alias.name.as_str();
                if !is_module_allowed(name, allowed) {
                    violations.push(format!("import of '{name}' is not allowed"));
                }
            }
        }
        ast::Stmt::ImportFrom(import) => {
            let level = import.level.map(|l| l.to_u32()).unwrap_or(0);
            if level > 0 {
                violations.push("relative imports are not allowed".to_string());
                return;
            }
            match &import.module {
                Some(module) => {
                    let name = module.as_str();
                    if !is_module_allowed(name, allowed) {
                        violations.push(format!("import from '{name}' is not allowed"));
                    }
                }
                None => violations.push("relative imports are not allowed".to_string()),
            }
        }
        _ => {}
    });

    violations
}

/// Scan the token stream for deny-listed names and introspection-hook
/// attributes. Token-level scanning catches uses in any expression position,
/// including ones an AST call-walk would need to chase through aliases.
pub(crate) fn collect_forbidden_uses(code: &str) -> Vec<String> {
    let mut uses = Vec::new();

    for token in lex(code, Mode::Module).flatten() {
        let (tok, range) = token;
        if let Tok::Name { name } = &tok {
            let (line, _) = line_col(code, range.start().to_usize());
            if FORBIDDEN_NAMES.contains(&name.as_str()) {
                uses.push(format!("use of forbidden name '{name}' at line {line}"));
            } else if FORBIDDEN_ATTRIBUTES.contains(&name.as_str()) {
                uses.push(format!(
                    "access to introspection attribute '{name}' at line {line}"
                ));
            }
        }
    }

    uses
}

/// Verify the entry-function contract: a top-level `def scrape_data(url, …)`.
fn check_entry_signature(suite: &[ast::Stmt]) -> Result<(), String> {
    for stmt in suite {
        match stmt {
            ast::Stmt::FunctionDef(def) if def.name.as_str() == ENTRY_FUNCTION => {
                let first = def
                    .args
                    .posonlyargs
                    .first()
                    .or_else(|| def.args.args.first());
                return match first {
                    None => Err(format!(
                        "entry function '{ENTRY_FUNCTION}' must accept at least one parameter"
                    )),
                    Some(arg) if arg.def.arg.as_str() != ENTRY_TARGET_PARAM => Err(format!(
                        "entry function '{ENTRY_FUNCTION}' must take '{ENTRY_TARGET_PARAM}' as its first parameter, found '{}'",
                        arg.def.arg.as_str()
                    )),
                    Some(_) => Ok(()),
                };
            }
            ast::Stmt::AsyncFunctionDef(def) if def.name.as_str() == ENTRY_FUNCTION => {
                return Err(format!(
                    "entry function '{ENTRY_FUNCTION}' must not be async"
                ));
            }
            _ => {}
        }
    }
    Err(format!(
        "missing required entry function '{ENTRY_FUNCTION}'"
    ))
}

/// Non-fatal observations about the code's shape.
fn collect_warnings(suite: &[ast::Stmt]) -> Vec<String> {
    let mut warnings = Vec::new();

    for_each_stmt(suite, &mut |stmt| {
        if let ast::Stmt::ImportFrom(import) = stmt {
            if import.names.iter().any(|alias| alias.name.as_str() == "*") {
                let module = import
                    .module
                    .as_ref()
                    .map(|m| m.as_str())
                    .unwrap_or("<unknown>");
                warnings.push(format!("wildcard import from '{module}'"));
            }
        }
    });

    // Module-level statements beyond defs/imports/assignments run at load
    // time; the executor only strips the __main__ guard.
    let has_loose_top_level = suite.iter().any(|stmt| {
        !matches!(
            stmt,
            ast::Stmt::Import(_)
                | ast::Stmt::ImportFrom(_)
                | ast::Stmt::FunctionDef(_)
                | ast::Stmt::AsyncFunctionDef(_)
                | ast::Stmt::ClassDef(_)
                | ast::Stmt::Assign(_)
                | ast::Stmt::AnnAssign(_)
                | ast::Stmt::If(_)
                | ast::Stmt::Expr(_)
        )
    });
    if has_loose_top_level {
        warnings.push("module-level statements will run when the code is loaded".to_string());
    }

    warnings
}

/// Apply `f` to every statement, recursing into all nested bodies.
fn for_each_stmt<'a>(stmts: &'a [ast::Stmt], f: &mut impl FnMut(&'a ast::Stmt)) {
    for stmt in stmts {
        f(stmt);
        match stmt {
            ast::Stmt::FunctionDef(s) => for_each_stmt(&s.body, f),
            ast::Stmt::AsyncFunctionDef(s) => for_each_stmt(&s.body, f),
            ast::Stmt::ClassDef(s) => for_each_stmt(&s.body, f),
            ast::Stmt::For(s) => {
                for_each_stmt(&s.body, f);
                for_each_stmt(&s.orelse, f);
            }
            ast::Stmt::AsyncFor(s) => {
                for_each_stmt(&s.body, f);
                for_each_stmt(&s.orelse, f);
            }
            ast::Stmt::While(s) => {
                for_each_stmt(&s.body, f);
                for_each_stmt(&s.orelse, f);
            }
            ast::Stmt::If(s) => {
                for_each_stmt(&s.body, f);
                for_each_stmt(&s.orelse, f);
            }
            ast::Stmt::With(s) => for_each_stmt(&s.body, f),
            ast::Stmt::AsyncWith(s) => for_each_stmt(&s.body, f),
            ast::Stmt::Try(s) => {
                for_each_stmt(&s.body, f);
                for handler in &s.handlers {
                    let ast::ExceptHandler::ExceptHandler(h) = handler;
                    for_each_stmt(&h.body, f);
                }
                for_each_stmt(&s.orelse, f);
                for_each_stmt(&s.finalbody, f);
            }
            ast::Stmt::TryStar(s) => {
                for_each_stmt(&s.body, f);
                for handler in &s.handlers {
                    let ast::ExceptHandler::ExceptHandler(h) = handler;
                    for_each_stmt(&h.body, f);
                }
                for_each_stmt(&s.orelse, f);
                for_each_stmt(&s.finalbody, f);
            }
            ast::Stmt::Match(s) => {
                for case in &s.cases {
                    for_each_stmt(&case.body, f);
                }
            }
            _ => {}
        }
    }
}

/// Convert a byte offset into a 1-based (line, column) pair.
fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let bytes = source.as_bytes();
    let clamped = offset.min(bytes.len());
    let line = bytes[..clamped].iter().filter(|&&b| b == b'\n').count() + 1;
    let line_start = bytes[..clamped]
        .iter()
        .rposition(|&b| b == b'\n')
        .map(|i| i + 1)
        .unwrap_or(0);
    (line, clamped - line_start + 1)
}

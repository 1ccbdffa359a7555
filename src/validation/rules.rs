//! Fixed allow/deny tables for validation and sandbox enforcement.
//!
//! These are process-wide constants, read-only after initialization. The
//! validator checks against the full static allow-list (every module any
//! capability could unlock); the sandbox derives a narrower list from the
//! capabilities actually granted by its `ExecutionConfig`.

use std::collections::HashSet;
use std::sync::LazyLock;

/// The single entry function every piece of generated code must define.
pub const ENTRY_FUNCTION: &str = "scrape_data";

/// Required name of the entry function's first parameter.
pub const ENTRY_TARGET_PARAM: &str = "url";

/// Capabilities granted when a config does not override the allow-list.
pub const DEFAULT_CAPABILITIES: &[&str] =
    &["http", "html", "regex", "json", "datetime", "collections"];

/// Module roots a capability permits the generated code to import.
pub fn modules_for_capability(capability: &str) -> &'static [&'static str] {
    match capability {
        "http" => &["requests", "urllib"],
        "html" => &["html_utils", "html"],
        "regex" => &["re"],
        "json" => &["json"],
        "datetime" => &["datetime", "time"],
        // The builtin type constructors are always present; this capability
        // additionally unlocks the typed-collection helper modules.
        "collections" => &[
            "collections",
            "typing",
            "itertools",
            "functools",
            "math",
            "string",
        ],
        _ => &[],
    }
}

/// Allowed module roots for a given capability set.
pub fn allowed_modules(capabilities: &HashSet<String>) -> HashSet<&'static str> {
    capabilities
        .iter()
        .flat_map(|cap| modules_for_capability(cap).iter().copied())
        .collect()
}

/// The full static allow-list: every module any known capability unlocks.
/// Used by the validator, which has no config in scope.
pub static STATIC_IMPORT_ALLOWLIST: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    DEFAULT_CAPABILITIES
        .iter()
        .flat_map(|cap| modules_for_capability(cap).iter().copied())
        .collect()
});

/// Reflective / escape-prone names generated code may never use.
/// Matched at the token level, so they are caught in any expression
/// position, not only as literal calls.
pub const FORBIDDEN_NAMES: &[&str] = &[
    "eval",
    "exec",
    "compile",
    "__import__",
    "open",
    "input",
    "globals",
    "locals",
    "vars",
    "breakpoint",
];

/// Introspection hooks that can reach the forbidden operations indirectly
/// (e.g. walking the class hierarchy back to a file constructor).
pub const FORBIDDEN_ATTRIBUTES: &[&str] = &[
    "__subclasses__",
    "__globals__",
    "__builtins__",
    "__bases__",
    "__mro__",
    "__code__",
    "__closure__",
    "__getattribute__",
];

/// Builtins the sandbox replaces with raising stubs before running anything.
pub const DISABLED_BUILTINS: &[&str] = &[
    "eval",
    "exec",
    "compile",
    "open",
    "input",
    "globals",
    "locals",
    "vars",
    "breakpoint",
    "exit",
    "quit",
];

/// Check whether an imported module name is permitted.
///
/// A name passes if its root is allowed, or if it is an underscore-prefixed
/// internal companion of an allowed module (`_json` for `json`): allowed
/// modules must be able to pull in their own native halves.
pub fn is_module_allowed(name: &str, allowed: &HashSet<&str>) -> bool {
    let root = name.split('.').next().unwrap_or(name);
    if allowed.contains(root) {
        return true;
    }
    root.strip_prefix('_')
        .map(|bare| allowed.contains(bare))
        .unwrap_or(false)
}

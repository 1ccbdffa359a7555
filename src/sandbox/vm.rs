//! Embedded RustPython driver for a single sandboxed execution.
//!
//! Each call builds a fresh interpreter, hardens its builtins, installs the
//! capability objects, runs the generated script in one namespace, then
//! invokes the entry function and serializes its return value. Nothing is
//! shared between executions.
//!
//! Runtime enforcement that cannot be expressed as an allow-list uses
//! tagged exception messages: the import hook and the disabled-builtin
//! stubs raise with `ImportBlocked:` / `SecurityViolation:` prefixes, and
//! [`map_exception`] recognizes those when an exception escapes the script.

use std::collections::HashSet;

use rustpython_vm::builtins::PyBaseExceptionRef;
use rustpython_vm::compiler::Mode;
use rustpython_vm::function::FuncArgs;
use rustpython_vm::{py_serde, Interpreter, PyObjectRef, PyResult, Settings, VirtualMachine};
use serde_json::Value;

use crate::error::{parse_rendered_exception, SandboxError};
use crate::sandbox::capabilities::install_capabilities;
use crate::sandbox::config::ExecutionConfig;
use crate::sandbox::output::{CapturedStream, SandboxOutput};
use crate::validation::rules::{allowed_modules, is_module_allowed, DISABLED_BUILTINS};

/// Filename attached to compiled generated code; shows up in tracebacks.
const SCRIPT_NAME: &str = "<scraper>";

/// Byte budget used when the config removes the memory limit.
const UNBOUNDED_BODY_LIMIT: usize = 64 * 1024 * 1024;

/// Compile and run `code` in a fresh interpreter, then call `entry(target)`
/// and return its value serialized to JSON. Blocking; intended for a worker
/// thread.
pub(crate) fn run_entry(
    code: &str,
    entry: &str,
    target: &str,
    config: &ExecutionConfig,
) -> Result<Value, SandboxError> {
    let body_limit = config
        .memory_limit
        .map(|bytes| bytes as usize)
        .unwrap_or(UNBOUNDED_BODY_LIMIT);
    let allowed = allowed_modules(&config.allowed_capabilities);
    let output = SandboxOutput::new(body_limit);

    let interpreter = build_interpreter();
    let result = interpreter.enter(|vm| {
        run_in_vm(
            vm,
            code,
            entry,
            target,
            &allowed,
            &config.allowed_capabilities,
            body_limit,
            &output,
        )
    });
    output.log_captured(target);
    result
}

/// A fresh interpreter with the stdlib's native modules, a host standard
/// library on the module search path, and a frozen pure `json` facade over
/// the native `_json` scanner.
///
/// The embedded VM freezes only its bootstrap modules; pure-Python stdlib
/// modules (`re`, `collections`, `typing`, ...) load from a host CPython
/// installation via `path_list`. Frozen modules win over the path finder,
/// so the `json` facade stays in effect either way.
fn build_interpreter() -> Interpreter {
    let mut settings = Settings::default();
    settings.allow_external_library = true;
    settings.path_list.extend(python_stdlib_paths());
    Interpreter::with_init(settings, |vm| {
        vm.add_native_modules(rustpython_stdlib::get_module_inits());
        vm.add_frozen(rustpython_vm::py_freeze!(
            source = r#"
import _json

class JSONDecodeError(ValueError):
    def __init__(self, msg, doc, pos):
        ValueError.__init__(self, "%s: char %d" % (msg, pos))
        self.msg = msg
        self.doc = doc
        self.pos = pos

class JSONDecoder:
    def __init__(self, object_hook=None, parse_float=None, parse_int=None,
                 strict=True, object_pairs_hook=None):
        self.object_hook = object_hook
        self.object_pairs_hook = object_pairs_hook
        self.parse_float = parse_float or float
        self.parse_int = parse_int or int
        self.parse_constant = float
        self.strict = strict
        self.scan_once = _json.make_scanner(self)

    def decode(self, s):
        try:
            obj, end = self.scan_once(s, 0)
        except StopIteration as err:
            raise JSONDecodeError("Expecting value", s, err.value)
        if s[end:].strip():
            raise JSONDecodeError("Extra data", s, end)
        return obj

def loads(s, **kwargs):
    if isinstance(s, (bytes, bytearray)):
        s = s.decode("utf-8")
    return JSONDecoder(**kwargs).decode(s)

def _escape(s):
    out = s.replace("\\", "\\\\").replace('"', '\\"')
    out = out.replace("\n", "\\n").replace("\r", "\\r").replace("\t", "\\t")
    return '"' + out + '"'

def dumps(value, sort_keys=False, **kwargs):
    if value is None:
        return "null"
    if value is True:
        return "true"
    if value is False:
        return "false"
    if isinstance(value, (int, float)):
        return repr(value)
    if isinstance(value, str):
        return _escape(value)
    if isinstance(value, (list, tuple)):
        return "[" + ", ".join(dumps(v, sort_keys) for v in value) + "]"
    if isinstance(value, dict):
        keys = sorted(value) if sort_keys else value
        return "{" + ", ".join(
            _escape(str(k)) + ": " + dumps(value[k], sort_keys) for k in keys
        ) + "}"
    raise TypeError("not JSON serializable: %r" % (value,))
"#,
            module_name = "json"
        ));
    })
}

/// Candidate locations for a host CPython standard library, newest first.
/// Only directories that exist make it onto the search path.
fn python_stdlib_paths() -> Vec<String> {
    const CANDIDATES: &[&str] = &[
        "/usr/local/lib/python3.13",
        "/usr/local/lib/python3.12",
        "/usr/local/lib/python3.11",
        "/usr/lib/python3.13",
        "/usr/lib/python3.12",
        "/usr/lib/python3.11",
        "/usr/lib/python3.10",
    ];
    CANDIDATES
        .iter()
        .filter(|path| std::path::Path::new(path).is_dir())
        .map(|path| (*path).to_string())
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn run_in_vm(
    vm: &VirtualMachine,
    code: &str,
    entry: &str,
    target: &str,
    allowed: &HashSet<&'static str>,
    capabilities: &HashSet<String>,
    body_limit: usize,
    output: &SandboxOutput,
) -> Result<Value, SandboxError> {
    install_output_capture(vm, output).map_err(|e| init_error(vm, e))?;
    disable_builtins(vm).map_err(|e| init_error(vm, e))?;
    install_import_hook(vm, allowed.clone()).map_err(|e| init_error(vm, e))?;

    let scope = vm.new_scope_with_builtins();
    scope
        .globals
        .set_item("__name__", vm.ctx.new_str("__main__").into(), vm)
        .map_err(|e| init_error(vm, e))?;
    install_capabilities(vm, &scope.globals, capabilities, body_limit)
        .map_err(|e| init_error(vm, e))?;

    let code_obj = vm
        .compile(code, Mode::Exec, SCRIPT_NAME.to_owned())
        .map_err(|err| {
            let (line, column) = err.python_location();
            SandboxError::Syntax {
                message: err.to_string(),
                line: line as usize,
                column: column as usize,
            }
        })?;

    // Module body and entry call share one namespace, so helpers defined at
    // top level stay visible to the entry function.
    vm.run_code_obj(code_obj, scope.clone())
        .map_err(|exc| map_exception(vm, exc))?;

    let globals_obj: PyObjectRef = scope.globals.clone().into();
    let entry_obj = vm
        .call_method(&globals_obj, "get", (vm.ctx.new_str(entry),))
        .map_err(|exc| map_exception(vm, exc))?;
    if vm.is_none(&entry_obj) {
        return Err(SandboxError::Security(format!(
            "entry function '{entry}' is not defined"
        )));
    }
    if !entry_obj.is_callable() {
        return Err(SandboxError::Security(format!(
            "'{entry}' is defined but is not callable"
        )));
    }

    let returned = entry_obj
        .call((vm.ctx.new_str(target.to_owned()),), vm)
        .map_err(|exc| map_exception(vm, exc))?;

    if vm.is_none(&returned) {
        return Ok(Value::Null);
    }
    py_serde::serialize(vm, &returned, serde_json::value::Serializer).map_err(|e| {
        SandboxError::ExecutionFailed(format!(
            "entry function returned a value that is not JSON-serializable: {e}"
        ))
    })
}

/// Redirect `sys.stdout` / `sys.stderr` into bounded capture buffers.
fn install_output_capture(vm: &VirtualMachine, output: &SandboxOutput) -> PyResult<()> {
    for (name, stream) in [
        ("stdout", output.stdout.clone()),
        ("stderr", output.stderr.clone()),
    ] {
        let writer = build_writer(vm, stream);
        vm.sys_module.set_attr(name, writer, vm)?;
    }
    Ok(())
}

fn build_writer(vm: &VirtualMachine, stream: CapturedStream) -> PyObjectRef {
    let write_fn = vm.new_function(
        "write",
        move |args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            let text = args
                .args
                .first()
                .and_then(|o| o.str(vm).ok())
                .map(|s| s.as_str().to_owned())
                .unwrap_or_default();
            let kept = stream.write(text.as_bytes());
            Ok(vm.ctx.new_int(kept).into())
        },
    );
    let flush_fn = vm.new_function(
        "flush",
        |_args: FuncArgs, _vm: &VirtualMachine| -> PyResult<()> { Ok(()) },
    );
    let ns = vm.new_module("<writer>", vm.ctx.new_dict(), None);
    let _ = ns.set_attr("write", write_fn, vm);
    let _ = ns.set_attr("flush", flush_fn, vm);
    ns.into()
}

/// Replace escape-prone builtins with stubs that raise a tagged error when
/// called from the generated script.
///
/// Calls from other module frames fall through to the real builtin: the
/// path importer compiles `.py` sources with the `compile` builtin, so a
/// blanket stub would make every stdlib import fail mid-load.
fn disable_builtins(vm: &VirtualMachine) -> PyResult<()> {
    for name in DISABLED_BUILTINS {
        let name = *name;
        let original = vm.builtins.get_attr(name, vm).ok();
        let stub = vm.new_function(
            name,
            move |args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
                if let (Some(original), false) = (&original, called_from_script(vm)) {
                    return original.call(args, vm);
                }
                Err(vm.new_exception_msg(
                    vm.ctx.exceptions.runtime_error.to_owned(),
                    format!("SecurityViolation: use of builtin '{name}' is not allowed"),
                ))
            },
        );
        vm.builtins.set_attr(name, stub, vm)?;
    }
    Ok(())
}

/// Whether the innermost Python frame belongs to the generated script.
/// No frame at all means the call came straight from the host, which only
/// happens on behalf of the script.
fn called_from_script(vm: &VirtualMachine) -> bool {
    // Clone the globals out before touching the VM again; current_frame
    // holds a borrow of the frame stack.
    let globals: Option<PyObjectRef> = vm
        .current_frame()
        .map(|frame| frame.globals.clone().into());
    match globals {
        Some(globals) => globals_belong_to_script(&globals, vm),
        None => true,
    }
}

/// The script runs with `__name__` set to `"__main__"`; any other module
/// name marks stdlib code. Unreadable globals are treated as the script's.
fn globals_belong_to_script(globals: &PyObjectRef, vm: &VirtualMachine) -> bool {
    match vm.call_method(globals, "get", (vm.ctx.new_str("__name__"),)) {
        Ok(name) if !vm.is_none(&name) => match name.str(vm) {
            Ok(name) => name.as_str() == "__main__",
            Err(_) => true,
        },
        _ => true,
    }
}

/// Wrap `builtins.__import__` so every import attempted by the generated
/// script during execution is checked against the capability-derived
/// allow-list.
///
/// Only script-originated imports are checked: allowed stdlib modules pull
/// in internals of their own (`re` imports `enum`, `collections` imports
/// `_collections_abc`) and those must pass through, or every allowed module
/// would trip the hook on load.
fn install_import_hook(vm: &VirtualMachine, allowed: HashSet<&'static str>) -> PyResult<()> {
    let original = vm.builtins.get_attr("__import__", vm)?;
    let hook = vm.new_function(
        "__import__",
        move |args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            let name = args
                .args
                .first()
                .and_then(|o| o.str(vm).ok())
                .map(|s| s.as_str().to_owned())
                .unwrap_or_default();
            if is_script_import(&args, vm) && !is_module_allowed(&name, &allowed) {
                return Err(
                    vm.new_import_error(format!("ImportBlocked:{name}"), vm.ctx.new_str(name))
                );
            }
            original.call(args, vm)
        },
    );
    vm.builtins.set_attr("__import__", hook, vm)
}

/// Whether an import call originates from the generated script rather than
/// from a module it (legitimately) imported. `__import__` receives the
/// caller's globals as its second argument; missing globals are treated as
/// the script's.
fn is_script_import(args: &FuncArgs, vm: &VirtualMachine) -> bool {
    let Some(globals) = args.args.get(1) else {
        return true;
    };
    if vm.is_none(globals) {
        return true;
    }
    globals_belong_to_script(globals, vm)
}

fn render_exception(vm: &VirtualMachine, exc: &PyBaseExceptionRef) -> String {
    let mut rendered = String::new();
    let _ = vm.write_exception(&mut rendered, exc);
    rendered
}

fn init_error(vm: &VirtualMachine, exc: PyBaseExceptionRef) -> SandboxError {
    let rendered = render_exception(vm, &exc);
    SandboxError::RuntimeInit(anyhow::anyhow!("{}", rendered.trim()))
}

/// Translate an escaped Python exception into the matching error variant.
///
/// Tagged messages win over the generic traceback parse: an import denial
/// is a security violation even though it surfaces as an `ImportError`.
fn map_exception(vm: &VirtualMachine, exc: PyBaseExceptionRef) -> SandboxError {
    let rendered = render_exception(vm, &exc);

    if let Some(rest) = after_tag(&rendered, "ImportBlocked:") {
        return SandboxError::Security(format!("import of '{}' is not allowed", rest.trim()));
    }
    if let Some(rest) = after_tag(&rendered, "SecurityViolation:") {
        return SandboxError::Security(rest.trim().to_string());
    }
    if let Some(rest) = after_tag(&rendered, "NetworkError:") {
        let rest = rest.trim();
        let (url, message) = rest
            .split_once(": ")
            .map(|(u, m)| (u.to_string(), m.to_string()))
            .unwrap_or_else(|| (String::new(), rest.to_string()));
        return SandboxError::Network { url, message };
    }
    if let Some(rest) = after_tag(&rendered, "ParseError:") {
        let rest = rest.trim();
        let (context, message) = rest
            .split_once(": ")
            .map(|(c, m)| (c.to_string(), m.to_string()))
            .unwrap_or_else(|| ("input".to_string(), rest.to_string()));
        return SandboxError::Parse { context, message };
    }

    parse_rendered_exception(&rendered).unwrap_or(SandboxError::Runtime {
        exception_type: "Exception".to_string(),
        message: rendered.trim().to_string(),
        traceback: None,
    })
}

/// The remainder of the line following the first occurrence of `tag`.
fn after_tag<'a>(rendered: &'a str, tag: &str) -> Option<&'a str> {
    let start = rendered.find(tag)? + tag.len();
    let rest = &rendered[start..];
    Some(rest.lines().next().unwrap_or(rest))
}

//! Capability objects injected into the sandbox namespace.
//!
//! Deny-by-default: only the capabilities named in the execution config get
//! a bound object, installed both in `sys.modules` (so `import requests`
//! resolves) and as a global binding. Nothing ambient is exposed; each
//! object wraps a host-side implementation (reqwest for fetching, the regex
//! crate for HTML text extraction, chrono for date/time).
//!
//! Failures inside a capability surface as tagged Python exceptions
//! (`NetworkError:` / `ParseError:` prefixes) so the VM layer can map them
//! back to typed errors when generated code lets them escape.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc};
use regex::Regex;
use rustpython_vm::builtins::PyDict;
use rustpython_vm::builtins::PyDictRef;
use rustpython_vm::function::FuncArgs;
use rustpython_vm::{py_serde, PyObjectRef, PyResult, VirtualMachine};

/// Per-request timeout for the fetch capability. The executor's own budget
/// is the real bound; this just keeps a single hung request from eating all
/// of it silently.
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

const USER_AGENT: &str = concat!("scraper-sandbox-rs/", env!("CARGO_PKG_VERSION"));

/// Install one bound object per allowed capability.
pub(crate) fn install_capabilities(
    vm: &VirtualMachine,
    globals: &PyDictRef,
    capabilities: &HashSet<String>,
    body_limit: usize,
) -> PyResult<()> {
    let modules = sys_modules(vm)?;

    if capabilities.contains("http") {
        let module = build_requests_module(vm, body_limit);
        modules.set_item("requests", module.clone(), vm)?;
        globals.set_item("requests", module, vm)?;
    }
    if capabilities.contains("html") {
        let module = build_html_module(vm);
        modules.set_item("html_utils", module.clone(), vm)?;
        globals.set_item("html_utils", module, vm)?;
    }
    if capabilities.contains("datetime") {
        let module = build_datetime_module(vm);
        modules.set_item("datetime", module.clone(), vm)?;
        globals.set_item("datetime", module, vm)?;
    }

    Ok(())
}

fn sys_modules(vm: &VirtualMachine) -> PyResult<PyDictRef> {
    vm.sys_module
        .get_attr("modules", vm)?
        .downcast::<PyDict>()
        .map_err(|_| vm.new_runtime_error("sys.modules is not a dict".to_owned()))
}

fn first_str_arg(args: &FuncArgs, vm: &VirtualMachine) -> Option<String> {
    args.args
        .first()
        .and_then(|o| o.str(vm).ok())
        .map(|s| s.as_str().to_owned())
}

fn second_str_arg(args: &FuncArgs, vm: &VirtualMachine) -> Option<String> {
    args.args
        .get(1)
        .and_then(|o| o.str(vm).ok())
        .map(|s| s.as_str().to_owned())
}

// ── http ─────────────────────────────────────────────────────────────────────

struct FetchedResponse {
    url: String,
    status: u16,
    body: String,
}

/// Blocking fetch over reqwest. Runs on the sandbox worker thread, never on
/// the async runtime.
fn fetch_blocking(url: &str, body_limit: usize) -> std::result::Result<FetchedResponse, String> {
    let client = reqwest::blocking::Client::builder()
        .timeout(HTTP_REQUEST_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| e.to_string())?;
    let response = client.get(url).send().map_err(|e| e.to_string())?;

    let status = response.status().as_u16();
    let final_url = response.url().to_string();
    let mut body = response.text().map_err(|e| e.to_string())?;
    truncate_at_boundary(&mut body, body_limit);

    Ok(FetchedResponse {
        url: final_url,
        status,
        body,
    })
}

fn truncate_at_boundary(s: &mut String, limit: usize) {
    if s.len() <= limit {
        return;
    }
    let mut cut = limit;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
}

/// A minimal `requests`-shaped module: `get(url)` returning a response with
/// `url`, `status_code`, `ok`, `text`, and `json()`.
fn build_requests_module(vm: &VirtualMachine, body_limit: usize) -> PyObjectRef {
    let get_fn = vm.new_function(
        "get",
        move |args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            let url = first_str_arg(&args, vm)
                .ok_or_else(|| vm.new_value_error("get() requires a url".to_owned()))?;

            let fetched = fetch_blocking(&url, body_limit).map_err(|msg| {
                vm.new_exception_msg(
                    vm.ctx.exceptions.os_error.to_owned(),
                    format!("NetworkError: {url}: {msg}"),
                )
            })?;

            build_response_object(vm, fetched)
        },
    );

    let module = vm.new_module("requests", vm.ctx.new_dict(), None);
    let _ = module.set_attr("get", get_fn, vm);
    module.into()
}

fn build_response_object(vm: &VirtualMachine, fetched: FetchedResponse) -> PyResult<PyObjectRef> {
    let body_for_json = fetched.body.clone();
    let json_url = fetched.url.clone();
    let json_fn = vm.new_function(
        "json",
        move |_args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            let mut deserializer = serde_json::Deserializer::from_str(&body_for_json);
            py_serde::deserialize(vm, &mut deserializer).map_err(|e| {
                vm.new_value_error(format!("ParseError: json body of {json_url}: {e}"))
            })
        },
    );

    let ns = vm.new_module("<response>", vm.ctx.new_dict(), None);
    ns.set_attr("url", vm.ctx.new_str(fetched.url), vm)?;
    ns.set_attr("status_code", vm.ctx.new_int(fetched.status), vm)?;
    ns.set_attr(
        "ok",
        vm.ctx.new_bool((200..400).contains(&fetched.status)),
        vm,
    )?;
    ns.set_attr("text", vm.ctx.new_str(fetched.body), vm)?;
    ns.set_attr("json", json_fn, vm)?;
    Ok(ns.into())
}

// ── html ─────────────────────────────────────────────────────────────────────

static SCRIPT_STYLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)\s*>").unwrap()
});
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static HREF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)href\s*=\s*["']([^"']+)["']"#).unwrap());

/// Drop markup and collapse whitespace, leaving the visible text.
pub(crate) fn strip_tags_impl(html: &str) -> String {
    let without_scripts = SCRIPT_STYLE_RE.replace_all(html, " ");
    let without_tags = TAG_RE.replace_all(&without_scripts, " ");
    let decoded = decode_entities(&without_tags);
    WS_RE.replace_all(&decoded, " ").trim().to_string()
}

fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

/// Inner text of every occurrence of `tag`.
pub(crate) fn find_all_impl(html: &str, tag: &str) -> std::result::Result<Vec<String>, String> {
    if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(format!("invalid tag name '{tag}'"));
    }
    let escaped = regex::escape(tag);
    let pattern = format!(r"(?is)<{escaped}(?:\s[^>]*)?>(.*?)</{escaped}\s*>");
    let re = Regex::new(&pattern).map_err(|e| e.to_string())?;
    Ok(re
        .captures_iter(html)
        .map(|cap| strip_tags_impl(&cap[1]))
        .collect())
}

/// Every href target in the document, in order.
pub(crate) fn links_impl(html: &str) -> Vec<String> {
    HREF_RE
        .captures_iter(html)
        .map(|cap| cap[1].to_string())
        .collect()
}

fn build_html_module(vm: &VirtualMachine) -> PyObjectRef {
    let strip_fn = vm.new_function(
        "strip_tags",
        |args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            let html = first_str_arg(&args, vm)
                .ok_or_else(|| vm.new_value_error("strip_tags() requires html text".to_owned()))?;
            Ok(vm.ctx.new_str(strip_tags_impl(&html)).into())
        },
    );

    let find_all_fn = vm.new_function(
        "find_all",
        |args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            let html = first_str_arg(&args, vm)
                .ok_or_else(|| vm.new_value_error("find_all() requires html text".to_owned()))?;
            let tag = second_str_arg(&args, vm)
                .ok_or_else(|| vm.new_value_error("find_all() requires a tag name".to_owned()))?;
            let texts = find_all_impl(&html, &tag)
                .map_err(|msg| vm.new_value_error(format!("ParseError: tag '{tag}': {msg}")))?;
            let items = texts
                .into_iter()
                .map(|t| vm.ctx.new_str(t).into())
                .collect();
            Ok(vm.ctx.new_list(items).into())
        },
    );

    let links_fn = vm.new_function(
        "links",
        |args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            let html = first_str_arg(&args, vm)
                .ok_or_else(|| vm.new_value_error("links() requires html text".to_owned()))?;
            let items = links_impl(&html)
                .into_iter()
                .map(|t| vm.ctx.new_str(t).into())
                .collect();
            Ok(vm.ctx.new_list(items).into())
        },
    );

    let module = vm.new_module("html_utils", vm.ctx.new_dict(), None);
    let _ = module.set_attr("strip_tags", strip_fn, vm);
    let _ = module.set_attr("find_all", find_all_fn, vm);
    let _ = module.set_attr("links", links_fn, vm);
    module.into()
}

// ── datetime ─────────────────────────────────────────────────────────────────

/// A chrono-backed `datetime` shim. Exposes `now()`/`utcnow()` both at
/// module level and on a `datetime` attribute, so the common
/// `from datetime import datetime` pattern and plain `import datetime` both
/// resolve. Always UTC.
fn build_datetime_module(vm: &VirtualMachine) -> PyObjectRef {
    let module = vm.new_module("datetime", vm.ctx.new_dict(), None);
    let class_ns = vm.new_module("datetime.datetime", vm.ctx.new_dict(), None);

    for target in [&module, &class_ns] {
        let now_fn = vm.new_function(
            "now",
            |_args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
                build_moment(vm, Utc::now())
            },
        );
        let utcnow_fn = vm.new_function(
            "utcnow",
            |_args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
                build_moment(vm, Utc::now())
            },
        );
        let _ = target.set_attr("now", now_fn, vm);
        let _ = target.set_attr("utcnow", utcnow_fn, vm);
    }

    let _ = module.set_attr("datetime", class_ns, vm);
    module.into()
}

fn build_moment(vm: &VirtualMachine, moment: DateTime<Utc>) -> PyResult<PyObjectRef> {
    let iso_fn = vm.new_function(
        "isoformat",
        move |_args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            Ok(vm.ctx.new_str(moment.to_rfc3339()).into())
        },
    );
    let timestamp_fn = vm.new_function(
        "timestamp",
        move |_args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            let seconds =
                moment.timestamp() as f64 + f64::from(moment.timestamp_subsec_micros()) / 1e6;
            Ok(vm.ctx.new_float(seconds).into())
        },
    );
    let strftime_fn = vm.new_function(
        "strftime",
        move |args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            let fmt = first_str_arg(&args, vm)
                .ok_or_else(|| vm.new_value_error("strftime() requires a format".to_owned()))?;
            let mut out = String::new();
            use std::fmt::Write as _;
            write!(out, "{}", moment.format(&fmt))
                .map_err(|_| vm.new_value_error(format!("invalid format string '{fmt}'")))?;
            Ok(vm.ctx.new_str(out).into())
        },
    );

    let ns = vm.new_module("<moment>", vm.ctx.new_dict(), None);
    ns.set_attr("year", vm.ctx.new_int(moment.year()), vm)?;
    ns.set_attr("month", vm.ctx.new_int(moment.month()), vm)?;
    ns.set_attr("day", vm.ctx.new_int(moment.day()), vm)?;
    ns.set_attr("hour", vm.ctx.new_int(moment.hour()), vm)?;
    ns.set_attr("minute", vm.ctx.new_int(moment.minute()), vm)?;
    ns.set_attr("second", vm.ctx.new_int(moment.second()), vm)?;
    ns.set_attr("isoformat", iso_fn, vm)?;
    ns.set_attr("timestamp", timestamp_fn, vm)?;
    ns.set_attr("strftime", strftime_fn, vm)?;
    Ok(ns.into())
}

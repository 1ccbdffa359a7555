//! End-to-end execution tests against the embedded interpreter.
//!
//! Each execution builds a fresh interpreter, so the suite leans on a few
//! fast cases by default and gates the heavier multi-target and timeout
//! scenarios behind `--ignored`.

use std::time::Duration;

use scraper_sandbox_rs::prelude::*;
use scraper_sandbox_rs::run;

fn fast_config() -> ExecutionConfig {
    ExecutionConfig::builder()
        .timeout(Duration::from_secs(10))
        .build()
}

fn targets(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_bare_list_return() {
    let code = r#"
def scrape_data(url):
    return [{"title": "first"}, {"title": "second"}]
"#;
    let result = run(code, &targets(&["https://example.com"]), fast_config()).await;

    assert!(result.succeeded, "errors: {:?}", result.errors);
    assert!(!result.is_partial());
    assert_eq!(result.records.len(), 2);
    assert_eq!(result.per_target.len(), 1);
    assert_eq!(result.per_target[0].record_count, 2);
    assert_eq!(result.per_target[0].method_used, "unknown");
}

#[tokio::test]
async fn test_dict_return_with_metadata() {
    let code = r#"
def scrape_data(url):
    return {
        "data": [{"title": "only"}],
        "filtered_count": 2,
        "method": "regex_extraction",
        "confidence": "high",
    }
"#;
    let result = run(code, &targets(&["https://example.com"]), fast_config()).await;

    assert!(result.succeeded, "errors: {:?}", result.errors);
    assert_eq!(result.records.len(), 1);
    let outcome = &result.per_target[0];
    assert_eq!(outcome.filtered_count, 2);
    assert_eq!(outcome.method_used, "regex_extraction");
    assert_eq!(outcome.confidence, Confidence::High);
}

#[tokio::test]
async fn test_none_return_is_target_failure() {
    let code = "def scrape_data(url):\n    pass\n";
    let result = run(code, &targets(&["https://example.com"]), fast_config()).await;

    assert!(!result.succeeded);
    assert!(result.records.is_empty());
    assert!(result.errors[0].contains("no value"));
}

#[tokio::test]
async fn test_unexpected_shape_is_target_failure() {
    let code = "def scrape_data(url):\n    return 42\n";
    let result = run(code, &targets(&["https://example.com"]), fast_config()).await;

    assert!(!result.succeeded);
    assert!(result.errors[0].contains("a number"), "errors: {:?}", result.errors);
}

#[tokio::test]
async fn test_runtime_exception_is_target_failure() {
    let code = r#"
def scrape_data(url):
    values = []
    return values[3]
"#;
    let result = run(code, &targets(&["https://example.com"]), fast_config()).await;

    assert!(!result.succeeded);
    assert!(
        result.errors[0].contains("runtime"),
        "errors: {:?}",
        result.errors
    );
}

#[tokio::test]
async fn test_security_rejection_before_entry_runs() {
    // The write would be observable if the function ever ran; the import
    // scan must reject the script before execution.
    let code = r#"
import os

def scrape_data(url):
    os.remove("/tmp/scraper-sandbox-proof")
    return []
"#;
    let result = run(code, &targets(&["https://example.com"]), fast_config()).await;

    assert!(!result.succeeded);
    assert!(result.errors[0].contains("security"));
    assert!(result.errors[0].contains("'os'"));
}

#[tokio::test]
async fn test_disabled_builtin_raises_security_error() {
    // `exit` passes the static token scan but is stubbed out at runtime.
    let code = r#"
def scrape_data(url):
    exit()
    return []
"#;
    let result = run(code, &targets(&["https://example.com"]), fast_config()).await;

    assert!(!result.succeeded);
    assert!(result.errors[0].contains("security"), "errors: {:?}", result.errors);
    assert!(result.errors[0].contains("exit"));
}

#[tokio::test]
async fn test_stdlib_capabilities_available() {
    let code = r#"
import re
import json

def scrape_data(url):
    parsed = json.loads('{"items": ["a1", "b2"]}')
    records = []
    for item in parsed["items"]:
        match = re.match(r"([a-z])(\d)", item)
        records.append({"letter": match.group(1), "digit": int(match.group(2))})
    return records
"#;
    let result = run(code, &targets(&["https://example.com"]), fast_config()).await;

    assert!(result.succeeded, "errors: {:?}", result.errors);
    assert_eq!(result.records.len(), 2);
    assert_eq!(result.records[0]["letter"], "a");
    assert_eq!(result.records[1]["digit"], 2);
}

#[tokio::test]
async fn test_collection_helper_modules_available() {
    let code = r#"
from collections import Counter
from typing import List

def scrape_data(url: str) -> List[dict]:
    counts = Counter(["a", "b", "a", "a"])
    return [{"word": word, "count": count} for word, count in counts.most_common(1)]
"#;
    let result = run(code, &targets(&["https://example.com"]), fast_config()).await;

    assert!(result.succeeded, "errors: {:?}", result.errors);
    assert_eq!(result.records[0]["word"], "a");
    assert_eq!(result.records[0]["count"], 3);
}

#[tokio::test]
async fn test_html_capability_extracts_text() {
    let code = r#"
def scrape_data(url):
    page = "<html><h2>One</h2><p>skip</p><h2>Two &amp; Three</h2></html>"
    return [{"title": t} for t in html_utils.find_all(page, "h2")]
"#;
    let result = run(code, &targets(&["https://example.com"]), fast_config()).await;

    assert!(result.succeeded, "errors: {:?}", result.errors);
    assert_eq!(result.records.len(), 2);
    assert_eq!(result.records[0]["title"], "One");
    assert_eq!(result.records[1]["title"], "Two & Three");
}

#[tokio::test]
async fn test_datetime_capability() {
    let code = r#"
from datetime import datetime

def scrape_data(url):
    return [{"scraped_at": datetime.now().isoformat()}]
"#;
    let result = run(code, &targets(&["https://example.com"]), fast_config()).await;

    assert!(result.succeeded, "errors: {:?}", result.errors);
    let stamp = result.records[0]["scraped_at"].as_str().unwrap();
    assert!(stamp.contains('T'), "not an ISO timestamp: {stamp}");
}

#[tokio::test]
async fn test_main_guard_is_stripped() {
    let code = r#"
def scrape_data(url):
    return [{"u": url}]

if __name__ == "__main__":
    raise RuntimeError("guard body must not run")
"#;
    let result = run(code, &targets(&["https://example.com"]), fast_config()).await;
    assert!(result.succeeded, "errors: {:?}", result.errors);
}

#[tokio::test]
async fn test_capability_restriction_blocks_requests() {
    let config = ExecutionConfig::builder()
        .timeout(Duration::from_secs(10))
        .allowed_capabilities(["json", "regex"])
        .build();
    let code = r#"
import requests

def scrape_data(url):
    return [{"text": requests.get(url).text}]
"#;
    let result = run(code, &targets(&["https://example.com"]), config).await;

    assert!(!result.succeeded);
    assert!(result.errors[0].contains("security"), "errors: {:?}", result.errors);
}

#[tokio::test]
#[ignore = "slow: runs several interpreters"]
async fn test_partial_success_across_targets() {
    let code = r#"
def scrape_data(url):
    if "bad" in url:
        raise ValueError("cannot handle %s" % url)
    return [{"source": url}]
"#;
    let list = targets(&[
        "https://a.example.com",
        "https://bad.example.com",
        "https://c.example.com",
    ]);
    let result = run(code, &list, fast_config()).await;

    assert!(result.succeeded, "partial success is still success");
    assert!(result.is_partial());
    assert_eq!(result.per_target.len(), 3);
    assert_eq!(result.success_count(), 2);
    assert!(result.per_target[0].succeeded);
    assert!(!result.per_target[1].succeeded);
    assert!(result.per_target[2].succeeded);

    // Records come only from successes and keep target order.
    assert_eq!(result.records.len(), 2);
    assert_eq!(result.records[0]["source"], "https://a.example.com");
    assert_eq!(result.records[1]["source"], "https://c.example.com");

    // Each failed target contributes exactly one prefixed error.
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].starts_with("https://bad.example.com:"));

    // Record count invariant: successes' counts sum to the aggregate.
    let counted: usize = result
        .per_target
        .iter()
        .filter(|o| o.succeeded)
        .map(|o| o.record_count)
        .sum();
    assert_eq!(counted, result.records.len());
}

#[tokio::test]
#[ignore = "slow: runs several interpreters"]
async fn test_multi_target_records_are_tagged() {
    let code = r#"
def scrape_data(url):
    return [{"title": "from " + url}]
"#;
    let list = targets(&["https://a.example.com", "https://b.example.com"]);
    let result = run(code, &list, fast_config()).await;

    assert!(result.succeeded);
    assert_eq!(result.records[0]["source_target"], "https://a.example.com");
    assert_eq!(result.records[1]["source_target"], "https://b.example.com");

    // Single-target runs stay untagged.
    let single = run(code, &targets(&["https://a.example.com"]), fast_config()).await;
    assert!(single.records[0].get("source_target").is_none());
}

#[tokio::test]
#[ignore = "slow: waits out a timeout"]
async fn test_timeout_does_not_sink_later_targets() {
    let config = ExecutionConfig::builder()
        .timeout(Duration::from_millis(500))
        .build();
    let code = r#"
import time

def scrape_data(url):
    if "slow" in url:
        time.sleep(5)
    return [{"u": url}]
"#;
    let list = targets(&["https://slow.example.com", "https://fast.example.com"]);
    let result = run(code, &list, config).await;

    assert!(result.succeeded, "errors: {:?}", result.errors);
    assert!(result.is_partial());
    assert!(!result.per_target[0].succeeded);
    assert!(result.errors[0].contains("timeout"), "errors: {:?}", result.errors);
    assert!(result.per_target[1].succeeded);
    assert_eq!(result.records.len(), 1);
}

#[tokio::test]
#[ignore = "slow: waits out a timeout"]
async fn test_abandoned_worker_result_is_discarded() {
    let config = ExecutionConfig::builder()
        .timeout(Duration::from_millis(200))
        .build();
    let code = r#"
import time

def scrape_data(url):
    time.sleep(1)
    return [{"late": True}]
"#;
    let result = run(code, &targets(&["https://example.com"]), config).await;

    assert!(!result.succeeded);
    assert!(result.records.is_empty());

    // Give the abandoned worker time to finish; its late value must not
    // have leaked anywhere observable.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(result.records.is_empty());
}

#[tokio::test]
#[ignore = "requires network"]
async fn test_live_fetch_round_trip() {
    let code = r#"
def scrape_data(url):
    response = requests.get(url)
    if not response.ok:
        return {"data": [], "error": "HTTP %d" % response.status_code}
    return [{"length": len(response.text), "status": response.status_code}]
"#;
    let result = run(code, &targets(&["https://example.com"]), fast_config()).await;

    assert!(result.succeeded, "errors: {:?}", result.errors);
    assert_eq!(result.records[0]["status"], 200);
}

#[tokio::test]
async fn test_result_round_trips_through_serde() {
    let code = "def scrape_data(url):\n    return [{'k': 1}]\n";
    let result = run(code, &targets(&["https://example.com"]), fast_config()).await;

    let encoded = serde_json::to_string(&result).unwrap();
    let decoded: ExecutionResult = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded.succeeded, result.succeeded);
    assert_eq!(decoded.records, result.records);
    assert_eq!(decoded.per_target.len(), result.per_target.len());
}

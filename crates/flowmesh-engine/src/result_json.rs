//! Extraction of the harness result object from raw pod logs.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

static RESULT_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*RESULT_JSON\s*[:=]\s*(\{.*?\})\s*$").expect("valid result line regex")
});

static SINGLE_LINE_OBJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\{[^\r\n]*\})").expect("valid single line object regex"));

fn parse_object(candidate: &str) -> Option<Map<String, Value>> {
    serde_json::from_str::<Map<String, Value>>(candidate).ok()
}

/// Find the result object in `logs`.
///
/// Tried in order:
/// 1. the first `RESULT_JSON:` (or `RESULT_JSON=`) line,
/// 2. the last balanced top-level `{...}` that parses, honoring string
///    literals and escapes,
/// 3. the first single-line `{...}` that parses.
#[must_use]
pub fn parse_result_json(logs: &str) -> Option<Map<String, Value>> {
    let logs = logs.trim();
    if logs.is_empty() {
        return None;
    }

    if let Some(found) = RESULT_LINE_RE
        .captures(logs)
        .and_then(|caps| caps.get(1))
        .and_then(|m| parse_object(m.as_str()))
    {
        return Some(found);
    }

    if let Some(found) = last_balanced_object(logs) {
        return Some(found);
    }

    SINGLE_LINE_OBJECT_RE
        .captures_iter(logs)
        .filter_map(|caps| caps.get(1))
        .find_map(|m| parse_object(m.as_str()))
}

fn last_balanced_object(logs: &str) -> Option<Map<String, Value>> {
    let mut last = None;
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in logs.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = in_string,
            '"' => in_string = !in_string,
            _ if in_string => {}
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(from) = start.take() {
                        if let Some(obj) = parse_object(&logs[from..=i]) {
                            last = Some(obj);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    last
}

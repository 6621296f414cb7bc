use serde::Serialize;
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::HarnessError;

pub const SCHEMA_VERSION: u32 = 1;

/// Check passed.
pub const EXIT_OK: i32 = 0;
/// Usage, configuration or platform resolution problem.
pub const EXIT_USAGE: i32 = 2;
/// The CLI under test did not behave as expected.
pub const EXIT_CHECK_FAILED: i32 = 3;

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct JsonResult {
    pub ok: bool,
    pub exit_code: i32,
    pub check: Option<String>,
    pub expected: Option<String>,
    pub actual: Option<String>,
    pub error: Option<String>,
}

impl JsonResult {
    pub fn from_ok(ok: bool) -> Self {
        JsonResult {
            ok,
            exit_code: if ok { EXIT_OK } else { EXIT_CHECK_FAILED },
            check: None,
            expected: None,
            actual: None,
            error: None,
        }
    }

    pub fn from_error(err: &HarnessError) -> Self {
        match err.assertion() {
            Some(failure) => JsonResult {
                ok: false,
                exit_code: EXIT_CHECK_FAILED,
                check: Some(failure.check.clone()),
                expected: Some(failure.expected.clone()),
                actual: Some(failure.actual.clone()),
                error: Some(err.to_string()),
            },
            None => JsonResult {
                ok: false,
                exit_code: exit_code_for(err),
                check: None,
                expected: None,
                actual: None,
                error: Some(err.to_string()),
            },
        }
    }

    pub fn with_check(mut self, check: impl Into<String>) -> Self {
        if self.check.is_none() {
            self.check = Some(check.into());
        }
        self
    }
}

/// Only failures attributable to the CLI under test map to 3. A missing
/// request record means the scenario is misordered or misconfigured.
pub fn exit_code_for(err: &HarnessError) -> i32 {
    match err {
        HarnessError::Assertion(_) | HarnessError::CommandTimedOut { .. } => EXIT_CHECK_FAILED,
        _ => EXIT_USAGE,
    }
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn sort_value(value: &mut Value) {
    match value {
        Value::Array(items) => {
            for item in items {
                sort_value(item);
            }
        }
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> =
                map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, mut val) in entries {
                sort_value(&mut val);
                sorted.insert(key, val);
            }
            *map = sorted;
        }
        _ => {}
    }
}

fn envelope_value<T: Serialize>(kind: &str, result: &JsonResult, data: &T) -> Value {
    let mut value = serde_json::json!({
        "schema_version": SCHEMA_VERSION,
        "kind": kind,
        "generated_at_unix_ms": now_unix_ms(),
        "result": result,
        "data": data,
    });
    sort_value(&mut value);
    value
}

pub fn render_envelope<T: Serialize>(kind: &str, result: &JsonResult, data: &T) -> Result<String, String> {
    let value = envelope_value(kind, result, data);
    serde_json::to_string_pretty(&value).map_err(|e| format!("failed to encode JSON: {e}"))
}

pub fn print_envelope<T: Serialize>(kind: &str, result: &JsonResult, data: &T) -> Result<(), String> {
    let text = render_envelope(kind, result, data)?;
    println!("{text}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AssertionFailure;
    use crate::payload::Channel;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Dummy {
        zeta: u8,
        alpha: String,
    }

    #[test]
    fn envelope_keys_are_sorted() {
        let payload = Dummy {
            zeta: 1,
            alpha: "ok".to_string(),
        };
        let text = render_envelope("dummy", &JsonResult::from_ok(true), &payload).expect("render");
        let parsed: serde_json::Value = serde_json::from_str(&text).expect("parse");
        assert_eq!(parsed["kind"], "dummy");
        assert_eq!(parsed["schema_version"], SCHEMA_VERSION);
        assert_eq!(parsed["result"]["exit_code"], 0);
        assert!(text.find("\"alpha\"").unwrap() < text.find("\"zeta\"").unwrap());
    }

    #[test]
    fn assertion_failures_carry_expected_and_actual() {
        let err: HarnessError = AssertionFailure::new("output contains", "\"Usage\"", "boom").into();
        let result = JsonResult::from_error(&err);
        assert!(!result.ok);
        assert_eq!(result.exit_code, EXIT_CHECK_FAILED);
        assert_eq!(result.expected.as_deref(), Some("\"Usage\""));
        assert_eq!(result.actual.as_deref(), Some("boom"));
    }

    #[test]
    fn harness_faults_map_to_usage_exit() {
        let err = HarnessError::UnclassifiedPlatform {
            raw_os: "plan9".to_string(),
        };
        assert_eq!(JsonResult::from_error(&err).exit_code, EXIT_USAGE);
        let err = HarnessError::NoRecordedRequest {
            channel: Channel::Builds,
        };
        assert_eq!(JsonResult::from_error(&err).exit_code, EXIT_USAGE);
    }
}

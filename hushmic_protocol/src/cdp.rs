//! Remote-debugging wire types: `/json` target list and `Runtime.evaluate` over the target socket.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const VERSION_PATH: &str = "/json/version";
pub const TARGETS_PATH: &str = "/json";
pub const PAGE_KIND: &str = "page";
pub const EVALUATE_METHOD: &str = "Runtime.evaluate";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DebugTarget {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "webSocketDebuggerUrl", default)]
    pub control_endpoint: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl DebugTarget {
    pub fn is_page(&self) -> bool {
        self.kind == PAGE_KIND
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct CdpRequest<'a> {
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

impl CdpRequest<'static> {
    pub fn evaluate(id: u64, expression: &str) -> Self {
        CdpRequest {
            id,
            method: EVALUATE_METHOD,
            params: json!({
                "expression": expression,
                "returnByValue": true,
            }),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct CdpResponse {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<CdpRemoteError>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct CdpRemoteError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

pub enum EvaluateOutcome {
    Value(Value),
    Threw(String),
}

impl CdpResponse {
    /// Pulls `result.result.value`; a missing value is `null`.
    pub fn evaluate_outcome(&self) -> EvaluateOutcome {
        let Some(result) = self.result.as_ref() else {
            return EvaluateOutcome::Value(Value::Null);
        };
        if let Some(details) = result.get("exceptionDetails") {
            let text = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("script threw")
                .to_string();
            return EvaluateOutcome::Threw(text);
        }
        EvaluateOutcome::Value(
            result
                .pointer("/result/value")
                .cloned()
                .unwrap_or(Value::Null),
        )
    }
}

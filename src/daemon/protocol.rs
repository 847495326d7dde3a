use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adbd::{DaemonStatus, StartReport, StopReport};

pub const METHOD_START: &str = "adbd/start";
pub const METHOD_STOP: &str = "adbd/stop";
pub const METHOD_LIST: &str = "adbd/list";
pub const METHOD_STATUS: &str = "status";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Value::from(id),
            method: method.to_string(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i32, message: String, data: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError { code, message, data }),
        }
    }
}

/// `adbd/start` params. Ports arrive as free text or numbers; anything
/// unparseable falls back to the configured default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<Value>,
}

impl StartParams {
    pub fn start_text(&self) -> Option<String> {
        self.start.as_ref().map(value_text)
    }

    pub fn end_text(&self) -> Option<String> {
        self.end.as_ref().map(value_text)
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortFailure {
    pub port: u16,
    pub code: String,
    pub message: String,
}

impl PortFailure {
    fn new(port: u16, error: &crate::Error) -> Self {
        Self { port, code: error.code().to_string(), message: error.to_string() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResult {
    pub running: Vec<u16>,
    pub failed: Vec<PortFailure>,
}

impl From<&StartReport> for StartResult {
    fn from(report: &StartReport) -> Self {
        Self {
            running: report.running_ports(),
            failed: report.failures().into_iter().map(|(p, e)| PortFailure::new(p, e)).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopResult {
    pub stopped: Vec<u16>,
    pub failed: Vec<PortFailure>,
}

impl From<&StopReport> for StopResult {
    fn from(report: &StopReport) -> Self {
        Self {
            stopped: report.stopped.clone(),
            failed: report.failed.iter().map(|(p, e)| PortFailure::new(*p, e)).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResult {
    pub daemons: Vec<DaemonStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResult {
    pub ips: String,
    pub daemons: String,
    pub visible: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_start_params_accept_text_and_numbers() {
        let params: StartParams = serde_json::from_value(json!({"start": 6000, "end": "6003"})).unwrap();
        assert_eq!(params.start_text().as_deref(), Some("6000"));
        assert_eq!(params.end_text().as_deref(), Some("6003"));

        let empty: StartParams = serde_json::from_value(json!({})).unwrap();
        assert!(empty.start_text().is_none());
    }

    #[test]
    fn test_error_response_omits_result() {
        let resp = JsonRpcResponse::error(json!(3), -32000, "boom".to_string(), Some(json!("PROTOCOL")));
        let text = serde_json::to_string(&resp).unwrap();
        assert!(!text.contains("\"result\""));
        assert!(text.contains("\"code\":-32000"));
    }
}

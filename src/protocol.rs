use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request sent by the host to the executor
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub code: String,
    pub test_code: String,
    #[serde(default)]
    pub test_cases: Vec<Vec<Value>>,
    #[serde(default)]
    pub function_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
}

/// Outcome of a single `it` block
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestRecord {
    pub title: String,
    pub status: TestStatus,
    pub parent_title: String,
    #[serde(default)]
    pub duration: f64, // milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub test_results: Vec<TestRecord>,
    pub time_taken: f64, // milliseconds, invocation loop only
    pub message: String,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionError {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ExecutionError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            request_id: None,
        }
    }
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

/// Any reply the executor sends back for an accepted request
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ExecutorReply {
    Error(ExecutionError),
    Result(ExecutionResult),
}

impl ExecutorReply {
    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        match &mut self {
            Self::Error(e) => e.request_id = request_id,
            Self::Result(r) => r.request_id = request_id,
        }
        self
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Error(e) => e.request_id.as_deref(),
            Self::Result(r) => r.request_id.as_deref(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

impl From<ExecutionError> for ExecutorReply {
    fn from(e: ExecutionError) -> Self {
        Self::Error(e)
    }
}

impl From<ExecutionResult> for ExecutorReply {
    fn from(r: ExecutionResult) -> Self {
        Self::Result(r)
    }
}

/// Shape check applied to every inbound payload.
///
/// Returns `None` for anything that is not an object carrying non-empty `code`
/// and `testCode` strings, or that fails to deserialize. Such payloads are
/// dropped without a reply.
pub fn validate_payload(payload: &Value) -> Option<ExecutionRequest> {
    let object = payload.as_object()?;

    let non_empty = |key: &str| {
        object
            .get(key)
            .and_then(Value::as_str)
            .is_some_and(|s| !s.trim().is_empty())
    };
    if !non_empty("code") || !non_empty("testCode") {
        return None;
    }

    serde_json::from_value(payload.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_defaults() {
        let request = validate_payload(&json!({
            "code": "function f() {}",
            "testCode": "describe('x', () => {})",
        }))
        .unwrap();
        assert!(request.test_cases.is_empty());
        assert_eq!(request.function_name, "");
        assert_eq!(request.request_id, None);
    }

    #[test]
    fn test_rejects_malformed_payloads() {
        assert!(validate_payload(&json!("hello")).is_none());
        assert!(validate_payload(&json!(["code"])).is_none());
        assert!(validate_payload(&json!({"code": "x"})).is_none());
        assert!(validate_payload(&json!({"code": "", "testCode": "y"})).is_none());
        assert!(validate_payload(&json!({"code": "x", "testCode": "   "})).is_none());
        assert!(validate_payload(&json!({"code": 1, "testCode": "y"})).is_none());
        assert!(
            validate_payload(&json!({"code": "x", "testCode": "y", "testCases": [1, 2]}))
                .is_none()
        );
    }

    #[test]
    fn test_result_wire_format() {
        let reply = ExecutorReply::Result(ExecutionResult {
            test_results: vec![TestRecord {
                title: "adds".to_string(),
                status: TestStatus::Passed,
                parent_title: "Math".to_string(),
                duration: 0.0,
                error: None,
            }],
            time_taken: 0.5,
            message: "[3]".to_string(),
            logs: vec![],
            request_id: Some("abc".to_string()),
        });

        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["testResults"][0]["status"], "passed");
        assert_eq!(value["testResults"][0]["parentTitle"], "Math");
        assert_eq!(value["timeTaken"], 0.5);
        assert_eq!(value["requestId"], "abc");
        assert!(value["testResults"][0].get("error").is_none());
    }

    #[test]
    fn test_untagged_reply_decoding() {
        let error: ExecutorReply =
            serde_json::from_value(json!({"name": "SyntaxError", "message": "bad"})).unwrap();
        assert!(error.is_error());

        let result: ExecutorReply = serde_json::from_value(json!({
            "testResults": [],
            "timeTaken": 0,
            "message": "[]"
        }))
        .unwrap();
        assert!(!result.is_error());
    }
}

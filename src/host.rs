use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use reqwest::StatusCode;
use reqwest::header::ORIGIN;
use serde_json::Value;
use uuid::Uuid;

use crate::create_timestamp;
use crate::protocol::{ExecutionError, ExecutionRequest, ExecutionResult, ExecutorReply};
use crate::sandbox::test_runner::TestTally;

/// What the host makes of the executor's answer to its current request
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed {
        result: ExecutionResult,
        tally: TestTally,
        passed: bool,
    },
    Failed(ExecutionError),
    /// The executor dropped the message or did not answer in time
    NoOutput,
    /// The answer belongs to another request
    Discarded,
}

impl RunOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, Self::Completed { passed: true, .. })
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub request_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub outcome: RunOutcome,
}

/// Client side of the executor protocol. Owns at most one outstanding request.
pub struct HostController {
    client: reqwest::Client,
    execute_url: String,
    origin: String,
    timeout: Duration,
    current: Mutex<Option<String>>,
    running: AtomicBool,
}

impl HostController {
    pub fn new(executor_url: &str, origin: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            execute_url: format!("{}/execute", executor_url.trim_end_matches('/')),
            origin: origin.into(),
            timeout,
            current: Mutex::new(None),
            running: AtomicBool::new(false),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn current_request(&self) -> Option<String> {
        self.current.lock().clone()
    }

    /// Sends one request and waits for its reply, at most `timeout` long
    pub async fn run_code(
        &self,
        code: &str,
        test_code: &str,
        test_cases: Vec<Vec<Value>>,
        function_name: &str,
    ) -> Result<RunReport> {
        let request_id = Uuid::new_v4().to_string();
        *self.current.lock() = Some(request_id.clone());
        self.running.store(true, Ordering::SeqCst);

        let started_at = create_timestamp();
        let request = ExecutionRequest {
            code: code.to_string(),
            test_code: test_code.to_string(),
            test_cases,
            function_name: function_name.to_string(),
            request_id: Some(request_id.clone()),
        };
        log::info!("Submitting request {request_id} to {}", self.execute_url);

        let exchanged = self.exchange(&request).await;
        self.finish();

        Ok(RunReport {
            request_id,
            started_at,
            finished_at: create_timestamp(),
            outcome: exchanged?,
        })
    }

    /// Forgets the outstanding request, whatever became of it
    fn finish(&self) {
        *self.current.lock() = None;
        self.running.store(false, Ordering::SeqCst);
    }

    async fn exchange(&self, request: &ExecutionRequest) -> Result<RunOutcome> {
        let sent = self
            .client
            .post(&self.execute_url)
            .header(ORIGIN, &self.origin)
            .timeout(self.timeout)
            .json(request)
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                log::warn!("No reply within {} s", self.timeout.as_secs());
                return Ok(RunOutcome::NoOutput);
            }
            Err(e) => return Err(e).context("Failed to reach the executor"),
        };

        if response.status() == StatusCode::NO_CONTENT {
            log::warn!("Executor dropped the request");
            return Ok(RunOutcome::NoOutput);
        }

        let payload = match response.error_for_status()?.json::<Value>().await {
            Ok(payload) => payload,
            Err(e) if e.is_timeout() => return Ok(RunOutcome::NoOutput),
            Err(e) => return Err(e).context("Failed to read the executor reply"),
        };

        Ok(self.receive(&payload))
    }

    /// Turns an inbound message into an outcome for the current request
    pub fn receive(&self, payload: &Value) -> RunOutcome {
        let Some(reply) = classify(payload) else {
            log::debug!("Ignored message that is not a reply");
            return RunOutcome::Discarded;
        };

        let current = self.current.lock();
        if current.is_none() || reply.request_id() != current.as_deref() {
            log::warn!(
                "Discarded reply for {:?}, waiting on {:?}",
                reply.request_id(),
                *current
            );
            return RunOutcome::Discarded;
        }
        drop(current);
        self.finish();

        match reply {
            ExecutorReply::Error(error) => {
                log::info!("Run failed: {error}");
                RunOutcome::Failed(error)
            }
            ExecutorReply::Result(result) => {
                let tally = TestTally::from_records(&result.test_results);
                log::info!(
                    "Run completed: {}/{} tests passed",
                    tally.passed,
                    tally.total
                );
                RunOutcome::Completed {
                    passed: tally.succeeded(),
                    tally,
                    result,
                }
            }
        }
    }
}

/// Sorts a message into error or result.
///
/// Non-object payloads are not replies. Any of `error`, `stack` or `name`
/// marks an error; everything else must parse as a result.
pub fn classify(payload: &Value) -> Option<ExecutorReply> {
    let object = payload.as_object()?;
    let text = |key: &str| object.get(key).and_then(Value::as_str).map(str::to_string);
    let request_id = text("requestId");

    if ["error", "stack", "name"].iter().any(|key| object.contains_key(*key)) {
        let message = text("message")
            .or_else(|| text("error"))
            .or_else(|| object.get("error").map(Value::to_string))
            .unwrap_or_default();
        return Some(ExecutorReply::Error(ExecutionError {
            name: text("name").unwrap_or_else(|| "Error".to_string()),
            message,
            stack: text("stack"),
            request_id,
        }));
    }

    match serde_json::from_value::<ExecutionResult>(payload.clone()) {
        Ok(result) => Some(ExecutorReply::Result(result)),
        Err(e) => {
            log::debug!("Message is neither an error nor a result: {e}");
            None
        }
    }
}

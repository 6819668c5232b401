use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::config::{Engine, ExecutorConfig};
use crate::origin::OriginPolicy;
use crate::protocol::{ExecutionError, ExecutorReply, validate_payload};
use crate::queue::{ExecutionJob, JobQueue};
use crate::sandbox::{ExecutorState, SYSTEM_ERROR};

/// Message-driven front of the executor: checks the sender and the payload,
/// queues accepted requests for the runners and waits for the reply.
pub struct Executor {
    policy: OriginPolicy,
    queue: Arc<JobQueue>,
    engine: Engine,
    workers: u8,
    next_job_id: AtomicU64,
}

#[derive(Serialize, Debug)]
pub struct ExecutorStatus {
    pub status: &'static str,
    pub engine: Engine,
    pub workers: u8,
    pub queued: usize,
    pub origin_check: bool,
}

impl Executor {
    pub fn new(config: &ExecutorConfig, hostname: &str, queue: Arc<JobQueue>) -> Self {
        let policy = OriginPolicy::new(&config.allowed_origins, hostname);
        if policy.bypass() {
            log::warn!("Executor served from loopback host {hostname}, origin check disabled");
        }

        Self {
            policy,
            queue,
            engine: config.engine,
            workers: config.workers,
            next_job_id: AtomicU64::new(1),
        }
    }

    /// Handles one inbound message.
    ///
    /// `None` means the message was dropped: wrong origin or malformed payload.
    /// Every accepted message gets exactly one reply.
    pub async fn handle(&self, origin: Option<&str>, payload: &Value) -> Option<ExecutorReply> {
        let state = ExecutorState::Idle.advance(0, ExecutorState::Validating);

        if !self.policy.permits(origin) {
            log::warn!("Dropped message from disallowed origin {origin:?}");
            state.advance(0, ExecutorState::Idle);
            return None;
        }

        let Some(request) = validate_payload(payload) else {
            log::warn!("Dropped malformed message from {origin:?}");
            state.advance(0, ExecutorState::Idle);
            return None;
        };

        let job_id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        let request_id = request.request_id.clone();
        let (tx, rx) = oneshot::channel::<ExecutorReply>();

        self.queue
            .push(ExecutionJob {
                id: job_id,
                request,
                responder: tx,
            })
            .await;
        log::debug!("Queued job {job_id} from {origin:?}");

        let reply = match rx.await {
            Ok(reply) => {
                log::info!("Received reply for job {job_id}");
                reply
            }
            Err(e) => {
                log::error!("Failed to receive reply for job {job_id}: {e}");
                ExecutorReply::Error(ExecutionError::new(
                    SYSTEM_ERROR,
                    "Executor shut down before replying",
                ))
                .with_request_id(request_id)
            }
        };

        ExecutorState::Responding.advance(0, ExecutorState::Idle);
        Some(reply)
    }

    pub async fn status(&self) -> ExecutorStatus {
        ExecutorStatus {
            status: "ok",
            engine: self.engine,
            workers: self.workers,
            queued: self.queue.len().await,
            origin_check: !self.policy.bypass(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn production_config() -> ExecutorConfig {
        ExecutorConfig {
            allowed_origins: vec!["https://codebox.dev".to_string()],
            ..ExecutorConfig::default()
        }
    }

    #[tokio::test]
    async fn test_disallowed_origin_never_reaches_queue() {
        let queue = Arc::new(JobQueue::new());
        let executor = Executor::new(&production_config(), "sandbox.codebox.dev", queue.clone());

        let reply = executor
            .handle(
                Some("https://evil.example"),
                &json!({"code": "function f() {}", "testCode": "it('x', () => {})"}),
            )
            .await;

        assert!(reply.is_none());
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test]
    async fn test_malformed_payload_never_reaches_queue() {
        let queue = Arc::new(JobQueue::new());
        let executor = Executor::new(&production_config(), "sandbox.codebox.dev", queue.clone());

        let reply = executor
            .handle(Some("https://codebox.dev"), &json!({"code": "x"}))
            .await;

        assert!(reply.is_none());
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test]
    async fn test_accepted_message_is_answered() {
        let queue = Arc::new(JobQueue::new());
        let executor = Executor::new(&production_config(), "sandbox.codebox.dev", queue.clone());

        let responder = tokio::spawn({
            let queue = queue.clone();
            async move {
                let job = queue.pop().await;
                let _ = job.responder.send(ExecutorReply::Error(ExecutionError::new("E", "m")));
            }
        });

        let reply = executor
            .handle(
                Some("https://codebox.dev/"),
                &json!({"code": "f", "testCode": "t", "requestId": "r1"}),
            )
            .await;
        responder.await.unwrap();

        assert_eq!(reply, Some(ExecutorReply::Error(ExecutionError::new("E", "m"))));
    }

    #[tokio::test]
    async fn test_dropped_responder_yields_system_error() {
        let queue = Arc::new(JobQueue::new());
        let executor = Executor::new(&production_config(), "localhost", queue.clone());

        let dropper = tokio::spawn({
            let queue = queue.clone();
            async move {
                drop(queue.pop().await);
            }
        });

        let reply = executor
            .handle(None, &json!({"code": "f", "testCode": "t", "requestId": "r2"}))
            .await
            .unwrap();
        dropper.await.unwrap();

        let ExecutorReply::Error(error) = reply else {
            panic!("expected an error");
        };
        assert_eq!(error.name, SYSTEM_ERROR);
        assert_eq!(error.request_id.as_deref(), Some("r2"));
    }

    #[tokio::test]
    async fn test_status_reports_origin_check() {
        let queue = Arc::new(JobQueue::new());
        let executor = Executor::new(&production_config(), "sandbox.codebox.dev", queue);
        let status = executor.status().await;
        assert!(status.origin_check);
        assert_eq!(status.queued, 0);
        assert_eq!(status.engine, Engine::Embedded);
    }
}

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::ExecutorConfig;
use crate::protocol::{ExecutionError, ExecutorReply};
use crate::queue::JobQueue;
use crate::sandbox::{SYSTEM_ERROR, TIMEOUT_ERROR, create_sandbox_runner};

/// Extra time granted to a runner beyond its own timeout before the worker gives up on it
const RUNNER_SLACK: Duration = Duration::from_secs(1);

pub async fn worker(
    id: u8,
    config: Arc<ExecutorConfig>,
    queue: Arc<JobQueue>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let sandbox = Arc::new(create_sandbox_runner(id, &config)?);
    let hard_limit = config.timeout_ms.as_duration() + RUNNER_SLACK;
    log::info!("Worker {id} initialized ({} engine)", sandbox.engine_name());

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                log::info!("Worker {id} received shutdown signal, stopping");
                break;
            }

            job = queue.pop() => {
                let job_id = job.id;

                if job.responder.is_closed() {
                    log::info!("Job {job_id} abandoned by its sender, discarded");
                    continue;
                }
                log::info!("Worker {id} got job {job_id} from queue");

                let request_id = job.request.request_id.clone();
                let request = job.request;

                // 1. Spawn blocking runner and get its handle
                let sandbox_ref = Arc::clone(&sandbox);
                let result_handle = tokio::task::spawn_blocking(move || {
                    let result = sandbox_ref.run(&request);
                    log::info!("Job {job_id} finished on worker {id}");

                    result
                });

                // 2. Give back control to the runtime until job is done or the hard limit passes
                let reply = match tokio::time::timeout(hard_limit, result_handle).await {
                    Ok(Ok(Ok(reply))) => reply,
                    Ok(Ok(Err(e))) => {
                        log::error!("Runner failed on job {job_id}: {e:#}");
                        ExecutorReply::Error(ExecutionError::new(SYSTEM_ERROR, e.to_string()))
                    }
                    Ok(Err(e)) => {
                        log::error!("Spawning job {job_id} failed on worker {id}: {e:?}");
                        ExecutorReply::Error(ExecutionError::new(SYSTEM_ERROR, "Runner task failed"))
                    }
                    Err(_) => {
                        log::warn!("Job {job_id} exceeded the hard limit on worker {id}, runner detached");
                        ExecutorReply::Error(ExecutionError::new(
                            TIMEOUT_ERROR,
                            format!("Execution did not finish within {} ms", hard_limit.as_millis()),
                        ))
                    }
                };

                // 3. Send the reply back to the waiting request
                if job.responder.send(reply.with_request_id(request_id)).is_err() {
                    log::warn!("Failed to send job {job_id} result back to server");
                } else {
                    log::debug!("Job {job_id} result sent back from worker {id}");
                }
            }
        };
    }

    log::info!("Worker {id} has shut down gracefully");
    Ok(())
}

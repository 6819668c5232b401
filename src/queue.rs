use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify, oneshot};

use crate::protocol::{ExecutionRequest, ExecutorReply};

/// A request waiting for a runner, with the channel its reply goes back on
pub struct ExecutionJob {
    pub id: u64,
    pub request: ExecutionRequest,
    pub responder: oneshot::Sender<ExecutorReply>,
}

pub struct JobQueue {
    queue: Mutex<VecDeque<ExecutionJob>>,
    notify: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub async fn push(&self, job: ExecutionJob) {
        self.queue.lock().await.push_back(job);
        self.notify.notify_one();
    }

    pub async fn pop(&self) -> ExecutionJob {
        loop {
            if let Some(job) = self.queue.lock().await.pop_front() {
                return job;
            }
            self.notify.notified().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

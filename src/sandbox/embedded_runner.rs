use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use boa_engine::context::ContextBuilder;
use boa_engine::job::{FutureJob, JobQueue, NativeJob};
use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::{Context, JsResult, JsValue, NativeFunction, Source, js_string};

use crate::config::ExecutorConfig;
use crate::protocol::{ExecutionError, ExecutorReply};

use super::test_runner::{OUTCOME_QUERY, TIMER_TICK, parse_outcome};
use super::{SandboxRunner, TIMEOUT_ERROR, engine_error};

static CLOCK_ORIGIN: LazyLock<Instant> = LazyLock::new(Instant::now);

/// A runner that executes scripts in an in-process JavaScript engine
///
/// Every script gets a fresh engine context, so globals never survive a request.
/// Loop iteration and recursion limits stop runaway code inside a single
/// evaluation; the wall-clock timeout is checked between queued jobs and timers.
pub struct EmbeddedRunner {
    /// Unique identifier for this instance
    id: u8,
    timeout: Duration,
    loop_iteration_limit: u64,
    recursion_limit: usize,
}

impl SandboxRunner for EmbeddedRunner {
    fn build(id: u8, config: &ExecutorConfig) -> Result<Self> {
        log::info!("EmbeddedRunner {id} initialized successfully");
        Ok(Self {
            id,
            timeout: config.timeout_ms.as_duration(),
            loop_iteration_limit: config.loop_iteration_limit,
            recursion_limit: config.recursion_limit,
        })
    }

    fn id(&self) -> u8 {
        self.id
    }

    fn engine_name(&self) -> &'static str {
        "embedded"
    }

    fn execute_script(&self, script: &str) -> Result<ExecutorReply> {
        let deadline = Instant::now() + self.timeout;
        let (mut context, jobs) = self.create_context()?;

        if let Err(e) = context.eval(Source::from_bytes(script)) {
            log::info!("Runner {}: script aborted: {e}", self.id);
            return Ok(ExecutorReply::Error(engine_error(&e.to_string())));
        }

        loop {
            context.run_jobs();

            if let Some(failure) = jobs.take_failure() {
                log::info!("Runner {}: queued job aborted: {failure}", self.id);
                return Ok(ExecutorReply::Error(engine_error(&failure)));
            }

            if let Some(outcome) = read_outcome(&mut context)? {
                return parse_outcome(&outcome);
            }

            if Instant::now() >= deadline {
                log::info!("Runner {}: deadline exceeded", self.id);
                return Ok(ExecutorReply::Error(ExecutionError::new(
                    TIMEOUT_ERROR,
                    format!(
                        "Execution did not settle within {} ms",
                        self.timeout.as_millis()
                    ),
                )));
            }

            match context.eval(Source::from_bytes(TIMER_TICK)) {
                Ok(fired) if fired.as_boolean() == Some(true) => {}
                Ok(_) => {
                    log::info!("Runner {}: nothing left to run but not settled", self.id);
                    return Ok(ExecutorReply::Error(ExecutionError::new(
                        TIMEOUT_ERROR,
                        "Execution stopped before settling: a promise never resolved",
                    )));
                }
                Err(e) => {
                    log::info!("Runner {}: timer aborted: {e}", self.id);
                    return Ok(ExecutorReply::Error(engine_error(&e.to_string())));
                }
            }
        }
    }
}

impl EmbeddedRunner {
    /// Creates an engine context with limits and host functions installed
    fn create_context(&self) -> Result<(Context, Rc<RecordingJobQueue>)> {
        let jobs = Rc::new(RecordingJobQueue::default());
        let mut context = ContextBuilder::new()
            .job_queue(jobs.clone())
            .build()
            .map_err(|e| anyhow!("Failed to create engine context: {e}"))?;
        context
            .runtime_limits_mut()
            .set_loop_iteration_limit(self.loop_iteration_limit);
        context
            .runtime_limits_mut()
            .set_recursion_limit(self.recursion_limit);

        register_performance(&mut context)
            .map_err(|e| anyhow!("Failed to register host clock: {e}"))?;

        Ok((context, jobs))
    }
}

/// Promise job queue that keeps the first job error instead of dropping it
///
/// Uncatchable errors such as runtime limits abort the job that raised them;
/// the rest of the queue is discarded since the run is over.
#[derive(Default)]
struct RecordingJobQueue {
    jobs: RefCell<VecDeque<NativeJob>>,
    failure: RefCell<Option<String>>,
}

impl RecordingJobQueue {
    fn take_failure(&self) -> Option<String> {
        self.failure.borrow_mut().take()
    }
}

impl JobQueue for RecordingJobQueue {
    fn enqueue_promise_job(&self, job: NativeJob, _context: &mut Context) {
        self.jobs.borrow_mut().push_back(job);
    }

    fn run_jobs(&self, context: &mut Context) {
        loop {
            let Some(job) = self.jobs.borrow_mut().pop_front() else {
                return;
            };
            if let Err(e) = job.call(context) {
                self.jobs.borrow_mut().clear();
                self.failure.borrow_mut().get_or_insert_with(|| e.to_string());
                return;
            }
        }
    }

    fn enqueue_future_job(&self, _future: FutureJob, _context: &mut Context) {
        // no async host functions are registered
        log::warn!("Ignored a future job enqueued by the engine");
    }
}

fn register_performance(context: &mut Context) -> JsResult<()> {
    let mut initializer = ObjectInitializer::new(context);
    initializer.function(
        NativeFunction::from_fn_ptr(performance_now),
        js_string!("now"),
        0,
    );
    let performance = initializer.build();

    context.register_global_property(js_string!("performance"), performance, Attribute::all())?;
    Ok(())
}

fn performance_now(_this: &JsValue, _args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    Ok(JsValue::from(CLOCK_ORIGIN.elapsed().as_secs_f64() * 1000.0))
}

fn read_outcome(context: &mut Context) -> Result<Option<String>> {
    let value = context
        .eval(Source::from_bytes(OUTCOME_QUERY))
        .map_err(|e| anyhow!("Failed to read outcome: {e}"))?;

    Ok(value.as_string().map(|s| s.to_std_string_escaped()))
}

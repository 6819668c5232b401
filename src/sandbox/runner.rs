use anyhow::Result;

use crate::config::ExecutorConfig;
use crate::protocol::{ExecutionRequest, ExecutorReply};

use super::{ExecutorState, prepare_script};

/// Trait for different script execution engines
///
/// This trait abstracts the core functionality needed for running a synthesized
/// submission script, from an embedded interpreter to an external `node` process.
pub trait SandboxRunner: Send + Sync {
    /// Creates a new runner instance with the given ID
    fn build(id: u8, config: &ExecutorConfig) -> Result<Self>
    where
        Self: Sized;

    /// Identifier used in logs
    fn id(&self) -> u8;

    fn engine_name(&self) -> &'static str;

    /// Main entry point for running a request
    ///
    /// Transpiles both code blocks, synthesizes the script and executes it.
    /// Transpile failures become error replies without running anything.
    /// An `Err` means the runner itself failed, not the submission.
    fn run(&self, request: &ExecutionRequest) -> Result<ExecutorReply> {
        let id = self.id();
        ExecutorState::Validating.advance(id, ExecutorState::Transpiling);

        let script = match prepare_script(request) {
            Ok(script) => script,
            Err(error) => {
                log::info!("Runner {id}: {error}");
                ExecutorState::Transpiling.advance(id, ExecutorState::Responding);
                return Ok(ExecutorReply::Error(error));
            }
        };

        ExecutorState::Transpiling.advance(id, ExecutorState::Running);
        let reply = self.execute_script(&script)?;
        ExecutorState::Running.advance(id, ExecutorState::Responding);

        Ok(reply)
    }

    /// Runs a synthesized script and waits for it to settle
    fn execute_script(&self, script: &str) -> Result<ExecutorReply>;
}

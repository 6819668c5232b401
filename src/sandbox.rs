mod embedded_runner;
mod node_runner;
mod runner;
pub mod script;
pub mod test_runner;
pub mod transform;

// Re-export the trait and common types
pub use embedded_runner::EmbeddedRunner;
pub use node_runner::NodeRunner;
pub use runner::SandboxRunner;

use std::fmt;

use anyhow::Result;

use crate::config::{Engine, ExecutorConfig};
use crate::protocol::{ExecutionError, ExecutionRequest};

/// Name reported for blocks that fail to compile
pub const COMPILATION_ERROR: &str = "CompilationError";
/// Name reported when a run does not settle in time
pub const TIMEOUT_ERROR: &str = "TimeoutError";
/// Name reported when the runner itself breaks
pub const SYSTEM_ERROR: &str = "SystemError";

/// Stages a request passes through inside the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Idle,
    Validating,
    Transpiling,
    Running,
    Responding,
}

impl ExecutorState {
    pub fn advance(self, id: u8, next: ExecutorState) -> ExecutorState {
        log::debug!("Runner {id}: {self} -> {next}");
        next
    }
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::Transpiling => "transpiling",
            Self::Running => "running",
            Self::Responding => "responding",
        };
        f.write_str(name)
    }
}

/// Transpiles both blocks of a request and synthesizes the script to run
pub fn prepare_script(request: &ExecutionRequest) -> Result<String, ExecutionError> {
    let solution = transform::transpile(&request.code).map_err(|e| {
        ExecutionError::new(
            COMPILATION_ERROR,
            format!("Failed to compile solution code: {e}"),
        )
    })?;
    let tests = transform::transpile(&request.test_code).map_err(|e| {
        ExecutionError::new(COMPILATION_ERROR, format!("Failed to compile test code: {e}"))
    })?;

    Ok(script::synthesize(
        &solution.script,
        &tests.script,
        &request.test_cases,
        &request.function_name,
    ))
}

/// Splits `"TypeError: message"` style engine errors into name and message
pub fn engine_error(text: &str) -> ExecutionError {
    match text.split_once(": ") {
        Some((name, message))
            if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            ExecutionError::new(name, message)
        }
        _ => ExecutionError::new("Error", text),
    }
}

/// Creates a sandbox runner for the configured engine
///
/// The node engine requires the configured binary to be runnable; the embedded
/// engine is always available.
pub fn create_sandbox_runner(id: u8, config: &ExecutorConfig) -> Result<Box<dyn SandboxRunner>> {
    match config.engine {
        Engine::Embedded => {
            log::info!("Creating EmbeddedRunner {id}");
            let runner = EmbeddedRunner::build(id, config)?;
            Ok(Box::new(runner))
        }
        Engine::Node => {
            log::info!("Creating NodeRunner {id} ({})", config.node_binary);
            let runner = NodeRunner::build(id, config)?;
            Ok(Box::new(runner))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request(code: &str, test_code: &str) -> ExecutionRequest {
        ExecutionRequest {
            code: code.to_string(),
            test_code: test_code.to_string(),
            test_cases: vec![],
            function_name: "f".to_string(),
            request_id: None,
        }
    }

    #[test]
    fn test_prepare_script_names_failing_block() {
        let err = prepare_script(&request("function (", "it('x', () => {});")).unwrap_err();
        assert_eq!(err.name, COMPILATION_ERROR);
        assert!(err.message.starts_with("Failed to compile solution code"));

        let err = prepare_script(&request("function f() {}", "it('x', () => {")).unwrap_err();
        assert!(err.message.starts_with("Failed to compile test code"));
    }

    #[test]
    fn test_prepare_script_contains_both_blocks() {
        let script =
            prepare_script(&request("export function f() {}", "it('works', () => f());"))
                .unwrap();
        assert!(script.contains("function f() {}"));
        assert!(script.contains("it('works', () => f());"));
    }

    #[test]
    fn test_engine_error_split() {
        assert_eq!(
            engine_error("TypeError: x is not a function"),
            ExecutionError::new("TypeError", "x is not a function")
        );
        assert_eq!(
            engine_error("something odd: happened"),
            ExecutionError::new("Error", "something odd: happened")
        );
        assert_eq!(engine_error("plain"), ExecutionError::new("Error", "plain"));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ExecutorState::Transpiling.to_string(), "transpiling");
        assert_eq!(
            ExecutorState::Idle.advance(0, ExecutorState::Validating),
            ExecutorState::Validating
        );
    }
}

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Result, bail};
use tokio::time::timeout;

use crate::config::ExecutorConfig;
use crate::protocol::{ExecutionError, ExecutorReply};

use super::test_runner::parse_outcome;
use super::{SandboxRunner, SYSTEM_ERROR, TIMEOUT_ERROR};

/// Prefix of the stdout line carrying the settled outcome
const OUTCOME_MARKER: &str = "__CODEBOX_OUTCOME__";

/// A runner that executes scripts with an external `node` binary
///
/// The process is killed once the timeout elapses. It gets a scratch working
/// directory but no further isolation, so it is meant for hosts that already
/// confine the service.
pub struct NodeRunner {
    /// Unique identifier for this instance
    id: u8,
    /// Path to the working directory for this runner
    work_dir: PathBuf,
    node_binary: String,
    timeout: Duration,
}

impl SandboxRunner for NodeRunner {
    fn build(id: u8, config: &ExecutorConfig) -> Result<Self> {
        if !node_available(&config.node_binary) {
            bail!("`{}` is not runnable", config.node_binary);
        }

        let work_dir = Self::create_work_directory(id)?;

        log::info!("NodeRunner {id} initialized successfully");
        log::warn!("NodeRunner provides NO isolation beyond a scratch directory");

        Ok(Self {
            id,
            work_dir,
            node_binary: config.node_binary.clone(),
            timeout: config.timeout_ms.as_duration(),
        })
    }

    fn id(&self) -> u8 {
        self.id
    }

    fn engine_name(&self) -> &'static str {
        "node"
    }

    fn execute_script(&self, script: &str) -> Result<ExecutorReply> {
        self.cleanup_work_dir()?;

        let script_path = self.work_dir.join("main.js");
        fs::write(&script_path, with_epilogue(script))?;

        let execution = tokio::runtime::Handle::current()
            .block_on(async { timeout(self.timeout, self.execute_node_async(&script_path)).await });

        let output = match execution {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Ok(ExecutorReply::Error(ExecutionError::new(
                    SYSTEM_ERROR,
                    format!("Execution process error: {e}"),
                )));
            }
            Err(_) => {
                log::info!("Runner {}: node process killed after timeout", self.id);
                return Ok(ExecutorReply::Error(ExecutionError::new(
                    TIMEOUT_ERROR,
                    format!(
                        "Execution did not settle within {} ms",
                        self.timeout.as_millis()
                    ),
                )));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if let Some(outcome) = find_outcome(&stdout) {
            return parse_outcome(outcome);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = if output.status.success() {
            "Process exited before settling: a promise never resolved".to_string()
        } else {
            format!(
                "Process exited with code {:?}: {}",
                output.status.code(),
                stderr.trim()
            )
        };
        Ok(ExecutorReply::Error(ExecutionError::new(
            TIMEOUT_ERROR,
            message,
        )))
    }
}

impl NodeRunner {
    /// Creates a working directory for this runner instance
    fn create_work_directory(id: u8) -> Result<PathBuf> {
        let work_dir = std::env::temp_dir().join("codebox-node").join(id.to_string());
        fs::create_dir_all(&work_dir)?;
        Ok(work_dir)
    }

    /// Cleans the working directory
    fn cleanup_work_dir(&self) -> Result<()> {
        if self.work_dir.exists() {
            fs::remove_dir_all(&self.work_dir)?;
        }
        fs::create_dir_all(&self.work_dir)?;
        Ok(())
    }

    async fn execute_node_async(&self, script_path: &Path) -> Result<std::process::Output> {
        let child = tokio::process::Command::new(&self.node_binary)
            .arg(script_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(&self.work_dir)
            .kill_on_drop(true)
            .spawn()?;

        Ok(child.wait_with_output().await?)
    }
}

pub fn node_available(node_binary: &str) -> bool {
    std::process::Command::new(node_binary)
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Appends the code printing the settled outcome, once node drains its queue
fn with_epilogue(script: &str) -> String {
    format!(
        "{script}\n__codebox.settled.then(function (o) {{ process.stdout.write(\"\\n{OUTCOME_MARKER}\" + JSON.stringify(o) + \"\\n\"); }});\n"
    )
}

fn find_outcome(stdout: &str) -> Option<&str> {
    stdout
        .lines()
        .rev()
        .find_map(|line| line.strip_prefix(OUTCOME_MARKER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_outcome_takes_last_marker() {
        let stdout = format!(
            "noise\n{OUTCOME_MARKER}{{\"first\":1}}\nmore\n{OUTCOME_MARKER}{{\"kind\":\"x\"}}\n"
        );
        assert_eq!(find_outcome(&stdout), Some("{\"kind\":\"x\"}"));
        assert_eq!(find_outcome("nothing here"), None);
    }

    #[test]
    fn test_epilogue_prints_marker() {
        let script = with_epilogue("var a = 1;");
        assert!(script.starts_with("var a = 1;\n"));
        assert!(script.contains(OUTCOME_MARKER));
        assert!(script.contains("__codebox.settled.then"));
    }

    #[test]
    fn test_missing_binary_is_rejected() {
        let config = ExecutorConfig {
            node_binary: "definitely-not-a-node-binary".to_string(),
            ..ExecutorConfig::default()
        };
        assert!(NodeRunner::build(9, &config).is_err());
    }
}

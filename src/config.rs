use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "codebox", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the executor service
    Serve {
        /// Path to the configuration file
        #[arg(long = "config", short = 'c')]
        config_path: Option<PathBuf>,

        /// Override the number of executor workers
        #[arg(long = "workers", short = 'w')]
        workers: Option<u8>,
    },

    /// Submit a solution to a running executor and print the outcome
    Run {
        /// Base URL of the executor service
        #[arg(long, default_value = "http://127.0.0.1:12345")]
        executor: String,

        /// Origin presented to the executor
        #[arg(long, default_value = "http://localhost:3000")]
        origin: String,

        /// Solution source file
        #[arg(long)]
        code: PathBuf,

        /// Test module source file
        #[arg(long)]
        tests: PathBuf,

        /// JSON file holding an array of argument tuples
        #[arg(long)]
        cases: Option<PathBuf>,

        /// Function invoked once per argument tuple
        #[arg(long = "function", short = 'f', default_value = "")]
        function_name: String,

        /// Seconds to wait for a reply
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },
}

/// Load the configuration from the specified file, or fall back to defaults
pub fn load_config(path: Option<&PathBuf>) -> std::io::Result<Config> {
    match path {
        Some(path) => {
            let file = std::fs::File::open(path)?;
            let reader = std::io::BufReader::new(file);
            serde_json::from_reader(reader).map_err(|e| e.into())
        }
        None => Ok(Config::default()),
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

#[derive(Deserialize, Debug, Default)]
pub struct ServerConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
    pub max_payload_bytes: Option<usize>,
}

impl ServerConfig {
    pub fn address(&self) -> String {
        self.bind_address
            .clone()
            .unwrap_or_else(|| "127.0.0.1".to_string())
    }

    pub fn port(&self) -> u16 {
        self.bind_port.unwrap_or(12345)
    }

    pub fn payload_limit(&self) -> usize {
        self.max_payload_bytes.unwrap_or(256 * 1024)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ExecutorConfig {
    pub engine: Engine,
    pub workers: u8,
    /// Hostname the executor is served under; loopback names disable the origin check
    pub hostname: Option<String>,
    pub allowed_origins: Vec<String>,
    pub timeout_ms: MilliSecond,
    pub loop_iteration_limit: u64,
    pub recursion_limit: usize,
    pub node_binary: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            engine: Engine::Embedded,
            workers: 2,
            hostname: None,
            allowed_origins: Vec::new(),
            timeout_ms: MilliSecond(5000),
            loop_iteration_limit: 10_000_000,
            recursion_limit: 512,
            node_binary: "node".to_string(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MilliSecond(pub u64);

impl MilliSecond {
    pub fn as_duration(self) -> std::time::Duration {
        std::time::Duration::from_millis(self.0)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    Embedded,
    Node,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialization() {
        let file = std::fs::File::open("data/example.json").unwrap();
        let reader = std::io::BufReader::new(file);
        let config: Config = serde_json::from_reader(reader).unwrap();
        assert_eq!(config.server.bind_address, Some("127.0.0.1".to_string()));
        assert_eq!(config.executor.engine, Engine::Embedded);
        assert_eq!(config.executor.allowed_origins.len(), 2);
        assert_eq!(config.executor.timeout_ms, MilliSecond(5000));
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config: Config = serde_json::from_str(r#"{"executor": {"workers": 4}}"#).unwrap();
        assert_eq!(config.server.bind_port, None);
        assert_eq!(config.executor.workers, 4);
        assert_eq!(config.executor.engine, Engine::Embedded);
        assert_eq!(config.executor.recursion_limit, 512);
        assert!(config.executor.allowed_origins.is_empty());
    }

    #[test]
    fn test_node_engine_name() {
        let config: Config = serde_json::from_str(r#"{"executor": {"engine": "node"}}"#).unwrap();
        assert_eq!(config.executor.engine, Engine::Node);
    }
}

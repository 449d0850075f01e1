//! External process execution
//!
//! [`run_command`] spawns the job process, drains stdout and stderr while it
//! runs, forwards periodic snapshots to an [`OutputSink`] and enforces the
//! job timeout.

pub mod subprocess;
pub mod venv;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use subprocess::run_command;
pub use venv::ensure_venv;

/// Everything needed to start a job process
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory of the child (current dir when `None`)
    pub working_directory: Option<PathBuf>,
    pub env_vars: Vec<(String, String)>,
    pub timeout: Duration,
    /// Cap per stream; output beyond it is drained and dropped
    pub max_output_bytes: usize,
    /// Interval between [`OutputSink`] snapshots
    pub snapshot_interval: Duration,
}

impl RunRequest {
    /// Split a full command line into program and arguments
    pub fn from_command(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            working_directory: None,
            env_vars: Vec::new(),
            timeout: Duration::from_secs(3600),
            max_output_bytes: 10 * 1024 * 1024,
            snapshot_interval: Duration::from_secs(1),
        })
    }
}

/// Captured output of a finished process
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    /// `-1` when the process was killed by a signal
    pub exit_code: i32,
    pub duration_ms: u64,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Executable not found: {0}")]
    NotFound(String),

    #[error("Process timed out after {elapsed_ms}ms")]
    Timeout {
        elapsed_ms: u64,
        stdout: String,
        stderr: String,
    },

    #[error("Virtual environment setup failed: {0}")]
    Venv(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Receives the output captured so far while a process runs
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn snapshot(&self, stdout: &str, stderr: &str);
}

/// Sink discarding every snapshot
pub struct NoopSink;

#[async_trait]
impl OutputSink for NoopSink {
    async fn snapshot(&self, _stdout: &str, _stderr: &str) {}
}

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use super::SandboxError;

/// Captured result of one external process invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseOutcome {
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub exit_error: bool,
    /// Either stream exceeded the capture limit
    pub truncated: bool,
}

/// Trait for the process execution backend
///
/// Implementations spawn exactly one process per call and block the calling
/// task until it exits or the time limit fires. A nonzero exit or a timeout is
/// a normal outcome; only failing to launch or reap the process is an error.
#[async_trait]
pub trait PhaseRunner: Send + Sync {
    async fn run_phase(
        &self,
        program: &str,
        args: &[String],
        working_dir: &Path,
        time_limit: Duration,
    ) -> Result<PhaseOutcome, SandboxError>;
}

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::ByteSize;

use super::{PhaseOutcome, PhaseRunner, SandboxError};

const TRUNCATION_MARKER: &str = "\n[output truncated]";
const READ_CHUNK: usize = 8192;

/// How long to wait for the output pipes to close once the process is gone
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Runs phases as plain child processes
///
/// ProcessRunner only enforces the wall-clock limit and an output cap. The
/// child is placed in its own process group so that a timeout takes down
/// anything it spawned, not just the direct child.
pub struct ProcessRunner {
    output_limit: usize,
}

impl ProcessRunner {
    pub fn new(output_limit: ByteSize) -> Self {
        Self {
            output_limit: usize::try_from(output_limit.0).unwrap_or(usize::MAX),
        }
    }
}

#[async_trait]
impl PhaseRunner for ProcessRunner {
    async fn run_phase(
        &self,
        program: &str,
        args: &[String],
        working_dir: &Path,
        time_limit: Duration,
    ) -> Result<PhaseOutcome, SandboxError> {
        let mut std_cmd = std::process::Command::new(program);
        std_cmd
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_cmd.process_group(0);
        }
        let mut cmd = Command::from(std_cmd);
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| SandboxError::Spawn {
            program: program.to_string(),
            source,
        })?;
        // Declared after `child` so it drops first: if this future is
        // cancelled, the group dies while the leader is still unreaped.
        let mut group = ProcessGroup::new(child.id());

        let limit = self.output_limit;
        let stdout = spawn_capture(child.stdout.take(), limit);
        let stderr = spawn_capture(child.stderr.take(), limit);

        let wait_result = match timeout(time_limit, child.wait()).await {
            Ok(status) => status.map(Some),
            Err(_) => {
                log::warn!(
                    "`{program}` exceeded {} ms, killing it",
                    time_limit.as_millis()
                );
                terminate(&mut child, &mut group).await.map(|_| None)
            }
        };
        // The leader is reaped by now. Stragglers keep the group id alive, so
        // this only reaches an unrelated group if the group emptied and the id
        // was reused in between; that window is accepted.
        group.kill();

        let status = wait_result.map_err(|source| SandboxError::Wait {
            program: program.to_string(),
            source,
        })?;

        let (stdout, stderr) = tokio::join!(collect(stdout), collect(stderr));

        let mut outcome = PhaseOutcome {
            truncated: stdout.truncated || stderr.truncated,
            stdout: stdout.into_text(),
            stderr: stderr.into_text(),
            timed_out: status.is_none(),
            exit_error: false,
        };

        match status {
            None => {
                if outcome.stderr.is_empty() {
                    outcome.stderr =
                        format!("Time limit exceeded ({} ms)", time_limit.as_millis());
                }
            }
            Some(status) if !status.success() => {
                outcome.exit_error = true;
                if outcome.stderr.is_empty() {
                    outcome.stderr = describe_exit(status);
                }
            }
            Some(_) => {}
        }

        log::debug!(
            "`{program}` finished: timed_out={}, exit_error={}, stdout={}B, stderr={}B",
            outcome.timed_out,
            outcome.exit_error,
            outcome.stdout.len(),
            outcome.stderr.len()
        );

        Ok(outcome)
    }
}

/// Process group of one phase, SIGKILLed at most once
///
/// Dropping an unkilled group kills it, which covers a cancelled request.
struct ProcessGroup {
    pid: Option<u32>,
}

impl ProcessGroup {
    fn new(pid: Option<u32>) -> Self {
        Self { pid }
    }

    fn kill(&mut self) {
        if let Some(pid) = self.pid.take() {
            kill_group(pid);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if self.pid.is_some() {
            log::warn!("Phase dropped before completion, killing its process group");
            self.kill();
        }
    }
}

#[derive(Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

impl Captured {
    fn into_text(self) -> String {
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.truncated {
            text.push_str(TRUNCATION_MARKER);
        }
        text
    }
}

/// A reader task and the buffer it fills
struct Capture {
    sink: Arc<Mutex<Captured>>,
    task: JoinHandle<()>,
}

fn spawn_capture<R>(pipe: Option<R>, limit: usize) -> Option<Capture>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let pipe = pipe?;
    let sink = Arc::new(Mutex::new(Captured::default()));
    let task = tokio::spawn(read_capped(pipe, limit, sink.clone()));
    Some(Capture { sink, task })
}

/// Reads a pipe to EOF, keeping at most `limit` bytes in `sink`
///
/// Bytes past the limit are still consumed so the child never blocks on a
/// full pipe.
async fn read_capped<R: AsyncRead + Unpin>(mut pipe: R, limit: usize, sink: Arc<Mutex<Captured>>) {
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        let n = match pipe.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                log::warn!("Failed to read process output: {e}");
                break;
            }
        };

        let mut captured = sink.lock();
        let room = limit.saturating_sub(captured.bytes.len());
        if n > room {
            captured.bytes.extend_from_slice(&chunk[..room]);
            captured.truncated = true;
        } else {
            captured.bytes.extend_from_slice(&chunk[..n]);
        }
    }
}

async fn collect(capture: Option<Capture>) -> Captured {
    let Some(Capture { sink, mut task }) = capture else {
        return Captured::default();
    };

    match timeout(DRAIN_GRACE, &mut task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::error!("Output reader task failed: {e}"),
        Err(_) => {
            task.abort();
            log::warn!("Output pipe still open after process exit, keeping what was read");
        }
    }

    std::mem::take(&mut *sink.lock())
}

async fn terminate(child: &mut Child, group: &mut ProcessGroup) -> std::io::Result<ExitStatus> {
    group.kill();
    // Fails only if the child already exited, which is fine.
    let _ = child.start_kill();
    child.wait().await
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions. The negative pid
    // addresses the group created by `process_group(0)` at spawn.
    unsafe {
        libc::kill(-pid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

fn describe_exit(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("Process exited with code: {code}");
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("Process terminated by signal: {signal}");
        }
    }

    "Process exited abnormally".to_string()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Instant;

    use super::*;

    fn runner() -> ProcessRunner {
        ProcessRunner::new(ByteSize(1024 * 1024))
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    fn cwd() -> PathBuf {
        std::env::temp_dir()
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        let outcome = runner()
            .run_phase("sh", &sh("echo hello"), &cwd(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome.stdout, "hello\n");
        assert_eq!(outcome.stderr, "");
        assert!(!outcome.timed_out);
        assert!(!outcome.exit_error);
    }

    #[tokio::test]
    async fn test_nonzero_exit_keeps_stderr() {
        let outcome = runner()
            .run_phase("sh", &sh("echo oops >&2; exit 3"), &cwd(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome.stderr, "oops\n");
        assert!(outcome.exit_error);
        assert!(!outcome.timed_out);
    }

    #[tokio::test]
    async fn test_nonzero_exit_without_stderr_is_described() {
        let outcome = runner()
            .run_phase("sh", &sh("exit 7"), &cwd(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(outcome.exit_error);
        assert_eq!(outcome.stderr, "Process exited with code: 7");
    }

    #[tokio::test]
    async fn test_timeout_kills_and_keeps_partial_output() {
        let start = Instant::now();
        let outcome = runner()
            .run_phase(
                "sh",
                &sh("echo partial; sleep 30"),
                &cwd(),
                Duration::from_millis(300),
            )
            .await
            .unwrap();
        assert!(outcome.timed_out);
        assert!(!outcome.exit_error);
        assert_eq!(outcome.stdout, "partial\n");
        assert_eq!(outcome.stderr, "Time limit exceeded (300 ms)");
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let outcome = ProcessRunner::new(ByteSize(16))
            .run_phase("sh", &sh("printf '%0100d' 0"), &cwd(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(outcome.truncated);
        assert_eq!(outcome.stdout, format!("{}{TRUNCATION_MARKER}", "0".repeat(16)));
    }

    #[tokio::test]
    async fn test_runs_in_working_directory() {
        let dir = std::env::temp_dir().join(format!("jcomp-runner-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("marker.txt"), "here").unwrap();

        let outcome = runner()
            .run_phase("cat", &["marker.txt".to_string()], &dir, Duration::from_secs(5))
            .await;
        std::fs::remove_dir_all(&dir).unwrap();

        assert_eq!(outcome.unwrap().stdout, "here");
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let result = runner()
            .run_phase("jcomp-no-such-binary", &[], &cwd(), Duration::from_secs(5))
            .await;
        match result {
            Err(SandboxError::Spawn { program, .. }) => assert_eq!(program, "jcomp-no-such-binary"),
            other => panic!("expected spawn error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_output_survives_held_pipe() {
        // the detached sleep leaves the group and keeps stdout open past the grace period
        let start = Instant::now();
        let outcome = runner()
            .run_phase(
                "sh",
                &sh("echo done; setsid sleep 5 &"),
                &cwd(),
                Duration::from_secs(10),
            )
            .await
            .unwrap();
        assert!(!outcome.timed_out);
        assert_eq!(outcome.stdout, "done\n");
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_cancelled_phase_kills_descendants() {
        let pid_file =
            std::env::temp_dir().join(format!("jcomp-runner-pid-{}", uuid::Uuid::new_v4()));
        let script = format!("sleep 30 & echo $! > {}; wait", pid_file.display());

        let cancelled = timeout(
            Duration::from_millis(500),
            runner().run_phase("sh", &sh(&script), &cwd(), Duration::from_secs(30)),
        )
        .await;
        assert!(cancelled.is_err());
        tokio::time::sleep(Duration::from_millis(300)).await;

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        std::fs::remove_file(&pid_file).unwrap();
        assert!(!process_alive(pid.trim()), "descendant {pid} survived");
    }

    // missing and zombie processes both count as gone
    #[cfg(target_os = "linux")]
    fn process_alive(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit_once(") ")
                .is_some_and(|(_, rest)| !rest.starts_with('Z')),
            Err(_) => false,
        }
    }
}

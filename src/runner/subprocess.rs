//! Spawn, drain and time out a child process

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use super::{OutputSink, RunError, RunOutput, RunRequest};

type SharedBuffer = Arc<Mutex<Vec<u8>>>;

/// Run a process to completion, capturing stdout and stderr.
///
/// Both pipes are drained by spawned tasks so a chatty child never blocks.
/// The timeout covers the process and the draining of its pipes, which
/// background children can keep open after the process itself exits. On
/// timeout the whole process group is killed and the partial output is
/// returned inside [`RunError::Timeout`].
pub async fn run_command(request: &RunRequest, sink: &dyn OutputSink) -> Result<RunOutput, RunError> {
    let mut cmd = Command::new(&request.program);
    cmd.args(&request.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);
    for (key, value) in &request.env_vars {
        cmd.env(key, value);
    }
    if let Some(dir) = &request.working_directory {
        cmd.current_dir(dir);
    }

    let start = Instant::now();
    let deadline = tokio::time::Instant::now() + request.timeout;
    let mut child = cmd.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => RunError::NotFound(request.program.clone()),
        _ => RunError::Io(e),
    })?;
    let pid = child.id();
    tracing::debug!("Spawned {} (pid {:?})", request.program, pid);

    let stdout_buf: SharedBuffer = Arc::default();
    let stderr_buf: SharedBuffer = Arc::default();
    let mut stdout_task = tokio::spawn(drain(child.stdout.take(), stdout_buf.clone(), request.max_output_bytes));
    let mut stderr_task = tokio::spawn(drain(child.stderr.take(), stderr_buf.clone(), request.max_output_bytes));

    let waited = tokio::time::timeout_at(deadline, async {
        let mut ticker = tokio::time::interval(request.snapshot_interval);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                status = child.wait() => break status,
                _ = ticker.tick() => {
                    sink.snapshot(&lossy(&stdout_buf), &lossy(&stderr_buf)).await;
                }
            }
        }
    })
    .await;

    let status = match waited {
        Ok(Ok(status)) => {
            let drained = tokio::time::timeout_at(deadline, async {
                let _ = (&mut stdout_task).await;
                let _ = (&mut stderr_task).await;
            })
            .await;
            drained.ok().map(|_| status)
        }
        Ok(Err(e)) => {
            kill_process_group(pid);
            return Err(RunError::Io(e));
        }
        Err(_elapsed) => None,
    };

    match status {
        Some(status) => Ok(RunOutput {
            stdout: lossy(&stdout_buf),
            stderr: lossy(&stderr_buf),
            exit_code: status.code().unwrap_or(-1),
            duration_ms: start.elapsed().as_millis() as u64,
        }),
        None => {
            let elapsed_ms = start.elapsed().as_millis() as u64;
            tracing::warn!("{} timed out after {}ms, killing it", request.program, elapsed_ms);
            kill_process_group(pid);
            let _ = child.kill().await;
            // the pipes close once every member of the group is gone
            if tokio::time::timeout(Duration::from_secs(1), &mut stdout_task).await.is_err() {
                stdout_task.abort();
            }
            if tokio::time::timeout(Duration::from_secs(1), &mut stderr_task).await.is_err() {
                stderr_task.abort();
            }
            Err(RunError::Timeout {
                elapsed_ms,
                stdout: lossy(&stdout_buf),
                stderr: lossy(&stderr_buf),
            })
        }
    }
}

/// Kill the process group led by `pid`, grandchildren included
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    // Safety: plain syscall on a group id we created with `process_group(0)`.
    let ret = unsafe { libc::kill(-pid, libc::SIGKILL) };
    if ret != 0 {
        tracing::debug!("Process group {} already gone", pid);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

fn lossy(buffer: &SharedBuffer) -> String {
    match buffer.lock() {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(poisoned) => String::from_utf8_lossy(&poisoned.into_inner()).into_owned(),
    }
}

/// Read a stream to its end, keeping at most `cap` bytes
async fn drain<R: AsyncRead + Unpin>(handle: Option<R>, buffer: SharedBuffer, cap: usize) {
    let Some(mut reader) = handle else {
        return;
    };
    let mut chunk = [0u8; 8192];
    loop {
        let read = match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        if let Ok(mut bytes) = buffer.lock() {
            let room = cap.saturating_sub(bytes.len());
            bytes.extend_from_slice(&chunk[..read.min(room)]);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::runner::NoopSink;
    use async_trait::async_trait;

    fn request(program: &str, args: &[&str]) -> RunRequest {
        let mut command = vec![program.to_string()];
        command.extend(args.iter().map(|a| a.to_string()));
        let mut request = RunRequest::from_command(&command).unwrap();
        request.timeout = Duration::from_secs(10);
        request.snapshot_interval = Duration::from_millis(20);
        request
    }

    struct Recorder(Mutex<Vec<String>>);

    #[async_trait]
    impl OutputSink for Recorder {
        async fn snapshot(&self, stdout: &str, _stderr: &str) {
            self.0.lock().unwrap().push(stdout.to_string());
        }
    }

    #[tokio::test]
    async fn test_captures_both_streams() {
        let output = run_command(&request("sh", &["-c", "echo out; echo err >&2; exit 3"]), &NoopSink)
            .await
            .unwrap();
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert_eq!(output.exit_code, 3);
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_working_directory_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = request("sh", &["-c", "pwd; echo $JOB_FLAVOUR"]);
        req.working_directory = Some(dir.path().to_path_buf());
        req.env_vars.push(("JOB_FLAVOUR".to_string(), "plain".to_string()));
        let output = run_command(&req, &NoopSink).await.unwrap();
        let canonical = dir.path().canonicalize().unwrap();
        let mut lines = output.stdout.lines();
        assert_eq!(std::path::Path::new(lines.next().unwrap()).canonicalize().unwrap(), canonical);
        assert_eq!(lines.next(), Some("plain"));
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let mut req = request("sh", &["-c", "printf 'abcdefghij'"]);
        req.max_output_bytes = 4;
        let output = run_command(&req, &NoopSink).await.unwrap();
        assert_eq!(output.stdout, "abcd");
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let mut req = request("sh", &["-c", "echo started; sleep 5"]);
        req.timeout = Duration::from_millis(300);
        let err = run_command(&req, &NoopSink).await.unwrap_err();
        match err {
            RunError::Timeout { elapsed_ms, stdout, .. } => {
                assert!(elapsed_ms >= 300);
                assert_eq!(stdout, "started\n");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_covers_background_children() {
        let mut req = request("sh", &["-c", "sleep 4 & echo hi"]);
        req.timeout = Duration::from_millis(300);
        let started = Instant::now();
        let err = run_command(&req, &NoopSink).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(3));
        match err {
            RunError::Timeout { stdout, .. } => assert_eq!(stdout, "hi\n"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_detached_children_are_reaped_within_deadline() {
        let req = request("sh", &["-c", "sleep 0.2 & echo done"]);
        let output = run_command(&req, &NoopSink).await.unwrap();
        assert_eq!(output.stdout, "done\n");
        assert!(output.success());
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = run_command(&request("scriptly-no-such-binary", &[]), &NoopSink)
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_snapshots_are_forwarded() {
        let recorder = Recorder(Mutex::new(Vec::new()));
        run_command(&request("sh", &["-c", "echo first; sleep 0.3; echo second"]), &recorder)
            .await
            .unwrap();
        let snapshots = recorder.0.lock().unwrap();
        assert!(snapshots.iter().any(|s| s == "first\n"));
    }
}

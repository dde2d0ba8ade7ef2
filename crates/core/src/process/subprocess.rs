//! Spawn, capture and cancel a single child process.
//!
//! [`run_command`] reads stdout and stderr line by line in two spawned tasks
//! while the calling task waits for the process exit, then for both streams
//! to close. Cancellation is honoured during both waits: a descendant that
//! keeps a pipe open after the child exits is killed with the rest of the
//! tree.

use std::future::Future;
use std::pin::{pin, Pin};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use super::executor::{ProcessError, ProcessResult, ProcessSpec};
use super::tree::{self, GroupGuard};

/// Maximum stdout or stderr size kept per stream (10 MiB).
///
/// Lines past the limit are still drained from the pipe so the child never
/// blocks on a full buffer; they are just not stored.
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// How long to wait for the output streams to close after a kill.
const KILL_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Output of one stream, filled by its reader task.
type Captured = Arc<Mutex<String>>;

/// Run `spec` until it exits or `cancel` fires.
///
/// On cancellation the whole process tree is killed (best effort) and
/// [`ProcessError::Canceled`] carries whatever output was captured so far.
/// An already-cancelled token never spawns the process.
pub async fn run_command(
    spec: &ProcessSpec,
    cancel: &CancellationToken,
) -> Result<ProcessResult, ProcessError> {
    if cancel.is_cancelled() {
        return Err(ProcessError::Canceled {
            stdout: String::new(),
            stderr: String::new(),
        });
    }

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .current_dir(&spec.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    tree::isolate(&mut cmd);

    let start = Instant::now();

    let mut child = cmd.spawn().map_err(|source| ProcessError::LaunchFailed {
        program: spec.program.clone(),
        source,
    })?;
    let pid = child.id();
    let mut group = GroupGuard::new(pid);
    tracing::debug!(pid, program = %spec.program.display(), "Process started");

    let stdout = Captured::default();
    let stderr = Captured::default();
    let readers = [
        tokio::spawn(capture_lines(child.stdout.take(), Arc::clone(&stdout))),
        tokio::spawn(capture_lines(child.stderr.take(), Arc::clone(&stderr))),
    ];
    let aborts: Vec<AbortHandle> = readers.iter().map(|r| r.abort_handle()).collect();
    let mut drained = pin!(async move {
        for reader in readers {
            if let Err(e) = reader.await {
                tracing::debug!(error = %e, "Output reader task failed");
            }
        }
    });

    let exited = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        status = child.wait() => Some(status),
    };

    let Some(status) = exited else {
        tracing::warn!(pid, "Cancellation requested, killing process tree");
        tree::kill_process_tree(&mut child);
        if let Err(e) = child.wait().await {
            tracing::debug!(pid, error = %e, "Failed to reap killed process");
        }
        group.disarm();
        return Err(canceled(drained, &aborts, &stdout, &stderr).await);
    };
    let status = status.map_err(ProcessError::Wait)?;

    // Descendants may still hold the pipes after the child itself exited.
    let closed = tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = drained.as_mut() => true,
    };
    if !closed {
        tracing::warn!(pid, "Cancellation requested, killing leftover descendants");
        if let Some(pid) = pid {
            tree::kill_group(pid);
        }
        group.disarm();
        return Err(canceled(drained, &aborts, &stdout, &stderr).await);
    }
    group.disarm();

    let exit_code = status.code().unwrap_or(-1);
    tracing::debug!(
        pid,
        exit_code,
        duration_ms = start.elapsed().as_millis() as u64,
        "Process exited",
    );

    Ok(ProcessResult {
        exit_code,
        stdout: take(&stdout),
        stderr: take(&stderr),
    })
}

/// Append every line of `stream` to `captured` as it arrives.
async fn capture_lines<R: AsyncRead + Unpin>(stream: Option<R>, captured: Captured) {
    let Some(stream) = stream else {
        return;
    };

    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let mut buf = captured.lock().unwrap_or_else(PoisonError::into_inner);
                if buf.len() >= MAX_OUTPUT_BYTES {
                    continue;
                }
                let text = String::from_utf8_lossy(&line);
                buf.push_str(text.trim_end_matches(['\r', '\n']));
                buf.push('\n');
            }
            Err(e) => {
                tracing::debug!(error = %e, "Output stream closed with error");
                break;
            }
        }
    }
}

/// Give the readers of a killed tree a moment to hit end of stream, then
/// build the cancellation error from what was captured. A stream still held
/// open by a process the kill could not reach is abandoned.
async fn canceled(
    drained: Pin<&mut impl Future<Output = ()>>,
    aborts: &[AbortHandle],
    stdout: &Captured,
    stderr: &Captured,
) -> ProcessError {
    if tokio::time::timeout(KILL_DRAIN_TIMEOUT, drained).await.is_err() {
        tracing::debug!("Output stream still open after kill, abandoning it");
        for abort in aborts {
            abort.abort();
        }
    }
    ProcessError::Canceled {
        stdout: take(stdout),
        stderr: take(stderr),
    }
}

fn take(captured: &Captured) -> String {
    std::mem::take(&mut *captured.lock().unwrap_or_else(PoisonError::into_inner))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(all(test, unix))]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;
    use crate::process::test_helpers::write_script;

    fn spec_for(script: &Path, dir: &Path) -> ProcessSpec {
        ProcessSpec {
            program: script.to_path_buf(),
            args: vec!["-v".into(), "-i".into(), "input.xml".into()],
            working_dir: dir.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn captures_both_streams_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = write_script(
            dir.path(),
            "dice.sh",
            "echo one\necho oops >&2\necho two\necho again >&2\n",
        );
        let result = run_command(&spec_for(&script, dir.path()), &CancellationToken::new())
            .await
            .expect("run");
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "one\ntwo\n");
        assert_eq!(result.stderr, "oops\nagain\n");
    }

    #[tokio::test]
    async fn passes_arguments_and_working_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = write_script(dir.path(), "dice.sh", "echo \"$@\"\npwd\n");
        let result = run_command(&spec_for(&script, dir.path()), &CancellationToken::new())
            .await
            .expect("run");

        let mut lines = result.stdout.lines();
        assert_eq!(lines.next(), Some("-v -i input.xml"));
        let expected = dir.path().canonicalize().expect("canonicalize");
        let actual = Path::new(lines.next().expect("pwd line"))
            .canonicalize()
            .expect("canonicalize pwd");
        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_result_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = write_script(dir.path(), "dice.sh", "echo bad input >&2\nexit 7\n");
        let result = run_command(&spec_for(&script, dir.path()), &CancellationToken::new())
            .await
            .expect("run");
        assert_eq!(result.exit_code, 7);
        assert!(!result.success());
        assert_eq!(result.stderr, "bad input\n");
    }

    #[tokio::test]
    async fn missing_program_fails_to_launch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = spec_for(&dir.path().join("no-such-dice"), dir.path());
        let err = run_command(&spec, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_matches!(err, ProcessError::LaunchFailed { .. });
    }

    #[tokio::test]
    async fn non_executable_program_fails_to_launch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let plain = dir.path().join("dice.txt");
        std::fs::write(&plain, "echo hi\n").expect("write");
        let err = run_command(&spec_for(&plain, dir.path()), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_matches!(err, ProcessError::LaunchFailed { .. });
    }

    #[tokio::test]
    async fn cancellation_kills_process_and_descendants() {
        let dir = tempfile::tempdir().expect("tempdir");
        let marker = dir.path().join("grandchild-finished");
        let script = write_script(
            dir.path(),
            "dice.sh",
            &format!(
                "echo started\n(sleep 2; touch '{}') &\nsleep 30\n",
                marker.display()
            ),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let err = tokio::time::timeout(
            Duration::from_secs(10),
            run_command(&spec_for(&script, dir.path()), &cancel),
        )
        .await
        .expect("cancellation should end the run promptly")
        .unwrap_err();

        assert_matches!(err, ProcessError::Canceled { stdout, .. } if stdout == "started\n");

        // The backgrounded grandchild belonged to the killed group.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!marker.exists(), "grandchild outlived cancellation");
    }

    #[tokio::test]
    async fn cancellation_reaches_descendant_holding_output_open() {
        let dir = tempfile::tempdir().expect("tempdir");
        // The script exits at once but its background sleep inherits stdout.
        let script = write_script(dir.path(), "dice.sh", "(sleep 20) &\necho done\n");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            run_command(&spec_for(&script, dir.path()), &cancel),
        )
        .await
        .expect("cancellation should end the run promptly")
        .unwrap_err();

        assert_matches!(err, ProcessError::Canceled { stdout, .. } if stdout == "done\n");
    }

    #[tokio::test]
    async fn cancelled_token_never_spawns() {
        let dir = tempfile::tempdir().expect("tempdir");
        let marker = dir.path().join("spawned");
        let script = write_script(
            dir.path(),
            "dice.sh",
            &format!("touch '{}'\n", marker.display()),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = run_command(&spec_for(&script, dir.path()), &cancel)
            .await
            .unwrap_err();

        assert_matches!(err, ProcessError::Canceled { stdout, stderr } if stdout.is_empty() && stderr.is_empty());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn dropping_the_run_kills_the_process_group() {
        let dir = tempfile::tempdir().expect("tempdir");
        let marker = dir.path().join("grandchild-finished");
        let script = write_script(
            dir.path(),
            "dice.sh",
            &format!(
                "(sleep 2; touch '{}') &\nsleep 30\n",
                marker.display()
            ),
        );
        let cancel = CancellationToken::new();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(300),
            run_command(&spec_for(&script, dir.path()), &cancel),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!marker.exists(), "grandchild outlived the dropped run");
    }

    #[tokio::test]
    async fn drains_output_larger_than_pipe_buffer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = write_script(
            dir.path(),
            "dice.sh",
            "i=0\nwhile [ $i -lt 5000 ]; do echo \"line $i of the correlation log\"; i=$((i+1)); done\n",
        );
        let result = run_command(&spec_for(&script, dir.path()), &CancellationToken::new())
            .await
            .expect("run");
        assert_eq!(result.stdout.lines().count(), 5000);
        assert!(result.stdout.ends_with("line 4999 of the correlation log\n"));
    }
}

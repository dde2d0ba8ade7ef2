//! Process-tree termination.
//!
//! On Unix every child is started as the leader of a new process group, so
//! signalling the negated pid reaches the child and all of its descendants,
//! even after the leader itself has exited. On Windows `taskkill /T` walks
//! the tree instead. Failures are logged and otherwise ignored: the job is
//! being abandoned either way.

use tokio::process::{Child, Command};

/// Prepare `cmd` so that its process tree can be killed as a unit.
#[cfg(unix)]
pub fn isolate(cmd: &mut Command) {
    cmd.process_group(0);
}

#[cfg(not(unix))]
pub fn isolate(_cmd: &mut Command) {}

/// Forcibly terminate `child` and everything it spawned.
pub fn kill_process_tree(child: &mut Child) {
    let Some(pid) = child.id() else {
        // Already reaped.
        return;
    };

    kill_group(pid);

    if let Err(e) = child.start_kill() {
        tracing::debug!(pid, error = %e, "Direct kill failed");
    }
}

/// Kill every process in the tree rooted at `pid`.
#[cfg(unix)]
pub fn kill_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) only sends a signal; no memory is shared with the callee.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        tracing::debug!(
            pid,
            error = %std::io::Error::last_os_error(),
            "Process group kill failed",
        );
    }
}

/// Kill every process in the tree rooted at `pid`.
#[cfg(windows)]
pub fn kill_group(pid: u32) {
    let result = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn();
    if let Err(e) = result {
        tracing::debug!(pid, error = %e, "taskkill failed");
    }
}

#[cfg(not(any(unix, windows)))]
pub fn kill_group(_pid: u32) {}

/// Kills the process group of a spawned child when dropped while armed.
///
/// Held for the lifetime of a job so that abandoning the job future (for
/// example when the caller drops a run) still takes down every descendant,
/// not only the direct child covered by `kill_on_drop`.
#[derive(Debug)]
pub struct GroupGuard {
    pid: Option<u32>,
}

impl GroupGuard {
    pub fn new(pid: Option<u32>) -> Self {
        Self { pid }
    }

    /// Leave the tree alone on drop.
    pub fn disarm(&mut self) {
        self.pid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Some(pid) = self.pid.take() {
            tracing::debug!(pid, "Job abandoned, killing process group");
            kill_group(pid);
        }
    }
}

//! Job execution interface and shared types.
//!
//! Defines [`JobRunner`], the trait the orchestrator drives, along with
//! [`ProcessSpec`], [`ProcessResult`] and [`ProcessError`].

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use super::subprocess;

/// A fully resolved command line plus working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub working_dir: PathBuf,
}

impl ProcessSpec {
    /// DICe invocation for one job: `<exe> -v -i <input description>`.
    pub fn dice(exe: &Path, input_path: &Path, job_dir: &Path) -> Self {
        Self {
            program: exe.to_path_buf(),
            args: vec!["-v".into(), "-i".into(), input_path.as_os_str().to_os_string()],
            working_dir: job_dir.to_path_buf(),
        }
    }

    /// Human-readable command line, quoting the program and any argument
    /// that contains whitespace or a path separator.
    pub fn command_line(&self) -> String {
        let mut line = format!("\"{}\"", self.program.display());
        for arg in &self.args {
            let arg = arg.to_string_lossy();
            line.push(' ');
            if arg.contains(char::is_whitespace) || arg.contains(['/', '\\']) {
                line.push('"');
                line.push_str(&arg);
                line.push('"');
            } else {
                line.push_str(&arg);
            }
        }
        line
    }
}

/// Captured outcome of a process that ran to its natural exit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessResult {
    /// Process exit code (`-1` if terminated by a signal).
    pub exit_code: i32,
    /// Every stdout line, each terminated by `\n`.
    pub stdout: String,
    /// Every stderr line, each terminated by `\n`.
    pub stderr: String,
}

impl ProcessResult {
    /// DICe signals success with exit code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Errors that can occur while supervising a process.
///
/// A non-zero exit code is not an error; it is reported through
/// [`ProcessResult::exit_code`].
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to start {}: {source}", program.display())]
    LaunchFailed {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed while waiting for process: {0}")]
    Wait(#[source] std::io::Error),

    /// The cancellation token fired and the process tree was killed.
    #[error("process was canceled")]
    Canceled { stdout: String, stderr: String },
}

/// Runs one job's process to completion or cancellation.
pub trait JobRunner: Send + Sync {
    fn run(
        &self,
        spec: &ProcessSpec,
        cancel: &CancellationToken,
    ) -> impl std::future::Future<Output = Result<ProcessResult, ProcessError>> + Send;
}

/// Production runner: spawns the real DICe executable.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiceRunner;

impl JobRunner for DiceRunner {
    async fn run(
        &self,
        spec: &ProcessSpec,
        cancel: &CancellationToken,
    ) -> Result<ProcessResult, ProcessError> {
        subprocess::run_command(spec, cancel).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dice_spec_arguments() {
        let spec = ProcessSpec::dice(
            Path::new("/opt/dice/dice"),
            Path::new("/out/job/dice_input.xml"),
            Path::new("/out/job"),
        );
        assert_eq!(spec.program, PathBuf::from("/opt/dice/dice"));
        assert_eq!(
            spec.args,
            vec![
                OsString::from("-v"),
                OsString::from("-i"),
                OsString::from("/out/job/dice_input.xml")
            ]
        );
        assert_eq!(spec.working_dir, PathBuf::from("/out/job"));
    }

    #[test]
    fn command_line_quotes_paths() {
        let spec = ProcessSpec::dice(
            Path::new("/opt/dice/dice"),
            Path::new("/out/my job/dice_input.xml"),
            Path::new("/out/my job"),
        );
        assert_eq!(
            spec.command_line(),
            r#""/opt/dice/dice" -v -i "/out/my job/dice_input.xml""#
        );
    }

    #[test]
    fn success_is_exit_code_zero() {
        assert!(ProcessResult::default().success());
        let failed = ProcessResult {
            exit_code: 7,
            ..Default::default()
        };
        assert!(!failed.success());
    }

    #[test]
    fn display_launch_failed() {
        let err = ProcessError::LaunchFailed {
            program: PathBuf::from("/missing/dice"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        let text = err.to_string();
        assert!(text.starts_with("failed to start /missing/dice"));
        assert!(text.contains("no such file"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn display_canceled() {
        let err = ProcessError::Canceled {
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "process was canceled");
    }
}

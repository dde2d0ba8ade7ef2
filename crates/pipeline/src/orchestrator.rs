//! Sequential batch orchestrator.
//!
//! [`Orchestrator::run`] walks one configuration snapshot through
//! `Idle -> Building -> Running -> {Done | Canceled | Error | Empty}`:
//! it lists both folders, plans the pairs, and for each pair writes the job
//! descriptor and runs DICe through a [`JobRunner`]. Every state change is
//! mirrored onto the [`EventBus`] while the state lock is held, so observers
//! see events in the same order the state changed.
//!
//! Only one run may be active at a time; a second call is rejected, not
//! queued. Cancellation is checked before each job starts and also kills the
//! process of the job in flight.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use dicebatch_core::config::BatchConfiguration;
use dicebatch_core::descriptor;
use dicebatch_core::naming;
use dicebatch_core::process::{JobRunner, ProcessError, ProcessSpec};
use dicebatch_core::status::RunStatus;
use dicebatch_events::{EventBus, RunEvent};
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::{BatchError, EmptyReason, Rejection, RunOutcome};
use crate::pairs::build_pairs;
use crate::state::RunState;

/// Drives batch runs and owns their observable [`RunState`].
pub struct Orchestrator<R> {
    runner: R,
    template_path: PathBuf,
    state: RwLock<RunState>,
    bus: EventBus,
    /// Precondition gate: set for the whole duration of a run.
    running: AtomicBool,
    /// Cancellation token of the active run, fresh for every run.
    cancel: Mutex<Option<CancellationToken>>,
}

impl<R: JobRunner> Orchestrator<R> {
    /// Create an orchestrator that copies `template_path` into every job.
    pub fn new(runner: R, template_path: impl Into<PathBuf>) -> Self {
        Self::with_bus(runner, template_path, EventBus::default())
    }

    /// Like [`new`](Self::new), publishing onto an existing bus.
    pub fn with_bus(runner: R, template_path: impl Into<PathBuf>, bus: EventBus) -> Self {
        Self {
            runner,
            template_path: template_path.into(),
            state: RwLock::new(RunState {
                log: vec!["Ready.".to_string()],
                ..RunState::default()
            }),
            bus,
            running: AtomicBool::new(false),
            cancel: Mutex::new(None),
        }
    }

    pub fn template_path(&self) -> &Path {
        &self.template_path
    }

    /// Subscribe to every future [`RunEvent`].
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.bus.subscribe()
    }

    /// Copy of the current run state.
    pub async fn snapshot(&self) -> RunState {
        let mut state = self.state.read().await.clone();
        if state.is_running && !self.is_running() {
            state.is_running = false;
            if !state.status.is_terminal() {
                state.status = RunStatus::Canceled;
            }
        }
        state
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the active run to stop.
    ///
    /// The job in flight has its process tree killed and no further job is
    /// started. Returns `false` when no run is active.
    pub fn cancel(&self) -> bool {
        match self.cancel_slot().as_ref() {
            Some(token) => {
                tracing::info!("Batch cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Execute one batch for `config`.
    ///
    /// Never panics on job failures: every way a run can end is reported
    /// through the returned [`RunOutcome`] and mirrored into the run state.
    pub async fn run(&self, config: &BatchConfiguration) -> RunOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return self.reject(Rejection::AlreadyRunning).await;
        }
        if let Err(e) = config.validate() {
            self.running.store(false, Ordering::SeqCst);
            return self
                .reject(Rejection::InvalidConfiguration(e.to_string()))
                .await;
        }

        let cancel = CancellationToken::new();
        *self.cancel_slot() = Some(cancel.clone());
        let mut guard = RunGuard {
            running: &self.running,
            cancel_slot: &self.cancel,
            state: &self.state,
            bus: &self.bus,
            token: cancel.clone(),
            finished: false,
        };

        tracing::info!(
            exe = %config.dice_exe_path.display(),
            folder_a = %config.ref_folder_a.display(),
            folder_b = %config.ref_folder_b.display(),
            output = %config.output_folder.display(),
            subset_size = config.subset_size,
            step_size = config.step_size,
            threads = config.threads,
            skip_self_compare = config.skip_self_compare,
            "Batch run started",
        );
        self.begin().await;

        let outcome = match self.execute(config, &cancel).await {
            Ok(outcome) => outcome,
            Err(e) => RunOutcome::Failed(e),
        };

        self.finish(&outcome).await;
        guard.finished = true;
        outcome
    }

    // -----------------------------------------------------------------------
    // Run phases
    // -----------------------------------------------------------------------

    async fn execute(
        &self,
        config: &BatchConfiguration,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, BatchError> {
        let images_a = list_folder(&config.ref_folder_a)?;
        let images_b = list_folder(&config.ref_folder_b)?;

        if images_a.is_empty() || images_b.is_empty() {
            self.log("No images found in one or both reference folders.")
                .await;
            return Ok(RunOutcome::Empty(EmptyReason::NoImages));
        }

        let pairs = build_pairs(&images_a, &images_b, config.skip_self_compare);
        self.log(format!(
            "Found {} images in A, {} images in B.",
            images_a.len(),
            images_b.len()
        ))
        .await;
        self.log(format!("Total comparisons queued: {}", pairs.len()))
            .await;

        if pairs.is_empty() {
            self.log("Nothing to run (pairs list is empty).").await;
            return Ok(RunOutcome::Empty(EmptyReason::NoPairs));
        }

        let total = pairs.len();
        self.set_status(RunStatus::Running {
            completed: 0,
            total,
        })
        .await;

        for (index, pair) in pairs.iter().enumerate() {
            if cancel.is_cancelled() {
                return Ok(RunOutcome::Canceled);
            }

            let job = descriptor::build_job(pair, config, &self.template_path).await?;
            if cancel.is_cancelled() {
                return Ok(RunOutcome::Canceled);
            }
            let spec = ProcessSpec::dice(&config.dice_exe_path, &job.input_path, &job.dir);

            self.log(format!(
                "=== Running: {}  vs  {} ===",
                pair.reference_name(),
                pair.deformed_name()
            ))
            .await;
            self.log(format!("Cmd: {}", spec.command_line())).await;
            tracing::info!(job = %job.name, index = index + 1, total, "Running DICe job");

            let result = match self.runner.run(&spec, cancel).await {
                Ok(result) => result,
                Err(ProcessError::Canceled { .. }) => {
                    tracing::warn!(job = %job.name, "DICe job killed by cancellation");
                    self.log(format!("[CANCELED] {}", job.name)).await;
                    return Ok(RunOutcome::Canceled);
                }
                Err(e) => return Err(e.into()),
            };

            if result.success() {
                tracing::info!(job = %job.name, "DICe job succeeded");
                self.log("[OK]").await;
            } else {
                tracing::warn!(job = %job.name, exit_code = result.exit_code, "DICe job failed");
                self.log(format!("[ERROR] ExitCode={}", result.exit_code))
                    .await;
                self.log_block(&result.stderr).await;
            }
            self.log_block(&result.stdout).await;

            self.set_progress(index + 1, total).await;
        }

        Ok(RunOutcome::Done)
    }

    async fn begin(&self) {
        let mut state = self.state.write().await;
        state.is_running = true;
        state.progress = 0.0;
        state.status = RunStatus::Building;
        self.bus.publish(RunEvent::RunningChanged(true));
        self.bus.publish(RunEvent::Progress {
            completed: 0,
            total: 0,
            fraction: 0.0,
        });
        self.bus.publish(RunEvent::StatusChanged(RunStatus::Building));
    }

    async fn finish(&self, outcome: &RunOutcome) {
        match outcome {
            RunOutcome::Done => self.log("All jobs completed.").await,
            RunOutcome::Canceled => self.log("Canceled.").await,
            RunOutcome::Failed(e) => {
                tracing::error!(error = %e, "Batch run aborted");
                self.log(format!("[EXCEPTION] {e}")).await;
            }
            RunOutcome::Empty(_) | RunOutcome::Rejected(_) => {}
        }

        let status = outcome.status().unwrap_or(RunStatus::Idle);
        tracing::info!(status = %status, "Batch run finished");

        let mut state = self.state.write().await;
        state.status = status;
        state.is_running = false;
        self.bus.publish(RunEvent::StatusChanged(status));
        self.bus.publish(RunEvent::RunningChanged(false));
    }

    async fn reject(&self, reason: Rejection) -> RunOutcome {
        tracing::warn!(reason = %reason, "Batch run rejected");
        self.log(format!("Cannot run: {reason}")).await;
        RunOutcome::Rejected(reason)
    }

    // -----------------------------------------------------------------------
    // State mutation (each publishes its event under the lock)
    // -----------------------------------------------------------------------

    async fn log(&self, line: impl Into<String>) {
        let line = line.into();
        let mut state = self.state.write().await;
        state.log.push(line.clone());
        self.bus.publish(RunEvent::Log(line));
    }

    /// Append captured process output, one log line per output line.
    /// Blank output adds nothing.
    async fn log_block(&self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        for line in text.trim_end().lines() {
            self.log(line).await;
        }
    }

    async fn set_status(&self, status: RunStatus) {
        let mut state = self.state.write().await;
        state.status = status;
        self.bus.publish(RunEvent::StatusChanged(status));
    }

    async fn set_progress(&self, completed: usize, total: usize) {
        let fraction = completed as f64 / total as f64;
        let status = RunStatus::Running { completed, total };

        let mut state = self.state.write().await;
        state.progress = fraction;
        state.status = status;
        self.bus.publish(RunEvent::Progress {
            completed,
            total,
            fraction,
        });
        self.bus.publish(RunEvent::StatusChanged(status));
    }

    fn cancel_slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        lock_slot(&self.cancel)
    }
}

fn lock_slot(slot: &Mutex<Option<CancellationToken>>) -> MutexGuard<'_, Option<CancellationToken>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Releases the single-run gate and the cancellation handle when a run ends.
///
/// A run whose future is dropped before `finish` (a caller-side timeout or
/// `select!`) has its token cancelled and is recorded as `Canceled`, so the
/// orchestrator accepts the next run.
struct RunGuard<'a> {
    running: &'a AtomicBool,
    cancel_slot: &'a Mutex<Option<CancellationToken>>,
    state: &'a RwLock<RunState>,
    bus: &'a EventBus,
    token: CancellationToken,
    finished: bool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!("Batch run dropped before completion, canceling");
            self.token.cancel();
            // The dropped future no longer holds the lock; a concurrent
            // snapshot reader may, in which case `snapshot` reconciles.
            if let Ok(mut state) = self.state.try_write() {
                state.is_running = false;
                state.status = RunStatus::Canceled;
                self.bus.publish(RunEvent::StatusChanged(RunStatus::Canceled));
                self.bus.publish(RunEvent::RunningChanged(false));
            }
        }
        *lock_slot(self.cancel_slot) = None;
        self.running.store(false, Ordering::SeqCst);
    }
}

fn list_folder(folder: &Path) -> Result<Vec<PathBuf>, BatchError> {
    naming::list_images(folder).map_err(|source| BatchError::Enumerate {
        folder: folder.to_path_buf(),
        source,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

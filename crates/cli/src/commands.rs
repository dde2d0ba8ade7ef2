//! Subcommand handlers.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use dicebatch_core::config::BatchConfiguration;
use dicebatch_core::descriptor;
use dicebatch_core::naming;
use dicebatch_core::process::DiceRunner;
use dicebatch_core::settings::SettingsStore;
use dicebatch_events::{EventBus, RunEvent};
use dicebatch_pipeline::pairs::build_pairs;
use dicebatch_pipeline::{Orchestrator, RunOutcome};
use tokio::sync::broadcast;

use crate::cli::{Cli, Command, ConfigArgs, RunArgs, SettingsCommand};

/// Conventional exit status for a run stopped by Ctrl-C.
const EXIT_CANCELED: u8 = 130;

pub async fn dispatch(cli: Cli) -> anyhow::Result<ExitCode> {
    let store = settings_store(cli.settings)?;
    match cli.command {
        Command::Run(args) => run(&store, args).await,
        Command::Pairs(args) => pairs(&store, &args),
        Command::Settings(SettingsCommand::Show) => {
            print_settings(&store.load())?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Settings(SettingsCommand::Set(args)) => {
            let mut config = store.load();
            args.apply(&mut config);
            store.save(&config).context("failed to save settings")?;
            print_settings(&config)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Settings(SettingsCommand::Path) => {
            println!("{}", store.path().display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn settings_store(path: Option<PathBuf>) -> anyhow::Result<SettingsStore> {
    match path {
        Some(path) => Ok(SettingsStore::at(path)),
        None => SettingsStore::default_location().context("failed to locate settings file"),
    }
}

fn print_settings(config: &BatchConfiguration) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn run(store: &SettingsStore, args: RunArgs) -> anyhow::Result<ExitCode> {
    let mut config = store.load();
    args.config.apply(&mut config);
    if args.save {
        store.save(&config).context("failed to save settings")?;
    }

    let template = match args.template {
        Some(path) => path,
        None => descriptor::default_template_path()
            .context("failed to resolve the parameters template location")?,
    };

    let orchestrator = Arc::new(Orchestrator::with_bus(
        DiceRunner,
        template,
        EventBus::new(args.event_buffer),
    ));
    let printer = tokio::spawn(print_events(orchestrator.subscribe(), args.json));

    let interrupt = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, canceling batch");
                orchestrator.cancel();
            }
        }
    });

    let outcome = orchestrator.run(&config).await;

    // Drop every sender so the printer drains the channel and stops.
    interrupt.abort();
    let _ = interrupt.await;
    drop(orchestrator);
    printer.await.context("event printer task failed")?;

    Ok(exit_code(&outcome))
}

async fn print_events(mut rx: broadcast::Receiver<RunEvent>, json: bool) {
    loop {
        match rx.recv().await {
            Ok(event) if json => println!("{}", event.to_json_line()),
            Ok(RunEvent::Log(line)) => println!("{line}"),
            Ok(RunEvent::StatusChanged(status)) => eprintln!("[{status}]"),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event printer lagged behind");
                eprintln!("{}", lag_notice(skipped));
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn lag_notice(skipped: u64) -> String {
    format!("[{skipped} events skipped; raise --event-buffer to keep the full log]")
}

/// The reason for a failed or rejected run is already in the printed log.
fn exit_code(outcome: &RunOutcome) -> ExitCode {
    match outcome {
        RunOutcome::Done | RunOutcome::Empty(_) => ExitCode::SUCCESS,
        RunOutcome::Canceled => ExitCode::from(EXIT_CANCELED),
        RunOutcome::Failed(_) | RunOutcome::Rejected(_) => ExitCode::FAILURE,
    }
}

// ---------------------------------------------------------------------------
// pairs
// ---------------------------------------------------------------------------

fn pairs(store: &SettingsStore, args: &ConfigArgs) -> anyhow::Result<ExitCode> {
    let mut config = store.load();
    args.apply(&mut config);

    let folder_a = list_folder(&config.ref_folder_a)?;
    let folder_b = list_folder(&config.ref_folder_b)?;
    let pairs = build_pairs(&folder_a, &folder_b, config.skip_self_compare);

    for pair in &pairs {
        println!(
            "{}\t{}\t{}",
            pair.job_name(),
            pair.reference.display(),
            pair.deformed.display()
        );
    }
    eprintln!(
        "Found {} images in A, {} images in B. {} comparisons planned.",
        folder_a.len(),
        folder_b.len(),
        pairs.len()
    );
    Ok(ExitCode::SUCCESS)
}

fn list_folder(folder: &Path) -> anyhow::Result<Vec<PathBuf>> {
    naming::list_images(folder)
        .with_context(|| format!("failed to list images in {}", folder.display()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use dicebatch_core::descriptor::DescriptorError;
    use dicebatch_pipeline::{BatchError, EmptyReason, Rejection};

    #[test]
    fn exit_codes_follow_outcome() {
        assert_eq!(exit_code(&RunOutcome::Done), ExitCode::SUCCESS);
        assert_eq!(
            exit_code(&RunOutcome::Empty(EmptyReason::NoImages)),
            ExitCode::SUCCESS
        );
        assert_eq!(exit_code(&RunOutcome::Canceled), ExitCode::from(130));
        assert_eq!(
            exit_code(&RunOutcome::Failed(BatchError::Descriptor(
                DescriptorError::TemplateMissing {
                    path: "/x/dice_params.xml".into(),
                }
            ))),
            ExitCode::FAILURE
        );
        assert_eq!(
            exit_code(&RunOutcome::Rejected(Rejection::AlreadyRunning)),
            ExitCode::FAILURE
        );
    }

    #[tokio::test]
    async fn small_buffer_reports_skipped_events() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.publish(RunEvent::Log(format!("line {i}")));
        }

        assert_eq!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        );
        assert_eq!(
            lag_notice(3),
            "[3 events skipped; raise --event-buffer to keep the full log]"
        );
        assert_eq!(rx.recv().await, Ok(RunEvent::Log("line 3".into())));
    }

    #[tokio::test]
    async fn rejected_run_reason_comes_from_the_log_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let orchestrator = Orchestrator::new(DiceRunner, dir.path().join("dice_params.xml"));
        let mut rx = orchestrator.subscribe();

        let outcome = orchestrator.run(&BatchConfiguration::default()).await;

        assert_eq!(exit_code(&outcome), ExitCode::FAILURE);
        let mut reasons = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let RunEvent::Log(line) = event {
                reasons.push(line);
            }
        }
        assert_eq!(reasons, vec!["Cannot run: Validation failed: DICe executable is not set"]);
    }

    #[test]
    fn settings_set_then_show_round_trips_through_the_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SettingsStore::at(dir.path().join("nested").join("settings.json"));
        let mut config = store.load();
        ConfigArgs {
            subset_size: Some(21),
            folder_a: Some("/data/a".into()),
            ..Default::default()
        }
        .apply(&mut config);
        store.save(&config).expect("save");

        let loaded = store.load();
        assert_eq!(loaded.subset_size, 21);
        assert_eq!(loaded.ref_folder_a, PathBuf::from("/data/a"));
        assert_eq!(loaded.step_size, 5);
    }

    #[test]
    fn pairs_fails_for_missing_folder() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SettingsStore::at(dir.path().join("settings.json"));
        let args = ConfigArgs {
            folder_a: Some(dir.path().join("missing")),
            folder_b: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let err = pairs(&store, &args).expect_err("missing folder");
        assert!(err.to_string().starts_with("failed to list images in"));
    }

    #[test]
    fn pairs_succeeds_for_existing_folders() {
        let dir = tempfile::tempdir().expect("tempdir");
        for sub in ["a", "b"] {
            std::fs::create_dir(dir.path().join(sub)).expect("mkdir");
        }
        std::fs::write(dir.path().join("a").join("img1.png"), b"").expect("image");
        std::fs::write(dir.path().join("b").join("img2.tif"), b"").expect("image");
        let store = SettingsStore::at(dir.path().join("settings.json"));
        let args = ConfigArgs {
            folder_a: Some(dir.path().join("a")),
            folder_b: Some(dir.path().join("b")),
            ..Default::default()
        };
        assert_eq!(pairs(&store, &args).expect("pairs"), ExitCode::SUCCESS);
    }
}

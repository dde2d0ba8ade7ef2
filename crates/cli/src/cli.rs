//! Command-line surface of `dice-batch`.

use std::path::PathBuf;

use clap::builder::RangedU64ValueParser;
use clap::{Args, Parser, Subcommand};
use dicebatch_core::config::BatchConfiguration;

/// Default number of run events buffered for the terminal printer.
pub const DEFAULT_EVENT_BUFFER: usize = 65_536;

#[derive(Debug, Parser)]
#[command(
    name = "dice-batch",
    version,
    about = "Run DICe over every image pair of two reference folders"
)]
pub struct Cli {
    /// Settings file to read and write instead of the per-user default.
    #[arg(long, global = true, env = "DICE_BATCH_SETTINGS", value_name = "FILE")]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run every planned comparison sequentially.
    Run(RunArgs),
    /// List the planned comparisons without running DICe.
    Pairs(ConfigArgs),
    /// Inspect or update the stored settings.
    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(Debug, Subcommand)]
pub enum SettingsCommand {
    /// Print the effective settings as JSON.
    Show,
    /// Merge the given values into the stored settings.
    Set(ConfigArgs),
    /// Print the settings file location.
    Path,
}

/// Per-invocation overrides layered over the stored settings.
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    /// DICe executable.
    #[arg(long, env = "DICE_EXE", value_name = "PATH")]
    pub exe: Option<PathBuf>,

    /// Folder of reference images.
    #[arg(long, value_name = "DIR")]
    pub folder_a: Option<PathBuf>,

    /// Folder of deformed images.
    #[arg(long, value_name = "DIR")]
    pub folder_b: Option<PathBuf>,

    /// Root under which one directory per job is created.
    #[arg(long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    #[arg(long)]
    pub subset_size: Option<u32>,

    #[arg(long)]
    pub step_size: Option<u32>,

    #[arg(long)]
    pub threads: Option<u32>,

    /// Skip pairs whose file names match (case-insensitive).
    #[arg(long, value_name = "BOOL")]
    pub skip_self_compare: Option<bool>,
}

impl ConfigArgs {
    /// Overwrite every field of `config` that was given on the command line.
    pub fn apply(&self, config: &mut BatchConfiguration) {
        if let Some(exe) = &self.exe {
            config.dice_exe_path = exe.clone();
        }
        if let Some(folder) = &self.folder_a {
            config.ref_folder_a = folder.clone();
        }
        if let Some(folder) = &self.folder_b {
            config.ref_folder_b = folder.clone();
        }
        if let Some(output) = &self.output {
            config.output_folder = output.clone();
        }
        if let Some(value) = self.subset_size {
            config.subset_size = value;
        }
        if let Some(value) = self.step_size {
            config.step_size = value;
        }
        if let Some(value) = self.threads {
            config.threads = value;
        }
        if let Some(value) = self.skip_self_compare {
            config.skip_self_compare = value;
        }
    }
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Parameters template copied into every job directory. Defaults to
    /// `dice_params.xml` next to this executable.
    #[arg(long, env = "DICE_PARAMS_TEMPLATE", value_name = "FILE")]
    pub template: Option<PathBuf>,

    /// Persist the effective settings before running.
    #[arg(long)]
    pub save: bool,

    /// Stream run events as JSON lines on stdout.
    #[arg(long)]
    pub json: bool,

    /// Run events buffered for the printer. Every line of DICe output is
    /// one event; a printer that falls further behind skips events.
    #[arg(
        long,
        env = "DICE_BATCH_EVENT_BUFFER",
        value_name = "EVENTS",
        default_value_t = DEFAULT_EVENT_BUFFER,
        value_parser = RangedU64ValueParser::<usize>::new().range(1..=(1 << 24)),
    )]
    pub event_buffer: usize,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

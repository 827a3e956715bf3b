use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use pipeline::PipelineConfig;
use reading_core::{ReaderName, TrackerConfig};

#[derive(Parser, Debug)]
#[command(name = "reading-batch", version, about = "Run reading jobs on a batch backend")]
pub struct Args {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit a manifest's jobs and wait for them to finish.
    Run(RunArgs),

    /// Show the live or archived state of a run.
    Status {
        #[arg(long)]
        run_id: String,

        /// SurrealDB endpoint; defaults to READING_DB_ENDPOINT or mem://
        #[arg(long)]
        db: Option<String>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Run reader programs on this machine.
    Local,
    /// Scripted backend for dry runs.
    Simulated,
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Manifest JSON describing the run.
    #[arg(short, long)]
    pub manifest: PathBuf,

    /// Comma-separated reader selection; overrides the manifest.
    #[arg(long, value_delimiter = ',')]
    pub readers: Vec<String>,

    #[arg(short, long, default_value_t = 8)]
    pub concurrency: usize,

    #[arg(long)]
    pub global_timeout_secs: Option<u64>,

    #[arg(long, default_value_t = 10)]
    pub poll_interval_secs: u64,

    /// SurrealDB endpoint, e.g. rocksdb://path; defaults to READING_DB_ENDPOINT or mem://
    #[arg(long)]
    pub db: Option<String>,

    #[arg(long, value_enum, default_value_t = Backend::Local)]
    pub backend: Backend,

    /// Reader program for the local backend, as NAME=PROGRAM.
    #[arg(long = "reader", value_parser = parse_reader_program)]
    pub reader_programs: Vec<(ReaderName, PathBuf)>,

    /// Working directory for local reader programs.
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Object storage root on disk; otherwise taken from STORAGE_* variables.
    #[arg(long)]
    pub storage_root: Option<PathBuf>,

    #[arg(long, default_value_t = 0)]
    pub stagger_ms: u64,

    #[arg(long)]
    pub max_active_jobs: Option<usize>,

    #[arg(long)]
    pub stall_timeout_secs: Option<u64>,

    /// Copy every job's log to object storage.
    #[arg(long)]
    pub stash_logs: bool,

    /// Also write the summary JSON to this file.
    #[arg(long)]
    pub summary_out: Option<PathBuf>,

    /// Log at debug level.
    #[arg(short, long)]
    pub verbose: bool,
}

impl RunArgs {
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            tracker: TrackerConfig {
                concurrency: self.concurrency.max(1),
                poll_interval_ms: self.poll_interval_secs.saturating_mul(1000),
                max_active_jobs: self.max_active_jobs,
                stall_timeout_secs: self.stall_timeout_secs,
                ..TrackerConfig::default()
            },
            global_timeout_secs: self.global_timeout_secs,
            stagger_ms: self.stagger_ms,
            stash_logs: self.stash_logs,
        }
    }
}

fn parse_reader_program(s: &str) -> Result<(ReaderName, PathBuf), String> {
    let (name, program) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=PROGRAM, got {s:?}"))?;
    let name: ReaderName = name.trim().parse().map_err(|e| format!("{e}"))?;
    if program.trim().is_empty() {
        return Err(format!("no program given for reader {name}"));
    }
    Ok((name, PathBuf::from(program.trim())))
}

pub fn parse_args() -> Args {
    Args::parse()
}

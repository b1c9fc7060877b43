//! CLI command definitions for songbatch.
//!
//! `create` submits every prompt as a generation job, `poll` waits for the
//! jobs and downloads their audio, `run` does both, and `status` prints a
//! summary of the ledger without touching the network.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use crate::api::{HttpSongApi, SongApi};
use crate::archive::Archiver;
use crate::config::Settings;
use crate::error::BatchError;
use crate::flows::{CreationFlow, PollingFlow};
use crate::ledger::{JobStatus, Ledger};
use crate::prompt_source::PromptBatch;

const CONCURRENCY_NOTE: &str = "One process owns a ledger file at a time; running two \
commands against the same ledger concurrently is not supported.";

/// Bulk song generation through a hosted generation API.
#[derive(Parser)]
#[command(name = "songbatch")]
#[command(about = "Create, poll and download batches of generated songs")]
#[command(version)]
#[command(
    long_about = "songbatch submits prompts from a JSON file as generation jobs, tracks every job in a ledger file, polls until audio is ready and downloads it.\n\nExample usage:\n  songbatch create --prompts prompts.json\n  songbatch poll --max-wait 1800\n  songbatch run --prompts prompts.json"
)]
#[command(after_help = CONCURRENCY_NOTE)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Submit every prompt variant as a generation job.
    Create(CreateArgs),

    /// Poll pending jobs and download finished audio.
    Poll(PollArgs),

    /// Create, then poll.
    Run(RunArgs),

    /// Print a summary of the ledger.
    Status(StatusArgs),
}

/// Options shared by every command.
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// YAML settings file.
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Ledger file tracking every job.
    #[arg(long)]
    pub ledger: Option<PathBuf>,
}

/// Connection options for commands that talk to the API.
#[derive(Args, Debug, Clone, Default)]
pub struct ApiArgs {
    /// API bearer token.
    #[arg(long, env = "SUNO_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// API base URL.
    #[arg(long, env = "SUNO_API_URL")]
    pub api_url: Option<String>,

    /// Directory for timestamped snapshots.
    #[arg(long)]
    pub archive_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct CreateOptions {
    /// Prompt file (JSON).
    #[arg(short = 'p', long)]
    pub prompts: Option<PathBuf>,

    /// Continue an existing ledger: skip pairs already created or failed.
    #[arg(long)]
    pub resume: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct PollOptions {
    /// Output directory for downloaded audio.
    #[arg(short = 'o', long)]
    pub out: Option<PathBuf>,

    /// Total polling budget in seconds.
    #[arg(long)]
    pub max_wait: Option<u64>,

    /// Seconds between status checks of a pending job.
    #[arg(long)]
    pub interval: Option<f64>,
}

/// Arguments for `songbatch create`.
#[derive(Args, Debug)]
pub struct CreateArgs {
    #[command(flatten)]
    pub common: CommonArgs,
    #[command(flatten)]
    pub api: ApiArgs,
    #[command(flatten)]
    pub create: CreateOptions,
}

/// Arguments for `songbatch poll`.
#[derive(Args, Debug)]
pub struct PollArgs {
    #[command(flatten)]
    pub common: CommonArgs,
    #[command(flatten)]
    pub api: ApiArgs,
    #[command(flatten)]
    pub poll: PollOptions,
}

/// Arguments for `songbatch run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub common: CommonArgs,
    #[command(flatten)]
    pub api: ApiArgs,
    #[command(flatten)]
    pub create: CreateOptions,
    #[command(flatten)]
    pub poll: PollOptions,
}

/// Arguments for `songbatch status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Output JSON to stdout.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Create(args) => {
            let settings = build_settings(&args.common, Some(&args.api), Some(&args.create), None)?;
            let api = connect(&settings)?;
            run_create(api, &settings, args.create.resume).await?;
        }
        Commands::Poll(args) => {
            let settings = build_settings(&args.common, Some(&args.api), None, Some(&args.poll))?;
            let api = connect(&settings)?;
            run_poll(api, &settings).await?;
        }
        Commands::Run(args) => {
            let settings = build_settings(
                &args.common,
                Some(&args.api),
                Some(&args.create),
                Some(&args.poll),
            )?;
            let api = connect(&settings)?;
            run_create(api.clone(), &settings, args.create.resume).await?;
            run_poll(api, &settings).await?;
        }
        Commands::Status(args) => {
            let settings = build_settings(&args.common, None, None, None)?;
            run_status(&settings, args.json)?;
        }
    }
    Ok(())
}

/// Layers CLI flags over the settings file, then validates the result.
fn build_settings(
    common: &CommonArgs,
    api: Option<&ApiArgs>,
    create: Option<&CreateOptions>,
    poll: Option<&PollOptions>,
) -> Result<Settings, BatchError> {
    let mut settings = Settings::load(common.config.as_deref())?;

    if let Some(ledger) = &common.ledger {
        settings.paths.ledger_file = ledger.clone();
    }
    if let Some(api) = api {
        if let Some(key) = &api.api_key {
            settings.api.api_key = Some(key.clone());
        }
        if let Some(url) = &api.api_url {
            settings.api.base_url = url.clone();
        }
        if let Some(dir) = &api.archive_dir {
            settings.paths.archive_dir = dir.clone();
        }
    }
    if let Some(prompts) = create.and_then(|c| c.prompts.as_ref()) {
        settings.paths.prompt_file = prompts.clone();
    }
    if let Some(poll) = poll {
        if let Some(out) = &poll.out {
            settings.paths.output_dir = out.clone();
        }
        if let Some(max_wait) = poll.max_wait {
            settings.poll.max_wait_secs = max_wait;
        }
        if let Some(interval) = poll.interval {
            settings.poll.interval_secs = interval;
        }
    }

    settings.validate()?;
    Ok(settings)
}

fn connect(settings: &Settings) -> Result<Arc<dyn SongApi>, BatchError> {
    let api = HttpSongApi::new(settings.api.clone())?;
    info!(endpoint = %settings.api.create_url(), "Using generation API");
    Ok(Arc::new(api))
}

/// Creates (or resumes) the ledger and submits every prompt variant.
///
/// Archival runs whatever the outcome; a batch-level stop is returned as
/// an error after the ledger and archive are written.
pub async fn run_create(
    api: Arc<dyn SongApi>,
    settings: &Settings,
    resume: bool,
) -> Result<(), BatchError> {
    let paths = &settings.paths;
    let batch = PromptBatch::load(&paths.prompt_file)?;

    let mut ledger = if resume {
        Ledger::load(&paths.ledger_file)?
    } else {
        if paths.ledger_file.exists() {
            warn!(path = %paths.ledger_file.display(), "Replacing existing ledger; use --resume to continue it");
        }
        Ledger::create(&paths.ledger_file)
    };
    ledger.flush()?;

    let report = CreationFlow::new(api, settings)
        .run(&batch, &mut ledger, resume)
        .await;

    Archiver::new(&paths.archive_dir).after_create(&paths.prompt_file, ledger.path());

    println!(
        "Created {} job(s), {} failed, {} skipped; ledger: {} ({:?})",
        report.queued,
        report.failed,
        report.skipped,
        ledger.path().display(),
        report.overall
    );

    match report.stop {
        Some(stop) => Err(stop.into()),
        None => Ok(()),
    }
}

/// Polls every pending job in the ledger and downloads finished audio.
pub async fn run_poll(api: Arc<dyn SongApi>, settings: &Settings) -> Result<(), BatchError> {
    let paths = &settings.paths;
    let mut ledger = Ledger::load(&paths.ledger_file)?;

    let result = PollingFlow::new(api, settings).run(&mut ledger).await;
    Archiver::new(&paths.archive_dir).after_poll(ledger.path());
    let report = result?;

    println!(
        "Polled {} job(s): {} done, {} failed, {} pending ({:?})",
        report.watched, report.done, report.failed, report.pending, report.overall
    );

    match report.batch_stop() {
        Some(stop) => Err(stop.clone().into()),
        None => Ok(()),
    }
}

#[derive(Debug, Serialize)]
struct StatusEntry {
    index: u32,
    variant: u32,
    title: String,
    status: JobStatus,
    remote_job_id: Option<String>,
    audio_path: Option<String>,
    error_reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct StatusOutput {
    ledger: String,
    batch_id: String,
    overall_status: crate::ledger::OverallStatus,
    note: String,
    total: usize,
    counts: std::collections::BTreeMap<String, usize>,
    items: Vec<StatusEntry>,
}

fn status_output(ledger: &Ledger, path: &Path) -> StatusOutput {
    let summary = ledger.summary();
    StatusOutput {
        ledger: path.display().to_string(),
        batch_id: ledger.meta().batch_id.to_string(),
        overall_status: ledger.meta().overall_status,
        note: ledger.meta().note.clone(),
        total: summary.total,
        counts: summary
            .by_status
            .iter()
            .map(|(status, count)| (status.to_string(), *count))
            .collect(),
        items: ledger
            .items()
            .iter()
            .map(|r| StatusEntry {
                index: r.index,
                variant: r.variant,
                title: r.title.clone(),
                status: r.status,
                remote_job_id: r.remote_job_id.clone(),
                audio_path: r.audio_path.clone(),
                error_reason: r.error_reason.clone(),
            })
            .collect(),
    }
}

fn run_status(settings: &Settings, json: bool) -> anyhow::Result<()> {
    let path = &settings.paths.ledger_file;
    let ledger = Ledger::load(path)?;
    let output = status_output(&ledger, path);

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Ledger:  {}", output.ledger);
    println!("Batch:   {}", output.batch_id);
    println!("Overall: {:?}", output.overall_status);
    println!("Note:    {}", output.note);
    println!("Summary: {}", ledger.summary());
    for item in &output.items {
        let detail = item
            .audio_path
            .as_deref()
            .or(item.error_reason.as_deref())
            .unwrap_or("");
        println!(
            "  [{:>3}] v{} {:<16} {} {}",
            item.index, item.variant, item.status, item.title, detail
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{JobRecord, OverallStatus};
    use clap::CommandFactory;
    use tempfile::TempDir;

    #[test]
    fn test_cli_parses() {
        // Verify CLI definition is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_create_command_options() {
        let args = vec![
            "songbatch",
            "create",
            "-p",
            "my-prompts.json",
            "--ledger",
            "batch.json",
            "--resume",
            "--api-key",
            "k-123",
            "--api-url",
            "http://localhost:4000/v1",
        ];
        let cli = Cli::try_parse_from(args).expect("should parse");

        match cli.command {
            Commands::Create(args) => {
                assert_eq!(args.create.prompts, Some(PathBuf::from("my-prompts.json")));
                assert_eq!(args.common.ledger, Some(PathBuf::from("batch.json")));
                assert!(args.create.resume);
                assert_eq!(args.api.api_key.as_deref(), Some("k-123"));
                assert_eq!(args.api.api_url.as_deref(), Some("http://localhost:4000/v1"));
            }
            _ => panic!("Expected Create command"),
        }
    }

    #[test]
    fn test_poll_command_options() {
        let args = vec![
            "songbatch", "poll", "--max-wait", "60", "--interval", "5", "-o", "audio",
        ];
        let cli = Cli::try_parse_from(args).expect("should parse");

        match cli.command {
            Commands::Poll(args) => {
                assert_eq!(args.poll.max_wait, Some(60));
                assert_eq!(args.poll.interval, Some(5.0));
                assert_eq!(args.poll.out, Some(PathBuf::from("audio")));
            }
            _ => panic!("Expected Poll command"),
        }
    }

    #[test]
    fn test_global_log_level() {
        let cli = Cli::try_parse_from(vec!["songbatch", "status", "--log-level", "debug"])
            .expect("should parse");
        assert_eq!(cli.log_level, "debug");
        assert!(matches!(cli.command, Commands::Status(_)));
    }

    #[test]
    fn test_build_settings_applies_flags() {
        let common = CommonArgs {
            config: None,
            ledger: Some(PathBuf::from("l.json")),
        };
        let api = ApiArgs {
            api_key: Some("key".to_string()),
            api_url: Some("http://localhost:9/v1".to_string()),
            archive_dir: Some(PathBuf::from("snapshots")),
        };
        let poll = PollOptions {
            out: Some(PathBuf::from("audio")),
            max_wait: Some(30),
            interval: Some(1.0),
        };

        let settings =
            build_settings(&common, Some(&api), None, Some(&poll)).expect("valid settings");
        assert_eq!(settings.paths.ledger_file, PathBuf::from("l.json"));
        assert_eq!(settings.paths.archive_dir, PathBuf::from("snapshots"));
        assert_eq!(settings.paths.output_dir, PathBuf::from("audio"));
        assert_eq!(settings.api.api_key.as_deref(), Some("key"));
        assert_eq!(settings.api.base_url, "http://localhost:9/v1");
        assert_eq!(settings.poll.max_wait_secs, 30);
        assert_eq!(settings.poll.interval_secs, 1.0);
    }

    #[test]
    fn test_build_settings_rejects_bad_interval() {
        for interval in [0.0, f64::INFINITY] {
            let poll = PollOptions {
                interval: Some(interval),
                ..PollOptions::default()
            };
            let result = build_settings(&CommonArgs::default(), None, None, Some(&poll));
            assert!(matches!(result, Err(BatchError::Config(_))), "{}", interval);
        }

        let cli = Cli::try_parse_from(["songbatch", "poll", "--interval", "inf"])
            .expect("should parse");
        let Commands::Poll(args) = cli.command else {
            panic!("Expected Poll command");
        };
        let result = build_settings(&CommonArgs::default(), None, None, Some(&args.poll));
        assert!(matches!(result, Err(BatchError::Config(_))));
    }

    #[test]
    fn test_connect_without_key_fails() {
        let result = connect(&Settings::default());
        assert!(matches!(result, Err(BatchError::Config(_))));
    }

    #[test]
    fn test_status_output() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("jobs.json");
        let mut ledger = Ledger::create(&path);
        let mut done = JobRecord::new(1, 1, "Song", "text").with_status(JobStatus::Done);
        done.remote_job_id = Some("j-1".to_string());
        done.audio_path = Some("out/001_Song_v1_j-1.mp3".to_string());
        ledger.upsert(done);
        ledger.set_overall(OverallStatus::Done, "finished");

        let loaded = Ledger::load(&path).expect("load");
        let output = status_output(&loaded, &path);
        assert_eq!(output.total, 1);
        assert_eq!(output.counts.get("DONE"), Some(&1));
        assert_eq!(output.overall_status, OverallStatus::Done);

        let json = serde_json::to_value(&output).expect("serialize");
        assert_eq!(json["items"][0]["status"], "DONE");
        assert_eq!(json["overall_status"], "DONE");
    }
}

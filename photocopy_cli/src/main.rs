use chrono::{NaiveDate, TimeZone, Utc};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use photocopy_common::{
    load_config, CancellationToken, CopyMode, DuplicatePolicy, OrganizeConfig, PathCasing,
    PhotoCopyError,
};
use photocopy_core::checkpoint::store::CheckpointStore;
use photocopy_core::metadata::{ExifMetadataProvider, MetadataProvider, NullLocationProvider};
use photocopy_core::resume::{self, ResumeDecision, ResumePreference};
use photocopy_core::{ExecutionSummary, Executor, PlanOutcome, Planner, ResumeValidation};
use serde::Serialize;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_CANCELLED: i32 = 2;
const EXIT_PARTIAL: i32 = 5;
const EXIT_IO: i32 = 6;

/// How many per-operation errors the summary prints by default; the full
/// list lives in the checkpoint file.
const PRINTED_ERRORS: usize = 10;

#[derive(Parser)]
#[command(name = "photocopy")]
#[command(author = "PhotoCopy Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Organise photo archives into a pattern-driven destination tree", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy or move files into the destination tree
    Organize(OrganizeArgs),

    /// Inspect and manage checkpoint files
    Checkpoints {
        #[command(subcommand)]
        command: CheckpointCommands,
    },
}

#[derive(Args)]
struct OrganizeArgs {
    /// Source directory to organise
    source: PathBuf,

    /// Destination pattern, e.g. "/photos/{year}/{month}/{name}"
    #[arg(short, long)]
    pattern: Option<String>,

    /// Move files instead of copying them
    #[arg(long = "move")]
    move_files: bool,

    /// Ignore any previous checkpoint and start over
    #[arg(long, conflicts_with = "resume")]
    fresh: bool,

    /// Resume the latest matching checkpoint without prompting
    #[arg(long)]
    resume: bool,

    /// Duplicate policy: none, skip, report or prompt
    #[arg(long, value_name = "POLICY")]
    duplicates: Option<String>,

    /// Suffix for destination name collisions; must contain {number}
    #[arg(long, value_name = "FORMAT")]
    duplicates_format: Option<String>,

    /// Casing applied to substituted values (original, lowercase, ...)
    #[arg(long, value_name = "CASING")]
    casing: Option<String>,

    /// Skip operations whose destination already exists
    #[arg(long)]
    skip_existing: bool,

    /// Overwrite existing destinations
    #[arg(long)]
    overwrite: bool,

    /// Worker count (default: CPU count)
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// Maximum directory depth to scan
    #[arg(long, value_name = "N")]
    max_depth: Option<usize>,

    /// Reject files older than this date (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    min_date: Option<String>,

    /// Reject files newer than this date (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    max_date: Option<String>,

    /// Case-insensitive exclude globs, relative to the source root
    #[arg(short = 'x', long = "exclude")]
    exclude: Vec<String>,

    /// Override the checkpoint directory
    #[arg(long, value_name = "DIR")]
    checkpoint_dir: Option<PathBuf>,

    /// Skip EXIF extraction and use filesystem timestamps only
    #[arg(long)]
    no_exif: bool,

    /// Print the summary as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum CheckpointCommands {
    /// List checkpoints for a destination pattern
    List {
        /// Destination pattern whose checkpoint directory to inspect
        #[arg(short, long)]
        pattern: String,

        /// Override the checkpoint directory
        #[arg(long, value_name = "DIR")]
        checkpoint_dir: Option<PathBuf>,
    },

    /// Delete terminal checkpoints older than the given age
    Cleanup {
        /// Destination pattern whose checkpoint directory to clean
        #[arg(short, long)]
        pattern: String,

        /// Override the checkpoint directory
        #[arg(long, value_name = "DIR")]
        checkpoint_dir: Option<PathBuf>,

        /// Age threshold in days
        #[arg(long, value_name = "DAYS", default_value = "30")]
        max_age_days: i64,
    },
}

#[derive(Serialize)]
struct JsonSummary {
    processed: u32,
    failed: u32,
    skipped: u32,
    duplicates: u32,
    planned: usize,
    rejected_in_planning: usize,
    cancelled: bool,
}

fn main() {
    // Logs go to stderr so JSON output stays clean on stdout.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Organize(args) => run_organize(args),
        Commands::Checkpoints { command } => run_checkpoints(command),
    };
    std::process::exit(code);
}

fn exit_code_for(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<PhotoCopyError>() {
        Some(PhotoCopyError::Io(_)) => EXIT_IO,
        Some(PhotoCopyError::Cancelled) => EXIT_CANCELLED,
        _ => EXIT_ERROR,
    }
}

fn run_organize(args: OrganizeArgs) -> i32 {
    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_ERROR;
        }
    };

    let preference = if args.fresh {
        ResumePreference::Fresh
    } else if args.resume {
        ResumePreference::Resume
    } else {
        ResumePreference::Auto
    };

    match organize(&config, &args.source, preference, args.no_exif, args.json) {
        Ok(summary) => {
            if summary.cancelled {
                EXIT_CANCELLED
            } else if summary.failed > 0 && summary.processed > 0 {
                EXIT_PARTIAL
            } else if summary.failed > 0 {
                EXIT_ERROR
            } else {
                EXIT_SUCCESS
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            exit_code_for(&e)
        }
    }
}

fn build_config(args: &OrganizeArgs) -> anyhow::Result<OrganizeConfig> {
    let mut config = load_config()
        .map(|loaded| loaded.config)
        .unwrap_or_else(|e| {
            warn!("Could not load config file: {}", e);
            OrganizeConfig::default()
        });

    if let Some(pattern) = &args.pattern {
        config.destination_pattern = pattern.clone();
    }
    if args.move_files {
        config.mode = CopyMode::Move;
    }
    if let Some(policy) = &args.duplicates {
        config.duplicate_policy = parse_duplicate_policy(policy)?;
    }
    if let Some(format) = &args.duplicates_format {
        config.duplicates_format = format.clone();
    }
    if let Some(casing) = &args.casing {
        config.path_casing = parse_casing(casing)?;
    }
    if args.skip_existing {
        config.skip_existing = true;
    }
    if args.overwrite {
        config.overwrite = true;
    }
    if args.concurrency.is_some() {
        config.concurrency = args.concurrency;
    }
    if args.max_depth.is_some() {
        config.max_depth = args.max_depth;
    }
    if let Some(date) = &args.min_date {
        config.min_date = Some(parse_date(date, false)?);
    }
    if let Some(date) = &args.max_date {
        config.max_date = Some(parse_date(date, true)?);
    }
    if !args.exclude.is_empty() {
        config.exclude_patterns = args.exclude.clone();
    }
    if args.checkpoint_dir.is_some() {
        config.checkpoint_dir = args.checkpoint_dir.clone();
    }

    Ok(config)
}

fn parse_duplicate_policy(value: &str) -> anyhow::Result<DuplicatePolicy> {
    match value.to_ascii_lowercase().as_str() {
        "none" => Ok(DuplicatePolicy::None),
        "skip" => Ok(DuplicatePolicy::Skip),
        "report" => Ok(DuplicatePolicy::Report),
        "prompt" => Ok(DuplicatePolicy::Prompt),
        _ => anyhow::bail!("unknown duplicate policy '{}'", value),
    }
}

fn parse_casing(value: &str) -> anyhow::Result<PathCasing> {
    match value.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
        "original" => Ok(PathCasing::Original),
        "lowercase" | "lower" => Ok(PathCasing::Lowercase),
        "uppercase" | "upper" => Ok(PathCasing::Uppercase),
        "titlecase" | "title" => Ok(PathCasing::TitleCase),
        "pascalcase" | "pascal" => Ok(PathCasing::PascalCase),
        "camelcase" | "camel" => Ok(PathCasing::CamelCase),
        "snakecase" | "snake" => Ok(PathCasing::SnakeCase),
        "kebabcase" | "kebab" => Ok(PathCasing::KebabCase),
        "screamingsnakecase" | "screamingsnake" => Ok(PathCasing::ScreamingSnakeCase),
        _ => anyhow::bail!("unknown casing '{}'", value),
    }
}

fn parse_date(value: &str, end_of_day: bool) -> anyhow::Result<chrono::DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| anyhow::anyhow!("invalid date '{}': {}", value, e))?;
    let time = if end_of_day {
        date.and_hms_opt(23, 59, 59)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    let time = time.ok_or_else(|| anyhow::anyhow!("invalid date '{}'", value))?;
    Ok(Utc.from_utc_datetime(&time))
}

fn organize(
    config: &OrganizeConfig,
    source: &Path,
    preference: ResumePreference,
    no_exif: bool,
    json: bool,
) -> anyhow::Result<ExecutionSummary> {
    let source = source
        .canonicalize()
        .map_err(|e| anyhow::anyhow!("source directory {}: {}", source.display(), e))?;
    let source_str = source.to_string_lossy().into_owned();

    let provider: Box<dyn MetadataProvider> = if no_exif {
        Box::new(photocopy_core::PlainMetadataProvider)
    } else {
        Box::new(ExifMetadataProvider::new(
            Arc::new(NullLocationProvider),
            config.location_granularity,
            config.use_full_country_names,
        ))
    };

    let cancel = CancellationToken::new();

    info!("Planning {} -> {}", source_str, config.destination_pattern);
    let PlanOutcome { plan, skipped } =
        Planner::new(config, provider.as_ref()).plan(&source, Some(&cancel))?;
    for entry in &skipped {
        info!(
            "Skipped during planning: {:?} ({}: {})",
            entry.path, entry.validator, entry.reason
        );
    }

    let store = CheckpointStore::for_pattern(
        &config.destination_pattern,
        config.checkpoint_dir.as_deref(),
    )?;
    let plan_files = plan.files();
    let plan_hash = photocopy_core::checkpoint::validate::plan_hash(&plan_files).prefix();

    let decision = resume::decide(&store, config, &source_str, plan_hash, preference, Utc::now())?;
    let writer = match decision {
        ResumeDecision::StartFresh { reason } => {
            info!("Starting fresh: {}", reason);
            let mut state = resume::create_checkpoint_state(&plan, config, &source_str, Utc::now());
            store.create_writer(&mut state)?
        }
        ResumeDecision::Resume { state, validation } => {
            report_resume(&state, &validation);
            store.resume_writer(&state)?
        }
        ResumeDecision::PromptUser { state, validation } => {
            report_resume(&state, &validation);
            if confirm_resume(&state) {
                store.resume_writer(&state)?
            } else {
                info!("Starting fresh at user request");
                let mut fresh_state =
                    resume::create_checkpoint_state(&plan, config, &source_str, Utc::now());
                store.create_writer(&mut fresh_state)?
            }
        }
    };

    let progress = make_progress_bar(plan.len() as u64);
    let mut executor = Executor::new(config)?;
    if let Some(bar) = progress.clone() {
        executor = executor.with_progress(Arc::new(move |done, _total| {
            bar.set_position(done);
        }));
    }

    let summary = executor.execute(&plan, &writer, &cancel)?;
    if let Some(bar) = progress {
        bar.finish_and_clear();
    }
    drop(writer);

    print_summary(&summary, plan.len(), skipped.len(), json)?;
    Ok(summary)
}

fn report_resume(state: &photocopy_core::CheckpointState, validation: &ResumeValidation) {
    if let ResumeValidation::Valid {
        total,
        completed,
        warnings,
    } = validation
    {
        info!(
            "Found resumable checkpoint: {} of {} operations completed",
            completed, total
        );
        for warning in warnings {
            warn!("{}", warning);
        }
    }
    if let Some(path) = &state.file_path {
        info!("Checkpoint file: {}", path.display());
    }
}

fn confirm_resume(state: &photocopy_core::CheckpointState) -> bool {
    if !std::io::stdin().is_terminal() {
        // Non-interactive runs resume; --fresh exists for the other choice.
        return true;
    }
    eprint!(
        "Resume previous run ({} of {} done)? [Y/n] ",
        state.stats.completed, state.total_files
    );
    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return true;
    }
    !matches!(answer.trim(), "n" | "N" | "no" | "NO")
}

fn make_progress_bar(total: u64) -> Option<ProgressBar> {
    if !std::io::stderr().is_terminal() || total == 0 {
        return None;
    }
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    Some(bar)
}

fn print_summary(
    summary: &ExecutionSummary,
    planned: usize,
    rejected: usize,
    json: bool,
) -> anyhow::Result<()> {
    if json {
        let output = JsonSummary {
            processed: summary.processed,
            failed: summary.failed,
            skipped: summary.skipped,
            duplicates: summary.duplicates,
            planned,
            rejected_in_planning: rejected,
            cancelled: summary.cancelled,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!(
        "Processed {} | skipped {} | failed {} | duplicates {}",
        summary.processed, summary.skipped, summary.failed, summary.duplicates
    );
    if rejected > 0 {
        println!("{} files were rejected during planning (see log)", rejected);
    }
    if summary.cancelled {
        println!("Run was cancelled; re-run to resume from the checkpoint.");
    }
    for (index, message) in summary.failures.iter().take(PRINTED_ERRORS) {
        println!("  failed #{}: {}", index, message);
    }
    if summary.failures.len() > PRINTED_ERRORS {
        println!(
            "  ... and {} more (full list in the checkpoint file)",
            summary.failures.len() - PRINTED_ERRORS
        );
    }
    Ok(())
}

fn run_checkpoints(command: CheckpointCommands) -> i32 {
    let result = match command {
        CheckpointCommands::List {
            pattern,
            checkpoint_dir,
        } => list_checkpoints(&pattern, checkpoint_dir.as_deref()),
        CheckpointCommands::Cleanup {
            pattern,
            checkpoint_dir,
            max_age_days,
        } => cleanup_checkpoints(&pattern, checkpoint_dir.as_deref(), max_age_days),
    };
    match result {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            exit_code_for(&e)
        }
    }
}

fn list_checkpoints(pattern: &str, override_dir: Option<&Path>) -> anyhow::Result<()> {
    let store = CheckpointStore::for_pattern(pattern, override_dir)?;
    let summaries = store.list_all()?;
    if summaries.is_empty() {
        println!("No checkpoints in {}", store.directory().display());
        return Ok(());
    }
    for summary in summaries {
        println!(
            "{}  {}  {}/{} completed  started {}  updated {}",
            summary.path.display(),
            summary.status.as_str(),
            summary.completed,
            summary.total_files,
            summary.started_at.format("%Y-%m-%d %H:%M:%S"),
            summary.last_updated.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    Ok(())
}

fn cleanup_checkpoints(
    pattern: &str,
    override_dir: Option<&Path>,
    max_age_days: i64,
) -> anyhow::Result<()> {
    let store = CheckpointStore::for_pattern(pattern, override_dir)?;
    let removed = store.cleanup(chrono::Duration::days(max_age_days), Utc::now())?;
    println!("Removed {} old checkpoint(s)", removed);
    Ok(())
}

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use plangob_core::{EntityRegistry, Slot};
use plangob_storage::DocumentLayout;
use plangob_sync::{MatchStrategy, SyncConfig, SyncPipeline};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "plangob")]
#[command(about = "Sync government-plan PDFs from the JNE catalog into local party folders")]
struct Cli {
    /// Folder holding one sub-folder per party.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// YAML file with config overrides.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    max_pages: Option<u32>,

    #[arg(long, global = true)]
    page_size: Option<u32>,

    /// Skip TLS certificate validation.
    #[arg(long, global = true)]
    insecure: bool,

    #[arg(long, global = true, value_enum)]
    matcher: Option<MatcherArg>,

    /// Write the run summary under this directory.
    #[arg(long, global = true)]
    reports_dir: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch missing documents for pending party folders.
    Sync,
    /// List local party folders and the documents they are missing.
    Status,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MatcherArg {
    Substring,
    Similarity,
}

impl From<MatcherArg> for MatchStrategy {
    fn from(arg: MatcherArg) -> Self {
        match arg {
            MatcherArg::Substring => MatchStrategy::Substring,
            MatcherArg::Similarity => MatchStrategy::Similarity,
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> Result<SyncConfig> {
    let mut config = SyncConfig::from_env().context("loading PLANGOB_* configuration")?;
    if let Some(path) = &cli.config {
        config = config.with_file_overrides(path)?;
    }
    if let Some(root) = &cli.root {
        config.root_dir = root.clone();
    }
    if let Some(max_pages) = cli.max_pages {
        config.max_pages = max_pages;
    }
    if let Some(page_size) = cli.page_size {
        config.page_size = page_size;
    }
    if cli.insecure {
        config.verify_tls = false;
    }
    if let Some(matcher) = cli.matcher {
        config.match_strategy = matcher.into();
    }
    if let Some(dir) = &cli.reports_dir {
        config.reports_dir = Some(dir.clone());
    }
    config.validate()?;
    Ok(config)
}

fn print_status(config: &SyncConfig) {
    let registry = EntityRegistry::from_entities(DocumentLayout::new(&config.root_dir).scan_local());
    for entity in registry.iter() {
        let missing = entity.missing_slots();
        if missing.is_empty() {
            println!("[complete] {}", entity.identity());
        } else {
            let names = missing.iter().map(|s| s.file_name()).collect::<Vec<_>>();
            println!("[pending]  {} (missing: {})", entity.identity(), names.join(", "));
        }
    }
    println!(
        "{} folder(s): {} complete, {} pending ({} document slots each: {}, {})",
        registry.len(),
        registry.complete_count(),
        registry.pending().len(),
        Slot::ALL.len(),
        Slot::GovernmentPlan,
        Slot::PlanSummary
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = load_config(&cli)?;

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = SyncPipeline::new(config)?.run_once().await?;
            println!(
                "sync complete: run_id={} entities={} pending={}->{} downloaded={} already_present={} missing_locators={} failed={} pages_failed={}",
                summary.run_id,
                summary.entities,
                summary.pending_before,
                summary.pending_after,
                summary.downloaded,
                summary.already_present,
                summary.missing_locators,
                summary.failed,
                summary.pages_failed
            );
            if let Some(path) = summary.report_path {
                println!("report: {path}");
            }
        }
        Commands::Status => print_status(&config),
    }

    Ok(())
}

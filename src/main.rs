//! factsheet-lens command line interface

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use factsheet_core_types::{EntityCollection, EntityType};
use factsheet_event_bus::to_mpsc;
use factsheet_kv_store::{FileKvStore, InMemoryKvStore, KvStore};
use factsheet_lens::findings::{match_findings, parse_findings};
use factsheet_lens::{
    load_config, GraphNormalizer, HttpTransport, LensConfig, NormalizedDocument, Orchestrator,
    ReferenceResolver,
};
use report_tap::capture::read_capture;
use report_tap::{TapOutcome, TapSession};
use serde::Serialize;
use serde_json::Value;
use tokio::fs;
use tracing::{debug, error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Captures, replays and normalizes report graphs
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Enable debug mode
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Output format
    #[arg(short, long, default_value = "human", global = true)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline for a captured report against the live host
    Run(RunArgs),
    /// Classify a capture offline and print shard counts
    Classify(CaptureArgs),
    /// Normalize a stored edge list
    Normalize(NormalizeArgs),
    /// Resolve reference stubs offline
    Resolve(ResolveArgs),
    /// Match a text-generation reply against a normalized document
    Findings(FindingsArgs),
    /// Print the effective configuration
    Config,
    /// Show build information
    Info,
}

#[derive(Args)]
struct RunArgs {
    /// HAR export or JSON Lines capture
    capture: PathBuf,

    /// Write the artifact here instead of stdout
    #[arg(long, value_name = "FILE")]
    out: Option<PathBuf>,
}

#[derive(Args)]
struct CaptureArgs {
    capture: PathBuf,
}

#[derive(Args)]
struct NormalizeArgs {
    /// Edge list or graph query response
    edges: PathBuf,
}

#[derive(Args)]
struct ResolveArgs {
    /// Main filter collection
    main: PathBuf,

    /// Secondary collections in filter order; the file stem names the entity type
    more: Vec<PathBuf>,
}

#[derive(Args)]
struct FindingsArgs {
    /// Normalized document
    document: PathBuf,

    /// Reply text containing `{"factSheets": [...]}`
    reply: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.debug, cli.log_json)?;
    info!("Starting factsheet-lens v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(cli.config.as_deref())
        .await
        .context("Failed to load configuration")?;

    let result = match cli.command {
        Commands::Run(args) => cmd_run(args, &config, cli.output).await,
        Commands::Classify(args) => cmd_classify(args, &config, cli.output).await,
        Commands::Normalize(args) => cmd_normalize(args, &config).await,
        Commands::Resolve(args) => cmd_resolve(args, &config, cli.output).await,
        Commands::Findings(args) => cmd_findings(args, cli.output).await,
        Commands::Config => cmd_config(&config),
        Commands::Info => cmd_info(cli.output),
    };

    match result {
        Ok(()) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_logging(level: &str, debug: bool, json: bool) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));
    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let text_layer = (!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();

    Ok(())
}

fn open_store(config: &LensConfig) -> Result<Arc<dyn KvStore>> {
    Ok(match &config.store.path {
        Some(path) => Arc::new(
            FileKvStore::open(path)
                .with_context(|| format!("Failed to open store at {}", path.display()))?,
        ),
        None => Arc::new(InMemoryKvStore::new()),
    })
}

async fn read_json(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Accepts a bare edge list or a full graph query response.
fn collection_from(value: &Value) -> Result<EntityCollection> {
    let collection = if value.is_array() {
        EntityCollection::from_edge_list(value)
    } else {
        EntityCollection::from_graphql_response(value)
    };
    collection.context("Input is not an edge list")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_run(args: RunArgs, config: &LensConfig, output: OutputFormat) -> Result<()> {
    let exchanges = read_capture(&args.capture)
        .with_context(|| format!("Failed to read capture {}", args.capture.display()))?;
    let transport = Arc::new(HttpTransport::new(config.replay.request_timeout())?);
    let store = open_store(config)?;
    let mut orchestrator = Orchestrator::new(config.clone(), transport, store);

    let mut events = to_mpsc(orchestrator.bus(), config.event_buffer);
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            debug!(target: "events", ?event, "pipeline event");
        }
    });

    let Some(artifact) = orchestrator.drive(exchanges).await? else {
        anyhow::bail!(
            "No runnable report found in capture (pipeline {})",
            orchestrator.state()
        );
    };

    match &args.out {
        Some(path) => {
            let raw = serde_json::to_string_pretty(&artifact)?;
            fs::write(path, raw)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        None if output == OutputFormat::Json => print_json(&artifact)?,
        None => {}
    }

    if output == OutputFormat::Human {
        println!("Report:      {} ({})", artifact.descriptor.name(), artifact.key);
        println!("Main filter: {}", artifact.descriptor.main_filter());
        println!("Entities:    {}", artifact.document.len());
        if let Some(replay) = &artifact.replay {
            println!(
                "Replay:      {}/{} succeeded, {} failed",
                replay.succeeded, replay.total, replay.failed
            );
        }
        println!(
            "Resolution:  {} resolved, {} unresolved",
            artifact.resolution.resolved, artifact.resolution.unresolved
        );
        if let Some(path) = &args.out {
            println!("Artifact:    {}", path.display());
        }
    }
    Ok(())
}

#[derive(Default, Serialize)]
struct ClassifySummary {
    key: Option<String>,
    counts_by_type: std::collections::BTreeMap<EntityType, u32>,
    total: u32,
    report_requested: bool,
    ignored: usize,
    duplicates: usize,
    dropped: usize,
}

async fn cmd_classify(args: CaptureArgs, config: &LensConfig, output: OutputFormat) -> Result<()> {
    let exchanges = read_capture(&args.capture)
        .with_context(|| format!("Failed to read capture {}", args.capture.display()))?;
    let mut session = TapSession::new(config.tap.clone());
    let mut summary = ClassifySummary::default();

    for exchange in &exchanges {
        let observation = session.observe(exchange);
        if observation.switched_from.is_some() {
            summary.report_requested = false;
        }
        match observation.outcome {
            TapOutcome::Ignored => summary.ignored += 1,
            TapOutcome::Duplicate | TapOutcome::PreviouslyFailed => summary.duplicates += 1,
            TapOutcome::Dropped { .. } => summary.dropped += 1,
            TapOutcome::ReportRequested { .. } => summary.report_requested = true,
            TapOutcome::Recorded { .. } => {}
        }
    }
    if let Some(key) = session.active_key() {
        summary.counts_by_type = session.ledger().counts_by_type(key);
        summary.total = session.ledger().total(key);
        summary.key = Some(key.to_string());
    }

    match output {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Human => {
            println!("Exchanges:  {}", exchanges.len());
            println!("Report:     {}", summary.key.as_deref().unwrap_or("-"));
            println!("Fetch seen: {}", summary.report_requested);
            for (entity_type, count) in &summary.counts_by_type {
                println!("  {:<24} {}", entity_type.as_str(), count);
            }
            println!("Total:      {}", summary.total);
            println!(
                "Skipped:    {} ignored, {} duplicate, {} dropped",
                summary.ignored, summary.duplicates, summary.dropped
            );
        }
    }
    Ok(())
}

async fn cmd_normalize(args: NormalizeArgs, config: &LensConfig) -> Result<()> {
    let input = read_json(&args.edges).await?;
    let collection = collection_from(&input)?;
    let document = GraphNormalizer::new(config.resolver.max_depth).normalize(&collection);
    print_json(&document)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResolveOutput {
    report: factsheet_lens::ResolutionReport,
    collection: EntityCollection,
}

async fn cmd_resolve(args: ResolveArgs, config: &LensConfig, output: OutputFormat) -> Result<()> {
    let mut main = collection_from(&read_json(&args.main).await?)?;
    let mut more = Vec::with_capacity(args.more.len());
    for path in &args.more {
        let entity_type = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .map(EntityType::from)
            .with_context(|| format!("Cannot derive entity type from {}", path.display()))?;
        more.push((entity_type, collection_from(&read_json(path).await?)?));
    }

    let report = ReferenceResolver::new(config.resolver.clone()).resolve(&mut main, &more);
    match output {
        OutputFormat::Json => print_json(&ResolveOutput {
            report,
            collection: main,
        }),
        OutputFormat::Human => {
            println!("Total:             {}", report.total);
            println!("Needs resolution:  {}", report.needs_resolution);
            println!("Resolved:          {}", report.resolved);
            println!("Unresolved:        {}", report.unresolved);
            Ok(())
        }
    }
}

async fn cmd_findings(args: FindingsArgs, output: OutputFormat) -> Result<()> {
    let document: NormalizedDocument = serde_json::from_value(read_json(&args.document).await?)
        .context("Document is not a normalized entity list")?;
    let reply = fs::read_to_string(&args.reply)
        .await
        .with_context(|| format!("Failed to read {}", args.reply.display()))?;
    let findings = parse_findings(&reply).context("Failed to parse reply")?;
    let report = match_findings(&document, findings);

    match output {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Human => {
            for finding in &report.matched {
                println!(
                    "{} [{}]: {}",
                    finding.display_name.as_deref().unwrap_or("(unnamed)"),
                    finding.id,
                    finding.reason
                );
            }
            if !report.unknown_ids.is_empty() {
                println!("Unknown ids: {}", report.unknown_ids.join(", "));
            }
            Ok(())
        }
    }
}

fn cmd_config(config: &LensConfig) -> Result<()> {
    print!("{}", serde_yaml::to_string(config)?);
    Ok(())
}

fn cmd_info(output: OutputFormat) -> Result<()> {
    let info = serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "git_hash": env!("LENS_GIT_HASH"),
        "build_date": env!("LENS_BUILD_DATE"),
    });
    match output {
        OutputFormat::Json => print_json(&info),
        OutputFormat::Human => {
            println!("factsheet-lens {}", env!("CARGO_PKG_VERSION"));
            println!("  commit: {}", env!("LENS_GIT_HASH"));
            println!("  built:  {}", env!("LENS_BUILD_DATE"));
            Ok(())
        }
    }
}

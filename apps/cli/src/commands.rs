//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use quarry_core::{InMemoryStore, ProgressHub, ReportStore, ResearchPipeline};
use quarry_server::AppState;
use quarry_shared::{
    AppConfig, ContextDocument, DocumentKind, ProgressEvent, ProviderStatus, ReportId,
    ReportRecord, init_config, load_config,
};
use quarry_storage::Storage;
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Quarry: ask several research models at once and get one cited report.
#[derive(Parser)]
#[command(
    name = "quarry",
    version,
    about = "Multi-provider research with reconciled, cited Typst reports.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Start the HTTP/WebSocket server.
    Serve {
        /// Bind address (overrides config).
        #[arg(long)]
        host: Option<String>,

        /// Port (overrides config).
        #[arg(long)]
        port: Option<u16>,
    },

    /// Run one research job in-process with live progress.
    Research {
        /// The research question.
        query: String,

        /// Attach a text file as context (repeatable).
        #[arg(short, long = "context", value_name = "FILE")]
        context: Vec<PathBuf>,

        /// Keep the job in memory instead of the configured database.
        #[arg(long)]
        ephemeral: bool,

        /// Print the rendered Typst document.
        #[arg(long)]
        print: bool,
    },

    /// Show a persisted report.
    Report {
        /// Report ID.
        report_id: String,

        /// Print the full record as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List recent jobs.
    Jobs {
        /// Maximum number of jobs to show.
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "quarry=info",
        1 => "quarry=debug,tower_http=debug",
        _ => "quarry=trace,tower_http=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve { host, port } => cmd_serve(host, port).await,
        Command::Research {
            query,
            context,
            ephemeral,
            print,
        } => cmd_research(&query, &context, ephemeral, print).await,
        Command::Report { report_id, json } => cmd_report(&report_id, json).await,
        Command::Jobs { limit } => cmd_jobs(limit).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

async fn open_storage(config: &AppConfig) -> Result<Storage> {
    let path = config.storage.resolved_path()?;
    info!(path = %path.display(), "opening database");
    Ok(Storage::open(&path).await?)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_serve(host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut config = load_config()?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let store: Arc<dyn ReportStore> = Arc::new(open_storage(&config).await?);
    let pipeline = ResearchPipeline::from_config(&config, store, ProgressHub::new())?;

    println!(
        "Quarry listening on http://{}:{}",
        config.server.host, config.server.port
    );
    quarry_server::serve(&config.server, AppState::new(Arc::new(pipeline))).await?;
    Ok(())
}

async fn cmd_research(query: &str, context_files: &[PathBuf], ephemeral: bool, print: bool) -> Result<()> {
    let config = load_config()?;
    let context = context_files
        .iter()
        .map(|path| load_context_file(path))
        .collect::<Result<Vec<_>>>()?;

    let store: Arc<dyn ReportStore> = if ephemeral {
        Arc::new(InMemoryStore::new())
    } else {
        Arc::new(open_storage(&config).await?)
    };
    let pipeline = Arc::new(ResearchPipeline::from_config(&config, store, ProgressHub::new())?);

    info!(query, context_docs = context.len(), ephemeral, "starting research");

    let submitted = pipeline.submit(query, context).await?;
    let mut subscription = pipeline.hub().subscribe(submitted.job.id);
    let handle = pipeline.spawn(submitted);

    let progress = CliProgress::new();
    while let Some(event) = subscription.recv().await {
        progress.event(&event);
    }
    progress.finish();

    let outcome = handle
        .await
        .map_err(|e| eyre!("research task aborted: {e}"))??;

    println!();
    println!("  Research complete!");
    println!("  Report:    {}", outcome.report_id);
    println!("  Strategy:  {}", outcome.strategy.as_str());
    println!("  Citations: {}", outcome.citations);
    println!("  Conflicts: {}", outcome.conflicts);
    println!("  Time:      {:.1}s", outcome.elapsed.as_secs_f64());
    if ephemeral {
        println!("  (ephemeral run, nothing was saved)");
    }
    println!();

    if print {
        println!("{}", outcome.document);
    }
    Ok(())
}

async fn cmd_report(report_id: &str, json: bool) -> Result<()> {
    let report_id: ReportId = report_id
        .parse()
        .map_err(|e| eyre!("invalid report id '{report_id}': {e}"))?;
    let config = load_config()?;
    let storage = open_storage(&config).await?;

    let record = storage
        .get_report(report_id)
        .await?
        .ok_or_else(|| eyre!("report {report_id} not found"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        print_record(&record);
    }
    Ok(())
}

async fn cmd_jobs(limit: u32) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;
    let jobs = storage.list_jobs(limit).await?;

    if jobs.is_empty() {
        println!("No jobs yet.");
        return Ok(());
    }
    for job in jobs {
        println!(
            "{}  {:<12} {}  {}",
            job.id,
            job.stage.as_str(),
            job.created_at.format("%Y-%m-%d %H:%M"),
            job.query
        );
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");

    let active: Vec<&str> = config
        .active_providers()
        .iter()
        .map(|p| p.name.as_str())
        .collect();
    if active.is_empty() {
        println!("# active providers: none (no API keys set)");
    } else {
        println!("# active providers: {}", active.join(", "));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_context_file(path: &Path) -> Result<ContextDocument> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| eyre!("cannot read context file '{}': {e}", path.display()))?;
    let mut doc = ContextDocument::new(DocumentKind::File, content);
    if let Some(name) = path.file_name() {
        doc.metadata.insert(
            "filename".into(),
            serde_json::Value::String(name.to_string_lossy().into_owned()),
        );
    }
    Ok(doc)
}

fn print_record(record: &ReportRecord) {
    println!();
    println!("  Query:     {}", record.query);
    println!("  Stage:     {}", record.stage);
    if let Some(error) = &record.error {
        println!("  Error:     {error}");
    }
    println!("  Citations: {}", record.citations.len());
    for (i, citation) in record.citations.iter().enumerate() {
        println!(
            "    [{}] {} ({}, {:.2})",
            i + 1,
            citation.claim,
            citation.llm_source,
            citation.confidence
        );
    }
    if !record.conflicts.is_empty() {
        println!("  Conflicts: {}", record.conflicts.len());
        for conflict in &record.conflicts {
            println!("    - {}", conflict.topic);
            for position in &conflict.positions {
                println!("        {}: {}", position.llm_source, position.claim);
            }
        }
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress display
// ---------------------------------------------------------------------------

/// Spinner driven by Progress Hub events.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner.set_message("Submitting");
        Self { spinner }
    }

    fn event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::StageChanged { stage, detail, .. } => {
                self.spinner
                    .set_message(detail.clone().unwrap_or_else(|| stage.to_string()));
            }
            ProgressEvent::ProviderUpdate {
                name,
                status: ProviderStatus::Succeeded,
                claims,
                ..
            } => {
                self.spinner
                    .println(format!("  ✓ {name}: {} claims", claims.unwrap_or(0)));
            }
            ProgressEvent::ProviderUpdate {
                name,
                status: ProviderStatus::Failed,
                error,
                ..
            } => {
                self.spinner.println(format!(
                    "  ✗ {name}: {}",
                    error.as_deref().unwrap_or("failed")
                ));
            }
            ProgressEvent::Report { .. } => self.spinner.set_message("Done"),
            ProgressEvent::Error { detail } => {
                self.spinner.println(format!("  ✗ {detail}"));
            }
        }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn research_args_parse() {
        let cli = Cli::try_parse_from([
            "quarry",
            "research",
            "Is X true?",
            "--context",
            "a.txt",
            "-c",
            "b.txt",
            "--ephemeral",
        ])
        .unwrap();

        match cli.command {
            Command::Research {
                query,
                context,
                ephemeral,
                print,
            } => {
                assert_eq!(query, "Is X true?");
                assert_eq!(context, [PathBuf::from("a.txt"), PathBuf::from("b.txt")]);
                assert!(ephemeral);
                assert!(!print);
            }
            _ => panic!("expected research command"),
        }
    }

    #[test]
    fn global_flags_apply_to_subcommands() {
        let cli = Cli::try_parse_from(["quarry", "serve", "--port", "9000", "-vv", "--log-format", "json"])
            .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.log_format, LogFormat::Json));
        assert!(matches!(
            cli.command,
            Command::Serve {
                host: None,
                port: Some(9000)
            }
        ));
    }

    #[test]
    fn context_file_becomes_document() {
        let path = std::env::temp_dir().join(format!("quarry-context-{}.txt", std::process::id()));
        std::fs::write(&path, "background notes").unwrap();

        let doc = load_context_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(doc.kind, DocumentKind::File);
        assert_eq!(doc.content, "background notes");
        assert!(doc.metadata.contains_key("filename"));
    }

    #[test]
    fn missing_context_file_is_an_error() {
        assert!(load_context_file(Path::new("/definitely/not/here.txt")).is_err());
    }
}

use clap::{Args, Parser, Subcommand};
use std::io;
use std::path::{Path, PathBuf};
use tix_agents::CliAssistantClient;
use tix_core::{
    apply_config_value, default_cache_path, default_config_path, load_or_default_config,
    save_config, ConfigError, ConfigValueError, TicketRecord, TixConfig, Validate,
    ValidationIssue, ValidationLevel,
};
use tix_sync::{CacheSnapshot, SyncEngine, SyncError, SyncParams, TerminalProgress, TicketCache};
use tracing::warn;
use tracing_subscriber::EnvFilter;

const VERBOSE_LOG_FILTER: &str = "warn,tix_sync=debug,tix_agents=debug,tix_core=debug";

#[derive(Debug, Parser)]
#[command(name = "tix", version, about = "Keep a local cache of your open Notion tickets")]
struct Cli {
    /// Config file (default: ~/.tix/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Ticket cache file (default: ~/.tix/tickets.json)
    #[arg(long, global = true, value_name = "PATH")]
    cache: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch assigned, open tickets and replace the local cache
    Sync(SyncArgs),
    /// Show when the cache was last synced and what it holds
    Status,
    /// Show one cached ticket by id or ticket number
    Ticket {
        /// Ticket id or number, e.g. ENG-42
        key: String,
    },
    /// Inspect or change configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Args)]
struct SyncArgs {
    /// Log each step to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Base timeout per assistant call, in seconds
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    timeout: Option<u64>,

    /// Look up and store the data source id of the database instead of syncing
    #[arg(long, value_name = "URL", num_args = 0..=1)]
    discover: Option<Option<String>>,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Set one configuration key
    Set { key: String, value: String },
}

#[derive(Debug, thiserror::Error)]
enum MainError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    ConfigValue(#[from] ConfigValueError),
    #[error("config validation failed ({0})")]
    InvalidConfig(String),
    #[error("failed to render config: {source}")]
    RenderConfig {
        #[source]
        source: toml::ser::Error,
    },
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("no cached ticket matches '{key}'; run `tix sync` to refresh the cache")]
    TicketNotFound { key: String },
}

fn main() {
    if let Err(err) = run() {
        eprintln!("tix: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), MainError> {
    let cli = Cli::parse();
    let verbose = matches!(&cli.command, Command::Sync(args) if args.verbose);
    init_logging(verbose);

    let config_path = cli.config.unwrap_or_else(default_config_path);
    let cache_path = cli.cache.unwrap_or_else(default_cache_path);

    match cli.command {
        Command::Sync(args) => run_sync(args, &config_path, &cache_path),
        Command::Status => {
            print!("{}", render_status(&TicketCache::new(cache_path).snapshot()));
            Ok(())
        }
        Command::Ticket { key } => {
            let record = TicketCache::new(cache_path)
                .find(&key)
                .ok_or(MainError::TicketNotFound { key })?;
            print!("{}", render_ticket_detail(&record));
            Ok(())
        }
        Command::Config(ConfigCommand::Show) => run_config_show(&config_path),
        Command::Config(ConfigCommand::Set { key, value }) => {
            let mut config = load_or_default_config(&config_path)?;
            apply_config_value(&mut config, &key, &value)?;
            save_config(&config_path, &config)?;
            println!("{key} updated in {}", config_path.display());
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { VERBOSE_LOG_FILTER } else { "warn" })
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn run_sync(args: SyncArgs, config_path: &Path, cache_path: &Path) -> Result<(), MainError> {
    let mut config = load_or_default_config(config_path)?;
    let effective = effective_config(&config, args.timeout);
    let params = SyncParams::from_config(&effective, None);
    let client = CliAssistantClient::claude(config.assistant.executable.clone());
    let engine = SyncEngine::new(client, TicketCache::new(cache_path), params);
    let mut progress = TerminalProgress::new(io::stderr());

    if let Some(url) = args.discover {
        let id = engine.discover(url.as_deref(), config_path, &mut config, &mut progress)?;
        println!("notionDataSourceId = {id} (saved to {})", config_path.display());
        return Ok(());
    }

    check_config(&effective.validate())?;
    let run = engine.run(&mut progress)?;
    if run.exit_tolerated {
        eprintln!("note: the assistant exited with an error status; its output was used anyway");
    }
    for record in &run.records {
        println!("{}", render_ticket_line(record));
    }
    Ok(())
}

/// The config a sync actually runs with. Command-line overrides apply here
/// only; the stored config is what discovery writes back.
fn effective_config(config: &TixConfig, timeout_secs: Option<u64>) -> TixConfig {
    let mut effective = config.clone();
    if let Some(secs) = timeout_secs {
        effective.sync.timeout_secs = secs;
    }
    effective
}

fn run_config_show(config_path: &Path) -> Result<(), MainError> {
    let config = load_or_default_config(config_path)?;
    let body = toml::to_string_pretty(&config)
        .map_err(|source| MainError::RenderConfig { source })?;
    println!("# {}", config_path.display());
    print!("{body}");
    for issue in config.validate() {
        eprintln!("{}", render_issue(&issue));
    }
    Ok(())
}

fn check_config(issues: &[ValidationIssue]) -> Result<(), MainError> {
    for issue in issues
        .iter()
        .filter(|issue| issue.level == ValidationLevel::Warning)
    {
        warn!(code = issue.code, "{}", issue.message);
    }

    let errors = issues
        .iter()
        .filter(|issue| issue.level == ValidationLevel::Error)
        .map(|issue| format!("{}: {}", issue.code, issue.message))
        .collect::<Vec<_>>();
    if errors.is_empty() {
        return Ok(());
    }
    Err(MainError::InvalidConfig(errors.join("; ")))
}

fn render_issue(issue: &ValidationIssue) -> String {
    let level = match issue.level {
        ValidationLevel::Error => "error",
        ValidationLevel::Warning => "warning",
    };
    format!("{level}: {} ({})", issue.message, issue.code)
}

fn render_ticket_line(record: &TicketRecord) -> String {
    let status = if record.status.is_empty() {
        "-"
    } else {
        record.status.as_str()
    };
    format!("{:<12} {:<14} {}", record.label(), status, record.title)
}

fn render_status(snapshot: &CacheSnapshot) -> String {
    let mut out = match snapshot.last_synced_at {
        Some(at) => format!("last synced: {}\n", at.format("%Y-%m-%d %H:%M:%S")),
        None => "last synced: never\n".to_string(),
    };
    out.push_str(&format!("{} open ticket(s)\n", snapshot.records.len()));
    for record in &snapshot.records {
        out.push_str(&render_ticket_line(record));
        out.push('\n');
    }
    out
}

fn render_ticket_detail(record: &TicketRecord) -> String {
    let mut out = format!("{}  {}\n", record.label(), record.title);
    let fields = [
        ("id", record.id.as_str()),
        ("status", record.status.as_str()),
        ("priority", record.priority.as_str()),
        ("updated", record.last_updated.as_str()),
        ("url", record.url.as_str()),
    ];
    for (name, value) in fields.iter().filter(|(_, value)| !value.is_empty()) {
        out.push_str(&format!("  {name:<9} {value}\n"));
    }
    for link in &record.github_links {
        out.push_str(&format!("  {:<9} {link}\n", "github"));
    }
    out
}

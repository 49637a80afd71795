//! # Dripline: drip email scheduler
//!
//! Usage:
//!   dripline serve                          # HTTP triggers (+ cron loop if `[cron] schedule` is set)
//!   dripline run --type day7 --dry-run      # One run, JSON result on stdout
//!   dripline token <uid> [--unsubscribe]    # Issue a user token
//!   dripline import users.json              # Upsert users into the SQLite store
//!   dripline deliveries -n 20               # Recent delivery log
//!   dripline init-config                    # Write a default config file

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dripline_core::{DriplineConfig, KindSelection, RunRequest, User};
use dripline_gateway::{AppState, HmacTokenVerifier};
use dripline_scheduler::{
    CronLoop, CronSchedule, Dispatcher, EmailSender, LogSender, PostmarkSender, SqliteUserStore,
    spawn_cron_loop,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "dripline",
    version,
    about = "💧 Dripline: idempotent, rate-limited drip email scheduler"
)]
struct Cli {
    /// Config file (default: ~/.dripline/config.toml)
    #[arg(short, long, env = "DRIPLINE_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP trigger server
    Serve {
        /// Override `[gateway] port`
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Execute one run and print the result
    Run {
        /// `all`, or comma-separated scheduled kinds (slug or day2/day5/day7)
        #[arg(short = 't', long = "type", default_value = "all")]
        kind: String,
        /// Evaluate only; no sends, no flag writes
        #[arg(long)]
        dry_run: bool,
    },
    /// Print a bearer token (or, with --unsubscribe, an unsubscribe-link token) for a user
    Token {
        user_id: String,
        #[arg(long)]
        unsubscribe: bool,
    },
    /// Upsert users from a JSON array file
    Import { file: PathBuf },
    /// Show the most recent delivery log rows
    Deliveries {
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Write a default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        "dripline=debug,dripline_scheduler=debug,dripline_gateway=debug,tower_http=debug"
    } else {
        "dripline=info,dripline_scheduler=info,dripline_gateway=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();
}

fn config_path(cli: &Cli) -> PathBuf {
    cli.config.clone().unwrap_or_else(DriplineConfig::default_path)
}

fn load_config(path: &Path) -> Result<DriplineConfig> {
    let mut config = if path.exists() {
        DriplineConfig::load_from(path)?
    } else {
        tracing::debug!("No config at {}, using defaults", path.display());
        DriplineConfig::default()
    };
    config.apply_env();
    config.validate()?;
    Ok(config)
}

fn open_store(config: &DriplineConfig) -> Result<SqliteUserStore> {
    let path = shellexpand::tilde(&config.store.path).to_string();
    SqliteUserStore::open(Path::new(&path))
        .with_context(|| format!("Failed to open user store at {path}"))
}

fn build_sender(config: &DriplineConfig) -> Result<Arc<dyn EmailSender>> {
    if config.postmark.server_token.trim().is_empty() {
        tracing::warn!("⚠️ No Postmark token configured; emails are logged, not delivered");
        return Ok(Arc::new(LogSender));
    }
    Ok(Arc::new(PostmarkSender::new(config.postmark.clone())?))
}

fn build_dispatcher(config: &DriplineConfig) -> Result<Arc<Dispatcher>> {
    let store = Arc::new(open_store(config)?);
    let sender = build_sender(config)?;
    Ok(Arc::new(Dispatcher::from_config(config, store, sender)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let path = config_path(&cli);

    match &cli.command {
        Commands::InitConfig { force } => {
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            DriplineConfig::default().save_to(&path)?;
            println!("✅ Config written to {}", path.display());
        }
        Commands::Token { user_id, unsubscribe } => {
            let config = load_config(&path)?;
            let verifier = HmacTokenVerifier::new(&config.auth.token_secret)
                .context("Set [auth] token_secret or DRIPLINE_TOKEN_SECRET")?;
            let token = if *unsubscribe {
                verifier.issue_unsubscribe(user_id)?
            } else {
                verifier.issue(user_id)?
            };
            println!("{token}");
        }
        Commands::Import { file } => {
            let config = load_config(&path)?;
            let raw = std::fs::read_to_string(file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let users: Vec<User> = serde_json::from_str(&raw).context("Expected a JSON array of users")?;
            let store = open_store(&config)?;
            for user in &users {
                store.upsert_user(user)?;
            }
            println!("📥 Imported {} users ({} total)", users.len(), store.user_count()?);
        }
        Commands::Deliveries { limit } => {
            let config = load_config(&path)?;
            let rows = open_store(&config)?.recent_deliveries(*limit)?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Commands::Run { kind, dry_run } => {
            let config = load_config(&path)?;
            let kinds = KindSelection::parse_scheduled(kind)?;
            let dispatcher = build_dispatcher(&config)?;
            let result = dispatcher.run_once(RunRequest::new(kinds, *dry_run)).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Serve { port } => {
            let mut config = load_config(&path)?;
            if let Some(port) = port {
                config.gateway.port = *port;
            }
            let schedule = config
                .cron
                .schedule
                .as_deref()
                .map(CronSchedule::parse)
                .transpose()?;
            let default_kinds = KindSelection::parse_scheduled(&config.cron.default_type)?;

            let dispatcher = build_dispatcher(&config)?;
            println!("💧 Dripline v{}", env!("CARGO_PKG_VERSION"));
            println!("   Sender: {}", dispatcher.sender_name());
            println!("   Store:  {}", config.store.path);

            if let Some(schedule) = schedule {
                println!("   Cron:   {} ({})", schedule.expression(), default_kinds.label());
                spawn_cron_loop(CronLoop::new(dispatcher.clone(), schedule, default_kinds));
            }

            let state = AppState::new(dispatcher, &config);
            dripline_gateway::start(&config.gateway, state).await?;
        }
    }
    Ok(())
}

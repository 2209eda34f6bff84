//! # Capsule: scheduled email delivery
//!
//! Usage:
//!   capsule                       # Start API server + delivery scheduler
//!   capsule serve --no-scheduler  # API only
//!   capsule tick                  # Run one delivery pass and exit
//!   capsule tick --dry-run        # Show what is due without sending
//!   capsule list                  # Print all capsules as JSON
//!   capsule init                  # Write the default config file

use anyhow::{Context, Result};
use capsule_core::config::CapsuleConfig;
use capsule_core::traits::MailTransport;
use capsule_gateway::AppState;
use capsule_scheduler::{
    AttachmentStore, CapsuleService, CapsuleStore, DeliveryExecutor, DeliveryScheduler,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "capsule",
    version,
    about = "📬 Capsule: schedule emails for delivery at a future time"
)]
struct Cli {
    /// Config file (default: ~/.capsule/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP API and the delivery scheduler
    Serve {
        /// Override the listen port
        #[arg(short, long)]
        port: Option<u16>,

        /// Serve the API without running deliveries
        #[arg(long)]
        no_scheduler: bool,
    },
    /// Run a single delivery pass and exit
    Tick {
        /// Show due capsules without sending or changing them
        #[arg(long)]
        dry_run: bool,
    },
    /// Print all capsules
    List,
    /// Write the default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Everything the subcommands share once config is resolved.
struct Runtime {
    config: CapsuleConfig,
    store: Arc<CapsuleStore>,
    attachments: Arc<AttachmentStore>,
}

impl Runtime {
    fn open(config: CapsuleConfig) -> Result<Self> {
        let db_path = config.storage.database_path();
        let store = CapsuleStore::open(&db_path)
            .with_context(|| format!("opening capsule database {}", db_path.display()))?;
        let upload_dir = config.storage.upload_dir();
        let attachments = AttachmentStore::new(&upload_dir)
            .with_context(|| format!("preparing upload folder {}", upload_dir.display()))?;
        Ok(Self {
            config,
            store: Arc::new(store),
            attachments: Arc::new(attachments),
        })
    }

    fn scheduler(&self, transport: Arc<dyn MailTransport>) -> Arc<DeliveryScheduler> {
        let sender = self.config.mail.sender().unwrap_or_default().to_string();
        let executor = DeliveryExecutor::new(
            self.store.clone(),
            self.attachments.clone(),
            transport,
            sender,
        );
        Arc::new(DeliveryScheduler::new(self.store.clone(), executor))
    }

    fn service(&self) -> CapsuleService {
        CapsuleService::new(self.store.clone(), self.attachments.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { "debug" } else { "info" };
    let mut filter = [
        "capsule",
        "capsule_core",
        "capsule_mail",
        "capsule_scheduler",
        "capsule_gateway",
    ]
    .map(|target| format!("{target}={level}"))
    .join(",");
    if cli.verbose {
        filter.push_str(",tower_http=debug");
    }
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false);
    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let config_path = cli.config.clone().unwrap_or_else(CapsuleConfig::default_path);

    if let Some(Command::Init { force }) = &cli.command {
        return init_config(&config_path, *force);
    }

    let mut config = if config_path.exists() {
        CapsuleConfig::load_from(&config_path)?
    } else {
        tracing::debug!("No config at {}, using defaults", config_path.display());
        CapsuleConfig::default()
    };
    config.apply_env();

    let runtime = Runtime::open(config)?;

    match cli.command.unwrap_or(Command::Serve {
        port: None,
        no_scheduler: false,
    }) {
        Command::Serve { port, no_scheduler } => serve(runtime, port, no_scheduler).await,
        Command::Tick { dry_run } => tick(runtime, dry_run).await,
        Command::List => list(runtime),
        Command::Init { .. } => Ok(()),
    }
}

fn init_config(path: &std::path::Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        println!("⚠️  Config already exists at {} (use --force to overwrite)", path.display());
        return Ok(());
    }
    CapsuleConfig::default().save_to(path)?;
    println!("✅ Wrote default config to {}", path.display());
    println!("   Set MAIL_USERNAME / MAIL_PASSWORD (or edit [mail]) before serving.");
    Ok(())
}

async fn serve(runtime: Runtime, port: Option<u16>, no_scheduler: bool) -> Result<()> {
    let mut gateway_config = runtime.config.gateway.clone();
    if let Some(port) = port {
        gateway_config.port = port;
    }

    let scheduler = if runtime.config.scheduler.enabled && !no_scheduler {
        let transport = capsule_mail::build_transport(&runtime.config.mail);
        let every = Duration::from_secs(runtime.config.scheduler.interval_secs);
        Some(runtime.scheduler(transport).start(every)?)
    } else {
        tracing::info!("Scheduler disabled, serving API only");
        None
    };

    let state = AppState::new(runtime.service(), gateway_config);
    let max_upload = runtime.config.storage.max_upload_bytes;
    let served = capsule_gateway::serve(state, max_upload, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {e}");
            std::future::pending::<()>().await;
        }
        tracing::info!("🛑 Shutdown requested");
    })
    .await;

    if let Some(handle) = scheduler {
        handle.stop().await;
    }
    served
}

async fn tick(runtime: Runtime, dry_run: bool) -> Result<()> {
    let now = chrono::Utc::now();

    if dry_run {
        let due = runtime.store.find_due(now)?;
        for capsule in &due {
            println!(
                "📤 (dry run) #{} {} → {} [{}]",
                capsule.id, capsule.subject, capsule.recipient, capsule.state
            );
        }
        println!("{} capsule(s) due, nothing sent", due.len());
        return Ok(());
    }

    let transport = capsule_mail::build_transport(&runtime.config.mail);
    let report = runtime.scheduler(transport).tick(now).await;
    if report.aborted {
        anyhow::bail!("delivery pass aborted: capsule store unavailable");
    }
    println!(
        "✅ {} due, {} sent, {} failed",
        report.due, report.sent, report.failed
    );
    Ok(())
}

fn list(runtime: Runtime) -> Result<()> {
    let capsules = runtime.service().list()?;
    let views: Vec<_> = capsules
        .iter()
        .map(capsule_gateway::routes::CapsuleView::from)
        .collect();
    println!("{}", serde_json::to_string_pretty(&views)?);
    Ok(())
}

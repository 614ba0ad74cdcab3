//! Menubell — WhatsApp reminder engine for menu campaigns.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use menubell_channels::WhatsAppClient;
use menubell_core::config::MenubellConfig;
use menubell_core::MessageSender;
use menubell_engine::{CampaignExecutor, PendingProcessor, RunOutcome, WindowTracker};
use menubell_gateway::AppState;
use menubell_store::Store;

#[derive(Parser)]
#[command(name = "menubell", version, about = "WhatsApp reminder engine for menu campaigns")]
struct Cli {
    /// Path to config.toml (defaults to ~/.menubell/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway and the periodic reminder loop.
    Serve,
    /// Run one trigger immediately and print its execution record.
    RunTrigger {
        /// Trigger id
        #[arg(long)]
        id: i64,
    },
    /// Sweep the pending queue: deliver answered batches, expire stale ones.
    CheckPending,
    /// Show the conversation window state for a phone number.
    Window {
        /// Phone number (E.164, digits only)
        #[arg(long)]
        phone: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => MenubellConfig::load_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => MenubellConfig::load().context("loading config")?,
    };

    let store = Arc::new(
        Store::open(std::path::Path::new(&config.database.path)).context("opening database")?,
    );
    let sender: Arc<dyn MessageSender> =
        Arc::new(WhatsAppClient::new(config.whatsapp.clone()));

    match cli.command {
        Command::Serve => serve(config, store, sender).await,
        Command::RunTrigger { id } => run_trigger(config, store, sender, id).await,
        Command::CheckPending => check_pending(config, store, sender).await,
        Command::Window { phone } => show_window(store, &phone),
    }
}

async fn serve(
    config: MenubellConfig,
    store: Arc<Store>,
    sender: Arc<dyn MessageSender>,
) -> anyhow::Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));

    let state = AppState::new(
        config.clone(),
        Arc::clone(&store),
        Arc::clone(&sender),
        Arc::clone(&shutdown),
    );

    let reminder_loop = tokio::spawn(menubell_engine::scheduler::run_reminder_loop(
        Arc::clone(&store),
        Arc::clone(&sender),
        config.reminders.clone(),
        Arc::clone(&shutdown),
    ));

    tokio::select! {
        result = menubell_gateway::serve(state) => {
            result.context("gateway stopped")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested");
            shutdown.store(true, Ordering::Relaxed);
        }
    }

    reminder_loop.abort();
    Ok(())
}

async fn run_trigger(
    config: MenubellConfig,
    store: Arc<Store>,
    sender: Arc<dyn MessageSender>,
    id: i64,
) -> anyhow::Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let executor = CampaignExecutor::new(&store, sender.as_ref(), &config.reminders, shutdown);

    match executor.run(id).await? {
        RunOutcome::Executed(execution) => {
            println!("{}", serde_json::to_string_pretty(&execution)?);
        }
        RunOutcome::AlreadyRunning => {
            println!("Trigger {id} is already running");
        }
    }
    Ok(())
}

async fn check_pending(
    config: MenubellConfig,
    store: Arc<Store>,
    sender: Arc<dyn MessageSender>,
) -> anyhow::Result<()> {
    let processor = PendingProcessor::new(&store, sender.as_ref(), &config.reminders);
    let stats = processor.check_all().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn show_window(store: Arc<Store>, phone: &str) -> anyhow::Result<()> {
    let tracker = WindowTracker::new(&store);
    let phone = menubell_core::types::normalize_phone(phone);
    match store.find_active_conversation(&phone)? {
        Some(conversation) => {
            let status = tracker.window_status(&conversation);
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "phone": conversation.phone_number,
                    "status": status.as_str(),
                    "expires_at": conversation.window_expires_at.map(|t| t.to_rfc3339()),
                }))?
            );
        }
        None => println!("No open conversation for {phone}"),
    }
    Ok(())
}

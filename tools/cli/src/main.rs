//! StepSync CLI - Command line client for the offline-first step counter.
//!
//! Every command works offline: mutations are applied locally and queued
//! until the server confirms them.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use stepsync_common::Error;
use stepsync_storage::open_store;
use stepsync_sync::{
    spawn_probe, Connectivity, FlushReport, FlushScheduler, HttpRemote, Outcome, RemoteService,
    StepClient, SyncEngine,
};

use crate::config::ClientConfig;

#[derive(Parser)]
#[command(name = "stepsync")]
#[command(about = "StepSync - Offline-first step counter client")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// State file (`.db`/`.sqlite` for SQLite, anything else for JSON).
    #[arg(short, long, global = true)]
    state: Option<PathBuf>,

    /// Base URL of the server.
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Act as if there were no connectivity; everything is queued.
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show local state and pending operations.
    Status,

    /// Count steps.
    Step {
        /// Number of steps.
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u64,
    },

    /// Withdraw balance to an address.
    Withdraw {
        /// Destination address.
        #[arg(short, long)]
        address: String,

        /// Amount to withdraw.
        #[arg(short = 'm', long)]
        amount: u64,
    },

    /// Request a wallet address.
    Wallet,

    /// Log in with a PIN.
    Login {
        /// PIN; prompted for when omitted.
        #[arg(short, long)]
        pin: Option<String>,
    },

    /// End the session.
    Logout,

    /// Send queued operations now.
    Flush,

    /// List queued operations.
    Pending,

    /// Preview what a number of steps converts to.
    Convert {
        /// Step count.
        #[arg(long)]
        steps: u64,
    },

    /// Keep running: flush periodically and when connectivity returns.
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = ClientConfig::load(cli.config.as_deref())?
        .with_overrides(cli.api_url.clone(), cli.state.clone());
    let (client, remote) = build_client(&config, !cli.offline).await?;

    match cli.command {
        Commands::Status => cmd_status(&client).await,

        Commands::Step { count } => cmd_step(&client, count).await,

        Commands::Withdraw { address, amount } => cmd_withdraw(&client, &address, amount).await,

        Commands::Wallet => cmd_wallet(&client).await,

        Commands::Login { pin } => cmd_login(&client, pin).await,

        Commands::Logout => {
            client.logout().await.context("Failed to log out")?;
            println!("Logged out.");
            Ok(())
        }

        Commands::Flush => cmd_flush(&client).await,

        Commands::Pending => cmd_pending(&client).await,

        Commands::Convert { steps } => cmd_convert(&client, steps).await,

        Commands::Run => cmd_run(client, remote, cli.offline).await,
    }
}

/// Wire store, remote and engine together.
async fn build_client(
    config: &ClientConfig,
    online: bool,
) -> Result<(StepClient, Arc<dyn RemoteService>)> {
    let store = match open_store(&config.state_path) {
        Ok(store) => store,
        Err(Error::Locked(path)) => anyhow::bail!(
            "State at {} is already open (is `stepsync run` active?); stop it or use another --state",
            path
        ),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to open state at {}", config.state_path.display()))
        }
    };
    let remote: Arc<dyn RemoteService> = Arc::new(
        HttpRemote::new(&config.api_url, config.sync.request_timeout())
            .context("Invalid server URL")?,
    );

    let engine = SyncEngine::new(
        remote.clone(),
        store,
        Connectivity::new(online),
        config.sync.clone(),
    )
    .await
    .context("Failed to load local state")?;

    let mut client = StepClient::new(Arc::new(engine));
    if let Some(pin) = &config.offline_pin {
        client = client.with_offline_pin(pin.clone());
    }

    Ok((client, remote))
}

fn describe(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Queued => "queued, will sync when online".to_string(),
        Outcome::Confirmed { message: Some(message) } => format!("confirmed: {}", message),
        Outcome::Confirmed { message: None } => "confirmed".to_string(),
        Outcome::Rejected { status, message } => {
            format!("rejected by server ({}): {}", status, message)
        }
    }
}

fn print_report(report: &FlushReport) {
    if report.skipped {
        println!("A flush is already running.");
        return;
    }
    println!("Flush finished in {:?}:", report.duration);
    println!("  Confirmed: {}", report.confirmed);
    println!("  Pending:   {}", report.requeued);
    println!("  Rejected:  {}", report.rejected.len());
    for rejected in &report.rejected {
        println!(
            "    {} ({}): {}",
            rejected.item.kind(),
            rejected.status,
            rejected.message
        );
    }
}

/// Show local state.
async fn cmd_status(client: &StepClient) -> Result<()> {
    if !client.startup().await? {
        info!("Showing local state only");
    }

    let state = client.engine().state().await;
    let wallet = state
        .wallet_id
        .as_ref()
        .map(|w| w.to_string())
        .unwrap_or_else(|| "(none)".to_string());

    println!("Steps:    {}", state.counter);
    println!("Balance:  {}", state.balance);
    println!("Wallet:   {}", wallet);
    println!("Session:  {}", if state.session_active { "active" } else { "none" });
    println!("Pending:  {}", client.engine().outbox_len().await);

    Ok(())
}

/// Count steps one at a time, as a pedometer would report them.
async fn cmd_step(client: &StepClient, count: u64) -> Result<()> {
    if count == 0 {
        anyhow::bail!("Step count must be positive");
    }

    let mut last = Outcome::Queued;
    for _ in 0..count {
        last = client.on_user_increment().await.context("Failed to record step")?;
    }

    let state = client.engine().state().await;
    println!(
        "Recorded {} step(s): {} steps, balance {} ({})",
        count,
        state.counter,
        state.balance,
        describe(&last)
    );

    Ok(())
}

/// Withdraw balance.
async fn cmd_withdraw(client: &StepClient, address: &str, amount: u64) -> Result<()> {
    let outcome = match client.on_withdraw_requested(address, amount).await {
        Ok(outcome) => outcome,
        Err(Error::InsufficientBalance {
            requested,
            available,
        }) => {
            anyhow::bail!(
                "Insufficient balance: requested {}, available {}",
                requested,
                available
            );
        }
        Err(e) => return Err(e).context("Withdrawal failed"),
    };

    println!("Withdrawal of {} to {}: {}", amount, address, describe(&outcome));
    println!("Balance: {}", client.engine().state().await.balance);

    Ok(())
}

/// Request a wallet.
async fn cmd_wallet(client: &StepClient) -> Result<()> {
    let (outcome, wallet) = client
        .on_wallet_requested()
        .await
        .context("Wallet request failed")?;

    println!("Wallet: {} ({})", wallet, describe(&outcome));

    Ok(())
}

/// Log in.
async fn cmd_login(client: &StepClient, pin: Option<String>) -> Result<()> {
    let pin = match pin {
        Some(pin) => pin,
        None => rpassword::prompt_password("Enter PIN: ").context("Failed to read PIN")?,
    };

    let outcome = client.login(&pin).await.context("Login failed")?;
    if !outcome.is_accepted() {
        anyhow::bail!("Incorrect PIN");
    }

    println!("Logged in ({:?}).", outcome);

    Ok(())
}

/// Flush the outbox once.
async fn cmd_flush(client: &StepClient) -> Result<()> {
    let report = client.engine().flush_once().await.context("Flush failed")?;
    print_report(&report);

    Ok(())
}

/// List pending operations.
async fn cmd_pending(client: &StepClient) -> Result<()> {
    let pending = client.engine().pending().await;

    if pending.is_empty() {
        println!("Nothing pending.");
    } else {
        println!("{} pending operation(s):", pending.len());
        for item in pending {
            println!(
                "  {}  {:<20} {}",
                item.enqueued_at().format("%Y-%m-%d %H:%M:%S"),
                item.kind().to_string(),
                item.id()
            );
        }
    }

    Ok(())
}

/// Preview a conversion.
async fn cmd_convert(client: &StepClient, steps: u64) -> Result<()> {
    match client.conversion_preview(steps).await {
        Some(preview) => {
            let show = |value: Option<f64>| {
                value
                    .map(|v| format!("{:.4}", v))
                    .unwrap_or_else(|| "?".to_string())
            };
            println!("{} steps:", steps);
            println!("  DOGE: {}", show(preview.doge_equivalent));
            println!("  TRX:  {}", show(preview.trx_equivalent));
            if let Some(rate) = preview.rate {
                println!("  Rate: {}", rate);
            }
        }
        None => println!("Conversion preview unavailable."),
    }

    Ok(())
}

/// Run until Ctrl-C.
async fn cmd_run(client: StepClient, remote: Arc<dyn RemoteService>, offline: bool) -> Result<()> {
    let engine = client.engine().clone();
    let sync_config = engine.config().clone();
    let connectivity = engine.connectivity().clone();

    let (scheduler, handle) =
        FlushScheduler::new(sync_config.flush_interval(), connectivity.clone());
    let client = client.with_scheduler(scheduler.clone());

    if !client.startup().await? {
        warn!("Server unreachable at startup; working from local state");
    }

    let flush_engine = engine.clone();
    let scheduler_task = tokio::spawn(async move {
        handle
            .run(move |_trigger| {
                let engine = flush_engine.clone();
                async move { engine.flush_once().await }
            })
            .await;
    });

    let probe = if offline {
        None
    } else {
        Some(spawn_probe(
            remote,
            connectivity,
            sync_config.probe_interval(),
        ))
    };

    info!("Running; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Stopping");
    if let Some(probe) = probe {
        probe.abort();
    }
    scheduler.shutdown().await;
    if tokio::time::timeout(Duration::from_secs(10), scheduler_task)
        .await
        .is_err()
    {
        warn!("Scheduler did not stop in time");
    }

    let pending = client.engine().outbox_len().await;
    if pending > 0 {
        println!("{} operation(s) still pending.", pending);
    }

    Ok(())
}

//! Operator CLI for inspecting and repairing pushpop queues.
//!
//! Reads `DATABASE_URL` (and the optional `PUSHPOP_*` settings) from the
//! environment or a `.env` file.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use pushpop::{
    Client, ClientConfig, LeaseSweeper, Message, MessageState, QueueError, Service, Transition,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "pushpop")]
#[command(about = "Inspect and operate pushpop message queues")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue a message
    Push {
        topic: String,
        payload: String,
        /// Seconds before the message becomes claimable
        #[arg(long, default_value_t = 0)]
        delay: u64,
    },

    /// Claim the next message in a topic
    Pop { topic: String },

    /// Show a message by id
    Find { id: Uuid },

    /// Mark a pending message as completed
    Complete { id: Uuid },

    /// Mark a pending message as discarded
    Discard { id: Uuid },

    /// Return a pending message to the ready pool
    Defer {
        id: Uuid,
        #[arg(long, default_value_t = 0)]
        delay: u64,
    },

    /// Extend the lease of a pending message
    Extend {
        id: Uuid,
        #[arg(long, default_value_t = 300)]
        secs: u64,
    },

    /// Return expired leases to the ready pool
    Sweep {
        /// Keep sweeping every N seconds until interrupted
        #[arg(long)]
        watch: Option<u64>,
        #[arg(long, default_value_t = 100)]
        batch_size: i64,
    },

    /// Count messages per state in a topic
    Stats {
        topic: String,
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,pushpop=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let client = get_client().await?;

    let result = match cli.command {
        Commands::Push {
            topic,
            payload,
            delay,
        } => cmd_push(&client, topic, payload, delay).await,
        Commands::Pop { topic } => cmd_pop(&client, &topic).await,
        Commands::Find { id } => cmd_find(&client, id).await,
        Commands::Complete { id } => cmd_transition(&client, id, Transition::Complete).await,
        Commands::Discard { id } => cmd_transition(&client, id, Transition::Discard).await,
        Commands::Defer { id, delay } => {
            cmd_transition(&client, id, Transition::Defer(Duration::from_secs(delay))).await
        }
        Commands::Extend { id, secs } => {
            cmd_transition(&client, id, Transition::Extend(Duration::from_secs(secs))).await
        }
        Commands::Sweep { watch, batch_size } => cmd_sweep(&client, watch, batch_size).await,
        Commands::Stats { topic, json } => cmd_stats(&client, &topic, json).await,
    };

    client.close().await;
    result
}

async fn get_client() -> Result<Client> {
    let config = ClientConfig::from_env().context("Failed to load configuration")?;
    Client::connect_with(config)
        .await
        .context("Failed to connect to database")
}

// ============================================================================
// Commands
// ============================================================================

async fn cmd_push(client: &Client, topic: String, payload: String, delay: u64) -> Result<()> {
    let mut msg = client.new_message(topic, payload);
    client
        .push_delay(&mut msg, Duration::from_secs(delay))
        .await
        .context("Failed to push message")?;

    println!("{} {}", "Pushed".green().bold(), msg.id);
    print_message(&msg);
    Ok(())
}

async fn cmd_pop(client: &Client, topic: &str) -> Result<()> {
    match client.pop(topic).await {
        Ok(msg) => {
            println!(
                "{} {} (lease until {})",
                "Claimed".green().bold(),
                msg.id,
                msg.state_time.to_rfc3339()
            );
            print_message(&msg);
            Ok(())
        }
        Err(QueueError::NoMessage { .. }) => {
            println!("{}", format!("No message available in '{}'", topic).yellow());
            Ok(())
        }
        Err(e) => Err(e).context("Failed to claim message"),
    }
}

async fn cmd_find(client: &Client, id: Uuid) -> Result<()> {
    let msg = client
        .find_by_id(id)
        .await
        .with_context(|| format!("Failed to find message {}", id))?;
    print_message(&msg);
    Ok(())
}

/// Apply `transition` using the stored row as the lease token.
async fn cmd_transition(client: &Client, id: Uuid, transition: Transition) -> Result<()> {
    let mut msg = client
        .find_by_id(id)
        .await
        .with_context(|| format!("Failed to find message {}", id))?;
    let from = msg.state;

    client
        .transition(&mut msg, transition)
        .await
        .with_context(|| format!("Failed to {} message {}", transition, id))?;

    println!(
        "{} {} {} -> {}",
        "Updated".green().bold(),
        id,
        state_label(from),
        state_label(msg.state)
    );
    Ok(())
}

async fn cmd_sweep(client: &Client, watch: Option<u64>, batch_size: i64) -> Result<()> {
    let Some(interval) = watch else {
        let sweeper = LeaseSweeper::new(client.clone(), Duration::from_secs(1))
            .with_batch_size(batch_size);
        let count = sweeper.sweep_once().await.context("Lease sweep failed")?;
        println!("{} {} expired lease(s)", "Reclaimed".green().bold(), count);
        return Ok(());
    };

    let sweeper = Box::new(
        LeaseSweeper::new(client.clone(), Duration::from_secs(interval.max(1)))
            .with_batch_size(batch_size),
    );
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(sweeper.run(shutdown.clone()));

    println!("{}", "Sweeping expired leases, press Ctrl+C to stop".cyan());
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    shutdown.cancel();

    handle.await.context("Sweeper task panicked")?
}

async fn cmd_stats(client: &Client, topic: &str, json: bool) -> Result<()> {
    let counts = client
        .counts(topic)
        .await
        .with_context(|| format!("Failed to count messages in '{}'", topic))?;

    if json {
        println!("{}", serde_json::to_string(&counts)?);
        return Ok(());
    }

    println!("{}", topic.bold());
    for state in MessageState::ALL {
        println!("  {:<10} {}", state_label(state), counts.get(state));
    }
    println!("  {:<10} {}", "total", counts.total());
    Ok(())
}

// ============================================================================
// Output
// ============================================================================

fn print_message(msg: &Message) {
    println!("  {:<10} {}", "id", msg.id);
    println!("  {:<10} {}", "topic", msg.topic);
    println!("  {:<10} {}", "state", state_label(msg.state));
    println!("  {:<10} {}", "time", msg.state_time.to_rfc3339());
    match std::str::from_utf8(&msg.payload) {
        Ok(text) => println!("  {:<10} {}", "payload", text),
        Err(_) => println!("  {:<10} <{} bytes>", "payload", msg.payload.len()),
    }
}

fn state_label(state: MessageState) -> colored::ColoredString {
    match state {
        MessageState::Ready => state.as_str().cyan(),
        MessageState::Pending => state.as_str().yellow(),
        MessageState::Completed => state.as_str().green(),
        MessageState::Discarded => state.as_str().red(),
    }
}

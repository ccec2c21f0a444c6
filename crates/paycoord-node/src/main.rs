//! paycoord-node — the payment coordinator binary.
//!
//! Startup sequence:
//!   1. Parse CLI args
//!   2. Open the persistent store
//!   3. Dispatch to the requested subcommand: `serve`, `flush-payment-orders`,
//!      or `flush-payment-proofs`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use paycoord_core::signal::InboundMessage;
use paycoord_core::Secret;
use paycoord_engine::PayCoordEngine;
use paycoord_store::StoreDb;

#[derive(Parser, Debug)]
#[command(
    name = "paycoord-node",
    version,
    about = "Payment coordinator — mediates two-phase transfers between payees and payers"
)]
struct Args {
    /// Directory for the persistent store.
    #[arg(long, default_value = "~/.paycoord/data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the coordinator's inbound dispatch loop against a local store,
    /// reading newline-delimited JSON messages from stdin.
    Serve,
    /// Delete finalized payment orders older than a given number of days.
    FlushPaymentOrders {
        /// The number of days. Falls back to APP_FLUSH_PAYMENT_ORDERS_DAYS, then 30.
        #[arg(short, long)]
        days: Option<f64>,
    },
    /// Delete payment proofs older than a given number of days.
    FlushPaymentProofs {
        /// The number of days. Falls back to APP_FLUSH_PAYMENT_PROOFS_DAYS, then 180.
        #[arg(short, long)]
        days: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,paycoord=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!("paycoord-node starting");

    let data_dir = expand_tilde(&args.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let db = Arc::new(StoreDb::open(&data_dir).context("opening store")?);
    let engine = Arc::new(PayCoordEngine::new(Arc::clone(&db)));

    match args.command {
        Command::Serve => serve(engine).await,
        Command::FlushPaymentOrders { days } => {
            let days = days.unwrap_or_else(|| env_days("APP_FLUSH_PAYMENT_ORDERS_DAYS", 30.0));
            let cutoff_ts = cutoff_from_days(days);
            let n = engine.flush_orders(cutoff_ts)?;
            echo_deleted(n, "payment order");
            Ok(())
        }
        Command::FlushPaymentProofs { days } => {
            let days = days.unwrap_or_else(|| env_days("APP_FLUSH_PAYMENT_PROOFS_DAYS", 180.0));
            let cutoff_ts = cutoff_from_days(days);
            let n = engine.flush_proofs(cutoff_ts)?;
            echo_deleted(n, "payment proof");
            Ok(())
        }
    }
}

/// Runs the inbound dispatch loop: stdin lines are parsed as JSON and pushed
/// onto a bounded channel; a spawned task drains the channel and calls into
/// the engine, mirroring the reference node's "channel + consumer task" shape.
async fn serve(engine: Arc<PayCoordEngine>) -> anyhow::Result<()> {
    let (tx, mut rx) = tokio::sync::mpsc::channel::<InboundMessage>(512);

    let dispatch_engine = Arc::clone(&engine);
    let dispatcher = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = handle_message(&dispatch_engine, msg) {
                warn!(error = %e, "message handling failed");
            }
        }
    });

    let stdin = tokio::io::stdin();
    let mut lines = tokio::io::AsyncBufReadExt::lines(tokio::io::BufReader::new(stdin));
    info!("paycoord-node ready, reading NDJSON from stdin");
    while let Some(line) = tokio::io::AsyncBufReadExt::next_line(&mut lines).await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<InboundMessage>(&line) {
            Ok(msg) => {
                if tx.send(msg).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!(error = %e, line, "failed to decode inbound message"),
        }
    }
    drop(tx);
    dispatcher.await.context("dispatcher task panicked")?;
    Ok(())
}

fn handle_message(engine: &PayCoordEngine, msg: InboundMessage) -> anyhow::Result<()> {
    let now = chrono::Utc::now().timestamp();
    match msg {
        InboundMessage::CreateOffer(m) => {
            engine.create_offer(
                m.payee_id,
                m.announcement_id,
                m.debtor_ids,
                m.debtor_amounts,
                m.valid_until_ts,
                m.description,
                m.reciprocal_debtor_id,
                m.reciprocal_amount,
                now,
            )?;
        }
        InboundMessage::CancelOffer(m) => {
            let secret = Secret::from_base64url(&m.offer_secret_b64)
                .map_err(|e| anyhow::anyhow!("decoding offer_secret: {e}"))?;
            engine.cancel_offer(m.payee_id, m.offer_id, &secret, now)?;
        }
        InboundMessage::MakePaymentOrder(m) => {
            let offer_secret = Secret::from_base64url(&m.offer_secret_b64)
                .map_err(|e| anyhow::anyhow!("decoding offer_secret: {e}"))?;
            let proof_secret = Secret::from_base64url(&m.proof_secret_b64)
                .map_err(|e| anyhow::anyhow!("decoding proof_secret: {e}"))?;
            engine.make_payment_order(
                m.payee_id,
                m.offer_id,
                &offer_secret,
                m.payer_id,
                m.payer_seqnum,
                m.debtor_id,
                m.amount,
                proof_secret,
                m.payer_note,
                now,
            )?;
        }
        InboundMessage::Prepared(m) => engine.on_prepared_signal(m, now)?,
        InboundMessage::Rejected(m) => engine.on_rejected_signal(m, now)?,
    }
    Ok(())
}

/// Cutoff timestamp for housekeeping: `utcnow() - days`, following the
/// source's `datetime.now(tz=timezone.utc) - timedelta(days=days)`.
fn cutoff_from_days(days: f64) -> i64 {
    let seconds = (days * 86_400.0) as i64;
    (chrono::Utc::now() - chrono::Duration::seconds(seconds)).timestamp()
}

fn env_days(var: &str, default: f64) -> f64 {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Echoes a singular/plural deleted-count message, matching the source
/// CLI's exact wording.
fn echo_deleted(n: u64, noun: &str) {
    match n {
        0 => {}
        1 => println!("1 {noun} has been deleted."),
        n => println!("{n} {noun}s have been deleted."),
    }
}

/// Expand a leading `~` to the user's home directory (`HOME` or `USERPROFILE`).
fn expand_tilde(path: &std::path::Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}

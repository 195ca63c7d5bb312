//! Voxline Dialer
//!
//! Places a single call from the terminal using the default microphone and
//! speakers. CTRL-C hangs up. Without an endpoint the call runs in demo mode
//! (microphone only, nothing is sent).

use anyhow::anyhow;
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use voxline_call::{CallConfig, CallSession, CallStatus, CpalMicrophone};

#[derive(Parser, Debug)]
#[command(name = "voxline-dialer", version, about = "Talk to a voice assistant server")]
struct Cli {
    /// Voice server to call, e.g. wss://voice.example.com/call (overrides VOXLINE_ENDPOINT)
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Print available microphones and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[voxline-dialer] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Needed before the first wss:// handshake
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    if cli.list_devices {
        for name in CpalMicrophone::list_input_devices()? {
            println!("{}", name);
        }
        return Ok(());
    }

    let mut config = CallConfig::load()?;
    if let Some(endpoint) = cli.endpoint {
        config.endpoint = Some(endpoint);
        config.validate()?;
    }

    let mut session = CallSession::with_system_devices(config)?
        .on_call_ended(|| tracing::info!("📴 Call ended. Goodbye."));
    let handle = session.handle();

    tokio::spawn(report_status(session.subscribe()));
    session.start_call()?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("CTRL-C received; hanging up");
            handle.end_call().await;
        }
    });

    session.run().await;
    Ok(())
}

/// Log a line whenever something a user would see on a call screen changes,
/// including chunks dropped while the connection is down.
async fn report_status(mut status: watch::Receiver<CallStatus>) {
    let mut last = status.borrow_and_update().clone();
    while status.changed().await.is_ok() {
        let now = status.borrow_and_update().clone();
        if is_visible_change(&last, &now) {
            tracing::info!(
                phase = ?now.phase,
                connection = ?now.connection,
                recording = ?now.recording,
                playback = ?now.playback,
                dropped = now.chunks_dropped,
                error = now.last_error.as_deref().unwrap_or("-"),
                "call status"
            );
        }
        last = now;
    }
}

/// Chunk and clip counters tick constantly; only drops are worth a line.
fn is_visible_change(last: &CallStatus, now: &CallStatus) -> bool {
    now.phase != last.phase
        || now.connection != last.connection
        || now.recording != last.recording
        || now.playback != last.playback
        || now.last_error != last.last_error
        || now.chunks_dropped != last.chunks_dropped
}

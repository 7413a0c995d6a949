//! Call client binary entry point
//!
//! Joins one interview room through the PairLink relay and runs the call
//! until either side ends it, the partner times out, or Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! # Caller side
//! cargo run -p pairlink-call-client -- \
//!   --relay-url ws://localhost:8080 \
//!   --user-id alice --room-id room-42 --role caller
//!
//! # Callee side, remembering mute state between runs
//! cargo run -p pairlink-call-client -- \
//!   --user-id bob --room-id room-42 --role callee \
//!   --state-dir ~/.pairlink
//! ```

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use pairlink_core::config::{DEFAULT_RELAY_URL, RELAY_URL_ENV};
use pairlink_core::{RelayChannel, RelayConfig};
use pairlink_webrtc::{
    CallConfig, CallEngine, CallPhase, CallRole, CallSnapshot, FileStateStore, MediaStateStore,
    MemoryStateStore, RoomConfig, RoomCoordinator,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use webrtc::media::Sample;

/// Opus frame encoding 20 ms of silence
const OPUS_SILENCE: [u8; 3] = [0xF8, 0xFF, 0xFE];

/// PairLink call client
///
/// Negotiates a two-party WebRTC call over the PairLink relay.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay base URL
    #[arg(long, default_value = DEFAULT_RELAY_URL, env = RELAY_URL_ENV)]
    relay_url: String,

    /// Identity announced to the relay
    #[arg(long, env = "PAIRLINK_USER_ID")]
    user_id: String,

    /// Interview room to join
    #[arg(long, env = "PAIRLINK_ROOM_ID")]
    room_id: String,

    /// Negotiation side
    #[arg(short, long, default_value = "caller", env = "PAIRLINK_ROLE")]
    role: Role,

    /// Directory for persisted mute/camera state (in memory when omitted)
    #[arg(long, env = "PAIRLINK_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// STUN servers (comma-separated)
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "stun:stun.l.google.com:19302,stun:stun1.l.google.com:19302"
    )]
    stun_servers: Vec<String>,

    /// Seconds to wait for an unreachable partner
    #[arg(long, default_value_t = 30, env = "PAIRLINK_PARTNER_TIMEOUT_SECS")]
    partner_timeout_secs: u32,

    /// Start without sending audio
    #[arg(long, default_value_t = false)]
    muted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum Role {
    /// Sends the offer
    Caller,
    /// Answers the offer
    Callee,
}

impl From<Role> for CallRole {
    fn from(role: Role) -> Self {
        match role {
            Role::Caller => CallRole::Caller,
            Role::Callee => CallRole::Callee,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        eprintln!("\nCtrl+C received, ending call...");
        if shutdown_flag_handler.swap(true, Ordering::SeqCst) {
            eprintln!("Shutdown already in progress, forcing exit");
            std::process::exit(0);
        }

        std::thread::spawn(|| {
            std::thread::sleep(Duration::from_secs(3));
            eprintln!("Graceful shutdown timed out (3s), forcing exit");
            std::process::exit(0);
        });
    })
    .context("Failed to set Ctrl+C handler")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("call-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(args: Args, shutdown_flag: Arc<AtomicBool>) -> anyhow::Result<()> {
    init_tracing();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        user_id = %args.user_id,
        room_id = %args.room_id,
        role = ?args.role,
        "PairLink call client starting"
    );

    let relay_config = RelayConfig::default().with_relay_url(args.relay_url.clone());
    relay_config.validate()?;
    info!(
        relay_url = %relay_config.relay_url,
        heartbeat_ms = relay_config.heartbeat_interval_ms,
        "Relay configuration loaded"
    );

    let call_config = CallConfig::default().with_stun_servers(args.stun_servers.clone());
    let room_config = RoomConfig {
        partner_timeout_secs: args.partner_timeout_secs,
        ..Default::default()
    };

    let store: Arc<dyn MediaStateStore> = match &args.state_dir {
        Some(dir) => Arc::new(
            FileStateStore::new(dir)
                .with_context(|| format!("Failed to open state dir {}", dir.display()))?,
        ),
        None => Arc::new(MemoryStateStore::new()),
    };

    let channel = RelayChannel::websocket(relay_config)?;
    channel.connect(&args.user_id)?;

    let engine = CallEngine::builder(args.room_id.clone(), args.user_id.clone())
        .role(args.role.into())
        .config(call_config)
        .channel(channel.clone())
        .state_store(store)
        .build()?;

    let room = RoomCoordinator::new(engine.clone(), channel.clone(), room_config)?;
    room.start();

    let feeder = tokio::spawn(feed_silence(engine.subscribe()));
    let mut snapshots = engine.subscribe();
    let mut status = room.subscribe();
    let mut last_phase = CallPhase::Idle;
    let mut muted_applied = !args.muted;

    info!("Call client running. Press Ctrl+C to hang up.");

    let mut poll = tokio::time::interval(Duration::from_millis(100));
    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if snapshot.phase != last_phase {
                    last_phase = snapshot.phase;
                    log_snapshot(&snapshot);
                }
                if !muted_applied && snapshot.local_stream.is_some() {
                    muted_applied = true;
                    if !snapshot.is_muted {
                        engine.toggle_mute().await;
                    }
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                if current.partner_disconnected {
                    info!(remaining_secs = current.reconnect_remaining_secs, "Waiting for partner");
                }
                if current.complete {
                    info!(
                        reason = ?current.end_reason,
                        elapsed_secs = current.elapsed_secs,
                        "Interview finished"
                    );
                    break;
                }
            }
            _ = poll.tick() => {
                if shutdown_flag.load(Ordering::SeqCst) {
                    info!("Shutdown signal received, hanging up...");
                    room.end_interview().await;
                    break;
                }
            }
        }
    }

    feeder.abort();
    room.shutdown();
    engine.shutdown().await;
    channel.shutdown().await;
    info!("Call client shut down gracefully");

    Ok(())
}

fn log_snapshot(snapshot: &CallSnapshot) {
    let remote_tracks = snapshot
        .remote_stream
        .as_ref()
        .map(|s| s.tracks().len())
        .unwrap_or(0);
    info!(
        phase = ?snapshot.phase,
        connection = ?snapshot.connection_state,
        active = snapshot.is_call_active,
        remote_tracks,
        "Call state changed"
    );
    if let Some(reason) = &snapshot.media_error {
        warn!("Sending no local media: {}", reason);
    }
}

/// Keep the local audio track fed so the partner receives RTP
async fn feed_silence(snapshots: watch::Receiver<CallSnapshot>) {
    let sample = Sample {
        data: Bytes::from_static(&OPUS_SILENCE),
        duration: Duration::from_millis(20),
        ..Default::default()
    };
    let mut ticker = tokio::time::interval(sample.duration);

    loop {
        ticker.tick().await;
        let track = snapshots
            .borrow()
            .local_stream
            .as_ref()
            .and_then(|s| s.audio_track().cloned());
        let Some(track) = track else {
            continue;
        };
        if let Err(e) = track.write_sample(&sample).await {
            debug!("Dropped audio sample: {}", e);
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

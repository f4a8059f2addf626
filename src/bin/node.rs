//! NowTalk Node
//!
//! Runs one station over the UDP broadcast radio emulation. A test tone
//! stands in for the microphone (`mic0`) and a level meter for the speaker
//! (`spk0`).
//!
//! Usage: `nowtalk-node [config.toml] [NONE|MICROPHONE|SPEAKER]`

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nowtalk_link::{
    actions::Action,
    audio::{MeterSink, ToneSource},
    config::{AppConfig, SessionConfig},
    constants::*,
    events::EventKind,
    network::UdpRadio,
    node::NodeBuilder,
    protocol::{MacAddress, Mode},
};

/// One audio frame period
const POLL_INTERVAL: Duration = Duration::from_micros(
    FRAME_SAMPLES as u64 * 1_000_000 / SAMPLE_RATE_HZ as u64,
);

fn load_config(path: Option<PathBuf>) -> Result<AppConfig> {
    let path = path.or_else(|| AppConfig::default_path().filter(|p| p.exists()));
    let mut config = match path {
        Some(path) => AppConfig::load(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => {
            tracing::info!("No configuration file, using defaults");
            AppConfig::default()
        }
    };

    if config.sessions.is_empty() {
        config.sessions.push(SessionConfig {
            microphone: Some("mic0".into()),
            speaker: Some("spk0".into()),
            broadcast_allowed: true,
            ..Default::default()
        });
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting NowTalk node");

    let mut args = std::env::args().skip(1);
    let config = load_config(args.next().map(PathBuf::from))?;
    let start_mode: Option<Mode> = args
        .next()
        .map(|m| serde_json::from_value(serde_json::Value::String(m.to_uppercase())))
        .transpose()
        .context("mode must be NONE, MICROPHONE or SPEAKER")?;

    let address = config
        .link
        .local_address
        .unwrap_or_else(MacAddress::random_local);
    let radio = UdpRadio::bind(address, config.link.udp_port, config.link.channel)?;

    let first_session = config.sessions[0].name.clone();
    let builder = NodeBuilder::new(config)
        .with_microphone("mic0", ToneSource::new(440.0, 8000))
        .with_speaker("spk0", MeterSink::default());

    builder.events().subscribe(EventKind::NewPeer, |event| {
        tracing::info!("{:?}", event);
        Ok(())
    });
    for kind in [
        EventKind::SessionStart,
        EventKind::SessionEnd,
        EventKind::SessionError,
        EventKind::SessionIdle,
    ] {
        builder.events().subscribe(kind, |event| {
            tracing::info!("{:?}", event);
            Ok(())
        });
    }

    let mut node = builder.build(Box::new(radio))?;

    if let Some(mode) = start_mode {
        node.apply_action(
            &Action::SetMode {
                session: first_session,
                mode,
            },
            Instant::now(),
        )?;
    }

    tracing::info!("Running - press Ctrl+C to stop");

    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut stats_timer = tokio::time::interval(Duration::from_secs(10));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                node.poll(Instant::now());
            }
            _ = stats_timer.tick() => {
                let stats = node.link().stats();
                tracing::info!(
                    "Stats: {} sent, {} received, {} send failures, {} decode errors, {} dropped, {} active peers",
                    stats.packets_sent,
                    stats.packets_received,
                    stats.send_failures,
                    stats.decode_errors,
                    stats.inbound_dropped,
                    node.link().peers().list_active().len()
                );
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}

//! voice-relay: hardware button to voice assistant relay
//!
//! Reads trigger lines from a microcontroller over serial and fans them out
//! to WebSocket listeners. Optionally runs the voice session itself:
//! - Serial bridge forwarding recognized trigger lines
//! - WebSocket/HTTP server for trigger listeners and session UIs
//! - Single-session state machine driving capture, inference and playback

mod audio;
mod bridge;
mod config;
mod events;
mod inference;
mod lifecycle;
mod serial;
mod server;
mod session;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::audio::{CommandCapture, CommandPlayback};
use crate::bridge::{ListenerRegistry, TriggerBridge, TriggerSet};
use crate::config::Config;
use crate::events::SessionEvent;
use crate::inference::HttpInferenceClient;
use crate::lifecycle::ShutdownSignal;
use crate::server::{Server, StatusBoard};
use crate::session::{reflect, InputDispatcher, SessionRunner};

type SessionTask = Pin<Box<dyn Future<Output = ()>>>;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "voice-relay starting");

    let config = Config::load().context("failed to load configuration")?;
    info!(
        port = %config.serial.port,
        baud = config.serial.baud_rate,
        listen = %config.server.listen,
        session = config.session.enabled,
        "configuration loaded"
    );

    let shutdown = ShutdownSignal::new();

    // No serial device, no daemon
    let serial = serial::open(&config.serial.port, config.serial.baud_rate)
        .context("cannot start without the serial device")?;

    let registry = Arc::new(ListenerRegistry::new(config.server.listener_queue));
    let bridge = TriggerBridge::new(TriggerSet::new(&config.triggers), Arc::clone(&registry));
    let status = StatusBoard::new();

    let (dispatcher, session) = if config.session.enabled {
        let (dispatcher, session) = start_session(&config, &registry, &status)?;
        (Some(dispatcher), session)
    } else {
        info!("voice session disabled, bridging triggers only");
        let idle: SessionTask = Box::pin(std::future::pending());
        (None, idle)
    };

    let server = Server::bind(config.server.listen, Arc::clone(&registry), dispatcher, status)
        .await?;

    info!("daemon initialized, entering main loop");

    let mut exit = Ok(());
    tokio::select! {
        result = bridge.run(serial) => {
            if let Err(e) = result {
                error!(error = %e, "serial bridge stopped");
                exit = Err(e).context("serial link lost");
            }
        }

        result = server.run() => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                exit = Err(e);
            }
        }

        _ = session => {
            warn!("session runner exited");
        }

        result = shutdown.wait() => match result {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => exit = Err(e).context("failed to install signal handlers"),
        },
    }

    info!("voice-relay stopped");
    exit
}

/// Wire up the in-process voice session.
///
/// The session attaches to the registry like any other listener, so hardware
/// triggers reach it through the same fan-out the browser clients use.
fn start_session(
    config: &Config,
    registry: &ListenerRegistry,
    status: &StatusBoard,
) -> Result<(InputDispatcher, SessionTask)> {
    let (event_tx, mut event_rx) = broadcast::channel::<SessionEvent>(64);
    let (input_tx, input_rx) = mpsc::channel(32);
    let dispatcher = InputDispatcher::new(&config.session.trigger_key, input_tx);

    let inference = HttpInferenceClient::new(&config.inference.base_url, config.inference.timeout())
        .context("failed to build inference client")?;
    let capture = CommandCapture::new(&config.audio.capture_command, &config.audio.capture_mime)
        .context("audio capture command is empty")?;
    let playback = CommandPlayback::new(&config.audio.playback_command)
        .context("audio playback command is empty")?;

    let runner = SessionRunner::new(
        event_tx,
        capture,
        inference,
        playback,
        config.session.failsafe(),
        config.session.playback_timeout(),
    );

    // Hardware triggers
    let (id, frames) = registry.attach();
    info!(%id, "session attached to trigger listeners");
    tokio::spawn(dispatcher.clone().relay_hardware(frames));

    // Session events -> status projection
    let board = status.clone();
    tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event) => board.publish(reflect(&event)).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "session event receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    info!(
        failsafe_secs = config.session.failsafe_secs,
        playback_timeout_secs = config.session.playback_timeout_secs,
        trigger_key = %config.session.trigger_key,
        "voice session enabled"
    );

    Ok((dispatcher, Box::pin(runner.run(input_rx))))
}

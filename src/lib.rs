pub mod bandwidth;
pub mod call;
pub mod commands;
pub mod config;
pub mod error;
pub mod logger;
pub mod notification;
pub mod peer;
pub mod signaling;
pub mod telemetry;
pub mod utils;

pub use call::{CallManager, CallSettings};
pub use commands::{CallHandle, Command};
pub use crate::config::CallConfig;
pub use error::CallError;
pub use notification::{Notification, NotificationReceiver};
pub use peer::types::PeerId;

use commands::console::ConsoleCommand;
use peer::{RtcTrack, WebRtcEngine};
use signaling::SignalingClient;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Запускает клиент: сигнальный канал, менеджер звонков и консоль на stdin.
/// Возвращается после `quit` или закрытия stdin.
pub async fn run(config: CallConfig, dial: Option<PeerId>) -> Result<(), CallError> {
    logger::init_logging(&config.logging)?;

    let url = config
        .signaling_url
        .clone()
        .ok_or_else(|| CallError::Transport("signaling url is not configured".into()))?;

    let engine = Arc::new(WebRtcEngine::new().map_err(CallError::EngineInit)?);
    let (handle, commands) = CallHandle::<RtcTrack>::channel();

    let (client, pump) = SignalingClient::connect(&url, handle.clone()).await?;
    let (manager, notifications) = CallManager::new(
        engine.clone(),
        Arc::new(client.clone()),
        CallSettings::from(&config),
    );

    handle.local_stream_ready(engine.capture_stream())?;
    if let Some(peer_id) = dial {
        handle.initiate(peer_id)?;
    }

    tokio::spawn(watch_notifications(notifications, handle.clone(), config.auto_accept));
    tokio::spawn(read_console(handle.clone()));

    manager.run(commands).await;

    client.disconnect();
    if let Err(e) = pump.await {
        warn!(error = %e, "signaling task ended abnormally");
    }
    Ok(())
}

async fn watch_notifications(
    mut notifications: NotificationReceiver,
    handle: CallHandle<RtcTrack>,
    auto_accept: bool,
) {
    while let Some(notification) = notifications.recv().await {
        match &notification {
            Notification::PendingOfferAdded { peer_id } if auto_accept => {
                info!(peer_id = %peer_id, "auto-accepting incoming call");
                if handle.accept(peer_id.clone()).is_err() {
                    break;
                }
            }
            Notification::PendingOfferAdded { peer_id } => {
                info!(peer_id = %peer_id, "incoming call, type `accept {peer_id}` or `decline {peer_id}`");
            }
            Notification::TelemetryUpdated { .. } | Notification::RemoteAudioLevel { .. } => {}
            other => info!(notification = ?other, "call state changed"),
        }
    }
}

async fn read_console(handle: CallHandle<RtcTrack>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("{}", ConsoleCommand::USAGE);
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "failed to read console input");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let command = match ConsoleCommand::parse(&line) {
            Ok(command) => command,
            Err(reason) => {
                warn!(%reason, "{}", ConsoleCommand::USAGE);
                continue;
            }
        };
        let quit = command == ConsoleCommand::Quit;
        if command.dispatch(&handle).is_err() || quit {
            return;
        }
    }
    // stdin закрыт
    let _ = handle.shutdown();
}

use crate::peer::engine::{EngineError, PeerConnection, SignalingState};
use crate::peer::session::{EventSink, SessionEventKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerConfig {
    pub stats_interval: Duration,
    pub audio_level_interval: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            stats_interval: Duration::from_millis(2000),
            audio_level_interval: Duration::from_millis(500),
        }
    }
}

/// Запускает периодический сбор статистики и уровня звука для сессии.
/// Оба таймера останавливаются по `cancel`, закрытию соединения или остановке менеджера.
pub fn spawn_sampler<C: PeerConnection>(
    connection: Arc<C>,
    sink: EventSink,
    cancel: CancellationToken,
    config: SamplerConfig,
) -> (JoinHandle<()>, JoinHandle<()>) {
    let stats = tokio::spawn(poll_stats(
        connection.clone(),
        sink.clone(),
        cancel.clone(),
        config.stats_interval,
    ));
    let audio = tokio::spawn(poll_audio_level(
        connection,
        sink,
        cancel,
        config.audio_level_interval,
    ));
    (stats, audio)
}

async fn poll_stats<C: PeerConnection>(
    connection: Arc<C>,
    sink: EventSink,
    cancel: CancellationToken,
    period: Duration,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if connection.signaling_state() == SignalingState::Closed {
            debug!(peer_id = %sink.peer_id(), "connection closed, stopping stats sampling");
            break;
        }

        let mut report = match connection.stats().await {
            Ok(report) => report,
            Err(e) => {
                warn!(peer_id = %sink.peer_id(), error = %e, "failed to read connection stats");
                continue;
            }
        };
        match connection.video_sender_stats().await {
            Ok(Some(sender)) => report.merge(sender),
            Ok(None) => {}
            Err(e) => debug!(peer_id = %sink.peer_id(), error = %e, "no video sender stats"),
        }

        if !sink.emit(SessionEventKind::StatsSampled(report)) {
            break;
        }
    }
}

async fn poll_audio_level<C: PeerConnection>(
    connection: Arc<C>,
    sink: EventSink,
    cancel: CancellationToken,
    period: Duration,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if connection.signaling_state() == SignalingState::Closed {
            break;
        }

        match connection.remote_audio_level().await {
            Ok(Some(level)) => {
                if !sink.emit(SessionEventKind::AudioLevel(level)) {
                    break;
                }
            }
            Ok(None) => {}
            Err(EngineError::Unsupported(what)) => {
                warn!(peer_id = %sink.peer_id(), "{what} is not supported, remote audio level unavailable");
                break;
            }
            Err(e) => debug!(peer_id = %sink.peer_id(), error = %e, "failed to read remote audio level"),
        }
    }
}

use crate::peer::engine::PeerConnectionState;
use crate::peer::session::SessionState;
use crate::peer::state::LocalMediaSnapshot;
use crate::peer::types::{MediaKind, PeerId};
use crate::signaling::ConnectionState;
use crate::telemetry::Telemetry;
use serde::Serialize;
use tokio::sync::mpsc;

/// Изменения состояния для слоя представления
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Notification {
    SessionStateChanged { peer_id: PeerId, state: SessionState },
    PendingOfferAdded { peer_id: PeerId },
    PendingOfferRemoved { peer_id: PeerId },
    ConnectionStateChanged { peer_id: PeerId, state: PeerConnectionState },
    TelemetryUpdated { peer_id: PeerId, telemetry: Telemetry },
    TelemetryCleared { peer_id: PeerId },
    RemoteTrack { peer_id: PeerId, kind: MediaKind },
    RemoteAudioLevel { peer_id: PeerId, level: f64 },
    LocalMediaChanged(LocalMediaSnapshot),
    BitrateChangeStarted { target_kbps: u32 },
    BitrateChangeCompleted { target_kbps: u32 },
    SignalingStateChanged { state: ConnectionState },
    ClientIdAssigned { client_id: String },
}

pub type NotificationReceiver = mpsc::UnboundedReceiver<Notification>;

/// Отправка уведомлений; отсутствие подписчика не ошибка
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl Notifier {
    pub fn channel() -> (Self, NotificationReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn notify(&self, notification: Notification) {
        let _ = self.tx.send(notification);
    }
}

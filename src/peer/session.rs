use crate::peer::engine::{PeerConnection, PeerConnectionState};
use crate::peer::types::{IceCandidate, MediaKind, PeerId};
use crate::telemetry::stats::StatsReport;
use crate::telemetry::TelemetryTracker;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Поколение сессии; по нему отбрасываются результаты от уже закрытых сессий
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    /// Мы звоним: offer создаётся или ждём answer
    Negotiating,
    /// Принимаем входящий offer
    AnsweringOffer,
    Established,
    Closed,
}

impl SessionState {
    fn can_transition_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Negotiating, SessionState::Established)
                | (SessionState::AnsweringOffer, SessionState::Established)
                | (_, SessionState::Closed)
        ) && self != SessionState::Closed
    }
}

/// Событие от движка для конкретной сессии
#[derive(Debug, Clone)]
pub enum SessionEventKind {
    LocalCandidate(IceCandidate),
    ConnectionState(PeerConnectionState),
    RemoteTrack(MediaKind),
    StatsSampled(StatsReport),
    AudioLevel(f64),
}

#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub peer_id: PeerId,
    pub session_id: SessionId,
    pub kind: SessionEventKind,
}

/// Канал, через который движок и таймеры сообщают о событиях сессии
#[derive(Debug, Clone)]
pub struct EventSink {
    peer_id: PeerId,
    session_id: SessionId,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    pub fn new(
        peer_id: PeerId,
        session_id: SessionId,
        tx: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            peer_id,
            session_id,
            tx,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// `false`, если менеджер звонков уже остановлен
    pub fn emit(&self, kind: SessionEventKind) -> bool {
        self.tx
            .send(SessionEvent {
                peer_id: self.peer_id.clone(),
                session_id: self.session_id,
                kind,
            })
            .is_ok()
    }
}

/// Сессия с одним удалённым пиром
pub struct Session<C: PeerConnection> {
    peer_id: PeerId,
    id: SessionId,
    state: SessionState,
    connection: Option<Arc<C>>,
    connection_state: PeerConnectionState,
    remote_offer: Option<String>,
    remote_description_applied: bool,
    pending_candidates: Vec<IceCandidate>,
    cancel: CancellationToken,
    telemetry: TelemetryTracker,
    sampler_started: bool,
}

impl<C: PeerConnection> Session<C> {
    pub fn new(peer_id: PeerId, id: SessionId, state: SessionState) -> Self {
        Self {
            peer_id,
            id,
            state,
            connection: None,
            connection_state: PeerConnectionState::New,
            remote_offer: None,
            remote_description_applied: false,
            pending_candidates: Vec::new(),
            cancel: CancellationToken::new(),
            telemetry: TelemetryTracker::default(),
            sampler_started: false,
        }
    }

    /// Сессия принимающей стороны: offer и кандидаты, пришедшие до accept
    pub fn answering(
        peer_id: PeerId,
        id: SessionId,
        offer_sdp: String,
        candidates: Vec<IceCandidate>,
    ) -> Self {
        let mut session = Self::new(peer_id, id, SessionState::AnsweringOffer);
        session.remote_offer = Some(offer_sdp);
        session.pending_candidates = candidates;
        session
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Переход состояния; недопустимый переход логируется и игнорируется
    pub fn transition(&mut self, next: SessionState) -> bool {
        if !self.state.can_transition_to(next) {
            warn!(
                peer_id = %self.peer_id,
                from = ?self.state,
                to = ?next,
                "invalid session state transition"
            );
            return false;
        }
        debug!(peer_id = %self.peer_id, from = ?self.state, to = ?next, "session state changed");
        self.state = next;
        true
    }

    pub fn connection(&self) -> Option<&Arc<C>> {
        self.connection.as_ref()
    }

    pub fn attach_connection(&mut self, connection: Arc<C>) {
        self.connection = Some(connection);
    }

    pub fn connection_state(&self) -> PeerConnectionState {
        self.connection_state
    }

    pub fn set_connection_state(&mut self, state: PeerConnectionState) {
        self.connection_state = state;
    }

    pub fn remote_offer(&self) -> Option<&str> {
        self.remote_offer.as_deref()
    }

    pub fn remote_description_applied(&self) -> bool {
        self.remote_description_applied
    }

    pub fn mark_remote_description_applied(&mut self) {
        self.remote_description_applied = true;
    }

    /// Кандидат пришёл раньше remote description
    pub fn buffer_candidate(&mut self, candidate: IceCandidate) {
        self.pending_candidates.push(candidate);
    }

    pub fn pending_candidates(&self) -> &[IceCandidate] {
        &self.pending_candidates
    }

    pub fn take_pending_candidates(&mut self) -> Vec<IceCandidate> {
        std::mem::take(&mut self.pending_candidates)
    }

    /// Токен отмены таймеров и незавершённых шагов согласования
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn telemetry(&self) -> &TelemetryTracker {
        &self.telemetry
    }

    pub fn telemetry_mut(&mut self) -> &mut TelemetryTracker {
        &mut self.telemetry
    }

    pub fn sampler_started(&self) -> bool {
        self.sampler_started
    }

    pub fn mark_sampler_started(&mut self) {
        self.sampler_started = true;
    }

    /// Переводит сессию в Closed и отдаёт соединение для закрытия
    pub fn close(&mut self) -> Option<Arc<C>> {
        self.transition(SessionState::Closed);
        self.cancel.cancel();
        self.telemetry.clear();
        self.pending_candidates.clear();
        self.connection.take()
    }
}

impl<C: PeerConnection> Drop for Session<C> {
    fn drop(&mut self) {
        self.cancel.cancel();
        debug!(peer_id = %self.peer_id, session_id = %self.id, "session dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use SessionState::*;
        assert!(Negotiating.can_transition_to(Established));
        assert!(AnsweringOffer.can_transition_to(Established));
        assert!(Established.can_transition_to(Closed));
        assert!(Negotiating.can_transition_to(Closed));
        assert!(!Established.can_transition_to(Negotiating));
        assert!(!Negotiating.can_transition_to(AnsweringOffer));
        assert!(!Closed.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(Established));
    }

    #[test]
    fn test_event_sink_reports_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(PeerId::from("a"), SessionId::new(1), tx);
        assert!(sink.emit(SessionEventKind::RemoteTrack(MediaKind::Audio)));
        drop(rx);
        assert!(!sink.emit(SessionEventKind::RemoteTrack(MediaKind::Video)));
    }
}

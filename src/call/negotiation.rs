use super::completion::{Outcome, StepContext};
use super::CallManager;
use crate::bandwidth::update_bandwidth_restriction;
use crate::notification::Notification;
use crate::peer::engine::{PeerConnection, RtcEngine};
use crate::peer::session::{Session, SessionState};
use crate::peer::state::PendingOffer;
use crate::peer::types::{IceCandidate, PeerId, SessionDescription};
use crate::signaling::SignalingMessage;
use tracing::{debug, error, info, warn};

impl<E: RtcEngine> CallManager<E> {
    /// Исходящий звонок. Пока есть активная сессия, новый звонок не начинается.
    pub(crate) fn initiate(&mut self, peer_id: PeerId) {
        if self.registry.contains(&peer_id) {
            info!(peer_id = %peer_id, "already in a call with this peer");
            return;
        }
        if !self.registry.is_empty() {
            warn!(peer_id = %peer_id, "already in a call, not calling another peer");
            return;
        }

        let session_id = self.allocate_session_id();
        let session = Session::new(peer_id.clone(), session_id, SessionState::Negotiating);
        if let Err(e) = self.registry.create(session) {
            error!(error = %e, "could not create session");
            return;
        }
        info!(peer_id = %peer_id, "calling peer");
        self.notify_session_state(&peer_id, SessionState::Negotiating);
        self.create_connection(peer_id, session_id);
    }

    pub(crate) fn accept(&mut self, peer_id: PeerId) {
        let Some(offer) = self.pending_offers.remove(&peer_id) else {
            warn!(peer_id = %peer_id, "no pending offer to accept");
            return;
        };
        self.notifier.notify(Notification::PendingOfferRemoved {
            peer_id: peer_id.clone(),
        });

        if !self.registry.is_empty() {
            warn!(peer_id = %peer_id, "already in a call, rejecting accepted offer");
            self.send_signaling(SignalingMessage::bye(peer_id));
            return;
        }

        let session_id = self.allocate_session_id();
        let PendingOffer {
            sdp, candidates, ..
        } = offer;
        let session = Session::answering(peer_id.clone(), session_id, sdp, candidates);
        if let Err(e) = self.registry.create(session) {
            error!(error = %e, "could not create session");
            return;
        }
        info!(peer_id = %peer_id, "accepting call");
        self.notify_session_state(&peer_id, SessionState::AnsweringOffer);
        self.create_connection(peer_id, session_id);
    }

    pub(crate) fn decline(&mut self, peer_id: PeerId) {
        if self.pending_offers.remove(&peer_id).is_none() {
            warn!(peer_id = %peer_id, "no pending offer to decline");
            return;
        }
        info!(peer_id = %peer_id, "declining call");
        self.notifier.notify(Notification::PendingOfferRemoved {
            peer_id: peer_id.clone(),
        });
        self.send_signaling(SignalingMessage::bye(peer_id));
    }

    pub(crate) fn offer_received(&mut self, peer_id: PeerId, sdp: String) {
        if self.registry.contains(&peer_id) {
            info!(peer_id = %peer_id, "renegotiation is not supported, ignoring offer");
            return;
        }
        // ожидающий offer от другого пира тоже считается занятостью
        if !self.registry.is_empty() || self.pending_offers.has_other_than(&peer_id) {
            info!(peer_id = %peer_id, "busy, rejecting offer");
            self.send_signaling(SignalingMessage::bye(peer_id));
            return;
        }

        if self.pending_offers.upsert(PendingOffer::new(peer_id.clone(), sdp)) {
            debug!(peer_id = %peer_id, "pending offer superseded");
        } else {
            info!(peer_id = %peer_id, "incoming call");
            self.notifier
                .notify(Notification::PendingOfferAdded { peer_id });
        }
    }

    pub(crate) fn answer_received(&mut self, peer_id: PeerId, sdp: String) {
        let bitrate = self.bitrate.target_kbps();
        let convention = self.bandwidth_convention;
        let Some(session) = self.registry.get(&peer_id) else {
            info!(peer_id = %peer_id, "answer for unknown peer, ignoring");
            return;
        };
        if session.state() != SessionState::Negotiating {
            warn!(peer_id = %peer_id, state = ?session.state(), "unexpected answer, ignoring");
            return;
        }
        let Some(connection) = session.connection().cloned() else {
            warn!(peer_id = %peer_id, "answer arrived before offer was sent, ignoring");
            return;
        };
        let (session_id, cancel) = (session.id(), session.cancel_token());

        let sdp = if bitrate > 0 {
            update_bandwidth_restriction(&sdp, bitrate, convention)
        } else {
            sdp
        };
        self.spawn_step(peer_id, session_id, cancel, async move {
            match connection
                .set_remote_description(SessionDescription::answer(sdp))
                .await
                .step("set_remote_description")
            {
                Ok(()) => Outcome::RemoteAnswerApplied,
                Err(e) => Outcome::Failed(e),
            }
        });
    }

    /// Кандидаты до remote description копятся в сессии, до accept в ожидающем offer
    pub(crate) fn add_ice_candidate(&mut self, peer_id: PeerId, candidate: IceCandidate) {
        if let Some(session) = self.registry.get_mut(&peer_id) {
            let ready = if session.remote_description_applied() {
                session.connection().cloned()
            } else {
                None
            };
            let Some(connection) = ready else {
                debug!(peer_id = %peer_id, "remote description not set yet, queuing candidate");
                session.buffer_candidate(candidate);
                return;
            };
            let (session_id, cancel) = (session.id(), session.cancel_token());
            self.spawn_step(peer_id, session_id, cancel, async move {
                match connection.add_ice_candidate(candidate).await.step("add_ice_candidate") {
                    Ok(()) => Outcome::CandidatesApplied {
                        applied: 1,
                        failed: 0,
                    },
                    Err(e) => Outcome::Failed(e),
                }
            });
        } else if let Some(offer) = self.pending_offers.get_mut(&peer_id) {
            debug!(peer_id = %peer_id, "queuing candidate for pending offer");
            offer.candidates.push(candidate);
        } else {
            info!(peer_id = %peer_id, "candidate for unknown peer, dropping");
        }
    }

    /// Удалённый bye: снимает ожидающий offer или закрывает сессию
    pub(crate) fn close_peer_connection(&mut self, peer_id: PeerId, error: Option<String>) {
        if let Some(reason) = &error {
            info!(peer_id = %peer_id, reason = %reason, "peer closed the connection with error");
        }
        if self.pending_offers.remove(&peer_id).is_some() {
            info!(peer_id = %peer_id, "caller withdrew the offer");
            self.notifier.notify(Notification::PendingOfferRemoved { peer_id });
            return;
        }
        if !self.teardown(&peer_id) {
            info!(peer_id = %peer_id, "bye for unknown peer, ignoring");
        }
    }

    /// Завершает все звонки и шлёт bye каждому пиру
    pub(crate) fn hang_up(&mut self) {
        let peers = self.registry.peer_ids();
        if peers.is_empty() {
            debug!("nothing to hang up");
            return;
        }
        for peer_id in peers {
            info!(peer_id = %peer_id, "hanging up");
            self.teardown(&peer_id);
            self.send_signaling(SignalingMessage::bye(peer_id));
        }
    }

    /// Закрывает сессию: отменяет таймеры и шаги, закрывает соединение.
    /// Повторный вызов ничего не делает.
    pub(crate) fn teardown(&mut self, peer_id: &PeerId) -> bool {
        let Some(mut session) = self.registry.remove(peer_id) else {
            return false;
        };
        if let Some(connection) = session.close() {
            self.spawn_close(peer_id.clone(), connection);
        }
        info!(peer_id = %peer_id, session_id = %session.id(), "session closed");
        self.notify_session_state(peer_id, SessionState::Closed);
        self.notifier.notify(Notification::TelemetryCleared {
            peer_id: peer_id.clone(),
        });
        true
    }
}

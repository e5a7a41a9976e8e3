use super::CallManager;
use crate::bandwidth::set_preferred_codec;
use crate::error::CallError;
use crate::logger::log_selected_pair;
use crate::notification::Notification;
use crate::peer::engine::{EngineError, PeerConnection, PeerConnectionState, RtcEngine};
use crate::peer::ice::apply_candidates;
use crate::peer::session::{EventSink, Session, SessionEvent, SessionEventKind, SessionId, SessionState};
use crate::peer::types::{CodecCapability, MediaKind, PeerId, SessionDescription};
use crate::signaling::SignalingMessage;
use crate::telemetry::sampler::spawn_sampler;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Результат асинхронного шага, возвращённый в менеджер
pub(crate) struct Completion<C> {
    pub peer_id: PeerId,
    pub session_id: Option<SessionId>,
    pub outcome: Outcome<C>,
}

pub(crate) enum Outcome<C> {
    ConnectionCreated(Arc<C>),
    OfferReady(SessionDescription),
    AnswerReady(SessionDescription),
    RemoteAnswerApplied,
    CandidatesApplied { applied: usize, failed: usize },
    BitrateApplied { generation: u64 },
    Failed(StepError),
    Cancelled,
    Done,
}

/// Ошибка шага согласования с именем операции движка
pub(crate) struct StepError {
    pub op: &'static str,
    pub source: EngineError,
}

pub(crate) trait StepContext<T> {
    fn step(self, op: &'static str) -> Result<T, StepError>;
}

impl<T> StepContext<T> for Result<T, EngineError> {
    fn step(self, op: &'static str) -> Result<T, StepError> {
        self.map_err(|source| StepError { op, source })
    }
}

impl<C> From<Result<Outcome<C>, StepError>> for Outcome<C> {
    fn from(result: Result<Outcome<C>, StepError>) -> Self {
        result.unwrap_or_else(Outcome::Failed)
    }
}

impl<E: RtcEngine> CallManager<E> {
    /// Шаг, привязанный к сессии: отменяется вместе с ней
    pub(crate) fn spawn_step<F>(
        &mut self,
        peer_id: PeerId,
        session_id: SessionId,
        cancel: CancellationToken,
        step: F,
    ) where
        F: Future<Output = Outcome<E::Connection>> + Send + 'static,
    {
        self.in_flight.push(Box::pin(async move {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Outcome::Cancelled,
                outcome = step => outcome,
            };
            Completion {
                peer_id,
                session_id: Some(session_id),
                outcome,
            }
        }));
    }

    /// Шаг, который доводится до конца даже после закрытия сессии
    pub(crate) fn spawn_detached<F>(&mut self, peer_id: PeerId, session_id: Option<SessionId>, step: F)
    where
        F: Future<Output = Outcome<E::Connection>> + Send + 'static,
    {
        self.in_flight.push(Box::pin(async move {
            Completion {
                peer_id,
                session_id,
                outcome: step.await,
            }
        }));
    }

    pub(crate) fn spawn_close(&mut self, peer_id: PeerId, connection: Arc<E::Connection>) {
        let peer = peer_id.clone();
        self.spawn_detached(peer_id, None, async move {
            if let Err(e) = connection.close().await {
                warn!(peer_id = %peer, error = %e, "failed to close peer connection");
            }
            Outcome::Done
        });
    }

    pub(crate) fn create_connection(&mut self, peer_id: PeerId, session_id: SessionId) {
        let engine = self.engine.clone();
        let ice_servers = self.ice_servers.clone();
        let sink = EventSink::new(peer_id.clone(), session_id, self.events_tx.clone());
        // не отменяется: созданное соединение надо закрыть, даже если сессии уже нет
        self.spawn_detached(peer_id, Some(session_id), async move {
            match engine.create_connection(&ice_servers, sink).await {
                Ok(connection) => Outcome::ConnectionCreated(connection),
                Err(source) => Outcome::Failed(StepError {
                    op: "create_connection",
                    source,
                }),
            }
        });
    }

    /// Сессия, к которой относится результат, если она ещё жива
    fn live_session(&mut self, peer_id: &PeerId, session_id: SessionId) -> Option<&mut Session<E::Connection>> {
        self.registry
            .get_mut(peer_id)
            .filter(|s| s.id() == session_id)
    }

    pub(crate) fn complete(&mut self, completion: Completion<E::Connection>) {
        let Completion {
            peer_id,
            session_id,
            outcome,
        } = completion;

        if let Outcome::BitrateApplied { generation } = outcome {
            self.bitrate_applied(generation);
            return;
        }
        let Some(session_id) = session_id else {
            return;
        };

        if self.live_session(&peer_id, session_id).is_none() {
            match outcome {
                Outcome::ConnectionCreated(connection) => {
                    debug!(peer_id = %peer_id, session_id = %session_id, "session gone before connection was ready, closing it");
                    self.spawn_close(peer_id, connection);
                }
                _ => debug!(peer_id = %peer_id, session_id = %session_id, "dropping result for closed session"),
            }
            return;
        }

        match outcome {
            Outcome::ConnectionCreated(connection) => self.connection_created(peer_id, session_id, connection),
            Outcome::OfferReady(offer) => {
                info!(peer_id = %peer_id, "sending offer");
                self.send_signaling(SignalingMessage::offer(peer_id, offer.sdp));
            }
            Outcome::AnswerReady(answer) => {
                info!(peer_id = %peer_id, "sending answer");
                self.send_signaling(SignalingMessage::answer(peer_id.clone(), answer.sdp));
                self.remote_description_applied(&peer_id, session_id);
            }
            Outcome::RemoteAnswerApplied => {
                info!(peer_id = %peer_id, "remote answer applied");
                self.remote_description_applied(&peer_id, session_id);
            }
            Outcome::CandidatesApplied { applied, failed } => {
                debug!(peer_id = %peer_id, applied, failed, "remote candidates applied");
            }
            Outcome::Failed(StepError { op, source }) => {
                // сессия остаётся в последнем корректном состоянии
                let err = CallError::Engine {
                    op,
                    peer_id,
                    source,
                };
                error!(error = %err, "negotiation step failed");
            }
            Outcome::Cancelled | Outcome::Done | Outcome::BitrateApplied { .. } => {}
        }
    }

    fn connection_created(&mut self, peer_id: PeerId, session_id: SessionId, connection: Arc<E::Connection>) {
        let tracks = self.media.active_tracks();
        let codecs = self.codecs.entries();
        let Some(session) = self.live_session(&peer_id, session_id) else {
            return;
        };
        session.attach_connection(connection.clone());
        let cancel = session.cancel_token();

        match session.state() {
            SessionState::Negotiating => {
                debug!(peer_id = %peer_id, "creating offer");
                let step = negotiate_offer(connection, tracks, codecs);
                self.spawn_step(peer_id, session_id, cancel, async move { Outcome::from(step.await) });
            }
            SessionState::AnsweringOffer => {
                let Some(offer) = session.remote_offer().map(str::to_owned) else {
                    warn!(peer_id = %peer_id, "answering session has no offer");
                    return;
                };
                debug!(peer_id = %peer_id, "creating answer");
                let step = negotiate_answer(connection, tracks, codecs, offer);
                self.spawn_step(peer_id, session_id, cancel, async move { Outcome::from(step.await) });
            }
            SessionState::Established | SessionState::Closed => {}
        }
    }

    /// Remote description применён: сессия установлена, отложенные кандидаты уходят в движок
    fn remote_description_applied(&mut self, peer_id: &PeerId, session_id: SessionId) {
        let Some(session) = self.live_session(peer_id, session_id) else {
            return;
        };
        session.mark_remote_description_applied();
        if !session.transition(SessionState::Established) {
            return;
        }
        let candidates = session.take_pending_candidates();
        let connection = session.connection().cloned();
        let cancel = session.cancel_token();
        self.notify_session_state(peer_id, SessionState::Established);

        if let Some(connection) = connection {
            if !candidates.is_empty() {
                debug!(peer_id = %peer_id, count = candidates.len(), "applying buffered candidates");
                self.spawn_step(peer_id.clone(), session_id, cancel, async move {
                    let (applied, failed) = apply_candidates(connection.as_ref(), candidates).await;
                    Outcome::CandidatesApplied { applied, failed }
                });
            }
        }
        self.maybe_start_sampler(peer_id);
    }

    /// Статистика собирается только для установленной и подключённой сессии
    fn maybe_start_sampler(&mut self, peer_id: &PeerId) {
        let config = self.sampler;
        let events = self.events_tx.clone();
        let Some(session) = self.registry.get_mut(peer_id) else {
            return;
        };
        if session.sampler_started()
            || session.state() != SessionState::Established
            || session.connection_state() != PeerConnectionState::Connected
        {
            return;
        }
        let Some(connection) = session.connection().cloned() else {
            return;
        };
        session.mark_sampler_started();
        debug!(peer_id = %peer_id, "starting telemetry sampling");
        let sink = EventSink::new(peer_id.clone(), session.id(), events);
        spawn_sampler(connection, sink, session.cancel_token(), config);
    }

    pub(crate) fn handle_session_event(&mut self, event: SessionEvent) {
        let SessionEvent {
            peer_id,
            session_id,
            kind,
        } = event;
        let Some(session) = self.live_session(&peer_id, session_id) else {
            debug!(peer_id = %peer_id, session_id = %session_id, "dropping event for closed session");
            return;
        };

        match kind {
            SessionEventKind::LocalCandidate(candidate) => {
                self.send_signaling(SignalingMessage::candidate(peer_id, candidate));
            }
            SessionEventKind::ConnectionState(state) => {
                info!(peer_id = %peer_id, ?state, "peer connection state changed");
                session.set_connection_state(state);
                if matches!(state, PeerConnectionState::Disconnected | PeerConnectionState::Failed) {
                    if let Some(report) = session.telemetry().last_report() {
                        log_selected_pair(report, "before-fail");
                    }
                }
                self.notifier.notify(Notification::ConnectionStateChanged {
                    peer_id: peer_id.clone(),
                    state,
                });
                match state {
                    PeerConnectionState::Connected => self.maybe_start_sampler(&peer_id),
                    PeerConnectionState::Failed => {
                        warn!(peer_id = %peer_id, "peer connection failed, closing session");
                        self.teardown(&peer_id);
                    }
                    _ => {}
                }
            }
            SessionEventKind::RemoteTrack(kind) => {
                info!(peer_id = %peer_id, %kind, "remote track received");
                self.notifier.notify(Notification::RemoteTrack { peer_id, kind });
            }
            SessionEventKind::StatsSampled(report) => {
                let telemetry = session.telemetry_mut().update(report).clone();
                self.notifier
                    .notify(Notification::TelemetryUpdated { peer_id, telemetry });
            }
            SessionEventKind::AudioLevel(level) => {
                self.notifier
                    .notify(Notification::RemoteAudioLevel { peer_id, level });
            }
        }
    }
}

async fn add_local_media<C: PeerConnection>(
    connection: &C,
    tracks: &[C::Track],
    codecs: &[(MediaKind, CodecCapability)],
) -> Result<(), StepError> {
    for track in tracks {
        connection.add_track(track).await.step("add_track")?;
    }
    for (kind, codec) in codecs {
        // порядок кодеков не критичен для звонка
        if let Err(e) = set_preferred_codec(connection, *kind, codec).await {
            warn!(%kind, error = %e, "failed to apply codec preference");
        }
    }
    Ok(())
}

async fn negotiate_offer<C: PeerConnection>(
    connection: Arc<C>,
    tracks: Vec<C::Track>,
    codecs: Vec<(MediaKind, CodecCapability)>,
) -> Result<Outcome<C>, StepError> {
    add_local_media(connection.as_ref(), &tracks, &codecs).await?;
    let offer = connection.create_offer().await.step("create_offer")?;
    connection
        .set_local_description(offer.clone())
        .await
        .step("set_local_description")?;
    Ok(Outcome::OfferReady(offer))
}

async fn negotiate_answer<C: PeerConnection>(
    connection: Arc<C>,
    tracks: Vec<C::Track>,
    codecs: Vec<(MediaKind, CodecCapability)>,
    offer_sdp: String,
) -> Result<Outcome<C>, StepError> {
    add_local_media(connection.as_ref(), &tracks, &codecs).await?;
    connection
        .set_remote_description(SessionDescription::offer(offer_sdp))
        .await
        .step("set_remote_description")?;
    let answer = connection.create_answer().await.step("create_answer")?;
    connection
        .set_local_description(answer.clone())
        .await
        .step("set_local_description")?;
    Ok(Outcome::AnswerReady(answer))
}

//! Менеджер звонков: единственный владелец состояния сессий.
//!
//! Все изменения состояния происходят синхронно в `handle`; асинхронные вызовы
//! движка выполняются в `in_flight` и возвращаются как `Completion`, которые
//! перед применением сверяются с текущей сессией.

mod completion;
mod media;
mod negotiation;

use crate::bandwidth::BandwidthConvention;
use crate::commands::{Command, CommandReceiver};
use crate::config::CallConfig;
use crate::notification::{Notification, NotificationReceiver, Notifier};
use crate::peer::engine::RtcEngine;
use crate::peer::registry::SessionRegistry;
use crate::peer::session::{SessionEvent, SessionId, SessionState};
use crate::peer::state::{BitratePreference, CodecPreferences, LocalMediaState, PendingOffers};
use crate::peer::types::{CodecCapability, IceServer, PeerId};
use crate::signaling::{ConnectionState, Frame, SignalingMessage, SignalingSink};
use crate::telemetry::sampler::SamplerConfig;
use completion::Completion;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Настройки менеджера, собранные из конфигурации
#[derive(Debug, Clone, Default)]
pub struct CallSettings {
    pub ice_servers: Vec<IceServer>,
    pub sampler: SamplerConfig,
    pub max_bitrate_kbps: u32,
    pub bandwidth_convention: BandwidthConvention,
    pub codecs: CodecPreferences,
}

impl From<&CallConfig> for CallSettings {
    fn from(config: &CallConfig) -> Self {
        Self {
            ice_servers: config.ice_servers(),
            sampler: SamplerConfig {
                stats_interval: Duration::from_millis(config.stats_interval_ms),
                audio_level_interval: Duration::from_millis(config.audio_level_interval_ms),
            },
            max_bitrate_kbps: config.max_bitrate_kbps,
            bandwidth_convention: config.bandwidth_convention,
            codecs: CodecPreferences {
                audio: config
                    .preferred_audio_codec
                    .as_deref()
                    .map(CodecCapability::from_mime),
                video: config
                    .preferred_video_codec
                    .as_deref()
                    .map(CodecCapability::from_mime),
            },
        }
    }
}

pub struct CallManager<E: RtcEngine> {
    engine: Arc<E>,
    signaling: Arc<dyn SignalingSink>,
    notifier: Notifier,

    registry: SessionRegistry<E::Connection>,
    pending_offers: PendingOffers,
    media: LocalMediaState<E::Track>,
    bitrate: BitratePreference,
    codecs: CodecPreferences,
    ice_servers: Vec<IceServer>,
    sampler: SamplerConfig,
    bandwidth_convention: BandwidthConvention,

    client_id: Option<String>,
    transport_state: ConnectionState,
    next_session_id: u64,

    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    in_flight: FuturesUnordered<BoxFuture<'static, Completion<E::Connection>>>,
}

impl<E: RtcEngine> CallManager<E> {
    pub fn new(
        engine: Arc<E>,
        signaling: Arc<dyn SignalingSink>,
        settings: CallSettings,
    ) -> (Self, NotificationReceiver) {
        let (notifier, notifications) = Notifier::channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let manager = Self {
            engine,
            signaling,
            notifier,
            registry: SessionRegistry::new(),
            pending_offers: PendingOffers::default(),
            media: LocalMediaState::default(),
            bitrate: BitratePreference::new(settings.max_bitrate_kbps),
            codecs: settings.codecs,
            ice_servers: settings.ice_servers,
            sampler: settings.sampler,
            bandwidth_convention: settings.bandwidth_convention,
            client_id: None,
            transport_state: ConnectionState::Disconnected,
            next_session_id: 0,
            events_tx,
            events_rx,
            in_flight: FuturesUnordered::new(),
        };
        (manager, notifications)
    }

    /// Основной цикл. Завершается по `Shutdown` или когда все `CallHandle` закрыты.
    pub async fn run(mut self, mut commands: CommandReceiver<E::Track>) {
        info!("call manager started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle(command) {
                            break;
                        }
                    }
                    None => {
                        debug!("all call handles dropped");
                        self.hang_up();
                        break;
                    }
                },
                Some(event) = self.events_rx.recv() => self.handle_session_event(event),
                Some(completion) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                    self.complete(completion);
                }
            }
        }

        // дожидаемся закрытия соединений
        while let Some(completion) = self.in_flight.next().await {
            self.complete(completion);
        }
        info!("call manager stopped");
    }

    /// Обрабатывает одну команду. `false` означает остановку менеджера.
    pub fn handle(&mut self, command: Command<E::Track>) -> bool {
        debug!(command = command.name(), "handling command");
        match command {
            Command::Initiate(peer_id) => self.initiate(peer_id),
            Command::Accept(peer_id) => self.accept(peer_id),
            Command::Decline(peer_id) => self.decline(peer_id),
            Command::HangUp => self.hang_up(),
            Command::Signaling(message) => self.handle_signaling(message),
            Command::TransportState(state) => self.set_transport_state(state),
            Command::LocalStreamReady(stream) => self.local_stream_ready(stream),
            Command::MuteAudio => self.set_audio_muted(true),
            Command::UnmuteAudio => self.set_audio_muted(false),
            Command::MuteVideo => self.set_video_muted(true),
            Command::UnmuteVideo => self.set_video_muted(false),
            Command::StartScreenShare(track) => self.start_screen_share(track),
            Command::StopScreenShare => self.stop_screen_share(),
            Command::UpdateMaximumBitrate(kbps) => self.update_maximum_bitrate(kbps),
            Command::UpdateCodec { kind, codec } => self.update_codec(kind, codec),
            Command::Shutdown => {
                info!("shutting down call manager");
                self.hang_up();
                return false;
            }
        }
        true
    }

    /// Прогоняет все готовые события и незавершённые шаги, пока они не кончатся.
    /// Таймеры статистики сюда не входят.
    pub async fn settle(&mut self) {
        loop {
            let mut progressed = false;
            while let Ok(event) = self.events_rx.try_recv() {
                self.handle_session_event(event);
                progressed = true;
            }
            if let Some(completion) = self.in_flight.next().await {
                self.complete(completion);
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
    }

    fn handle_signaling(&mut self, message: SignalingMessage) {
        match message {
            SignalingMessage::Hello(hello) => {
                info!(client_id = %hello.id, "signaling server assigned client id");
                self.client_id = Some(hello.id.clone());
                self.notifier
                    .notify(Notification::ClientIdAssigned { client_id: hello.id });
            }
            SignalingMessage::IceServers(payload) => {
                info!(count = payload.ice_servers.len(), "ICE servers updated");
                self.ice_servers = payload.ice_servers;
            }
            SignalingMessage::Offer(offer) => self.offer_received(offer.id, offer.sdp),
            SignalingMessage::Answer(answer) => self.answer_received(answer.id, answer.sdp),
            SignalingMessage::Candidate(c) => self.add_ice_candidate(c.id, c.candidate),
            SignalingMessage::Bye(bye) => self.close_peer_connection(bye.id, bye.error),
        }
    }

    fn set_transport_state(&mut self, state: ConnectionState) {
        if self.transport_state == state {
            return;
        }
        info!(from = %self.transport_state, to = %state, "signaling channel state changed");
        // сессии живут независимо от сигнального канала
        self.transport_state = state;
        self.notifier
            .notify(Notification::SignalingStateChanged { state });
    }

    /// Исходящие сообщения при неподключённом канале отбрасываются
    fn send_signaling(&self, message: SignalingMessage) {
        if self.transport_state != ConnectionState::Connected {
            warn!(
                kind = message.kind(),
                state = %self.transport_state,
                "signaling channel not connected, dropping outbound message"
            );
            return;
        }
        let kind = message.kind();
        if let Err(e) = self.signaling.send(Frame::Message(message)) {
            warn!(kind, error = %e, "failed to send signaling message");
        }
    }

    fn allocate_session_id(&mut self) -> SessionId {
        self.next_session_id += 1;
        SessionId::new(self.next_session_id)
    }

    fn notify_session_state(&self, peer_id: &PeerId, state: SessionState) {
        self.notifier.notify(Notification::SessionStateChanged {
            peer_id: peer_id.clone(),
            state,
        });
    }

    // ===== accessors =====

    pub fn registry(&self) -> &SessionRegistry<E::Connection> {
        &self.registry
    }

    pub fn pending_offers(&self) -> &PendingOffers {
        &self.pending_offers
    }

    pub fn local_media(&self) -> &LocalMediaState<E::Track> {
        &self.media
    }

    pub fn bitrate(&self) -> &BitratePreference {
        &self.bitrate
    }

    pub fn codecs(&self) -> &CodecPreferences {
        &self.codecs
    }

    pub fn ice_servers(&self) -> &[IceServer] {
        &self.ice_servers
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn transport_state(&self) -> ConnectionState {
        self.transport_state
    }

    pub fn session_state(&self, peer_id: &PeerId) -> Option<SessionState> {
        self.registry.get(peer_id).map(|s| s.state())
    }
}

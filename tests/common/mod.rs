//! In-memory движок и сигнальный канал для интеграционных тестов.
#![allow(dead_code)]

use async_trait::async_trait;
use peercall_lib::call::{CallManager, CallSettings};
use peercall_lib::commands::Command;
use peercall_lib::error::CallError;
use peercall_lib::notification::{Notification, NotificationReceiver};
use peercall_lib::peer::engine::{
    EngineError, MediaTrack, PeerConnection, RtcEngine, SendEncoding, SendParameters, SignalingState,
};
use peercall_lib::peer::session::{EventSink, SessionEventKind, SessionState};
use peercall_lib::peer::state::LocalStream;
use peercall_lib::peer::types::{
    CodecCapability, IceCandidate, IceServer, MediaKind, PeerId, SessionDescription,
};
use peercall_lib::signaling::{ConnectionState, Frame, SignalingMessage, SignalingSink};
use peercall_lib::telemetry::stats::StatsReport;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub const REMOTE_OFFER: &str = "v=0\r\no=- 42 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\nc=IN IP4 0.0.0.0\r\na=rtpmap:111 opus/48000/2\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96\r\nc=IN IP4 0.0.0.0\r\na=rtpmap:96 VP8/90000\r\n";

pub const REMOTE_ANSWER: &str = "v=0\r\no=- 43 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\nc=IN IP4 0.0.0.0\r\na=rtpmap:111 opus/48000/2\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96\r\nc=IN IP4 0.0.0.0\r\na=rtpmap:96 VP8/90000\r\n";

pub fn candidate(n: u16) -> IceCandidate {
    let mut c = IceCandidate::new(format!(
        "candidate:{n} 1 udp 2122260223 192.168.1.{n} {} typ host",
        50000 + n
    ));
    c.sdp_mid = Some("0".into());
    c.sdp_mline_index = Some(0);
    c
}

// ===== tracks =====

#[derive(Clone, Debug)]
pub struct MockTrack {
    id: String,
    kind: MediaKind,
    enabled: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

impl MockTrack {
    pub fn new(id: &str, kind: MediaKind) -> Self {
        Self {
            id: id.to_owned(),
            kind,
            enabled: Arc::new(AtomicBool::new(true)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl MediaTrack for MockTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

// ===== connection =====

pub struct MockConnection {
    pub peer_id: PeerId,
    events: EventSink,
    failures: HashSet<&'static str>,
    supports_params: bool,
    calls: Mutex<Vec<&'static str>>,
    remote_descriptions: Mutex<Vec<SessionDescription>>,
    local_descriptions: Mutex<Vec<SessionDescription>>,
    candidates: Mutex<Vec<IceCandidate>>,
    tracks: Mutex<Vec<String>>,
    video_track: Mutex<Option<String>>,
    send_parameters: Mutex<SendParameters>,
    codecs: Mutex<Vec<(MediaKind, Vec<CodecCapability>)>>,
    closed: AtomicBool,
}

impl MockConnection {
    fn check(&self, op: &'static str) -> Result<(), EngineError> {
        self.calls.lock().unwrap().push(op);
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        if self.failures.contains(op) {
            return Err(EngineError::Other(format!("{op} failed")));
        }
        Ok(())
    }

    /// Событие от движка, как будто его прислал webrtc
    pub fn emit(&self, kind: SessionEventKind) {
        self.events.emit(kind);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == op).count()
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.remote_descriptions.lock().unwrap().clone()
    }

    pub fn local_descriptions(&self) -> Vec<SessionDescription> {
        self.local_descriptions.lock().unwrap().clone()
    }

    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().unwrap().clone()
    }

    pub fn tracks(&self) -> Vec<String> {
        self.tracks.lock().unwrap().clone()
    }

    pub fn video_track(&self) -> Option<String> {
        self.video_track.lock().unwrap().clone()
    }

    pub fn send_parameters(&self) -> SendParameters {
        self.send_parameters.lock().unwrap().clone()
    }

    pub fn codecs(&self, kind: MediaKind) -> Vec<CodecCapability> {
        self.codecs
            .lock()
            .unwrap()
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, c)| c.clone())
            .unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerConnection for MockConnection {
    type Track = MockTrack;

    async fn add_track(&self, track: &MockTrack) -> Result<(), EngineError> {
        self.check("add_track")?;
        self.tracks.lock().unwrap().push(track.id().to_owned());
        if track.kind() == MediaKind::Video {
            *self.video_track.lock().unwrap() = Some(track.id().to_owned());
        }
        Ok(())
    }

    async fn replace_video_track(&self, track: &MockTrack) -> Result<bool, EngineError> {
        self.check("replace_video_track")?;
        let mut video = self.video_track.lock().unwrap();
        if video.is_none() {
            return Ok(false);
        }
        *video = Some(track.id().to_owned());
        Ok(true)
    }

    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        self.check("create_offer")?;
        Ok(SessionDescription::offer(format!("offer-for-{}", self.peer_id)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        self.check("create_answer")?;
        Ok(SessionDescription::answer(format!("answer-for-{}", self.peer_id)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        self.check("set_local_description")?;
        self.local_descriptions.lock().unwrap().push(desc);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        self.check("set_remote_description")?;
        self.remote_descriptions.lock().unwrap().push(desc);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        self.check("add_ice_candidate")?;
        self.candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn stats(&self) -> Result<StatsReport, EngineError> {
        self.check("stats")?;
        Ok(StatsReport::new())
    }

    async fn video_sender_stats(&self) -> Result<Option<StatsReport>, EngineError> {
        Ok(None)
    }

    async fn remote_audio_level(&self) -> Result<Option<f64>, EngineError> {
        Err(EngineError::Unsupported("synchronization sources"))
    }

    fn supports_sender_parameters(&self) -> bool {
        self.supports_params
    }

    async fn video_send_parameters(&self) -> Result<Option<SendParameters>, EngineError> {
        self.check("video_send_parameters")?;
        if self.video_track.lock().unwrap().is_none() {
            return Ok(None);
        }
        Ok(Some(self.send_parameters.lock().unwrap().clone()))
    }

    async fn set_video_send_parameters(&self, parameters: SendParameters) -> Result<(), EngineError> {
        self.check("set_video_send_parameters")?;
        *self.send_parameters.lock().unwrap() = parameters;
        Ok(())
    }

    async fn codec_capabilities(&self, kind: MediaKind) -> Result<Vec<CodecCapability>, EngineError> {
        self.check("codec_capabilities")?;
        Ok(match kind {
            MediaKind::Audio => vec![
                CodecCapability::from_mime("audio/opus"),
                CodecCapability::from_mime("audio/G722"),
                CodecCapability::from_mime("audio/PCMU"),
            ],
            MediaKind::Video => vec![
                CodecCapability::from_mime("video/VP8"),
                CodecCapability::from_mime("video/VP9"),
                CodecCapability::from_mime("video/H264"),
            ],
        })
    }

    async fn set_codec_preferences(
        &self,
        kind: MediaKind,
        codecs: Vec<CodecCapability>,
    ) -> Result<(), EngineError> {
        self.check("set_codec_preferences")?;
        let mut all = self.codecs.lock().unwrap();
        all.retain(|(k, _)| *k != kind);
        all.push((kind, codecs));
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        if self.is_closed() {
            SignalingState::Closed
        } else {
            SignalingState::Stable
        }
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.calls.lock().unwrap().push("close");
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ===== engine =====

#[derive(Default)]
pub struct MockEngine {
    connections: Mutex<Vec<Arc<MockConnection>>>,
    ice_servers: Mutex<Vec<Vec<IceServer>>>,
    failures: Mutex<HashSet<&'static str>>,
    supports_params: AtomicBool,
}

impl MockEngine {
    /// Операция будет падать у всех соединений, созданных после вызова
    pub fn fail(&self, op: &'static str) {
        self.failures.lock().unwrap().insert(op);
    }

    pub fn set_supports_sender_parameters(&self, supported: bool) {
        self.supports_params.store(supported, Ordering::SeqCst);
    }

    /// Последнее соединение, созданное для пира
    pub fn connection(&self, peer_id: &str) -> Arc<MockConnection> {
        self.connections
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|c| c.peer_id.as_str() == peer_id)
            .cloned()
            .unwrap_or_else(|| panic!("no connection for {peer_id}"))
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    pub fn last_ice_servers(&self) -> Vec<IceServer> {
        self.ice_servers.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl RtcEngine for MockEngine {
    type Track = MockTrack;
    type Connection = MockConnection;

    async fn create_connection(
        &self,
        ice_servers: &[IceServer],
        events: EventSink,
    ) -> Result<Arc<MockConnection>, EngineError> {
        self.ice_servers.lock().unwrap().push(ice_servers.to_vec());
        let failures = self.failures.lock().unwrap().clone();
        if failures.contains("create_connection") {
            return Err(EngineError::Other("create_connection failed".into()));
        }
        let connection = Arc::new(MockConnection {
            peer_id: events.peer_id().clone(),
            events,
            failures,
            supports_params: self.supports_params.load(Ordering::SeqCst),
            calls: Mutex::new(Vec::new()),
            remote_descriptions: Mutex::new(Vec::new()),
            local_descriptions: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            tracks: Mutex::new(Vec::new()),
            video_track: Mutex::new(None),
            send_parameters: Mutex::new(SendParameters {
                encodings: vec![SendEncoding::default()],
            }),
            codecs: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        self.connections.lock().unwrap().push(connection.clone());
        Ok(connection)
    }
}

// ===== signaling =====

#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<SignalingMessage>>,
}

impl RecordingSink {
    pub fn take(&self) -> Vec<SignalingMessage> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

impl SignalingSink for RecordingSink {
    fn send(&self, frame: Frame) -> Result<(), CallError> {
        if let Frame::Message(message) = frame {
            self.sent.lock().unwrap().push(message);
        }
        Ok(())
    }
}

// ===== harness =====

pub struct Harness {
    pub manager: CallManager<MockEngine>,
    pub engine: Arc<MockEngine>,
    pub sink: Arc<RecordingSink>,
    pub notifications: NotificationReceiver,
    pub camera: MockTrack,
    pub microphone: MockTrack,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(CallSettings::default())
    }

    /// Менеджер с подключённым сигнальным каналом и захваченными камерой и микрофоном
    pub fn with_settings(settings: CallSettings) -> Self {
        let engine = Arc::new(MockEngine::default());
        let sink = Arc::new(RecordingSink::default());
        let (mut manager, notifications) = CallManager::new(engine.clone(), sink.clone(), settings);
        let camera = MockTrack::new("camera", MediaKind::Video);
        let microphone = MockTrack::new("microphone", MediaKind::Audio);
        manager.handle(Command::TransportState(ConnectionState::Connected));
        manager.handle(Command::LocalStreamReady(LocalStream::new(
            Some(microphone.clone()),
            Some(camera.clone()),
        )));
        let mut harness = Self {
            manager,
            engine,
            sink,
            notifications,
            camera,
            microphone,
        };
        harness.notifications();
        harness
    }

    pub async fn dispatch(&mut self, command: Command<MockTrack>) -> bool {
        let running = self.manager.handle(command);
        self.manager.settle().await;
        running
    }

    pub async fn signal(&mut self, message: SignalingMessage) {
        self.dispatch(Command::Signaling(message)).await;
    }

    /// Событие движка для текущего соединения пира
    pub async fn engine_event(&mut self, peer_id: &str, kind: SessionEventKind) {
        self.engine.connection(peer_id).emit(kind);
        self.manager.settle().await;
    }

    pub fn sent(&self) -> Vec<SignalingMessage> {
        self.sink.take()
    }

    pub fn notifications(&mut self) -> Vec<Notification> {
        let mut all = Vec::new();
        while let Ok(n) = self.notifications.try_recv() {
            all.push(n);
        }
        all
    }

    pub fn state(&self, peer_id: &str) -> Option<SessionState> {
        self.manager.session_state(&PeerId::from(peer_id))
    }

    /// Исходящий звонок до Established: initiate + answer от пира
    pub async fn call_out(&mut self, peer_id: &str) {
        self.dispatch(Command::Initiate(peer_id.into())).await;
        self.signal(SignalingMessage::answer(peer_id.into(), REMOTE_ANSWER))
            .await;
    }

    /// Входящий звонок до Established: offer от пира + accept
    pub async fn call_in(&mut self, peer_id: &str) {
        self.signal(SignalingMessage::offer(peer_id.into(), REMOTE_OFFER))
            .await;
        self.dispatch(Command::Accept(peer_id.into())).await;
    }
}

pub fn bye_targets(messages: &[SignalingMessage]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| match m {
            SignalingMessage::Bye(bye) => Some(bye.id.to_string()),
            _ => None,
        })
        .collect()
}

pub fn kinds(messages: &[SignalingMessage]) -> Vec<&'static str> {
    messages.iter().map(SignalingMessage::kind).collect()
}

//! Граница между логикой звонка и WebRTC движком.
//!
//! `CallManager` знает о движке только через эти трейты; боевая реализация
//! лежит в `peer::connection`, тестовая в `tests/common`.

use crate::peer::session::EventSink;
use crate::peer::types::{CodecCapability, IceCandidate, IceServer, MediaKind, SessionDescription};
use crate::telemetry::stats::StatsReport;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("webrtc error: {0}")]
    Rtc(#[from] webrtc::Error),

    #[error("{0} is not supported by this engine")]
    Unsupported(&'static str),

    #[error("peer connection is closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendEncoding {
    pub rid: Option<String>,
    /// bps
    pub max_bitrate: Option<u64>,
}

/// Параметры отправки видео-сендера
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendParameters {
    pub encodings: Vec<SendEncoding>,
}

/// Локальный медиа-трек (камера, микрофон, демонстрация экрана)
pub trait MediaTrack: Clone + Send + Sync + 'static {
    fn id(&self) -> &str;
    fn kind(&self) -> MediaKind;
    fn set_enabled(&self, enabled: bool);
    fn is_enabled(&self) -> bool;
    fn stop(&self);
}

/// Одно peer-соединение
#[async_trait]
pub trait PeerConnection: Send + Sync + 'static {
    type Track: MediaTrack;

    async fn add_track(&self, track: &Self::Track) -> Result<(), EngineError>;

    /// Подменяет трек у видео-сендера. `false`, если видео-сендера нет.
    async fn replace_video_track(&self, track: &Self::Track) -> Result<bool, EngineError>;

    async fn create_offer(&self) -> Result<SessionDescription, EngineError>;
    async fn create_answer(&self) -> Result<SessionDescription, EngineError>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError>;

    async fn stats(&self) -> Result<StatsReport, EngineError>;

    /// Статистика видео-сендера, если движок умеет отдавать её отдельно
    async fn video_sender_stats(&self) -> Result<Option<StatsReport>, EngineError>;

    /// Уровень звука первого удалённого источника, `Unsupported` если движок не умеет
    async fn remote_audio_level(&self) -> Result<Option<f64>, EngineError>;

    fn supports_sender_parameters(&self) -> bool;

    /// `None`, если видео-сендера нет
    async fn video_send_parameters(&self) -> Result<Option<SendParameters>, EngineError>;
    async fn set_video_send_parameters(&self, parameters: SendParameters) -> Result<(), EngineError>;

    async fn codec_capabilities(&self, kind: MediaKind) -> Result<Vec<CodecCapability>, EngineError>;
    async fn set_codec_preferences(
        &self,
        kind: MediaKind,
        codecs: Vec<CodecCapability>,
    ) -> Result<(), EngineError>;

    fn signaling_state(&self) -> SignalingState;

    async fn close(&self) -> Result<(), EngineError>;
}

/// Фабрика peer-соединений
#[async_trait]
pub trait RtcEngine: Send + Sync + 'static {
    type Track: MediaTrack;
    type Connection: PeerConnection<Track = Self::Track>;

    /// События соединения (кандидаты, смена состояния, входящие треки) уходят в `events`
    async fn create_connection(
        &self,
        ice_servers: &[IceServer],
        events: EventSink,
    ) -> Result<Arc<Self::Connection>, EngineError>;
}

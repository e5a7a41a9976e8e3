//! Реализация движка поверх webrtc-rs.

use crate::config::default_ice_servers;
use crate::logger::log_candidate;
use crate::peer::engine::{
    EngineError, MediaTrack, PeerConnection, PeerConnectionState, RtcEngine, SendParameters,
    SignalingState,
};
use crate::peer::ice::{from_rtc_candidate, to_rtc_candidate};
use crate::peer::session::{EventSink, SessionEventKind};
use crate::peer::state::LocalStream;
use crate::peer::types::{CodecCapability, IceCandidate, IceServer, MediaKind, SdpType, SessionDescription};
use crate::telemetry::stats::StatsReport;
use crate::utils::random_id;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Локальный трек webrtc-rs. Источник захвата пишет сэмплы через `write_sample`,
/// выключенный или остановленный трек их отбрасывает.
#[derive(Clone)]
pub struct RtcTrack {
    inner: Arc<TrackLocalStaticSample>,
    kind: MediaKind,
    enabled: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

impl RtcTrack {
    pub fn new(kind: MediaKind, stream_id: &str) -> Self {
        let mime_type = match kind {
            MediaKind::Audio => MIME_TYPE_OPUS,
            MediaKind::Video => MIME_TYPE_VP8,
        };
        let inner = TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            format!("{kind}-{}", random_id()),
            stream_id.to_owned(),
        );
        Self {
            inner: Arc::new(inner),
            kind,
            enabled: Arc::new(AtomicBool::new(true)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// `false`, если сэмпл отброшен из-за mute или остановки трека.
    pub async fn write_sample(&self, sample: &Sample) -> Result<bool, EngineError> {
        if self.is_stopped() || !self.is_enabled() {
            return Ok(false);
        }
        self.inner.write_sample(sample).await?;
        Ok(true)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    fn as_local(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.inner.clone()
    }
}

impl MediaTrack for RtcTrack {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }
}

pub struct WebRtcEngine {
    api: API,
}

impl WebRtcEngine {
    pub fn new() -> Result<Self, EngineError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        Ok(Self { api })
    }

    /// Микрофон + камера одного локального потока
    pub fn capture_stream(&self) -> LocalStream<RtcTrack> {
        let stream_id = format!("peercall-{}", random_id());
        LocalStream::new(
            Some(RtcTrack::new(MediaKind::Audio, &stream_id)),
            Some(RtcTrack::new(MediaKind::Video, &stream_id)),
        )
    }

    pub fn screen_track(&self) -> RtcTrack {
        RtcTrack::new(MediaKind::Video, &format!("screen-{}", random_id()))
    }
}

/// Создает конфигурацию для peer connection
fn rtc_config(ice_servers: &[IceServer]) -> RTCConfiguration {
    let ice_servers = if ice_servers.is_empty() {
        // без серверов остаются только host-кандидаты
        default_ice_servers()
            .iter()
            .map(|server| to_rtc_ice_server(&server.to_ice_server()))
            .collect()
    } else {
        ice_servers.iter().map(to_rtc_ice_server).collect()
    };
    RTCConfiguration {
        ice_servers,
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

fn to_rtc_ice_server(server: &IceServer) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone().unwrap_or_default(),
        credential: server.credential.clone().unwrap_or_default(),
        ..Default::default()
    }
}

fn connection_state(state: RTCPeerConnectionState) -> PeerConnectionState {
    match state {
        RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
        RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
        RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
        _ => PeerConnectionState::New,
    }
}

fn codec_kind(kind: MediaKind) -> RTPCodecType {
    match kind {
        MediaKind::Audio => RTPCodecType::Audio,
        MediaKind::Video => RTPCodecType::Video,
    }
}

fn to_capability(codec: &RTCRtpCodecParameters) -> CodecCapability {
    CodecCapability {
        mime_type: codec.capability.mime_type.clone(),
        clock_rate: codec.capability.clock_rate,
        channels: codec.capability.channels,
        sdp_fmtp_line: codec.capability.sdp_fmtp_line.clone(),
    }
}

#[async_trait]
impl RtcEngine for WebRtcEngine {
    type Track = RtcTrack;
    type Connection = WebRtcPeer;

    async fn create_connection(
        &self,
        ice_servers: &[IceServer],
        events: EventSink,
    ) -> Result<Arc<WebRtcPeer>, EngineError> {
        let pc = Arc::new(self.api.new_peer_connection(rtc_config(ice_servers)).await?);

        let sink = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let sink = sink.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    // None означает конец сбора
                    debug!(peer_id = %sink.peer_id(), "ICE candidate gathering completed");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let candidate = from_rtc_candidate(init);
                        log_candidate("local", &candidate);
                        sink.emit(SessionEventKind::LocalCandidate(candidate));
                    }
                    Err(e) => warn!(error = %e, "could not serialize local candidate"),
                }
            })
        }));

        let sink = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            debug!(peer_id = %sink.peer_id(), ?state, "peer connection state changed");
            sink.emit(SessionEventKind::ConnectionState(connection_state(state)));
            Box::pin(async {})
        }));

        let sink = events;
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
                let sink = sink.clone();
                Box::pin(async move {
                    let kind = match track.kind() {
                        RTPCodecType::Audio => MediaKind::Audio,
                        _ => MediaKind::Video,
                    };
                    sink.emit(SessionEventKind::RemoteTrack(kind));
                    // вычитываем RTP, иначе буферы интерсепторов переполняются
                    tokio::spawn(async move {
                        let mut buf = vec![0u8; 1500];
                        while track.read(&mut buf).await.is_ok() {}
                    });
                })
            },
        ));

        Ok(Arc::new(WebRtcPeer { pc }))
    }
}

pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
}

impl WebRtcPeer {
    async fn video_sender(&self) -> Option<Arc<RTCRtpSender>> {
        for sender in self.pc.get_senders().await {
            if let Some(track) = sender.track().await {
                if track.kind() == RTPCodecType::Video {
                    return Some(sender);
                }
            }
        }
        None
    }

    async fn transceiver(&self, kind: MediaKind) -> Option<Arc<RTCRtpTransceiver>> {
        let kind = codec_kind(kind);
        self.pc
            .get_transceivers()
            .await
            .into_iter()
            .find(|t| t.kind() == kind)
    }

    fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, EngineError> {
        Ok(match desc.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(desc.sdp)?,
            SdpType::Answer => RTCSessionDescription::answer(desc.sdp)?,
        })
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    type Track = RtcTrack;

    async fn add_track(&self, track: &RtcTrack) -> Result<(), EngineError> {
        let sender = self.pc.add_track(track.as_local()).await?;
        // RTCP надо вычитывать, иначе интерсепторы не работают
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
        });
        Ok(())
    }

    async fn replace_video_track(&self, track: &RtcTrack) -> Result<bool, EngineError> {
        let Some(sender) = self.video_sender().await else {
            return Ok(false);
        };
        sender.replace_track(Some(track.as_local())).await?;
        Ok(true)
    }

    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        let offer = self.pc.create_offer(None).await?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        let answer = self.pc.create_answer(None).await?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        self.pc
            .set_local_description(Self::to_rtc_description(desc)?)
            .await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        self.pc
            .set_remote_description(Self::to_rtc_description(desc)?)
            .await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        self.pc.add_ice_candidate(to_rtc_candidate(candidate)).await?;
        Ok(())
    }

    async fn stats(&self) -> Result<StatsReport, EngineError> {
        let report = self.pc.get_stats().await;
        let value = serde_json::to_value(&report.reports)
            .map_err(|e| EngineError::Other(format!("stats serialization failed: {e}")))?;
        Ok(StatsReport::from_json(value))
    }

    async fn video_sender_stats(&self) -> Result<Option<StatsReport>, EngineError> {
        // webrtc-rs отдаёт статистику сендеров в общем отчёте
        Ok(None)
    }

    async fn remote_audio_level(&self) -> Result<Option<f64>, EngineError> {
        Err(EngineError::Unsupported("synchronization sources"))
    }

    fn supports_sender_parameters(&self) -> bool {
        false
    }

    async fn video_send_parameters(&self) -> Result<Option<SendParameters>, EngineError> {
        Err(EngineError::Unsupported("sender parameters"))
    }

    async fn set_video_send_parameters(&self, _parameters: SendParameters) -> Result<(), EngineError> {
        Err(EngineError::Unsupported("sender parameters"))
    }

    async fn codec_capabilities(&self, kind: MediaKind) -> Result<Vec<CodecCapability>, EngineError> {
        let Some(transceiver) = self.transceiver(kind).await else {
            return Ok(Vec::new());
        };
        let parameters = transceiver.sender().await.get_parameters().await;
        Ok(parameters.rtp_parameters.codecs.iter().map(to_capability).collect())
    }

    async fn set_codec_preferences(
        &self,
        kind: MediaKind,
        codecs: Vec<CodecCapability>,
    ) -> Result<(), EngineError> {
        let Some(transceiver) = self.transceiver(kind).await else {
            return Ok(());
        };
        let available = transceiver.sender().await.get_parameters().await.rtp_parameters.codecs;

        // порядок по `codecs`; кодеки движка, которых нет в списке, остаются в конце
        let mut order: Vec<usize> = Vec::with_capacity(available.len());
        for wanted in &codecs {
            if let Some(index) = available
                .iter()
                .enumerate()
                .position(|(i, c)| !order.contains(&i) && wanted.matches(&to_capability(c)))
            {
                order.push(index);
            }
        }
        order.extend((0..available.len()).filter(|i| !order.contains(i)).collect::<Vec<_>>());
        let ordered: Vec<RTCRtpCodecParameters> =
            order.into_iter().map(|i| available[i].clone()).collect();
        transceiver.set_codec_preferences(ordered).await?;
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        match self.pc.signaling_state() {
            RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
            RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
            RTCSignalingState::HaveLocalPranswer => SignalingState::HaveLocalPranswer,
            RTCSignalingState::HaveRemotePranswer => SignalingState::HaveRemotePranswer,
            RTCSignalingState::Closed => SignalingState::Closed,
            _ => SignalingState::Stable,
        }
    }

    async fn close(&self) -> Result<(), EngineError> {
        info!("closing peer connection");
        self.pc.close().await?;
        Ok(())
    }
}

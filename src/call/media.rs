use super::completion::Outcome;
use super::CallManager;
use crate::bandwidth::{set_preferred_codec, update_sender_bitrate, BitrateOutcome};
use crate::notification::Notification;
use crate::peer::engine::{MediaTrack, PeerConnection, RtcEngine};
use crate::peer::session::{SessionId, SessionState};
use crate::peer::state::LocalStream;
use crate::peer::types::{CodecCapability, MediaKind, PeerId};
use std::sync::Arc;
use tracing::{debug, info, warn};

impl<E: RtcEngine> CallManager<E> {
    pub(crate) fn local_stream_ready(&mut self, stream: LocalStream<E::Track>) {
        info!(
            audio = stream.audio.is_some(),
            video = stream.video.is_some(),
            "local stream ready"
        );
        self.media.set_capture(stream);
        self.notify_local_media();
    }

    pub(crate) fn set_audio_muted(&mut self, muted: bool) {
        self.media.set_audio_muted(muted);
        info!(muted, "audio mute changed");
        self.notify_local_media();
    }

    pub(crate) fn set_video_muted(&mut self, muted: bool) {
        self.media.set_video_muted(muted);
        info!(muted, "video mute changed");
        self.notify_local_media();
    }

    pub(crate) fn start_screen_share(&mut self, track: E::Track) {
        info!(track_id = track.id(), "starting screen share");
        let track = self.media.start_screen_share(track);
        self.replace_video_everywhere(track);
        self.notify_local_media();
    }

    /// Возвращает камеру; окончание демонстрации источником приходит сюда же
    pub(crate) fn stop_screen_share(&mut self) {
        match self.media.stop_screen_share() {
            None => debug!("no screen share to stop"),
            Some(camera) => {
                info!("screen share stopped");
                match camera {
                    Some(camera) => self.replace_video_everywhere(camera),
                    None => debug!("no camera track to restore"),
                }
                self.notify_local_media();
            }
        }
    }

    fn replace_video_everywhere(&mut self, track: E::Track) {
        for (peer_id, session_id, connection) in self.connected_sessions(|_| true) {
            let cancel = match self.registry.get(&peer_id) {
                Some(session) => session.cancel_token(),
                None => continue,
            };
            let track = track.clone();
            let peer = peer_id.clone();
            self.spawn_step(peer_id, session_id, cancel, async move {
                match connection.replace_video_track(&track).await {
                    Ok(true) => debug!(peer_id = %peer, "video track replaced"),
                    Ok(false) => debug!(peer_id = %peer, "no video sender to replace track on"),
                    Err(e) => warn!(peer_id = %peer, error = %e, "failed to replace video track"),
                }
                Outcome::Done
            });
        }
    }

    /// Меняет ограничение битрейта на всех установленных звонках без пересогласования.
    /// Значение запоминается и для будущих answer'ов, даже если движок не умеет менять его на лету.
    pub(crate) fn update_maximum_bitrate(&mut self, kbps: u32) {
        let generation = self.bitrate.begin(kbps);
        info!(kbps, "updating maximum bitrate");
        self.notifier
            .notify(Notification::BitrateChangeStarted { target_kbps: kbps });

        let targets = self.connected_sessions(|state| state == SessionState::Established);
        if targets.is_empty() {
            self.finish_bitrate(generation);
            return;
        }
        // поддержка параметров сендера задаётся движком, а не отдельным соединением
        if targets
            .iter()
            .any(|(_, _, c)| !c.supports_sender_parameters())
        {
            warn!("dynamic update of sender parameters is not supported");
            self.finish_bitrate(generation);
            return;
        }

        self.bitrate.expect(generation, targets.len());
        for (peer_id, session_id, connection) in targets {
            let peer = peer_id.clone();
            // не отменяется: счётчик поколения должен дойти до нуля
            self.spawn_detached(peer_id, Some(session_id), async move {
                match update_sender_bitrate(connection, kbps).await {
                    Ok(BitrateOutcome::Applied) => debug!(peer_id = %peer, kbps, "sender bitrate updated"),
                    Ok(BitrateOutcome::NoVideoSender) => debug!(peer_id = %peer, "no video sender"),
                    Err(e) => warn!(peer_id = %peer, error = %e, "failed to update sender bitrate"),
                }
                Outcome::BitrateApplied { generation }
            });
        }
    }

    pub(crate) fn bitrate_applied(&mut self, generation: u64) {
        if self.bitrate.complete_one(generation) {
            self.notify_bitrate_completed();
        }
    }

    fn finish_bitrate(&mut self, generation: u64) {
        if self.bitrate.finish(generation) {
            self.notify_bitrate_completed();
        }
    }

    fn notify_bitrate_completed(&self) {
        let target_kbps = self.bitrate.target_kbps();
        info!(kbps = target_kbps, "maximum bitrate updated");
        self.notifier
            .notify(Notification::BitrateChangeCompleted { target_kbps });
    }

    /// Предпочтение применяется к новым соединениям и к ещё не согласованным текущим
    pub(crate) fn update_codec(&mut self, kind: MediaKind, codec: Option<CodecCapability>) {
        info!(%kind, codec = ?codec.as_ref().map(|c| c.mime_type.as_str()), "codec preference changed");
        self.codecs.set(kind, codec.clone());
        let Some(codec) = codec else {
            return;
        };
        for (peer_id, session_id, connection) in
            self.connected_sessions(|state| state != SessionState::Established)
        {
            let cancel = match self.registry.get(&peer_id) {
                Some(session) => session.cancel_token(),
                None => continue,
            };
            let codec = codec.clone();
            self.spawn_step(peer_id, session_id, cancel, async move {
                if let Err(e) = set_preferred_codec(connection.as_ref(), kind, &codec).await {
                    warn!(%kind, error = %e, "failed to apply codec preference");
                }
                Outcome::Done
            });
        }
    }

    fn notify_local_media(&self) {
        self.notifier
            .notify(Notification::LocalMediaChanged(self.media.snapshot()));
    }

    /// Сессии с уже созданным соединением, отсортированные по пиру
    fn connected_sessions(
        &self,
        filter: impl Fn(SessionState) -> bool,
    ) -> Vec<(PeerId, SessionId, Arc<E::Connection>)> {
        let mut sessions = Vec::new();
        self.registry.for_each(|session| {
            if let Some(connection) = session.connection() {
                if filter(session.state()) {
                    sessions.push((session.peer_id().clone(), session.id(), connection.clone()));
                }
            }
        });
        sessions.sort_by(|a, b| a.0.cmp(&b.0));
        sessions
    }
}

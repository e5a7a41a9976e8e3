use super::{CallHandle, Command};
use crate::error::CallError;
use crate::peer::engine::MediaTrack;
use crate::peer::state::LocalStream;
use crate::peer::types::{CodecCapability, MediaKind};

/// Локальные медиа и настройки
impl<T: MediaTrack> CallHandle<T> {
    pub fn local_stream_ready(&self, stream: LocalStream<T>) -> Result<(), CallError> {
        self.send(Command::LocalStreamReady(stream))
    }

    pub fn set_audio_muted(&self, muted: bool) -> Result<(), CallError> {
        self.send(if muted {
            Command::MuteAudio
        } else {
            Command::UnmuteAudio
        })
    }

    pub fn set_video_muted(&self, muted: bool) -> Result<(), CallError> {
        self.send(if muted {
            Command::MuteVideo
        } else {
            Command::UnmuteVideo
        })
    }

    pub fn start_screen_share(&self, track: T) -> Result<(), CallError> {
        self.send(Command::StartScreenShare(track))
    }

    pub fn stop_screen_share(&self) -> Result<(), CallError> {
        self.send(Command::StopScreenShare)
    }

    /// 0 снимает ограничение
    pub fn update_maximum_bitrate(&self, kbps: u32) -> Result<(), CallError> {
        self.send(Command::UpdateMaximumBitrate(kbps))
    }

    /// `None` возвращает выбор кодека движку
    pub fn update_codec(&self, kind: MediaKind, codec: Option<CodecCapability>) -> Result<(), CallError> {
        self.send(Command::UpdateCodec { kind, codec })
    }
}

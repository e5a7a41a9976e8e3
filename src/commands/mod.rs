//! Команды, которые принимает менеджер звонков.

pub mod call_api;
pub mod console;
pub mod media_api;

use crate::error::CallError;
use crate::peer::engine::MediaTrack;
use crate::peer::state::LocalStream;
use crate::peer::types::{CodecCapability, MediaKind, PeerId};
use crate::signaling::{ConnectionState, SignalingMessage};
use tokio::sync::mpsc;

pub enum Command<T: MediaTrack> {
    // действия пользователя
    Initiate(PeerId),
    Accept(PeerId),
    Decline(PeerId),
    HangUp,

    // сигнальный канал
    Signaling(SignalingMessage),
    TransportState(ConnectionState),

    // локальные медиа и настройки
    LocalStreamReady(LocalStream<T>),
    MuteAudio,
    UnmuteAudio,
    MuteVideo,
    UnmuteVideo,
    StartScreenShare(T),
    StopScreenShare,
    UpdateMaximumBitrate(u32),
    UpdateCodec {
        kind: MediaKind,
        codec: Option<CodecCapability>,
    },

    Shutdown,
}

impl<T: MediaTrack> Command<T> {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Initiate(_) => "initiate",
            Command::Accept(_) => "accept",
            Command::Decline(_) => "decline",
            Command::HangUp => "hang_up",
            Command::Signaling(_) => "signaling",
            Command::TransportState(_) => "transport_state",
            Command::LocalStreamReady(_) => "local_stream_ready",
            Command::MuteAudio => "mute_audio",
            Command::UnmuteAudio => "unmute_audio",
            Command::MuteVideo => "mute_video",
            Command::UnmuteVideo => "unmute_video",
            Command::StartScreenShare(_) => "start_screen_share",
            Command::StopScreenShare => "stop_screen_share",
            Command::UpdateMaximumBitrate(_) => "update_maximum_bitrate",
            Command::UpdateCodec { .. } => "update_codec",
            Command::Shutdown => "shutdown",
        }
    }
}

pub type CommandReceiver<T> = mpsc::UnboundedReceiver<Command<T>>;

/// Клонируемый вход в менеджер звонков
pub struct CallHandle<T: MediaTrack> {
    tx: mpsc::UnboundedSender<Command<T>>,
}

impl<T: MediaTrack> Clone for CallHandle<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: MediaTrack> std::fmt::Debug for CallHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallHandle")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<T: MediaTrack> CallHandle<T> {
    pub fn channel() -> (Self, CommandReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, command: Command<T>) -> Result<(), CallError> {
        self.tx.send(command).map_err(|_| CallError::ManagerStopped)
    }

    pub fn signaling(&self, message: SignalingMessage) -> Result<(), CallError> {
        self.send(Command::Signaling(message))
    }

    pub fn transport_state(&self, state: ConnectionState) -> Result<(), CallError> {
        self.send(Command::TransportState(state))
    }

    pub fn shutdown(&self) -> Result<(), CallError> {
        self.send(Command::Shutdown)
    }
}

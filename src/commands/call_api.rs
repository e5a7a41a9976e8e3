use super::{CallHandle, Command};
use crate::error::CallError;
use crate::peer::engine::MediaTrack;
use crate::peer::types::PeerId;

/// Управление звонками
impl<T: MediaTrack> CallHandle<T> {
    /// Звонок пиру
    pub fn initiate(&self, peer_id: impl Into<PeerId>) -> Result<(), CallError> {
        self.send(Command::Initiate(peer_id.into()))
    }

    /// Принять входящий offer
    pub fn accept(&self, peer_id: impl Into<PeerId>) -> Result<(), CallError> {
        self.send(Command::Accept(peer_id.into()))
    }

    /// Отклонить входящий offer (пиру уходит bye)
    pub fn decline(&self, peer_id: impl Into<PeerId>) -> Result<(), CallError> {
        self.send(Command::Decline(peer_id.into()))
    }

    /// Завершить все звонки
    pub fn hang_up(&self) -> Result<(), CallError> {
        self.send(Command::HangUp)
    }
}

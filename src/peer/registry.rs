use crate::error::CallError;
use crate::peer::engine::PeerConnection;
use crate::peer::session::Session;
use crate::peer::types::PeerId;
use std::collections::HashMap;
use tracing::{debug, info};

/// Активные сессии по id пира; на одного пира не больше одной сессии
pub struct SessionRegistry<C: PeerConnection> {
    sessions: HashMap<PeerId, Session<C>>,
}

impl<C: PeerConnection> Default for SessionRegistry<C> {
    fn default() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }
}

impl<C: PeerConnection> SessionRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, session: Session<C>) -> Result<&mut Session<C>, CallError> {
        let peer_id = session.peer_id().clone();
        if self.sessions.contains_key(&peer_id) {
            return Err(CallError::DuplicateSession(peer_id));
        }
        info!(peer_id = %peer_id, session_id = %session.id(), state = ?session.state(), "session created");
        Ok(self.sessions.entry(peer_id).or_insert(session))
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&Session<C>> {
        self.sessions.get(peer_id)
    }

    pub fn get_mut(&mut self, peer_id: &PeerId) -> Option<&mut Session<C>> {
        self.sessions.get_mut(peer_id)
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.sessions.contains_key(peer_id)
    }

    /// Повторное удаление не ошибка
    pub fn remove(&mut self, peer_id: &PeerId) -> Option<Session<C>> {
        let removed = self.sessions.remove(peer_id);
        if removed.is_none() {
            debug!(peer_id = %peer_id, "no session to remove");
        }
        removed
    }

    pub fn for_each<F: FnMut(&Session<C>)>(&self, f: F) {
        self.sessions.values().for_each(f);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session<C>> {
        self.sessions.values()
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

use crate::peer::engine::MediaTrack;
use crate::peer::types::{CodecCapability, IceCandidate, MediaKind, PeerId};
use serde::Serialize;
use tracing::debug;

// ========== LOCAL MEDIA ==========

/// Захваченный локальный поток (микрофон + камера)
#[derive(Clone)]
pub struct LocalStream<T: MediaTrack> {
    pub audio: Option<T>,
    pub video: Option<T>,
}

impl<T: MediaTrack> LocalStream<T> {
    pub fn new(audio: Option<T>, video: Option<T>) -> Self {
        Self { audio, video }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalMediaSnapshot {
    pub has_capture: bool,
    pub audio_muted: bool,
    pub video_muted: bool,
    pub screen_sharing: bool,
}

/// Локальные треки и флаги mute
pub struct LocalMediaState<T: MediaTrack> {
    capture: Option<LocalStream<T>>,
    screen_share: Option<T>,
    audio_muted: bool,
    video_muted: bool,
}

impl<T: MediaTrack> Default for LocalMediaState<T> {
    fn default() -> Self {
        Self {
            capture: None,
            screen_share: None,
            audio_muted: false,
            video_muted: false,
        }
    }
}

impl<T: MediaTrack> LocalMediaState<T> {
    pub fn set_capture(&mut self, stream: LocalStream<T>) {
        if let Some(old) = self.capture.take() {
            old.audio.iter().chain(old.video.iter()).for_each(MediaTrack::stop);
        }
        self.capture = Some(stream);
        self.apply_mute();
    }

    /// Видео, которое сейчас уходит пирам: демонстрация экрана или камера
    pub fn active_video(&self) -> Option<&T> {
        self.screen_share
            .as_ref()
            .or_else(|| self.capture.as_ref().and_then(|s| s.video.as_ref()))
    }

    pub fn audio(&self) -> Option<&T> {
        self.capture.as_ref().and_then(|s| s.audio.as_ref())
    }

    /// Треки для нового peer-соединения
    pub fn active_tracks(&self) -> Vec<T> {
        self.audio()
            .into_iter()
            .chain(self.active_video())
            .cloned()
            .collect()
    }

    pub fn set_audio_muted(&mut self, muted: bool) {
        self.audio_muted = muted;
        self.apply_mute();
    }

    pub fn set_video_muted(&mut self, muted: bool) {
        self.video_muted = muted;
        self.apply_mute();
    }

    pub fn audio_muted(&self) -> bool {
        self.audio_muted
    }

    pub fn video_muted(&self) -> bool {
        self.video_muted
    }

    pub fn screen_sharing(&self) -> bool {
        self.screen_share.is_some()
    }

    /// Возвращает трек, который надо отдать видео-сендерам
    pub fn start_screen_share(&mut self, track: T) -> T {
        if let Some(previous) = self.screen_share.replace(track.clone()) {
            debug!(track_id = previous.id(), "replacing previous screen share");
            previous.stop();
        }
        self.apply_mute();
        track
    }

    /// Останавливает демонстрацию и возвращает камеру, если она есть.
    /// `None` во внешнем Option: демонстрации не было.
    pub fn stop_screen_share(&mut self) -> Option<Option<T>> {
        let share = self.screen_share.take()?;
        share.stop();
        self.apply_mute();
        Some(self.capture.as_ref().and_then(|s| s.video.clone()))
    }

    pub fn snapshot(&self) -> LocalMediaSnapshot {
        LocalMediaSnapshot {
            has_capture: self.capture.is_some(),
            audio_muted: self.audio_muted,
            video_muted: self.video_muted,
            screen_sharing: self.screen_share.is_some(),
        }
    }

    // mute применяется к текущему составу треков, в том числе после смены видео
    fn apply_mute(&self) {
        if let Some(audio) = self.audio() {
            audio.set_enabled(!self.audio_muted);
        }
        if let Some(video) = self.active_video() {
            video.set_enabled(!self.video_muted);
        }
    }
}

// ========== PENDING OFFERS ==========

/// Входящий offer, ожидающий решения пользователя
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOffer {
    pub peer_id: PeerId,
    pub sdp: String,
    pub candidates: Vec<IceCandidate>,
}

impl PendingOffer {
    pub fn new(peer_id: PeerId, sdp: String) -> Self {
        Self {
            peer_id,
            sdp,
            candidates: Vec::new(),
        }
    }
}

/// Очередь входящих offer'ов в порядке поступления
#[derive(Debug, Default)]
pub struct PendingOffers {
    offers: Vec<PendingOffer>,
}

impl PendingOffers {
    /// Новый offer от того же пира заменяет старый; `true`, если была замена
    pub fn upsert(&mut self, offer: PendingOffer) -> bool {
        match self.offers.iter_mut().find(|o| o.peer_id == offer.peer_id) {
            Some(existing) => {
                *existing = offer;
                true
            }
            None => {
                self.offers.push(offer);
                false
            }
        }
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&PendingOffer> {
        self.offers.iter().find(|o| &o.peer_id == peer_id)
    }

    pub fn get_mut(&mut self, peer_id: &PeerId) -> Option<&mut PendingOffer> {
        self.offers.iter_mut().find(|o| &o.peer_id == peer_id)
    }

    pub fn remove(&mut self, peer_id: &PeerId) -> Option<PendingOffer> {
        let index = self.offers.iter().position(|o| &o.peer_id == peer_id)?;
        Some(self.offers.remove(index))
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.get(peer_id).is_some()
    }

    /// Есть ли ожидающий offer от кого-то, кроме `peer_id`
    pub fn has_other_than(&self, peer_id: &PeerId) -> bool {
        self.offers.iter().any(|o| &o.peer_id != peer_id)
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.offers.iter().map(|o| o.peer_id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.offers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }
}

// ========== SETTINGS ==========

/// Предпочтение по битрейту видео и статус применения
#[derive(Debug, Default)]
pub struct BitratePreference {
    target_kbps: u32,
    in_progress: bool,
    generation: u64,
    remaining: usize,
}

impl BitratePreference {
    pub fn new(target_kbps: u32) -> Self {
        Self {
            target_kbps,
            ..Default::default()
        }
    }

    /// 0 значит "без ограничения"
    pub fn target_kbps(&self) -> u32 {
        self.target_kbps
    }

    pub fn in_progress(&self) -> bool {
        self.in_progress
    }

    /// Начинает новое применение; результаты предыдущего больше не учитываются
    pub fn begin(&mut self, target_kbps: u32) -> u64 {
        self.generation += 1;
        self.target_kbps = target_kbps;
        self.in_progress = true;
        self.remaining = 0;
        self.generation
    }

    pub fn expect(&mut self, generation: u64, sessions: usize) {
        if generation == self.generation {
            self.remaining = sessions;
        }
    }

    /// `true`, когда завершилось последнее обновление текущего поколения
    pub fn complete_one(&mut self, generation: u64) -> bool {
        if generation != self.generation || !self.in_progress {
            return false;
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.in_progress = false;
            return true;
        }
        false
    }

    pub fn finish(&mut self, generation: u64) -> bool {
        if generation != self.generation || !self.in_progress {
            return false;
        }
        self.in_progress = false;
        self.remaining = 0;
        true
    }
}

/// Предпочитаемые кодеки для новых соединений
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodecPreferences {
    pub audio: Option<CodecCapability>,
    pub video: Option<CodecCapability>,
}

impl CodecPreferences {
    pub fn set(&mut self, kind: MediaKind, codec: Option<CodecCapability>) {
        match kind {
            MediaKind::Audio => self.audio = codec,
            MediaKind::Video => self.video = codec,
        }
    }

    pub fn entries(&self) -> Vec<(MediaKind, CodecCapability)> {
        [
            (MediaKind::Audio, self.audio.clone()),
            (MediaKind::Video, self.video.clone()),
        ]
        .into_iter()
        .filter_map(|(kind, codec)| codec.map(|c| (kind, c)))
        .collect()
    }
}

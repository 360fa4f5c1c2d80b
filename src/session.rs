//! In-memory per-user session state: admin wizards and pending receipt markers.
//!
//! State lives in the process only; a restart drops unfinished wizards, which
//! is acceptable because every committed step is already in the database.

use dashmap::DashMap;

/// Steps of the serial-creation wizard, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialStep {
    Code,
    Title,
    Genre,
    Description,
    Field,
    Poster,
    UploadingEpisodes,
}

/// Draft collected across serial wizard steps.
#[derive(Debug, Clone, Default)]
pub struct SerialDraft {
    pub code: Option<i64>,
    pub title: Option<String>,
    pub genre: Option<String>,
    pub description: Option<String>,
    pub field_id: Option<i64>,
    pub poster_file_id: Option<String>,
    /// Set once the serial row is created, before episode upload
    pub serial_id: Option<i64>,
    pub next_episode: i64,
}

/// Steps of the movie-creation wizard, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovieStep {
    Code,
    Title,
    Genre,
    Description,
    Field,
    Poster,
    UploadingParts,
}

/// Draft collected across movie wizard steps.
#[derive(Debug, Clone, Default)]
pub struct MovieDraft {
    pub code: Option<i64>,
    pub title: Option<String>,
    pub genre: Option<String>,
    pub description: Option<String>,
    pub field_id: Option<i64>,
    pub poster_file_id: Option<String>,
    /// Set once the movie row is created, before part upload
    pub movie_id: Option<i64>,
    pub next_part: i64,
}

/// What an append-episodes wizard is appending to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeTarget {
    Movie(i64),
    Serial(i64),
}

/// Steps of the mandatory-channel wizard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStep {
    Name,
    Link,
    ChatId,
    Type,
    MemberLimit,
}

#[derive(Debug, Clone, Default)]
pub struct ChannelDraft {
    pub name: Option<String>,
    pub link: Option<String>,
    pub chat_id: Option<String>,
    pub channel_type: Option<String>,
}

/// Active admin wizard for one admin.
#[derive(Debug, Clone)]
pub enum WizardState {
    AddSerial { step: SerialStep, draft: SerialDraft },
    AddMovie { step: MovieStep, draft: MovieDraft },
    AddChannel { step: ChannelStep, draft: ChannelDraft },
    /// Waiting for the target code, before any videos arrive.
    PickEpisodeTarget,
    /// Appending videos to an existing movie or serial.
    AddEpisodes { target: EpisodeTarget, next_number: i64 },
}

/// A user who pressed "upload receipt" and owes us a photo.
#[derive(Debug, Clone, Copy)]
pub struct PendingReceipt {
    pub amount: i64,
    pub duration_days: i64,
}

/// Process-local session store, keyed by telegram user id.
#[derive(Default)]
pub struct SessionStore {
    wizards: DashMap<i64, WizardState>,
    receipts: DashMap<i64, PendingReceipt>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wizard(&self, user_id: i64) -> Option<WizardState> {
        self.wizards.get(&user_id).map(|entry| entry.clone())
    }

    pub fn set_wizard(&self, user_id: i64, state: WizardState) {
        self.wizards.insert(user_id, state);
    }

    pub fn clear_wizard(&self, user_id: i64) {
        self.wizards.remove(&user_id);
    }

    pub fn pending_receipt(&self, user_id: i64) -> Option<PendingReceipt> {
        self.receipts.get(&user_id).map(|entry| *entry)
    }

    pub fn set_pending_receipt(&self, user_id: i64, pending: PendingReceipt) {
        self.receipts.insert(user_id, pending);
    }

    pub fn take_pending_receipt(&self, user_id: i64) -> Option<PendingReceipt> {
        self.receipts.remove(&user_id).map(|(_, pending)| pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wizard_roundtrip() {
        let store = SessionStore::new();
        assert!(store.wizard(1).is_none());

        store.set_wizard(
            1,
            WizardState::AddSerial {
                step: SerialStep::Code,
                draft: SerialDraft::default(),
            },
        );
        assert!(matches!(
            store.wizard(1),
            Some(WizardState::AddSerial {
                step: SerialStep::Code,
                ..
            })
        ));

        store.clear_wizard(1);
        assert!(store.wizard(1).is_none());
    }

    #[test]
    fn pending_receipt_is_taken_once() {
        let store = SessionStore::new();
        store.set_pending_receipt(
            5,
            PendingReceipt {
                amount: 15_000,
                duration_days: 30,
            },
        );

        let taken = store.take_pending_receipt(5).unwrap();
        assert_eq!(taken.duration_days, 30);
        assert!(store.take_pending_receipt(5).is_none());
    }
}

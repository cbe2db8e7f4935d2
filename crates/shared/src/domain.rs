use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn random() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(TrackId);
id_newtype!(NoteId);
id_newtype!(PlaylistId);
id_newtype!(DeviceId);
id_newtype!(AnonId);

/// Current persisted snapshot schema. Bump when `PersistedState` changes
/// shape and add a step in `storage::migrate`.
pub const SCHEMA_VERSION: u32 = 3;

/// Upper bound on the recent-playlists list.
pub const MAX_RECENT_PLAYLISTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Spotify,
    FileImport,
    /// Read-only fixture playlist. Every mutating action against a demo
    /// playlist is a no-op, and demo tracks are never synced.
    Demo,
}

impl Provider {
    pub fn is_read_only(self) -> bool {
        matches!(self, Provider::Demo)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Music,
    Spoken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub title: String,
    pub artist: String,
    pub kind: TrackKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub track_id: TrackId,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_end_ms: Option<u64>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// Creating device, when known. Remote fetch rows do not name their
    /// creator, so merged-in notes carry `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportMeta {
    pub provider: Provider,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playlist_id: Option<PlaylistId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imported_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentPlaylist {
    pub provider: Provider,
    pub playlist_id: PlaylistId,
    pub title: String,
}

/// Canonical local snapshot. Tag vectors are always in canonical form
/// (see `tags::canonicalize`); BTreeMaps keep serialization stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub version: u32,
    pub tracks: Vec<Track>,
    pub notes_by_track: BTreeMap<TrackId, Vec<Note>>,
    pub tags_by_track: BTreeMap<TrackId, Vec<String>>,
    pub import_meta: ImportMeta,
    pub recent_playlists: Vec<RecentPlaylist>,
}

impl PersistedState {
    pub fn empty() -> Self {
        Self {
            version: SCHEMA_VERSION,
            tracks: Vec::new(),
            notes_by_track: BTreeMap::new(),
            tags_by_track: BTreeMap::new(),
            import_meta: ImportMeta {
                provider: Provider::FileImport,
                playlist_id: None,
                imported_at: None,
            },
            recent_playlists: Vec::new(),
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.import_meta.provider.is_read_only()
    }

    /// Moves `(provider, playlist_id)` to the front of the recent list,
    /// deduped and capped. Read-only playlists never enter the list.
    pub fn remember_playlist(&mut self, entry: RecentPlaylist) {
        if entry.provider.is_read_only() {
            return;
        }
        self.recent_playlists
            .retain(|p| !(p.provider == entry.provider && p.playlist_id == entry.playlist_id));
        self.recent_playlists.insert(0, entry);
        self.recent_playlists.truncate(MAX_RECENT_PLAYLISTS);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDeletion {
    pub note_id: NoteId,
    pub track_id: TrackId,
    pub queued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTagSync {
    pub track_id: TrackId,
    pub tags: Vec<String>,
    pub queued_at: DateTime<Utc>,
}

/// Client-held device identity. The recovery code itself is never stored
/// locally; only its fingerprint travels with the identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub device_id: DeviceId,
    pub anon_id: AnonId,
    pub recovery_code_fingerprint: String,
}

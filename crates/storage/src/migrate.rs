//! Forward-only, pure migration of persisted snapshots.
//!
//! Version history:
//! - v1: tags lived only on notes; no per-track tag sets, no recent list.
//! - v2: added `tags_by_track`.
//! - v3 (current): added `recent_playlists` and made `import_meta` required.
//!
//! Individual malformed entries (a bad track, a bad note) are dropped during
//! decoding; only a snapshot that is structurally unreadable (or from a
//! future schema) yields `MigrationError`.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

use shared::{
    domain::{
        ImportMeta, Note, PersistedState, Provider, RecentPlaylist, Track, TrackId,
        MAX_RECENT_PLAYLISTS, SCHEMA_VERSION,
    },
    tags,
};

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("snapshot is not a JSON object")]
    NotAnObject,
    #[error("snapshot version field is missing or not an integer")]
    BadVersion,
    #[error("snapshot version {0} is newer than supported version {SCHEMA_VERSION}")]
    FromFuture(u32),
}

pub struct MigrationOutcome {
    pub state: PersistedState,
    /// True when the stored snapshot was older than `SCHEMA_VERSION` and the
    /// canonical slot needs rewriting.
    pub upgraded: bool,
}

pub fn migrate_to_current(mut doc: Value) -> Result<MigrationOutcome, MigrationError> {
    if !doc.is_object() {
        return Err(MigrationError::NotAnObject);
    }

    let mut version = doc
        .get("version")
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or(MigrationError::BadVersion)?;

    if version > SCHEMA_VERSION {
        return Err(MigrationError::FromFuture(version));
    }

    let upgraded = version < SCHEMA_VERSION;
    while version < SCHEMA_VERSION {
        match version {
            1 => upgrade_v1_to_v2(&mut doc),
            2 => upgrade_v2_to_v3(&mut doc),
            _ => unreachable!("no migration step registered for version {version}"),
        }
        version += 1;
        doc["version"] = Value::from(version);
    }

    Ok(MigrationOutcome {
        state: decode_lenient(&doc),
        upgraded,
    })
}

/// v1 kept tags only on notes; derive each track's tag set from the union of
/// its notes' tags.
fn upgrade_v1_to_v2(doc: &mut Value) {
    let mut derived: BTreeMap<String, Vec<String>> = BTreeMap::new();
    if let Some(notes_by_track) = doc.get("notes_by_track").and_then(Value::as_object) {
        for (track_id, notes) in notes_by_track {
            let mut collected: Vec<String> = Vec::new();
            if let Some(notes) = notes.as_array() {
                for note in notes {
                    if let Some(note_tags) = note.get("tags").and_then(Value::as_array) {
                        collected.extend(
                            note_tags
                                .iter()
                                .filter_map(Value::as_str)
                                .map(str::to_string),
                        );
                    }
                }
            }
            let canonical = tags::canonicalize(collected);
            if !canonical.is_empty() {
                derived.insert(track_id.clone(), canonical);
            }
        }
    }
    doc["tags_by_track"] = serde_json::to_value(derived).unwrap_or_else(|_| Value::Object(Default::default()));
}

fn upgrade_v2_to_v3(doc: &mut Value) {
    if doc.get("recent_playlists").is_none() {
        doc["recent_playlists"] = Value::Array(Vec::new());
    }
    if doc.get("import_meta").map(Value::is_object) != Some(true) {
        doc["import_meta"] = serde_json::json!({ "provider": "file_import" });
    }
}

/// Decodes field by field so one malformed entry drops that entry, not the
/// whole snapshot.
fn decode_lenient(doc: &Value) -> PersistedState {
    let mut state = PersistedState::empty();

    if let Some(tracks) = doc.get("tracks").and_then(Value::as_array) {
        state.tracks = tracks
            .iter()
            .filter_map(|t| serde_json::from_value::<Track>(t.clone()).ok())
            .collect();
    }

    if let Some(notes_by_track) = doc.get("notes_by_track").and_then(Value::as_object) {
        for (track_id, notes) in notes_by_track {
            let Some(notes) = notes.as_array() else {
                continue;
            };
            let decoded: Vec<Note> = notes
                .iter()
                .filter_map(|n| serde_json::from_value::<Note>(n.clone()).ok())
                .collect();
            if !decoded.is_empty() {
                state
                    .notes_by_track
                    .insert(TrackId(track_id.clone()), decoded);
            }
        }
    }

    if let Some(tags_by_track) = doc.get("tags_by_track").and_then(Value::as_object) {
        for (track_id, raw_tags) in tags_by_track {
            let Some(raw_tags) = raw_tags.as_array() else {
                continue;
            };
            let canonical =
                tags::canonicalize(raw_tags.iter().filter_map(Value::as_str));
            if !canonical.is_empty() {
                state
                    .tags_by_track
                    .insert(TrackId(track_id.clone()), canonical);
            }
        }
    }

    if let Some(meta) = doc.get("import_meta") {
        if let Ok(meta) = serde_json::from_value::<ImportMeta>(meta.clone()) {
            state.import_meta = meta;
        }
    }

    if let Some(recents) = doc.get("recent_playlists").and_then(Value::as_array) {
        for entry in recents
            .iter()
            .filter_map(|r| serde_json::from_value::<RecentPlaylist>(r.clone()).ok())
        {
            if entry.provider == Provider::Demo {
                continue;
            }
            let seen = state
                .recent_playlists
                .iter()
                .any(|p| p.provider == entry.provider && p.playlist_id == entry.playlist_id);
            if !seen {
                state.recent_playlists.push(entry);
            }
        }
        state.recent_playlists.truncate(MAX_RECENT_PLAYLISTS);
    }

    state.version = SCHEMA_VERSION;
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn v1_snapshot_derives_track_tags_from_notes() {
        let doc = json!({
            "version": 1,
            "tracks": [],
            "notes_by_track": {
                "t1": [
                    { "id": "n1", "track_id": "t1", "body": "intro", "tags": ["Rock", "live"],
                      "created_at": "2024-01-01T00:00:00Z", "device_id": "d1" },
                    { "id": "n2", "track_id": "t1", "body": "outro", "tags": ["rock"],
                      "created_at": "2024-01-01T00:01:00Z", "device_id": "d1" }
                ]
            },
            "import_meta": { "provider": "spotify" }
        });

        let outcome = migrate_to_current(doc).expect("migrates");
        assert!(outcome.upgraded);
        assert_eq!(outcome.state.version, SCHEMA_VERSION);
        assert_eq!(
            outcome.state.tags_by_track.get(&TrackId::from("t1")),
            Some(&vec!["live".to_string(), "rock".to_string()])
        );
        assert!(outcome.state.recent_playlists.is_empty());
    }

    #[test]
    fn current_snapshot_is_not_marked_upgraded() {
        let state = PersistedState::empty();
        let doc = serde_json::to_value(&state).expect("encode");
        let outcome = migrate_to_current(doc).expect("migrates");
        assert!(!outcome.upgraded);
        assert_eq!(outcome.state, state);
    }

    #[test]
    fn malformed_entries_are_dropped_not_fatal() {
        let doc = json!({
            "version": 3,
            "tracks": [
                { "id": "t1", "title": "Song", "artist": "Band", "kind": "music" },
                { "id": "t2", "title": 42 }
            ],
            "notes_by_track": { "t1": [ { "nonsense": true } ] },
            "tags_by_track": { "t1": ["ok", "BAD!punctuation"] },
            "import_meta": { "provider": "spotify" },
            "recent_playlists": []
        });

        let outcome = migrate_to_current(doc).expect("migrates");
        assert_eq!(outcome.state.tracks.len(), 1);
        assert!(outcome.state.notes_by_track.is_empty());
        assert_eq!(
            outcome.state.tags_by_track.get(&TrackId::from("t1")),
            Some(&vec!["ok".to_string()])
        );
    }

    #[test]
    fn future_snapshot_is_rejected() {
        let doc = json!({ "version": SCHEMA_VERSION + 1 });
        assert!(matches!(
            migrate_to_current(doc),
            Err(MigrationError::FromFuture(_))
        ));
    }

    #[test]
    fn missing_version_is_rejected() {
        let doc = json!({ "tracks": [] });
        assert!(matches!(
            migrate_to_current(doc),
            Err(MigrationError::BadVersion)
        ));
    }
}

//! Union merge of remote note rows into local state.
//!
//! Conflict resolution is additive everywhere: notes merge by id, tags merge
//! by per-track set union. Nothing is replaced or bulk-removed, so merging
//! the same remote snapshot any number of times yields the same state.

use sha2::{Digest, Sha256};

use shared::{
    domain::{Note, PersistedState, TrackId},
    protocol::RemoteNoteRow,
    tags,
};

/// Two notes on the same track with the same body created within this window
/// are treated as one note written from two devices.
pub const DEDUP_WINDOW_MS: i64 = 5_000;

/// Content signature for near-duplicate detection: track + normalized body.
/// Time proximity is checked separately against the window.
fn content_signature(track_id: &TrackId, body: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(track_id.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(body.trim().as_bytes());
    hasher.finalize().into()
}

fn within_window(a: &Note, b: &RemoteNoteRow) -> bool {
    match (a.timestamp_ms, b.timestamp_ms) {
        (Some(at), Some(bt)) => (at as i64 - bt as i64).abs() <= DEDUP_WINDOW_MS,
        (None, None) => (a.created_at - b.created_at)
            .num_milliseconds()
            .abs()
            <= DEDUP_WINDOW_MS,
        _ => false,
    }
}

fn is_near_duplicate(existing: &Note, row: &RemoteNoteRow) -> bool {
    existing.track_id == row.track_id
        && content_signature(&existing.track_id, &existing.body)
            == content_signature(&row.track_id, &row.body)
        && within_window(existing, row)
}

/// Merges remote rows into `state` and returns the merged snapshot plus the
/// number of notes added. Rows with an empty body are tag carriers (the
/// per-device representative tag rows) and contribute tags only.
pub fn merge_remote(state: &PersistedState, rows: &[RemoteNoteRow]) -> (PersistedState, usize) {
    let mut next = state.clone();
    let mut added = 0usize;

    for row in rows {
        // Tags propagate regardless of whether the note itself is new.
        let row_tags = tags::canonicalize(row.tags.iter());
        if !row_tags.is_empty() {
            let track_tags = next.tags_by_track.entry(row.track_id.clone()).or_default();
            *track_tags = tags::union(track_tags, &row_tags);
        }

        if row.body.trim().is_empty() {
            continue;
        }

        let notes = next.notes_by_track.entry(row.track_id.clone()).or_default();
        if let Some(existing) = notes.iter_mut().find(|n| n.id == row.id) {
            // Remote rows are append-only; the row's tags may still be newer.
            existing.tags = tags::union(&existing.tags, &row_tags);
            continue;
        }
        if let Some(duplicate) = notes.iter_mut().find(|n| is_near_duplicate(n, row)) {
            duplicate.tags = tags::union(&duplicate.tags, &row_tags);
            continue;
        }

        notes.push(Note {
            id: row.id.clone(),
            track_id: row.track_id.clone(),
            body: row.body.clone(),
            timestamp_ms: row.timestamp_ms,
            timestamp_end_ms: None,
            tags: row_tags,
            created_at: row.created_at,
            device_id: None,
        });
        notes.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        added += 1;
    }

    next.notes_by_track.retain(|_, notes| !notes.is_empty());
    (next, added)
}

#[cfg(test)]
#[path = "tests/merge_tests.rs"]
mod tests;

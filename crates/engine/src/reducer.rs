//! The playlist state machine: a pure reducer over `PersistedState`.
//!
//! Dispatch applies optimistically; the reducer carries no pending/commit
//! bookkeeping. Rollback after an irrecoverable remote failure is the
//! caller's job, done by dispatching a compensating action with the prior
//! value.

use shared::{
    domain::{ImportMeta, Note, NoteId, PersistedState, RecentPlaylist, Track, TrackId},
    tags::{self, TagError, MAX_TAGS_PER_TRACK},
};

#[derive(Debug, Clone)]
pub enum Action {
    AddNote {
        note: Note,
    },
    UpdateNote {
        track_id: TrackId,
        note_id: NoteId,
        body: String,
    },
    DeleteNote {
        track_id: TrackId,
        note_id: NoteId,
    },
    /// Re-inserts a previously deleted note (undo reapplication). Idempotent
    /// when the note id is already present.
    RestoreNote {
        note: Note,
    },
    AddTag {
        track_id: TrackId,
        tag: String,
    },
    RemoveTag {
        track_id: TrackId,
        tag: String,
    },
    /// Load boundary: replaces the track list during import. Exempt from
    /// the read-only guard so demo fixtures can load at all.
    SetTracks {
        tracks: Vec<Track>,
    },
    /// Load boundary: switches the active playlist. Exempt from the
    /// read-only guard, otherwise a demo playlist could never be left.
    SetProvider {
        import_meta: ImportMeta,
        playlist_title: Option<String>,
    },
}

impl Action {
    /// Annotation mutations fall under the read-only guard; the two load-
    /// boundary actions do not.
    fn is_guarded(&self) -> bool {
        !matches!(
            self,
            Action::SetProvider { .. } | Action::SetTracks { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Applied,
    /// Read-only guard: state is unchanged and a warning should be surfaced.
    ReadOnlyIgnored,
    /// Local validation rejected the action; state is unchanged.
    Rejected(TagError),
}

#[derive(Debug, Clone)]
pub struct Reduction {
    pub state: PersistedState,
    pub outcome: DispatchOutcome,
}

fn unchanged(state: &PersistedState, outcome: DispatchOutcome) -> Reduction {
    Reduction {
        state: state.clone(),
        outcome,
    }
}

pub fn reduce(state: &PersistedState, action: Action) -> Reduction {
    // Guard first, before any validation: mutations against a read-only
    // playlist degrade to a warning, never an error.
    if state.is_read_only() && action.is_guarded() {
        return unchanged(state, DispatchOutcome::ReadOnlyIgnored);
    }

    let mut next = state.clone();
    let outcome = match action {
        Action::AddNote { mut note } => {
            note.tags = tags::canonicalize(note.tags);
            let track_tags = next.tags_by_track.entry(note.track_id.clone()).or_default();
            *track_tags = tags::union(track_tags, &note.tags);
            if track_tags.is_empty() {
                next.tags_by_track.remove(&note.track_id);
            }
            next.notes_by_track
                .entry(note.track_id.clone())
                .or_default()
                .push(note);
            DispatchOutcome::Applied
        }
        Action::UpdateNote {
            track_id,
            note_id,
            body,
        } => {
            if let Some(notes) = next.notes_by_track.get_mut(&track_id) {
                if let Some(note) = notes.iter_mut().find(|n| n.id == note_id) {
                    note.body = body;
                }
            }
            DispatchOutcome::Applied
        }
        Action::DeleteNote { track_id, note_id } => {
            if let Some(notes) = next.notes_by_track.get_mut(&track_id) {
                notes.retain(|n| n.id != note_id);
                if notes.is_empty() {
                    next.notes_by_track.remove(&track_id);
                }
            }
            DispatchOutcome::Applied
        }
        Action::RestoreNote { note } => {
            let notes = next.notes_by_track.entry(note.track_id.clone()).or_default();
            if !notes.iter().any(|n| n.id == note.id) {
                notes.push(note);
                notes.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            }
            DispatchOutcome::Applied
        }
        Action::AddTag { track_id, tag } => match tags::validate_tag(&tag) {
            Err(reason) => DispatchOutcome::Rejected(reason),
            Ok(folded) => {
                let track_tags = next.tags_by_track.entry(track_id).or_default();
                if track_tags.iter().any(|t| t == &folded) {
                    DispatchOutcome::Applied
                } else if track_tags.len() >= MAX_TAGS_PER_TRACK {
                    return unchanged(state, DispatchOutcome::Rejected(TagError::TooManyTags));
                } else {
                    let at = track_tags
                        .binary_search(&folded)
                        .unwrap_or_else(|insert_at| insert_at);
                    track_tags.insert(at, folded);
                    DispatchOutcome::Applied
                }
            }
        },
        Action::RemoveTag { track_id, tag } => {
            let folded = tag.trim().to_lowercase();
            if let Some(track_tags) = next.tags_by_track.get_mut(&track_id) {
                track_tags.retain(|t| t != &folded);
                if track_tags.is_empty() {
                    next.tags_by_track.remove(&track_id);
                }
            }
            DispatchOutcome::Applied
        }
        Action::SetTracks { tracks } => {
            next.tracks = tracks;
            DispatchOutcome::Applied
        }
        Action::SetProvider {
            import_meta,
            playlist_title,
        } => {
            if let Some(playlist_id) = import_meta.playlist_id.clone() {
                next.remember_playlist(RecentPlaylist {
                    provider: import_meta.provider,
                    playlist_id,
                    title: playlist_title.unwrap_or_default(),
                });
            }
            next.import_meta = import_meta;
            DispatchOutcome::Applied
        }
    };

    Reduction {
        state: next,
        outcome,
    }
}

#[cfg(test)]
#[path = "tests/reducer_tests.rs"]
mod tests;

use super::*;
use chrono::{Duration, Utc};
use shared::{
    domain::{Note, NoteId, PersistedState},
    protocol::RemoteNoteRow,
};

fn local_note(id: &str, track: &str, body: &str) -> Note {
    Note {
        id: NoteId::from(id),
        track_id: TrackId::from(track),
        body: body.to_string(),
        timestamp_ms: None,
        timestamp_end_ms: None,
        tags: Vec::new(),
        created_at: Utc::now(),
        device_id: Some("dev-local".into()),
    }
}

fn row(id: &str, track: &str, body: &str, tags: &[&str]) -> RemoteNoteRow {
    RemoteNoteRow {
        id: NoteId::from(id),
        track_id: TrackId::from(track),
        body: body.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        timestamp_ms: None,
        created_at: Utc::now(),
    }
}

#[test]
fn two_device_edit_converges_to_union() {
    // Device A holds {"rock"} locally; device B pushed {"mellow"} plus its
    // own note for the same track.
    let mut state = PersistedState::empty();
    state
        .tags_by_track
        .insert(TrackId::from("t1"), vec!["rock".to_string()]);
    state
        .notes_by_track
        .entry(TrackId::from("t1"))
        .or_default()
        .push(local_note("n-a", "t1", "loved the intro"));

    let rows = vec![row("n-b", "t1", "solo at 2:10", &["mellow"])];
    let (merged, added) = merge_remote(&state, &rows);

    assert_eq!(added, 1);
    assert_eq!(
        merged.tags_by_track[&TrackId::from("t1")],
        vec!["mellow".to_string(), "rock".to_string()]
    );
    assert_eq!(merged.notes_by_track[&TrackId::from("t1")].len(), 2);
}

#[test]
fn merge_is_idempotent() {
    let state = PersistedState::empty();
    let rows = vec![
        row("n1", "t1", "first", &["rock"]),
        row("n2", "t2", "second", &[]),
    ];
    let (once, added_once) = merge_remote(&state, &rows);
    let (twice, added_twice) = merge_remote(&once, &rows);

    assert_eq!(added_once, 2);
    assert_eq!(added_twice, 0);
    assert_eq!(once, twice);
}

#[test]
fn by_id_match_still_unions_row_tags() {
    let mut state = PersistedState::empty();
    let mut n = local_note("n1", "t1", "original body");
    n.tags = vec!["local".to_string()];
    state
        .notes_by_track
        .entry(TrackId::from("t1"))
        .or_default()
        .push(n);

    let rows = vec![row("n1", "t1", "remote body ignored", &["remote"])];
    let (merged, added) = merge_remote(&state, &rows);

    assert_eq!(added, 0);
    let note = &merged.notes_by_track[&TrackId::from("t1")][0];
    assert_eq!(note.body, "original body");
    assert_eq!(note.tags, vec!["local".to_string(), "remote".to_string()]);
}

#[test]
fn near_duplicate_within_window_collapses() {
    let now = Utc::now();
    let mut state = PersistedState::empty();
    let mut local = local_note("n-local", "t1", "great breakdown");
    local.created_at = now;
    state
        .notes_by_track
        .entry(TrackId::from("t1"))
        .or_default()
        .push(local);

    let mut dup = row("n-remote", "t1", "  great breakdown  ", &["live"]);
    dup.created_at = now + Duration::milliseconds(DEDUP_WINDOW_MS - 1);
    let (merged, added) = merge_remote(&state, &vec![dup]);

    assert_eq!(added, 0);
    let notes = &merged.notes_by_track[&TrackId::from("t1")];
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].id, NoteId::from("n-local"));
    assert_eq!(notes[0].tags, vec!["live".to_string()]);
}

#[test]
fn same_body_outside_window_is_a_distinct_note() {
    let now = Utc::now();
    let mut state = PersistedState::empty();
    let mut local = local_note("n-local", "t1", "great breakdown");
    local.created_at = now;
    state
        .notes_by_track
        .entry(TrackId::from("t1"))
        .or_default()
        .push(local);

    let mut far = row("n-remote", "t1", "great breakdown", &[]);
    far.created_at = now + Duration::milliseconds(DEDUP_WINDOW_MS + 1);
    let (merged, added) = merge_remote(&state, &vec![far]);

    assert_eq!(added, 1);
    assert_eq!(merged.notes_by_track[&TrackId::from("t1")].len(), 2);
}

#[test]
fn track_timestamps_dedup_on_position_not_wall_clock() {
    let mut state = PersistedState::empty();
    let mut local = local_note("n-local", "t1", "drop hits here");
    local.timestamp_ms = Some(90_000);
    local.created_at = Utc::now() - Duration::hours(2);
    state
        .notes_by_track
        .entry(TrackId::from("t1"))
        .or_default()
        .push(local);

    let mut dup = row("n-remote", "t1", "drop hits here", &[]);
    dup.timestamp_ms = Some(91_000);
    let (merged, added) = merge_remote(&state, &vec![dup]);

    assert_eq!(added, 0);
    assert_eq!(merged.notes_by_track[&TrackId::from("t1")].len(), 1);
}

#[test]
fn empty_body_rows_carry_tags_only() {
    let state = PersistedState::empty();
    let rows = vec![row("n-carrier", "t1", "   ", &["Chill", "chill", "rock"])];
    let (merged, added) = merge_remote(&state, &rows);

    assert_eq!(added, 0);
    assert!(merged.notes_by_track.is_empty());
    assert_eq!(
        merged.tags_by_track[&TrackId::from("t1")],
        vec!["chill".to_string(), "rock".to_string()]
    );
}

#[test]
fn local_only_notes_survive_merge() {
    let mut state = PersistedState::empty();
    state
        .notes_by_track
        .entry(TrackId::from("t1"))
        .or_default()
        .push(local_note("n-unsynced", "t1", "not pushed yet"));

    let (merged, _) = merge_remote(&state, &[row("n-b", "t2", "other track", &[])]);
    assert!(merged.notes_by_track[&TrackId::from("t1")]
        .iter()
        .any(|n| n.id == NoteId::from("n-unsynced")));
}

#[test]
fn invalid_remote_tags_are_dropped_in_canonicalization() {
    let state = PersistedState::empty();
    let rows = vec![row("n1", "t1", "body", &["ok", "bad!tag", ""])];
    let (merged, _) = merge_remote(&state, &rows);
    assert_eq!(merged.tags_by_track[&TrackId::from("t1")], vec!["ok".to_string()]);
}

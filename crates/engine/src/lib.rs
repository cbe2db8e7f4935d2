//! The annotation engine: optimistic local edits over a pure reducer,
//! durable offline queues, and union-merge reconciliation with the remote
//! note/tag/device API.
//!
//! Flow: action -> reducer (optimistic) -> orchestrator (enqueue/debounce/
//! flush) -> remote -> merge result -> reducer state -> local store.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use shared::{
    domain::{Note, NoteId, PersistedState, TrackId},
    error::FailureClass,
    protocol::CreateNoteRequest,
    tags::TagError,
};
use storage::LocalStateStore;

pub mod adapters;
pub mod identity;
pub mod merge;
pub mod reducer;
pub mod remote;
pub mod sync;
pub mod undo;

pub use adapters::{AdapterResult, ImportOptions, PlaylistImporter};
pub use identity::{BootstrapOutcome, DeviceIdentityManager};
pub use reducer::{Action, DispatchOutcome, Reduction};
pub use remote::{HttpRemoteStore, RemoteError, RemoteStore};
pub use sync::{DeleteOutcome, FlushReport, OpClass, RequestSequencer, SyncOrchestrator, Ticket};
pub use undo::UndoManager;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub quiet_period: Duration,
    pub max_pending_deletions: usize,
    pub undo_window: Duration,
    pub restore_min_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            quiet_period: sync::DEFAULT_QUIET_PERIOD,
            max_pending_deletions: sync::DEFAULT_MAX_PENDING_DELETIONS,
            undo_window: undo::DEFAULT_UNDO_WINDOW,
            restore_min_interval: identity::DEFAULT_RESTORE_MIN_INTERVAL,
        }
    }
}

#[derive(Debug, Clone)]
pub enum EngineEvent {
    Warning(String),
    TagRejected { track_id: TrackId, reason: TagError },
    StateChanged,
    SyncCompleted { merged_notes: usize },
    DeletionFlush(FlushReport),
    UndoExpired { id: String },
}

pub struct AnnotationEngine {
    store: LocalStateStore,
    remote: Arc<dyn RemoteStore>,
    identity: DeviceIdentityManager,
    orchestrator: Arc<SyncOrchestrator>,
    undo: UndoManager<Note>,
    sequencer: RequestSequencer,
    state: Mutex<PersistedState>,
    events: broadcast::Sender<EngineEvent>,
}

impl AnnotationEngine {
    /// Loads persisted state (migrating forward as needed), restores the
    /// durable deletion queue, and attaches any stored identity to the
    /// remote client.
    pub async fn new(
        store: LocalStateStore,
        remote: Arc<dyn RemoteStore>,
        config: EngineConfig,
    ) -> Result<Arc<Self>> {
        let state = store.load().await?.unwrap_or_else(PersistedState::empty);
        let (events, _) = broadcast::channel(256);

        let orchestrator = SyncOrchestrator::new(
            Arc::clone(&remote),
            store.clone(),
            config.quiet_period,
            config.max_pending_deletions,
            events.clone(),
        );
        orchestrator.load_persisted_queue().await?;

        let identity = DeviceIdentityManager::new(
            Arc::clone(&remote),
            store.clone(),
            config.restore_min_interval,
        );
        if let Some(stored) = identity.current().await? {
            remote.set_device_id(Some(stored.device_id));
        }

        let expire_events = events.clone();
        let undo = UndoManager::new(config.undo_window, move |id, _note: Note| {
            let _ = expire_events.send(EngineEvent::UndoExpired { id });
        });

        Ok(Arc::new(Self {
            store,
            remote,
            identity,
            orchestrator,
            undo,
            sequencer: RequestSequencer::new(),
            state: Mutex::new(state),
            events,
        }))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn identity(&self) -> &DeviceIdentityManager {
        &self.identity
    }

    pub async fn state(&self) -> PersistedState {
        self.state.lock().await.clone()
    }

    /// Applies an action optimistically, persists the result, and feeds the
    /// orchestrator. Validation errors come back synchronously; read-only
    /// violations degrade to a warning event.
    pub async fn dispatch(self: &Arc<Self>, action: Action) -> Result<DispatchOutcome> {
        let mut state = self.state.lock().await;

        // Capture what dispatch side effects need before the state moves on.
        let deleted_note = match &action {
            Action::DeleteNote { track_id, note_id } => state
                .notes_by_track
                .get(track_id)
                .and_then(|notes| notes.iter().find(|n| &n.id == note_id))
                .cloned(),
            _ => None,
        };

        let reduction = reducer::reduce(&state, action.clone());
        match &reduction.outcome {
            DispatchOutcome::ReadOnlyIgnored => {
                warn!("mutation ignored: active playlist is read-only");
                let _ = self.events.send(EngineEvent::Warning(
                    "this playlist is read-only".to_string(),
                ));
                return Ok(reduction.outcome);
            }
            DispatchOutcome::Rejected(reason) => {
                if let Action::AddTag { track_id, .. } = &action {
                    let _ = self.events.send(EngineEvent::TagRejected {
                        track_id: track_id.clone(),
                        reason: reason.clone(),
                    });
                }
                return Ok(reduction.outcome);
            }
            DispatchOutcome::Applied => {}
        }

        *state = reduction.state;
        self.store.save(&state).await?;
        let _ = self.events.send(EngineEvent::StateChanged);

        match action {
            Action::AddTag { track_id, .. } | Action::RemoveTag { track_id, .. } => {
                let tags = state.tags_by_track.get(&track_id).cloned().unwrap_or_default();
                drop(state);
                self.orchestrator.note_tag_edit(track_id, tags).await;
            }
            Action::AddNote { note } => {
                drop(state);
                self.push_note(note);
            }
            Action::DeleteNote { note_id, track_id } => {
                drop(state);
                if let Some(note) = deleted_note {
                    self.undo.schedule(note_id.0.clone(), note).await;
                }
                self.orchestrator.enqueue_deletion(note_id, track_id).await?;
            }
            _ => {}
        }

        Ok(DispatchOutcome::Applied)
    }

    /// Pushes a freshly created note to the remote in the background. On a
    /// permanent client rejection the optimistic copy is rolled back with a
    /// compensating delete; transient failures leave the local-only note for
    /// the next merge to preserve.
    fn push_note(self: &Arc<Self>, note: Note) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let request = CreateNoteRequest {
                track_id: note.track_id.clone(),
                body: Some(note.body.clone()),
                tags: Some(note.tags.clone()),
            };
            match engine.remote.create_note(&request).await {
                Ok(row) => {
                    // Adopt the server-assigned id so later deletes target
                    // the durable row.
                    if row.id != note.id {
                        let mut state = engine.state.lock().await;
                        if let Some(notes) = state.notes_by_track.get_mut(&note.track_id) {
                            if let Some(local) = notes.iter_mut().find(|n| n.id == note.id) {
                                local.id = row.id;
                            }
                        }
                        if let Err(err) = engine.store.save(&state).await {
                            warn!("failed to persist server note id: {err}");
                        }
                    }
                }
                Err(err) if matches!(err.class(), FailureClass::PermanentClient) => {
                    warn!(note_id = %note.id, "note rejected by remote, rolling back: {err}");
                    let compensate = Action::DeleteNote {
                        track_id: note.track_id.clone(),
                        note_id: note.id.clone(),
                    };
                    let mut state = engine.state.lock().await;
                    let reduction = reducer::reduce(&state, compensate);
                    *state = reduction.state;
                    if let Err(err) = engine.store.save(&state).await {
                        warn!("failed to persist note rollback: {err}");
                    }
                    let _ = engine.events.send(EngineEvent::Warning(format!(
                        "note could not be saved remotely and was rolled back: {err}"
                    )));
                }
                Err(err) => {
                    info!(note_id = %note.id, "note push deferred, kept local: {err}");
                }
            }
        });
    }

    /// Undoes a pending note deletion within the undo window: restores the
    /// note locally and cancels the queued remote deletion. No-op when the
    /// window has already expired or the id was never deleted.
    pub async fn undo_delete(self: &Arc<Self>, note_id: &NoteId) -> Result<Option<Note>> {
        let Some(note) = self.undo.undo(note_id.as_str()).await else {
            return Ok(None);
        };
        self.orchestrator.cancel_deletion(note_id).await?;

        let mut state = self.state.lock().await;
        let reduction = reducer::reduce(&state, Action::RestoreNote { note: note.clone() });
        *state = reduction.state;
        self.store.save(&state).await?;
        let _ = self.events.send(EngineEvent::StateChanged);
        Ok(Some(note))
    }

    /// Fetches all remote rows for this identity and union-merges them into
    /// local state. Stale responses (superseded by a newer sync) are
    /// discarded; a superseded in-flight fetch is cancelled cooperatively.
    pub async fn sync(self: &Arc<Self>) -> Result<Option<FlushReport>> {
        let mut ticket = self.sequencer.issue(OpClass::NotesFetch);

        let rows = tokio::select! {
            fetched = self.remote.fetch_notes() => match fetched {
                Ok(rows) => rows,
                Err(err) => {
                    warn!("notes fetch failed: {err}");
                    return Err(anyhow::Error::new(err));
                }
            },
            _ = ticket.cancelled() => {
                info!("notes fetch superseded, cancelling");
                return Ok(None);
            }
        };

        if !self.sequencer.is_current(&ticket) {
            info!("discarding stale notes fetch response");
            return Ok(None);
        }

        {
            let mut state = self.state.lock().await;
            let (merged, added) = merge::merge_remote(&state, &rows);
            if merged != *state {
                // Merge-heavy write: back up the pre-merge snapshot first.
                self.store.backup(&state).await?;
                *state = merged;
                self.store.save(&state).await?;
                let _ = self.events.send(EngineEvent::StateChanged);
            }
            let _ = self
                .events
                .send(EngineEvent::SyncCompleted { merged_notes: added });
        }

        self.orchestrator.flush_tags().await;
        let report = self.orchestrator.flush_deletions().await?;
        Ok(Some(report))
    }

    /// Imports a playlist through the given adapter, guarded by the Import
    /// operation class: a reimport supersedes an in-flight import and stale
    /// results are discarded.
    pub async fn import(
        self: &Arc<Self>,
        importer: &dyn PlaylistImporter,
        options: &ImportOptions,
    ) -> Result<bool> {
        let mut ticket = self.sequencer.issue(OpClass::Import);

        let result = tokio::select! {
            imported = importer.import(options) => imported?,
            _ = ticket.cancelled() => {
                info!("import superseded, cancelling");
                return Ok(false);
            }
        };

        if !self.sequencer.is_current(&ticket) {
            info!("discarding stale import result");
            return Ok(false);
        }

        // SetProvider first so the read-only guard reflects the incoming
        // playlist when the track list lands.
        self.dispatch(Action::SetProvider {
            import_meta: result.meta.clone(),
            playlist_title: Some(result.title.clone()),
        })
        .await?;
        let mut state = self.state.lock().await;
        let reduction = reducer::reduce(
            &state,
            Action::SetTracks {
                tracks: result.tracks,
            },
        );
        *state = reduction.state;
        self.store.save(&state).await?;
        let _ = self.events.send(EngineEvent::StateChanged);
        Ok(true)
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

//! Sync orchestration: the debounced tag-sync queue, the durable
//! note-deletion queue, and the request-sequence race guard.
//!
//! Queue failures are never thrown; each flushed item yields a tagged
//! [`DeleteOutcome`] and the report carries per-class counters.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use anyhow::Result;
use chrono::Utc;
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
};
use tracing::{info, warn};

use shared::{
    domain::{NoteId, PendingDeletion, PendingTagSync, TrackId},
    error::FailureClass,
    protocol::UpsertTagsRequest,
};
use storage::LocalStateStore;

use crate::{remote::RemoteStore, EngineEvent};

/// Quiet period after the last tag edit before the coalesced upsert fires.
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(350);
/// Bound on the durable deletion queue; oldest entries are evicted first.
pub const DEFAULT_MAX_PENDING_DELETIONS: usize = 200;

/// Per-item result of flushing one queued deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// 404 on delete: the note is gone already, which is what we wanted.
    AlreadyGone,
    /// 401/403: this identity no longer owns the note. Retrying would never
    /// succeed, so the entry is dropped.
    Unauthorized,
    /// 5xx or network failure; the entry stays queued.
    Retryable(String),
    /// Any other 4xx. Dropped and logged, not retried.
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub completed: usize,
    pub already_gone: usize,
    pub unauthorized: usize,
    pub retryable: usize,
    pub failed: usize,
}

/// Operation classes whose responses are sequence-guarded independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpClass {
    Import,
    NotesFetch,
    LoadMore,
}

/// A sequence ticket for one request. Holding the ticket does not block
/// newer requests; a superseded ticket's cancellation signal fires instead.
pub struct Ticket {
    pub class: OpClass,
    pub seq: u64,
    cancelled: watch::Receiver<bool>,
}

impl Ticket {
    /// Resolves when this ticket is superseded by a newer one of the same
    /// class. Pends forever while the ticket is still the latest.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.cancelled.borrow() {
                return;
            }
            if self.cancelled.changed().await.is_err() {
                // Sequencer dropped; nothing will ever cancel us.
                std::future::pending::<()>().await;
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }
}

#[derive(Default)]
struct ClassState {
    latest: u64,
    cancel_latest: Option<watch::Sender<bool>>,
}

/// Monotonic per-class sequence numbers. A response is applied only if its
/// sequence is still the latest issued for its class.
#[derive(Default)]
pub struct RequestSequencer {
    classes: StdMutex<HashMap<OpClass, ClassState>>,
}

impl RequestSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self, class: OpClass) -> Ticket {
        let mut classes = self.classes.lock().expect("sequencer lock");
        let state = classes.entry(class).or_default();
        if let Some(previous) = state.cancel_latest.take() {
            let _ = previous.send(true);
        }
        state.latest += 1;
        let (tx, rx) = watch::channel(false);
        state.cancel_latest = Some(tx);
        Ticket {
            class,
            seq: state.latest,
            cancelled: rx,
        }
    }

    pub fn is_current(&self, ticket: &Ticket) -> bool {
        let classes = self.classes.lock().expect("sequencer lock");
        classes
            .get(&ticket.class)
            .map(|state| state.latest == ticket.seq)
            .unwrap_or(false)
    }
}

struct OrchestratorState {
    /// One live entry per track; edits replace the payload in place.
    tag_queue: HashMap<TrackId, PendingTagSync>,
    /// Pending quiet-period tasks, aborted and replaced on each edit.
    debounce_tasks: HashMap<TrackId, JoinHandle<()>>,
    deletions: VecDeque<PendingDeletion>,
}

pub struct SyncOrchestrator {
    remote: Arc<dyn RemoteStore>,
    store: LocalStateStore,
    quiet_period: Duration,
    max_pending_deletions: usize,
    inner: Mutex<OrchestratorState>,
    events: broadcast::Sender<EngineEvent>,
}

impl SyncOrchestrator {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        store: LocalStateStore,
        quiet_period: Duration,
        max_pending_deletions: usize,
        events: broadcast::Sender<EngineEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            remote,
            store,
            quiet_period,
            max_pending_deletions,
            inner: Mutex::new(OrchestratorState {
                tag_queue: HashMap::new(),
                debounce_tasks: HashMap::new(),
                deletions: VecDeque::new(),
            }),
            events,
        })
    }

    /// Restores the durable deletion queue after startup.
    pub async fn load_persisted_queue(&self) -> Result<()> {
        let persisted = self.store.load_deletion_queue().await?;
        let mut inner = self.inner.lock().await;
        inner.deletions = persisted.into();
        Ok(())
    }

    /// Records a tag edit for a track: replaces the queued payload with the
    /// current full set and resets the quiet-period timer. Exactly one
    /// upsert fires per quiet window.
    pub async fn note_tag_edit(self: &Arc<Self>, track_id: TrackId, tags: Vec<String>) {
        let mut inner = self.inner.lock().await;
        inner.tag_queue.insert(
            track_id.clone(),
            PendingTagSync {
                track_id: track_id.clone(),
                tags,
                queued_at: Utc::now(),
            },
        );

        let orchestrator = Arc::clone(self);
        let debounce_track = track_id.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(orchestrator.quiet_period).await;
            orchestrator.flush_track(&debounce_track).await;
        });
        if let Some(previous) = inner.debounce_tasks.insert(track_id, task) {
            previous.abort();
        }
    }

    /// Attempts the queued upsert for one track. Success clears the entry
    /// unless a newer edit replaced it mid-flight; failure leaves it queued
    /// for the next flush trigger.
    async fn flush_track(&self, track_id: &TrackId) {
        let pending = {
            let mut inner = self.inner.lock().await;
            inner.debounce_tasks.remove(track_id);
            match inner.tag_queue.get(track_id) {
                Some(entry) => entry.clone(),
                None => return,
            }
        };

        let request = UpsertTagsRequest {
            track_id: pending.track_id.clone(),
            tags: pending.tags.clone(),
        };
        match self.remote.upsert_tags(&request).await {
            Ok(()) => {
                let mut inner = self.inner.lock().await;
                let unchanged = inner
                    .tag_queue
                    .get(track_id)
                    .map(|entry| entry.queued_at == pending.queued_at)
                    .unwrap_or(false);
                if unchanged {
                    inner.tag_queue.remove(track_id);
                }
            }
            Err(err) => {
                warn!(track_id = %track_id, "tag upsert failed, entry stays queued: {err}");
            }
        }
    }

    /// Flush trigger for reconnect/foreground/explicit flush: retries every
    /// queued tag entry immediately.
    pub async fn flush_tags(&self) {
        let pending_tracks: Vec<TrackId> = {
            let inner = self.inner.lock().await;
            inner.tag_queue.keys().cloned().collect()
        };
        for track_id in pending_tracks {
            self.flush_track(&track_id).await;
        }
    }

    pub async fn pending_tag_tracks(&self) -> usize {
        self.inner.lock().await.tag_queue.len()
    }

    /// Appends to the bounded deletion queue and persists it. When the bound
    /// is exceeded the oldest entry is dropped with a warning.
    pub async fn enqueue_deletion(&self, note_id: NoteId, track_id: TrackId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.deletions.push_back(PendingDeletion {
            note_id,
            track_id,
            queued_at: Utc::now(),
        });
        while inner.deletions.len() > self.max_pending_deletions {
            if let Some(dropped) = inner.deletions.pop_front() {
                warn!(
                    note_id = %dropped.note_id,
                    "deletion queue full, dropping oldest entry"
                );
                let _ = self.events.send(EngineEvent::Warning(format!(
                    "deletion queue full, dropped pending deletion of note {}",
                    dropped.note_id
                )));
            }
        }
        self.persist_deletions(&inner.deletions).await
    }

    /// Removes a queued deletion that was undone before it flushed.
    pub async fn cancel_deletion(&self, note_id: &NoteId) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let before = inner.deletions.len();
        inner.deletions.retain(|d| &d.note_id != note_id);
        let removed = inner.deletions.len() != before;
        if removed {
            self.persist_deletions(&inner.deletions).await?;
        }
        Ok(removed)
    }

    pub async fn pending_deletions(&self) -> Vec<PendingDeletion> {
        self.inner.lock().await.deletions.iter().cloned().collect()
    }

    /// Flushes the deletion queue, classifying each server response. Only
    /// retryable entries survive; everything else is removed and counted.
    pub async fn flush_deletions(&self) -> Result<FlushReport> {
        let batch: Vec<PendingDeletion> = {
            let inner = self.inner.lock().await;
            inner.deletions.iter().cloned().collect()
        };
        if batch.is_empty() {
            return Ok(FlushReport::default());
        }

        let mut report = FlushReport::default();
        let mut retryable: Vec<PendingDeletion> = Vec::new();
        for entry in &batch {
            match self.delete_outcome(entry).await {
                DeleteOutcome::Deleted => report.completed += 1,
                DeleteOutcome::AlreadyGone => {
                    info!(note_id = %entry.note_id, "note already gone on remote");
                    report.already_gone += 1;
                }
                DeleteOutcome::Unauthorized => {
                    warn!(
                        note_id = %entry.note_id,
                        "identity no longer owns note, dropping deletion"
                    );
                    report.unauthorized += 1;
                }
                DeleteOutcome::Retryable(reason) => {
                    info!(note_id = %entry.note_id, "deletion kept for retry: {reason}");
                    report.retryable += 1;
                    retryable.push(entry.clone());
                }
                DeleteOutcome::Failed => {
                    warn!(note_id = %entry.note_id, "deletion permanently failed, dropping");
                    report.failed += 1;
                }
            }
        }

        {
            let mut inner = self.inner.lock().await;
            // The live queue may have changed mid-flight: an entry cancelled
            // by undo must stay gone even when its flush classified as
            // retryable, and entries enqueued after the snapshot must
            // survive. Reconcile per entry instead of by position.
            let live: Vec<PendingDeletion> = inner.deletions.iter().cloned().collect();
            let mut next: VecDeque<PendingDeletion> = retryable
                .into_iter()
                .filter(|entry| live.contains(entry))
                .collect();
            for entry in live {
                if !batch.contains(&entry) {
                    next.push_back(entry);
                }
            }
            inner.deletions = next;
            self.persist_deletions(&inner.deletions).await?;
        }

        let _ = self.events.send(EngineEvent::DeletionFlush(report.clone()));
        Ok(report)
    }

    async fn delete_outcome(&self, entry: &PendingDeletion) -> DeleteOutcome {
        match self.remote.delete_note(&entry.note_id).await {
            Ok(()) => DeleteOutcome::Deleted,
            Err(err) => match err.class() {
                FailureClass::NotFound => DeleteOutcome::AlreadyGone,
                FailureClass::Auth => DeleteOutcome::Unauthorized,
                FailureClass::Transient => DeleteOutcome::Retryable(err.to_string()),
                // 429 is still a 4xx for the deletion table: removed, not
                // silently retried; the flush report surfaces it.
                FailureClass::RateLimited | FailureClass::PermanentClient => DeleteOutcome::Failed,
            },
        }
    }

    async fn persist_deletions(&self, deletions: &VecDeque<PendingDeletion>) -> Result<()> {
        let snapshot: Vec<PendingDeletion> = deletions.iter().cloned().collect();
        self.store.save_deletion_queue(&snapshot).await
    }
}

impl FlushReport {
    pub fn total(&self) -> usize {
        self.completed + self.already_gone + self.unauthorized + self.retryable + self.failed
    }
}

#[cfg(test)]
#[path = "tests/sync_tests.rs"]
mod tests;

//! Per-id time-bounded undo registry.
//!
//! Each scheduled id runs its own expiry timer; rescheduling the same id
//! aborts and replaces the previous timer. `on_expire` fires exactly once
//! per expiry, and an undone or expired id is a no-op afterwards.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{sync::Mutex, task::JoinHandle};

/// Default undo window: ten minutes.
pub const DEFAULT_UNDO_WINDOW: Duration = Duration::from_secs(600);

struct UndoEntry<M> {
    meta: M,
    generation: u64,
    timer: JoinHandle<()>,
}

pub struct UndoManager<M> {
    window: Duration,
    entries: Arc<Mutex<HashMap<String, UndoEntry<M>>>>,
    on_expire: Arc<dyn Fn(String, M) + Send + Sync>,
    next_generation: Arc<Mutex<u64>>,
}

impl<M: Send + 'static> UndoManager<M> {
    pub fn new(window: Duration, on_expire: impl Fn(String, M) + Send + Sync + 'static) -> Self {
        Self {
            window,
            entries: Arc::new(Mutex::new(HashMap::new())),
            on_expire: Arc::new(on_expire),
            next_generation: Arc::new(Mutex::new(0)),
        }
    }

    /// Registers `meta` for undo under `id`, replacing any existing timer
    /// for the same id.
    pub async fn schedule(&self, id: impl Into<String>, meta: M) {
        let id = id.into();
        let generation = {
            let mut next = self.next_generation.lock().await;
            *next += 1;
            *next
        };

        let entries = Arc::clone(&self.entries);
        let on_expire = Arc::clone(&self.on_expire);
        let window = self.window;
        let timer_id = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            // Remove only our own generation: a reschedule that raced the
            // timer owns the entry now.
            let expired = {
                let mut entries = entries.lock().await;
                match entries.get(&timer_id) {
                    Some(entry) if entry.generation == generation => {
                        entries.remove(&timer_id).map(|entry| entry.meta)
                    }
                    _ => None,
                }
            };
            if let Some(meta) = expired {
                on_expire(timer_id, meta);
            }
        });

        let mut entries = self.entries.lock().await;
        if let Some(previous) = entries.insert(
            id,
            UndoEntry {
                meta,
                generation,
                timer,
            },
        ) {
            previous.timer.abort();
        }
    }

    /// Cancels the expiry timer and returns the registered meta for
    /// reapplication. `None` when the id was already undone or expired.
    pub async fn undo(&self, id: &str) -> Option<M> {
        let mut entries = self.entries.lock().await;
        let entry = entries.remove(id)?;
        entry.timer.abort();
        Some(entry.meta)
    }

    pub async fn is_pending(&self, id: &str) -> bool {
        self.entries.lock().await.contains_key(id)
    }
}

#[cfg(test)]
#[path = "tests/undo_tests.rs"]
mod tests;

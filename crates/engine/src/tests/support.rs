//! In-memory `RemoteStore` double used across the engine test modules.

use std::{
    collections::HashMap,
    sync::Mutex as StdMutex,
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;

use shared::{
    domain::{AnonId, DeviceId, NoteId},
    protocol::{
        BootstrapResponse, CreateNoteRequest, RemoteNoteRow, RestoreRequest, RestoreResponse,
        RotateResponse, UpsertTagsRequest,
    },
};

use crate::remote::{RemoteError, RemoteStore};

pub const VALID_RECOVERY_CODE: &str = "otter-velvet-9431";
pub const VALID_CSRF: &str = "csrf-ok";

#[derive(Default)]
pub struct FakeRemoteStore {
    pub upserts: StdMutex<Vec<UpsertTagsRequest>>,
    pub creates: StdMutex<Vec<CreateNoteRequest>>,
    pub deletes: StdMutex<Vec<NoteId>>,
    pub rows: StdMutex<Vec<RemoteNoteRow>>,
    /// Status returned for deleting a given note id; absent means success.
    pub delete_status: StdMutex<HashMap<String, u16>>,
    /// When set, every delete call parks until the gate sender fires.
    delete_gate: StdMutex<Option<watch::Receiver<bool>>>,
    /// Fail this many upserts with a 503 before succeeding.
    pub upsert_failures_remaining: StdMutex<u32>,
    /// Status returned for every note create; absent means success.
    pub create_status: StdMutex<Option<u16>>,
    pub bootstrap_calls: StdMutex<u32>,
    device_id: StdMutex<Option<DeviceId>>,
}

impl FakeRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_count(&self) -> usize {
        self.upserts.lock().expect("upserts").len()
    }

    pub fn last_upsert(&self) -> Option<UpsertTagsRequest> {
        self.upserts.lock().expect("upserts").last().cloned()
    }

    pub fn set_rows(&self, rows: Vec<RemoteNoteRow>) {
        *self.rows.lock().expect("rows") = rows;
    }

    pub fn fail_next_upserts(&self, times: u32) {
        *self.upsert_failures_remaining.lock().expect("failures") = times;
    }

    pub fn fail_creates_with(&self, status: u16) {
        *self.create_status.lock().expect("create status") = Some(status);
    }

    /// Parks every subsequent delete call until the returned sender sends
    /// `true`. The attempt is still recorded in `deletes` before parking.
    pub fn hold_deletes(&self) -> watch::Sender<bool> {
        let (tx, rx) = watch::channel(false);
        *self.delete_gate.lock().expect("delete gate") = Some(rx);
        tx
    }

    pub fn set_delete_status(&self, note_id: &str, status: u16) {
        self.delete_status
            .lock()
            .expect("delete status")
            .insert(note_id.to_string(), status);
    }
}

#[async_trait]
impl RemoteStore for FakeRemoteStore {
    async fn bootstrap(&self) -> Result<BootstrapResponse, RemoteError> {
        *self.bootstrap_calls.lock().expect("calls") += 1;
        Ok(BootstrapResponse {
            device_id: DeviceId::from("dev-fake"),
            anon_id: AnonId::from("anon-fake"),
            recovery_code: VALID_RECOVERY_CODE.to_string(),
        })
    }

    async fn restore(&self, request: &RestoreRequest) -> Result<RestoreResponse, RemoteError> {
        if request.recovery_code == VALID_RECOVERY_CODE {
            Ok(RestoreResponse {
                device_id: DeviceId::from("dev-restored"),
                anon_id: AnonId::from("anon-restored"),
            })
        } else {
            Err(RemoteError::Status {
                status: 403,
                message: "recovery code mismatch".to_string(),
            })
        }
    }

    async fn rotate(&self, csrf_token: &str) -> Result<RotateResponse, RemoteError> {
        if csrf_token == VALID_CSRF {
            Ok(RotateResponse {
                recovery_code: "rotated-code-7777".to_string(),
                rotated_at: Utc::now(),
            })
        } else {
            Err(RemoteError::Status {
                status: 403,
                message: "csrf validation failed".to_string(),
            })
        }
    }

    async fn fetch_notes(&self) -> Result<Vec<RemoteNoteRow>, RemoteError> {
        Ok(self.rows.lock().expect("rows").clone())
    }

    async fn create_note(&self, request: &CreateNoteRequest) -> Result<RemoteNoteRow, RemoteError> {
        if let Some(status) = *self.create_status.lock().expect("create status") {
            return Err(RemoteError::Status {
                status,
                message: format!("create returned {status}"),
            });
        }
        self.creates.lock().expect("creates").push(request.clone());
        Ok(RemoteNoteRow {
            id: NoteId::random(),
            track_id: request.track_id.clone(),
            body: request.body.clone().unwrap_or_default(),
            tags: request.tags.clone().unwrap_or_default(),
            timestamp_ms: None,
            created_at: Utc::now(),
        })
    }

    async fn delete_note(&self, note_id: &NoteId) -> Result<(), RemoteError> {
        self.deletes.lock().expect("deletes").push(note_id.clone());
        let gate = self.delete_gate.lock().expect("delete gate").clone();
        if let Some(mut gate) = gate {
            while !*gate.borrow() {
                if gate.changed().await.is_err() {
                    break;
                }
            }
        }
        let status = self
            .delete_status
            .lock()
            .expect("delete status")
            .get(note_id.as_str())
            .copied();
        match status {
            None => Ok(()),
            Some(status) => Err(RemoteError::Status {
                status,
                message: format!("delete returned {status}"),
            }),
        }
    }

    async fn upsert_tags(&self, request: &UpsertTagsRequest) -> Result<(), RemoteError> {
        {
            let mut remaining = self.upsert_failures_remaining.lock().expect("failures");
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RemoteError::Status {
                    status: 503,
                    message: "upstream unavailable".to_string(),
                });
            }
        }
        self.upserts.lock().expect("upserts").push(request.clone());
        Ok(())
    }

    fn set_device_id(&self, device_id: Option<DeviceId>) {
        *self.device_id.lock().expect("device id") = device_id;
    }

    fn current_device_id(&self) -> Option<DeviceId> {
        self.device_id.lock().expect("device id").clone()
    }
}

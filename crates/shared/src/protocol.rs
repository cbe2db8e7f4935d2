//! Wire payloads exchanged with the remote note/tag/device API.
//! Every request carries the current device identity in the
//! [`DEVICE_ID_HEADER`]; every response may carry an updated identity in the
//! same header, which the client must adopt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{AnonId, DeviceId, NoteId, TrackId};

/// Request and response header naming the calling device.
pub const DEVICE_ID_HEADER: &str = "x-ln-device-id";
/// CSRF token header required by recovery-code rotation.
pub const CSRF_HEADER: &str = "x-ln-csrf";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapResponse {
    pub device_id: DeviceId,
    pub anon_id: AnonId,
    /// Shown to the user once; the server keeps only a salted hash plus a
    /// fast-lookup fingerprint.
    pub recovery_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreRequest {
    pub recovery_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreResponse {
    pub device_id: DeviceId,
    pub anon_id: AnonId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotateResponse {
    pub recovery_code: String,
    pub rotated_at: DateTime<Utc>,
}

/// One remote note row; each row carries its own tags, there is no separate
/// tag-only payload in the fetch response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteNoteRow {
    pub id: NoteId,
    pub track_id: TrackId,
    pub body: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNoteRequest {
    pub track_id: TrackId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// Replaces the device's representative tag row for a track. Full-set
/// replacement; cross-device union happens at fetch/merge time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertTagsRequest {
    pub track_id: TrackId,
    pub tags: Vec<String>,
}

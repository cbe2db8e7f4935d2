//! The remote note/tag/device API as consumed by the engine.
//!
//! `RemoteStore` is the trait seam; `HttpRemoteStore` is the reqwest-backed
//! implementation. Every request carries the current device id header, and
//! every response may carry an updated identity that is adopted on the spot.

use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use reqwest::{header::HeaderValue, Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::info;

use shared::{
    domain::{DeviceId, NoteId},
    error::{classify_status, FailureClass},
    protocol::{
        BootstrapResponse, CreateNoteRequest, RemoteNoteRow, RestoreRequest, RestoreResponse,
        RotateResponse, UpsertTagsRequest, CSRF_HEADER, DEVICE_ID_HEADER,
    },
};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
}

impl RemoteError {
    pub fn class(&self) -> FailureClass {
        match self {
            RemoteError::Status { status, .. } => classify_status(*status),
            RemoteError::Network(_) => FailureClass::Transient,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        RemoteError::Network(err.to_string())
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn bootstrap(&self) -> Result<BootstrapResponse, RemoteError>;
    async fn restore(&self, request: &RestoreRequest) -> Result<RestoreResponse, RemoteError>;
    async fn rotate(&self, csrf_token: &str) -> Result<RotateResponse, RemoteError>;
    async fn fetch_notes(&self) -> Result<Vec<RemoteNoteRow>, RemoteError>;
    async fn create_note(&self, request: &CreateNoteRequest) -> Result<RemoteNoteRow, RemoteError>;
    /// Delete-by-id. Idempotent on the server; a 404 still surfaces here as
    /// a status error so the deletion queue can count it as already-gone.
    async fn delete_note(&self, note_id: &NoteId) -> Result<(), RemoteError>;
    async fn upsert_tags(&self, request: &UpsertTagsRequest) -> Result<(), RemoteError>;

    /// Identity attached to subsequent requests. Set after bootstrap/restore.
    fn set_device_id(&self, device_id: Option<DeviceId>);
    fn current_device_id(&self) -> Option<DeviceId>;
}

pub struct HttpRemoteStore {
    http: Client,
    base_url: String,
    device_id: StdMutex<Option<DeviceId>>,
}

impl HttpRemoteStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            device_id: StdMutex::new(None),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self
            .http
            .request(method, format!("{}{path}", self.base_url));
        if let Some(device_id) = self.current_device_id() {
            builder = builder.header(DEVICE_ID_HEADER, device_id.0);
        }
        builder
    }

    /// Adopts an updated identity echoed in the response header, then maps
    /// non-2xx statuses to `RemoteError::Status`.
    async fn accept(&self, response: Response) -> Result<Response, RemoteError> {
        if let Some(echoed) = response
            .headers()
            .get(DEVICE_ID_HEADER)
            .and_then(|v: &HeaderValue| v.to_str().ok())
        {
            let echoed = DeviceId::from(echoed);
            let mut current = self.device_id.lock().expect("device id lock");
            if current.as_ref() != Some(&echoed) {
                info!(device_id = %echoed, "adopting updated device identity from response");
                *current = Some(echoed);
            }
        }

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(RemoteError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn json_body<T: DeserializeOwned>(&self, response: Response) -> Result<T, RemoteError> {
        let response = self.accept(response).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn bootstrap(&self) -> Result<BootstrapResponse, RemoteError> {
        let response = self.request(Method::POST, "/devices/bootstrap").send().await?;
        self.json_body(response).await
    }

    async fn restore(&self, request: &RestoreRequest) -> Result<RestoreResponse, RemoteError> {
        let response = self
            .request(Method::POST, "/devices/restore")
            .json(request)
            .send()
            .await?;
        self.json_body(response).await
    }

    async fn rotate(&self, csrf_token: &str) -> Result<RotateResponse, RemoteError> {
        let response = self
            .request(Method::POST, "/devices/recovery/rotate")
            .header(CSRF_HEADER, csrf_token)
            .send()
            .await?;
        self.json_body(response).await
    }

    async fn fetch_notes(&self) -> Result<Vec<RemoteNoteRow>, RemoteError> {
        let response = self.request(Method::GET, "/notes").send().await?;
        self.json_body(response).await
    }

    async fn create_note(&self, request: &CreateNoteRequest) -> Result<RemoteNoteRow, RemoteError> {
        let response = self
            .request(Method::POST, "/notes")
            .json(request)
            .send()
            .await?;
        self.json_body(response).await
    }

    async fn delete_note(&self, note_id: &NoteId) -> Result<(), RemoteError> {
        let response = self
            .request(Method::DELETE, &format!("/notes/{note_id}"))
            .send()
            .await?;
        self.accept(response).await?;
        Ok(())
    }

    async fn upsert_tags(&self, request: &UpsertTagsRequest) -> Result<(), RemoteError> {
        let response = self
            .request(Method::PUT, "/tags")
            .json(request)
            .send()
            .await?;
        self.accept(response).await?;
        Ok(())
    }

    fn set_device_id(&self, device_id: Option<DeviceId>) {
        *self.device_id.lock().expect("device id lock") = device_id;
    }

    fn current_device_id(&self) -> Option<DeviceId> {
        self.device_id.lock().expect("device id lock").clone()
    }
}

/// Convenience for tests and callers mapping delete statuses.
pub fn is_not_found(err: &RemoteError) -> bool {
    matches!(
        err,
        RemoteError::Status { status, .. } if *status == StatusCode::NOT_FOUND.as_u16()
    )
}

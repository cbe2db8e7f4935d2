//! Anonymous device identity: bootstrap, recovery-code restore, rotation.
//!
//! The manager is constructed once at startup and injected into the engine;
//! core logic never reads identity from ambient globals. Locally we hold
//! only `{device_id, anon_id, fingerprint}`; the recovery code is surfaced
//! to the user once and never stored.

use std::{
    sync::{Arc, Mutex as StdMutex},
    time::{Duration, Instant},
};

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use shared::{
    domain::DeviceIdentity,
    error::{EngineError, FailureClass},
    protocol::{RestoreRequest, RotateResponse},
};
use storage::LocalStateStore;

use crate::remote::{RemoteError, RemoteStore};

/// Minimum spacing between restore attempts before we stop calling the
/// remote and surface `RateLimited` locally.
pub const DEFAULT_RESTORE_MIN_INTERVAL: Duration = Duration::from_secs(10);

/// Identity returned by `bootstrap`. The recovery code is present only when
/// a fresh identity was established on this call.
#[derive(Debug, Clone)]
pub struct BootstrapOutcome {
    pub identity: DeviceIdentity,
    pub recovery_code: Option<String>,
}

pub struct DeviceIdentityManager {
    remote: Arc<dyn RemoteStore>,
    store: LocalStateStore,
    restore_min_interval: Duration,
    last_restore_attempt: StdMutex<Option<Instant>>,
}

/// Fast-lookup fingerprint of a recovery code; matches what the server
/// stores alongside the salted hash.
pub fn fingerprint(recovery_code: &str) -> String {
    let digest = Sha256::digest(recovery_code.trim().as_bytes());
    let mut out = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

impl DeviceIdentityManager {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        store: LocalStateStore,
        restore_min_interval: Duration,
    ) -> Self {
        Self {
            remote,
            store,
            restore_min_interval,
            last_restore_attempt: StdMutex::new(None),
        }
    }

    /// Idempotent bootstrap: returns the stored identity when one exists for
    /// this installation, otherwise establishes a fresh one with the remote
    /// and persists it.
    pub async fn bootstrap(&self) -> Result<BootstrapOutcome, EngineError> {
        if let Some(existing) = self
            .store
            .load_identity()
            .await
            .map_err(|err| EngineError::Transient(err.to_string()))?
        {
            self.remote.set_device_id(Some(existing.device_id.clone()));
            return Ok(BootstrapOutcome {
                identity: existing,
                recovery_code: None,
            });
        }

        let response = self.remote.bootstrap().await.map_err(map_remote)?;
        let identity = DeviceIdentity {
            device_id: response.device_id.clone(),
            anon_id: response.anon_id,
            recovery_code_fingerprint: fingerprint(&response.recovery_code),
        };
        self.store
            .save_identity(&identity)
            .await
            .map_err(|err| EngineError::Transient(err.to_string()))?;
        self.remote.set_device_id(Some(response.device_id));
        info!(device_id = %identity.device_id, "established fresh device identity");
        Ok(BootstrapOutcome {
            identity,
            recovery_code: Some(response.recovery_code),
        })
    }

    /// Reassociates this installation with the anonymous identity named by
    /// `recovery_code`. Attempts are throttled locally before the remote is
    /// even asked.
    pub async fn restore(&self, recovery_code: &str) -> Result<DeviceIdentity, EngineError> {
        {
            let mut last = self.last_restore_attempt.lock().expect("restore lock");
            if let Some(at) = *last {
                if at.elapsed() < self.restore_min_interval {
                    warn!("restore attempt suppressed by local rate limit");
                    return Err(EngineError::RateLimited(
                        "too many restore attempts, wait before retrying".to_string(),
                    ));
                }
            }
            *last = Some(Instant::now());
        }

        let response = self
            .remote
            .restore(&RestoreRequest {
                recovery_code: recovery_code.trim().to_string(),
            })
            .await
            .map_err(|err| match err.class() {
                FailureClass::Auth | FailureClass::NotFound => EngineError::InvalidRecoveryCode,
                _ => map_remote(err),
            })?;

        let identity = DeviceIdentity {
            device_id: response.device_id.clone(),
            anon_id: response.anon_id,
            recovery_code_fingerprint: fingerprint(recovery_code),
        };
        self.store
            .save_identity(&identity)
            .await
            .map_err(|err| EngineError::Transient(err.to_string()))?;
        self.remote.set_device_id(Some(response.device_id));
        info!(anon_id = %identity.anon_id, "restored anonymous identity from recovery code");
        Ok(identity)
    }

    /// Rotates the recovery code. Requires a CSRF token; the previous code
    /// is invalidated server-side. Returns the fresh code for one-time
    /// display.
    pub async fn rotate(&self, csrf_token: &str) -> Result<RotateResponse, EngineError> {
        let response = self.remote.rotate(csrf_token).await.map_err(map_remote)?;

        if let Some(mut identity) = self
            .store
            .load_identity()
            .await
            .map_err(|err| EngineError::Transient(err.to_string()))?
        {
            identity.recovery_code_fingerprint = fingerprint(&response.recovery_code);
            self.store
                .save_identity(&identity)
                .await
                .map_err(|err| EngineError::Transient(err.to_string()))?;
        }
        info!(rotated_at = %response.rotated_at, "rotated recovery code");
        Ok(response)
    }

    pub async fn current(&self) -> Result<Option<DeviceIdentity>, EngineError> {
        self.store
            .load_identity()
            .await
            .map_err(|err| EngineError::Transient(err.to_string()))
    }
}

fn map_remote(err: RemoteError) -> EngineError {
    match err.class() {
        FailureClass::Auth => EngineError::Auth(err.to_string()),
        FailureClass::RateLimited => EngineError::RateLimited(err.to_string()),
        FailureClass::PermanentClient | FailureClass::NotFound => {
            EngineError::PermanentClient(err.to_string())
        }
        FailureClass::Transient => EngineError::Transient(err.to_string()),
    }
}

#[cfg(test)]
#[path = "tests/identity_tests.rs"]
mod tests;

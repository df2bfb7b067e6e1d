//! Persisted session credentials.
//!
//! The blob is owned by the protocol library; the adapter only loads it
//! before dialling and writes back whatever the library hands it.

use std::path::PathBuf;

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{AdapterError, AdapterResult};

const CREDS_FILE: &str = "creds.json";

/// Opaque session credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct Credentials(Value);

impl Credentials {
    /// Fresh, unpaired credentials. Dialling with these yields a QR challenge.
    pub fn fresh() -> Self {
        Self(json!({
            "clientId": uuid::Uuid::new_v4().to_string(),
            "registered": false,
        }))
    }

    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

/// Directory-backed credential store.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn creds_path(&self) -> PathBuf {
        self.dir.join(CREDS_FILE)
    }

    /// Load persisted credentials, creating fresh ones if none exist.
    ///
    /// # Errors
    ///
    /// `AdapterError::CredentialLoad` if the file exists but cannot be read or
    /// parsed, or if fresh credentials cannot be written.
    pub async fn load_or_create(&self) -> AdapterResult<Credentials> {
        let path = self.creds_path();
        let load_err = |reason: String| AdapterError::CredentialLoad {
            path: path.clone(),
            reason,
        };

        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let value: Value =
                    serde_json::from_str(&content).map_err(|e| load_err(e.to_string()))?;
                debug!(path = %path.display(), "Loaded session credentials");
                Ok(Credentials(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let creds = Credentials::fresh();
                self.write(&creds).await.map_err(|e| load_err(e.to_string()))?;
                info!(path = %path.display(), "No session credentials found, created fresh ones");
                Ok(creds)
            }
            Err(e) => Err(load_err(e.to_string())),
        }
    }

    /// Persist credentials handed over by the protocol library.
    pub async fn save(&self, creds: &Credentials) -> AdapterResult<()> {
        self.write(creds)
            .await
            .map_err(|e| AdapterError::CredentialSave {
                path: self.creds_path(),
                reason: e.to_string(),
            })?;
        debug!(path = %self.creds_path().display(), "Saved session credentials");
        Ok(())
    }

    async fn write(&self, creds: &Credentials) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let body = serde_json::to_vec_pretty(&creds.0)?;

        // Write then rename so a crash never leaves a truncated file behind.
        let tmp = self.dir.join(format!("{CREDS_FILE}.tmp"));
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, self.creds_path()).await
    }
}

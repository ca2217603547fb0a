// ABOUTME: Explicit open/close lifecycle for the process-wide store handle.
// ABOUTME: open() migrates once and caches the handle; a failed open caches nothing.

use std::fmt;
use std::path::PathBuf;

use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::worker::StoreHandle;

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    /// A private database that disappears when the store closes.
    Memory,
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreLocation::File(path) => write!(f, "{}", path.display()),
            StoreLocation::Memory => f.write_str(":memory:"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub location: StoreLocation,
    /// Stamped on every event written through this database.
    pub device_id: Option<String>,
}

impl DatabaseConfig {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: StoreLocation::File(path.into()),
            device_id: None,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            location: StoreLocation::Memory,
            device_id: None,
        }
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }
}

/// Owner of the store handle. Construct one per process (or per test) and
/// pass the handle it opens to whatever needs storage.
pub struct Database {
    config: DatabaseConfig,
    handle: Mutex<Option<StoreHandle>>,
}

impl Database {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            handle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Open the store, running any pending migrations. Repeated calls return
    /// the cached handle. An error here means the schema could not be made
    /// current and the store must not be used.
    pub async fn open(&self) -> Result<StoreHandle, StoreError> {
        let mut cached = self.handle.lock().await;
        if let Some(handle) = cached.as_ref() {
            return Ok(handle.clone());
        }

        if let StoreLocation::File(path) = &self.config.location {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let handle = StoreHandle::spawn(self.config.location.clone(), self.config.device_id.clone())
            .await
            .inspect_err(|err| {
                tracing::error!(location = %self.config.location, error = %err, "failed to open database");
            })?;
        tracing::info!(location = %self.config.location, "database ready");

        *cached = Some(handle.clone());
        Ok(handle)
    }

    pub async fn is_open(&self) -> bool {
        self.handle.lock().await.is_some()
    }

    /// Close the cached handle. Handles already given out start returning
    /// [`StoreError::Closed`]. A later [`Database::open`] opens afresh.
    pub async fn close(&self) -> Result<(), StoreError> {
        let handle = self.handle.lock().await.take();
        match handle {
            Some(handle) => handle.close().await,
            None => Ok(()),
        }
    }
}

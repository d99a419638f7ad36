//! Session Storage
//!
//! Persisted credential state. Implementations are written to only by the
//! refresh coordinator; everything else reads.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::{PipelineError, StorageError};
use crate::types::Session;

/// Session storage interface.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Current session, if any.
    async fn get(&self) -> Result<Option<Session>, PipelineError>;

    /// Replace the current session.
    async fn set(&self, session: Session) -> Result<(), PipelineError>;

    /// Remove the current session.
    async fn clear(&self) -> Result<(), PipelineError>;
}

/// In-memory session storage.
#[derive(Default)]
pub struct InMemorySessionStore {
    session: Mutex<Option<Session>>,
}

impl InMemorySessionStore {
    /// Create empty in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create storage pre-populated with a session.
    pub fn with_session(session: Session) -> Self {
        Self {
            session: Mutex::new(Some(session)),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self) -> Result<Option<Session>, PipelineError> {
        Ok(self.slot().clone())
    }

    async fn set(&self, session: Session) -> Result<(), PipelineError> {
        *self.slot() = Some(session);
        Ok(())
    }

    async fn clear(&self) -> Result<(), PipelineError> {
        *self.slot() = None;
        Ok(())
    }
}

/// JSON file-backed session storage.
///
/// Writes go to a sibling temp file which is then renamed over the target, so
/// a reader never observes a half-written session.
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    /// Create storage at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get(&self) -> Result<Option<Session>, PipelineError> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::ReadFailed {
                    message: e.to_string(),
                }
                .into())
            }
        };

        let session = serde_json::from_slice(&contents).map_err(|e| {
            StorageError::CorruptedData {
                message: e.to_string(),
            }
        })?;

        Ok(Some(session))
    }

    async fn set(&self, session: Session) -> Result<(), PipelineError> {
        let contents = serde_json::to_vec(&session).map_err(|e| StorageError::WriteFailed {
            message: e.to_string(),
        })?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    StorageError::WriteFailed {
                        message: e.to_string(),
                    }
                })?;
            }
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, contents)
            .await
            .map_err(|e| StorageError::WriteFailed {
                message: e.to_string(),
            })?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| StorageError::WriteFailed {
                message: e.to_string(),
            })?;

        Ok(())
    }

    async fn clear(&self) -> Result<(), PipelineError> {
        // An interrupted write can leave the temp file behind with live tokens.
        remove_if_present(&self.temp_path()).await?;
        remove_if_present(&self.path).await
    }
}

async fn remove_if_present(path: &std::path::Path) -> Result<(), PipelineError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::WriteFailed {
            message: e.to_string(),
        }
        .into()),
    }
}

/// Recorded write against a [`MockSessionStore`].
#[derive(Clone, Debug)]
pub enum SessionWrite {
    Set(Session),
    Clear,
}

/// Mock session storage for testing.
#[derive(Default)]
pub struct MockSessionStore {
    session: Mutex<Option<Session>>,
    write_history: Mutex<Vec<SessionWrite>>,
    should_fail: Mutex<bool>,
}

impl MockSessionStore {
    /// Create new mock session storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate the session without recording a write.
    pub fn add_session(&self, session: Session) -> &Self {
        *self.session.lock().unwrap() = Some(session);
        self
    }

    /// Set storage to fail all operations.
    pub fn set_should_fail(&self, should_fail: bool) -> &Self {
        *self.should_fail.lock().unwrap() = should_fail;
        self
    }

    /// Get write history.
    pub fn get_write_history(&self) -> Vec<SessionWrite> {
        self.write_history.lock().unwrap().clone()
    }

    /// Current session without going through the async interface.
    pub fn current(&self) -> Option<Session> {
        self.session.lock().unwrap().clone()
    }

    fn check_error(&self) -> Result<(), PipelineError> {
        if *self.should_fail.lock().unwrap() {
            return Err(StorageError::WriteFailed {
                message: "Mock storage failure".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MockSessionStore {
    async fn get(&self) -> Result<Option<Session>, PipelineError> {
        self.check_error()?;
        Ok(self.session.lock().unwrap().clone())
    }

    async fn set(&self, session: Session) -> Result<(), PipelineError> {
        self.check_error()?;
        self.write_history
            .lock()
            .unwrap()
            .push(SessionWrite::Set(session.clone()));
        *self.session.lock().unwrap() = Some(session);
        Ok(())
    }

    async fn clear(&self) -> Result<(), PipelineError> {
        self.check_error()?;
        self.write_history.lock().unwrap().push(SessionWrite::Clear);
        *self.session.lock().unwrap() = None;
        Ok(())
    }
}

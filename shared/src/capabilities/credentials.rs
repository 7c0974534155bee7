use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument, warn};

use super::CredentialStore;
use crate::crypto::{build_aad, OsRng, RandomProvider, Sealer};
use crate::error::ServiceError;
use crate::model::{Session, User};

const STORE_NAME: &str = "session";
const CURRENT_SCHEMA_VERSION: u32 = 1;

// =============================================================================
// In-memory
// =============================================================================

/// Session held for the life of the process only.
#[derive(Default)]
pub struct MemoryCredentialStore {
    session: RwLock<Option<Session>>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_session(session: Session) -> Self {
        Self {
            session: RwLock::new(Some(session)),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<Option<Session>, ServiceError> {
        Ok(self.session.read().await.clone())
    }

    async fn save(&self, session: &Session) -> Result<(), ServiceError> {
        *self.session.write().await = Some(session.clone());
        Ok(())
    }

    async fn update_user(&self, user: &User) -> Result<(), ServiceError> {
        if let Some(session) = self.session.write().await.as_mut() {
            session.user = user.clone();
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), ServiceError> {
        *self.session.write().await = None;
        Ok(())
    }
}

// =============================================================================
// Sealed file
// =============================================================================

#[derive(Serialize, Deserialize)]
struct StoredSession {
    schema_version: u32,
    session: Session,
}

/// Session sealed to disk under a device key.
///
/// Anything that fails to open (tampered, foreign key, truncated, future
/// schema) reads as "no session" so the user is simply asked to log in.
pub struct SealedFileCredentialStore<R: RandomProvider = OsRng> {
    path: PathBuf,
    sealer: Sealer<R>,
    // Serializes read-modify-write in `update_user` against `save`/`clear`.
    write_lock: Mutex<()>,
}

impl<R: RandomProvider> SealedFileCredentialStore<R> {
    pub fn new(path: impl Into<PathBuf>, sealer: Sealer<R>) -> Self {
        Self {
            path: path.into(),
            sealer,
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn aad(&self) -> Result<Vec<u8>, ServiceError> {
        build_aad(STORE_NAME, CURRENT_SCHEMA_VERSION).map_err(|e| ServiceError::Storage(e.to_string()))
    }

    fn encode(&self, session: &Session) -> Result<Vec<u8>, ServiceError> {
        let stored = StoredSession {
            schema_version: CURRENT_SCHEMA_VERSION,
            session: session.clone(),
        };
        let mut plain = Vec::new();
        ciborium::into_writer(&stored, &mut plain).map_err(|e| ServiceError::Storage(e.to_string()))?;
        let sealed = self.sealer.seal(&plain, &self.aad()?);
        zeroize::Zeroize::zeroize(&mut plain);
        sealed.map_err(|e| ServiceError::Storage(e.to_string()))
    }

    fn decode(&self, sealed: &[u8]) -> Option<Session> {
        let aad = self.aad().ok()?;
        let mut plain = match self.sealer.open(sealed, &aad) {
            Ok(plain) => plain,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "stored session rejected");
                return None;
            }
        };
        let stored: Result<StoredSession, _> = ciborium::from_reader(&plain[..]);
        zeroize::Zeroize::zeroize(&mut plain);

        match stored {
            Ok(stored) if stored.schema_version == CURRENT_SCHEMA_VERSION => Some(stored.session),
            Ok(stored) => {
                warn!(found = stored.schema_version, "stored session has unknown schema");
                None
            }
            Err(e) => {
                warn!(error = %e, "stored session undecodable");
                None
            }
        }
    }

    async fn read(&self) -> Result<Option<Session>, ServiceError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => Ok(self.decode(&bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, session: &Session) -> Result<(), ServiceError> {
        let sealed = self.encode(session)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = self.path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &sealed).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        debug!(path = %self.path.display(), bytes = sealed.len(), "session persisted");
        Ok(())
    }
}

#[async_trait]
impl<R: RandomProvider + 'static> CredentialStore for SealedFileCredentialStore<R> {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn load(&self) -> Result<Option<Session>, ServiceError> {
        self.read().await
    }

    #[instrument(skip_all, fields(path = %self.path.display()))]
    async fn save(&self, session: &Session) -> Result<(), ServiceError> {
        let _guard = self.write_lock.lock().await;
        self.write(session).await
    }

    #[instrument(skip_all, fields(path = %self.path.display()))]
    async fn update_user(&self, user: &User) -> Result<(), ServiceError> {
        let _guard = self.write_lock.lock().await;
        match self.read().await? {
            Some(mut session) => {
                session.user = user.clone();
                self.write(&session).await
            }
            None => Ok(()),
        }
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn clear(&self) -> Result<(), ServiceError> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

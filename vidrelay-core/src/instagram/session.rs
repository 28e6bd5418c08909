use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("session serialization failed: {0}")]
    Serialization(String),
    #[error("no credentials available to log in as {username}")]
    MissingCredentials { username: String },
    #[error("login failed: {0}")]
    Login(String),
}

impl From<serde_json::Error> for SessionError {
    fn from(error: serde_json::Error) -> Self {
        SessionError::Serialization(error.to_string())
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Authenticated cookie set for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstagramSession {
    pub username: String,
    pub cookies: BTreeMap<String, String>,
    pub csrf_token: Option<String>,
    pub saved_at: DateTime<Utc>,
}

impl InstagramSession {
    pub fn new(username: impl Into<String>, cookies: BTreeMap<String, String>) -> Self {
        let csrf_token = cookies.get("csrftoken").cloned();
        Self {
            username: username.into(),
            cookies,
            csrf_token,
            saved_at: Utc::now(),
        }
    }

    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, username: &str) -> SessionResult<Option<InstagramSession>>;
    async fn save(&self, session: &InstagramSession) -> SessionResult<()>;
    async fn invalidate(&self, username: &str) -> SessionResult<()>;
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> SessionResult<InstagramSession>;
}

/// One JSON file per account under `dir`.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, username: &str) -> PathBuf {
        let safe: String = username
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, username: &str) -> SessionResult<Option<InstagramSession>> {
        let path = self.path_for(username);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(SessionError::Io { source, path }),
        };
        match serde_json::from_slice::<InstagramSession>(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ignoring unreadable session file");
                Ok(None)
            }
        }
    }

    async fn save(&self, session: &InstagramSession) -> SessionResult<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| SessionError::Io {
                source,
                path: self.dir.clone(),
            })?;
        let path = self.path_for(&session.username);
        let payload = serde_json::to_vec_pretty(session)?;
        write_atomic(&path, &payload).await
    }

    async fn invalidate(&self, username: &str) -> SessionResult<()> {
        let path = self.path_for(username);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SessionError::Io { source, path }),
        }
    }
}

async fn write_atomic(path: &Path, payload: &[u8]) -> SessionResult<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, payload)
        .await
        .map_err(|source| SessionError::Io {
            source,
            path: tmp.clone(),
        })?;
    fs::rename(&tmp, path)
        .await
        .map_err(|source| SessionError::Io {
            source,
            path: path.to_path_buf(),
        })
}

/// Process-wide holder of the current session.
///
/// Readers clone the `Arc` they were handed and keep it for the rest of their
/// request. Refreshes are serialized: a caller that lost the race gets the
/// session the winner installed instead of logging in again.
pub struct SessionManager {
    username: String,
    password: Option<String>,
    store: Arc<dyn SessionStore>,
    authenticator: Option<Arc<dyn Authenticator>>,
    current: RwLock<Option<Arc<InstagramSession>>>,
    refresh_lock: Mutex<()>,
}

impl SessionManager {
    pub fn new(
        username: impl Into<String>,
        password: Option<String>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            username: username.into(),
            password,
            store,
            authenticator: None,
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Current session, loading the persisted one on first use.
    pub async fn current(&self) -> SessionResult<Option<Arc<InstagramSession>>> {
        if let Some(session) = self.current.read().await.as_ref() {
            return Ok(Some(Arc::clone(session)));
        }
        let _guard = self.refresh_lock.lock().await;
        if let Some(session) = self.current.read().await.as_ref() {
            return Ok(Some(Arc::clone(session)));
        }
        let loaded = self.store.load(&self.username).await?.map(Arc::new);
        if loaded.is_some() {
            *self.current.write().await = loaded.clone();
        }
        Ok(loaded)
    }

    /// Replaces `stale` with a fresh login. Returns whatever is current when
    /// another caller already swapped it out.
    pub async fn refresh(
        &self,
        stale: Option<&Arc<InstagramSession>>,
    ) -> SessionResult<Arc<InstagramSession>> {
        let _guard = self.refresh_lock.lock().await;
        if let Some(current) = self.current.read().await.as_ref() {
            let replaced = match stale {
                Some(stale) => !Arc::ptr_eq(current, stale),
                None => true,
            };
            if replaced {
                return Ok(Arc::clone(current));
            }
        }

        let (Some(authenticator), Some(password)) = (&self.authenticator, &self.password) else {
            return Err(SessionError::MissingCredentials {
                username: self.username.clone(),
            });
        };
        self.store.invalidate(&self.username).await?;
        let session = Arc::new(authenticator.login(&self.username, password).await?);
        self.store.save(&session).await?;
        *self.current.write().await = Some(Arc::clone(&session));
        info!(username = %self.username, "instagram session refreshed");
        Ok(session)
    }
}

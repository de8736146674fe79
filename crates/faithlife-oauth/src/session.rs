//! Session capability the flow reads and writes between redirects.
//!
//! The flow never owns session storage. Hosts hand it something that
//! implements [`FlowSession`]; [`MemorySessionStore`] plus
//! [`session_middleware`] is the bundled in-process option.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderValue, header, request::Parts},
    middleware::Next,
    response::Response,
};
use tokio::sync::{Mutex, RwLock};

use crate::error::{OAuthError, Result};
use crate::router::request_scheme;

/// Session key holding the temporary secret, later the access secret.
pub const OAUTH_TOKEN_SECRET: &str = "oauth_token_secret";

/// Session key holding the access token.
pub const OAUTH_TOKEN: &str = "oauth_token";

/// Session key holding the URL to return to after `verify`.
pub const ORIGINAL_URL: &str = "original_url";

/// Cookie carrying the in-memory session id.
pub const SESSION_COOKIE: &str = "faithlife_session";

// ============================================================================
// FlowSession Trait
// ============================================================================

/// Per-user key/value storage that survives across requests.
#[async_trait]
pub trait FlowSession: Send + Sync + std::fmt::Debug {
    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value.
    async fn set(&self, key: &str, value: String) -> Result<()>;

    /// Remove a value.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Read and remove a value.
    ///
    /// Stores shared between concurrent requests must make this atomic:
    /// `verify` relies on it so that only one caller consumes a temporary
    /// secret.
    async fn take(&self, key: &str) -> Result<Option<String>> {
        let value = self.get(key).await?;
        if value.is_some() {
            self.delete(key).await?;
        }
        Ok(value)
    }
}

/// The subset of session data the flow cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowSessionState {
    pub oauth_token_secret: Option<String>,
    pub oauth_token: Option<String>,
    pub original_url: Option<String>,
}

impl FlowSessionState {
    /// Snapshot the flow keys of a session.
    pub async fn load(session: &dyn FlowSession) -> Result<Self> {
        Ok(Self {
            oauth_token_secret: session.get(OAUTH_TOKEN_SECRET).await?,
            oauth_token: session.get(OAUTH_TOKEN).await?,
            original_url: session.get(ORIGINAL_URL).await?,
        })
    }

    /// Whether the session holds an access token pair.
    pub fn is_authenticated(&self) -> bool {
        self.oauth_token.is_some() && self.oauth_token_secret.is_some()
    }
}

// ============================================================================
// MemorySession
// ============================================================================

/// In-process session. All operations hold one lock, so `take` is atomic.
#[derive(Debug, Default)]
pub struct MemorySession {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored value.
    pub async fn snapshot(&self) -> HashMap<String, String> {
        self.values.lock().await.clone()
    }
}

#[async_trait]
impl FlowSession for MemorySession {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.values.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.lock().await.remove(key);
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().await.remove(key))
    }
}

/// Shared handle to a session, installed in request extensions.
#[derive(Debug, Clone)]
pub struct SessionHandle(pub Arc<dyn FlowSession>);

impl SessionHandle {
    pub fn new(session: Arc<dyn FlowSession>) -> Self {
        Self(session)
    }

    pub fn session(&self) -> &dyn FlowSession {
        self.0.as_ref()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for SessionHandle {
    type Rejection = OAuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts.extensions.get::<SessionHandle>().cloned().ok_or_else(|| {
            OAuthError::Config(
                "Missing session middleware. Install a session layer before the OAuth routes."
                    .to_string(),
            )
        })
    }
}

// ============================================================================
// MemorySessionStore
// ============================================================================

/// Sessions kept before idle ones are evicted to make room.
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

/// How long a session may go unused before it can be evicted.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug)]
struct StoredSession {
    session: Arc<MemorySession>,
    last_seen: Instant,
}

/// Cookie-keyed collection of [`MemorySession`]s.
///
/// Bounded: once `max_sessions` is reached, sessions idle for longer than
/// `idle_timeout` are evicted, and creation fails if none are.
#[derive(Debug, Clone)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, StoredSession>>>,
    max_sessions: usize,
    idle_timeout: Duration,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::with_limits(DEFAULT_MAX_SESSIONS, DEFAULT_IDLE_TIMEOUT)
    }
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(max_sessions: usize, idle_timeout: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            max_sessions,
            idle_timeout,
        }
    }

    /// Look up a session by id, marking it as used.
    pub async fn get(&self, id: &str) -> Option<Arc<MemorySession>> {
        let mut sessions = self.sessions.write().await;
        let stored = sessions.get_mut(id)?;
        stored.last_seen = Instant::now();
        Some(stored.session.clone())
    }

    /// Create a fresh session and return its id.
    pub async fn create(&self) -> Result<(String, Arc<MemorySession>)> {
        let mut sessions = self.sessions.write().await;

        if sessions.len() >= self.max_sessions {
            let before = sessions.len();
            let idle_timeout = self.idle_timeout;
            sessions.retain(|_, stored| stored.last_seen.elapsed() < idle_timeout);
            tracing::debug!(evicted = before - sessions.len(), "Evicted idle sessions");
        }
        if sessions.len() >= self.max_sessions {
            tracing::warn!(max_sessions = self.max_sessions, "Session store is full");
            return Err(OAuthError::Session(format!(
                "session store is full ({} sessions)",
                self.max_sessions
            )));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(MemorySession::new());
        sessions.insert(
            id.clone(),
            StoredSession {
                session: session.clone(),
                last_seen: Instant::now(),
            },
        );
        Ok((id, session))
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// A request's view of the store. The backing session is created on the
/// first write, so requests that only read never allocate one.
#[derive(Debug)]
struct LazySession {
    store: MemorySessionStore,
    slot: Mutex<LazySlot>,
}

#[derive(Debug, Default)]
struct LazySlot {
    session: Option<Arc<MemorySession>>,
    issued_id: Option<String>,
}

impl LazySession {
    fn new(store: MemorySessionStore, existing: Option<Arc<MemorySession>>) -> Self {
        Self {
            store,
            slot: Mutex::new(LazySlot {
                session: existing,
                issued_id: None,
            }),
        }
    }

    async fn current(&self) -> Option<Arc<MemorySession>> {
        self.slot.lock().await.session.clone()
    }

    /// Id of the session created during this request, if any.
    async fn issued_id(&self) -> Option<String> {
        self.slot.lock().await.issued_id.clone()
    }
}

#[async_trait]
impl FlowSession for LazySession {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.current().await {
            Some(session) => session.get(key).await,
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let session = {
            let mut slot = self.slot.lock().await;
            match slot.session.clone() {
                Some(session) => session,
                None => {
                    let (id, session) = self.store.create().await?;
                    tracing::debug!(session_id = %id, "Created session");
                    slot.issued_id = Some(id);
                    slot.session = Some(session.clone());
                    session
                }
            }
        };
        session.set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self.current().await {
            Some(session) => session.delete(key).await,
            None => Ok(()),
        }
    }

    async fn take(&self, key: &str) -> Result<Option<String>> {
        match self.current().await {
            Some(session) => session.take(key).await,
            None => Ok(None),
        }
    }
}

/// Middleware that attaches a [`SessionHandle`] to every request.
///
/// A session is only created once a handler writes to it; the response then
/// carries a `Set-Cookie` header, marked `Secure` behind an HTTPS proxy.
pub async fn session_middleware(
    State(store): State<MemorySessionStore>,
    mut request: Request,
    next: Next,
) -> Response {
    let secure = request_scheme(request.headers()) == "https";
    let existing = match session_id_from_cookie(request.headers()) {
        Some(id) => store.get(&id).await,
        None => None,
    };

    let session = Arc::new(LazySession::new(store, existing));
    request
        .extensions_mut()
        .insert(SessionHandle::new(session.clone()));

    let mut response = next.run(request).await;

    if let Some(id) = session.issued_id().await {
        let mut cookie = format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, id);
        if secure {
            cookie.push_str("; Secure");
        }
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => tracing::warn!(error = %e, "Failed to build session cookie"),
        }
    }

    response
}

/// Extract the session id from a `Cookie` header.
pub fn session_id_from_cookie(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

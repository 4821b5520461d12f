//! Per-user session state.
//!
//! A session carries what one console user has in play: their model API
//! credential, the model list fetched with it, and the last query with
//! its retrieval result (analysis runs against that cached result). The
//! CLI builds one [`SessionContext`] per invocation; the server keeps
//! them in a [`SessionStore`] keyed by id. Stored sessions expire after an
//! idle period and the store never holds more than its cap.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::context::ExpertContext;
use crate::models::Direction;

#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub id: Uuid,
    api_key: Option<String>,
    models: Option<Vec<String>>,
    pub last_query: Option<String>,
    pub last_result: Option<ExpertContext>,
    pub direction: Direction,
}

impl SessionContext {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            ..Default::default()
        }
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    /// Replace the credential. The cached model list belonged to the old
    /// key and is dropped.
    pub fn set_api_key(&mut self, api_key: Option<String>) {
        self.api_key = api_key.filter(|k| !k.trim().is_empty());
        self.models = None;
    }

    pub fn cached_models(&self) -> Option<&[String]> {
        self.models.as_deref()
    }

    pub fn cache_models(&mut self, models: Vec<String>) {
        self.models = Some(models);
    }

    pub fn record_query(&mut self, query: &str, direction: Direction, result: ExpertContext) {
        self.last_query = Some(query.to_string());
        self.direction = direction;
        self.last_result = Some(result);
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            has_credential: self.api_key.is_some(),
            last_query: self.last_query.clone(),
            direction: self.direction,
        }
    }
}

/// What the API reports about a session; never includes the key.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub has_credential: bool,
    pub last_query: Option<String>,
    pub direction: Direction,
}

struct Entry {
    session: SessionContext,
    last_seen: Instant,
}

#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<Uuid, Entry>>>,
    idle_ttl: Duration,
    max_sessions: usize,
}

impl SessionStore {
    pub fn new(idle_ttl: Duration, max_sessions: usize) -> Self {
        Self {
            inner: Arc::default(),
            idle_ttl,
            max_sessions: max_sessions.max(1),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(
            Duration::from_secs(config.session_idle_secs),
            config.max_sessions,
        )
    }

    fn expired(&self, entry: &Entry, now: Instant) -> bool {
        now.duration_since(entry.last_seen) >= self.idle_ttl
    }

    /// Insert a new session. Expired sessions are pruned first; if the
    /// store is still full the least recently used one is evicted.
    pub async fn create(&self, api_key: Option<String>) -> SessionSummary {
        let session = SessionContext::new(api_key);
        let summary = session.summary();
        let now = Instant::now();

        let mut sessions = self.inner.write().await;
        sessions.retain(|_, entry| !self.expired(entry, now));
        while sessions.len() >= self.max_sessions {
            let Some(oldest) = sessions
                .iter()
                .min_by_key(|(_, entry)| entry.last_seen)
                .map(|(id, _)| *id)
            else {
                break;
            };
            sessions.remove(&oldest);
            tracing::debug!(session = %oldest, "evicted least recently used session");
        }
        sessions.insert(
            session.id,
            Entry {
                session,
                last_seen: now,
            },
        );
        summary
    }

    /// The live session for `id`, marked as used. An expired session is
    /// removed and reported as missing.
    fn touch<'a>(
        &self,
        sessions: &'a mut HashMap<Uuid, Entry>,
        id: Uuid,
    ) -> Option<&'a mut SessionContext> {
        let now = Instant::now();
        if sessions.get(&id).is_some_and(|entry| self.expired(entry, now)) {
            sessions.remove(&id);
            return None;
        }
        let entry = sessions.get_mut(&id)?;
        entry.last_seen = now;
        Some(&mut entry.session)
    }

    pub async fn get(&self, id: Uuid) -> Option<SessionContext> {
        let mut sessions = self.inner.write().await;
        self.touch(&mut sessions, id).cloned()
    }

    /// Apply `f` to the session, returning its result, or `None` if no
    /// such session exists.
    pub async fn update<T>(&self, id: Uuid, f: impl FnOnce(&mut SessionContext) -> T) -> Option<T> {
        let mut sessions = self.inner.write().await;
        self.touch(&mut sessions, id).map(f)
    }

    /// End a session. Returns false if it did not exist.
    pub async fn remove(&self, id: Uuid) -> bool {
        self.inner.write().await.remove(&id).is_some()
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .read()
            .await
            .values()
            .filter(|entry| !self.expired(entry, now))
            .count()
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use quarry_runtime::SuspendedSession;

pub const DEFAULT_CONTINUATION_TTL_SECS: i64 = 3600;
pub const DEFAULT_MAX_PENDING: usize = 1000;

/// A finished session the user may ask to continue
pub struct PendingSession {
    pub user_id: String,
    pub suspended: SuspendedSession,
    pub created_at: DateTime<Utc>,
}

/// Registry of resumable sessions, keyed by continuation id.
///
/// A continuation can be taken once; continuing it again requires the new id
/// returned by the continued run.
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, PendingSession>>>,
    ttl: Duration,
    max_pending: usize,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(DEFAULT_CONTINUATION_TTL_SECS, DEFAULT_MAX_PENDING)
    }
}

impl SessionManager {
    pub fn new(ttl_secs: i64, max_pending: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl: Duration::try_seconds(ttl_secs).unwrap_or(Duration::MAX),
            max_pending: max_pending.max(1),
        }
    }

    /// Store a suspended session, returns its continuation id
    pub async fn insert(&self, user_id: &str, suspended: SuspendedSession) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let mut sessions = self.sessions.write().await;

        if sessions.len() >= self.max_pending {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, s)| s.created_at)
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                debug!(continuation_id = %oldest, "Evicting oldest pending session");
                sessions.remove(&oldest);
            }
        }

        sessions.insert(
            id.clone(),
            PendingSession {
                user_id: user_id.to_string(),
                suspended,
                created_at: Utc::now(),
            },
        );
        id
    }

    /// Remove and return a pending session
    pub async fn take(&self, id: &str) -> Result<PendingSession> {
        let session = self
            .sessions
            .write()
            .await
            .remove(id)
            .ok_or_else(|| anyhow!("Continuation not found: {}", id))?;

        if Utc::now() - session.created_at > self.ttl {
            return Err(anyhow!("Continuation expired: {}", id));
        }
        Ok(session)
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Drop expired continuations (call periodically)
    pub async fn cleanup(&self) -> usize {
        let Some(cutoff) = Utc::now().checked_sub_signed(self.ttl) else {
            return 0;
        };
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.created_at >= cutoff);
        let removed = before - sessions.len();
        if removed > 0 {
            info!(removed, "Expired pending sessions removed");
        }
        removed
    }
}

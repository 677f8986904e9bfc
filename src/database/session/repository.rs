use anyhow::Context;
use tracing::warn;

use super::{CheckRecord, SessionRecord, SessionRepository};
use crate::database::DynKeyValueStore;

/// session repository on top of whatever key-value backend got picked at startup
pub struct KvSessionRepository {
    store: DynKeyValueStore,
}

impl KvSessionRepository {
    pub fn new(store: DynKeyValueStore) -> Self {
        Self { store }
    }

    fn session_key(session_key: &str) -> String {
        format!("sessionToken:{}", session_key)
    }

    fn check_key(token: &str) -> String {
        format!("lastCheckedTimestamp:{}", token)
    }
}

#[async_trait::async_trait]
impl SessionRepository for KvSessionRepository {
    async fn get_session(&self, session_key: &str) -> anyhow::Result<Option<SessionRecord>> {
        let Some(raw) = self.store.get(&Self::session_key(session_key)).await? else {
            return Ok(None);
        };

        // a record we can't read is as good as no record, it gets overwritten on renegotiation
        match serde_json::from_str::<SessionRecord>(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("unreadable session record for {}: {}", session_key, e);
                Ok(None)
            }
        }
    }

    async fn set_session(&self, session_key: &str, record: &SessionRecord) -> anyhow::Result<()> {
        let raw = serde_json::to_string(record).context("Failed to serialize session record")?;
        self.store.set(&Self::session_key(session_key), &raw).await
    }

    async fn get_check(&self, token: &str) -> anyhow::Result<Option<CheckRecord>> {
        let Some(raw) = self.store.get(&Self::check_key(token)).await? else {
            return Ok(None);
        };

        match raw.trim().parse::<i64>() {
            Ok(last_checked_at) => Ok(Some(CheckRecord {
                token: token.to_string(),
                last_checked_at,
            })),
            Err(e) => {
                warn!("unreadable check timestamp for {}: {}", token, e);
                Ok(None)
            }
        }
    }

    async fn set_check(&self, record: &CheckRecord) -> anyhow::Result<()> {
        self.store
            .set(
                &Self::check_key(&record.token),
                &record.last_checked_at.to_string(),
            )
            .await
    }
}

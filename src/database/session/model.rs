use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// a negotiated upstream session, stored under `sessionToken:<session key>`
///
/// timestamps are unix milliseconds so records written by older deployments still read back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub token: String,
    #[serde(rename = "timestamp")]
    pub issued_at: i64,
}

/// last time a token passed (or was forced to fail) the liveness check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRecord {
    pub token: String,
    pub last_checked_at: i64,
}

pub type DynSessionRepository = Arc<dyn SessionRepository + Send + Sync>;

#[async_trait::async_trait]
pub trait SessionRepository {
    async fn get_session(&self, session_key: &str) -> Result<Option<SessionRecord>>;
    async fn set_session(&self, session_key: &str, record: &SessionRecord) -> Result<()>;
    async fn get_check(&self, token: &str) -> Result<Option<CheckRecord>>;
    async fn set_check(&self, record: &CheckRecord) -> Result<()>;
}

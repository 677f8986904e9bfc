use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use mockall::automock;
use reqwest::header;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::database::session::{CheckRecord, DynSessionRepository, SessionRecord};
use crate::server::error::{AppResult, Error};

/// a negotiated token is reused for at most two hours
pub const SESSION_LIFETIME_MS: i64 = 2 * 60 * 60 * 1000;
/// and only while its last successful check is younger than this
pub const CHECK_FRESHNESS_MS: i64 = 30_000;
/// liveness checks closer together than this are skipped
pub const CHECK_THROTTLE_MS: i64 = 15_000;
/// leading path segments that make up the session key
const SESSION_KEY_SEGMENTS: usize = 5;

const SESSION_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:132.0) Gecko/20100101 Firefox/132.0";
const SESSION_REFERER: &str = "https://embedme.top/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    NoToken,
    /// cached token that can be handed out as is
    Valid(String),
    /// younger than the session lifetime but not checked recently enough
    StaleNeedsCheck,
    Expired,
}

/// first five `/` separated segments of the upstream path, so every rendition of a stream
/// shares one token
pub fn session_key(path: &str) -> String {
    path.split('/')
        .take(SESSION_KEY_SEGMENTS)
        .collect::<Vec<_>>()
        .join("/")
}

pub fn evaluate_session(
    record: Option<&SessionRecord>,
    last_check: Option<&CheckRecord>,
    now: i64,
) -> SessionState {
    let Some(record) = record else {
        return SessionState::NoToken;
    };

    if now - record.issued_at >= SESSION_LIFETIME_MS {
        return SessionState::Expired;
    }

    match last_check {
        Some(check) if now - check.last_checked_at < CHECK_FRESHNESS_MS => {
            SessionState::Valid(record.token.clone())
        }
        _ => SessionState::StaleNeedsCheck,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Alive,
    RateLimited,
    /// the upstream refused the token, the next request has to negotiate a new one
    Rejected,
}

pub type DynSessionClient = Arc<dyn SessionClientTrait + Send + Sync>;

#[automock]
#[async_trait::async_trait]
pub trait SessionClientTrait {
    /// asks the upstream for a new token bound to `path`
    async fn init_session(&self, path: &str) -> AppResult<String>;

    async fn check_token(&self, token: &str) -> AppResult<CheckOutcome>;
}

#[derive(Deserialize)]
struct InitSessionResponse {
    id: String,
}

pub struct HttpSessionClient {
    http: reqwest::Client,
    init_url: String,
    check_url: String,
    check_timeout: Duration,
}

impl HttpSessionClient {
    pub fn new(
        init_url: &str,
        check_url: &str,
        timeout: Duration,
        check_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build session http client")?;

        Ok(Self {
            http,
            init_url: init_url.to_string(),
            check_url: check_url.trim_end_matches('/').to_string(),
            check_timeout,
        })
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::USER_AGENT, SESSION_USER_AGENT)
            .header(header::REFERER, SESSION_REFERER)
    }
}

#[async_trait::async_trait]
impl SessionClientTrait for HttpSessionClient {
    async fn init_session(&self, path: &str) -> AppResult<String> {
        let body = json!({ "path": format!("/{}", path) });
        info!("Fetching new session token for path: /{}", path);

        let response = self
            .request(self.http.post(&self.init_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::SessionNegotiation(format!("Request failed: {}", e)))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(Error::SessionNegotiation(format!(
                "Failed to fetch session data: {}",
                status.as_u16()
            )));
        }

        let session = response
            .json::<InitSessionResponse>()
            .await
            .map_err(|e| Error::SessionNegotiation(format!("Unreadable session response: {}", e)))?;

        debug!("Fetched new session token: {}", session.id);
        Ok(session.id)
    }

    async fn check_token(&self, token: &str) -> AppResult<CheckOutcome> {
        let url = format!("{}/{}", self.check_url, token);

        let response = self
            .request(self.http.get(&url))
            .timeout(self.check_timeout)
            .send()
            .await
            .map_err(|e| Error::SessionNegotiation(format!("Token check failed: {}", e)))?;

        match response.status().as_u16() {
            200 => Ok(CheckOutcome::Alive),
            429 => Ok(CheckOutcome::RateLimited),
            400 => Ok(CheckOutcome::Rejected),
            status => Err(Error::SessionNegotiation(format!(
                "Failed to check token: {}",
                status
            ))),
        }
    }
}

/// hands out session tokens for the vendor that needs them and keeps them alive
pub struct SessionNegotiator {
    repository: DynSessionRepository,
    client: DynSessionClient,
    // one async lock per session key, so concurrent requests for the same stream negotiate once
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionNegotiator {
    pub fn new(repository: DynSessionRepository, client: DynSessionClient) -> Self {
        Self {
            repository,
            client,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(key.to_string()).or_default().clone()
    }

    /// drops the entry once nobody else holds a clone of it
    fn release_key_lock(&self, key: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        drop(lock);
        if locks
            .get(key)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(key);
        }
    }

    fn store_error(e: anyhow::Error) -> Error {
        Error::InternalServerErrorWithContext(format!("Session store failed: {}", e))
    }

    /// current state for a session key. Store read failures count as nothing cached
    pub async fn session_state(&self, key: &str, now: i64) -> SessionState {
        let record = match self.repository.get_session(key).await {
            Ok(record) => record,
            Err(e) => {
                warn!("Failed to read session for {}: {}", key, e);
                None
            }
        };

        let check = match &record {
            Some(record) => match self.repository.get_check(&record.token).await {
                Ok(check) => check,
                Err(e) => {
                    warn!("Failed to read check timestamp for {}: {}", record.token, e);
                    None
                }
            },
            None => None,
        };

        evaluate_session(record.as_ref(), check.as_ref(), now)
    }

    /// a usable token for `path`, negotiating a new one when the cached one is missing, old or
    /// hasn't been checked in a while
    pub async fn get_session_token(&self, path: &str) -> AppResult<String> {
        let key = session_key(path);
        let lock = self.key_lock(&key);

        let result = {
            let _guard = lock.lock().await;
            self.token_for_key(&key, path).await
        };

        self.release_key_lock(&key, lock);
        result
    }

    /// session keys that currently have someone holding or waiting on their lock
    pub fn locked_keys(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    async fn token_for_key(&self, key: &str, path: &str) -> AppResult<String> {
        let now = Self::now_ms();
        match self.session_state(key, now).await {
            SessionState::Valid(token) => {
                debug!("Using cached session token {} for {}", token, key);
                return Ok(token);
            }
            state => debug!("Session for {} is {:?}, creating a new token", key, state),
        }

        let token = self.client.init_session(path).await.inspect_err(|e| {
            error!("Session negotiation for {} failed: {}", key, e);
        })?;

        self.repository
            .set_session(
                key,
                &SessionRecord {
                    token: token.clone(),
                    issued_at: now,
                },
            )
            .await
            .map_err(Self::store_error)?;

        // fresh tokens count as checked
        self.repository
            .set_check(&CheckRecord {
                token: token.clone(),
                last_checked_at: now,
            })
            .await
            .map_err(Self::store_error)?;

        Ok(token)
    }

    /// asks the upstream whether `token` is still good and records the answer. `None` means the
    /// check was skipped because one ran very recently
    pub async fn check_liveness(&self, token: &str) -> AppResult<Option<CheckOutcome>> {
        let now = Self::now_ms();
        let last_check = self
            .repository
            .get_check(token)
            .await
            .map_err(Self::store_error)?;

        if let Some(check) = last_check {
            if now - check.last_checked_at < CHECK_THROTTLE_MS {
                debug!("Skipping liveness check for {}, checked recently", token);
                return Ok(None);
            }
        }

        debug!("Checking session token: {}", token);
        let outcome = self.client.check_token(token).await?;

        match outcome {
            CheckOutcome::Alive => {
                self.repository
                    .set_check(&CheckRecord {
                        token: token.to_string(),
                        last_checked_at: now,
                    })
                    .await
                    .map_err(Self::store_error)?;
            }
            CheckOutcome::RateLimited => warn!("Rate limit exceeded checking {}", token),
            CheckOutcome::Rejected => {
                warn!("Token {} rejected, forcing a new one", token);
                // back-dated so the next lookup sees it as stale and renegotiates
                self.repository
                    .set_check(&CheckRecord {
                        token: token.to_string(),
                        last_checked_at: now - CHECK_FRESHNESS_MS,
                    })
                    .await
                    .map_err(Self::store_error)?;
            }
        }

        Ok(Some(outcome))
    }

    /// runs [`Self::check_liveness`] in the background. Failures are only logged
    pub fn spawn_liveness_check(self: &Arc<Self>, token: String) {
        let negotiator = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = negotiator.check_liveness(&token).await {
                error!("Error in session token check for {}: {}", token, e);
            }
        });
    }
}

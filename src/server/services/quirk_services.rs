// per-upstream workarounds that have to run before the generic fetch. Each one says whether it
// cares about a url and can short-circuit the request with a redirect
use std::sync::Arc;

use tracing::debug;

use super::session_services::SessionNegotiator;
use crate::server::{error::AppResult, utils::manifest_utils::proxied_url};

const SESSION_MANIFEST: &str = "playlist.m3u8";
const MASTER_TYPE: &str = "&type=/index.m3u8";

/// what a quirk gets to look at
#[derive(Debug, Clone, Copy)]
pub struct QuirkRequest<'a> {
    pub target_url: &'a str,
    pub token: Option<&'a str>,
    pub proxy_origin: &'a str,
    /// `su=1` on the incoming request, the url already carries a session token
    pub session_stamped: bool,
    pub session_token: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuirkAction {
    Continue,
    /// answer with a 302 to this location instead of fetching
    Redirect(String),
}

pub type DynUpstreamQuirk = Arc<dyn UpstreamQuirk + Send + Sync>;

#[async_trait::async_trait]
pub trait UpstreamQuirk {
    fn name(&self) -> &'static str;

    fn matches(&self, url: &str) -> bool;

    async fn apply(&self, request: &QuirkRequest<'_>) -> AppResult<QuirkAction>;
}

/// first matching quirk wins, urls nobody matches go straight through
#[derive(Default)]
pub struct QuirkRegistry {
    quirks: Vec<DynUpstreamQuirk>,
}

impl QuirkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, quirk: DynUpstreamQuirk) {
        self.quirks.push(quirk);
    }

    pub fn len(&self) -> usize {
        self.quirks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quirks.is_empty()
    }

    pub async fn apply(&self, request: &QuirkRequest<'_>) -> AppResult<QuirkAction> {
        let Some(quirk) = self.quirks.iter().find(|q| q.matches(request.target_url)) else {
            return Ok(QuirkAction::Continue);
        };

        debug!("Applying {} quirk to {}", quirk.name(), request.target_url);
        quirk.apply(request).await
    }
}

/// the upstream only serves `playlist.m3u8` with a negotiated `?id=` on it. Unstamped requests
/// get redirected to a stamped url, stamped ones kick off a background liveness check
pub struct SessionStampQuirk {
    host: String,
    negotiator: Arc<SessionNegotiator>,
}

impl SessionStampQuirk {
    pub fn new(host: &str, negotiator: Arc<SessionNegotiator>) -> Self {
        Self {
            host: host.to_string(),
            negotiator,
        }
    }

    fn needs_stamp(url: &str) -> bool {
        url.contains(SESSION_MANIFEST) && !url.contains("&su=1") && !url.contains("?id=")
    }

    /// upstream path without the scheme and host
    pub fn upstream_path<'a>(&self, url: &'a str) -> &'a str {
        url.strip_prefix(&format!("https://{}/", self.host))
            .unwrap_or(url)
    }

    pub fn stamp(url: &str, token: &str) -> String {
        url.replacen(
            SESSION_MANIFEST,
            &format!("{}?id={}", SESSION_MANIFEST, token),
            1,
        )
    }

    pub fn redirect_location(request: &QuirkRequest<'_>, stamped_url: &str, token: &str) -> String {
        format!(
            "{}&su=1&suToken={}{}",
            proxied_url(request.proxy_origin, "url", stamped_url, request.token),
            urlencoding::encode(token),
            MASTER_TYPE
        )
    }
}

#[async_trait::async_trait]
impl UpstreamQuirk for SessionStampQuirk {
    fn name(&self) -> &'static str {
        "session-stamp"
    }

    fn matches(&self, url: &str) -> bool {
        url.contains(&self.host)
    }

    async fn apply(&self, request: &QuirkRequest<'_>) -> AppResult<QuirkAction> {
        let url = request.target_url;

        if Self::needs_stamp(url) {
            let token = self
                .negotiator
                .get_session_token(self.upstream_path(url))
                .await?;
            let stamped = Self::stamp(url, &token);
            return Ok(QuirkAction::Redirect(Self::redirect_location(
                request, &stamped, &token,
            )));
        }

        if request.session_stamped {
            if let Some(token) = request.session_token.filter(|t| !t.is_empty()) {
                self.negotiator.spawn_liveness_check(token.to_string());
            }
        }

        Ok(QuirkAction::Continue)
    }
}

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use mockall::automock;
use reqwest::header::{self, HeaderMap, HeaderValue};
use tracing::{debug, error, warn};

use crate::server::{
    error::{AppResult, Error},
    utils::header_codec::HeaderSet,
};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64)";

// browser-ish headers some key servers insist on
const KEY_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:134.0) Gecko/20100101 Firefox/134.0";
const KEY_ORIGIN: &str = "https://cookiedwebplay.xyz";
const KEY_REFERER: &str = "https://cookidwebplay.xyz/";

pub type DynContentFetcher = Arc<dyn ContentFetcherTrait + Send + Sync>;

/// text bodies are for manifests and playlists, binary for segments and keys. Only the accept
/// header differs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Text,
    Binary,
}

/// an upstream response with the body already decompressed
#[derive(Debug, Clone)]
pub struct FetchedContent {
    pub status: u16,
    /// where we ended up after redirects
    pub final_url: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl FetchedContent {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[automock]
#[async_trait::async_trait]
pub trait ContentFetcherTrait {
    /// GET with `headers` layered over the defaults. Any status comes back as `Ok`, only
    /// transport failures are errors
    async fn fetch(&self, url: &str, headers: &HeaderSet, mode: FetchMode)
    -> AppResult<FetchedContent>;

    /// GET with nothing but the defaults, for epg sources and `/fetch`
    async fn fetch_raw(&self, url: &str) -> AppResult<FetchedContent>;
}

pub struct ContentFetcher {
    http: reqwest::Client,
}

impl ContentFetcher {
    pub fn new(timeout: Duration, max_redirects: usize) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(max_redirects))
            .build()
            .context("Failed to build upstream http client")?;

        Ok(Self { http })
    }

    /// caller headers plus the defaults. A caller `User-Agent` stays, accept headers are always ours
    pub fn request_headers(headers: &HeaderSet, mode: FetchMode) -> HeaderMap {
        let mut map = headers.to_header_map();

        if !map.contains_key(header::USER_AGENT) {
            map.insert(
                header::USER_AGENT,
                HeaderValue::from_static(DEFAULT_USER_AGENT),
            );
        }

        let accept = match mode {
            FetchMode::Text => "text/plain;charset=UTF-8, */*",
            FetchMode::Binary => "*/*",
        };
        map.insert(header::ACCEPT, HeaderValue::from_static(accept));
        // we decompress ourselves, so only ask for what flate2 can undo
        map.insert(
            header::ACCEPT_ENCODING,
            HeaderValue::from_static("gzip, deflate"),
        );
        map
    }

    /// gzip and deflate are undone, anything else is passed through as is. An empty body stays
    /// empty whatever the header says (204, 304 and plenty of error pages)
    pub fn decompress(content_encoding: Option<&str>, bytes: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut decompressed = Vec::new();
        if bytes.is_empty() {
            return Ok(decompressed);
        }
        match content_encoding.map(|e| e.trim().to_ascii_lowercase()).as_deref() {
            Some(e) if e.contains("gzip") => {
                GzDecoder::new(bytes).read_to_end(&mut decompressed)?;
            }
            Some(e) if e.contains("deflate") => {
                // "deflate" is supposed to be zlib wrapped, plenty of servers send it raw anyway
                if ZlibDecoder::new(bytes)
                    .read_to_end(&mut decompressed)
                    .is_err()
                {
                    decompressed.clear();
                    DeflateDecoder::new(bytes).read_to_end(&mut decompressed)?;
                }
            }
            _ => decompressed.extend_from_slice(bytes),
        }
        Ok(decompressed)
    }

    fn transport_error(url: &str, e: &reqwest::Error) -> Error {
        let reason = if e.is_timeout() {
            "Request timed out".to_string()
        } else if e.is_redirect() {
            "Too many redirects".to_string()
        } else {
            format!("Request failed: {}", e)
        };
        error!("Error fetching content from {}: {}", url, reason);
        Error::UpstreamFetch {
            url: url.to_string(),
            reason,
        }
    }

    async fn get(&self, url: &str, headers: HeaderMap) -> AppResult<FetchedContent> {
        let parsed = url::Url::parse(url).map_err(|e| Error::UpstreamFetch {
            url: url.to_string(),
            reason: format!("Invalid URL: {}", e),
        })?;

        let response = self
            .http
            .get(parsed)
            .headers(headers)
            .send()
            .await
            .map_err(|e| Self::transport_error(url, &e))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let response_headers = response.headers().clone();
        let content_encoding = response_headers
            .get(header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Self::transport_error(url, &e))?;

        let body = match Self::decompress(content_encoding.as_deref(), &bytes) {
            Ok(body) => body,
            // error replies keep their raw body, only the status is passed on
            Err(e) if status >= 400 => {
                warn!(
                    "Keeping undecodable {:?} body of {} from {}: {}",
                    content_encoding, status, url, e
                );
                bytes.to_vec()
            }
            Err(e) => {
                error!("Failed to decompress {:?} body from {}: {}", content_encoding, url, e);
                return Err(Error::UpstreamFetch {
                    url: url.to_string(),
                    reason: "Failed to decompress response".to_string(),
                });
            }
        };

        debug!(
            "Fetched {} ({}), {} bytes after decompression",
            final_url,
            status,
            body.len()
        );

        Ok(FetchedContent {
            status,
            final_url,
            headers: response_headers,
            body,
        })
    }
}

#[async_trait::async_trait]
impl ContentFetcherTrait for ContentFetcher {
    async fn fetch(
        &self,
        url: &str,
        headers: &HeaderSet,
        mode: FetchMode,
    ) -> AppResult<FetchedContent> {
        debug!("Fetching {:?} content from {}", mode, url);
        self.get(url, Self::request_headers(headers, mode)).await
    }

    async fn fetch_raw(&self, url: &str) -> AppResult<FetchedContent> {
        self.get(url, Self::request_headers(&HeaderSet::new(), FetchMode::Text))
            .await
    }
}

/// headers for an encryption key request. The caller's own headers go last so they win
pub fn key_request_headers(caller: &HeaderSet) -> HeaderSet {
    let mut headers: HeaderSet = [
        ("User-Agent", KEY_USER_AGENT),
        ("Accept", "*/*"),
        ("Accept-Language", "en-US,en;q=0.5"),
        ("Origin", KEY_ORIGIN),
        ("Referer", KEY_REFERER),
        ("Sec-Fetch-Dest", "empty"),
        ("Sec-Fetch-Mode", "cors"),
        ("Sec-Fetch-Site", "cross-site"),
    ]
    .into_iter()
    .collect();

    headers.extend(caller);
    headers
}

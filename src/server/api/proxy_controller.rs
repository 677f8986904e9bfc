// the generic endpoint players talk to. `url` is a manifest that gets rewritten, `url2` a segment
// that is passed through, `key=true` an encryption key
use axum::{
    Router,
    extract::Query,
    http::{HeaderMap, HeaderValue, StatusCode, Uri, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use tracing::{debug, error, warn};

use crate::server::{
    dtos::query_dto::ProxyQuery,
    error::{AppResult, Error},
    extractors::ProxyContext,
    services::{
        ProxyServices,
        fetch_services::{FetchMode, key_request_headers},
        quirk_services::{QuirkAction, QuirkRequest},
    },
    utils::{
        header_codec::{self, HeaderSet},
        manifest_utils::rewrite_manifest,
    },
};

const HELP_PAGE: &str = include_str!("../../../static/index.html");
const MPEGURL: &str = "application/vnd.apple.mpegurl";

pub struct ProxyController;

impl ProxyController {
    pub fn app() -> Router {
        Router::new().route("/", get(Self::proxy_get))
    }

    /// the query extractor already decoded once, players that double encode get a second pass
    pub fn decode_url(raw: &str) -> AppResult<String> {
        let url = if raw.starts_with("http") {
            raw.to_string()
        } else {
            urlencoding::decode(raw)
                .map(|decoded| decoded.into_owned())
                .map_err(|_| Error::BadRequest("Invalid URL encoding".to_string()))?
        };

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(Error::BadRequest("Invalid URL format".to_string()));
        }

        Ok(url)
    }

    /// a token that doesn't decode is treated like no token at all
    fn decode_headers(token: Option<&str>) -> HeaderSet {
        let Some(token) = token else {
            return HeaderSet::new();
        };

        header_codec::decode_token(token).unwrap_or_else(|e| {
            warn!("Ignoring undecodable header token: {}", e);
            HeaderSet::new()
        })
    }

    /// manifests and segments both go out as mpegurl with an exact length
    fn build_m3u8_response(status: StatusCode, body: Vec<u8>) -> Response {
        let mut response_headers = HeaderMap::new();
        response_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(MPEGURL));
        response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));

        (status, response_headers, body).into_response()
    }

    async fn fetch_key(services: &ProxyServices, url: &str, headers: &HeaderSet) -> AppResult<Response> {
        let key_headers = key_request_headers(headers);
        debug!("Fetching key from {} with {} headers", url, key_headers.len());

        let fetched = services
            .fetcher
            .fetch(url, &key_headers, FetchMode::Binary)
            .await
            .map_err(|e| Error::InternalServerErrorWithContext(format!("Error fetching key: {}", e)))?;

        if fetched.status >= 400 {
            error!("Key fetch failed: {}", fetched.status);
            return Err(Error::InternalServerErrorWithContext(format!(
                "Error fetching key: Failed to fetch key: {}",
                fetched.status
            )));
        }

        let mut response_headers = HeaderMap::new();
        response_headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
        response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(fetched.body.len()));

        Ok((StatusCode::OK, response_headers, fetched.body).into_response())
    }

    async fn proxy_get(
        ProxyContext(origin, services): ProxyContext,
        uri: Uri,
        Query(params): Query<ProxyQuery>,
    ) -> AppResult<Response> {
        let non_empty = |value: &Option<String>| value.clone().filter(|v| !v.is_empty());

        // url2 wins when both are there
        let (raw_target, is_master) = match (non_empty(&params.url), non_empty(&params.url2)) {
            (_, Some(segment)) => (segment, false),
            (Some(manifest), None) => (manifest, true),
            (None, None) => {
                if uri.query().is_none_or(|q| q.is_empty()) {
                    return Ok(Html(HELP_PAGE).into_response());
                }
                return Err(Error::BadRequest("Bad Request".to_string()));
            }
        };

        let target_url = Self::decode_url(&raw_target)?;
        let token = params.data.as_deref().filter(|t| !t.is_empty());
        let headers = Self::decode_headers(token);

        if params.is_key_request() {
            return Self::fetch_key(&services, &target_url, &headers).await;
        }

        let quirk_request = QuirkRequest {
            target_url: &target_url,
            token,
            proxy_origin: &origin,
            session_stamped: params.is_session_stamped(),
            session_token: params.su_token.as_deref(),
        };
        if let QuirkAction::Redirect(location) = services.quirks.apply(&quirk_request).await? {
            debug!("Redirecting {} to {}", target_url, location);
            return Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response());
        }

        let mode = if is_master {
            FetchMode::Text
        } else {
            FetchMode::Binary
        };
        debug!("Proxying ({:?}): {}", mode, target_url);

        let fetched = services.fetcher.fetch(&target_url, &headers, mode).await?;

        if fetched.status >= 400 {
            error!(
                "Response from target not successful: {} for {}",
                fetched.status, target_url
            );
            return Err(Error::UpstreamStatus(fetched.status));
        }

        let status = StatusCode::from_u16(fetched.status).unwrap_or(StatusCode::OK);

        if is_master {
            let rewritten = rewrite_manifest(&fetched.text(), &fetched.final_url, &origin, token);
            debug!("Rewrote manifest, {} bytes", rewritten.len());
            Ok(Self::build_m3u8_response(status, rewritten.into_bytes()))
        } else {
            Ok(Self::build_m3u8_response(status, fetched.body))
        }
    }
}

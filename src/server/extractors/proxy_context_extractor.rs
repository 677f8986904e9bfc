use axum::Extension;
use axum::extract::FromRequestParts;
use axum::http::header::HOST;
use axum::http::request::Parts;
use tracing::debug;

use crate::server::error::Error;
use crate::server::services::ProxyServices;

/// the origin rewritten urls should point at, plus the services
pub struct ProxyContext(pub String, pub ProxyServices);

/// configured public origin first, otherwise https on whatever host the player used to reach us
pub fn resolve_proxy_origin(public_origin: Option<&str>, host: Option<&str>) -> String {
    if let Some(origin) = public_origin.map(str::trim).filter(|o| !o.is_empty()) {
        return origin.trim_end_matches('/').to_string();
    }

    match host.map(str::trim).filter(|h| !h.is_empty()) {
        Some(host) => format!("https://{}", host),
        None => String::new(),
    }
}

impl<S> FromRequestParts<S> for ProxyContext
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Extension(services): Extension<ProxyServices> =
            Extension::from_request_parts(parts, state)
                .await
                .map_err(|err| Error::InternalServerErrorWithContext(err.to_string()))?;

        let host = parts
            .headers
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .or_else(|| parts.uri.authority().map(|a| a.as_str()));

        let origin = resolve_proxy_origin(services.config.public_origin.as_deref(), host);
        debug!("Proxy origin for request: {}", origin);

        Ok(ProxyContext(origin, services))
    }
}

use axum::{
    Extension, Json, Router,
    extract::Query,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use tracing::{error, info};

use crate::server::{
    dtos::query_dto::{EpgQuery, FetchQuery, PlaylistQuery},
    error::{AppResult, Error},
    extractors::ProxyContext,
    services::{ProxyServices, playlist_services::PlaylistRequest},
};

pub struct PlaylistController;

impl PlaylistController {
    pub fn app() -> Router {
        Router::new()
            .route("/playlist", get(Self::playlist))
            .route("/Epg", get(Self::epg))
            .route("/fetch", get(Self::fetch))
    }

    async fn playlist(
        ProxyContext(origin, services): ProxyContext,
        Query(params): Query<PlaylistQuery>,
    ) -> AppResult<Response> {
        let Some(url_csv) = params.url.as_deref().filter(|u| !u.is_empty()) else {
            return Err(Error::BadRequest("URL parameter missing".to_string()));
        };
        info!("Processing playlist URL: {}", url_csv);

        let request = PlaylistRequest::new(
            url_csv,
            params.data.as_deref(),
            params.epg_merging_enabled(),
            params.exclude.as_deref(),
            &origin,
        );
        let combined = services.playlists.aggregate(&request).await;

        Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            combined,
        )
            .into_response())
    }

    async fn epg(
        Extension(services): Extension<ProxyServices>,
        Query(params): Query<EpgQuery>,
    ) -> AppResult<Response> {
        let Some(data) = params.data.as_deref().filter(|d| !d.is_empty()) else {
            return Err(Error::BadRequest("Data parameter missing".to_string()));
        };

        let merged = services.epg.merge(data).await?;

        Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/xml")],
            merged,
        )
            .into_response())
    }

    /// raw passthrough used by the form page to list a playlist's groups
    async fn fetch(
        Extension(services): Extension<ProxyServices>,
        Query(params): Query<FetchQuery>,
    ) -> Response {
        let Some(url) = params.url.as_deref().filter(|u| !u.is_empty()) else {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Missing URL parameter" })),
            )
                .into_response();
        };

        match services.fetcher.fetch_raw(url).await {
            Ok(content) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                content.body,
            )
                .into_response(),
            Err(e) => {
                error!("Error in /fetch for {}: {}", url, e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": e.to_string() })),
                )
                    .into_response()
            }
        }
    }
}

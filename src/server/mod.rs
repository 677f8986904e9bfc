pub mod api;
pub mod dtos;
pub mod error;
pub mod extractors;
pub mod services;
pub mod utils;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Extension, Router,
    extract::Request,
    http::{HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::Response,
};
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::{config::AppConfig, database::DynKeyValueStore};
use api::{playlist_controller::PlaylistController, proxy_controller::ProxyController};
use services::ProxyServices;

/// preflights are cached by the browser for a day
const CORS_MAX_AGE: Duration = Duration::from_secs(86400);

pub struct ProxyApplicationServer;

impl ProxyApplicationServer {
    /// all routes with their layers, without binding anything
    pub fn router(services: ProxyServices) -> Router {
        let cors = Self::cors_layer(&services.config.cors_origin);

        Router::new()
            .merge(ProxyController::app())
            .merge(PlaylistController::app())
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(middleware::from_fn(options_no_content))
                    .layer(cors)
                    .layer(Extension(services)),
            )
    }

    /// `*` allows everything, otherwise a comma separated list of origins
    pub fn cors_layer(cors_origin: &str) -> CorsLayer {
        let allow_origin = if cors_origin.trim() == "*" {
            AllowOrigin::from(Any)
        } else {
            let origins: Vec<HeaderValue> = cors_origin
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .filter_map(|o| match o.parse::<HeaderValue>() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        warn!("Ignoring invalid CORS origin: {}", o);
                        None
                    }
                })
                .collect();
            AllowOrigin::list(origins)
        };

        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any)
            .expose_headers([header::CONTENT_LENGTH])
            .max_age(CORS_MAX_AGE)
    }

    pub async fn serve(config: Arc<AppConfig>, store: DynKeyValueStore) -> anyhow::Result<()> {
        let port = config.port;
        let services = ProxyServices::new(store, config).context("Failed to start services")?;
        info!(
            "services ready, sessions stored in {}",
            services.store.backend_name()
        );

        let app = Self::router(services);

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;

        info!("Server is running on port {}", port);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("error while starting API server")?;

        info!("Server shutdown complete");
        Ok(())
    }
}

/// the cors layer answers every OPTIONS itself, players expect a 204 for it
async fn options_no_content(request: Request, next: Next) -> Response {
    let is_options = request.method() == Method::OPTIONS;
    let mut response = next.run(request).await;
    if is_options && response.status() == StatusCode::OK {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }
    response
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use tracing::error;

pub type AppResult<T> = Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0}")]
    BadRequest(String),

    /// network error, timeout or too many redirects
    #[error("failed to fetch {url}: {reason}")]
    UpstreamFetch { url: String, reason: String },

    /// upstream answered with a status we pass straight back to the player
    #[error("Error: {0}")]
    UpstreamStatus(u16),

    #[error("session negotiation failed: {0}")]
    SessionNegotiation(String),

    #[error("{0}")]
    InternalServerErrorWithContext(String),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::UpstreamStatus(status) => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::UpstreamFetch { .. }
            | Self::SessionNegotiation(_)
            | Self::InternalServerErrorWithContext(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            error!("request failed with {}: {}", status, self);
        }

        // network details stay in the log
        let body = match &self {
            Self::UpstreamFetch { .. } => "Internal Server Error".to_string(),
            other => other.to_string(),
        };

        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response()
    }
}

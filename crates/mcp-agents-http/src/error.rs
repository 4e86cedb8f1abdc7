//! HTTP error mapping.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use mcp_agents_core::SessionError;
use thiserror::Error;

use crate::protocol::ErrorBody;

/// A failed API request: what was being done, and why it failed.
#[derive(Debug, Error)]
#[error("{context}: {source}")]
pub struct ApiError {
    context: &'static str,
    source: SessionError,
}

impl ApiError {
    #[must_use]
    pub const fn new(context: &'static str, source: SessionError) -> Self {
        Self { context, source }
    }

    /// Adapter for `map_err`.
    pub fn context(context: &'static str) -> impl FnOnce(SessionError) -> Self {
        move |source| Self::new(context, source)
    }

    /// 503 while no session is connected, 500 otherwise.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self.source {
            SessionError::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub const fn session_error(&self) -> &SessionError {
        &self.source
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "request failed");
        let body = ErrorBody {
            detail: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let down = ApiError::new("Error listing tools", SessionError::NotConnected);
        assert_eq!(down.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(down.to_string(), "Error listing tools: Not connected");

        let failed = ApiError::context("Error processing query")(SessionError::Runtime("x".into()));
        assert_eq!(failed.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(matches!(failed.session_error(), SessionError::Runtime(_)));
    }
}

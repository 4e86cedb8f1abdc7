//! Cross-origin policy.

use axum::http::{HeaderValue, Method};
use tower_http::cors::{AllowHeaders, AllowOrigin, Any, CorsLayer};

/// Allowed browser origins.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CorsConfig {
    /// Any origin, without credentials.
    #[default]
    Any,
    /// Only these origins, with credentials.
    Origins(Vec<String>),
}

impl CorsConfig {
    /// Parse `*` or a comma-separated origin list. Trailing slashes are
    /// dropped so `http://host/` matches the browser's `http://host`.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let origins: Vec<String> = value
            .split(',')
            .map(|origin| origin.trim().trim_end_matches('/'))
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();
        if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
            Self::Any
        } else {
            Self::Origins(origins)
        }
    }

    #[must_use]
    pub fn layer(&self) -> CorsLayer {
        match self {
            Self::Any => CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
            Self::Origins(origins) => {
                let values = origins.iter().filter_map(|origin| {
                    HeaderValue::from_str(origin)
                        .inspect_err(|e| tracing::warn!(%origin, "ignoring CORS origin: {e}"))
                        .ok()
                });
                CorsLayer::new()
                    .allow_origin(AllowOrigin::list(values))
                    .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                    .allow_headers(AllowHeaders::mirror_request())
                    .allow_credentials(true)
            }
        }
    }
}

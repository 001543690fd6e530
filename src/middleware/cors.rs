use axum::http::{header, Method};
use tower_http::cors::{Any, CorsLayer};

/// The dashboard is served from its own dev server, so any origin may read.
pub fn create_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::ORIGIN])
        .max_age(std::time::Duration::from_secs(60 * 60))
}

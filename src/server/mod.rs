pub mod range;
pub mod render;
pub mod stream_routes;

use axum::Router;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

use crate::cache::{CacheStore, Populator, Predictor};
use crate::db::repository::CatalogRepository;
use crate::error::GatewayError;
use crate::remote::{RemoteStore, SessionPool};
use render::PageRenderer;

/// Everything the HTTP handlers need, constructed once at startup and
/// passed in explicitly.
pub struct AppContext {
    pub remote: Arc<dyn RemoteStore>,
    pub pool: Arc<SessionPool>,
    pub store: Arc<CacheStore>,
    pub catalog: Arc<dyn CatalogRepository>,
    pub populator: Arc<Populator>,
    pub predictor: Arc<Predictor>,
    pub renderer: Arc<dyn PageRenderer>,
    pub cache_enabled: bool,
}

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::HEAD])
        .allow_headers([header::RANGE])
        .expose_headers([header::CONTENT_RANGE, header::CONTENT_LENGTH]);

    Router::new()
        .route(
            "/watch/{container}",
            get(stream_routes::watch_page).head(stream_routes::watch_page_head),
        )
        .route(
            "/api/thumb/{container}",
            get(stream_routes::thumbnail).head(stream_routes::thumbnail_head),
        )
        .route(
            "/{container}/{name}",
            get(stream_routes::stream_media).head(stream_routes::stream_media_head),
        )
        .layer(cors)
        .with_state(ctx)
}

/// Only this layer maps the error taxonomy onto status codes.
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            GatewayError::InvalidHash => {
                (StatusCode::FORBIDDEN, "403: invalid hash").into_response()
            }
            GatewayError::NotFound => {
                (StatusCode::NOT_FOUND, "404: file not found").into_response()
            }
            GatewayError::RangeNotSatisfiable { size } => Response::builder()
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(header::CONTENT_RANGE, format!("bytes */{size}"))
                .header(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"))
                .body("416: range not satisfiable".into())
                .unwrap(),
            GatewayError::ClientDisconnected | GatewayError::Cancelled => {
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
            e => {
                error!("Request failed: {e}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

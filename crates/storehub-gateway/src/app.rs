use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use dashmap::DashMap;
use std::sync::Arc;
use storehub_core::StorehubConfig;
use storehub_hub::Hub;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

use crate::http::products::Product;

/// Central shared state: passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: StorehubConfig,
    /// Handle to the connection hub; the engine runs separately.
    pub hub: Hub,
    /// Product catalogue: product id -> product.
    pub products: DashMap<String, Product>,
}

impl AppState {
    pub fn new(config: StorehubConfig, hub: Hub) -> Self {
        Self {
            config,
            hub,
            products: DashMap::new(),
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.gateway.allowed_origins);

    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/ws", get(crate::ws::connection::ws_handler))
        .route(
            "/products",
            get(crate::http::products::list_products).post(crate::http::products::create_product),
        )
        .route(
            "/products/{id}",
            get(crate::http::products::get_product)
                .put(crate::http::products::update_product)
                .delete(crate::http::products::delete_product),
        )
        .with_state(state)
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Any origin when none are configured, otherwise only the listed ones.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins.iter().filter_map(|origin| {
            origin
                .parse::<HeaderValue>()
                .map_err(|_| warn!(%origin, "ignoring invalid CORS origin"))
                .ok()
        }))
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

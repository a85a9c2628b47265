use axum::{
    routing::{any, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use super::ws::ws_handler;
use crate::state::AppState;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let gadget_routes = Router::new()
        .route(
            "/gadget/functions",
            get(handlers::get_functions).post(handlers::set_functions),
        )
        .route("/gadget/speed", get(handlers::get_speed))
        .route("/gadget/reset", post(handlers::reset_gadget))
        // WebSocket endpoint for gadget events
        .route("/ws", any(ws_handler));

    let config_routes = Router::new().route(
        "/config/vendor",
        get(handlers::get_vendor_config).patch(handlers::update_vendor_config),
    );

    let api_routes = Router::new().merge(gadget_routes).merge(config_routes);

    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

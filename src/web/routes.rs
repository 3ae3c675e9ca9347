use axum::{
    routing::{any, delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use super::ws::ws_handler;
use crate::auth::AUTH_CALLBACK_PATH;
use crate::state::AppState;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/status", get(handlers::status))
        .route(
            "/config",
            get(handlers::get_config).patch(handlers::update_config),
        )
        // Account linking
        .route("/auth/sign-in", get(handlers::auth::sign_in))
        .route("/auth/sign-out", post(handlers::auth::sign_out))
        .route("/auth/refresh", post(handlers::auth::refresh))
        // Device directory and commands
        .route("/devices", get(handlers::devices::directory))
        .route("/devices/list", post(handlers::devices::list_devices))
        .route("/devices/select", post(handlers::devices::select_device))
        .route("/structures/list", post(handlers::devices::list_structures))
        .route("/devices/:id/fan", post(handlers::devices::set_fan))
        .route(
            "/devices/:id/thermostat/mode",
            post(handlers::devices::set_thermostat_mode),
        )
        .route(
            "/devices/:id/thermostat/setpoint",
            post(handlers::devices::set_temperature),
        )
        .route(
            "/devices/:id/stream/:action",
            post(handlers::devices::stream_command),
        )
        // Stream preview
        .route("/stream", get(handlers::stream::stream_state))
        .route("/stream/reset", post(handlers::stream::stream_reset))
        // Event subscription
        .route("/events/subscribe", post(handlers::events::subscribe))
        .route("/events/unsubscribe", post(handlers::events::unsubscribe))
        // Activity log
        .route("/logs", get(handlers::logs::get_logs))
        .route("/logs", delete(handlers::logs::clear_logs))
        .route("/logs/filter/:kind", post(handlers::logs::toggle_filter))
        // WebSocket endpoint for real-time events
        .route("/ws", any(ws_handler));

    Router::new()
        .nest("/api", api_routes)
        .route(AUTH_CALLBACK_PATH, get(handlers::auth::callback))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

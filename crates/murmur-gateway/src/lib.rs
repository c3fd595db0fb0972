pub mod connection;
pub mod dispatcher;
pub mod sessions;

use axum::Router;
use axum::routing::get;

use crate::dispatcher::Dispatcher;

/// The realtime boundary: a single WebSocket endpoint at `/gateway`.
pub fn router(dispatcher: Dispatcher) -> Router {
    Router::new()
        .route("/gateway", get(connection::ws_upgrade))
        .with_state(dispatcher)
}

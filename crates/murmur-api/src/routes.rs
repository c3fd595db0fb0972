use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{self, AppState};
use crate::middleware::require_key;
use crate::{channels, users};

/// Full HTTP surface: public auth routes, bearer-protected routes and the
/// realtime gateway.
pub fn app(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/auth/verify", get(auth::verify_key))
        .route("/auth/deactivate", post(auth::deactivate_key))
        .route("/keys", get(auth::list_keys).post(auth::issue_key))
        .route("/users/{user_id}", get(users::get_user))
        .route("/users/{user_id}/channels", get(users::list_channels))
        .route("/channels", post(channels::create_channel))
        .route("/channels/{channel_id}/messages", get(channels::list_messages))
        .layer(middleware::from_fn_with_state(state.clone(), require_key))
        .with_state(state.clone());

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(murmur_gateway::router(state.dispatcher.clone()))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

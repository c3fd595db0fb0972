use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};

use murmur_crypto::keys::looks_like_access_key;
use murmur_types::models::UserId;

use crate::auth::AppState;
use crate::error::ApiError;

/// The verified caller, inserted as a request extension by [`require_key`].
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: UserId,
    pub username: String,
    /// The bearer key that authenticated this request.
    pub key: String,
}

/// Extract the bearer key from the Authorization header and verify it against
/// the credential store. Values that cannot be a key are refused without a lookup.
pub async fn require_key(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = bearer_key(req.headers()).ok_or(ApiError::Auth)?.to_string();

    let lookup = key.clone();
    let (user_id, username) = state
        .db
        .call(move |db| db.verify_key(&lookup))
        .await?
        .ok_or(ApiError::Auth)?;

    req.extensions_mut().insert(AuthUser {
        user_id,
        username,
        key,
    });
    Ok(next.run(req).await)
}

fn bearer_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|key| looks_like_access_key(key))
}

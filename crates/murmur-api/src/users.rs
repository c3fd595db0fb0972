use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};

use murmur_types::models::UserId;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::middleware::AuthUser;

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Extension(_auth): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .call(move |db| db.get_user(user_id))
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;
    Ok(Json(user))
}

/// A user's channels. Only the user themself may list them.
pub async fn list_channels(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Extension(auth): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    if user_id != auth.user_id {
        return Err(ApiError::Auth);
    }

    let channels = state
        .db
        .call(move |db| db.list_channels_for_user(user_id))
        .await?;
    Ok(Json(channels))
}

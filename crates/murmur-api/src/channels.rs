use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{info, warn};

use murmur_db::Membership;
use murmur_types::api::{CreateChannelRequest, CreateChannelResponse};
use murmur_types::models::ChannelId;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::middleware::AuthUser;

/// Create a channel. The creator is the caller and must appear in the member list.
pub async fn create_channel(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<CreateChannelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.member_ids.is_empty() {
        return Err(ApiError::Validation("member_ids must not be empty".into()));
    }

    let creator = req.creator_id.unwrap_or(auth.user_id);
    if creator != auth.user_id {
        return Err(ApiError::Auth);
    }
    if !req.member_ids.contains(&creator) {
        return Err(ApiError::Validation(
            "creator must be one of the members".into(),
        ));
    }

    let members = req.member_ids;
    let channel_id = state
        .db
        .call(move |db| db.create_channel(&members))
        .await?;

    info!("{} ({}) created channel {}", auth.username, auth.user_id, channel_id);
    Ok((StatusCode::CREATED, Json(CreateChannelResponse { channel_id })))
}

/// Full message log of a channel the caller belongs to, oldest first.
pub async fn list_messages(
    State(state): State<AppState>,
    Path(channel_id): Path<ChannelId>,
    Extension(auth): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth.user_id;
    let membership = state
        .db
        .call(move |db| db.is_member(channel_id, user_id))
        .await?;

    match membership {
        Membership::Member => {}
        Membership::NotMember => {
            warn!("{} ({}) denied log of channel {}", auth.username, user_id, channel_id);
            return Err(ApiError::Auth);
        }
        Membership::ChannelNotFound => {
            return Err(ApiError::NotFound("channel not found".into()));
        }
    }

    let messages = state
        .db
        .call(move |db| db.list_messages(channel_id))
        .await?;
    Ok(Json(messages))
}

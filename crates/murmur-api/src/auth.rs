use std::sync::Arc;

use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::Duration;
use tracing::{info, warn};

use murmur_db::Database;
use murmur_gateway::dispatcher::Dispatcher;
use murmur_types::api::{
    DeactivateKeyResponse, IssueKeyRequest, LoginRequest, LoginResponse, RegisterRequest,
    RegisterResponse, VerifyKeyResponse,
};

use crate::error::ApiError;
use crate::middleware::AuthUser;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    /// Lifetime of keys minted by login and provisioning. `None` means keys never expire.
    pub key_ttl: Option<Duration>,
}

impl AppStateInner {
    pub fn new(db: Arc<Database>, key_ttl: Option<Duration>) -> AppState {
        let dispatcher = Dispatcher::new(db.clone());
        Arc::new(Self {
            db,
            dispatcher,
            key_ttl,
        })
    }
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username_len = req.username.chars().count();
    if !(3..=32).contains(&username_len) {
        return Err(ApiError::Validation(
            "username must be 3 to 32 characters".into(),
        ));
    }
    if req.password.chars().count() < 8 {
        return Err(ApiError::Validation(
            "password must be at least 8 characters".into(),
        ));
    }
    if !req.email.contains('@') || req.email.len() > 254 {
        return Err(ApiError::Validation("email is not valid".into()));
    }

    let RegisterRequest {
        username,
        password,
        email,
    } = req;
    let user_id = state
        .db
        .call(move |db| db.create_user(&username, &password, &email))
        .await?;

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.username.is_empty() || req.password.is_empty() {
        return Err(ApiError::Validation("username and password are required".into()));
    }

    let ttl = state.key_ttl;
    let LoginRequest { username, password } = req;
    let login_name = username.clone();
    let key = state
        .db
        .call(move |db| db.authenticate(&login_name, &password, ttl))
        .await?
        .ok_or_else(|| {
            warn!("Failed login for {}", username);
            ApiError::Auth
        })?;

    info!("{} ({}) logged in", username, key.user_id);
    Ok(Json(LoginResponse {
        user_id: key.user_id,
        username,
        key: key.key_value,
        expires_at: key.expires_at,
    }))
}

pub async fn verify_key(Extension(auth): Extension<AuthUser>) -> Json<VerifyKeyResponse> {
    Json(VerifyKeyResponse {
        user_id: auth.user_id,
        username: auth.username,
    })
}

/// Deactivate the key presented with this request.
pub async fn deactivate_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let key = auth.key;
    let deactivated = state.db.call(move |db| db.deactivate_key(&key)).await?;
    info!("{} ({}) deactivated a key", auth.username, auth.user_id);
    Ok(Json(DeactivateKeyResponse { deactivated }))
}

pub async fn list_keys(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth.user_id;
    let keys = state.db.call(move |db| db.list_keys(user_id)).await?;
    Ok(Json(keys))
}

/// Provision an additional key for the caller.
pub async fn issue_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<IssueKeyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ttl = match req.ttl_days {
        Some(days) if days <= 0 => {
            return Err(ApiError::Validation("ttl_days must be positive".into()));
        }
        Some(days) => Some(
            Duration::try_days(days)
                .ok_or_else(|| ApiError::Validation("ttl_days is too large".into()))?,
        ),
        None => state.key_ttl,
    };

    let user_id = auth.user_id;
    let key = state.db.call(move |db| db.issue_key(user_id, ttl)).await?;
    Ok((StatusCode::CREATED, Json(key)))
}

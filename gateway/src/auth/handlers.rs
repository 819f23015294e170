use std::sync::Arc;

use axum::{extract::State, Extension, Json};
use serde_json::{json, Value};
use shared_types::{
    OtpRequest, OtpVerifyRequest, PasswordLoginRequest, SessionGrant, SessionSummary,
};

use crate::auth::SessionIdentity;
use crate::error::ApiError;
use crate::middleware::BearerToken;
use crate::AppState;

fn require_identity(identity: &str) -> Result<(), ApiError> {
    if identity.trim().is_empty() {
        return Err(ApiError::validation("identity is required"));
    }
    Ok(())
}

/// POST /auth/otp
pub async fn request_otp(
    State(state): State<Arc<AppState>>,
    Json(body): Json<OtpRequest>,
) -> Result<Json<Value>, ApiError> {
    require_identity(&body.identity)?;
    state.auth.issue(&body.identity).await?;
    Ok(Json(json!({
        "success": true,
        "message": "A login code has been sent",
    })))
}

/// POST /auth/otp/verify
pub async fn verify_otp(
    State(state): State<Arc<AppState>>,
    Json(body): Json<OtpVerifyRequest>,
) -> Result<Json<SessionGrant>, ApiError> {
    require_identity(&body.identity)?;
    if body.code.trim().is_empty() {
        return Err(ApiError::validation("code is required"));
    }
    Ok(Json(state.auth.verify(&body.identity, &body.code)?))
}

/// POST /auth/password
pub async fn password_login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PasswordLoginRequest>,
) -> Result<Json<SessionGrant>, ApiError> {
    require_identity(&body.identity)?;
    if body.secret.is_empty() {
        return Err(ApiError::validation("password is required"));
    }
    Ok(Json(
        state
            .auth
            .password_login(&body.identity, &body.secret)
            .await?,
    ))
}

/// GET /auth/me
pub async fn me(Extension(session): Extension<SessionIdentity>) -> Json<Value> {
    Json(json!({
        "identity": session.identity,
        "last_activity_at": session.last_activity_at,
    }))
}

/// POST /auth/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(BearerToken(token)): Extension<BearerToken>,
) -> Json<Value> {
    let ended = state.auth.logout(&token);
    Json(json!({ "success": ended }))
}

/// GET /admin/sessions
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<SessionSummary>> {
    Json(state.auth.active_sessions())
}

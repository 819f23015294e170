use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::headers::{authorization::Bearer, Authorization, Header};
use shared_types::AuthFailureReason;
use tracing::debug;

use crate::error::ApiError;
use crate::AppState;

/// Raw bearer token of the current request, for logout.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

/// Middleware: require a live bearer session.
///
/// On success the request carries the caller's
/// [`SessionIdentity`](crate::auth::SessionIdentity) and [`BearerToken`] as
/// extensions; otherwise it is answered with 401 and a reason code.
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let token = match bearer_token(&req) {
        Ok(token) => token,
        Err(reason) => {
            debug!(path = %req.uri().path(), reason = reason.as_str(), "rejected request");
            return ApiError::Unauthenticated(reason).into_response();
        }
    };

    match state.auth.verify_session(&token) {
        Ok(identity) => {
            req.extensions_mut().insert(identity);
            req.extensions_mut().insert(BearerToken(token));
            next.run(req).await
        }
        Err(e) => ApiError::Unauthenticated(e.session_reason()).into_response(),
    }
}

fn bearer_token(req: &Request) -> Result<String, AuthFailureReason> {
    let mut values = req.headers().get_all(AUTHORIZATION).iter();
    if req.headers().get(AUTHORIZATION).is_none() {
        return Err(AuthFailureReason::Missing);
    }
    let auth = Authorization::<Bearer>::decode(&mut values)
        .map_err(|_| AuthFailureReason::Invalid)?;
    Ok(auth.token().to_string())
}

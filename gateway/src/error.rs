//! JSON error responses: `{"error": {"code": "...", "message": "..."}}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use shared_types::{AuthFailureReason, ExitStatus, JobOutcomeView};
use thiserror::Error;
use tracing::error;

use crate::auth::AuthError;
use crate::config::SettingsError;
use crate::jobs::JobOutcome;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("authentication required ({})", .0.as_str())]
    Unauthenticated(AuthFailureReason),
    #[error("job {} did not succeed: {:?}", .0.job_id, .0.exit_status)]
    Job(Box<JobOutcome>),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Internal(message.into())
    }

    pub fn job(outcome: JobOutcome) -> Self {
        ApiError::Job(Box::new(outcome))
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        ApiError::Internal(e.to_string())
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<AuthFailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attempts_remaining: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<JobOutcomeView>,
}

impl ErrorDetail {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            reason: None,
            attempts_remaining: None,
            outcome: None,
        }
    }
}

fn auth_response(e: &AuthError) -> (StatusCode, ErrorDetail) {
    match e {
        AuthError::NotAuthorized => (
            StatusCode::FORBIDDEN,
            ErrorDetail::new("NOT_AUTHORIZED", "Access denied"),
        ),
        AuthError::NotFound => (
            StatusCode::UNAUTHORIZED,
            ErrorDetail::new("CODE_NOT_FOUND", "No active code. Request a new one."),
        ),
        AuthError::Expired => (
            StatusCode::UNAUTHORIZED,
            ErrorDetail::new("EXPIRED", "The code has expired. Request a new one."),
        ),
        AuthError::AttemptsExhausted => (
            StatusCode::TOO_MANY_REQUESTS,
            ErrorDetail::new(
                "ATTEMPTS_EXHAUSTED",
                "Too many failed attempts. Request a new code.",
            ),
        ),
        AuthError::InvalidCode { remaining } => {
            let mut detail = ErrorDetail::new("INVALID_CODE", e.to_string());
            detail.attempts_remaining = Some(*remaining);
            (StatusCode::UNAUTHORIZED, detail)
        }
        AuthError::InvalidPassword => (
            StatusCode::UNAUTHORIZED,
            ErrorDetail::new("INVALID_CREDENTIALS", "Incorrect credentials"),
        ),
        AuthError::Invalid | AuthError::Revoked => {
            let reason = e.session_reason();
            let mut detail = ErrorDetail::new("UNAUTHENTICATED", e.to_string());
            detail.reason = Some(reason);
            (StatusCode::UNAUTHORIZED, detail)
        }
        AuthError::Delivery => (
            StatusCode::BAD_GATEWAY,
            ErrorDetail::new(
                "DELIVERY_FAILED",
                "Could not send the code. Try again later.",
            ),
        ),
        AuthError::Internal => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetail::new("INTERNAL_ERROR", "Internal error"),
        ),
    }
}

fn job_response(outcome: &JobOutcome) -> (StatusCode, ErrorDetail) {
    let (status, code, message) = match &outcome.exit_status {
        ExitStatus::SpawnError { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "PROCESS_SPAWN_ERROR",
            "System error: the worker could not be started".to_string(),
        ),
        ExitStatus::Timeout => (
            StatusCode::GATEWAY_TIMEOUT,
            "PROCESS_TIMEOUT",
            format!("{} job timed out", outcome.kind),
        ),
        ExitStatus::NonzeroExit { code } => (
            StatusCode::BAD_GATEWAY,
            "PROCESS_EXIT",
            format!("{} job failed with exit code {code}", outcome.kind),
        ),
        ExitStatus::Cancelled => (
            StatusCode::CONFLICT,
            "JOB_CANCELLED",
            format!("{} job was cancelled", outcome.kind),
        ),
        ExitStatus::Success => (
            StatusCode::BAD_GATEWAY,
            "PROCESS_EXIT",
            format!("{} job produced no usable output", outcome.kind),
        ),
    };
    let mut detail = ErrorDetail::new(code, message);
    detail.outcome = Some(outcome.view());
    (status, detail)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            ApiError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorDetail::new("VALIDATION_ERROR", msg.clone()),
            ),
            ApiError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorDetail::new("NOT_FOUND", msg.clone()),
            ),
            ApiError::Auth(e) => auth_response(e),
            ApiError::Unauthenticated(reason) => {
                let mut detail = ErrorDetail::new("UNAUTHENTICATED", self.to_string());
                detail.reason = Some(*reason);
                (StatusCode::UNAUTHORIZED, detail)
            }
            ApiError::Job(outcome) => job_response(outcome),
            ApiError::Settings(e) => (
                StatusCode::BAD_REQUEST,
                ErrorDetail::new("VALIDATION_ERROR", e.to_string()),
            ),
            ApiError::Internal(msg) => {
                error!("internal error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorDetail::new("INTERNAL_ERROR", "Internal error"),
                )
            }
        };
        (status, Json(ErrorBody { error: detail })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use shared_types::JobKind;
    use std::time::Duration;

    async fn body_json(e: ApiError) -> (StatusCode, serde_json::Value) {
        let response = e.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn outcome(exit_status: ExitStatus) -> JobOutcome {
        JobOutcome {
            job_id: "01J0000000000000000000000".to_string(),
            kind: JobKind::Render,
            exit_status,
            stdout: "rendered 3 of 10".to_string(),
            stderr: "KeyError: 'Policy No'".to_string(),
            wall_clock: Duration::from_millis(1500),
            result: None,
        }
    }

    #[tokio::test]
    async fn test_invalid_code_reports_remaining_attempts() {
        let (status, json) = body_json(AuthError::InvalidCode { remaining: 1 }.into()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"]["code"], "INVALID_CODE");
        assert_eq!(json["error"]["attempts_remaining"], 1);
    }

    #[tokio::test]
    async fn test_not_authorized_is_generic() {
        let (status, json) = body_json(AuthError::NotAuthorized.into()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["error"]["message"], "Access denied");
    }

    #[tokio::test]
    async fn test_job_failure_carries_diagnostics() {
        let (status, json) = body_json(ApiError::job(outcome(ExitStatus::NonzeroExit { code: 1 }))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json["error"]["code"], "PROCESS_EXIT");
        assert_eq!(json["error"]["outcome"]["stderr"], "KeyError: 'Policy No'");

        let (status, json) = body_json(ApiError::job(outcome(ExitStatus::Timeout))).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(json["error"]["outcome"]["stdout"], "rendered 3 of 10");
    }

    #[tokio::test]
    async fn test_internal_errors_hide_details() {
        let (status, json) = body_json(ApiError::internal("disk on fire at /srv/x")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"]["message"], "Internal error");
    }

    #[tokio::test]
    async fn test_unauthenticated_reason() {
        let (status, json) = body_json(ApiError::Unauthenticated(AuthFailureReason::Expired)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"]["reason"], "expired");
    }
}

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use shared_types::LetterAccessView;
use tokio_util::io::ReaderStream;
use tracing::{error, warn};

use super::AccessDenied;
use crate::AppState;

const PAGE_STYLE: &str = "body{font-family:Arial,sans-serif;max-width:560px;margin:48px auto;padding:0 16px;color:#1f2937}\
h1{font-size:22px;color:#0b3d91}a.button{display:inline-block;margin-top:16px;padding:10px 18px;background:#0b3d91;color:#fff;text-decoration:none;border-radius:4px}";

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"utf-8\">\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
<title>{title}</title><style>{PAGE_STYLE}</style></head>\
<body><h1>{title}</h1>{body}</body></html>"
    )
}

/// Denial page. Unknown ids and internal failures share one message.
fn denied(reason: Option<AccessDenied>) -> Response {
    let (status, title, text) = match reason {
        Some(AccessDenied::Expired) => (
            StatusCode::GONE,
            "Link expired",
            "This letter link has expired. Please contact NICL if you need a new copy.",
        ),
        Some(AccessDenied::QuotaExhausted) => (
            StatusCode::GONE,
            "Link no longer available",
            "This letter link has been opened the maximum number of times. Please contact NICL if you need a new copy.",
        ),
        Some(AccessDenied::NotFound) | None => (
            StatusCode::NOT_FOUND,
            "Letter not available",
            "We could not find this letter. Please check the link you received.",
        ),
    };
    (status, Html(page(title, &format!("<p>{text}</p>")))).into_response()
}

/// GET /letters/{id}
pub async fn letter_page(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.letters.consume(&id) {
        Ok(_) => {
            // Ids are validated lowercase hex, safe to embed as-is.
            let body = format!(
                "<p>Your NICL arrears notice is ready.</p>\
<a class=\"button\" href=\"/letters/{id}/download\">Open letter (PDF)</a>"
            );
            Html(page("Your NICL letter", &body)).into_response()
        }
        Err(reason) => denied(Some(reason)),
    }
}

/// GET /letters/{id}/download
pub async fn download_letter(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let artifact = match state.letters.consume(&id) {
        Ok(path) => path,
        Err(reason) => return denied(Some(reason)),
    };

    let file = match tokio::fs::File::open(&artifact).await {
        Ok(file) => file,
        Err(e) => {
            if e.kind() == std::io::ErrorKind::NotFound {
                warn!(letter = %id, "letter record points at a missing file");
            } else {
                error!(letter = %id, "cannot open letter: {e}");
            }
            return denied(None);
        }
    };

    let filename = artifact
        .file_name()
        .map(|n| {
            n.to_string_lossy()
                .chars()
                .map(|c| if c.is_ascii_graphic() && c != '"' { c } else { '_' })
                .collect::<String>()
        })
        .unwrap_or_else(|| format!("{id}.pdf"));
    (
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{filename}\""),
            ),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response()
}

/// GET /admin/letters
pub async fn list_letters(State(state): State<Arc<AppState>>) -> Json<Vec<LetterAccessView>> {
    Json(state.letters.snapshot())
}

//! Job submission, folder browsing and settings handlers.

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use shared_types::{
    ActiveJobView, ArtifactLocation, ArtifactManifest, CombineJobRequest, CombineJobResponse,
    EmailSendRequest, EmailSendResponse, EnhancedFolderStatus, FolderSummary, JobKind,
    LinkGenerateRequest, LinkGenerateResponse, LinkIndexRecord, NotificationSettingsView,
    RenderJobRequest, TemplateInfo,
};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::folders::{self, link_index, DEFAULT_OUTPUT_FOLDER};
use crate::jobs::{templates, JobSpec};
use crate::links::import;
use crate::AppState;

const UPLOAD_DIR: &str = "temp_uploads";
const DATASET_EXTENSIONS: [&str; 3] = ["xlsx", "xls", "csv"];

fn worker_spec(state: &AppState, kind: JobKind, script: &str) -> JobSpec {
    JobSpec::new(kind, &state.config.workers.interpreter, &state.config.work_root)
        .arg(script)
        .timeout(state.config.job_timeouts.for_kind(kind))
        .env("PYTHONIOENCODING", "utf-8")
}

fn require_folder(state: &AppState, name: &str) -> Result<(), ApiError> {
    if !folders::is_valid_folder_name(name) {
        return Err(ApiError::validation("folder name must be a single path component"));
    }
    if !state.folders.exists(name) {
        return Err(ApiError::not_found(format!("folder not found: {name}")));
    }
    Ok(())
}

/// Run a blocking folder scan off the async workers.
async fn scan<T, F>(state: &Arc<AppState>, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&folders::FolderStateInspector) -> T + Send + 'static,
    T: Send + 'static,
{
    let inspector = state.folders.clone();
    tokio::task::spawn_blocking(move || f(&inspector))
        .await
        .map_err(|e| ApiError::internal(format!("folder scan task failed: {e}")))
}

// ── Render ───────────────────────────────────────────────────────────────────

fn dataset_extension(name: Option<&str>) -> Result<&'static str, ApiError> {
    let Some(name) = name else {
        return Ok("xlsx");
    };
    let ext = FsPath::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    DATASET_EXTENSIONS
        .iter()
        .find(|known| **known == ext)
        .copied()
        .ok_or_else(|| ApiError::validation("dataset must be an .xlsx, .xls or .csv file"))
}

/// POST /jobs/render
pub async fn render(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RenderJobRequest>,
) -> Result<Json<ArtifactManifest>, ApiError> {
    let root = &state.config.work_root;

    let template = body.template.trim();
    if !folders::is_valid_folder_name(template)
        || !templates::is_template_name(template, &state.config.workers)
    {
        return Err(ApiError::validation(format!("not a template script: {template}")));
    }
    if !tokio::fs::try_exists(root.join(template)).await.unwrap_or(false) {
        return Err(ApiError::validation(format!("template not found: {template}")));
    }

    let folder = body
        .output_folder
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .unwrap_or(DEFAULT_OUTPUT_FOLDER)
        .to_string();
    if !folders::is_valid_folder_name(&folder) {
        return Err(ApiError::validation("output folder must be a single path component"));
    }

    let ext = dataset_extension(body.dataset_name.as_deref())?;
    let dataset = STANDARD
        .decode(body.dataset_base64.trim())
        .map_err(|_| ApiError::validation("dataset_base64 is not valid base64"))?;
    if dataset.is_empty() {
        return Err(ApiError::validation("dataset is empty"));
    }

    let upload_rel = PathBuf::from(UPLOAD_DIR).join(format!("{}.{ext}", ulid::Ulid::new()));
    let upload_abs = root.join(&upload_rel);
    tokio::fs::create_dir_all(root.join(UPLOAD_DIR)).await?;
    tokio::fs::write(&upload_abs, &dataset).await?;

    let spec = worker_spec(&state, JobKind::Render, &state.config.workers.render)
        .args([
            "--template".to_string(),
            template.to_string(),
            "--input".to_string(),
            upload_rel.to_string_lossy().to_string(),
            "--output".to_string(),
            folder.clone(),
        ])
        .output_dir(root.join(&folder))
        .remove_after(&upload_abs);
    let outcome = state.runner.run(spec).await;
    if !outcome.is_success() {
        return Err(ApiError::job(outcome));
    }

    let name = folder.clone();
    let (files, status) = scan(&state, move |inspector| {
        (inspector.artifacts(&name), inspector.inspect(&name))
    })
    .await?;
    let files: Vec<_> = files?
        .into_iter()
        .filter(|f| f.location != ArtifactLocation::Combined)
        .collect();

    info!(
        job_id = %outcome.job_id,
        folder = %folder,
        files = files.len(),
        "render finished"
    );
    Ok(Json(ArtifactManifest {
        folder,
        files,
        counts: status.per_category_counts,
        derived_status: status.derived_status,
        outcome: outcome.view(),
    }))
}

// ── Combine ──────────────────────────────────────────────────────────────────

fn output_stem(name: &str) -> Result<String, ApiError> {
    let name = name.trim();
    let stem = name
        .strip_suffix(".pdf")
        .or_else(|| name.strip_suffix(".PDF"))
        .unwrap_or(name);
    if stem.is_empty() || !folders::is_valid_folder_name(stem) || stem.starts_with('.') {
        return Err(ApiError::validation("output name must be a plain file name"));
    }
    Ok(stem.to_string())
}

/// POST /jobs/combine
pub async fn combine(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CombineJobRequest>,
) -> Result<Json<CombineJobResponse>, ApiError> {
    let folder = body.folder_name.trim().to_string();
    require_folder(&state, &folder)?;
    let stem = output_stem(&body.output_name)?;

    let folder_dir = state.config.work_root.join(&folder);
    let unprotected_dir = folder_dir.join("unprotected");
    if !tokio::fs::try_exists(&unprotected_dir).await.unwrap_or(false) {
        return Err(ApiError::validation(format!(
            "folder {folder} has no unprotected letters to combine"
        )));
    }

    let name = folder.clone();
    let inputs: Vec<String> = scan(&state, move |inspector| inspector.artifacts(&name))
        .await??
        .into_iter()
        .filter(|f| f.location == ArtifactLocation::Unprotected)
        .map(|f| f.path)
        .collect();
    if inputs.is_empty() {
        return Err(ApiError::validation(format!(
            "folder {folder} has no unprotected letters to combine"
        )));
    }

    let filename = format!("{stem}.pdf");
    let combined_dir = folder_dir.join("combined");
    let output = combined_dir.join(&filename);
    let files_json = serde_json::to_string(&inputs)
        .map_err(|e| ApiError::internal(format!("encode file list: {e}")))?;

    let spec = worker_spec(&state, JobKind::Combine, &state.config.workers.combine)
        .args([
            "--files".to_string(),
            files_json,
            "--output".to_string(),
            output.to_string_lossy().to_string(),
        ])
        .output_dir(&combined_dir);
    let outcome = state.runner.run(spec).await;
    if !outcome.is_success() {
        return Err(ApiError::job(outcome));
    }
    if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
        warn!(job_id = %outcome.job_id, output = %output.display(), "combine reported success without output");
        return Err(ApiError::job(outcome));
    }

    info!(job_id = %outcome.job_id, folder = %folder, pdf_count = inputs.len(), "combine finished");
    Ok(Json(CombineJobResponse {
        folder_name: folder,
        filename,
        full_path: output.to_string_lossy().to_string(),
        pdf_count: inputs.len(),
        outcome: outcome.view(),
    }))
}

// ── Link generation ──────────────────────────────────────────────────────────

/// POST /jobs/link-generate
pub async fn link_generate(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LinkGenerateRequest>,
) -> Result<Json<LinkGenerateResponse>, ApiError> {
    let folder = body.folder_name.trim().to_string();
    require_folder(&state, &folder)?;

    let name = folder.clone();
    let status = scan(&state, move |inspector| inspector.inspect(&name)).await?;
    if status.primary_artifact_count == 0 {
        return Err(ApiError::validation(format!(
            "folder {folder} has no letters to link"
        )));
    }

    let template = body
        .template
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
        .or_else(|| status.template.clone())
        .ok_or_else(|| {
            ApiError::validation("template is required: the folder name does not identify one")
        })?;

    let spec = worker_spec(&state, JobKind::LinkGenerate, &state.config.workers.link_generate)
        .args([
            "--folder".to_string(),
            folder.clone(),
            "--template".to_string(),
            template,
            "--base-url".to_string(),
            state.config.letter_base_url.clone(),
        ])
        .envs(state.notifications.worker_env());

    let root = &state.config.work_root;
    import::retire_folder(root, &folder).await?;
    let outcome = state.runner.run(spec).await;
    if !outcome.is_success() {
        return Err(ApiError::job(outcome));
    }

    let report = import::import_folder(
        &state.letters,
        root,
        &folder,
        state.letter_defaults(),
        state.clock.now(),
    )
    .await?;

    let name = folder.clone();
    let current = scan(&state, move |inspector| inspector.inspect(&name)).await?;
    let index = LinkIndexRecord {
        folder_name: folder.clone(),
        generated_at: state.clock.now(),
        link_count: report.found,
        source_artifact_count_at_generation: current.primary_artifact_count,
    };
    link_index::write(root, &index).await?;

    info!(
        job_id = %outcome.job_id,
        folder = %folder,
        link_count = report.found,
        artifacts = current.primary_artifact_count,
        "links generated"
    );
    Ok(Json(LinkGenerateResponse {
        folder_name: folder,
        link_count: report.found,
        index,
        outcome: outcome.view(),
    }))
}

// ── Email ────────────────────────────────────────────────────────────────────

/// POST /jobs/email-send
pub async fn email_send(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EmailSendRequest>,
) -> Result<Json<EmailSendResponse>, ApiError> {
    let folder = body.folder_name.trim().to_string();
    require_folder(&state, &folder)?;
    if body.recipients.is_empty() {
        return Err(ApiError::validation("recipients must not be empty"));
    }

    let root = &state.config.work_root;
    let stem = ulid::Ulid::new().to_string().to_lowercase();
    let data_rel = PathBuf::from(UPLOAD_DIR).join(format!("{stem}.email.json"));
    let results_rel = PathBuf::from(UPLOAD_DIR).join(format!("{stem}.results.json"));
    let data = serde_json::to_vec_pretty(&body.recipients)
        .map_err(|e| ApiError::internal(format!("encode recipients: {e}")))?;
    tokio::fs::create_dir_all(root.join(UPLOAD_DIR)).await?;
    tokio::fs::write(root.join(&data_rel), data).await?;

    let spec = worker_spec(&state, JobKind::EmailSend, &state.config.workers.email)
        .args([
            "--data".to_string(),
            data_rel.to_string_lossy().to_string(),
            "--folder".to_string(),
            root.join(&folder).to_string_lossy().to_string(),
            "--output".to_string(),
            results_rel.to_string_lossy().to_string(),
        ])
        .envs(state.notifications.worker_env())
        .remove_after(root.join(&data_rel))
        .result_file(root.join(&results_rel));
    let outcome = state.runner.run(spec).await;
    if !outcome.is_success() {
        return Err(ApiError::job(outcome));
    }

    let results = match outcome.result.as_deref().map(serde_json::from_str::<Value>) {
        Some(Ok(results)) => Some(results),
        Some(Err(e)) => {
            warn!(job_id = %outcome.job_id, "email results are not JSON: {e}");
            None
        }
        None => None,
    };
    info!(
        job_id = %outcome.job_id,
        folder = %folder,
        recipients = body.recipients.len(),
        "email batch finished"
    );
    Ok(Json(EmailSendResponse {
        folder_name: folder,
        recipient_count: body.recipients.len(),
        results,
        outcome: outcome.view(),
    }))
}

// ── Supervision ──────────────────────────────────────────────────────────────

/// GET /jobs/active
pub async fn active_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<ActiveJobView>> {
    Json(state.runner.active())
}

/// POST /jobs/{job_id}/cancel
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.runner.cancel(&job_id) {
        Ok(Json(json!({ "job_id": job_id, "cancelled": true })))
    } else {
        Err(ApiError::not_found(format!("no running job {job_id}")))
    }
}

// ── Folders ──────────────────────────────────────────────────────────────────

/// GET /jobs/folders
pub async fn list_folders(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<FolderSummary>>, ApiError> {
    let statuses = scan(&state, |inspector| inspector.list()).await??;
    Ok(Json(
        statuses
            .into_iter()
            .filter(|s| s.per_category_counts.total() > 0)
            .map(|s| FolderSummary {
                pdf_count: s.per_category_counts.total(),
                name: s.name,
            })
            .collect(),
    ))
}

/// GET /jobs/folders/enhanced
pub async fn list_folders_enhanced(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<EnhancedFolderStatus>>, ApiError> {
    Ok(Json(scan(&state, |inspector| inspector.list_enhanced()).await??))
}

/// GET /jobs/folders/{name}/contents
pub async fn folder_contents(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_folder(&state, &name)?;
    let folder = name.clone();
    let (files, status) = scan(&state, move |inspector| {
        (inspector.artifacts(&folder), inspector.inspect(&folder))
    })
    .await?;
    Ok(Json(json!({
        "folder": name,
        "files": files?,
        "counts": status.per_category_counts,
        "derived_status": status.derived_status,
    })))
}

/// GET /jobs/folders/{name}/sms-batch
pub async fn sms_batch(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    if !folders::is_valid_folder_name(&name) {
        return Err(ApiError::validation("folder name must be a single path component"));
    }
    let path = link_index::links_dir(&state.config.work_root, &name).join(link_index::SMS_BATCH_FILE);
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::not_found(format!("no SMS batch for {name}")));
        }
        Err(e) => return Err(e.into()),
    };
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{name}_sms_batch.csv\""),
            ),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

/// GET /jobs/folders/{name}/files/{category}/{file}
///
/// `category` is `main` for letters directly under the folder.
pub async fn folder_file(
    State(state): State<Arc<AppState>>,
    Path((name, category, file)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    require_folder(&state, &name)?;
    let location = match category.as_str() {
        "main" => ArtifactLocation::Main,
        "protected" => ArtifactLocation::Protected,
        "unprotected" => ArtifactLocation::Unprotected,
        "combined" => ArtifactLocation::Combined,
        other => return Err(ApiError::validation(format!("unknown category: {other}"))),
    };
    if !folders::is_valid_folder_name(&file)
        || file.starts_with('.')
        || file.contains('"')
        || !file.to_ascii_lowercase().ends_with(".pdf")
    {
        return Err(ApiError::validation("file must be a plain .pdf file name"));
    }

    let mut path = state.config.work_root.join(&name);
    if let Some(subdir) = location.subdir() {
        path.push(subdir);
    }
    path.push(&file);
    let handle = match tokio::fs::File::open(&path).await {
        Ok(handle) => handle,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::not_found(format!("no such file: {category}/{file}")));
        }
        Err(e) => return Err(e.into()),
    };
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file}\""),
            ),
        ],
        Body::from_stream(ReaderStream::new(handle)),
    )
        .into_response())
}

/// GET /jobs/templates
pub async fn list_templates(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<TemplateInfo>>, ApiError> {
    Ok(Json(
        templates::list_templates(&state.config.work_root, &state.config.workers).await?,
    ))
}

// ── Settings ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct NotificationUpdate {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// GET /settings/notification
pub async fn get_notification(
    State(state): State<Arc<AppState>>,
) -> Json<NotificationSettingsView> {
    Json(state.notifications.current())
}

/// PUT /settings/notification
pub async fn set_notification(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NotificationUpdate>,
) -> Result<Json<NotificationSettingsView>, ApiError> {
    state
        .notifications
        .set_recipient(&body.email, body.name.as_deref())?;
    let current = state.notifications.current();
    info!(email = %current.email, "notification recipient updated");
    Ok(Json(current))
}

// ── Status ───────────────────────────────────────────────────────────────────

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "running",
        "timestamp": state.clock.now(),
        "work_root": state.config.work_root.display().to_string(),
    }))
}

//! Shared types between the gateway and the operator frontend
//!
//! These types are used by both:
//! - the gateway service (native Rust, axum handlers)
//! - the operator UI (TypeScript, via the generated bindings)
//!
//! Serializable with serde for JSON over HTTP

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ============================================================================
// Jobs
// ============================================================================

/// Which external worker a job invokes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, TS)]
#[ts(export, export_to = "generated.ts")]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    Render,
    Combine,
    LinkGenerate,
    /// Bulk delivery of a folder's letters by email
    EmailSend,
    /// Delivery of a one-time login code
    OtpSend,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Render => "render",
            JobKind::Combine => "combine",
            JobKind::LinkGenerate => "link-generate",
            JobKind::EmailSend => "email-send",
            JobKind::OtpSend => "otp-send",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a worker process ended
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "generated.ts")]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExitStatus {
    Success,
    NonzeroExit { code: i32 },
    SpawnError { message: String },
    Timeout,
    /// Stopped through its handle before it finished
    Cancelled,
}

impl ExitStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ExitStatus::Success)
    }
}

/// Outcome of one worker invocation as reported to operators
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct JobOutcomeView {
    pub job_id: String,
    pub kind: JobKind,
    pub exit_status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    #[ts(type = "number")]
    pub wall_clock_millis: u64,
}

/// An in-flight job as listed by GET /jobs/active
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct ActiveJobView {
    pub job_id: String,
    pub kind: JobKind,
    pub started_at: DateTime<Utc>,
    #[ts(type = "number")]
    pub timeout_secs: u64,
}

/// POST /jobs/render
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct RenderJobRequest {
    /// Template script file name, e.g. `SPH_Fresh.py`
    pub template: String,
    /// Input spreadsheet, base64 encoded
    pub dataset_base64: String,
    /// Original file name of the dataset; only the extension is used
    #[serde(default)]
    pub dataset_name: Option<String>,
    #[serde(default)]
    pub output_folder: Option<String>,
}

/// POST /jobs/combine
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct CombineJobRequest {
    pub folder_name: String,
    pub output_name: String,
}

/// POST /jobs/link-generate
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct LinkGenerateRequest {
    pub folder_name: String,
    #[serde(default)]
    pub template: Option<String>,
}

/// POST /jobs/email-send
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct EmailSendRequest {
    pub folder_name: String,
    /// One entry per recipient, passed to the email worker untouched
    #[ts(type = "Array<Record<string, unknown>>")]
    pub recipients: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct EmailSendResponse {
    pub folder_name: String,
    pub recipient_count: usize,
    /// Whatever the worker wrote to its results file, if anything
    #[ts(type = "unknown")]
    pub results: Option<serde_json::Value>,
    pub outcome: JobOutcomeView,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct CombineJobResponse {
    pub folder_name: String,
    pub filename: String,
    pub full_path: String,
    pub pdf_count: usize,
    pub outcome: JobOutcomeView,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct LinkGenerateResponse {
    pub folder_name: String,
    pub link_count: usize,
    pub index: LinkIndexRecord,
    pub outcome: JobOutcomeView,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct TemplateInfo {
    pub filename: String,
    pub display_name: String,
}

// ============================================================================
// Folders & artifacts
// ============================================================================

/// Sub-category an artifact lives in
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, TS)]
#[ts(export, export_to = "generated.ts")]
#[serde(rename_all = "snake_case")]
pub enum ArtifactLocation {
    Main,
    Protected,
    Unprotected,
    Combined,
}

impl ArtifactLocation {
    /// Subdirectory name, `None` for artifacts directly under the folder
    pub fn subdir(&self) -> Option<&'static str> {
        match self {
            ArtifactLocation::Main => None,
            ArtifactLocation::Protected => Some("protected"),
            ArtifactLocation::Unprotected => Some("unprotected"),
            ArtifactLocation::Combined => Some("combined"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct ArtifactEntry {
    pub filename: String,
    pub path: String,
    #[ts(type = "number")]
    pub size: u64,
    pub location: ArtifactLocation,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct CategoryCounts {
    pub main: usize,
    pub protected: usize,
    pub unprotected: usize,
    pub combined: usize,
}

impl CategoryCounts {
    /// Largest letter category. `combined` holds merged output, not letters.
    pub fn max_letter_count(&self) -> usize {
        self.main.max(self.protected).max(self.unprotected)
    }

    pub fn total(&self) -> usize {
        self.main + self.protected + self.unprotected + self.combined
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "generated.ts")]
#[serde(rename_all = "snake_case")]
pub enum DerivedStatus {
    Complete,
    Partial,
    Unknown,
}

/// A point-in-time view of one output folder
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct FolderStatus {
    pub name: String,
    /// Advisory guess of the template that produced the folder
    pub template: Option<String>,
    pub primary_artifact_count: usize,
    pub per_category_counts: CategoryCounts,
    pub created_at: Option<DateTime<Utc>>,
    pub last_modified_at: Option<DateTime<Utc>>,
    pub derived_status: DerivedStatus,
}

/// Companion index written after a link-generation run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct LinkIndexRecord {
    pub folder_name: String,
    pub generated_at: DateTime<Utc>,
    pub link_count: usize,
    pub source_artifact_count_at_generation: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct EnhancedFolderStatus {
    #[serde(flatten)]
    pub status: FolderStatus,
    pub links_generated: bool,
    pub link_count: usize,
    pub links_up_to_date: bool,
    pub link_index: Option<LinkIndexRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct FolderSummary {
    pub name: String,
    pub pdf_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct ArtifactManifest {
    pub folder: String,
    pub files: Vec<ArtifactEntry>,
    pub counts: CategoryCounts,
    pub derived_status: DerivedStatus,
    pub outcome: JobOutcomeView,
}

// ============================================================================
// Auth
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct OtpRequest {
    pub identity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct OtpVerifyRequest {
    pub identity: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct PasswordLoginRequest {
    pub identity: String,
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct SessionGrant {
    pub token: String,
    pub identity: String,
    #[ts(type = "number")]
    pub idle_timeout_secs: u64,
}

/// Reason code attached to a 401 on operator routes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "generated.ts")]
#[serde(rename_all = "snake_case")]
pub enum AuthFailureReason {
    Missing,
    Expired,
    Revoked,
    Invalid,
}

impl AuthFailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthFailureReason::Missing => "missing",
            AuthFailureReason::Expired => "expired",
            AuthFailureReason::Revoked => "revoked",
            AuthFailureReason::Invalid => "invalid",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct SessionSummary {
    pub identity: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct NotificationSettingsView {
    pub email: String,
    pub name: String,
}

// ============================================================================
// Letter links
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "generated.ts")]
#[serde(rename_all = "snake_case")]
pub enum AccessDenialReason {
    NotFound,
    Expired,
    QuotaExhausted,
}

/// Audit view of a letter access record; never exposes the artifact path
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct LetterAccessView {
    pub id: String,
    pub expires_at: DateTime<Utc>,
    #[ts(type = "number")]
    pub max_access_count: u32,
    #[ts(type = "number")]
    pub access_count: u32,
}

use std::path::PathBuf;
use std::time::Duration;

use parking_lot::RwLock;
use shared_types::{JobKind, NotificationSettingsView};
use thiserror::Error;

/// Wall-clock ceilings per job kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobTimeouts {
    pub render: Duration,
    pub combine: Duration,
    pub link_generate: Duration,
    pub email_send: Duration,
    pub otp_send: Duration,
}

impl JobTimeouts {
    pub fn for_kind(&self, kind: JobKind) -> Duration {
        match kind {
            JobKind::Render => self.render,
            JobKind::Combine => self.combine,
            JobKind::LinkGenerate => self.link_generate,
            JobKind::EmailSend => self.email_send,
            JobKind::OtpSend => self.otp_send,
        }
    }
}

impl Default for JobTimeouts {
    fn default() -> Self {
        Self {
            render: Duration::from_secs(4 * 60 * 60),
            combine: Duration::from_secs(10 * 60),
            link_generate: Duration::from_secs(30 * 60),
            email_send: Duration::from_secs(60 * 60),
            otp_send: Duration::from_secs(60),
        }
    }
}

/// Script names for each external worker, resolved against the work root.
#[derive(Debug, Clone)]
pub struct WorkerScripts {
    /// Interpreter used to launch every script
    pub interpreter: String,
    pub render: String,
    pub combine: String,
    pub link_generate: String,
    pub email: String,
    pub otp: String,
}

impl Default for WorkerScripts {
    fn default() -> Self {
        Self {
            interpreter: "python".to_string(),
            render: "pdf_generator_wrapper.py".to_string(),
            combine: "combine_pdfs.py".to_string(),
            link_generate: "generate_sms_links.py".to_string(),
            email: "brevo_email_service.py".to_string(),
            otp: "send_otp_email.py".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Port the gateway listens on
    pub port: u16,
    /// Directory holding output folders, `letter_links/` and worker scripts
    pub work_root: PathBuf,
    pub workers: WorkerScripts,
    pub job_timeouts: JobTimeouts,
    /// HMAC key for session tokens
    pub session_secret: String,
    /// argon2 PHC string for the shared password-login secret
    pub login_password_hash: Option<String>,
    /// Identities allowed to authenticate
    pub authorized_users: Vec<String>,
    /// Base URL the link worker embeds in generated letter links
    pub letter_base_url: String,
    pub letter_link_ttl_days: i64,
    pub letter_max_access: u32,
    pub notify_email: String,
    pub notify_name: String,
    /// How often expired OTPs and sessions are swept
    pub sweep_interval: Duration,
    /// Browser origins allowed to call the API
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let session_secret = std::env::var("SESSION_SECRET")
            .map_err(|_| anyhow::anyhow!("SESSION_SECRET must be set"))?;
        if session_secret.len() < 16 {
            return Err(anyhow::anyhow!(
                "SESSION_SECRET must be at least 16 bytes"
            ));
        }

        let login_password_hash = match std::env::var("LOGIN_PASSWORD_HASH") {
            Ok(hash) => Some(hash),
            Err(_) => match std::env::var("LOGIN_PASSWORD") {
                Ok(plain) if !plain.is_empty() => Some(crate::auth::hash_password(&plain)?),
                _ => None,
            },
        };

        let defaults = WorkerScripts::default();
        let timeout_defaults = JobTimeouts::default();

        Ok(Self {
            port: env_parse("GATEWAY_PORT", 3001)?,
            work_root: PathBuf::from(env_str("GATEWAY_WORK_ROOT", ".")),
            workers: WorkerScripts {
                interpreter: env_str("WORKER_PYTHON", &defaults.interpreter),
                render: env_str("RENDER_WORKER_SCRIPT", &defaults.render),
                combine: env_str("COMBINE_WORKER_SCRIPT", &defaults.combine),
                link_generate: env_str("LINK_WORKER_SCRIPT", &defaults.link_generate),
                email: env_str("EMAIL_WORKER_SCRIPT", &defaults.email),
                otp: env_str("OTP_WORKER_SCRIPT", &defaults.otp),
            },
            job_timeouts: JobTimeouts {
                render: Duration::from_secs(env_parse(
                    "RENDER_TIMEOUT_SECS",
                    timeout_defaults.render.as_secs(),
                )?),
                combine: Duration::from_secs(env_parse(
                    "COMBINE_TIMEOUT_SECS",
                    timeout_defaults.combine.as_secs(),
                )?),
                link_generate: Duration::from_secs(env_parse(
                    "LINK_TIMEOUT_SECS",
                    timeout_defaults.link_generate.as_secs(),
                )?),
                email_send: Duration::from_secs(env_parse(
                    "EMAIL_TIMEOUT_SECS",
                    timeout_defaults.email_send.as_secs(),
                )?),
                otp_send: Duration::from_secs(env_parse(
                    "OTP_SEND_TIMEOUT_SECS",
                    timeout_defaults.otp_send.as_secs(),
                )?),
            },
            session_secret,
            login_password_hash,
            authorized_users: env_csv("AUTHORIZED_USERS", &[]),
            letter_base_url: env_str("LETTER_BASE_URL", "http://localhost:3001"),
            letter_link_ttl_days: env_parse("LETTER_LINK_TTL_DAYS", 30)?,
            letter_max_access: env_parse("LETTER_MAX_ACCESS", 10)?,
            notify_email: env_str("NOTIFY_EMAIL", "admin@niclmauritius.site"),
            notify_name: env_str("NOTIFY_NAME", "NICL User"),
            sweep_interval: Duration::from_secs(env_parse("SWEEP_INTERVAL_SECS", 300)?),
            allowed_origins: env_csv("CORS_ORIGINS", DEFAULT_ORIGINS),
        })
    }

    /// Defaults for everything but the work root and token key.
    pub fn local(work_root: impl Into<PathBuf>, session_secret: impl Into<String>) -> Self {
        Self {
            port: 3001,
            work_root: work_root.into(),
            workers: WorkerScripts::default(),
            job_timeouts: JobTimeouts::default(),
            session_secret: session_secret.into(),
            login_password_hash: None,
            authorized_users: Vec::new(),
            letter_base_url: "http://localhost:3001".to_string(),
            letter_link_ttl_days: 30,
            letter_max_access: 10,
            notify_email: "admin@niclmauritius.site".to_string(),
            notify_name: "NICL User".to_string(),
            sweep_interval: Duration::from_secs(300),
            allowed_origins: DEFAULT_ORIGINS.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

const DEFAULT_ORIGINS: &[&str] = &["http://localhost:3000", "http://127.0.0.1:3000"];

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}

fn env_csv(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect(),
        Err(_) => default.iter().map(|s| (*s).to_string()).collect(),
    }
}

// ── Runtime-settable notification recipient ──────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("a valid email address is required")]
    InvalidEmail,
}

/// Recipient of job-completion notifications sent by the workers.
///
/// Passed to workers as `USER_EMAIL` / `USER_NAME` on spawn; the process
/// environment itself is never touched.
#[derive(Debug)]
pub struct NotificationSettings {
    inner: RwLock<NotificationSettingsView>,
}

impl NotificationSettings {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(NotificationSettingsView {
                email: email.into(),
                name: name.into(),
            }),
        }
    }

    pub fn current(&self) -> NotificationSettingsView {
        self.inner.read().clone()
    }

    pub fn set_recipient(&self, email: &str, name: Option<&str>) -> Result<(), SettingsError> {
        let email = email.trim();
        if !looks_like_email(email) {
            return Err(SettingsError::InvalidEmail);
        }
        let mut guard = self.inner.write();
        guard.email = email.to_string();
        if let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) {
            guard.name = name.to_string();
        }
        Ok(())
    }

    /// Environment pairs handed to worker processes.
    pub fn worker_env(&self) -> Vec<(String, String)> {
        let current = self.inner.read();
        vec![
            ("USER_EMAIL".to_string(), current.email.clone()),
            ("USER_NAME".to_string(), current.name.clone()),
        ]
    }
}

fn looks_like_email(candidate: &str) -> bool {
    let Some((local, domain)) = candidate.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !candidate.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_differ_by_kind() {
        let t = JobTimeouts::default();
        assert!(t.for_kind(JobKind::Render) > t.for_kind(JobKind::Combine));
        assert!(t.for_kind(JobKind::Render) > t.for_kind(JobKind::LinkGenerate));
    }

    #[test]
    fn test_set_recipient_validates() {
        let settings = NotificationSettings::new("ops@nicl.mu", "Ops");
        assert_eq!(
            settings.set_recipient("not-an-address", None),
            Err(SettingsError::InvalidEmail)
        );
        assert_eq!(settings.current().email, "ops@nicl.mu");

        settings
            .set_recipient("  arrears@nicl.mu ", Some("Arrears Desk"))
            .unwrap();
        let current = settings.current();
        assert_eq!(current.email, "arrears@nicl.mu");
        assert_eq!(current.name, "Arrears Desk");
    }

    #[test]
    fn test_worker_env_reflects_latest_recipient() {
        let settings = NotificationSettings::new("a@nicl.mu", "A");
        settings.set_recipient("b@nicl.mu", None).unwrap();
        let env = settings.worker_env();
        assert!(env.contains(&("USER_EMAIL".to_string(), "b@nicl.mu".to_string())));
        assert!(env.contains(&("USER_NAME".to_string(), "A".to_string())));
    }
}

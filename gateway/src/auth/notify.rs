use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::JobKind;
use thiserror::Error;
use tracing::{info, warn};

use crate::jobs::{JobRunner, JobSpec};

#[derive(Debug, Error)]
#[error("otp delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Hands a freshly issued code to the identity out of band.
#[async_trait]
pub trait OtpNotifier: Send + Sync {
    async fn deliver(&self, identity: &str, code: &str) -> Result<(), DeliveryError>;
}

/// Runs the OTP mail worker: `<interpreter> <script> --email E --otp C`.
pub struct CommandNotifier {
    runner: Arc<JobRunner>,
    interpreter: String,
    script: String,
    working_dir: PathBuf,
    timeout: Duration,
}

impl CommandNotifier {
    pub fn new(
        runner: Arc<JobRunner>,
        interpreter: impl Into<String>,
        script: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            interpreter: interpreter.into(),
            script: script.into(),
            working_dir: working_dir.into(),
            timeout,
        }
    }
}

#[async_trait]
impl OtpNotifier for CommandNotifier {
    async fn deliver(&self, identity: &str, code: &str) -> Result<(), DeliveryError> {
        let spec = JobSpec::new(JobKind::OtpSend, &self.interpreter, &self.working_dir)
            .args([self.script.as_str(), "--email", identity, "--otp", code])
            .timeout(self.timeout)
            .env("PYTHONIOENCODING", "utf-8")
            .redact_args();
        let outcome = self.runner.run(spec).await;
        if outcome.is_success() {
            info!(identity, "otp handed to mail worker");
            return Ok(());
        }
        warn!(
            identity,
            status = ?outcome.exit_status,
            stderr = %outcome.stderr.trim(),
            "otp mail worker failed"
        );
        Err(DeliveryError(format!("{:?}", outcome.exit_status)))
    }
}

/// Keeps issued codes in memory instead of sending them.
#[derive(Default)]
pub struct MemoryNotifier {
    codes: Mutex<HashMap<String, String>>,
    failing: AtomicBool,
}

impl MemoryNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn last_code(&self, identity: &str) -> Option<String> {
        self.codes.lock().get(&super::normalize(identity)).cloned()
    }

    /// Make every subsequent delivery fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl OtpNotifier for MemoryNotifier {
    async fn deliver(&self, identity: &str, code: &str) -> Result<(), DeliveryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeliveryError("delivery disabled".to_string()));
        }
        self.codes
            .lock()
            .insert(super::normalize(identity), code.to_string());
        Ok(())
    }
}

//! External worker supervision.
//!
//! One [`JobSpec`] becomes exactly one child process. The runner never
//! retries and never inspects what the worker produced; callers hand the
//! output location to [`crate::folders`] once the job reports success.

use std::path::PathBuf;
use std::time::Duration;

use shared_types::{ExitStatus, JobKind, JobOutcomeView};

pub mod runner;
pub mod templates;
pub mod workspace;

pub use runner::{JobHandle, JobRunner};

/// Everything needed to launch one worker.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub kind: JobKind,
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub timeout: Duration,
    pub env: Vec<(String, String)>,
    /// Directory the worker writes into. Cleared before launch for
    /// render and combine jobs.
    pub output_dir: Option<PathBuf>,
    /// Keep arguments out of the logs (they carry a secret)
    pub redact_args: bool,
    /// Files deleted once the worker is gone, whether or not anyone still
    /// waits on the job.
    pub cleanup: Vec<PathBuf>,
    /// File the worker reports into. Read once it exits cleanly, then deleted.
    pub result_file: Option<PathBuf>,
}

impl JobSpec {
    pub fn new(kind: JobKind, program: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            timeout: Duration::from_secs(60),
            env: Vec::new(),
            output_dir: None,
            redact_args: false,
            cleanup: Vec::new(),
            result_file: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs(mut self, pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(pairs);
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn remove_after(mut self, path: impl Into<PathBuf>) -> Self {
        self.cleanup.push(path.into());
        self
    }

    pub fn result_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.result_file = Some(path.into());
        self
    }

    pub fn redact_args(mut self) -> Self {
        self.redact_args = true;
        self
    }

    /// Arguments as they may appear in logs.
    pub fn loggable_args(&self) -> Vec<String> {
        if self.redact_args {
            vec!["<redacted>".to_string()]
        } else {
            self.args.clone()
        }
    }

    /// Render and combine jobs own their output directory outright.
    pub fn clears_output(&self) -> bool {
        matches!(self.kind, JobKind::Render | JobKind::Combine)
    }
}

/// Immutable result of a finished worker.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: String,
    pub kind: JobKind,
    pub exit_status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub wall_clock: Duration,
    /// Contents of the spec's result file, when it exists after a clean exit
    pub result: Option<String>,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.exit_status.is_success()
    }

    pub fn view(&self) -> JobOutcomeView {
        JobOutcomeView {
            job_id: self.job_id.clone(),
            kind: self.kind,
            exit_status: self.exit_status.clone(),
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            wall_clock_millis: u64::try_from(self.wall_clock.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

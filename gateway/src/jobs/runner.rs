use std::{
    process::Stdio,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use shared_types::{ActiveJobView, ExitStatus, JobKind};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
    sync::oneshot,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{workspace, JobOutcome, JobSpec};

/// How long a cleanly exited worker's pipes get to drain.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

struct ActiveJob {
    kind: JobKind,
    started_at: DateTime<Utc>,
    timeout: Duration,
    cancel: CancellationToken,
}

/// Launches workers and tracks the ones still in flight.
#[derive(Default)]
pub struct JobRunner {
    active: DashMap<String, ActiveJob>,
}

impl JobRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Launch `spec` in the background and return a handle to it.
    pub fn submit(self: &Arc<Self>, spec: JobSpec) -> JobHandle {
        let job_id = ulid::Ulid::new().to_string().to_lowercase();
        let kind = spec.kind;
        let cancel = CancellationToken::new();

        self.active.insert(
            job_id.clone(),
            ActiveJob {
                kind,
                started_at: Utc::now(),
                timeout: spec.timeout,
                cancel: cancel.clone(),
            },
        );

        let (tx, rx) = oneshot::channel();
        let runner = Arc::clone(self);
        let task_id = job_id.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut cleanup = spec.cleanup.clone();
            let result_file = spec.result_file.clone();
            let mut outcome = execute(&task_id, spec, task_cancel).await;
            if let Some(path) = result_file {
                if outcome.is_success() {
                    outcome.result = workspace::read_result(&task_id, &path).await;
                }
                cleanup.push(path);
            }
            workspace::remove_files(&task_id, &cleanup).await;
            runner.active.remove(&task_id);
            // The caller may have stopped waiting; the outcome is logged either way.
            let _ = tx.send(outcome);
        });

        JobHandle {
            job_id,
            kind,
            cancel,
            done: rx,
        }
    }

    /// Launch `spec` and wait for it to finish.
    pub async fn run(self: &Arc<Self>, spec: JobSpec) -> JobOutcome {
        self.submit(spec).wait().await
    }

    /// Cancel an in-flight job by id. Returns false if it is not running.
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.active.get(job_id) {
            Some(job) => {
                job.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn active(&self) -> Vec<ActiveJobView> {
        let mut jobs: Vec<ActiveJobView> = self
            .active
            .iter()
            .map(|e| ActiveJobView {
                job_id: e.key().clone(),
                kind: e.kind,
                started_at: e.started_at,
                timeout_secs: e.timeout.as_secs(),
            })
            .collect();
        jobs.sort_by_key(|j| j.started_at);
        jobs
    }
}

/// A running job. Dropping the handle does not stop the worker.
pub struct JobHandle {
    job_id: String,
    kind: JobKind,
    cancel: CancellationToken,
    done: oneshot::Receiver<JobOutcome>,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.job_id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Ask the worker to stop. The outcome will be `Cancelled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn wait(self) -> JobOutcome {
        match self.done.await {
            Ok(outcome) => outcome,
            Err(_) => JobOutcome {
                job_id: self.job_id,
                kind: self.kind,
                exit_status: ExitStatus::SpawnError {
                    message: "job task ended without reporting an outcome".to_string(),
                },
                stdout: String::new(),
                stderr: String::new(),
                wall_clock: Duration::ZERO,
                result: None,
            },
        }
    }
}

// ── Output capture ───────────────────────────────────────────────────────────

#[derive(Default)]
struct Capture {
    text: String,
    sealed: bool,
}

type SharedCapture = Arc<Mutex<Capture>>;

/// Stop accepting output and hand back what arrived so far.
fn seal(capture: &SharedCapture) -> String {
    let mut guard = capture.lock();
    guard.sealed = true;
    std::mem::take(&mut guard.text)
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

fn spawn_reader<R>(reader: R, capture: SharedCapture, job_id: String, stream: Stream) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let chunk = String::from_utf8_lossy(&buf);
                    match stream {
                        Stream::Stdout => debug!(job_id = %job_id, "worker: {}", chunk.trim_end()),
                        Stream::Stderr => warn!(job_id = %job_id, "worker stderr: {}", chunk.trim_end()),
                    }
                    let mut guard = capture.lock();
                    if guard.sealed {
                        break;
                    }
                    guard.text.push_str(&chunk);
                }
                Err(e) => {
                    warn!(job_id = %job_id, ?stream, "stopped reading worker output: {e}");
                    break;
                }
            }
        }
    })
}

// ── Execution ────────────────────────────────────────────────────────────────

enum Ending {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

async fn execute(job_id: &str, spec: JobSpec, cancel: CancellationToken) -> JobOutcome {
    let started = Instant::now();
    let kind = spec.kind;
    let finish = |exit_status: ExitStatus, stdout: String, stderr: String| JobOutcome {
        job_id: job_id.to_string(),
        kind,
        exit_status,
        stdout,
        stderr,
        wall_clock: started.elapsed(),
        result: None,
    };

    if spec.clears_output() {
        if let Some(dir) = &spec.output_dir {
            if let Err(e) = workspace::prepare_output_dir(dir).await {
                error!(job_id, %kind, dir = %dir.display(), "cannot prepare output dir: {e}");
                return finish(
                    ExitStatus::SpawnError {
                        message: format!("cannot prepare output dir {}: {e}", dir.display()),
                    },
                    String::new(),
                    String::new(),
                );
            }
        }
    }

    info!(
        job_id,
        %kind,
        program = %spec.program,
        args = ?spec.loggable_args(),
        timeout_secs = spec.timeout.as_secs(),
        "launching worker"
    );

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .current_dir(&spec.working_dir)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // Own process group, so a kill also reaches whatever the worker spawned.
    #[cfg(unix)]
    command.process_group(0);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            error!(job_id, %kind, program = %spec.program, "failed to spawn worker: {e}");
            return finish(
                ExitStatus::SpawnError {
                    message: e.to_string(),
                },
                String::new(),
                String::new(),
            );
        }
    };

    let stdout_capture = SharedCapture::default();
    let stderr_capture = SharedCapture::default();
    let mut readers = Vec::with_capacity(2);
    if let Some(out) = child.stdout.take() {
        readers.push(spawn_reader(
            out,
            Arc::clone(&stdout_capture),
            job_id.to_string(),
            Stream::Stdout,
        ));
    }
    if let Some(err) = child.stderr.take() {
        readers.push(spawn_reader(
            err,
            Arc::clone(&stderr_capture),
            job_id.to_string(),
            Stream::Stderr,
        ));
    }

    let ending = tokio::select! {
        status = child.wait() => Ending::Exited(status),
        _ = tokio::time::sleep(spec.timeout) => Ending::TimedOut,
        _ = cancel.cancelled() => Ending::Cancelled,
    };

    let (exit_status, stdout, stderr) = match ending {
        Ending::Exited(status) => {
            let drained = tokio::time::timeout(DRAIN_GRACE, async {
                for reader in readers.iter_mut() {
                    let _ = reader.await;
                }
            })
            .await;
            if drained.is_err() {
                warn!(job_id, %kind, "worker pipes still open after exit, truncating capture");
            }
            let stdout = seal(&stdout_capture);
            let stderr = seal(&stderr_capture);
            let exit_status = match status {
                Ok(status) if status.success() => ExitStatus::Success,
                Ok(status) => ExitStatus::NonzeroExit {
                    code: status.code().unwrap_or(-1),
                },
                Err(e) => ExitStatus::SpawnError {
                    message: format!("lost track of worker: {e}"),
                },
            };
            (exit_status, stdout, stderr)
        }
        Ending::TimedOut => {
            warn!(job_id, %kind, timeout_secs = spec.timeout.as_secs(), "worker timed out, killing");
            let stdout = seal(&stdout_capture);
            let stderr = seal(&stderr_capture);
            terminate(job_id, &mut child).await;
            (ExitStatus::Timeout, stdout, stderr)
        }
        Ending::Cancelled => {
            warn!(job_id, %kind, "worker cancelled, killing");
            let stdout = seal(&stdout_capture);
            let stderr = seal(&stderr_capture);
            terminate(job_id, &mut child).await;
            (ExitStatus::Cancelled, stdout, stderr)
        }
    };

    for reader in &readers {
        reader.abort();
    }

    let outcome = finish(exit_status, stdout, stderr);
    info!(
        job_id,
        %kind,
        status = ?outcome.exit_status,
        elapsed_ms = outcome.wall_clock.as_millis() as u64,
        "worker finished"
    );
    outcome
}

async fn terminate(job_id: &str, child: &mut Child) {
    kill_group(job_id, child);
    if let Err(e) = child.kill().await {
        warn!(job_id, "failed to kill worker: {e}");
    }
}

/// SIGKILL everything in the worker's process group.
#[cfg(unix)]
fn kill_group(job_id: &str, child: &Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        debug!(job_id, pid, "could not signal worker process group: {e}");
    }
}

#[cfg(not(unix))]
fn kill_group(_job_id: &str, _child: &Child) {}

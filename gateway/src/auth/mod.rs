//! Operator authentication: emailed one-time codes, a shared password and
//! the bearer sessions both of them grant.
//!
//! Per identity an OTP goes `NoCode -> CodeIssued -> Verified | Expired |
//! AttemptsExhausted`. Sessions live until they sit idle for the session
//! TTL or their identity drops off the allow-list.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use shared_types::{AuthFailureReason, SessionGrant, SessionSummary};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::clock::SharedClock;
use crate::store::{Expiring, Step, TtlStore};

pub mod allow_list;
pub mod handlers;
pub mod notify;
pub mod token;

pub use allow_list::{normalize, AllowList};
pub use notify::{CommandNotifier, MemoryNotifier, OtpNotifier};
pub use token::TokenSigner;

pub const OTP_LENGTH: usize = 6;
pub const OTP_MAX_ATTEMPTS: u32 = 3;

pub fn otp_ttl() -> Duration {
    Duration::minutes(10)
}

pub fn session_ttl() -> Duration {
    Duration::hours(8)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("access denied")]
    NotAuthorized,
    #[error("no active code or session")]
    NotFound,
    #[error("expired")]
    Expired,
    #[error("too many failed attempts; request a new code")]
    AttemptsExhausted,
    #[error("incorrect code, {remaining} attempt(s) remaining")]
    InvalidCode { remaining: u32 },
    #[error("incorrect credentials")]
    InvalidPassword,
    #[error("malformed token")]
    Invalid,
    #[error("access revoked")]
    Revoked,
    #[error("could not deliver the code")]
    Delivery,
    #[error("internal error")]
    Internal,
}

impl AuthError {
    /// Reason code for a failed bearer check.
    pub fn session_reason(&self) -> AuthFailureReason {
        match self {
            AuthError::Expired => AuthFailureReason::Expired,
            AuthError::Revoked => AuthFailureReason::Revoked,
            _ => AuthFailureReason::Invalid,
        }
    }
}

/// argon2id PHC string for `password`.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| anyhow::anyhow!("password hashing failed: {e}"))
}

pub fn verify_password(password: &str, phc: &str) -> bool {
    match PasswordHash::new(phc) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            error!("stored password hash is unreadable: {e}");
            false
        }
    }
}

#[derive(Debug, Clone)]
struct OtpRecord {
    code: String,
    created_at: DateTime<Utc>,
    attempts_used: u32,
}

impl Expiring for OtpRecord {
    fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.created_at >= ttl
    }
}

#[derive(Debug, Clone)]
struct SessionRecord {
    identity: String,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
}

impl Expiring for SessionRecord {
    fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.last_activity_at >= ttl
    }
}

/// Identity attached to a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub identity: String,
    pub session_id: String,
    pub last_activity_at: DateTime<Utc>,
}

pub struct AuthSessionService {
    allow_list: Arc<AllowList>,
    otps: TtlStore<String, OtpRecord>,
    sessions: TtlStore<String, SessionRecord>,
    signer: TokenSigner,
    password_hash: Option<String>,
    notifier: Arc<dyn OtpNotifier>,
}

impl AuthSessionService {
    pub fn new(
        allow_list: Arc<AllowList>,
        signer: TokenSigner,
        password_hash: Option<String>,
        notifier: Arc<dyn OtpNotifier>,
        clock: SharedClock,
    ) -> Self {
        Self {
            allow_list,
            otps: TtlStore::new(otp_ttl(), clock.clone()),
            sessions: TtlStore::new(session_ttl(), clock),
            signer,
            password_hash,
            notifier,
        }
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    /// Issue a code to `identity` and hand it to the notifier. Replaces any
    /// code still live for that identity.
    pub async fn issue(&self, identity: &str) -> Result<(), AuthError> {
        let key = normalize(identity);
        if !self.allow_list.contains(&key) {
            warn!(identity = %key, "otp requested for identity outside allow-list");
            return Err(AuthError::NotAuthorized);
        }

        let code = generate_code();
        let record = OtpRecord {
            code: code.clone(),
            created_at: self.otps.now(),
            attempts_used: 0,
        };
        if self.otps.insert(key.clone(), record).is_some() {
            info!(identity = %key, "replaced live otp");
        }

        if let Err(e) = self.notifier.deliver(&key, &code).await {
            error!(identity = %key, "{e}");
            // Only drop the record this call created; a concurrent issue may
            // already have replaced it.
            self.otps.update(&key, |record, _| {
                if record.code == code {
                    Step::Remove(())
                } else {
                    Step::Keep(())
                }
            });
            return Err(AuthError::Delivery);
        }

        info!(identity = %key, "otp issued");
        Ok(())
    }

    /// Check `candidate` against the live code for `identity`; on a match
    /// the code is consumed and a session granted.
    pub fn verify(&self, identity: &str, candidate: &str) -> Result<SessionGrant, AuthError> {
        let key = normalize(identity);
        let candidate = candidate.trim();

        let checked = self.otps.update(&key, |record, liveness| {
            if liveness.expired {
                return Step::Remove(Err(AuthError::Expired));
            }
            if record.attempts_used >= OTP_MAX_ATTEMPTS {
                return Step::Remove(Err(AuthError::AttemptsExhausted));
            }
            if constant_time_eq(record.code.as_bytes(), candidate.as_bytes()) {
                return Step::Remove(Ok(()));
            }
            record.attempts_used += 1;
            if record.attempts_used >= OTP_MAX_ATTEMPTS {
                Step::Remove(Err(AuthError::AttemptsExhausted))
            } else {
                Step::Keep(Err(AuthError::InvalidCode {
                    remaining: OTP_MAX_ATTEMPTS - record.attempts_used - 1,
                }))
            }
        });

        match checked {
            None => Err(AuthError::NotFound),
            Some(Err(e)) => {
                warn!(identity = %key, "otp verification failed: {e}");
                Err(e)
            }
            Some(Ok(())) => {
                info!(identity = %key, "otp verified");
                Ok(self.open_session(key))
            }
        }
    }

    /// Log in with the shared password.
    pub async fn password_login(
        &self,
        identity: &str,
        secret: &str,
    ) -> Result<SessionGrant, AuthError> {
        let key = normalize(identity);
        if !self.allow_list.contains(&key) {
            warn!(identity = %key, "password login for identity outside allow-list");
            return Err(AuthError::NotAuthorized);
        }
        let Some(hash) = self.password_hash.clone() else {
            warn!("password login attempted but no password is configured");
            return Err(AuthError::InvalidPassword);
        };

        let secret = secret.to_string();
        let matches = tokio::task::spawn_blocking(move || verify_password(&secret, &hash))
            .await
            .map_err(|e| {
                error!("password check task failed: {e}");
                AuthError::Internal
            })?;
        if !matches {
            warn!(identity = %key, "password login rejected");
            return Err(AuthError::InvalidPassword);
        }

        info!(identity = %key, "password login");
        Ok(self.open_session(key))
    }

    /// Validate a bearer token and refresh its activity stamp.
    pub fn verify_session(&self, token: &str) -> Result<SessionIdentity, AuthError> {
        let session_id = self.signer.open(token).map_err(|_| AuthError::Invalid)?;
        let allow_list = &self.allow_list;
        // Rejected records stay put; only the sweep deletes them.
        let outcome = self.sessions.update(&session_id, |record, liveness| {
            if liveness.expired {
                return Step::Keep(Err(AuthError::Expired));
            }
            if !allow_list.contains(&record.identity) {
                return Step::Keep(Err(AuthError::Revoked));
            }
            record.last_activity_at = liveness.now;
            Step::Keep(Ok(SessionIdentity {
                identity: record.identity.clone(),
                session_id: session_id.clone(),
                last_activity_at: liveness.now,
            }))
        });
        match outcome {
            None => Err(AuthError::NotFound),
            Some(Err(e)) => {
                info!(session = %short(&session_id), "session rejected: {e}");
                Err(e)
            }
            Some(Ok(identity)) => Ok(identity),
        }
    }

    /// Drop the session behind `token`. Returns whether one existed.
    pub fn logout(&self, token: &str) -> bool {
        let Ok(session_id) = self.signer.open(token) else {
            return false;
        };
        let removed = self.sessions.remove(&session_id);
        if let Some(record) = &removed {
            info!(identity = %record.identity, "logged out");
        }
        removed.is_some()
    }

    /// Live sessions for monitoring; never exposes tokens.
    pub fn active_sessions(&self) -> Vec<SessionSummary> {
        let now = self.sessions.now();
        let ttl = self.sessions.ttl();
        let mut sessions: Vec<SessionSummary> = self
            .sessions
            .snapshot()
            .into_iter()
            .filter(|(_, r)| !r.is_expired(now, ttl) && self.allow_list.contains(&r.identity))
            .map(|(_, r)| SessionSummary {
                identity: r.identity,
                created_at: r.created_at,
                last_activity_at: r.last_activity_at,
            })
            .collect();
        sessions.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        sessions
    }

    /// Remove expired codes and idle sessions. Returns `(otps, sessions)`.
    pub fn sweep(&self) -> (usize, usize) {
        (self.otps.sweep(), self.sessions.sweep())
    }

    fn open_session(&self, identity: String) -> SessionGrant {
        let (session_id, token) = self.signer.mint();
        let now = self.sessions.now();
        self.sessions.insert(
            session_id,
            SessionRecord {
                identity: identity.clone(),
                created_at: now,
                last_activity_at: now,
            },
        );
        SessionGrant {
            token,
            identity,
            idle_timeout_secs: u64::try_from(session_ttl().num_seconds()).unwrap_or(0),
        }
    }
}

/// Periodically sweep expired codes and sessions.
pub async fn run_expiry_sweep(service: Arc<AuthSessionService>, period: StdDuration) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // first tick is immediate; skip it
    loop {
        interval.tick().await;
        let (otps, sessions) = service.sweep();
        if otps > 0 || sessions > 0 {
            info!(otps, sessions, "swept expired credentials");
        }
    }
}

fn generate_code() -> String {
    let n: u32 = rand::rng().random_range(0..1_000_000);
    format!("{n:0width$}", width = OTP_LENGTH)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn short(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

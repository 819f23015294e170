//! Unauthenticated, expiring, count-limited access to individual letters.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use rand::RngCore;
use shared_types::{AccessDenialReason, LetterAccessView};
use thiserror::Error;
use tracing::{debug, info};

use crate::clock::SharedClock;

pub mod handlers;
pub mod import;

pub const LETTER_ID_LEN: usize = 16;

/// Letter ids are 16 lowercase hex characters.
pub fn is_valid_letter_id(id: &str) -> bool {
    id.len() == LETTER_ID_LEN && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LetterAccessRecord {
    pub id: String,
    pub artifact: PathBuf,
    pub expires_at: DateTime<Utc>,
    pub max_access_count: u32,
    pub access_count: u32,
}

impl LetterAccessRecord {
    pub fn view(&self) -> LetterAccessView {
        LetterAccessView {
            id: self.id.clone(),
            expires_at: self.expires_at,
            max_access_count: self.max_access_count,
            access_count: self.access_count,
        }
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum AccessDenied {
    #[error("letter not found")]
    NotFound,
    #[error("letter link expired")]
    Expired,
    #[error("letter link has been used the maximum number of times")]
    QuotaExhausted,
}

impl AccessDenied {
    pub fn reason(&self) -> AccessDenialReason {
        match self {
            AccessDenied::NotFound => AccessDenialReason::NotFound,
            AccessDenied::Expired => AccessDenialReason::Expired,
            AccessDenied::QuotaExhausted => AccessDenialReason::QuotaExhausted,
        }
    }
}

/// Check-and-count gate in front of published letters.
///
/// Records are never removed: once expired or exhausted they stay for
/// audit and keep answering with the matching denial.
pub struct LinkAccessGuard {
    records: DashMap<String, LetterAccessRecord>,
    clock: SharedClock,
}

impl LinkAccessGuard {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            records: DashMap::new(),
            clock,
        }
    }

    /// Publish `artifact` under a fresh id.
    pub fn publish(&self, artifact: impl Into<PathBuf>, ttl: Duration, max_access: u32) -> LetterAccessRecord {
        let artifact = artifact.into();
        let expires_at = self.clock.now() + ttl;
        loop {
            let id = new_letter_id();
            if let Entry::Vacant(slot) = self.records.entry(id.clone()) {
                let record = LetterAccessRecord {
                    id,
                    artifact,
                    expires_at,
                    max_access_count: max_access,
                    access_count: 0,
                };
                slot.insert(record.clone());
                info!(letter = %record.id, %expires_at, max_access, "letter published");
                return record;
            }
        }
    }

    /// Adopt a record created elsewhere. An id already known keeps its
    /// current counters. Returns whether the record was new.
    pub fn adopt(&self, record: LetterAccessRecord) -> bool {
        if !is_valid_letter_id(&record.id) {
            return false;
        }
        match self.records.entry(record.id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
        }
    }

    /// Spend one access on `id` and return the artifact behind it.
    ///
    /// Expiry, quota and the increment are decided under the record's lock,
    /// so concurrent callers can never push `access_count` past the quota.
    pub fn consume(&self, id: &str) -> Result<PathBuf, AccessDenied> {
        if !is_valid_letter_id(id) {
            return Err(AccessDenied::NotFound);
        }
        let now = self.clock.now();
        let mut record = self.records.get_mut(id).ok_or(AccessDenied::NotFound)?;
        if now >= record.expires_at {
            debug!(letter = id, "denied: expired");
            return Err(AccessDenied::Expired);
        }
        if record.access_count >= record.max_access_count {
            debug!(letter = id, "denied: quota exhausted");
            return Err(AccessDenied::QuotaExhausted);
        }
        record.access_count += 1;
        info!(
            letter = id,
            access_count = record.access_count,
            max_access = record.max_access_count,
            "letter accessed"
        );
        Ok(record.artifact.clone())
    }

    /// Current state of `id` without spending an access.
    pub fn peek(&self, id: &str) -> Result<LetterAccessRecord, AccessDenied> {
        if !is_valid_letter_id(id) {
            return Err(AccessDenied::NotFound);
        }
        let record = self.records.get(id).ok_or(AccessDenied::NotFound)?.clone();
        if self.clock.now() >= record.expires_at {
            return Err(AccessDenied::Expired);
        }
        if record.access_count >= record.max_access_count {
            return Err(AccessDenied::QuotaExhausted);
        }
        Ok(record)
    }

    /// Audit listing, soonest expiry first.
    pub fn snapshot(&self) -> Vec<LetterAccessView> {
        let mut views: Vec<LetterAccessView> = self.records.iter().map(|r| r.view()).collect();
        views.sort_by(|a, b| a.expires_at.cmp(&b.expires_at).then_with(|| a.id.cmp(&b.id)));
        views
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn new_letter_id() -> String {
    let mut raw = [0u8; LETTER_ID_LEN / 2];
    rand::rng().fill_bytes(&mut raw);
    hex::encode(raw)
}

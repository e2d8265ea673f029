//! Audit/poison record kept per message identity once a failure is observed.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classification::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditStatus {
    /// Failed, left for redelivery
    Retrying,
    /// Acknowledged but kept for operator inspection
    Audited,
    /// Moved to the dead-letter destination
    DeadLettered,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Retrying => "retrying",
            AuditStatus::Audited => "audited",
            AuditStatus::DeadLettered => "dead_lettered",
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retrying" => Ok(AuditStatus::Retrying),
            "audited" => Ok(AuditStatus::Audited),
            "dead_lettered" => Ok(AuditStatus::DeadLettered),
            other => Err(format!("Unknown audit status: {}", other)),
        }
    }
}

/// Failure snapshot for one message identity.
///
/// `attempts` only grows. `originating_status`/`originating_reason` are fixed
/// by the first failure and never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub event_id: String,
    pub attempts: i32,
    pub enqueued_time_utc: DateTime<Utc>,
    pub poisoned_time_utc: Option<DateTime<Utc>>,
    pub skipped_time_utc: Option<DateTime<Utc>>,
    pub status: AuditStatus,
    pub reason: String,
    pub originating_status: AuditStatus,
    pub originating_reason: String,
    /// Raw message body, kept for forensic replay
    pub body: Vec<u8>,
    pub exception: Option<String>,
    pub skip_processing: bool,
}

impl AuditRecord {
    /// Record created on the first failed attempt.
    pub fn first_failure(
        event_id: impl Into<String>,
        body: Vec<u8>,
        enqueued_time_utc: DateTime<Utc>,
        status: AuditStatus,
        kind: ErrorKind,
        exception: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            attempts: 1,
            enqueued_time_utc,
            poisoned_time_utc: Some(now),
            skipped_time_utc: None,
            status,
            reason: kind.as_str().to_string(),
            originating_status: status,
            originating_reason: kind.as_str().to_string(),
            body,
            exception,
            skip_processing: false,
        }
    }

    /// Count another failed attempt and refresh the current status/reason.
    pub fn record_attempt(
        &mut self,
        status: AuditStatus,
        kind: ErrorKind,
        exception: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.attempts = self.attempts.saturating_add(1);
        self.status = status;
        self.reason = kind.as_str().to_string();
        if exception.is_some() {
            self.exception = exception;
        }
        if self.poisoned_time_utc.is_none() {
            self.poisoned_time_utc = Some(now);
        }
    }

    /// Permanently abandon the message.
    pub fn mark_skipped(&mut self, status: AuditStatus, reason: impl Into<String>, now: DateTime<Utc>) {
        self.status = status;
        self.reason = reason.into();
        self.skip_processing = true;
        if self.skipped_time_utc.is_none() {
            self.skipped_time_utc = Some(now);
        }
    }

    /// Fold a newer snapshot of the same identity into this one, keeping the
    /// monotonic and immutable fields intact.
    pub fn merge_from(&mut self, newer: &AuditRecord) {
        self.attempts = self.attempts.max(newer.attempts);
        self.status = newer.status;
        self.reason = newer.reason.clone();
        if newer.exception.is_some() {
            self.exception = newer.exception.clone();
        }
        self.poisoned_time_utc = self.poisoned_time_utc.or(newer.poisoned_time_utc);
        self.skipped_time_utc = self.skipped_time_utc.or(newer.skipped_time_utc);
        self.skip_processing = self.skip_processing || newer.skip_processing;
    }
}

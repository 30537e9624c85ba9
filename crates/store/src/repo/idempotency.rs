//! Idempotency log — the durable side of the at-most-once-effective
//! guarantee.
//!
//! Key is `(session, step, attempt)`. [`IdempotencyLog::begin`] is an
//! atomic check-and-insert: exactly one caller per key ever observes
//! [`Gate::Proceed`]; everyone else sees the prior state. The JSONL
//! file records every status change (last record per key wins on
//! reload).

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    Started,
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub session_id: String,
    pub step: String,
    pub attempt: u32,
    pub status: IdempotencyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// What `begin` tells the dispatcher to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    /// First caller for this key — run the step.
    Proceed,
    /// A prior attempt already succeeded; skip, optionally reusing the
    /// recorded digest.
    SkipSucceeded(Option<String>),
    /// Another invocation holds the started row right now.
    Busy,
    /// A prior attempt failed; the retry policy decides what happens.
    PriorError,
}

type Key = (String, String, u32);

pub struct IdempotencyLog {
    records: Mutex<HashMap<Key, IdempotencyRecord>>,
    log_path: PathBuf,
    file_lock: Mutex<()>,
}

impl IdempotencyLog {
    pub fn open(state_path: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(state_path)?;
        let log_path = state_path.join("idempotency.jsonl");

        let mut records: HashMap<Key, IdempotencyRecord> = HashMap::new();
        if log_path.exists() {
            let raw = std::fs::read_to_string(&log_path)?;
            for line in raw.lines() {
                if let Ok(rec) = serde_json::from_str::<IdempotencyRecord>(line) {
                    records.insert(
                        (rec.session_id.clone(), rec.step.clone(), rec.attempt),
                        rec,
                    );
                }
            }
        }
        tracing::info!(
            records = records.len(),
            path = %log_path.display(),
            "idempotency log loaded"
        );

        Ok(Self {
            records: Mutex::new(records),
            log_path,
            file_lock: Mutex::new(()),
        })
    }

    /// Atomic check-and-insert of the `started` row.
    pub fn begin(&self, session_id: &str, step: &str, attempt: u32) -> Gate {
        let key = (session_id.to_owned(), step.to_owned(), attempt);
        let record = {
            let mut records = self.records.lock();
            match records.get(&key) {
                Some(rec) => {
                    return match rec.status {
                        IdempotencyStatus::Success => {
                            Gate::SkipSucceeded(rec.digest.clone())
                        }
                        IdempotencyStatus::Started => Gate::Busy,
                        IdempotencyStatus::Error => Gate::PriorError,
                    }
                }
                None => {
                    let rec = IdempotencyRecord {
                        session_id: session_id.to_owned(),
                        step: step.to_owned(),
                        attempt,
                        status: IdempotencyStatus::Started,
                        digest: None,
                        updated_at: Utc::now(),
                    };
                    records.insert(key, rec.clone());
                    rec
                }
            }
        };
        self.persist(&record);
        Gate::Proceed
    }

    /// Record the terminal status for a key previously handed out by
    /// `begin`.
    pub fn finish(
        &self,
        session_id: &str,
        step: &str,
        attempt: u32,
        status: IdempotencyStatus,
        digest: Option<String>,
    ) {
        let key = (session_id.to_owned(), step.to_owned(), attempt);
        let record = {
            let mut records = self.records.lock();
            match records.get_mut(&key) {
                Some(rec) => {
                    rec.status = status;
                    rec.digest = digest;
                    rec.updated_at = Utc::now();
                    rec.clone()
                }
                None => {
                    // A finish without begin is a webhook callback for a
                    // row lost to a restart; record it anyway.
                    let rec = IdempotencyRecord {
                        session_id: session_id.to_owned(),
                        step: step.to_owned(),
                        attempt,
                        status,
                        digest,
                        updated_at: Utc::now(),
                    };
                    records.insert(key, rec.clone());
                    rec
                }
            }
        };
        self.persist(&record);
    }

    pub fn get(
        &self,
        session_id: &str,
        step: &str,
        attempt: u32,
    ) -> Option<IdempotencyRecord> {
        self.records
            .lock()
            .get(&(session_id.to_owned(), step.to_owned(), attempt))
            .cloned()
    }

    /// Highest attempt recorded for `(session, step)`, if any.
    pub fn last_attempt(&self, session_id: &str, step: &str) -> Option<u32> {
        self.records
            .lock()
            .keys()
            .filter(|(s, st, _)| s == session_id && st == step)
            .map(|(_, _, a)| *a)
            .max()
    }

    fn persist(&self, record: &IdempotencyRecord) {
        let _guard = self.file_lock.lock();
        let line = match serde_json::to_string(record) {
            Ok(l) => l,
            Err(_) => return,
        };
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .and_then(|mut f| writeln!(f, "{line}"));
        if let Err(e) = result {
            tracing::warn!(error = %e, "idempotency log append failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> (tempfile::TempDir, IdempotencyLog) {
        let dir = tempfile::tempdir().unwrap();
        let log = IdempotencyLog::open(dir.path()).unwrap();
        (dir, log)
    }

    #[test]
    fn first_begin_proceeds_second_is_busy() {
        let (_dir, log) = log();
        assert_eq!(log.begin("s1", "search", 1), Gate::Proceed);
        assert_eq!(log.begin("s1", "search", 1), Gate::Busy);
    }

    #[test]
    fn success_skips_forever() {
        let (_dir, log) = log();
        assert_eq!(log.begin("s1", "search", 1), Gate::Proceed);
        log.finish(
            "s1",
            "search",
            1,
            IdempotencyStatus::Success,
            Some("abc".into()),
        );
        assert_eq!(
            log.begin("s1", "search", 1),
            Gate::SkipSucceeded(Some("abc".into()))
        );
    }

    #[test]
    fn error_reports_prior_error() {
        let (_dir, log) = log();
        log.begin("s1", "search", 1);
        log.finish("s1", "search", 1, IdempotencyStatus::Error, None);
        assert_eq!(log.begin("s1", "search", 1), Gate::PriorError);
        // A fresh attempt number proceeds.
        assert_eq!(log.begin("s1", "search", 2), Gate::Proceed);
        assert_eq!(log.last_attempt("s1", "search"), Some(2));
    }

    #[test]
    fn parallel_begin_has_single_winner() {
        use std::sync::Arc;
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(IdempotencyLog::open(dir.path()).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let log = log.clone();
                std::thread::spawn(move || log.begin("s1", "quote", 1))
            })
            .collect();
        let proceeds = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|g| *g == Gate::Proceed)
            .count();
        assert_eq!(proceeds, 1);
    }

    #[test]
    fn reload_keeps_latest_status() {
        let dir = tempfile::tempdir().unwrap();
        {
            let log = IdempotencyLog::open(dir.path()).unwrap();
            log.begin("s1", "search", 1);
            log.finish(
                "s1",
                "search",
                1,
                IdempotencyStatus::Success,
                Some("d1".into()),
            );
        }
        let log = IdempotencyLog::open(dir.path()).unwrap();
        assert_eq!(
            log.begin("s1", "search", 1),
            Gate::SkipSucceeded(Some("d1".into()))
        );
    }
}

//! The fast key/value store.
//!
//! An in-process engine with the contract the kernel needs from its
//! "current state" tier: per-entry TTL, an atomic compare-and-swap
//! primitive, monotonic counters, and prefix scans. All mutations take
//! the write lock, so a CAS observes and replaces the value in one
//! atomic step — the same guarantee a server-side CAS script gives
//! multiple process instances racing on a shared store.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Outcome of a compare-and-swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    Swapped,
    /// The stored value did not match; carries the current value
    /// (`None` = key absent or expired).
    Mismatch(Option<String>),
}

#[derive(Default)]
pub struct FastStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl FastStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        if !entry.live(Instant::now()) {
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn set(&self, key: &str, value: impl Into<String>) {
        self.entries.write().insert(
            key.to_owned(),
            Entry {
                value: value.into(),
                expires_at: None,
            },
        );
    }

    pub fn set_with_ttl(&self, key: &str, value: impl Into<String>, ttl: Duration) {
        self.entries.write().insert(
            key.to_owned(),
            Entry {
                value: value.into(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
    }

    /// Extend the entry's TTL to at least `ttl` from now. Returns false
    /// when the key is absent or already expired.
    pub fn refresh_ttl(&self, key: &str, ttl: Duration) -> bool {
        let mut entries = self.entries.write();
        let now = Instant::now();
        match entries.get_mut(key) {
            Some(entry) if entry.live(now) => {
                let candidate = now + ttl;
                entry.expires_at = match entry.expires_at {
                    Some(current) if current > candidate => Some(current),
                    _ => Some(candidate),
                };
                true
            }
            _ => false,
        }
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        let entry = self.entries.write().remove(key)?;
        entry.live(Instant::now()).then_some(entry.value)
    }

    /// Atomically increment the counter at `key`, creating it at 1.
    pub fn incr(&self, key: &str) -> u64 {
        let mut entries = self.entries.write();
        let now = Instant::now();
        let next = entries
            .get(key)
            .filter(|e| e.live(now))
            .and_then(|e| e.value.parse::<u64>().ok())
            .unwrap_or(0)
            + 1;
        entries.insert(
            key.to_owned(),
            Entry {
                value: next.to_string(),
                expires_at: None,
            },
        );
        next
    }

    /// Compare-and-swap: replace the value at `key` with `new` only if
    /// the current value equals `expected` (`None` = key must be absent).
    /// Read and write happen under one write-lock acquisition.
    pub fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
    ) -> CasOutcome {
        let mut entries = self.entries.write();
        let now = Instant::now();
        let current = entries
            .get(key)
            .filter(|e| e.live(now))
            .map(|e| e.value.clone());

        if current.as_deref() != expected {
            return CasOutcome::Mismatch(current);
        }

        // Preserve any live TTL across the swap.
        let expires_at = entries
            .get(key)
            .and_then(|e| e.expires_at)
            .filter(|at| *at > now);
        entries.insert(
            key.to_owned(),
            Entry {
                value: new.to_owned(),
                expires_at,
            },
        );
        CasOutcome::Swapped
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let entries = self.entries.read();
        let now = Instant::now();
        entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.live(now))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Drop expired entries. Called from the tempo clock sweep.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write();
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, e| e.live(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_remove() {
        let store = FastStore::new();
        store.set("k", "v");
        assert_eq!(store.get("k").as_deref(), Some("v"));
        assert_eq!(store.remove("k").as_deref(), Some("v"));
        assert_eq!(store.get("k"), None);
    }

    #[test]
    fn expired_entries_read_as_absent() {
        let store = FastStore::new();
        store.set_with_ttl("k", "v", Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.get("k"), None);
        assert_eq!(store.purge_expired(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn refresh_extends_but_never_shortens() {
        let store = FastStore::new();
        store.set_with_ttl("k", "v", Duration::from_secs(3600));
        assert!(store.refresh_ttl("k", Duration::from_secs(1)));
        // Still alive well past the one-second refresh request.
        assert_eq!(store.get("k").as_deref(), Some("v"));
        assert!(!store.refresh_ttl("missing", Duration::from_secs(1)));
    }

    #[test]
    fn cas_swaps_only_on_match() {
        let store = FastStore::new();
        assert_eq!(store.compare_and_swap("k", None, "a"), CasOutcome::Swapped);
        assert_eq!(
            store.compare_and_swap("k", Some("a"), "b"),
            CasOutcome::Swapped
        );
        assert_eq!(
            store.compare_and_swap("k", Some("a"), "c"),
            CasOutcome::Mismatch(Some("b".into()))
        );
        assert_eq!(store.get("k").as_deref(), Some("b"));
    }

    #[test]
    fn cas_expects_absent_key() {
        let store = FastStore::new();
        store.set("k", "x");
        assert_eq!(
            store.compare_and_swap("k", None, "y"),
            CasOutcome::Mismatch(Some("x".into()))
        );
    }

    #[test]
    fn cas_races_have_one_winner() {
        use std::sync::Arc;
        let store = Arc::new(FastStore::new());
        store.set("fsm", "start");

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                store.compare_and_swap("fsm", Some("start"), &format!("next-{i}"))
            }));
        }
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| *o == CasOutcome::Swapped)
            .count();
        assert_eq!(wins, 1);
    }

    #[test]
    fn incr_is_monotonic() {
        let store = FastStore::new();
        assert_eq!(store.incr("tick"), 1);
        assert_eq!(store.incr("tick"), 2);
        assert_eq!(store.incr("tick"), 3);
    }

    #[test]
    fn prefix_scan() {
        let store = FastStore::new();
        store.set("session:t1:a", "1");
        store.set("session:t1:b", "2");
        store.set("session:t2:c", "3");
        let mut keys = store.keys_with_prefix("session:t1:");
        keys.sort();
        assert_eq!(keys, vec!["session:t1:a", "session:t1:b"]);
    }
}

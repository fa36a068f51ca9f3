use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ncmonitor_core::{PollResult, ServerState};
use tracing::debug;

/// Latest poll state per server.
///
/// Entries are immutable `Arc<ServerState>` values replaced as a whole, so a
/// reader holding an entry never sees a half-written update. Cloning the
/// store shares the same map.
#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    entries: Arc<DashMap<String, Arc<ServerState>>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `result` as the latest for `server`, last writer wins
    pub fn record(&self, server: &str, result: PollResult) -> Arc<ServerState> {
        let next = match self.entries.entry(server.to_string()) {
            Entry::Occupied(mut occupied) => {
                let next = Arc::new(ServerState::advance(Some(occupied.get()), result));
                occupied.insert(next.clone());
                next
            }
            Entry::Vacant(vacant) => {
                let next = Arc::new(ServerState::new(result));
                vacant.insert(next.clone());
                next
            }
        };

        debug!(
            server,
            ok = next.is_connected(),
            failures = next.consecutive_failures,
            "Store updated"
        );
        next
    }

    pub fn get(&self, server: &str) -> Option<Arc<ServerState>> {
        self.entries.get(server).map(|entry| entry.value().clone())
    }

    pub fn latest(&self, server: &str) -> Option<PollResult> {
        self.get(server).map(|state| state.latest.clone())
    }

    /// All entries, sorted by server name
    pub fn all(&self) -> Vec<(String, Arc<ServerState>)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn remove(&self, server: &str) -> Option<Arc<ServerState>> {
        self.entries.remove(server).map(|(_, state)| state)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when `server` has no successful snapshot younger than `max_age`
    pub fn is_stale(&self, server: &str, max_age: Duration, now_ms: u64) -> bool {
        self.get(server)
            .and_then(|state| state.success_age_ms(now_ms))
            .map_or(true, |age| age > max_age.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ncmonitor_core::{parse_serverinfo, FailureKind};

    const FIXTURE: &str = include_str!("../../ncmonitor-core/fixtures/serverinfo.json");

    fn ok(server: &str, fetched_at_ms: u64) -> PollResult {
        PollResult::Ok(parse_serverinfo(server, fetched_at_ms, FIXTURE).unwrap())
    }

    fn failed(failed_at_ms: u64) -> PollResult {
        PollResult::Failed {
            kind: FailureKind::NetworkUnreachable,
            message: "connection refused".to_string(),
            failed_at_ms,
        }
    }

    #[test]
    fn test_record_replaces_latest() {
        let store = SnapshotStore::new();
        store.record("a", ok("a", 1_000));
        store.record("a", failed(2_000));

        let state = store.get("a").unwrap();
        assert_eq!(state.latest.failure_kind(), Some(FailureKind::NetworkUnreachable));
        assert_eq!(state.latest.timestamp_ms(), 2_000);
        assert_eq!(state.last_success.as_ref().unwrap().fetched_at_ms, 1_000);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_servers_are_independent() {
        let store = SnapshotStore::new();
        store.record("good", ok("good", 1_000));
        store.record("bad", failed(1_000));
        store.record("bad", failed(2_000));

        assert!(store.latest("good").unwrap().is_ok());
        assert!(!store.latest("bad").unwrap().is_ok());
        assert_eq!(store.get("bad").unwrap().consecutive_failures, 2);

        let names: Vec<String> = store.all().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["bad", "good"]);
    }

    #[test]
    fn test_reader_keeps_its_entry_across_updates() {
        let store = SnapshotStore::new();
        store.record("a", ok("a", 1_000));

        let before = store.get("a").unwrap();
        store.record("a", failed(2_000));

        assert!(before.is_connected());
        assert!(!store.get("a").unwrap().is_connected());
    }

    #[test]
    fn test_staleness() {
        let store = SnapshotStore::new();
        assert!(store.is_stale("a", Duration::from_secs(60), 10_000));

        store.record("a", ok("a", 10_000));
        assert!(!store.is_stale("a", Duration::from_secs(60), 40_000));
        assert!(store.is_stale("a", Duration::from_secs(60), 80_000));

        store.record("b", failed(10_000));
        assert!(store.is_stale("b", Duration::from_secs(60), 10_000));
    }

    #[test]
    fn test_remove() {
        let store = SnapshotStore::new();
        store.record("a", failed(1));
        assert!(store.remove("a").is_some());
        assert!(store.is_empty());
        assert!(store.get("a").is_none());
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        let store = SnapshotStore::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for n in 0..200u64 {
                        if i % 2 == 0 {
                            store.record("shared", failed(n));
                        } else if let Some(state) = store.get("shared") {
                            // A reader sees a complete entry
                            assert!(state.consecutive_failures >= 1);
                            assert!(!state.is_connected());
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.get("shared").unwrap().consecutive_failures, 800);
    }
}

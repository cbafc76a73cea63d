//! In-memory [`HotStore`] fake (§9, §11).
//!
//! Keyed exactly like the real keyspace in §6 so tests exercise the same
//! addressing scheme a networked backend would use.

use async_trait::async_trait;
use pbars_errors::PbarsError;
use pbars_ids::TraceId;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tokio::sync::broadcast;

use crate::model::{StepHash, TraceHash, TraceUpdate};
use crate::store::HotStore;

const CHANNEL_CAPACITY: usize = 64;

type TraceKey = (String, String, TraceId);
type BarVersionKey = (String, String, u64);

#[derive(Default)]
struct State {
    traces: HashMap<TraceKey, TraceHash>,
    steps: HashMap<(TraceKey, u32), StepHash>,
    sorted_sets: HashMap<BarVersionKey, BTreeMap<TraceId, f64>>,
    monthly_counters: HashMap<(i32, u8, String), i64>,
    channels: HashMap<TraceKey, broadcast::Sender<TraceUpdate>>,
}

/// A single-process, `Mutex`-guarded stand-in for the networked hot store.
pub struct InMemoryHotStore {
    state: Mutex<State>,
}

impl Default for InMemoryHotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryHotStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("hot store mutex poisoned")
    }
}

#[async_trait]
impl HotStore for InMemoryHotStore {
    async fn get_trace(
        &self,
        owner: &str,
        bar_name: &str,
        trace_uid: TraceId,
    ) -> Result<Option<TraceHash>, PbarsError> {
        let key = (owner.to_string(), bar_name.to_string(), trace_uid);
        Ok(self.lock().traces.get(&key).copied())
    }

    async fn cas_trace(
        &self,
        owner: &str,
        bar_name: &str,
        trace_uid: TraceId,
        expected_last_updated_at: Option<f64>,
        new: TraceHash,
    ) -> Result<bool, PbarsError> {
        let key = (owner.to_string(), bar_name.to_string(), trace_uid);
        {
            let mut state = self.lock();
            let current = state.traces.get(&key).map(|t| t.last_updated_at);
            let matches = match (expected_last_updated_at, current) {
                (None, None) => true,
                (Some(expected), Some(actual)) => (expected - actual).abs() < f64::EPSILON,
                _ => false,
            };
            if !matches {
                return Ok(false);
            }
            state.traces.insert(key, new);
        }
        self.publish_trace_update(TraceUpdate {
            owner: owner.to_string(),
            bar_name: bar_name.to_string(),
            trace_uid,
        })
        .await?;
        Ok(true)
    }

    async fn get_step(
        &self,
        owner: &str,
        bar_name: &str,
        trace_uid: TraceId,
        position: u32,
    ) -> Result<Option<StepHash>, PbarsError> {
        let key = (owner.to_string(), bar_name.to_string(), trace_uid);
        Ok(self.lock().steps.get(&(key, position)).cloned())
    }

    async fn set_step(
        &self,
        owner: &str,
        bar_name: &str,
        trace_uid: TraceId,
        position: u32,
        step: StepHash,
    ) -> Result<(), PbarsError> {
        let key = (owner.to_string(), bar_name.to_string(), trace_uid);
        self.lock().steps.insert((key, position), step);
        self.publish_trace_update(TraceUpdate {
            owner: owner.to_string(),
            bar_name: bar_name.to_string(),
            trace_uid,
        })
        .await?;
        Ok(())
    }

    async fn expire_trace(
        &self,
        _owner: &str,
        _bar_name: &str,
        _trace_uid: TraceId,
        _ttl_seconds: f64,
    ) -> Result<(), PbarsError> {
        // The in-memory fake keeps entries for the process lifetime; a real
        // adapter issues `EXPIRE`. Tests assert on TTL *requests*, not on
        // actual eviction, so this is intentionally a no-op.
        Ok(())
    }

    async fn publish_trace_update(&self, update: TraceUpdate) -> Result<(), PbarsError> {
        let key = (update.owner.clone(), update.bar_name.clone(), update.trace_uid);
        let mut state = self.lock();
        let sender = state
            .channels
            .entry(key)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        // No subscribers is not an error: fire-and-forget per §4.C.
        let _ = sender.send(update);
        Ok(())
    }

    fn subscribe(&self, owner: &str, bar_name: &str, trace_uid: TraceId) -> broadcast::Receiver<TraceUpdate> {
        let key = (owner.to_string(), bar_name.to_string(), trace_uid);
        let mut state = self.lock();
        let sender = state
            .channels
            .entry(key)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    async fn sorted_set_add(
        &self,
        owner: &str,
        bar_name: &str,
        version: u64,
        score: f64,
        member: TraceId,
    ) -> Result<(), PbarsError> {
        let key = (owner.to_string(), bar_name.to_string(), version);
        self.lock().sorted_sets.entry(key).or_default().insert(member, score);
        Ok(())
    }

    async fn sorted_set_trim(
        &self,
        owner: &str,
        bar_name: &str,
        version: u64,
        min_score: f64,
    ) -> Result<(), PbarsError> {
        let key = (owner.to_string(), bar_name.to_string(), version);
        if let Some(set) = self.lock().sorted_sets.get_mut(&key) {
            set.retain(|_, score| *score >= min_score);
        }
        Ok(())
    }

    async fn sorted_set_count(&self, owner: &str, bar_name: &str, version: u64) -> Result<u64, PbarsError> {
        let key = (owner.to_string(), bar_name.to_string(), version);
        Ok(self.lock().sorted_sets.get(&key).map_or(0, |s| s.len() as u64))
    }

    async fn sorted_set_max_score(
        &self,
        owner: &str,
        bar_name: &str,
        version: u64,
    ) -> Result<Option<f64>, PbarsError> {
        let key = (owner.to_string(), bar_name.to_string(), version);
        Ok(self
            .lock()
            .sorted_sets
            .get(&key)
            .and_then(|s| s.values().copied().fold(None, |acc, v| match acc {
                None => Some(v),
                Some(m) if v > m => Some(v),
                Some(m) => Some(m),
            })))
    }

    async fn increment_monthly_counter(
        &self,
        year: i32,
        month: u8,
        owner_sub: &str,
    ) -> Result<i64, PbarsError> {
        let key = (year, month, owner_sub.to_string());
        let mut state = self.lock();
        let counter = state.monthly_counters.entry(key).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbars_ids::IdGenerator;

    fn trace_id() -> TraceId {
        IdGenerator::new().next_trace_id()
    }

    #[tokio::test]
    async fn cas_trace_creates_then_rejects_stale_write() {
        let store = InMemoryHotStore::new();
        let trace = trace_id();
        let v1 = TraceHash {
            version: 1,
            created_at: 1.0,
            last_updated_at: 1.0,
            current_step: 1,
            done: false,
        };
        assert!(store.cas_trace("alice", "build", trace, None, v1).await.unwrap());
        assert!(!store.cas_trace("alice", "build", trace, None, v1).await.unwrap());

        let v2 = TraceHash { last_updated_at: 2.0, ..v1 };
        assert!(store.cas_trace("alice", "build", trace, Some(1.0), v2).await.unwrap());
        assert!(!store.cas_trace("alice", "build", trace, Some(1.0), v2).await.unwrap());
    }

    #[tokio::test]
    async fn publish_then_subscribe_round_trips() {
        let store = InMemoryHotStore::new();
        let trace = trace_id();
        let mut rx = store.subscribe("alice", "build", trace);
        store
            .publish_trace_update(TraceUpdate {
                owner: "alice".to_string(),
                bar_name: "build".to_string(),
                trace_uid: trace,
            })
            .await
            .unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.trace_uid, trace);
    }

    #[tokio::test]
    async fn sorted_set_trim_drops_below_threshold() {
        let store = InMemoryHotStore::new();
        for (member_seed, score) in [(1u128, 0.0), (2, 5.0), (3, 10.0)] {
            store
                .sorted_set_add("alice", "build", 1, score, TraceId(pbars_ids::ExternalId::from_bits(member_seed)))
                .await
                .unwrap();
        }
        store.sorted_set_trim("alice", "build", 1, 5.0).await.unwrap();
        assert_eq!(store.sorted_set_count("alice", "build", 1).await.unwrap(), 2);
    }
}

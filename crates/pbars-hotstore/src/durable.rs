//! The durable relational store's trace-retention surface (§6, §11).
//!
//! The full durable contract (`progress_bars`, `progress_bar_steps`, the
//! billing-adjacent tables) is out of scope per §1; this crate only models
//! the slice the Sampling Policy and Predictor Engine actually read and
//! write — retained traces for a `(bar, version)`.

use async_trait::async_trait;
use pbars_errors::PbarsError;
use pbars_ids::{BarId, TraceId};
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct DurableTraceStep {
    pub position: u32,
    pub iterations: Option<u64>,
    pub started_at: f64,
    pub finished_at: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DurableTrace {
    pub trace_uid: TraceId,
    pub bar_id: BarId,
    pub version: u64,
    pub created_at: f64,
    pub steps: Vec<DurableTraceStep>,
}

/// The transactional relational contract this core depends on (§6).
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Inserts or replaces a retained trace. Idempotent: retaining the same
    /// `trace_uid` twice must leave the stored row unchanged (§8 property 5).
    async fn insert_trace(&self, trace: DurableTrace) -> Result<(), PbarsError>;

    async fn evict_trace(&self, bar_id: BarId, version: u64, trace_uid: TraceId) -> Result<(), PbarsError>;

    /// All retained traces for `(bar_id, version)` with `created_at >= since`,
    /// ordered by `created_at` ascending.
    async fn scan_retained(
        &self,
        bar_id: BarId,
        version: u64,
        since: f64,
    ) -> Result<Vec<DurableTrace>, PbarsError>;

    async fn retained_count(&self, bar_id: BarId, version: u64) -> Result<u64, PbarsError>;

    async fn oldest_retained(&self, bar_id: BarId, version: u64) -> Result<Option<DurableTrace>, PbarsError>;
}

type Key = (BarId, u64);

#[derive(Default)]
struct State {
    // BTreeMap keyed by (created_at bits, trace_uid bits) keeps retained
    // traces ordered by age without requiring `f64: Ord`.
    traces: std::collections::HashMap<Key, BTreeMap<(u64, u128), DurableTrace>>,
}

pub struct InMemoryDurableStore {
    state: Mutex<State>,
}

impl Default for InMemoryDurableStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDurableStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    fn order_key(trace: &DurableTrace) -> (u64, u128) {
        (trace.created_at.to_bits(), trace.trace_uid.0.as_bits())
    }
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
    async fn insert_trace(&self, trace: DurableTrace) -> Result<(), PbarsError> {
        let key = (trace.bar_id, trace.version);
        let order = Self::order_key(&trace);
        let mut state = self.state.lock().expect("durable store mutex poisoned");
        state.traces.entry(key).or_default().insert(order, trace);
        Ok(())
    }

    async fn evict_trace(&self, bar_id: BarId, version: u64, trace_uid: TraceId) -> Result<(), PbarsError> {
        let mut state = self.state.lock().expect("durable store mutex poisoned");
        if let Some(set) = state.traces.get_mut(&(bar_id, version)) {
            set.retain(|_, trace| trace.trace_uid != trace_uid);
        }
        Ok(())
    }

    async fn scan_retained(
        &self,
        bar_id: BarId,
        version: u64,
        since: f64,
    ) -> Result<Vec<DurableTrace>, PbarsError> {
        let state = self.state.lock().expect("durable store mutex poisoned");
        Ok(state
            .traces
            .get(&(bar_id, version))
            .into_iter()
            .flat_map(|set| set.values())
            .filter(|trace| trace.created_at >= since)
            .cloned()
            .collect())
    }

    async fn retained_count(&self, bar_id: BarId, version: u64) -> Result<u64, PbarsError> {
        let state = self.state.lock().expect("durable store mutex poisoned");
        Ok(state.traces.get(&(bar_id, version)).map_or(0, |s| s.len() as u64))
    }

    async fn oldest_retained(&self, bar_id: BarId, version: u64) -> Result<Option<DurableTrace>, PbarsError> {
        let state = self.state.lock().expect("durable store mutex poisoned");
        Ok(state
            .traces
            .get(&(bar_id, version))
            .and_then(|s| s.values().next())
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbars_ids::IdGenerator;

    fn trace(bar: BarId, created_at: f64, r#gen: &IdGenerator) -> DurableTrace {
        DurableTrace {
            trace_uid: r#gen.next_trace_id(),
            bar_id: bar,
            version: 1,
            created_at,
            steps: vec![],
        }
    }

    #[tokio::test]
    async fn oldest_retained_tracks_minimum_created_at() {
        let store = InMemoryDurableStore::new();
        let r#gen = IdGenerator::new();
        let bar = BarId(r#gen.next());
        store.insert_trace(trace(bar, 5.0, &r#gen)).await.unwrap();
        store.insert_trace(trace(bar, 1.0, &r#gen)).await.unwrap();
        store.insert_trace(trace(bar, 9.0, &r#gen)).await.unwrap();

        let oldest = store.oldest_retained(bar, 1).await.unwrap().unwrap();
        assert_eq!(oldest.created_at, 1.0);
        assert_eq!(store.retained_count(bar, 1).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn insert_is_idempotent_for_the_same_trace_uid() {
        let store = InMemoryDurableStore::new();
        let r#gen = IdGenerator::new();
        let bar = BarId(r#gen.next());
        let t = trace(bar, 5.0, &r#gen);
        store.insert_trace(t.clone()).await.unwrap();
        store.insert_trace(t).await.unwrap();
        assert_eq!(store.retained_count(bar, 1).await.unwrap(), 1);
    }
}

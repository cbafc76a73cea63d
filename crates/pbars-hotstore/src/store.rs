use async_trait::async_trait;
use pbars_errors::PbarsError;
use pbars_ids::TraceId;
use tokio::sync::broadcast;

use crate::model::{StepHash, TraceHash, TraceUpdate};

/// The hot key-value + pub/sub adapter (§4.C, §6). A real deployment backs
/// this with a networked store; [`crate::memory::InMemoryHotStore`] backs it
/// with process memory for tests and the `pbars inspect` CLI, per §9's "both
/// a real networked store and an in-memory fake" requirement.
///
/// `cas_trace` and `set_step` each publish exactly one notification on the
/// trace's channel once their write lands, per §4.C; implementations, not
/// callers, own that bookkeeping so it can never be forgotten at a call
/// site. A single step event that mutates both hashes therefore yields two
/// notifications, one per mutation.
#[async_trait]
pub trait HotStore: Send + Sync {
    async fn get_trace(
        &self,
        owner: &str,
        bar_name: &str,
        trace_uid: TraceId,
    ) -> Result<Option<TraceHash>, PbarsError>;

    /// Atomically applies `new` iff the stored `last_updated_at` equals
    /// `expected_last_updated_at` (`None` meaning "key must not exist yet").
    /// Returns `Ok(false)` on a lost race rather than an error — the caller
    /// (the intake state machine) decides whether and how to retry.
    async fn cas_trace(
        &self,
        owner: &str,
        bar_name: &str,
        trace_uid: TraceId,
        expected_last_updated_at: Option<f64>,
        new: TraceHash,
    ) -> Result<bool, PbarsError>;

    async fn get_step(
        &self,
        owner: &str,
        bar_name: &str,
        trace_uid: TraceId,
        position: u32,
    ) -> Result<Option<StepHash>, PbarsError>;

    async fn set_step(
        &self,
        owner: &str,
        bar_name: &str,
        trace_uid: TraceId,
        position: u32,
        step: StepHash,
    ) -> Result<(), PbarsError>;

    /// Applies a finite TTL to a trace's hashes (and its step hashes), per
    /// the completion grace window and idle-expiry rules in §4.D.
    async fn expire_trace(
        &self,
        owner: &str,
        bar_name: &str,
        trace_uid: TraceId,
        ttl_seconds: f64,
    ) -> Result<(), PbarsError>;

    async fn publish_trace_update(&self, update: TraceUpdate) -> Result<(), PbarsError>;

    /// Subscribes to `ps:trace:{owner}:{bar_name}:{trace_uid}`. Lagged
    /// subscribers observe `RecvError::Lagged` from the returned receiver,
    /// which the Subscription Fabric maps to its own `lagged` state (§4.G).
    fn subscribe(&self, owner: &str, bar_name: &str, trace_uid: TraceId) -> broadcast::Receiver<TraceUpdate>;

    async fn sorted_set_add(
        &self,
        owner: &str,
        bar_name: &str,
        version: u64,
        score: f64,
        member: TraceId,
    ) -> Result<(), PbarsError>;

    /// Trims entries scored below `min_score`, per the "now − max_age"
    /// retention window rule in §4.C.
    async fn sorted_set_trim(
        &self,
        owner: &str,
        bar_name: &str,
        version: u64,
        min_score: f64,
    ) -> Result<(), PbarsError>;

    async fn sorted_set_count(&self, owner: &str, bar_name: &str, version: u64) -> Result<u64, PbarsError>;

    async fn sorted_set_max_score(
        &self,
        owner: &str,
        bar_name: &str,
        version: u64,
    ) -> Result<Option<f64>, PbarsError>;

    async fn increment_monthly_counter(
        &self,
        year: i32,
        month: u8,
        owner_sub: &str,
    ) -> Result<i64, PbarsError>;
}

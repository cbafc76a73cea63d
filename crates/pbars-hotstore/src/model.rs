use pbars_ids::TraceId;
use std::fmt;

/// `trace:{owner}:{bar_name}:{trace_uid}` (§6).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceHash {
    /// The bar schema version this trace was first resolved against. An
    /// in-flight trace keeps running against this version even if the bar
    /// is republished with a newer one mid-trace (§4.B).
    pub version: u64,
    pub created_at: f64,
    pub last_updated_at: f64,
    pub current_step: u32,
    pub done: bool,
}

/// `trace:{owner}:{bar_name}:{trace_uid}:step:{position}` (§6).
#[derive(Debug, Clone, PartialEq)]
pub struct StepHash {
    pub step_name: String,
    pub iteration: Option<u64>,
    pub iterations: Option<u64>,
    pub started_at: f64,
    pub finished_at: Option<f64>,
}

/// One notification sent on `ps:trace:{owner}:{bar_name}:{trace_uid}`.
/// The payload is deliberately minimal — subscribers re-read the hash via
/// the adapter rather than trust a cached copy of the mutation (§4.G).
#[derive(Debug, Clone, PartialEq)]
pub struct TraceUpdate {
    pub owner: String,
    pub bar_name: String,
    pub trace_uid: TraceId,
}

impl fmt::Display for TraceUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ps:trace:{}:{}:{}", self.owner, self.bar_name, self.trace_uid)
    }
}

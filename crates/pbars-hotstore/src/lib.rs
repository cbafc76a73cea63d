//! Hot-state store adapter (component 4.C) and the durable-store retention
//! slice it hands completed traces off to (§6, §11).

mod durable;
mod memory;
mod model;
mod retry;
mod store;

pub use durable::{DurableStore, DurableTrace, DurableTraceStep, InMemoryDurableStore};
pub use memory::InMemoryHotStore;
pub use model::{StepHash, TraceHash, TraceUpdate};
pub use retry::retry_with_backoff;
pub use store::HotStore;

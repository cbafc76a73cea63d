//! Schema registry (component 4.B): resolving `(owner, bar_name)` to the
//! current [`BarSchema`], cached with explicit invalidation.

mod model;
mod registry;

pub use model::{
    BarSchema, BarSchemaError, SamplingConfig, SamplingTechnique, StepSpec, StepSpecError,
    Technique, DEFAULT_IDLE_BOUND_SECONDS,
};
pub use registry::{CacheStats, CachedRegistry, SchemaSource};

//! The three step events the intake state machine accepts (§4.D).

/// One update to a single (owner, bar_name, trace_uid)'s step sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum StepEvent {
    /// Opens `position`. `iterations` must be present iff the schema marks
    /// the step iterated — a mismatch is schema drift, not a validation error.
    StepStart {
        position: u32,
        step_name: String,
        iterations: Option<u64>,
    },
    /// Iterated steps only; `iteration` must advance past the stored value
    /// without exceeding `iterations`.
    StepProgress { position: u32, iteration: u64 },
    /// Closes the active step. For iterated steps the stored `iteration`
    /// must already equal `iterations`.
    StepFinish { position: u32 },
}

impl StepEvent {
    #[must_use]
    pub const fn position(&self) -> u32 {
        match self {
            Self::StepStart { position, .. }
            | Self::StepProgress { position, .. }
            | Self::StepFinish { position, .. } => *position,
        }
    }
}

use pbars_ids::BarId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A fitted-model family, keyed per §6's `technique_key` grammar.
///
/// `Percentile`'s payload is the integer percentile `P` in `0..=100`.
/// `BestFitLinear` is only valid on an iterated [`StepSpec`] — constructing
/// one on a one-off spec is rejected by [`StepSpec::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Technique {
    ArithmeticMean,
    GeometricMean,
    HarmonicMean,
    Percentile(u8),
    BestFitLinear,
}

impl Technique {
    #[must_use]
    pub const fn is_linear(self) -> bool {
        matches!(self, Self::BestFitLinear)
    }

    /// Renders the `technique_key` used in hot-store keys and `PredictorCell` identity.
    #[must_use]
    pub fn key(self) -> String {
        match self {
            Self::ArithmeticMean => "arithmetic_mean".to_string(),
            Self::GeometricMean => "geometric_mean".to_string(),
            Self::HarmonicMean => "harmonic_mean".to_string(),
            Self::BestFitLinear => "best_fit.linear".to_string(),
            Self::Percentile(p) => format!("percentile_{p}"),
        }
    }
}

impl fmt::Display for Technique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// One step of a progress bar, or the reserved position-0 "default spec"
/// that only carries the whole-trace estimation technique (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    pub position: u32,
    pub name: String,
    pub iterated: bool,
    pub technique: Technique,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepSpecError {
    LinearOnNonIterated,
    ReservedName,
    DefaultMustBeNonIterated,
}

impl fmt::Display for StepSpecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LinearOnNonIterated => {
                write!(f, "best_fit.linear requires an iterated step")
            }
            Self::ReservedName => write!(f, "'default' is a reserved step name"),
            Self::DefaultMustBeNonIterated => {
                write!(f, "the position-0 default spec is never iterated")
            }
        }
    }
}

impl std::error::Error for StepSpecError {}

impl StepSpec {
    pub fn new(
        position: u32,
        name: impl Into<String>,
        iterated: bool,
        technique: Technique,
    ) -> Result<Self, StepSpecError> {
        let name = name.into();
        if position != 0 && name == "default" {
            return Err(StepSpecError::ReservedName);
        }
        if position == 0 && iterated {
            return Err(StepSpecError::DefaultMustBeNonIterated);
        }
        if technique.is_linear() && !iterated {
            return Err(StepSpecError::LinearOnNonIterated);
        }
        Ok(Self {
            position,
            name,
            iterated,
            technique,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SamplingTechnique {
    Systematic,
    SimpleRandom,
}

/// `sampling_max_age_seconds ∈ ℕ⁺ ∪ {∞}` — `None` renders as the spec's ∞.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub max_count: u32,
    pub max_age_seconds: Option<f64>,
    pub technique: SamplingTechnique,
}

impl SamplingConfig {
    /// Falls back to 7 days, per §4.E and §4.C, when unbounded.
    #[must_use]
    pub fn effective_max_age_seconds(&self) -> f64 {
        const SEVEN_DAYS: f64 = 7.0 * 24.0 * 3600.0;
        self.max_age_seconds.unwrap_or(SEVEN_DAYS)
    }
}

/// Default trace idle bound when a bar doesn't set its own (§4.D).
pub const DEFAULT_IDLE_BOUND_SECONDS: f64 = 3600.0;

/// The resolved schema for one (owner, bar) at its current version (§4.B).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarSchema {
    pub bar_id: BarId,
    pub owner: String,
    pub bar_name: String,
    pub version: u64,
    pub sampling: SamplingConfig,
    /// Seconds of inactivity after which an in-flight trace is aborted
    /// rather than advanced (§4.D). Per-bar, not per-process, so traces on
    /// different bars handled by the same engine can use different bounds.
    pub idle_bound_seconds: f64,
    pub default_spec: StepSpec,
    /// Positions 1..K, sorted, contiguous — enforced by [`BarSchema::new`].
    pub steps: Vec<StepSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarSchemaError {
    NonContiguousPositions,
    DuplicatePosition(u32),
}

impl fmt::Display for BarSchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonContiguousPositions => write!(f, "step positions must be 1..K with no gaps"),
            Self::DuplicatePosition(p) => write!(f, "duplicate step position {p}"),
        }
    }
}

impl std::error::Error for BarSchemaError {}

impl BarSchema {
    pub fn new(
        bar_id: BarId,
        owner: impl Into<String>,
        bar_name: impl Into<String>,
        version: u64,
        sampling: SamplingConfig,
        idle_bound_seconds: f64,
        default_spec: StepSpec,
        mut steps: Vec<StepSpec>,
    ) -> Result<Self, BarSchemaError> {
        steps.sort_by_key(|s| s.position);
        for (expected, step) in (1u32..).zip(steps.iter()) {
            match step.position.cmp(&expected) {
                std::cmp::Ordering::Equal => {}
                std::cmp::Ordering::Less => {
                    return Err(BarSchemaError::DuplicatePosition(step.position));
                }
                std::cmp::Ordering::Greater => return Err(BarSchemaError::NonContiguousPositions),
            }
        }
        Ok(Self {
            bar_id,
            owner: owner.into(),
            bar_name: bar_name.into(),
            version,
            sampling,
            idle_bound_seconds,
            default_spec,
            steps,
        })
    }

    #[must_use]
    pub fn step_count(&self) -> u32 {
        self.steps.len() as u32
    }

    #[must_use]
    pub fn step(&self, position: u32) -> Option<&StepSpec> {
        if position == 0 {
            return Some(&self.default_spec);
        }
        self.steps.get(position.checked_sub(1)? as usize)
    }

    /// Canonical content hash of this schema's shape, used for cheap
    /// drift/version comparisons the way `packet::builder` hashes packet
    /// content with BLAKE3 over canonical JSON.
    #[must_use]
    pub fn content_hash(&self) -> String {
        let canon = serde_json_canonicalizer::to_vec(self).unwrap_or_default();
        blake3::hash(&canon).to_hex().to_string()
    }
}

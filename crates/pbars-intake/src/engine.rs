//! The trace intake state machine (§4.D): validates step events against a
//! bar's schema, drives `fresh -> running(step) -> completed | aborted`, and
//! hands completed traces off to whatever retains them.

use std::sync::Arc;

use pbars_errors::{DriftDetails, DriftReason, PbarsError, ValidationFailure};
use pbars_hotstore::{HotStore, StepHash, TraceHash};
use pbars_ids::{Clock, TraceId};
use pbars_schema::{BarSchema, CachedRegistry, SchemaSource};

use crate::events::StepEvent;

#[derive(Debug, Clone, PartialEq)]
pub struct CompletedTraceStep {
    pub position: u32,
    pub iterations: Option<u64>,
    pub started_at: f64,
    pub finished_at: f64,
}

/// A trace that just reached `done=true`, ready for the sampling policy to
/// decide whether to retain it. Carries the schema it was validated against
/// so a caller never has to re-resolve it (and risks a version mismatch).
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedTrace {
    pub owner: String,
    pub bar_name: String,
    pub trace_uid: TraceId,
    pub schema: BarSchema,
    pub steps: Vec<CompletedTraceStep>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IntakeOutcome {
    /// The event was applied; the trace is still running.
    Applied,
    Completed(CompletedTrace),
    /// `last_updated_at` was older than the idle bound; the event was
    /// dropped and the hot-state entries were expired immediately.
    AbortedIdle,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntakeConfig {
    /// TTL applied to hot-state entries once a trace completes (§4.D).
    pub completion_grace_seconds: f64,
    /// Bounded retry budget for the `last_updated_at` compare-and-set (§4.D "tie-breaks").
    pub max_cas_attempts: u32,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            completion_grace_seconds: 300.0,
            max_cas_attempts: 5,
        }
    }
}

pub struct IntakeEngine<H: HotStore, S: SchemaSource> {
    hotstore: Arc<H>,
    registry: Arc<CachedRegistry<S>>,
    clock: Arc<dyn Clock>,
    config: IntakeConfig,
}

impl<H: HotStore, S: SchemaSource> IntakeEngine<H, S> {
    pub fn new(hotstore: Arc<H>, registry: Arc<CachedRegistry<S>>, clock: Arc<dyn Clock>) -> Self {
        Self::with_config(hotstore, registry, clock, IntakeConfig::default())
    }

    pub fn with_config(
        hotstore: Arc<H>,
        registry: Arc<CachedRegistry<S>>,
        clock: Arc<dyn Clock>,
        config: IntakeConfig,
    ) -> Self {
        Self {
            hotstore,
            registry,
            clock,
            config,
        }
    }

    pub async fn handle_event(
        &self,
        owner: &str,
        bar_name: &str,
        trace_uid: TraceId,
        event: StepEvent,
    ) -> Result<IntakeOutcome, PbarsError> {
        // An in-flight trace keeps running against the version it was first
        // resolved with, rather than picking up a bar republish mid-trace
        // (§4.B, §4.C). Peek the trace once, up front, to decide which.
        let peeked = self.hotstore.get_trace(owner, bar_name, trace_uid).await?;
        let schema = match peeked {
            Some(trace) => self.registry.resolve_pinned(owner, bar_name, trace.version).await?,
            None => self.registry.resolve(owner, bar_name).await?,
        };

        for attempt in 1..=self.config.max_cas_attempts {
            let now = self.clock.now_seconds();
            let existing = self.hotstore.get_trace(owner, bar_name, trace_uid).await?;

            if let Some(trace) = existing {
                if !trace.done && now - trace.last_updated_at > schema.idle_bound_seconds {
                    self.hotstore.expire_trace(owner, bar_name, trace_uid, 0.0).await?;
                    return Ok(IntakeOutcome::AbortedIdle);
                }
            }

            let (new_trace, new_step) = self
                .compute_transition(&schema, owner, bar_name, trace_uid, existing, &event, now)
                .await?;

            let expected = existing.map(|t| t.last_updated_at);
            let cas_won = self
                .hotstore
                .cas_trace(owner, bar_name, trace_uid, expected, new_trace)
                .await?;
            if !cas_won {
                tracing::debug!(%trace_uid, attempt, "lost trace CAS race, retrying");
                continue;
            }

            self.hotstore
                .set_step(owner, bar_name, trace_uid, event.position(), new_step)
                .await?;

            if new_trace.done {
                self.hotstore
                    .expire_trace(owner, bar_name, trace_uid, self.config.completion_grace_seconds)
                    .await?;
                let completed = self.collect_completed_trace(owner, bar_name, trace_uid, schema).await?;
                return Ok(IntakeOutcome::Completed(completed));
            }
            return Ok(IntakeOutcome::Applied);
        }

        Err(PbarsError::Conflict {
            trace_uid: trace_uid.to_string(),
            attempts: self.config.max_cas_attempts,
        })
    }

    /// Validates `event` against `schema` and the trace's current hot-state,
    /// and computes the hash values a winning CAS would write. Does not
    /// itself write anything.
    async fn compute_transition(
        &self,
        schema: &BarSchema,
        owner: &str,
        bar_name: &str,
        trace_uid: TraceId,
        existing: Option<TraceHash>,
        event: &StepEvent,
        now: f64,
    ) -> Result<(TraceHash, StepHash), PbarsError> {
        if let Some(trace) = existing {
            if now < trace.last_updated_at {
                return Err(PbarsError::ValidationError(ValidationFailure::NonMonotonicTimestamp {
                    position: event.position(),
                    previous: trace.last_updated_at,
                    got: now,
                }));
            }
        }

        match *event {
            StepEvent::StepStart {
                position,
                ref step_name,
                iterations,
            } => self.compute_start(schema, owner, bar_name, existing, position, step_name, iterations, now),
            StepEvent::StepProgress { position, iteration } => {
                self.compute_progress(schema, owner, bar_name, trace_uid, existing, position, iteration, now)
                    .await
            }
            StepEvent::StepFinish { position } => {
                self.compute_finish(schema, owner, bar_name, trace_uid, existing, position, now).await
            }
        }
    }

    fn compute_start(
        &self,
        schema: &BarSchema,
        owner: &str,
        bar_name: &str,
        existing: Option<TraceHash>,
        position: u32,
        step_name: &str,
        iterations: Option<u64>,
        now: f64,
    ) -> Result<(TraceHash, StepHash), PbarsError> {
        let spec = schema.step(position).ok_or_else(|| {
            PbarsError::SchemaDrift(DriftDetails {
                owner: owner.to_string(),
                bar_name: bar_name.to_string(),
                observed_version: schema.version,
                reason: DriftReason::UnknownPosition { position },
            })
        })?;
        if spec.name != step_name {
            return Err(PbarsError::SchemaDrift(DriftDetails {
                owner: owner.to_string(),
                bar_name: bar_name.to_string(),
                observed_version: schema.version,
                reason: DriftReason::NameMismatch {
                    position,
                    expected: spec.name.clone(),
                    actual: step_name.to_string(),
                },
            }));
        }
        if spec.iterated != iterations.is_some() {
            return Err(PbarsError::SchemaDrift(DriftDetails {
                owner: owner.to_string(),
                bar_name: bar_name.to_string(),
                observed_version: schema.version,
                reason: DriftReason::IteratedMismatch {
                    position,
                    expected_iterated: spec.iterated,
                },
            }));
        }

        match existing {
            None if position != 1 => {
                return Err(PbarsError::ValidationError(ValidationFailure::TraceNotFresh {
                    expected_first_position: 1,
                }));
            }
            Some(trace) if trace.done => {
                return Err(PbarsError::ValidationError(ValidationFailure::NoActiveStep { position }));
            }
            Some(trace) if position != trace.current_step + 1 => {
                return Err(PbarsError::ValidationError(ValidationFailure::OutOfOrderStart {
                    expected_position: trace.current_step + 1,
                    got: position,
                }));
            }
            _ => {}
        }

        let new_trace = TraceHash {
            version: existing.map_or(schema.version, |t| t.version),
            created_at: existing.map_or(now, |t| t.created_at),
            last_updated_at: now,
            current_step: position,
            done: false,
        };
        let new_step = StepHash {
            step_name: step_name.to_string(),
            iteration: spec.iterated.then_some(0),
            iterations,
            started_at: now,
            finished_at: None,
        };
        Ok((new_trace, new_step))
    }

    async fn compute_progress(
        &self,
        schema: &BarSchema,
        owner: &str,
        bar_name: &str,
        trace_uid: TraceId,
        existing: Option<TraceHash>,
        position: u32,
        iteration: u64,
        now: f64,
    ) -> Result<(TraceHash, StepHash), PbarsError> {
        let trace = existing
            .filter(|t| !t.done && t.current_step == position)
            .ok_or(PbarsError::ValidationError(ValidationFailure::NoActiveStep { position }))?;
        let spec = schema
            .step(position)
            .ok_or_else(|| PbarsError::Internal("active step position missing from its own schema".to_string()))?;
        if !spec.iterated {
            return Err(PbarsError::ValidationError(ValidationFailure::NoActiveStep { position }));
        }

        let stored = self
            .hotstore
            .get_step(owner, bar_name, trace_uid, position)
            .await?
            .ok_or_else(|| PbarsError::Internal("active step has no hot-state row".to_string()))?;
        let stored_iteration = stored.iteration.unwrap_or(0);
        if iteration <= stored_iteration {
            return Err(PbarsError::ValidationError(ValidationFailure::IterationNotMonotonic {
                position,
                stored: stored_iteration,
                got: iteration,
            }));
        }
        let iterations = stored
            .iterations
            .ok_or_else(|| PbarsError::Internal("iterated step missing its iterations total".to_string()))?;
        if iteration > iterations {
            return Err(PbarsError::ValidationError(ValidationFailure::IterationExceedsTotal {
                position,
                iterations,
                got: iteration,
            }));
        }

        let new_trace = TraceHash {
            last_updated_at: now,
            ..trace
        };
        let new_step = StepHash {
            iteration: Some(iteration),
            finished_at: None,
            ..stored
        };
        Ok((new_trace, new_step))
    }

    async fn compute_finish(
        &self,
        schema: &BarSchema,
        owner: &str,
        bar_name: &str,
        trace_uid: TraceId,
        existing: Option<TraceHash>,
        position: u32,
        now: f64,
    ) -> Result<(TraceHash, StepHash), PbarsError> {
        let trace = existing
            .filter(|t| !t.done && t.current_step == position)
            .ok_or(PbarsError::ValidationError(ValidationFailure::NoActiveStep { position }))?;
        let spec = schema
            .step(position)
            .ok_or_else(|| PbarsError::Internal("active step position missing from its own schema".to_string()))?;
        let stored = self
            .hotstore
            .get_step(owner, bar_name, trace_uid, position)
            .await?
            .ok_or_else(|| PbarsError::Internal("active step has no hot-state row".to_string()))?;

        if spec.iterated {
            let stored_iteration = stored.iteration.unwrap_or(0);
            let iterations = stored
                .iterations
                .ok_or_else(|| PbarsError::Internal("iterated step missing its iterations total".to_string()))?;
            if stored_iteration != iterations {
                return Err(PbarsError::ValidationError(ValidationFailure::FinishBeforeLastIteration {
                    position,
                    iterations,
                    at: stored_iteration,
                }));
            }
        }

        let is_last = position == schema.step_count();
        let new_trace = TraceHash {
            last_updated_at: now,
            done: is_last,
            ..trace
        };
        let new_step = StepHash {
            finished_at: Some(now),
            ..stored
        };
        Ok((new_trace, new_step))
    }

    async fn collect_completed_trace(
        &self,
        owner: &str,
        bar_name: &str,
        trace_uid: TraceId,
        schema: BarSchema,
    ) -> Result<CompletedTrace, PbarsError> {
        let mut steps = Vec::with_capacity(schema.step_count() as usize);
        for position in 1..=schema.step_count() {
            let step = self
                .hotstore
                .get_step(owner, bar_name, trace_uid, position)
                .await?
                .ok_or_else(|| PbarsError::Internal(format!("completed trace missing step {position}")))?;
            let finished_at = step
                .finished_at
                .ok_or_else(|| PbarsError::Internal(format!("completed trace step {position} never finished")))?;
            steps.push(CompletedTraceStep {
                position,
                iterations: step.iterations,
                started_at: step.started_at,
                finished_at,
            });
        }
        Ok(CompletedTrace {
            owner: owner.to_string(),
            bar_name: bar_name.to_string(),
            trace_uid,
            schema,
            steps,
        })
    }
}

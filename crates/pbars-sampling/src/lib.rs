//! Sampling policy (component 4.E): decides whether a completed trace is
//! retained and, if so, feeds it to the predictor engine.

use std::sync::Arc;

use pbars_errors::PbarsError;
use pbars_hotstore::{DurableStore, DurableTrace, DurableTraceStep, HotStore};
use pbars_ids::Clock;
use pbars_intake::CompletedTrace;
use pbars_predictor::PredictorEngine;
use pbars_schema::SamplingTechnique;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retained,
    Dropped,
}

fn to_durable(completed: &CompletedTrace) -> DurableTrace {
    DurableTrace {
        trace_uid: completed.trace_uid,
        bar_id: completed.schema.bar_id,
        version: completed.schema.version,
        created_at: completed.steps.first().map_or(0.0, |s| s.started_at),
        steps: completed
            .steps
            .iter()
            .map(|s| DurableTraceStep {
                position: s.position,
                iterations: s.iterations,
                started_at: s.started_at,
                finished_at: s.finished_at,
            })
            .collect(),
    }
}

/// Applies §4.E to a completed trace: `systematic` retains at most one trace
/// per `A/N`-second interval and evicts the oldest past `N`; `simple_random`
/// keeps a probabilistic window with no hard cap.
pub struct SamplingEngine<D: DurableStore> {
    durable: Arc<D>,
    hotstore: Arc<dyn HotStore>,
    predictor: Arc<PredictorEngine<D>>,
    clock: Arc<dyn Clock>,
}

impl<D: DurableStore> SamplingEngine<D> {
    #[must_use]
    pub fn new(
        durable: Arc<D>,
        hotstore: Arc<dyn HotStore>,
        predictor: Arc<PredictorEngine<D>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            durable,
            hotstore,
            predictor,
            clock,
        }
    }

    pub async fn consider(&self, completed: &CompletedTrace) -> Result<Decision, PbarsError> {
        match completed.schema.sampling.technique {
            SamplingTechnique::Systematic => self.consider_systematic(completed).await,
            SamplingTechnique::SimpleRandom => self.consider_simple_random(completed).await,
        }
    }

    fn completion_time(completed: &CompletedTrace, fallback: &Arc<dyn Clock>) -> f64 {
        completed.steps.last().map_or_else(|| fallback.now_seconds(), |s| s.finished_at)
    }

    async fn consider_systematic(&self, completed: &CompletedTrace) -> Result<Decision, PbarsError> {
        let owner = &completed.owner;
        let bar_name = &completed.bar_name;
        let version = completed.schema.version;
        let bar_id = completed.schema.bar_id;
        let sampling = &completed.schema.sampling;
        let max_count = sampling.max_count as f64;
        let interval = sampling.effective_max_age_seconds() / max_count;
        let now = Self::completion_time(completed, &self.clock);

        let last_retained_at = self.hotstore.sorted_set_max_score(owner, bar_name, version).await?;
        let should_retain = last_retained_at.is_none_or(|last| now - last >= interval);
        if !should_retain {
            tracing::debug!(%owner, %bar_name, version, "dropping trace, inside systematic interval");
            return Ok(Decision::Dropped);
        }

        let durable_trace = to_durable(completed);
        self.durable.insert_trace(durable_trace.clone()).await?;
        self.hotstore
            .sorted_set_add(owner, bar_name, version, now, completed.trace_uid)
            .await?;
        self.predictor.retain(&completed.schema, durable_trace).await?;

        while self.durable.retained_count(bar_id, version).await? > sampling.max_count as u64 {
            let Some(oldest) = self.durable.oldest_retained(bar_id, version).await? else {
                break;
            };
            self.predictor.evict(&completed.schema, &oldest).await?;
            self.durable.evict_trace(bar_id, version, oldest.trace_uid).await?;
        }

        Ok(Decision::Retained)
    }

    async fn consider_simple_random(&self, completed: &CompletedTrace) -> Result<Decision, PbarsError> {
        let owner = &completed.owner;
        let bar_name = &completed.bar_name;
        let version = completed.schema.version;
        let sampling = &completed.schema.sampling;
        let max_count = sampling.max_count as f64;
        let now = Self::completion_time(completed, &self.clock);

        self.hotstore
            .sorted_set_trim(owner, bar_name, version, now - sampling.effective_max_age_seconds())
            .await?;
        let window_count = self.hotstore.sorted_set_count(owner, bar_name, version).await? as f64;
        let n = window_count + 1.0;
        let retention_probability = if n <= max_count { 1.0 } else { max_count / n };

        let draw: f64 = rand::random();
        if draw >= retention_probability {
            tracing::debug!(%owner, %bar_name, version, retention_probability, "dropping trace, lost simple_random draw");
            return Ok(Decision::Dropped);
        }

        let durable_trace = to_durable(completed);
        self.durable.insert_trace(durable_trace.clone()).await?;
        self.hotstore
            .sorted_set_add(owner, bar_name, version, now, completed.trace_uid)
            .await?;
        self.predictor.retain(&completed.schema, durable_trace).await?;
        Ok(Decision::Retained)
    }
}

//! The predictor engine (component 4.F): turns retained traces into live
//! per-step and whole-trace duration estimates.

use crate::accumulator::Accumulator;
use pbars_errors::PbarsError;
use pbars_hotstore::{DurableStore, DurableTrace};
use pbars_ids::{BarId, TraceId};
use pbars_schema::{BarSchema, Technique};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

/// How long a stale percentile cell's last known estimate is served before
/// the engine pays for a full rescan of the durable store (§4.F: "a burst of
/// evictions should not each trigger their own rescan").
pub const DEFAULT_MIN_RECOMPUTE_INTERVAL_SECONDS: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CellTarget {
    Step(u32),
    WholeDefault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CellKey {
    bar_id: BarId,
    version: u64,
    target: CellTarget,
}

struct Cell {
    accumulator: Accumulator,
    cached_estimate: Option<f64>,
    last_recompute_at: f64,
}

impl Cell {
    fn new(technique: Technique) -> Self {
        Self {
            accumulator: Accumulator::new(technique),
            cached_estimate: None,
            last_recompute_at: 0.0,
        }
    }
}

fn step_duration(step: &pbars_hotstore::DurableTraceStep) -> f64 {
    (step.finished_at - step.started_at).max(0.0)
}

/// Tracks running per-cell statistics for every `(bar, version)` this
/// process has seen a retained or evicted trace for, plus a small
/// sum-of-per-step cache for the canonical whole-trace estimate.
pub struct PredictorEngine<D: DurableStore> {
    durable: Arc<D>,
    cells: Mutex<HashMap<CellKey, Cell>>,
    canonical_whole: Mutex<HashMap<(BarId, u64), Option<f64>>>,
    applied: Mutex<HashSet<(BarId, u64, TraceId)>>,
    min_recompute_interval: f64,
}

impl<D: DurableStore> PredictorEngine<D> {
    #[must_use]
    pub fn new(durable: Arc<D>) -> Self {
        Self::with_min_recompute_interval(durable, DEFAULT_MIN_RECOMPUTE_INTERVAL_SECONDS)
    }

    #[must_use]
    pub fn with_min_recompute_interval(durable: Arc<D>, min_recompute_interval: f64) -> Self {
        Self {
            durable,
            cells: Mutex::new(HashMap::new()),
            canonical_whole: Mutex::new(HashMap::new()),
            applied: Mutex::new(HashSet::new()),
            min_recompute_interval,
        }
    }

    /// Folds a completed, retained trace into every per-step cell it touches
    /// plus the whole-default cell. Persists the trace to the durable store
    /// first. Idempotent: retaining the same `trace_uid` twice is a no-op on
    /// the second call (§8 property 5).
    pub async fn retain(&self, schema: &BarSchema, trace: DurableTrace) -> Result<(), PbarsError> {
        let identity = (trace.bar_id, trace.version, trace.trace_uid);
        {
            let mut applied = self.applied.lock().await;
            if !applied.insert(identity) {
                return Ok(());
            }
        }

        self.durable.insert_trace(trace.clone()).await?;

        let mut cells = self.cells.lock().await;
        let mut whole_default_total = 0.0;
        for step in &trace.steps {
            whole_default_total += step_duration(step);
            let Some(spec) = schema.step(step.position) else {
                continue;
            };
            let key = CellKey {
                bar_id: trace.bar_id,
                version: trace.version,
                target: CellTarget::Step(step.position),
            };
            let cell = cells.entry(key).or_insert_with(|| Cell::new(spec.technique));
            if spec.technique.is_linear() {
                let n = step.iterations.unwrap_or_default() as f64;
                cell.accumulator.add_pair(n, step_duration(step));
            } else {
                cell.accumulator.add(step_duration(step));
            }
        }

        let default_key = CellKey {
            bar_id: trace.bar_id,
            version: trace.version,
            target: CellTarget::WholeDefault,
        };
        let default_cell = cells
            .entry(default_key)
            .or_insert_with(|| Cell::new(schema.default_spec.technique));
        default_cell.accumulator.add(whole_default_total);
        drop(cells);

        self.canonical_whole
            .lock()
            .await
            .insert((trace.bar_id, trace.version), None);
        Ok(())
    }

    /// Reverses a previous [`Self::retain`] — used when the sampling policy
    /// evicts a trace that falls out of its retention window (§4.E).
    pub async fn evict(&self, schema: &BarSchema, trace: &DurableTrace) -> Result<(), PbarsError> {
        self.durable
            .evict_trace(trace.bar_id, trace.version, trace.trace_uid)
            .await?;

        let mut cells = self.cells.lock().await;
        let mut whole_default_total = 0.0;
        for step in &trace.steps {
            whole_default_total += step_duration(step);
            let Some(spec) = schema.step(step.position) else {
                continue;
            };
            let key = CellKey {
                bar_id: trace.bar_id,
                version: trace.version,
                target: CellTarget::Step(step.position),
            };
            if let Some(cell) = cells.get_mut(&key) {
                if spec.technique.is_linear() {
                    let n = step.iterations.unwrap_or_default() as f64;
                    cell.accumulator.remove_pair(n, step_duration(step));
                } else {
                    cell.accumulator.remove(step_duration(step));
                }
            }
        }
        let default_key = CellKey {
            bar_id: trace.bar_id,
            version: trace.version,
            target: CellTarget::WholeDefault,
        };
        if let Some(cell) = cells.get_mut(&default_key) {
            cell.accumulator.remove(whole_default_total);
        }
        drop(cells);

        self.applied
            .lock()
            .await
            .remove(&(trace.bar_id, trace.version, trace.trace_uid));
        self.canonical_whole
            .lock()
            .await
            .insert((trace.bar_id, trace.version), None);
        Ok(())
    }

    /// The current estimate for step `position`, recomputing a stale
    /// percentile cell from the durable store when due.
    pub async fn predict_step(
        &self,
        bar_id: BarId,
        version: u64,
        position: u32,
        now: f64,
    ) -> Result<Option<f64>, PbarsError> {
        self.predict_target(bar_id, version, CellTarget::Step(position), now).await
    }

    pub async fn predict_whole_default_technique(
        &self,
        bar_id: BarId,
        version: u64,
        now: f64,
    ) -> Result<Option<f64>, PbarsError> {
        self.predict_target(bar_id, version, CellTarget::WholeDefault, now).await
    }

    async fn predict_target(
        &self,
        bar_id: BarId,
        version: u64,
        target: CellTarget,
        now: f64,
    ) -> Result<Option<f64>, PbarsError> {
        let key = CellKey { bar_id, version, target };
        let needs_rescan = {
            let cells = self.cells.lock().await;
            match cells.get(&key) {
                None => return Ok(None),
                Some(cell) => {
                    cell.accumulator.is_stale() && now - cell.last_recompute_at >= self.min_recompute_interval
                }
            }
        };

        if needs_rescan {
            let CellTarget::Step(position) = target else {
                unreachable!("only percentile step cells go stale");
            };
            let retained = self.durable.scan_retained(bar_id, version, 0.0).await?;
            let samples: Vec<f64> = retained
                .iter()
                .flat_map(|t| t.steps.iter())
                .filter(|s| s.position == position)
                .map(step_duration)
                .collect();

            let mut cells = self.cells.lock().await;
            if let Some(cell) = cells.get_mut(&key) {
                cell.accumulator.rebuild_percentile(samples);
                cell.cached_estimate = cell.accumulator.estimate();
                cell.last_recompute_at = now;
            }
        }

        let cells = self.cells.lock().await;
        Ok(cells.get(&key).and_then(|cell| {
            if cell.accumulator.is_stale() {
                cell.cached_estimate
            } else {
                cell.accumulator.estimate()
            }
        }))
    }

    /// Predicts step `position`'s duration at a specific iteration count,
    /// using the fitted line when the step's technique is `best_fit.linear`.
    pub async fn predict_step_at(&self, bar_id: BarId, version: u64, position: u32, n: f64) -> Option<f64> {
        let key = CellKey {
            bar_id,
            version,
            target: CellTarget::Step(position),
        };
        let cells = self.cells.lock().await;
        cells.get(&key).and_then(|cell| cell.accumulator.predict_at(n))
    }

    /// The canonical whole-trace estimate: the sum of every step's own
    /// predicted duration. Cached and invalidated on any component step
    /// cell changing; recomputed lazily on the next call after invalidation.
    ///
    /// This is distinct from [`Self::predict_whole_default_technique`],
    /// which instead treats each retained trace's total observed duration
    /// as a single sample series under the bar's own default-spec technique.
    /// Both are exposed because the source material leaves open which one a
    /// caller means by "the whole trace's predicted duration" — a bar owner
    /// asking for a single number most likely wants the canonical sum, but
    /// one who configured `percentile_90` on the default spec clearly wants
    /// a percentile over observed totals, which only the second cell gives.
    pub async fn predict_whole(&self, schema: &BarSchema, now: f64) -> Result<Option<f64>, PbarsError> {
        let cache_key = (schema.bar_id, schema.version);
        if let Some(cached) = self.canonical_whole.lock().await.get(&cache_key).copied() {
            if let Some(value) = cached {
                return Ok(Some(value));
            }
        }

        let mut total = 0.0;
        let mut any_known = false;
        for step in &schema.steps {
            match self
                .predict_step(schema.bar_id, schema.version, step.position, now)
                .await?
            {
                Some(estimate) => {
                    total += estimate;
                    any_known = true;
                }
                None => return Ok(None),
            }
        }
        if !any_known {
            return Ok(None);
        }

        self.canonical_whole.lock().await.insert(cache_key, Some(total));
        Ok(Some(total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbars_hotstore::{DurableTraceStep, InMemoryDurableStore};
    use pbars_ids::IdGenerator;
    use pbars_schema::{SamplingConfig, SamplingTechnique, StepSpec};

    fn schema(r#gen: &IdGenerator) -> BarSchema {
        let default_spec = StepSpec::new(0, "default", false, Technique::ArithmeticMean).unwrap();
        let step1 = StepSpec::new(1, "download", false, Technique::ArithmeticMean).unwrap();
        let step2 = StepSpec::new(2, "extract", true, Technique::BestFitLinear).unwrap();
        BarSchema::new(
            r#gen.next_bar_id(),
            "acme",
            "build",
            1,
            SamplingConfig {
                max_count: 100,
                max_age_seconds: None,
                technique: SamplingTechnique::Systematic,
            },
            3600.0,
            default_spec,
            vec![step1, step2],
        )
        .unwrap()
    }

    fn trace(r#gen: &IdGenerator, bar_id: BarId, step1_secs: f64, step2_secs: f64, iterations: u64) -> DurableTrace {
        DurableTrace {
            trace_uid: r#gen.next_trace_id(),
            bar_id,
            version: 1,
            created_at: 0.0,
            steps: vec![
                DurableTraceStep {
                    position: 1,
                    iterations: None,
                    started_at: 0.0,
                    finished_at: step1_secs,
                },
                DurableTraceStep {
                    position: 2,
                    iterations: Some(iterations),
                    started_at: step1_secs,
                    finished_at: step1_secs + step2_secs,
                },
            ],
        }
    }

    #[tokio::test]
    async fn retain_feeds_step_cells_and_whole_estimate() {
        let r#gen = IdGenerator::new();
        let schema = schema(&r#gen);
        let engine = PredictorEngine::new(Arc::new(InMemoryDurableStore::new()));

        engine.retain(&schema, trace(&r#gen, schema.bar_id, 10.0, 20.0, 5)).await.unwrap();
        engine.retain(&schema, trace(&r#gen, schema.bar_id, 20.0, 40.0, 10)).await.unwrap();

        let step1 = engine
            .predict_step(schema.bar_id, schema.version, 1, 100.0)
            .await
            .unwrap();
        assert_eq!(step1, Some(15.0));

        let whole = engine.predict_whole(&schema, 100.0).await.unwrap();
        assert!(whole.is_some());
    }

    #[tokio::test]
    async fn retain_is_idempotent_for_the_same_trace_uid() {
        let r#gen = IdGenerator::new();
        let schema = schema(&r#gen);
        let engine = PredictorEngine::new(Arc::new(InMemoryDurableStore::new()));
        let t = trace(&r#gen, schema.bar_id, 10.0, 20.0, 5);

        engine.retain(&schema, t.clone()).await.unwrap();
        engine.retain(&schema, t).await.unwrap();

        let step1 = engine
            .predict_step(schema.bar_id, schema.version, 1, 100.0)
            .await
            .unwrap();
        assert_eq!(step1, Some(10.0));
    }

    #[tokio::test]
    async fn evict_undoes_a_prior_retain() {
        let r#gen = IdGenerator::new();
        let schema = schema(&r#gen);
        let engine = PredictorEngine::new(Arc::new(InMemoryDurableStore::new()));
        let t = trace(&r#gen, schema.bar_id, 10.0, 20.0, 5);

        engine.retain(&schema, t.clone()).await.unwrap();
        engine.evict(&schema, &t).await.unwrap();

        let step1 = engine
            .predict_step(schema.bar_id, schema.version, 1, 100.0)
            .await
            .unwrap();
        assert_eq!(step1, None);
    }

    #[tokio::test]
    async fn best_fit_linear_step_predicts_from_iteration_count() {
        let r#gen = IdGenerator::new();
        let schema = schema(&r#gen);
        let engine = PredictorEngine::new(Arc::new(InMemoryDurableStore::new()));

        engine.retain(&schema, trace(&r#gen, schema.bar_id, 10.0, 10.0, 5)).await.unwrap();
        engine.retain(&schema, trace(&r#gen, schema.bar_id, 10.0, 20.0, 10)).await.unwrap();

        let predicted = engine
            .predict_step_at(schema.bar_id, schema.version, 2, 20.0)
            .await
            .unwrap();
        assert!((predicted - 30.0).abs() < 1e-9);
    }
}

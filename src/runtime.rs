//! Assembles the core components into a runnable harness.
//!
//! Ingest transport, schema registration, and the durable relational store's
//! full contract are out of scope (§1, §6); this module stands in for all
//! three with in-memory adapters and a synthetic workload, so `pbars serve`
//! and `pbars inspect` have something to exercise end to end.

use std::sync::Arc;

use async_trait::async_trait;
use pbars_errors::PbarsError;
use pbars_hotstore::{DurableStore, HotStore, InMemoryDurableStore, InMemoryHotStore};
use pbars_ids::{BarId, Clock, IdGenerator, VirtualClock};
use pbars_intake::{IntakeConfig, IntakeEngine, IntakeOutcome, StepEvent};
use pbars_predictor::PredictorEngine;
use pbars_sampling::{Decision, SamplingEngine};
use pbars_schema::{
    BarSchema, CachedRegistry, SamplingConfig, SamplingTechnique, SchemaSource, StepSpec, Technique,
    DEFAULT_IDLE_BOUND_SECONDS,
};

use crate::config::Config;

struct StaticSchemaSource(BarSchema);

#[async_trait]
impl SchemaSource for StaticSchemaSource {
    async fn fetch(&self, _owner: &str, _bar_name: &str) -> Result<BarSchema, PbarsError> {
        Ok(self.0.clone())
    }
}

const DEMO_OWNER: &str = "demo";
const DEMO_BAR: &str = "release";

fn demo_schema(id_gen: &IdGenerator) -> BarSchema {
    let default_spec = StepSpec::new(0, "default", false, Technique::ArithmeticMean).unwrap();
    let download = StepSpec::new(1, "download", false, Technique::Percentile(90)).unwrap();
    let build = StepSpec::new(2, "build", true, Technique::BestFitLinear).unwrap();
    BarSchema::new(
        id_gen.next_bar_id(),
        DEMO_OWNER,
        DEMO_BAR,
        1,
        SamplingConfig {
            max_count: 20,
            max_age_seconds: Some(3600.0),
            technique: SamplingTechnique::Systematic,
        },
        DEFAULT_IDLE_BOUND_SECONDS,
        default_spec,
        vec![download, build],
    )
    .unwrap()
}

/// One bar's fully wired stack of in-memory adapters plus the four core
/// components, all pointed at each other.
pub struct Runtime {
    pub hotstore: Arc<InMemoryHotStore>,
    pub durable: Arc<InMemoryDurableStore>,
    pub registry: Arc<CachedRegistry<StaticSchemaSource>>,
    pub predictor: Arc<PredictorEngine<InMemoryDurableStore>>,
    pub intake: IntakeEngine<InMemoryHotStore, StaticSchemaSource>,
    pub sampling: SamplingEngine<InMemoryDurableStore>,
    pub clock: Arc<VirtualClock>,
    pub schema: BarSchema,
    id_gen: IdGenerator,
}

pub struct InspectReport {
    pub bar_id: BarId,
    pub version: u64,
    pub step_estimates: Vec<(u32, String, Option<f64>)>,
    pub whole_estimate: Option<f64>,
    pub retained_count: u64,
}

impl Runtime {
    #[must_use]
    pub fn demo(config: &Config) -> Self {
        let id_gen = IdGenerator::new();
        let schema = demo_schema(&id_gen);

        let hotstore = Arc::new(InMemoryHotStore::new());
        let durable = Arc::new(InMemoryDurableStore::new());
        let registry = Arc::new(CachedRegistry::new(StaticSchemaSource(schema.clone())));
        let clock = VirtualClock::new(0.0);
        let predictor = Arc::new(PredictorEngine::with_min_recompute_interval(
            durable.clone(),
            config.min_recompute_interval_seconds,
        ));

        let intake_config = IntakeConfig {
            completion_grace_seconds: config.completion_grace_seconds,
            max_cas_attempts: config.max_cas_attempts,
        };
        let intake = IntakeEngine::with_config(hotstore.clone(), registry.clone(), clock.clone(), intake_config);
        let sampling_hotstore: Arc<dyn HotStore> = hotstore.clone();
        let sampling = SamplingEngine::new(durable.clone(), sampling_hotstore, predictor.clone(), clock.clone());

        Self {
            hotstore,
            durable,
            registry,
            predictor,
            intake,
            sampling,
            clock,
            schema,
            id_gen,
        }
    }

    /// Drives `count` synthetic traces through intake, sampling, and the
    /// predictor — standing in for the out-of-scope ingest transport (§6).
    pub async fn run_demo_workload(&self, count: u32) -> Result<u32, PbarsError> {
        let mut retained = 0;
        for i in 0..count {
            let trace_uid = self.id_gen.next_trace_id();
            let download_secs = 2.0 + f64::from(i % 4);
            let iterations = 3 + u64::from(i % 5);

            self.intake
                .handle_event(
                    DEMO_OWNER,
                    DEMO_BAR,
                    trace_uid,
                    StepEvent::StepStart {
                        position: 1,
                        step_name: "download".to_string(),
                        iterations: None,
                    },
                )
                .await?;
            self.clock.advance(download_secs);
            self.intake
                .handle_event(DEMO_OWNER, DEMO_BAR, trace_uid, StepEvent::StepFinish { position: 1 })
                .await?;

            self.intake
                .handle_event(
                    DEMO_OWNER,
                    DEMO_BAR,
                    trace_uid,
                    StepEvent::StepStart {
                        position: 2,
                        step_name: "build".to_string(),
                        iterations: Some(iterations),
                    },
                )
                .await?;
            for iteration in 1..=iterations {
                self.clock.advance(1.0);
                self.intake
                    .handle_event(
                        DEMO_OWNER,
                        DEMO_BAR,
                        trace_uid,
                        StepEvent::StepProgress { position: 2, iteration },
                    )
                    .await?;
            }
            let outcome = self
                .intake
                .handle_event(DEMO_OWNER, DEMO_BAR, trace_uid, StepEvent::StepFinish { position: 2 })
                .await?;

            if let IntakeOutcome::Completed(completed) = outcome {
                if self.sampling.consider(&completed).await? == Decision::Retained {
                    retained += 1;
                }
            }
            self.clock.advance(1.0);
        }
        Ok(retained)
    }

    pub async fn inspect(&self) -> Result<InspectReport, PbarsError> {
        let now = self.clock.now_seconds();
        let mut step_estimates = Vec::new();
        for step in &self.schema.steps {
            let estimate = self
                .predictor
                .predict_step(self.schema.bar_id, self.schema.version, step.position, now)
                .await?;
            step_estimates.push((step.position, step.name.clone(), estimate));
        }
        let whole_estimate = self.predictor.predict_whole(&self.schema, now).await?;
        let retained_count = self.durable.retained_count(self.schema.bar_id, self.schema.version).await?;

        Ok(InspectReport {
            bar_id: self.schema.bar_id,
            version: self.schema.version,
            step_estimates,
            whole_estimate,
            retained_count,
        })
    }
}

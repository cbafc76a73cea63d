//! End-to-end scenarios covering a full trace's arithmetic-mean whole
//! estimate, a percentile prediction, a best-fit-linear prediction,
//! systematic sampling's retention trim, schema drift aborting a trace, and
//! pub/sub fan-out with a lagged subscriber.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pbars_errors::PbarsError;
use pbars_hotstore::{DurableStore, HotStore, InMemoryDurableStore, InMemoryHotStore};
use pbars_ids::{BarId, IdGenerator, VirtualClock};
use pbars_intake::{IntakeEngine, StepEvent};
use pbars_predictor::{ols, percentile, PredictorEngine};
use pbars_pubsub::{SubscriptionEvent, TraceSubscription};
use pbars_sampling::{Decision, SamplingEngine};
use pbars_schema::{
    BarSchema, CachedRegistry, SamplingConfig, SamplingTechnique, SchemaSource, StepSpec, Technique,
    DEFAULT_IDLE_BOUND_SECONDS,
};

struct FixedSource(BarSchema);

#[async_trait]
impl SchemaSource for FixedSource {
    async fn fetch(&self, _owner: &str, _bar_name: &str) -> Result<BarSchema, PbarsError> {
        Ok(self.0.clone())
    }
}

fn three_step_schema(r#gen: &IdGenerator, default_technique: Technique) -> BarSchema {
    let default_spec = StepSpec::new(0, "default", false, default_technique).unwrap();
    let s1 = StepSpec::new(1, "s1", false, Technique::ArithmeticMean).unwrap();
    let s2 = StepSpec::new(2, "s2", false, Technique::ArithmeticMean).unwrap();
    let s3 = StepSpec::new(3, "s3", false, Technique::ArithmeticMean).unwrap();
    BarSchema::new(
        BarId(r#gen.next()),
        "acme",
        "release",
        1,
        SamplingConfig {
            max_count: 100,
            max_age_seconds: None,
            technique: SamplingTechnique::Systematic,
        },
        DEFAULT_IDLE_BOUND_SECONDS,
        default_spec,
        vec![s1, s2, s3],
    )
    .unwrap()
}

/// Scenario 1: three one-off steps, arithmetic_mean default. s1=[1,2,3],
/// s2=[10,10,10], s3=[4,5,6] → whole-trace estimate = 2 + 10 + 5 = 17.
#[tokio::test]
async fn whole_trace_estimate_sums_per_step_means() {
    let r#gen = IdGenerator::new();
    let schema = three_step_schema(&r#gen, Technique::ArithmeticMean);
    let durable = Arc::new(InMemoryDurableStore::new());
    let predictor = PredictorEngine::new(durable);

    let s1_samples = [1.0, 2.0, 3.0];
    let s2_samples = [10.0, 10.0, 10.0];
    let s3_samples = [4.0, 5.0, 6.0];

    for i in 0..3 {
        let trace = pbars_hotstore::DurableTrace {
            trace_uid: r#gen.next_trace_id(),
            bar_id: schema.bar_id,
            version: schema.version,
            created_at: f64::from(i),
            steps: vec![
                pbars_hotstore::DurableTraceStep {
                    position: 1,
                    iterations: None,
                    started_at: 0.0,
                    finished_at: s1_samples[i as usize],
                },
                pbars_hotstore::DurableTraceStep {
                    position: 2,
                    iterations: None,
                    started_at: 0.0,
                    finished_at: s2_samples[i as usize],
                },
                pbars_hotstore::DurableTraceStep {
                    position: 3,
                    iterations: None,
                    started_at: 0.0,
                    finished_at: s3_samples[i as usize],
                },
            ],
        };
        predictor.retain(&schema, trace).await.unwrap();
    }

    let whole = predictor.predict_whole(&schema, 100.0).await.unwrap();
    assert!((whole.unwrap() - 17.0).abs() < 1e-9);
}

/// Scenario 2: percentile-90 on samples [1..10] → prediction = 9.
#[test]
fn percentile_90_on_ten_samples_is_nine() {
    let samples: Vec<f64> = (1..=10).map(f64::from).collect();
    assert_eq!(percentile(&samples, 90), Some(9.0));
}

/// Scenario 3: best-fit linear on (n, t) = (1,2),(2,3),(3,4),(4,5) → a=1,
/// b=1; prediction at n=10 = 11.
#[test]
fn best_fit_linear_predicts_along_the_fitted_line() {
    let pairs = [(1.0, 2.0), (2.0, 3.0), (3.0, 4.0), (4.0, 5.0)];
    let (slope, intercept) = ols(&pairs).unwrap();
    assert!((slope - 1.0).abs() < 1e-9);
    assert!((intercept - 1.0).abs() < 1e-9);
    assert!((slope * 10.0 + intercept - 11.0).abs() < 1e-9);
}

/// Scenario 4: systematic sampling, N=2, A=10s. Traces complete at
/// t=0,3,5,8,11 → retained set ends up as {t=5, t=11} after eviction.
#[tokio::test]
async fn systematic_sampling_trims_to_the_two_most_recent() {
    let r#gen = IdGenerator::new();
    let default_spec = StepSpec::new(0, "default", false, Technique::ArithmeticMean).unwrap();
    let only = StepSpec::new(1, "only", false, Technique::ArithmeticMean).unwrap();
    let schema = BarSchema::new(
        BarId(r#gen.next()),
        "acme",
        "release",
        1,
        SamplingConfig {
            max_count: 2,
            max_age_seconds: Some(10.0),
            technique: SamplingTechnique::Systematic,
        },
        DEFAULT_IDLE_BOUND_SECONDS,
        default_spec,
        vec![only],
    )
    .unwrap();

    let durable = Arc::new(InMemoryDurableStore::new());
    let hotstore: Arc<dyn HotStore> = Arc::new(InMemoryHotStore::new());
    let predictor = Arc::new(PredictorEngine::new(durable.clone()));
    let clock = VirtualClock::new(0.0);
    let sampling = SamplingEngine::new(durable.clone(), hotstore, predictor, clock);

    let mut decisions = Vec::new();
    for t in [0.0, 3.0, 5.0, 8.0, 11.0] {
        let trace = pbars_intake::CompletedTrace {
            owner: schema.owner.clone(),
            bar_name: schema.bar_name.clone(),
            trace_uid: r#gen.next_trace_id(),
            schema: schema.clone(),
            steps: vec![pbars_intake::CompletedTraceStep {
                position: 1,
                iterations: None,
                started_at: t - 1.0,
                finished_at: t,
            }],
        };
        decisions.push(sampling.consider(&trace).await.unwrap());
    }
    assert_eq!(
        decisions,
        vec![
            Decision::Retained,
            Decision::Dropped,
            Decision::Retained,
            Decision::Dropped,
            Decision::Retained,
        ]
    );

    assert_eq!(durable.retained_count(schema.bar_id, schema.version).await.unwrap(), 2);
    let retained = durable.scan_retained(schema.bar_id, schema.version, 0.0).await.unwrap();
    let mut created_ats: Vec<f64> = retained.iter().map(|t| t.created_at).collect();
    created_ats.sort_by(f64::total_cmp);
    assert_eq!(created_ats, vec![4.0, 10.0]);
}

/// Scenario 5: bar has steps [A, B]; an incoming trace starts A correctly
/// then sends step name "C" at position 2 → the trace aborts with
/// SchemaDrift and no step is persisted in the hot store.
#[tokio::test]
async fn mismatched_step_name_aborts_the_trace_with_schema_drift() {
    let r#gen = IdGenerator::new();
    let default_spec = StepSpec::new(0, "default", false, Technique::ArithmeticMean).unwrap();
    let a = StepSpec::new(1, "A", false, Technique::ArithmeticMean).unwrap();
    let b = StepSpec::new(2, "B", false, Technique::ArithmeticMean).unwrap();
    let schema = BarSchema::new(
        BarId(r#gen.next()),
        "acme",
        "release",
        1,
        SamplingConfig {
            max_count: 10,
            max_age_seconds: None,
            technique: SamplingTechnique::Systematic,
        },
        DEFAULT_IDLE_BOUND_SECONDS,
        default_spec,
        vec![a, b],
    )
    .unwrap();

    let hotstore = Arc::new(InMemoryHotStore::new());
    let registry = Arc::new(CachedRegistry::new(FixedSource(schema)));
    let clock = VirtualClock::new(0.0);
    let engine = IntakeEngine::new(hotstore.clone(), registry, clock.clone());
    let trace_uid = r#gen.next_trace_id();

    engine
        .handle_event(
            "acme",
            "release",
            trace_uid,
            StepEvent::StepStart {
                position: 1,
                step_name: "A".to_string(),
                iterations: None,
            },
        )
        .await
        .unwrap();
    clock.advance(1.0);
    engine
        .handle_event("acme", "release", trace_uid, StepEvent::StepFinish { position: 1 })
        .await
        .unwrap();

    clock.advance(1.0);
    let err = engine
        .handle_event(
            "acme",
            "release",
            trace_uid,
            StepEvent::StepStart {
                position: 2,
                step_name: "C".to_string(),
                iterations: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PbarsError::SchemaDrift(_)));

    let step2 = hotstore.get_step("acme", "release", trace_uid, 2).await.unwrap();
    assert!(step2.is_none());
}

/// Scenario 6: two subscribers on the same trace observe three mutations;
/// a subscriber whose bounded queue overflows is marked lagged.
#[tokio::test]
async fn two_subscribers_see_updates_and_a_lagged_one_is_flagged() {
    let store = Arc::new(InMemoryHotStore::new());
    let trace_uid = IdGenerator::new().next_trace_id();

    let mut sub_a = TraceSubscription::subscribe(store.as_ref(), "acme", "release", trace_uid, Duration::from_secs(5));
    let mut sub_b = TraceSubscription::subscribe(store.as_ref(), "acme", "release", trace_uid, Duration::from_secs(5));

    for _ in 0..3 {
        store
            .publish_trace_update(pbars_hotstore::TraceUpdate {
                owner: "acme".to_string(),
                bar_name: "release".to_string(),
                trace_uid,
            })
            .await
            .unwrap();
    }

    for _ in 0..3 {
        assert!(matches!(sub_a.recv().await, Some(SubscriptionEvent::Update(_))));
        assert!(matches!(sub_b.recv().await, Some(SubscriptionEvent::Update(_))));
    }

    let mut overflow_sub =
        TraceSubscription::subscribe(store.as_ref(), "acme", "release", trace_uid, Duration::from_secs(5));
    for _ in 0..100 {
        store
            .publish_trace_update(pbars_hotstore::TraceUpdate {
                owner: "acme".to_string(),
                bar_name: "release".to_string(),
                trace_uid,
            })
            .await
            .unwrap();
    }
    assert!(matches!(overflow_sub.recv().await, Some(SubscriptionEvent::Lagged { .. })));
}

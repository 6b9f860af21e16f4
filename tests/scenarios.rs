use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use serde_json::{json, Value};

use flag_resolver::context::{RequestContext, Tier, UserContext};
use flag_resolver::evaluation::{
    EnvOverrides, FixedClock, MapOverrides, OfflineDecision, OfflineReason, SystemClock,
};
use flag_resolver::{
    Adapter, AdapterChain, AdapterError, FlagOptions, FlagValue, OfflineEvaluationError,
    OfflineEvaluator, OfflineFallbackConfig, Resolver, Schedule, Source, UnifiedContext,
};

struct AlwaysFails {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Adapter for AlwaysFails {
    async fn decide(
        &self,
        _flag_key: &str,
        _context: &UnifiedContext,
    ) -> Result<Option<FlagValue>, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(AdapterError::Failed("connection refused".to_string()))
    }
}

fn offline_only_resolver() -> Resolver {
    Resolver::builder()
        .overrides(Arc::new(MapOverrides::new()))
        .build()
}

fn signed_in(user: &str, visitor: &str) -> UnifiedContext {
    UnifiedContext::new(
        UserContext {
            id: user.to_string(),
            tier: Tier::Pro,
            session_id: None,
        },
        visitor,
        RequestContext::unknown(),
    )
}

#[tokio::test]
async fn checkout_flow_survives_a_failing_primary() {
    let calls = Arc::new(AtomicUsize::new(0));
    let chain = AdapterChain::offline(OfflineFallbackConfig::percentage(100)).with_primary(
        AlwaysFails {
            calls: calls.clone(),
        },
    );
    let flag = offline_only_resolver()
        .define("checkout-flow", chain, FlagOptions::default())
        .unwrap();

    for i in 0..50 {
        let result = flag.evaluate(&UnifiedContext::for_visitor(format!("v-{}", i))).await;
        assert_eq!(result.value, json!(true));
        assert_eq!(result.source, Source::Offline);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 50);
}

#[test]
fn empty_variant_list_degrades_to_false() {
    let evaluator = OfflineEvaluator::new(Arc::new(MapOverrides::new()), Arc::new(SystemClock));
    let config = OfflineFallbackConfig::variant(Vec::<FlagValue>::new());

    let decision: OfflineDecision =
        evaluator.decide("k", &config, &UnifiedContext::for_visitor("v"));

    assert_eq!(decision.value, json!(false));
    match decision.reason {
        OfflineReason::Fallback(err) => {
            assert!(matches!(err, OfflineEvaluationError::Configuration(_)));
            assert_eq!(err.kind(), "configuration");
        }
        other => panic!("expected fallback, got {:?}", other),
    }
}

#[tokio::test]
async fn operator_override_beats_zero_percent_rollout() {
    let resolver = Resolver::builder()
        .overrides(Arc::new(MapOverrides::new().with("FLAG_BETA_X", "true")))
        .build();
    resolver
        .define(
            "beta-x",
            AdapterChain::offline(OfflineFallbackConfig::percentage(0)),
            FlagOptions::default(),
        )
        .unwrap();

    let result = resolver
        .evaluate("beta-x", &UnifiedContext::for_visitor("anyone"))
        .await
        .unwrap();
    assert_eq!(result.value, json!(true));
}

#[tokio::test]
async fn process_environment_overrides_are_read() {
    // Unique variable name so parallel tests cannot interfere.
    std::env::set_var("FLAG_ENV_PROBE_FLAG", "variant-z");
    let resolver = Resolver::builder().overrides(Arc::new(EnvOverrides)).build();
    resolver
        .define(
            "env-probe-flag",
            AdapterChain::offline(OfflineFallbackConfig::variant(["a", "b"])),
            FlagOptions::default(),
        )
        .unwrap();

    let value = resolver
        .evaluate("env-probe-flag", &UnifiedContext::for_visitor("v"))
        .await
        .unwrap()
        .value;
    assert_eq!(value, json!("variant-z"));
}

#[tokio::test]
async fn fifty_percent_rollout_is_calibrated() {
    let flag = offline_only_resolver()
        .define(
            "half-rollout",
            AdapterChain::offline(OfflineFallbackConfig::percentage(50)),
            FlagOptions::default(),
        )
        .unwrap();

    let mut enabled = 0;
    for i in 0..10_000 {
        let ctx = UnifiedContext::for_visitor(format!("visitor-{}", i));
        if flag.value(&ctx).await == json!(true) {
            enabled += 1;
        }
    }

    assert!(
        (4_500..=5_500).contains(&enabled),
        "true-rate out of range: {} / 10000",
        enabled
    );
}

#[tokio::test]
async fn variants_are_spread_and_sticky() {
    let resolver = offline_only_resolver();
    let flag = resolver
        .define(
            "algo",
            AdapterChain::offline(OfflineFallbackConfig::variant(["control", "fast", "smart"])),
            FlagOptions::default(),
        )
        .unwrap();

    let ctx = signed_in("user-7", "visitor-7");
    let first = flag.value(&ctx).await;
    for _ in 0..10 {
        assert_eq!(flag.value(&ctx).await, first);
    }

    let mut seen = std::collections::HashSet::new();
    for i in 0..300 {
        let value = flag.value(&UnifiedContext::for_visitor(format!("v{}", i))).await;
        seen.insert(value.as_str().unwrap().to_string());
    }
    assert_eq!(seen.len(), 3);
}

#[tokio::test]
async fn time_gate_follows_injected_clock() {
    let schedule = Schedule {
        days: Some(vec![0]),
        hours: Some(vec![3]),
        ..Default::default()
    };

    let resolver_at = |y, m, d, h| {
        let now = Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap();
        Resolver::builder()
            .overrides(Arc::new(MapOverrides::new()))
            .clock(Arc::new(FixedClock(now)))
            .build()
    };
    let ctx = UnifiedContext::for_visitor("v");

    // 2024-01-07 is a Sunday, 2024-01-08 a Monday.
    let sunday = resolver_at(2024, 1, 7, 3);
    sunday
        .define(
            "night-job",
            AdapterChain::offline(OfflineFallbackConfig::time_based(schedule.clone())),
            FlagOptions::default(),
        )
        .unwrap();
    assert_eq!(sunday.evaluate("night-job", &ctx).await.unwrap().value, json!(true));

    let monday = resolver_at(2024, 1, 8, 3);
    monday
        .define(
            "night-job",
            AdapterChain::offline(OfflineFallbackConfig::time_based(schedule)),
            FlagOptions::default(),
        )
        .unwrap();
    assert_eq!(monday.evaluate("night-job", &ctx).await.unwrap().value, json!(false));
}

#[tokio::test]
async fn user_id_changes_the_bucket_identity() {
    let evaluator = OfflineEvaluator::new(Arc::new(MapOverrides::new()), Arc::new(SystemClock));
    let config = OfflineFallbackConfig::variant((0..50).map(Value::from));

    // Same visitor, different users: at least one pair must land differently.
    let differs = (0..20).any(|i| {
        let a = evaluator.evaluate("bucket", &config, &signed_in(&format!("u{}", i), "shared"));
        let b = evaluator.evaluate("bucket", &config, &signed_in(&format!("w{}", i), "shared"));
        a != b
    });
    assert!(differs);
}

proptest! {
    #[test]
    fn offline_evaluation_is_deterministic(
        key in "[a-z][a-z0-9-]{0,20}",
        visitor in "[a-zA-Z0-9-]{1,36}",
        percentage in 0u8..=100,
    ) {
        let evaluator = OfflineEvaluator::new(Arc::new(MapOverrides::new()), Arc::new(SystemClock));
        let ctx = UnifiedContext::for_visitor(visitor);
        let rollout = OfflineFallbackConfig::percentage(percentage);
        let variants = OfflineFallbackConfig::variant(["a", "b", "c", "d"]);

        prop_assert_eq!(
            evaluator.evaluate(&key, &rollout, &ctx),
            evaluator.evaluate(&key, &rollout, &ctx)
        );
        prop_assert_eq!(
            evaluator.evaluate(&key, &variants, &ctx),
            evaluator.evaluate(&key, &variants, &ctx)
        );
    }
}

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::clock::{Clock, SystemClock};
use super::hash::{bucket_hash, in_rollout};
use super::overrides::{lookup_override, EnvOverrides, OverrideSource};
use super::FlagValue;
use crate::context::UnifiedContext;
use crate::error::{FlagError, OfflineEvaluationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    Boolean,
    Percentage,
    Variant,
    TimeBased,
    Custom,
}

/// Time window for the `time-based` policy. Every present constraint must pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Inclusive lower bound.
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound.
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    /// Allowed days of week, 0 = Sunday.
    #[serde(default)]
    pub days: Option<Vec<u8>>,
    /// Allowed hours of day, UTC.
    #[serde(default)]
    pub hours: Option<Vec<u8>>,
}

impl Schedule {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if self.start.is_some_and(|start| now < start) {
            return false;
        }
        if self.end.is_some_and(|end| now > end) {
            return false;
        }
        if let Some(days) = &self.days {
            let today = now.weekday().num_days_from_sunday() as u8;
            if !days.contains(&today) {
                return false;
            }
        }
        if let Some(hours) = &self.hours {
            let hour = now.hour() as u8;
            if !hours.contains(&hour) {
                return false;
            }
        }
        true
    }

    fn validate(&self) -> Result<(), String> {
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err("schedule start is after its end".to_string());
            }
        }
        if self.days.iter().flatten().any(|d| *d > 6) {
            return Err("schedule days must be in 0..=6".to_string());
        }
        if self.hours.iter().flatten().any(|h| *h > 23) {
            return Err("schedule hours must be in 0..=23".to_string());
        }
        Ok(())
    }
}

type CustomFn =
    dyn Fn(&UnifiedContext) -> Result<FlagValue, Box<dyn std::error::Error + Send + Sync>>
        + Send
        + Sync;

/// Caller-supplied predicate for the `custom` policy.
#[derive(Clone)]
pub struct CustomLogic(Arc<CustomFn>);

impl CustomLogic {
    pub fn new<F>(logic: F) -> Self
    where
        F: Fn(&UnifiedContext) -> Result<FlagValue, Box<dyn std::error::Error + Send + Sync>>
            + Send
            + Sync
            + 'static,
    {
        Self(Arc::new(logic))
    }

    fn call(&self, context: &UnifiedContext) -> Result<FlagValue, OfflineEvaluationError> {
        match catch_unwind(AssertUnwindSafe(|| (self.0)(context))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(OfflineEvaluationError::CustomLogic(err.to_string())),
            Err(_) => Err(OfflineEvaluationError::CustomPanicked),
        }
    }
}

impl fmt::Debug for CustomLogic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomLogic(..)")
    }
}

/// Offline tier policy for a single flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineFallbackConfig {
    #[serde(rename = "type")]
    pub kind: PolicyKind,
    #[serde(default)]
    pub percentage: Option<u8>,
    #[serde(default)]
    pub variants: Option<Vec<FlagValue>>,
    #[serde(default)]
    pub schedule: Option<Schedule>,
    #[serde(skip)]
    pub custom_logic: Option<CustomLogic>,
}

impl OfflineFallbackConfig {
    fn with_kind(kind: PolicyKind) -> Self {
        Self {
            kind,
            percentage: None,
            variants: None,
            schedule: None,
            custom_logic: None,
        }
    }

    /// Boolean policy. Without a percentage it evaluates to `false`.
    pub fn boolean(percentage: Option<u8>) -> Self {
        Self {
            percentage,
            ..Self::with_kind(PolicyKind::Boolean)
        }
    }

    pub fn percentage(percentage: u8) -> Self {
        Self {
            percentage: Some(percentage),
            ..Self::with_kind(PolicyKind::Percentage)
        }
    }

    pub fn variant<I, V>(variants: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<FlagValue>,
    {
        Self {
            variants: Some(variants.into_iter().map(Into::into).collect()),
            ..Self::with_kind(PolicyKind::Variant)
        }
    }

    pub fn time_based(schedule: Schedule) -> Self {
        Self {
            schedule: Some(schedule),
            ..Self::with_kind(PolicyKind::TimeBased)
        }
    }

    pub fn custom(logic: CustomLogic) -> Self {
        Self {
            custom_logic: Some(logic),
            ..Self::with_kind(PolicyKind::Custom)
        }
    }

    /// Structural validation, run when a flag is defined.
    pub fn validate(&self, flag_key: &str) -> Result<(), FlagError> {
        self.check().map_err(|reason| FlagError::configuration(flag_key, reason))
    }

    fn check(&self) -> Result<(), String> {
        if self.percentage.is_some_and(|p| p > 100) {
            return Err("percentage must be between 0 and 100".to_string());
        }

        match self.kind {
            PolicyKind::Boolean => Ok(()),
            PolicyKind::Percentage => match self.percentage {
                Some(_) => Ok(()),
                None => Err("percentage policy requires a percentage".to_string()),
            },
            PolicyKind::Variant => match &self.variants {
                Some(v) if !v.is_empty() => Ok(()),
                _ => Err("variant policy requires at least one variant".to_string()),
            },
            PolicyKind::TimeBased => match &self.schedule {
                Some(schedule) => schedule.validate(),
                None => Err("time-based policy requires a schedule".to_string()),
            },
            PolicyKind::Custom => match self.custom_logic {
                Some(_) => Ok(()),
                None => Err("custom policy requires custom logic".to_string()),
            },
        }
    }

    /// Value returned when evaluation fails: the first variant, else `false`.
    pub fn ultimate_fallback(&self) -> FlagValue {
        self.variants
            .as_ref()
            .and_then(|v| v.first())
            .cloned()
            .unwrap_or(Value::Bool(false))
    }
}

/// Why the offline tier produced its value.
#[derive(Debug, Clone, PartialEq)]
pub enum OfflineReason {
    Override,
    Policy,
    Fallback(OfflineEvaluationError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OfflineDecision {
    pub value: FlagValue,
    pub reason: OfflineReason,
}

/// Pure offline evaluator. Only `time-based` reads the clock.
#[derive(Clone)]
pub struct OfflineEvaluator {
    overrides: Arc<dyn OverrideSource>,
    clock: Arc<dyn Clock>,
}

impl Default for OfflineEvaluator {
    fn default() -> Self {
        Self::new(Arc::new(EnvOverrides), Arc::new(SystemClock))
    }
}

impl OfflineEvaluator {
    pub fn new(overrides: Arc<dyn OverrideSource>, clock: Arc<dyn Clock>) -> Self {
        Self { overrides, clock }
    }

    pub fn evaluate(
        &self,
        flag_key: &str,
        config: &OfflineFallbackConfig,
        context: &UnifiedContext,
    ) -> FlagValue {
        self.decide(flag_key, config, context).value
    }

    /// Evaluates the policy and reports how the value was reached. Never fails.
    pub fn decide(
        &self,
        flag_key: &str,
        config: &OfflineFallbackConfig,
        context: &UnifiedContext,
    ) -> OfflineDecision {
        if let Some(value) = lookup_override(self.overrides.as_ref(), flag_key) {
            return OfflineDecision {
                value,
                reason: OfflineReason::Override,
            };
        }

        match self.apply_policy(flag_key, config, context) {
            Ok(value) => OfflineDecision {
                value,
                reason: OfflineReason::Policy,
            },
            Err(err) => {
                tracing::error!(
                    flag_key,
                    error_kind = err.kind(),
                    error = %err,
                    "offline evaluation failed, using fallback value"
                );
                OfflineDecision {
                    value: config.ultimate_fallback(),
                    reason: OfflineReason::Fallback(err),
                }
            }
        }
    }

    fn apply_policy(
        &self,
        flag_key: &str,
        config: &OfflineFallbackConfig,
        context: &UnifiedContext,
    ) -> Result<FlagValue, OfflineEvaluationError> {
        config
            .check()
            .map_err(OfflineEvaluationError::Configuration)?;

        let identity = context.identity();
        let value = match config.kind {
            PolicyKind::Boolean | PolicyKind::Percentage => {
                let percentage = config.percentage.unwrap_or(0);
                Value::Bool(in_rollout(flag_key, &identity, percentage))
            }
            PolicyKind::Variant => {
                let variants = config.variants.as_deref().unwrap_or_default();
                let index = bucket_hash(flag_key, &identity) as usize % variants.len();
                variants[index].clone()
            }
            PolicyKind::TimeBased => {
                let schedule = config.schedule.as_ref().ok_or_else(|| {
                    OfflineEvaluationError::Configuration("missing schedule".to_string())
                })?;
                Value::Bool(schedule.is_active(self.clock.now()))
            }
            PolicyKind::Custom => {
                let logic = config.custom_logic.as_ref().ok_or_else(|| {
                    OfflineEvaluationError::Configuration("missing custom logic".to_string())
                })?;
                logic.call(context)?
            }
        };

        if value.is_null() {
            return Err(OfflineEvaluationError::NullValue);
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::{FixedClock, MapOverrides};
    use chrono::TimeZone;
    use serde_json::json;

    fn evaluator() -> OfflineEvaluator {
        OfflineEvaluator::new(Arc::new(MapOverrides::new()), Arc::new(SystemClock))
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> OfflineEvaluator {
        let now = Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap();
        OfflineEvaluator::new(Arc::new(MapOverrides::new()), Arc::new(FixedClock(now)))
    }

    #[test]
    fn test_percentage_bounds() {
        let ctx = UnifiedContext::for_visitor("v-1");
        let e = evaluator();
        assert_eq!(e.evaluate("f", &OfflineFallbackConfig::percentage(0), &ctx), json!(false));
        assert_eq!(e.evaluate("f", &OfflineFallbackConfig::percentage(100), &ctx), json!(true));
    }

    #[test]
    fn test_boolean_without_percentage_is_false() {
        let ctx = UnifiedContext::for_visitor("v-1");
        assert_eq!(
            evaluator().evaluate("f", &OfflineFallbackConfig::boolean(None), &ctx),
            json!(false)
        );
    }

    #[test]
    fn test_variant_is_stable() {
        let config = OfflineFallbackConfig::variant(["a", "b", "c"]);
        let ctx = UnifiedContext::for_visitor("visitor-77");
        let e = evaluator();
        let first = e.evaluate("algo", &config, &ctx);
        for _ in 0..20 {
            assert_eq!(e.evaluate("algo", &config, &ctx), first);
        }
        assert!(["a", "b", "c"].iter().any(|v| first == json!(v)));
    }

    #[test]
    fn test_empty_variants_fall_back_to_false() {
        let config = OfflineFallbackConfig::variant(Vec::<FlagValue>::new());
        let decision = evaluator().decide("k", &config, &UnifiedContext::for_visitor("v"));
        assert_eq!(decision.value, json!(false));
        assert!(matches!(
            decision.reason,
            OfflineReason::Fallback(OfflineEvaluationError::Configuration(_))
        ));
    }

    #[test]
    fn test_missing_schedule_falls_back() {
        let config = OfflineFallbackConfig::with_kind(PolicyKind::TimeBased);
        let decision = evaluator().decide("k", &config, &UnifiedContext::for_visitor("v"));
        assert_eq!(decision.value, json!(false));
    }

    #[test]
    fn test_override_beats_policy() {
        let e = OfflineEvaluator::new(
            Arc::new(MapOverrides::new().with("FLAG_BETA_X", "true")),
            Arc::new(SystemClock),
        );
        let decision = e.decide(
            "beta-x",
            &OfflineFallbackConfig::percentage(0),
            &UnifiedContext::for_visitor("v"),
        );
        assert_eq!(decision.value, json!(true));
        assert_eq!(decision.reason, OfflineReason::Override);
    }

    #[test]
    fn test_default_evaluator_reads_process_environment() {
        std::env::set_var("FLAG_DEFAULT_ENV_KILL_SWITCH", "false");
        let decision = OfflineEvaluator::default().decide(
            "default-env-kill-switch",
            &OfflineFallbackConfig::percentage(100),
            &UnifiedContext::for_visitor("v"),
        );
        assert_eq!(decision.value, json!(false));
        assert_eq!(decision.reason, OfflineReason::Override);
    }

    #[test]
    fn test_time_window_days_and_hours() {
        let schedule = Schedule {
            days: Some(vec![0]),
            hours: Some(vec![3]),
            ..Default::default()
        };
        let config = OfflineFallbackConfig::time_based(schedule);
        let ctx = UnifiedContext::for_visitor("v");

        // 2024-01-07 is a Sunday.
        assert_eq!(at(2024, 1, 7, 3).evaluate("t", &config, &ctx), json!(true));
        assert_eq!(at(2024, 1, 8, 3).evaluate("t", &config, &ctx), json!(false));
        assert_eq!(at(2024, 1, 7, 4).evaluate("t", &config, &ctx), json!(false));
    }

    #[test]
    fn test_time_window_date_range() {
        let schedule = Schedule {
            start: Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()),
            end: Some(Utc.with_ymd_and_hms(2024, 6, 30, 23, 59, 59).unwrap()),
            ..Default::default()
        };
        let config = OfflineFallbackConfig::time_based(schedule);
        let ctx = UnifiedContext::for_visitor("v");

        assert_eq!(at(2024, 5, 31, 12).evaluate("t", &config, &ctx), json!(false));
        assert_eq!(at(2024, 6, 15, 12).evaluate("t", &config, &ctx), json!(true));
        assert_eq!(at(2024, 7, 1, 0).evaluate("t", &config, &ctx), json!(false));
    }

    #[test]
    fn test_custom_logic_reads_context() {
        let config = OfflineFallbackConfig::custom(CustomLogic::new(|ctx| {
            Ok(json!(ctx.request.country == "US"))
        }));
        let ctx = UnifiedContext::for_visitor("v");
        assert_eq!(evaluator().evaluate("c", &config, &ctx), json!(true));
    }

    #[test]
    fn test_custom_logic_errors_and_panics_are_contained() {
        let failing = OfflineFallbackConfig::custom(CustomLogic::new(|_| Err("boom".into())));
        let panicking = OfflineFallbackConfig::custom(CustomLogic::new(|_| panic!("bug")));
        let null = OfflineFallbackConfig::custom(CustomLogic::new(|_| Ok(Value::Null)));
        let ctx = UnifiedContext::for_visitor("v");
        let e = evaluator();

        assert_eq!(e.evaluate("c", &failing, &ctx), json!(false));
        assert_eq!(e.evaluate("c", &panicking, &ctx), json!(false));
        assert_eq!(e.evaluate("c", &null, &ctx), json!(false));
    }

    #[test]
    fn test_custom_failure_with_variants_uses_first_variant() {
        let mut config = OfflineFallbackConfig::custom(CustomLogic::new(|_| Err("boom".into())));
        config.variants = Some(vec![json!("control"), json!("treatment")]);
        assert_eq!(
            evaluator().evaluate("c", &config, &UnifiedContext::for_visitor("v")),
            json!("control")
        );
    }

    #[test]
    fn test_validate_rejects_bad_configs() {
        assert!(OfflineFallbackConfig::variant(Vec::<FlagValue>::new()).validate("k").is_err());
        assert!(OfflineFallbackConfig::with_kind(PolicyKind::TimeBased).validate("k").is_err());
        assert!(OfflineFallbackConfig::with_kind(PolicyKind::Percentage).validate("k").is_err());
        assert!(OfflineFallbackConfig::percentage(101).validate("k").is_err());
        assert!(OfflineFallbackConfig::with_kind(PolicyKind::Custom).validate("k").is_err());
        assert!(OfflineFallbackConfig::percentage(50).validate("k").is_ok());
    }

    #[test]
    fn test_deserialize_from_json() {
        let config: OfflineFallbackConfig = serde_json::from_value(json!({
            "type": "time-based",
            "schedule": { "days": [1, 2, 3, 4, 5], "hours": [9, 10, 11] }
        }))
        .unwrap();
        assert_eq!(config.kind, PolicyKind::TimeBased);
        assert!(config.validate("office-hours").is_ok());
    }
}

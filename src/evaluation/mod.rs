//! Deterministic offline evaluation.
//!
//! Used when no remote adapter produced an answer. Apart from `time-based`
//! policies the result is a pure function of the flag key and the identity
//! string of the context.

mod clock;
mod hash;
mod offline;
mod overrides;

pub use clock::{Clock, FixedClock, SystemClock};
pub use hash::{bucket_hash, in_rollout, stable_hash};
pub use offline::{
    CustomLogic, OfflineDecision, OfflineEvaluator, OfflineFallbackConfig, OfflineReason,
    PolicyKind, Schedule,
};
pub use overrides::{
    lookup_override, override_variable, parse_override, EnvOverrides, MapOverrides,
    OverrideSource,
};

/// Value a flag resolves to: boolean, number, string or structured JSON.
pub type FlagValue = serde_json::Value;

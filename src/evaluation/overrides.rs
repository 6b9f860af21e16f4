use std::collections::HashMap;

use serde_json::{Number, Value};

use super::FlagValue;

/// Where operator overrides come from.
pub trait OverrideSource: Send + Sync {
    /// Raw value of the override variable, if set.
    fn lookup(&self, variable: &str) -> Option<String>;
}

/// Reads overrides from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvOverrides;

impl OverrideSource for EnvOverrides {
    fn lookup(&self, variable: &str) -> Option<String> {
        std::env::var(variable).ok()
    }
}

/// Fixed set of overrides, keyed by variable name.
#[derive(Debug, Clone, Default)]
pub struct MapOverrides(HashMap<String, String>);

impl MapOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, variable: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(variable.into(), value.into());
        self
    }
}

impl OverrideSource for MapOverrides {
    fn lookup(&self, variable: &str) -> Option<String> {
        self.0.get(variable).cloned()
    }
}

/// Override variable for a flag key: `new-feature` becomes `FLAG_NEW_FEATURE`.
pub fn override_variable(flag_key: &str) -> String {
    format!("FLAG_{}", flag_key.to_uppercase().replace('-', "_"))
}

/// Interprets a raw override value.
///
/// `"true"`/`"false"` become booleans, numeric strings become numbers and
/// anything else passes through as a string.
pub fn parse_override(raw: &str) -> FlagValue {
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }

    if let Ok(int) = raw.parse::<i64>() {
        return Value::Number(int.into());
    }
    if let Some(number) = raw.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(number);
    }

    Value::String(raw.to_string())
}

/// Looks up and parses the override for `flag_key`.
pub fn lookup_override(source: &dyn OverrideSource, flag_key: &str) -> Option<FlagValue> {
    source
        .lookup(&override_variable(flag_key))
        .map(|raw| parse_override(&raw))
}

//! Strategy parameter schemas and validation

use serde_json::Value;
use tracing::warn;

/// User-supplied parameter overrides, JSON object shaped.
pub type Params = serde_json::Map<String, Value>;

/// Errors surfaced by the registry and parameter validation.
#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("invalid parameter '{name}': {message}")]
    InvalidParam { name: String, message: String },
}

/// One declared parameter: name, display label and value constraints. The
/// schema drives both validation and form generation upstream.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub label: &'static str,
    pub kind: ParamKind,
}

#[derive(Debug, Clone)]
pub enum ParamKind {
    Int { min: i64, max: i64, default: i64 },
    Float { min: f64, max: f64, default: f64 },
    Choice { options: &'static [&'static str], default: &'static str },
}

impl ParamSpec {
    pub fn int(name: &'static str, label: &'static str, default: i64, min: i64, max: i64) -> Self {
        Self {
            name,
            label,
            kind: ParamKind::Int { min, max, default },
        }
    }

    pub fn float(name: &'static str, label: &'static str, default: f64, min: f64, max: f64) -> Self {
        Self {
            name,
            label,
            kind: ParamKind::Float { min, max, default },
        }
    }

    pub fn choice(name: &'static str, label: &'static str, default: &'static str, options: &'static [&'static str]) -> Self {
        Self {
            name,
            label,
            kind: ParamKind::Choice { options, default },
        }
    }

    fn default_value(&self) -> Value {
        match &self.kind {
            ParamKind::Int { default, .. } => Value::from(*default),
            ParamKind::Float { default, .. } => Value::from(*default),
            ParamKind::Choice { default, .. } => Value::from(*default),
        }
    }

    fn validate(&self, value: &Value) -> Result<Value, StrategyError> {
        let invalid = |message: String| StrategyError::InvalidParam {
            name: self.name.to_string(),
            message,
        };
        match &self.kind {
            ParamKind::Int { min, max, .. } => {
                let v = value
                    .as_i64()
                    .ok_or_else(|| invalid("expected an integer".to_string()))?;
                if v < *min || v > *max {
                    return Err(invalid(format!("{} out of range [{}, {}]", v, min, max)));
                }
                Ok(Value::from(v))
            }
            ParamKind::Float { min, max, .. } => {
                let v = value
                    .as_f64()
                    .ok_or_else(|| invalid("expected a number".to_string()))?;
                if v < *min || v > *max {
                    return Err(invalid(format!("{} out of range [{}, {}]", v, min, max)));
                }
                Ok(Value::from(v))
            }
            ParamKind::Choice { options, .. } => {
                let v = value
                    .as_str()
                    .ok_or_else(|| invalid("expected a string".to_string()))?;
                if !options.contains(&v) {
                    return Err(invalid(format!("'{}' is not one of {:?}", v, options)));
                }
                Ok(Value::from(v))
            }
        }
    }
}

/// Merge user overrides into the schema defaults.
///
/// Out-of-range or mistyped values are rejected with the parameter name;
/// unknown keys are ignored with a warning so old subscriptions survive
/// schema changes. The returned map holds a value for every declared
/// parameter.
pub fn validate_params(specs: &[ParamSpec], overrides: &Params) -> Result<Params, StrategyError> {
    let mut out = Params::new();
    for spec in specs {
        out.insert(spec.name.to_string(), spec.default_value());
    }

    for (key, value) in overrides {
        let Some(spec) = specs.iter().find(|s| s.name == key.as_str()) else {
            warn!("ignoring unknown strategy parameter '{}'", key);
            continue;
        };
        out.insert(key.clone(), spec.validate(value)?);
    }

    Ok(out)
}

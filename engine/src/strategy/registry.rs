//! Strategy registry
//!
//! The only way a strategy is ever constructed: an explicit key-to-factory
//! table. Callers look up by key, parameters are validated against the
//! declared schema before the factory runs, and every call hands out a
//! fresh instance.

use std::collections::HashMap;

use super::implementations::{BandReversion, EmaCross, GridDca, MtfMomentum, RangeBreakout};
use super::params::{validate_params, ParamSpec, Params, StrategyError};
use super::{Strategy, StrategySettings};

pub type StrategyFactory =
    Box<dyn Fn(StrategySettings, &Params) -> Box<dyn Strategy> + Send + Sync>;

/// One registered strategy: key, human label, parameter schema, factory.
pub struct StrategyDefinition {
    pub key: &'static str,
    pub label: &'static str,
    pub params: Vec<ParamSpec>,
    factory: StrategyFactory,
}

impl StrategyDefinition {
    pub fn new<F>(key: &'static str, label: &'static str, params: Vec<ParamSpec>, factory: F) -> Self
    where
        F: Fn(StrategySettings, &Params) -> Box<dyn Strategy> + Send + Sync + 'static,
    {
        Self {
            key,
            label,
            params,
            factory: Box::new(factory),
        }
    }
}

pub struct StrategyRegistry {
    definitions: HashMap<&'static str, StrategyDefinition>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            definitions: HashMap::new(),
        }
    }

    /// Registry preloaded with the built-in strategies.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(StrategyDefinition::new(
            EmaCross::KEY,
            "EMA Crossover",
            EmaCross::param_specs(),
            |settings, params| Box::new(EmaCross::from_params(settings, params)),
        ));
        registry.register(StrategyDefinition::new(
            BandReversion::KEY,
            "Bollinger Band Reversion",
            BandReversion::param_specs(),
            |settings, params| Box::new(BandReversion::from_params(settings, params)),
        ));
        registry.register(StrategyDefinition::new(
            RangeBreakout::KEY,
            "Opening Range Breakout",
            RangeBreakout::param_specs(),
            |settings, params| Box::new(RangeBreakout::from_params(settings, params)),
        ));
        registry.register(StrategyDefinition::new(
            MtfMomentum::KEY,
            "Multi-Timeframe Momentum",
            MtfMomentum::param_specs(),
            |settings, params| Box::new(MtfMomentum::from_params(settings, params)),
        ));
        registry.register(StrategyDefinition::new(
            GridDca::KEY,
            "DCA Grid",
            GridDca::param_specs(),
            |settings, params| Box::new(GridDca::from_params(settings, params)),
        ));
        registry
    }

    pub fn register(&mut self, definition: StrategyDefinition) {
        self.definitions.insert(definition.key, definition);
    }

    pub fn get(&self, key: &str) -> Option<&StrategyDefinition> {
        self.definitions.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.definitions.contains_key(key)
    }

    /// Registered keys, sorted for stable display.
    pub fn keys(&self) -> Vec<&'static str> {
        let mut keys: Vec<_> = self.definitions.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Validate `overrides` against the schema and build a fresh instance.
    pub fn create(
        &self,
        key: &str,
        settings: StrategySettings,
        overrides: &Params,
    ) -> Result<Box<dyn Strategy>, StrategyError> {
        let definition = self
            .definitions
            .get(key)
            .ok_or_else(|| StrategyError::UnknownStrategy(key.to_string()))?;
        let params = validate_params(&definition.params, overrides)?;
        Ok((definition.factory)(settings, &params))
    }

    /// Validate without constructing, for pre-flight checks.
    pub fn validate(&self, key: &str, overrides: &Params) -> Result<Params, StrategyError> {
        let definition = self
            .definitions
            .get(key)
            .ok_or_else(|| StrategyError::UnknownStrategy(key.to_string()))?;
        validate_params(&definition.params, overrides)
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

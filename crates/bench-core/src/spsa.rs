//! SPSA parameter tuning state

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// A single tunable engine parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpsaParameter {
    pub value: f64,
    pub min: f64,
    pub max: f64,
    /// Perturbation size used by workers
    pub step: f64,
    /// Learning rate used by workers
    pub rate: f64,
}

impl SpsaParameter {
    /// Apply a worker-computed update, clamped to the parameter's range.
    pub fn apply(&mut self, update: f64) {
        self.value = (self.value + update).clamp(self.min, self.max);
    }
}

/// Tuning run configuration and current parameter values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpsaConfig {
    pub pairs_per: u64,
    pub iterations: u64,
    pub parameters: BTreeMap<String, SpsaParameter>,
}

impl SpsaConfig {
    /// Each iteration plays a `+`/`-` perturbation pair of `pairs_per` game pairs.
    pub fn target_games(&self) -> u64 {
        self.checked_target_games().unwrap_or(u64::MAX)
    }

    fn checked_target_games(&self) -> Option<u64> {
        self.pairs_per.checked_mul(self.iterations)?.checked_mul(2)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.pairs_per == 0 || self.iterations == 0 {
            return Err(CoreError::InvalidConfig(
                "SPSA needs non-zero pairs_per and iterations".to_string(),
            ));
        }
        if self.checked_target_games().is_none() {
            return Err(CoreError::InvalidConfig(format!(
                "SPSA run of {} iterations of {} pairs is too long",
                self.iterations, self.pairs_per
            )));
        }
        if self.parameters.is_empty() {
            return Err(CoreError::InvalidConfig(
                "SPSA needs at least one parameter".to_string(),
            ));
        }
        for (name, param) in &self.parameters {
            if !(param.min <= param.value && param.value <= param.max) {
                return Err(CoreError::InvalidConfig(format!(
                    "SPSA parameter {name} has value {} outside [{}, {}]",
                    param.value, param.min, param.max
                )));
            }
        }
        Ok(())
    }

    /// Check that `updates` names exactly the configured parameters.
    pub fn check_updates(&self, updates: &BTreeMap<String, f64>) -> CoreResult<()> {
        if let Some(unknown) = updates.keys().find(|k| !self.parameters.contains_key(*k)) {
            return Err(CoreError::UnknownParameter(unknown.clone()));
        }
        if let Some(missing) = self.parameters.keys().find(|k| !updates.contains_key(*k)) {
            return Err(CoreError::MalformedDelta(format!(
                "missing SPSA update for {missing}"
            )));
        }
        if let Some((name, _)) = updates.iter().find(|(_, u)| !u.is_finite()) {
            return Err(CoreError::MalformedDelta(format!(
                "SPSA update for {name} is not finite"
            )));
        }
        Ok(())
    }

    /// Apply updates that already passed [`SpsaConfig::check_updates`].
    pub fn apply_updates(&mut self, updates: &BTreeMap<String, f64>) {
        for (name, param) in self.parameters.iter_mut() {
            if let Some(&update) = updates.get(name) {
                param.apply(update);
            }
        }
    }
}

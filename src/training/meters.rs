//! Running-mean meters scoped to one loader pass
//!
//! Means are sample-size-weighted: every update carries the batch size it
//! was computed over, so the loader-level value is the mean over samples,
//! not over batches. Accumulation is per-process; cross-replica reduction
//! belongs to the external distributed layer.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Weighted running mean for a single metric
#[derive(Debug, Clone, Default)]
pub struct AdditiveMeter {
    sum: f64,
    weight: f64,
}

impl AdditiveMeter {
    /// Fold one observation with the given weight
    pub fn update(&mut self, value: f64, weight: f64) {
        self.sum += value * weight;
        self.weight += weight;
    }

    /// Weighted mean of all observations so far
    pub fn compute(&self, name: &str) -> Result<f64> {
        if self.weight == 0.0 {
            return Err(Error::no_data(name));
        }
        Ok(self.sum / self.weight)
    }

    /// Whether any observation has been folded in
    pub fn has_data(&self) -> bool {
        self.weight > 0.0
    }
}

/// A set of meters with a declared key set.
///
/// Keys must be declared before any update; updates to undeclared keys are
/// silently skipped so batch handlers can emit phase-conditional extras
/// without the meters needing phase knowledge.
#[derive(Debug, Default)]
pub struct MeterSet {
    meters: BTreeMap<String, AdditiveMeter>,
}

impl MeterSet {
    /// Create a meter set with the given declared keys
    pub fn declare<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let meters = keys
            .into_iter()
            .map(|key| (key.into(), AdditiveMeter::default()))
            .collect();
        Self { meters }
    }

    /// Fold one observation into a declared meter; no-op for undeclared keys
    pub fn update(&mut self, key: &str, value: f64, weight: f64) {
        if let Some(meter) = self.meters.get_mut(key) {
            meter.update(value, weight);
        }
    }

    /// Finalize one key into its weighted mean
    pub fn finalize(&self, key: &str) -> Result<f64> {
        match self.meters.get(key) {
            Some(meter) => meter.compute(key),
            None => Err(Error::no_data(key)),
        }
    }

    /// Declared keys in deterministic order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.meters.keys().map(String::as_str)
    }

    /// Whether the key was declared
    pub fn is_declared(&self, key: &str) -> bool {
        self.meters.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_weighted_mean() {
        let mut meters = MeterSet::declare(["loss", "bpp"]);
        meters.update("loss", 1.0, 4.0);
        meters.update("loss", 3.0, 2.0);
        meters.update("bpp", 0.5, 6.0);

        assert_relative_eq!(meters.finalize("loss").unwrap(), (1.0 * 4.0 + 3.0 * 2.0) / 6.0);
        assert_relative_eq!(meters.finalize("bpp").unwrap(), 0.5);
    }

    #[test]
    fn test_undeclared_update_is_noop() {
        let mut meters = MeterSet::declare(["loss"]);
        meters.update("psnr", 30.0, 1.0);
        meters.update("loss", 2.0, 1.0);

        assert!(!meters.is_declared("psnr"));
        assert_relative_eq!(meters.finalize("loss").unwrap(), 2.0);
    }

    #[test]
    fn test_finalize_without_updates_is_no_data() {
        let meters = MeterSet::declare(["loss"]);
        let err = meters.finalize("loss").unwrap_err();
        assert!(matches!(err, Error::NoData { metric } if metric == "loss"));
    }

    #[test]
    fn test_finalize_undeclared_is_no_data() {
        let meters = MeterSet::declare(["loss"]);
        assert!(meters.finalize("bpp").is_err());
    }

    #[test]
    fn test_single_sample_mean_is_identity() {
        let mut meter = AdditiveMeter::default();
        meter.update(0.125, 16.0);
        assert_relative_eq!(meter.compute("x").unwrap(), 0.125);
    }
}

// SPDX-License-Identifier: Apache-2.0

//! Pool sizing policy: bounds for the proactor pool (C2) and worker pool
//! (C5), spec §6.

use serde::{Deserialize, Serialize};

/// `min`/`max` bounds for a dynamically sized pool. `None` means "use the
/// `ncpu`-derived default" (spec §6: `2*ncpu`/`4*ncpu`), resolved by
/// [`PoolBounds::resolve`] once the host's parallelism is known.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct PoolBounds {
    /// Minimum number of live executors/workers.
    #[serde(default)]
    pub min: Option<usize>,
    /// Maximum number of live executors/workers.
    #[serde(default)]
    pub max: Option<usize>,
}

impl PoolBounds {
    /// Resolves `min`/`max` against the host's available parallelism,
    /// applying spec §6's `2*ncpu`/`4*ncpu` defaults for unset fields.
    #[must_use]
    pub fn resolve(&self, ncpu: usize) -> (usize, usize) {
        let min = self.min.unwrap_or_else(|| (2 * ncpu).max(1));
        let max = self.max.unwrap_or_else(|| (4 * ncpu).max(1));
        (min, max)
    }

    /// Collects validation errors for this bound pair, given the resolved
    /// `(min, max)` values, under `path_prefix` (e.g. `"pool.io"`).
    #[must_use]
    pub fn validation_errors(&self, path_prefix: &str, ncpu: usize) -> Vec<String> {
        let mut errors = Vec::new();
        let (min, max) = self.resolve(ncpu);
        if min == 0 {
            errors.push(format!("{path_prefix}.min must be greater than 0"));
        }
        if max == 0 {
            errors.push(format!("{path_prefix}.max must be greater than 0"));
        }
        if min > max {
            errors.push(format!(
                "{path_prefix}.min ({min}) must be <= {path_prefix}.max ({max})"
            ));
        }
        errors
    }
}

/// Top-level pool policy: proactor (I/O) pool and worker (logic) pool bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct PoolPolicy {
    /// Bounds for the I/O proactor pool (spec §4.2).
    #[serde(default)]
    pub io: PoolBounds,
    /// Bounds for the logic worker pool (spec §4.5).
    #[serde(default)]
    pub worker: PoolBounds,
}

impl PoolPolicy {
    /// Returns validation errors for both pool bounds.
    #[must_use]
    pub fn validation_errors(&self, ncpu: usize) -> Vec<String> {
        let mut errors = self.io.validation_errors("pool.io", ncpu);
        errors.extend(self.worker.validation_errors("pool.worker", ncpu));
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_to_ncpu_multiples() {
        let bounds = PoolBounds::default();
        assert_eq!(bounds.resolve(4), (8, 16));
    }

    #[test]
    fn explicit_values_are_not_overridden() {
        let bounds = PoolBounds {
            min: Some(3),
            max: Some(6),
        };
        assert_eq!(bounds.resolve(4), (3, 6));
    }

    #[test]
    fn min_greater_than_max_is_rejected() {
        let bounds = PoolBounds {
            min: Some(10),
            max: Some(2),
        };
        let errors = bounds.validation_errors("pool.io", 4);
        assert!(errors.iter().any(|e| e.contains("must be <=")));
    }
}

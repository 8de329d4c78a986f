use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::index::MAX_LEVEL;
use crate::interp::{Prolong, Restrict};
use crate::smoother::Smoother;




/**
 * Parameters of a multigrid solve. Any serde format can supply them;
 * missing entries take the defaults.
 */
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Number of active axes (1, 2, or 3).
    pub rank: usize,
    /// Cycles after which the solve stops as diverged.
    pub iter_max: usize,
    /// Convergence threshold on `rr / rr0`, the ratio of squared residual
    /// norms.
    pub res_tol: f64,
    /// Coarsest level of the V-cycle, where the coarse solver runs.
    pub min_level: u32,
    /// Finest level of the V-cycle, where residuals are measured.
    pub max_level: u32,
    /// Log the residual every this many cycles (0 disables periodic output).
    pub monitor_iter: usize,
    pub smooth_pre: Option<Smoother>,
    pub smooth_post: Option<Smoother>,
    pub smooth_last: Option<Smoother>,
    pub solve_coarse: Smoother,
    pub restrict: Restrict,
    pub prolong: Prolong,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            rank: 3,
            iter_max: 50,
            res_tol: 1e-8,
            min_level: 0,
            max_level: 0,
            monitor_iter: 1,
            smooth_pre: Some(Smoother::Jacobi { weight: 2.0 / 3.0, sweeps: 2 }),
            smooth_post: Some(Smoother::Jacobi { weight: 2.0 / 3.0, sweeps: 2 }),
            smooth_last: None,
            solve_coarse: Smoother::Jacobi { weight: 1.0, sweeps: 10 },
            restrict: Restrict::Average,
            prolong: Prolong::Linear,
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=3).contains(&self.rank) {
            return Err(Error::InvalidConfig(format!("rank must be 1, 2, or 3 (got {})", self.rank)));
        }
        if self.min_level > self.max_level {
            return Err(Error::InvalidConfig(format!(
                "min_level {} exceeds max_level {}",
                self.min_level, self.max_level
            )));
        }
        if self.max_level > MAX_LEVEL {
            return Err(Error::LevelOutOfRange(self.max_level, MAX_LEVEL));
        }
        if !(self.res_tol > 0.0 && self.res_tol.is_finite()) {
            return Err(Error::InvalidConfig(format!("res_tol must be positive (got {})", self.res_tol)));
        }
        if self.iter_max == 0 {
            return Err(Error::InvalidConfig("iter_max must be positive".into()));
        }
        let smoothers = [self.smooth_pre, self.smooth_post, self.smooth_last, Some(self.solve_coarse)];

        for smoother in smoothers.iter().flatten() {
            if let Smoother::Jacobi { weight, .. } = smoother {
                if !(*weight > 0.0 && *weight <= 1.0) {
                    return Err(Error::InvalidConfig(format!("Jacobi weight must be in (0, 1] (got {})", weight)));
                }
            }
        }
        Ok(())
    }

    /// Number of children of a refined block.
    pub fn num_children(&self) -> usize {
        1 << self.rank
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn default_configuration_is_valid() {
        assert!(SolverConfig::default().validate().is_ok());
        assert_eq!(SolverConfig::default().num_children(), 8);
    }

    #[test]
    fn invalid_configurations_are_rejected() {
        let bad = [
            SolverConfig { rank: 4, ..Default::default() },
            SolverConfig { min_level: 2, max_level: 1, ..Default::default() },
            SolverConfig { max_level: 21, ..Default::default() },
            SolverConfig { res_tol: 0.0, ..Default::default() },
            SolverConfig { res_tol: f64::NAN, ..Default::default() },
            SolverConfig { iter_max: 0, ..Default::default() },
            SolverConfig { smooth_pre: Some(Smoother::Jacobi { weight: 1.5, sweeps: 1 }), ..Default::default() },
        ];
        for config in &bad {
            assert!(config.validate().is_err(), "{:?}", config);
        }
    }

    #[test]
    fn missing_entries_take_defaults() {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&partial_entries(), &mut bytes).unwrap();
        let config: SolverConfig = ciborium::de::from_reader(bytes.as_slice()).unwrap();
        assert_eq!(config.max_level, 3);
        assert_eq!(config.iter_max, SolverConfig::default().iter_max);
        assert_eq!(config.solve_coarse, SolverConfig::default().solve_coarse);
    }

    fn partial_entries() -> std::collections::BTreeMap<String, u32> {
        let mut map = std::collections::BTreeMap::new();
        map.insert("max_level".to_string(), 3);
        map
    }
}

use crate::error::{LayoutError, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BaseGridKind {
    /// Keep geographic positions, skip schematization.
    Geographic,
    Octilinear,
    Orthoradial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SolverBackend {
    Glpk,
    Cbc,
    Gurobi,
    Heuristic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OnInfeasible {
    /// Surface the failure to the caller.
    Abort,
    /// Double the bounding box, rebuild the grid, retry once.
    Grow,
}

/// Process-wide configuration, immutable once constructed and threaded
/// through every stage constructor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub mode: BaseGridKind,

    // Schematization (stage E)
    pub cell_size: f64,
    pub max_station_dis: f64,
    pub p_0: f64,
    pub p_45: f64,
    pub p_90: f64,
    pub p_135: f64,
    pub vertical_pen: f64,
    pub horizontal_pen: f64,
    pub diagonal_pen: f64,
    pub on_infeasible: OnInfeasible,

    // Topology builder (stage B)
    pub max_aggr_dist: f64,
    pub smooth: f64,

    // Line ordering (stage D)
    pub solver: SolverBackend,
    pub time_budget_ms: u64,
    pub seed: u64,
    pub prune: bool,
    pub solver_threads: u32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            mode: BaseGridKind::Octilinear,
            cell_size: 100.0,
            max_station_dis: 3.0,
            p_0: 0.0,
            p_45: 3.0,
            p_90: 1.5,
            p_135: 0.5,
            vertical_pen: 0.5,
            horizontal_pen: 0.5,
            diagonal_pen: 0.75,
            on_infeasible: OnInfeasible::Abort,
            max_aggr_dist: 150.0,
            smooth: 20.0,
            solver: SolverBackend::Heuristic,
            time_budget_ms: 60_000,
            seed: 1,
            prune: true,
            solver_threads: 4,
        }
    }
}

impl LayoutConfig {
    /// Checks the cross-parameter invariants that the grid construction
    /// assumes. Must be called once before any stage runs.
    pub fn validate(&self) -> Result<()> {
        if !(self.p_0 < self.p_135 && self.p_135 < self.p_90 && self.p_90 < self.p_45) {
            return Err(LayoutError::Config(format!(
                "bend penalties must satisfy p_0 < p_135 < p_90 < p_45 (got {}, {}, {}, {})",
                self.p_0, self.p_135, self.p_90, self.p_45
            )));
        }
        if self.cell_size <= 0.0 {
            return Err(LayoutError::Config(format!(
                "cell_size must be positive (got {})",
                self.cell_size
            )));
        }
        if self.max_station_dis <= 0.0 {
            return Err(LayoutError::Config(format!(
                "max_station_dis must be positive (got {})",
                self.max_station_dis
            )));
        }
        if self.max_aggr_dist <= 0.0 {
            return Err(LayoutError::Config(format!(
                "max_aggr_dist must be positive (got {})",
                self.max_aggr_dist
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        LayoutConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_unordered_bend_penalties() {
        let cfg = LayoutConfig {
            p_135: 2.0,
            p_90: 1.0,
            ..LayoutConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}

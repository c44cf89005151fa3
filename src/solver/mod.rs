// ===========================================================================
// Abstract MILP interface consumed by the line-ordering optimizer. Kept
// deliberately small: columns, rows, coefficients, solve, value lookup.
// Back-ends are selected at configuration time; an unavailable back-end is
// an error the caller may downgrade to the heuristic.
// ===========================================================================

#[cfg(feature = "ilp-cbc")]
pub mod cbc;

use crate::config::SolverBackend;
use crate::error::{LayoutError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Bin,
    Int,
    Cont,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowSense {
    /// Equality.
    Fix,
    /// Upper bound: row value <= rhs.
    Up,
    /// Lower bound: row value >= rhs.
    Lo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptSense {
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    Optimal,
    Feasible,
    Infeasible,
    Timeout,
}

pub type ColId = usize;
pub type RowId = usize;

pub trait IlpSolver {
    fn add_col(&mut self, name: &str, kind: VarKind, obj_coef: f64) -> ColId;
    fn add_row(&mut self, name: &str, rhs: f64, sense: RowSense) -> RowId;
    fn add_col_to_row(&mut self, row: RowId, col: ColId, coef: f64);
    /// Flushes pending structure; must be called before `solve`.
    fn update(&mut self);
    fn solve(&mut self) -> SolveStatus;
    fn get_var_val(&self, name: &str) -> f64;
    fn get_obj_val(&self) -> f64;
    fn get_var_by_name(&self, name: &str) -> Option<ColId>;
    fn num_constrs(&self) -> usize;
    fn num_vars(&self) -> usize;
    /// Wall-clock ceiling for `solve`.
    fn set_time_limit_ms(&mut self, ms: u64);
    /// Thread-count hint; 1 guarantees deterministic objective values.
    fn set_threads(&mut self, threads: u32);
}

#[cfg(feature = "ilp-cbc")]
fn make_cbc(sense: OptSense) -> Result<Box<dyn IlpSolver>> {
    Ok(Box::new(cbc::CbcSolver::new(sense)))
}

#[cfg(not(feature = "ilp-cbc"))]
fn make_cbc(_sense: OptSense) -> Result<Box<dyn IlpSolver>> {
    Err(LayoutError::Config(
        "cbc back-end not compiled in (enable the ilp-cbc feature)".to_string(),
    ))
}

/// Back-end factory. Recognized names that are not compiled in (or for
/// which no bindings exist) report themselves unavailable rather than
/// silently substituting another solver.
pub fn get_solver(backend: SolverBackend, sense: OptSense) -> Result<Box<dyn IlpSolver>> {
    match backend {
        SolverBackend::Cbc => make_cbc(sense),
        SolverBackend::Glpk | SolverBackend::Gurobi => Err(LayoutError::Config(format!(
            "solver back-end {backend:?} has no bindings in this build"
        ))),
        SolverBackend::Heuristic => Err(LayoutError::Config(
            "heuristic is not an ILP back-end".to_string(),
        )),
    }
}

#[cfg(test)]
pub mod testutil {
    use super::*;
    use ahash::AHashMap;

    /// Structure-recording solver for assembly tests: solves nothing but
    /// captures the model shape.
    #[derive(Default)]
    pub struct RecordingSolver {
        pub cols: Vec<(String, VarKind, f64)>,
        pub rows: Vec<(String, f64, RowSense)>,
        pub entries: Vec<(RowId, ColId, f64)>,
        pub by_name: AHashMap<String, ColId>,
        pub updated: bool,
    }

    impl IlpSolver for RecordingSolver {
        fn add_col(&mut self, name: &str, kind: VarKind, obj_coef: f64) -> ColId {
            let id = self.cols.len();
            self.cols.push((name.to_string(), kind, obj_coef));
            self.by_name.insert(name.to_string(), id);
            id
        }

        fn add_row(&mut self, name: &str, rhs: f64, sense: RowSense) -> RowId {
            let id = self.rows.len();
            self.rows.push((name.to_string(), rhs, sense));
            id
        }

        fn add_col_to_row(&mut self, row: RowId, col: ColId, coef: f64) {
            self.entries.push((row, col, coef));
        }

        fn update(&mut self) {
            self.updated = true;
        }

        fn solve(&mut self) -> SolveStatus {
            SolveStatus::Infeasible
        }

        fn get_var_val(&self, _name: &str) -> f64 {
            0.0
        }

        fn get_obj_val(&self) -> f64 {
            0.0
        }

        fn get_var_by_name(&self, name: &str) -> Option<ColId> {
            self.by_name.get(name).copied()
        }

        fn num_constrs(&self) -> usize {
            self.rows.len()
        }

        fn num_vars(&self) -> usize {
            self.cols.len()
        }

        fn set_time_limit_ms(&mut self, _ms: u64) {}

        fn set_threads(&mut self, _threads: u32) {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_backends_report_unavailable() {
        assert!(get_solver(SolverBackend::Glpk, OptSense::Min).is_err());
        assert!(get_solver(SolverBackend::Gurobi, OptSense::Min).is_err());
        assert!(get_solver(SolverBackend::Heuristic, OptSense::Min).is_err());
    }
}

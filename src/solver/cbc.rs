// Coin-OR Cbc back-end, wrapped through good_lp the same way the rest of
// the code base drives it. The model is accumulated column/row-wise and
// materialized at solve time, since good_lp builds problems expression-
// first.

use super::{ColId, IlpSolver, OptSense, RowId, RowSense, SolveStatus, VarKind};
use ahash::AHashMap;
use good_lp::{variable, Expression, ProblemVariables, ResolutionError, Solution, SolverModel};
use log::{debug, warn};

pub struct CbcSolver {
    sense: OptSense,
    cols: Vec<(String, VarKind, f64)>,
    rows: Vec<(f64, RowSense)>,
    // row -> (col, coef) entries
    entries: Vec<Vec<(ColId, f64)>>,
    by_name: AHashMap<String, ColId>,
    values: Vec<f64>,
    obj_val: f64,
    time_limit_ms: u64,
    threads: u32,
}

impl CbcSolver {
    pub fn new(sense: OptSense) -> Self {
        Self {
            sense,
            cols: Vec::new(),
            rows: Vec::new(),
            entries: Vec::new(),
            by_name: AHashMap::new(),
            values: Vec::new(),
            obj_val: 0.0,
            time_limit_ms: 60_000,
            threads: 1,
        }
    }
}

impl IlpSolver for CbcSolver {
    fn add_col(&mut self, name: &str, kind: VarKind, obj_coef: f64) -> ColId {
        let id = self.cols.len();
        self.cols.push((name.to_string(), kind, obj_coef));
        self.by_name.insert(name.to_string(), id);
        id
    }

    fn add_row(&mut self, _name: &str, rhs: f64, sense: RowSense) -> RowId {
        let id = self.rows.len();
        self.rows.push((rhs, sense));
        self.entries.push(Vec::new());
        id
    }

    fn add_col_to_row(&mut self, row: RowId, col: ColId, coef: f64) {
        self.entries[row].push((col, coef));
    }

    fn update(&mut self) {
        // Structure is accumulated eagerly; nothing to flush.
    }

    fn solve(&mut self) -> SolveStatus {
        let mut vars = ProblemVariables::new();
        let handles: Vec<good_lp::Variable> = self
            .cols
            .iter()
            .map(|(_, kind, _)| match kind {
                VarKind::Bin => vars.add(variable().binary()),
                VarKind::Int => vars.add(variable().integer()),
                VarKind::Cont => vars.add(variable()),
            })
            .collect();

        let mut objective: Expression = 0.into();
        for (i, (_, _, coef)) in self.cols.iter().enumerate() {
            if *coef != 0.0 {
                objective += handles[i] * *coef;
            }
        }

        let mut model = match self.sense {
            OptSense::Min => vars
                .minimise(objective.clone())
                .using(good_lp::solvers::coin_cbc::coin_cbc),
            OptSense::Max => vars
                .maximise(objective.clone())
                .using(good_lp::solvers::coin_cbc::coin_cbc),
        };
        model.set_parameter("seconds", &format!("{}", self.time_limit_ms / 1000));
        model.set_parameter("threads", &format!("{}", self.threads));

        for (row_idx, (rhs, sense)) in self.rows.iter().enumerate() {
            let mut expr: Expression = 0.into();
            for (col, coef) in &self.entries[row_idx] {
                expr += handles[*col] * *coef;
            }
            let constraint = match sense {
                RowSense::Fix => expr.eq(*rhs),
                RowSense::Up => expr.leq(*rhs),
                RowSense::Lo => expr.geq(*rhs),
            };
            let _ = model.add_constraint(constraint);
        }

        debug!(
            "cbc: solving {} columns, {} rows",
            self.cols.len(),
            self.rows.len()
        );

        match model.solve() {
            Ok(solution) => {
                self.values = handles.iter().map(|h| solution.value(*h)).collect();
                self.obj_val = self
                    .cols
                    .iter()
                    .enumerate()
                    .map(|(i, (_, _, coef))| coef * self.values[i])
                    .sum();
                SolveStatus::Optimal
            }
            Err(ResolutionError::Infeasible) => SolveStatus::Infeasible,
            Err(ResolutionError::Unbounded) => {
                warn!("cbc reported the model unbounded");
                SolveStatus::Infeasible
            }
            Err(err) => {
                warn!("cbc stopped without a solution: {err}");
                SolveStatus::Timeout
            }
        }
    }

    fn get_var_val(&self, name: &str) -> f64 {
        self.by_name
            .get(name)
            .and_then(|id| self.values.get(*id))
            .copied()
            .unwrap_or(0.0)
    }

    fn get_obj_val(&self) -> f64 {
        self.obj_val
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

    fn set_time_limit_ms(&mut self, ms: u64) {
        self.time_limit_ms = ms.max(1000);
    }

    fn set_threads(&mut self, threads: u32) {
        self.threads = threads.max(1);
    }
}

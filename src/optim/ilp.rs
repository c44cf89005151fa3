// ILP formulation of the ordering problem, assembled against the abstract
// solver interface. One binary x_(e,l,p) per line/position pair with two
// assignment rows per edge; crossing and splitting indicators are forced
// through upper-bound rows and priced in the objective.

use super::objective::{diff_seg_crosses, same_seg_crosses, CompCtx, OrderCfg};
use crate::error::{LayoutError, Result};
use crate::solver::{IlpSolver, RowSense, SolveStatus, VarKind};
use log::debug;

fn var_name(e: usize, l: usize, p: usize) -> String {
    format!("x_(e{e},l={l},p={p})")
}

/// Builds, solves, and extracts. The caller owns back-end selection and
/// fallback policy.
pub fn solve_with_ilp(
    ctx: &CompCtx,
    solver: &mut dyn IlpSolver,
    prune: bool,
    time_budget_ms: u64,
    threads: u32,
) -> Result<OrderCfg> {
    let active: Vec<usize> = ctx
        .edges
        .iter()
        .copied()
        .filter(|e| {
            let card = ctx.bundles[e].cardinality();
            if prune { card >= 2 } else { card >= 1 }
        })
        .collect();

    // --- assignment structure ---
    for &e in &active {
        let card = ctx.bundles[&e].cardinality();

        let pos_rows: Vec<usize> = (0..card)
            .map(|p| solver.add_row(&format!("sum(e{e},p={p})"), 1.0, RowSense::Fix))
            .collect();

        for l in 0..card {
            let line_row = solver.add_row(&format!("sum(e{e},l={l})"), 1.0, RowSense::Fix);
            for p in 0..card {
                let col = solver.add_col(&var_name(e, l, p), VarKind::Bin, 0.0);
                solver.add_col_to_row(line_row, col, 1.0);
                solver.add_col_to_row(pos_rows[p], col, 1.0);
            }
        }
    }

    let is_active = |e: usize| active.binary_search(&e).is_ok();

    // --- crossing and splitting indicators per node ---
    for &n in &ctx.nodes {
        let nc = &ctx.node_ctx[&n];

        // Same-segment: pairs of incident edges sharing >= 2 lines.
        for ia in 0..nc.incidences.len() {
            for ib in (ia + 1)..nc.incidences.len() {
                let a_inc = &nc.incidences[ia];
                let b_inc = &nc.incidences[ib];
                let (ea, eb) = (a_inc.opt_edge, b_inc.opt_edge);
                if ea == eb || !is_active(ea) || !is_active(eb) {
                    continue;
                }
                let (oa, ob) = (&ctx.og.edges[ea], &ctx.og.edges[eb]);
                if oa.from == oa.to || ob.from == ob.to {
                    continue;
                }
                let (ba, bb) = (&ctx.bundles[&ea], &ctx.bundles[&eb]);
                let (card_a, card_b) = (ba.cardinality(), bb.cardinality());

                let shared: Vec<u32> = ba
                    .keys
                    .iter()
                    .copied()
                    .filter(|k| bb.index_of(*k).is_some())
                    .filter(|k| {
                        !nc.exceptions.iter().any(|(key, x, y)| {
                            key == k
                                && ((*x == a_inc.end_edge_id && *y == b_inc.end_edge_id)
                                    || (*x == b_inc.end_edge_id && *y == a_inc.end_edge_id))
                        })
                    })
                    .collect();
                if shared.len() < 2 {
                    continue;
                }

                for x in 0..shared.len() {
                    for y in (x + 1)..shared.len() {
                        let (ka, kb) = (shared[x], shared[y]);
                        let (la, lb) = (ba.index_of(ka).unwrap(), ba.index_of(kb).unwrap());
                        let (ma, mb) = (bb.index_of(ka).unwrap(), bb.index_of(kb).unwrap());

                        let penalty =
                            (nc.pen_same * ba.rels[la] * ba.rels[lb]) as f64;
                        let dec = solver.add_col(
                            &format!("x_dec(e{ea},e{eb},k{ka},k{kb},n{n})"),
                            VarKind::Bin,
                            penalty,
                        );

                        for pa in 0..card_a {
                            for pb in 0..card_a {
                                if pa == pb {
                                    continue;
                                }
                                for qa in 0..card_b {
                                    for qb in 0..card_b {
                                        if qa == qb {
                                            continue;
                                        }
                                        if !same_seg_crosses(
                                            card_a,
                                            card_b,
                                            oa.to == n,
                                            ob.from == n,
                                            pa,
                                            pb,
                                            qa,
                                            qb,
                                        ) {
                                            continue;
                                        }
                                        let row = solver.add_row(
                                            &format!(
                                                "dec_sum(e{ea},e{eb},k{ka},k{kb},{pa},{pb},{qa},{qb},n{n})"
                                            ),
                                            3.0,
                                            RowSense::Up,
                                        );
                                        let c1 = solver.get_var_by_name(&var_name(ea, la, pa));
                                        let c2 = solver.get_var_by_name(&var_name(ea, lb, pb));
                                        let c3 = solver.get_var_by_name(&var_name(eb, ma, qa));
                                        let c4 = solver.get_var_by_name(&var_name(eb, mb, qb));
                                        for c in [c1, c2, c3, c4] {
                                            let col = c.ok_or_else(|| {
                                                LayoutError::InvariantViolated(
                                                    "position variable missing from model"
                                                        .to_string(),
                                                )
                                            })?;
                                            solver.add_col_to_row(row, col, 1.0);
                                        }
                                        solver.add_col_to_row(row, dec, -1.0);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        // Different-segment crossings and splittings, from each carrying
        // active edge.
        for a_inc in &nc.incidences {
            let ea = a_inc.opt_edge;
            if !is_active(ea) {
                continue;
            }
            let oa = &ctx.og.edges[ea];
            if oa.from == oa.to {
                continue;
            }
            let ba = &ctx.bundles[&ea];
            let card = ba.cardinality();

            for i in 0..card {
                for j in (i + 1)..card {
                    let (ka, kb) = (ba.keys[i], ba.keys[j]);
                    let part_a = ctx.partner_edge(nc, ea, a_inc.end_edge_id, ka);
                    let part_b = ctx.partner_edge(nc, ea, a_inc.end_edge_id, kb);
                    let (Some(ca), Some(cb)) = (part_a, part_b) else {
                        continue;
                    };
                    if ca == cb {
                        continue;
                    }

                    let angle_c = nc
                        .incidences
                        .iter()
                        .find(|inc| inc.opt_edge == ca)
                        .unwrap()
                        .angle;
                    let angle_d = nc
                        .incidences
                        .iter()
                        .find(|inc| inc.opt_edge == cb)
                        .unwrap()
                        .angle;

                    let cross_pen = (nc.pen_diff * ba.rels[i] * ba.rels[j]) as f64;
                    let dec_cross = solver.add_col(
                        &format!("x_dec(e{ea},e{ca},e{cb},k{ka},k{kb},n{n})"),
                        VarKind::Bin,
                        cross_pen,
                    );
                    let dec_split = solver.add_col(
                        &format!("x_split(e{ea},k{ka},k{kb},n{n})"),
                        VarKind::Bin,
                        nc.pen_split as f64,
                    );

                    for pa in 0..card {
                        for pb in 0..card {
                            if pa == pb {
                                continue;
                            }
                            if diff_seg_crosses(a_inc.angle, angle_c, angle_d, oa.from == n, pa, pb)
                            {
                                let row = solver.add_row(
                                    &format!("dec_sum(e{ea},k{ka},k{kb},{pa},{pb},n{n})"),
                                    1.0,
                                    RowSense::Up,
                                );
                                add_pair(solver, row, ea, i, pa, j, pb)?;
                                solver.add_col_to_row(row, dec_cross, -1.0);
                            }
                            if pa.abs_diff(pb) > 1 {
                                let row = solver.add_row(
                                    &format!("split_sum(e{ea},k{ka},k{kb},{pa},{pb},n{n})"),
                                    1.0,
                                    RowSense::Up,
                                );
                                add_pair(solver, row, ea, i, pa, j, pb)?;
                                solver.add_col_to_row(row, dec_split, -1.0);
                            }
                        }
                    }
                }
            }
        }
    }

    solver.update();
    solver.set_time_limit_ms(time_budget_ms);
    solver.set_threads(threads);

    debug!(
        "ilp: {} columns, {} rows over {} active edges",
        solver.num_vars(),
        solver.num_constrs(),
        active.len()
    );

    match solver.solve() {
        SolveStatus::Optimal | SolveStatus::Feasible => {}
        SolveStatus::Infeasible => {
            return Err(LayoutError::Infeasible(
                "ordering ILP reported infeasible".to_string(),
            ));
        }
        SolveStatus::Timeout => {
            return Err(LayoutError::Timeout {
                stage: "line-ordering",
                budget_ms: time_budget_ms,
            });
        }
    }

    // --- extraction ---
    let mut cfg = OrderCfg::default();
    for &e in &active {
        let card = ctx.bundles[&e].cardinality();
        let mut perm = vec![usize::MAX; card];
        for l in 0..card {
            let mut found = false;
            for p in 0..card {
                if solver.get_var_val(&var_name(e, l, p)) > 0.5 {
                    if found || perm[p] != usize::MAX {
                        return Err(LayoutError::InvariantViolated(format!(
                            "solver assigned line {l} of opt edge {e} twice"
                        )));
                    }
                    perm[p] = l;
                    found = true;
                }
            }
            if !found {
                return Err(LayoutError::InvariantViolated(format!(
                    "solver left line {l} of opt edge {e} unplaced"
                )));
            }
        }
        cfg.insert(e, perm);
    }

    // The objective recomputed from the extracted orders must match what
    // the solver reported.
    let recomputed = ctx.score(&cfg) as f64;
    if (recomputed - solver.get_obj_val()).abs() > 1e-6 {
        return Err(LayoutError::InvariantViolated(format!(
            "objective mismatch: recomputed {recomputed}, solver reported {}",
            solver.get_obj_val()
        )));
    }

    Ok(cfg)
}

fn add_pair(
    solver: &mut dyn IlpSolver,
    row: usize,
    e: usize,
    l1: usize,
    p1: usize,
    l2: usize,
    p2: usize,
) -> Result<()> {
    for (l, p) in [(l1, p1), (l2, p2)] {
        let col = solver.get_var_by_name(&var_name(e, l, p)).ok_or_else(|| {
            LayoutError::InvariantViolated("position variable missing from model".to_string())
        })?;
        solver.add_col_to_row(row, col, 1.0);
    }
    Ok(())
}

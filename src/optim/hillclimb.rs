// Approximate and small-exact strategies. The exhaustive scan is used for
// tiny solution spaces; the seeded hill climb is the general fallback and
// the `heuristic` back-end.

use super::objective::{CompCtx, OrderCfg};
use ahash::AHashMap;
use log::debug;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::time::Instant;

/// Lexicographic next-permutation, in-place. Returns false once the
/// sequence was the last (descending) permutation, restoring ascending
/// order so odometer-style carries restart cleanly.
fn next_permutation(perm: &mut [usize]) -> bool {
    if perm.len() < 2 {
        return false;
    }
    let mut i = perm.len() - 1;
    while i > 0 && perm[i - 1] >= perm[i] {
        i -= 1;
    }
    if i == 0 {
        perm.reverse();
        return false;
    }
    let mut j = perm.len() - 1;
    while perm[j] <= perm[i - 1] {
        j -= 1;
    }
    perm.swap(i - 1, j);
    perm[i..].reverse();
    true
}

/// Full enumeration of the component's solution space, with early exit at
/// score zero. Only called when the space is small.
pub fn exhaustive(ctx: &CompCtx, deadline: Instant) -> (OrderCfg, bool) {
    let active: Vec<usize> = ctx
        .edges
        .iter()
        .copied()
        .filter(|e| ctx.bundles[e].cardinality() >= 2)
        .collect();

    let mut cur: OrderCfg = active
        .iter()
        .map(|&e| (e, (0..ctx.bundles[&e].cardinality()).collect()))
        .collect();

    let mut best = cur.clone();
    let mut best_score = ctx.score(&cur);
    let mut iters = 0u64;

    'scan: while best_score > 0 && !active.is_empty() {
        // Odometer step over per-edge permutations.
        for (i, &e) in active.iter().enumerate() {
            if next_permutation(cur.get_mut(&e).unwrap()) {
                break;
            }
            if i == active.len() - 1 {
                break 'scan;
            }
        }

        let score = ctx.score(&cur);
        if score < best_score {
            best_score = score;
            best = cur.clone();
        }

        iters += 1;
        if iters % 1024 == 0 && Instant::now() >= deadline {
            debug!("exhaustive scan hit the deadline after {iters} iterations");
            return (best, true);
        }
    }

    debug!("exhaustive scan finished, score {best_score}");
    (best, false)
}

/// Seeded local search: start from the order inherited from the topology
/// stage; at every node visit the adjacent edges in a seeded random
/// permutation and apply adjacent-position swaps that reduce the
/// objective; stop when a full sweep finds nothing or the budget expires.
/// Termination at a sweep without improvement makes the result a local
/// optimum under single adjacent swaps.
pub fn hill_climb(ctx: &CompCtx, seed: u64, deadline: Instant) -> (OrderCfg, bool) {
    let mut cfg = ctx.initial_config();
    let mut rng = StdRng::seed_from_u64(seed);

    // Adjacency restricted to the component's multi-line edges.
    let node_edges: AHashMap<usize, Vec<usize>> = ctx
        .nodes
        .iter()
        .map(|&n| {
            let edges: Vec<usize> = ctx.node_ctx[&n]
                .incidences
                .iter()
                .map(|i| i.opt_edge)
                .filter(|e| ctx.bundles[e].cardinality() >= 2)
                .collect();
            (n, edges)
        })
        .collect();

    loop {
        let mut improved = false;

        for &n in &ctx.nodes {
            let mut edges = node_edges[&n].clone();
            edges.shuffle(&mut rng);

            for e in edges {
                let card = ctx.bundles[&e].cardinality();
                for p in 0..card - 1 {
                    let before = ctx.score_edge(e, &cfg);
                    cfg.get_mut(&e).unwrap().swap(p, p + 1);
                    let after = ctx.score_edge(e, &cfg);
                    if after < before {
                        improved = true;
                    } else {
                        cfg.get_mut(&e).unwrap().swap(p, p + 1);
                    }
                }
            }

            if Instant::now() >= deadline {
                debug!("hill climb hit the deadline, returning best so far");
                return (cfg, true);
            }
        }

        if !improved {
            break;
        }
    }

    (cfg, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_permutation_cycles_in_order() {
        let mut p = vec![0, 1, 2];
        let mut seen = vec![p.clone()];
        while next_permutation(&mut p) {
            seen.push(p.clone());
        }
        assert_eq!(seen.len(), 6);
        assert_eq!(seen[0], vec![0, 1, 2]);
        assert_eq!(seen[5], vec![2, 1, 0]);
        // strictly increasing lexicographic order
        for w in seen.windows(2) {
            assert!(w[0] < w[1]);
        }
    }
}

// Shared objective evaluation: every strategy (exhaustive, ILP,
// hill climb) and the post-solve cross-check score configurations through
// this module, so "optimal" means the same thing everywhere.

use super::scorer::Scorer;
use crate::linegraph::LineGraph;
use crate::optgraph::OptGraph;
use ahash::AHashMap;
use std::f64::consts::PI;

/// Track layout candidate: opt edge index -> occurrence indices in track
/// order. Edges absent from the map are in bundle order.
pub type OrderCfg = AHashMap<usize, Vec<usize>>;

pub struct Bundle {
    /// Interned line key per occurrence, in bundle order.
    pub keys: Vec<u32>,
    /// Collapsed-relative count per occurrence.
    pub rels: Vec<u64>,
    /// Line ids per occurrence (tie-breaks, write-back).
    pub ids: Vec<String>,
    key_index: AHashMap<u32, usize>,
}

impl Bundle {
    pub fn cardinality(&self) -> usize {
        self.keys.len()
    }

    pub fn index_of(&self, key: u32) -> Option<usize> {
        self.key_index.get(&key).copied()
    }
}

pub struct Incidence {
    pub opt_edge: usize,
    /// Bearing of the edge leaving the node, [0, 2π).
    pub angle: f64,
    /// Underlying line graph edge id at this end, for exception lookup.
    pub end_edge_id: i64,
}

pub struct NodeCtx {
    pub incidences: Vec<Incidence>,
    pub pen_same: u64,
    pub pen_diff: u64,
    pub pen_split: u64,
    /// (line key, underlying edge a, underlying edge b) triples through
    /// which the line does not continue.
    pub exceptions: Vec<(u32, i64, i64)>,
}

impl NodeCtx {
    fn continues(&self, key: u32, end_a: i64, end_b: i64) -> bool {
        !self
            .exceptions
            .iter()
            .any(|(k, a, b)| *k == key && ((*a == end_a && *b == end_b) || (*a == end_b && *b == end_a)))
    }
}

/// Per-component scoring context, immutable during optimization.
pub struct CompCtx<'a> {
    pub og: &'a OptGraph,
    /// Opt edge indices in the component, ascending.
    pub edges: Vec<usize>,
    /// Opt node indices touched by the component, ascending.
    pub nodes: Vec<usize>,
    pub bundles: AHashMap<usize, Bundle>,
    pub node_ctx: AHashMap<usize, NodeCtx>,
}

impl<'a> CompCtx<'a> {
    pub fn build(
        graph: &LineGraph,
        og: &'a OptGraph,
        component: &[usize],
        scorer: &dyn Scorer,
    ) -> CompCtx<'a> {
        let mut edges = component.to_vec();
        edges.sort_unstable();

        let mut nodes: Vec<usize> = edges
            .iter()
            .flat_map(|&e| [og.edges[e].from, og.edges[e].to])
            .collect();
        nodes.sort_unstable();
        nodes.dedup();

        // Deterministic line interning: keys follow the sorted id set.
        let mut all_ids: Vec<&str> = edges
            .iter()
            .flat_map(|&e| og.edges[e].lines.iter().map(|l| l.line.as_str()))
            .collect();
        all_ids.sort_unstable();
        all_ids.dedup();
        let keys_by_id: AHashMap<&str, u32> = all_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i as u32))
            .collect();

        let mut bundles = AHashMap::new();
        for &e in &edges {
            let oe = &og.edges[e];
            let keys: Vec<u32> = oe.lines.iter().map(|l| keys_by_id[l.line.as_str()]).collect();
            let rels: Vec<u64> = oe.lines.iter().map(|l| l.relatives.len() as u64).collect();
            let ids: Vec<String> = oe.lines.iter().map(|l| l.line.clone()).collect();
            let key_index = keys.iter().enumerate().map(|(i, k)| (*k, i)).collect();
            bundles.insert(
                e,
                Bundle {
                    keys,
                    rels,
                    ids,
                    key_index,
                },
            );
        }

        let mut node_ctx = AHashMap::new();
        for &n in &nodes {
            let opt_node = &og.nodes[n];
            let lg_node = &graph.nodes[&opt_node.node];

            let mut incidences: Vec<Incidence> = opt_node
                .adj
                .iter()
                .filter(|e| edges.binary_search(*e).is_ok())
                .map(|&e| {
                    let oe = &og.edges[e];
                    let end_seg = if oe.from == n {
                        oe.segments.first().unwrap()
                    } else {
                        oe.segments.last().unwrap()
                    };
                    let end_edge = graph.edge(end_seg.edge_idx).unwrap();
                    let geom = &end_edge.geometry;
                    let (dx, dy) = if end_edge.from == opt_node.node {
                        let p0 = geom.first().unwrap();
                        let p1 = geom.get(1).unwrap_or(p0);
                        (p1[0] - p0[0], p1[1] - p0[1])
                    } else {
                        let p_last = geom.last().unwrap();
                        let p_prev = geom.get(geom.len().saturating_sub(2)).unwrap_or(p_last);
                        (p_prev[0] - p_last[0], p_prev[1] - p_last[1])
                    };
                    let mut angle = dy.atan2(dx);
                    if angle < 0.0 {
                        angle += 2.0 * PI;
                    }
                    Incidence {
                        opt_edge: e,
                        angle,
                        end_edge_id: end_edge.id,
                    }
                })
                .collect();
            incidences.sort_by_key(|i| i.opt_edge);

            let exceptions: Vec<(u32, i64, i64)> = lg_node
                .conn_exceptions
                .iter()
                .filter_map(|(line, a, b)| keys_by_id.get(line.as_str()).map(|k| (*k, *a, *b)))
                .collect();

            node_ctx.insert(
                n,
                NodeCtx {
                    incidences,
                    pen_same: scorer.crossing_penalty_same(lg_node),
                    pen_diff: scorer.crossing_penalty_diff(lg_node),
                    pen_split: scorer.splitting_penalty(lg_node),
                    exceptions,
                },
            );
        }

        CompCtx {
            og,
            edges,
            nodes,
            bundles,
            node_ctx,
        }
    }

    /// Track position of occurrence `occ` on edge `e` under `cfg`.
    pub fn pos(&self, cfg: &OrderCfg, e: usize, occ: usize) -> usize {
        match cfg.get(&e) {
            Some(perm) => perm.iter().position(|&x| x == occ).unwrap(),
            None => occ,
        }
    }

    /// Identity configuration: the order inherited from the topology stage.
    pub fn initial_config(&self) -> OrderCfg {
        self.edges
            .iter()
            .map(|&e| (e, (0..self.bundles[&e].cardinality()).collect()))
            .collect()
    }

    /// Π |bundle|! — the number of distinct configurations.
    pub fn solution_space(&self) -> f64 {
        self.edges
            .iter()
            .map(|&e| {
                (1..=self.bundles[&e].cardinality())
                    .map(|k| k as f64)
                    .product::<f64>()
            })
            .product()
    }

    /// Total weighted objective of a configuration.
    pub fn score(&self, cfg: &OrderCfg) -> u64 {
        self.nodes.iter().map(|&n| self.score_node(n, cfg)).sum()
    }

    /// Objective restricted to the two endpoints of one edge; a swap on
    /// that edge can only change these terms.
    pub fn score_edge(&self, e: usize, cfg: &OrderCfg) -> u64 {
        let oe = &self.og.edges[e];
        let mut s = self.score_node(oe.from, cfg);
        if oe.to != oe.from {
            s += self.score_node(oe.to, cfg);
        }
        s
    }

    /// Unweighted (same, diff, split) counts, for logging and tests.
    pub fn counts(&self, cfg: &OrderCfg) -> (u64, u64, u64) {
        let mut totals = (0, 0, 0);
        for &n in &self.nodes {
            let (s, d, sp) = self.node_events(n, cfg);
            totals.0 += s;
            totals.1 += d;
            totals.2 += sp;
        }
        totals
    }

    pub fn score_node(&self, n: usize, cfg: &OrderCfg) -> u64 {
        let nc = &self.node_ctx[&n];
        let (same, diff, split) = self.node_events_weighted(n, cfg);
        same * nc.pen_same + diff * nc.pen_diff + split * nc.pen_split
    }

    fn node_events(&self, n: usize, cfg: &OrderCfg) -> (u64, u64, u64) {
        self.node_events_impl(n, cfg, false)
    }

    fn node_events_weighted(&self, n: usize, cfg: &OrderCfg) -> (u64, u64, u64) {
        self.node_events_impl(n, cfg, true)
    }

    fn node_events_impl(&self, n: usize, cfg: &OrderCfg, weighted: bool) -> (u64, u64, u64) {
        let nc = &self.node_ctx[&n];
        let mut same = 0u64;
        let mut diff = 0u64;
        let mut split = 0u64;

        // Same-segment crossings: unordered pairs of incident edges.
        for ia in 0..nc.incidences.len() {
            for ib in (ia + 1)..nc.incidences.len() {
                let a_inc = &nc.incidences[ia];
                let b_inc = &nc.incidences[ib];
                let (ea, eb) = (a_inc.opt_edge, b_inc.opt_edge);
                if ea == eb {
                    continue;
                }
                let (oa, ob) = (&self.og.edges[ea], &self.og.edges[eb]);
                // Self loops have no single orientation at the node.
                if oa.from == oa.to || ob.from == ob.to {
                    continue;
                }
                let (ba, bb) = (&self.bundles[&ea], &self.bundles[&eb]);

                let shared: Vec<u32> = ba
                    .keys
                    .iter()
                    .copied()
                    .filter(|k| bb.index_of(*k).is_some())
                    .filter(|k| nc.continues(*k, a_inc.end_edge_id, b_inc.end_edge_id))
                    .collect();
                if shared.len() < 2 {
                    continue;
                }

                for x in 0..shared.len() {
                    for y in (x + 1)..shared.len() {
                        let (ka, kb) = (shared[x], shared[y]);
                        let (ia_occ, ib_occ) = (ba.index_of(ka).unwrap(), ba.index_of(kb).unwrap());
                        let pa = self.pos(cfg, ea, ia_occ);
                        let pb = self.pos(cfg, ea, ib_occ);
                        let qa = self.pos(cfg, eb, bb.index_of(ka).unwrap());
                        let qb = self.pos(cfg, eb, bb.index_of(kb).unwrap());

                        if same_seg_crosses(
                            ba.cardinality(),
                            bb.cardinality(),
                            oa.to == n,
                            ob.from == n,
                            pa,
                            pb,
                            qa,
                            qb,
                        ) {
                            same += if weighted {
                                ba.rels[ia_occ] * ba.rels[ib_occ]
                            } else {
                                1
                            };
                        }
                    }
                }
            }
        }

        // Different-segment crossings and splittings, counted from each
        // carrying segment.
        for a_inc in &nc.incidences {
            let ea = a_inc.opt_edge;
            let oa = &self.og.edges[ea];
            if oa.from == oa.to {
                continue;
            }
            let ba = &self.bundles[&ea];
            let card = ba.cardinality();

            for i in 0..card {
                for j in (i + 1)..card {
                    let (ka, kb) = (ba.keys[i], ba.keys[j]);
                    let part_a = self.partner_edge(nc, ea, a_inc.end_edge_id, ka);
                    let part_b = self.partner_edge(nc, ea, a_inc.end_edge_id, kb);
                    let (Some(ca), Some(cb)) = (part_a, part_b) else {
                        continue;
                    };
                    if ca == cb {
                        continue;
                    }

                    let pa = self.pos(cfg, ea, i);
                    let pb = self.pos(cfg, ea, j);
                    let w = if weighted { ba.rels[i] * ba.rels[j] } else { 1 };

                    // Splitting: lines parting ways should sit adjacent.
                    if pa.abs_diff(pb) > 1 {
                        split += 1;
                    }

                    // Crossing forced by the planar cyclic order.
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
                    if diff_seg_crosses(a_inc.angle, angle_c, angle_d, oa.from == n, pa, pb) {
                        diff += w;
                    }
                }
            }
        }

        (same, diff, split)
    }

    /// First other incident edge the line continues into, by ascending opt
    /// edge index.
    pub fn partner_edge(
        &self,
        nc: &NodeCtx,
        from_edge: usize,
        from_end: i64,
        key: u32,
    ) -> Option<usize> {
        nc.incidences
            .iter()
            .filter(|inc| inc.opt_edge != from_edge)
            .find(|inc| {
                self.bundles[&inc.opt_edge].index_of(key).is_some()
                    && nc.continues(key, from_end, inc.end_edge_id)
            })
            .map(|inc| inc.opt_edge)
    }

    /// Canonicalizes ties: wherever swapping two adjacent occurrences
    /// leaves the objective unchanged and puts the lexicographically
    /// smaller line id first, the swap is applied. Makes every strategy's
    /// output unique among equally good solutions.
    pub fn canonicalize(&self, cfg: &mut OrderCfg) {
        loop {
            let mut changed = false;
            for &e in &self.edges {
                let bundle = &self.bundles[&e];
                let card = bundle.cardinality();
                if card < 2 {
                    continue;
                }
                for p in 0..card - 1 {
                    let perm = cfg.get(&e).cloned().unwrap_or_else(|| (0..card).collect());
                    let (x, y) = (perm[p], perm[p + 1]);
                    if bundle.ids[x] <= bundle.ids[y] {
                        continue;
                    }
                    let before = self.score_edge(e, cfg);
                    let mut swapped = perm.clone();
                    swapped.swap(p, p + 1);
                    cfg.insert(e, swapped);
                    let after = self.score_edge(e, cfg);
                    if after == before {
                        changed = true;
                    } else {
                        cfg.insert(e, perm);
                    }
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// Permutations as line-id lists in OptEdge orientation, ready for
    /// `OptGraph::apply_order`.
    pub fn to_line_orders(&self, cfg: &OrderCfg) -> Vec<(usize, Vec<String>)> {
        self.edges
            .iter()
            .map(|&e| {
                let bundle = &self.bundles[&e];
                let perm = cfg
                    .get(&e)
                    .cloned()
                    .unwrap_or_else(|| (0..bundle.cardinality()).collect());
                (e, perm.iter().map(|&i| bundle.ids[i].clone()).collect())
            })
            .collect()
    }
}

/// Whether a line pair swaps sides when travelling A -> node -> B.
/// Positions are mirrored per edge so both read in travel direction.
#[allow(clippy::too_many_arguments)]
pub fn same_seg_crosses(
    card_a: usize,
    card_b: usize,
    a_arrives_forward: bool,
    b_leaves_forward: bool,
    pa: usize,
    pb: usize,
    qa: usize,
    qb: usize,
) -> bool {
    let npos_a = |p: usize| if a_arrives_forward { p } else { card_a - 1 - p };
    let npos_b = |q: usize| if b_leaves_forward { q } else { card_b - 1 - q };
    (npos_a(pa) < npos_a(pb)) != (npos_b(qa) < npos_b(qb))
}

/// Whether positions (pa, pb) on the carrying edge force the pair to cross
/// given the cyclic order of the two target edges around the node.
pub fn diff_seg_crosses(
    angle_a: f64,
    angle_c: f64,
    angle_d: f64,
    is_leaving: bool,
    pa: usize,
    pb: usize,
) -> bool {
    let diff_c = (angle_c - angle_a).rem_euclid(2.0 * PI);
    let diff_d = (angle_d - angle_a).rem_euclid(2.0 * PI);
    let mut prefer_a_low = diff_c < diff_d;
    if !is_leaving {
        prefer_a_low = !prefer_a_low;
    }
    (pa < pb) != prefer_a_low
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seg_crossing_detection() {
        // Two edges, both cardinality 2, A arrives forward, B leaves
        // forward: same relative order on both sides means no crossing.
        assert!(!same_seg_crosses(2, 2, true, true, 0, 1, 0, 1));
        assert!(same_seg_crosses(2, 2, true, true, 0, 1, 1, 0));
        // B stored reversed: raw order flips back.
        assert!(same_seg_crosses(2, 2, true, false, 0, 1, 0, 1));
        assert!(!same_seg_crosses(2, 2, true, false, 0, 1, 1, 0));
    }
}

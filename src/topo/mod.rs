// ===========================================================================
// Topology builder: turns a raw, shape-duplicated line graph into a
// planar, overlap-free one. Four passes in order: segment aggregation,
// partial-overlap splitting (folded into the aggregation loop), smoothing,
// station clustering.
// ===========================================================================

pub mod geometry;

use crate::config::LayoutConfig;
use crate::error::Result;
use crate::linegraph::{Edge, LineDir, LineGraph, Node, GEOM_TOL};
use ahash::{AHashMap, AHashSet};
use geometry::{
    chaikin_smooth, extract_sub_polyline, overlap_interval, polyline_length,
    weighted_average_centerline,
};
use log::{debug, info, warn};
use rstar::AABB;

/// Shared-length fraction two edges must overlap before they aggregate.
const FULL_OVERLAP_FRAC: f64 = 0.75;

/// Aggregation passes are repeated until stable; this bounds pathological
/// split/merge ping-pong on degenerate inputs.
const MAX_AGGR_ROUNDS: usize = 50;

pub struct TopoBuilder {
    max_aggr_dist: f64,
    smooth_iterations: usize,
}

impl TopoBuilder {
    pub fn new(cfg: &LayoutConfig) -> Self {
        Self {
            max_aggr_dist: cfg.max_aggr_dist,
            smooth_iterations: ((cfg.smooth / 10.0) as usize).clamp(1, 3),
        }
    }

    pub fn run(&self, graph: &mut LineGraph) -> Result<()> {
        // Per-edge-id count of source shapes merged in, for centerline
        // weighting.
        let mut weights: AHashMap<i64, f64> = AHashMap::new();

        let mut rounds = 0;
        loop {
            rounds += 1;
            let changes = self.aggregate_pass(graph, &mut weights);
            if changes == 0 {
                break;
            }
            debug!("aggregation round {rounds}: {changes} change(s)");
            if rounds >= MAX_AGGR_ROUNDS {
                warn!("segment aggregation did not stabilize after {rounds} rounds, keeping current state");
                break;
            }
        }
        info!(
            "segment aggregation settled after {} round(s): {} edges",
            rounds,
            graph.edge_count()
        );

        self.smooth(graph);
        self.cluster_stations(graph);
        self.drop_degenerate_edges(graph);

        graph.compact();
        graph.check_invariants()?;
        Ok(())
    }

    // --- Pass 1+2: aggregation and partial-overlap splitting ---

    /// One sweep over candidate pairs. Merges full overlaps, splits partial
    /// ones so a later sweep can merge them. Returns the number of edits.
    /// Pairs are visited in ascending id order and edits apply immediately;
    /// this is the deterministic greedy fallback for ambiguous multi-way
    /// overlaps. Pairs whose edges died earlier in the sweep are skipped,
    /// and the candidate tree is refreshed between sweeps.
    fn aggregate_pass(&self, graph: &mut LineGraph, weights: &mut AHashMap<i64, f64>) -> usize {
        let tree = graph.edge_tree();
        let mut pairs: Vec<(i64, i64, usize, usize)> = Vec::new();
        let mut seen: AHashSet<(usize, usize)> = AHashSet::new();

        for (idx, edge) in graph.live_edges() {
            let mut min = [f64::MAX, f64::MAX];
            let mut max = [f64::MIN, f64::MIN];
            for p in &edge.geometry {
                min[0] = min[0].min(p[0] - self.max_aggr_dist);
                min[1] = min[1].min(p[1] - self.max_aggr_dist);
                max[0] = max[0].max(p[0] + self.max_aggr_dist);
                max[1] = max[1].max(p[1] + self.max_aggr_dist);
            }
            let envelope = AABB::from_corners(min, max);
            for hit in tree.locate_in_envelope_intersecting(&envelope) {
                let other = hit.data;
                if other == idx {
                    continue;
                }
                let key = (idx.min(other), idx.max(other));
                if !seen.insert(key) {
                    continue;
                }
                let other_edge = graph.edge(other).unwrap();
                pairs.push((
                    edge.id.min(other_edge.id),
                    edge.id.max(other_edge.id),
                    key.0,
                    key.1,
                ));
            }
        }
        pairs.sort_unstable();

        let spacing = (self.max_aggr_dist / 4.0).max(1.0);
        let mut changes = 0;

        for (_, _, a_idx, b_idx) in pairs {
            let (Some(a), Some(b)) = (graph.edge(a_idx), graph.edge(b_idx)) else {
                continue;
            };

            let Some(ov) = overlap_interval(&a.geometry, &b.geometry, self.max_aggr_dist, spacing)
            else {
                continue;
            };

            let a_frac = ov.a_range.1 - ov.a_range.0;
            let b_frac = ov.b_range.1 - ov.b_range.0;

            if a_frac >= FULL_OVERLAP_FRAC && b_frac >= FULL_OVERLAP_FRAC {
                self.merge_edges(graph, a_idx, b_idx, ov.reversed, weights);
                changes += 1;
                continue;
            }

            // Partial overlap: worth splitting only if the shared stretch
            // is long enough to become an aggregatable edge of its own.
            if ov.shared_len < 2.0 * self.max_aggr_dist {
                continue;
            }

            if a_frac < FULL_OVERLAP_FRAC && self.split_edge(graph, a_idx, ov.a_range, weights) {
                changes += 1;
            }
            if b_frac < FULL_OVERLAP_FRAC
                && graph.edge(b_idx).is_some()
                && self.split_edge(graph, b_idx, ov.b_range, weights)
            {
                changes += 1;
            }
        }
        changes
    }

    /// Merges edge `b_idx` into `a_idx`: bundle union, weighted median
    /// geometry, node unification at both ends.
    fn merge_edges(
        &self,
        graph: &mut LineGraph,
        a_idx: usize,
        b_idx: usize,
        reversed: bool,
        weights: &mut AHashMap<i64, f64>,
    ) {
        let b = graph.remove_edge(b_idx).unwrap();
        let a_id = graph.edge(a_idx).unwrap().id;
        let w_a = *weights.get(&a_id).unwrap_or(&1.0);
        let w_b = *weights.get(&b.id).unwrap_or(&1.0);

        debug!("aggregating edge {} into edge {}", b.id, a_id);

        // Align b to a's orientation.
        let (b_from, b_to) = if reversed {
            (b.to, b.from)
        } else {
            (b.from, b.to)
        };
        let mut b_geom = b.geometry.clone();
        if reversed {
            b_geom.reverse();
        }

        // Bundle union.
        {
            let a = graph.edge_mut(a_idx).unwrap();
            for occ in &b.lines {
                let mut occ = occ.clone();
                if reversed {
                    occ.dir = occ.dir.reversed();
                }
                match a.lines.iter_mut().find(|l| l.line == occ.line) {
                    Some(existing) => {
                        if existing.dir != occ.dir {
                            existing.dir = LineDir::Both;
                        }
                        for rel in occ.relatives {
                            if !existing.relatives.contains(&rel) {
                                existing.relatives.push(rel);
                            }
                        }
                    }
                    None => a.lines.push(occ),
                }
            }
        }

        // Weighted median geometry, endpoints pinned to a's nodes.
        let (a_from, a_to, a_geom) = {
            let a = graph.edge(a_idx).unwrap();
            (a.from, a.to, a.geometry.clone())
        };
        let mut merged = weighted_average_centerline(
            &[(a_geom.as_slice(), w_a), (b_geom.as_slice(), w_b)],
            self.max_aggr_dist / 4.0,
        );
        if merged.len() < 2 {
            merged = a_geom;
        }

        // Unify b's endpoint nodes with a's.
        self.merge_node(graph, b_from, a_from);
        self.merge_node(graph, b_to, a_to);

        if graph.edge(a_idx).is_none() {
            // the merge degenerated the kept edge into a self loop
            return;
        }
        let from_pos = graph.nodes[&a_from].pos;
        let to_pos = graph.nodes[&a_to].pos;
        *merged.first_mut().unwrap() = from_pos;
        *merged.last_mut().unwrap() = to_pos;
        graph.edge_mut(a_idx).unwrap().geometry = merged;

        weights.insert(a_id, w_a + w_b);
        graph.rebuild_adjacency();
        self.drop_collapsed_parallels(graph, a_idx);
    }

    /// Re-attaches everything incident to `old` onto `keep` and removes
    /// `old`. No-op when the ids coincide.
    fn merge_node(&self, graph: &mut LineGraph, old: i64, keep: i64) {
        if old == keep || !graph.nodes.contains_key(&keep) {
            return;
        }
        let Some(old_node) = graph.nodes.remove(&old) else {
            return;
        };

        for edge in graph.edges.iter_mut().flatten() {
            if edge.from == old {
                edge.from = keep;
            }
            if edge.to == old {
                edge.to = keep;
            }
        }
        // Drop self-loops created by the unification.
        for slot in graph.edges.iter_mut() {
            if let Some(e) = slot {
                if e.from == e.to {
                    *slot = None;
                }
            }
        }

        let keep_node = graph.nodes.get_mut(&keep).expect("merge target exists");
        keep_node.stations.extend(old_node.stations);
        for (line, a, b) in old_node.conn_exceptions {
            if !keep_node.conn_exceptions.contains(&(line.clone(), a, b)) {
                keep_node.conn_exceptions.push((line, a, b));
            }
        }

        // Re-anchor the geometry of every edge now ending at the kept
        // node.
        let keep_pos = graph.nodes[&keep].pos;
        for edge in graph.edges.iter_mut().flatten() {
            if edge.from == keep {
                if let Some(p) = edge.geometry.first_mut() {
                    *p = keep_pos;
                }
            }
            if edge.to == keep {
                if let Some(p) = edge.geometry.last_mut() {
                    *p = keep_pos;
                }
            }
        }
        graph.rebuild_adjacency();
    }

    /// After a merge, a second live edge may now connect the same node pair
    /// with the same corridor; fold it into the merged edge.
    fn drop_collapsed_parallels(&self, graph: &mut LineGraph, kept_idx: usize) {
        let Some(kept) = graph.edge(kept_idx) else {
            return;
        };
        let (from, to) = (kept.from, kept.to);
        let dup: Vec<usize> = graph
            .live_edges()
            .filter(|(idx, e)| {
                *idx != kept_idx
                    && ((e.from == from && e.to == to) || (e.from == to && e.to == from))
                    && e.lines.iter().all(|l| {
                        graph
                            .edge(kept_idx)
                            .is_some_and(|k| k.has_line(&l.line))
                    })
            })
            .map(|(idx, _)| idx)
            .collect();
        for idx in dup {
            debug!("dropping collapsed parallel edge at index {idx}");
            graph.remove_edge(idx);
        }
    }

    /// Splits an edge at the interior endpoints of an overlap interval,
    /// introducing degree-2 nodes. Returns false when no interior cut
    /// point survives the minimum-piece-length filter.
    fn split_edge(
        &self,
        graph: &mut LineGraph,
        idx: usize,
        range: (f64, f64),
        weights: &mut AHashMap<i64, f64>,
    ) -> bool {
        let edge = graph.edge(idx).unwrap().clone();
        let total = polyline_length(&edge.geometry);
        if total <= f64::EPSILON {
            return false;
        }
        let min_frac = self.max_aggr_dist / total;

        let mut cuts: Vec<f64> = [range.0, range.1]
            .into_iter()
            .filter(|f| *f > min_frac && *f < 1.0 - min_frac)
            .collect();
        cuts.dedup_by(|a, b| (*a - *b).abs() < min_frac);
        if cuts.is_empty() {
            return false;
        }

        debug!("splitting edge {} at fractions {:?}", edge.id, cuts);

        let weight = *weights.get(&edge.id).unwrap_or(&1.0);
        let mut next_edge_id = graph
            .edges
            .iter()
            .flatten()
            .map(|e| e.id)
            .max()
            .unwrap_or(0)
            + 1;
        let mut next_node_id = graph.next_node_id();

        graph.remove_edge(idx);

        let mut bounds = vec![0.0];
        bounds.extend(&cuts);
        bounds.push(1.0);

        let mut prev_node = edge.from;
        for (i, w) in bounds.windows(2).enumerate() {
            let piece = extract_sub_polyline(&edge.geometry, w[0], w[1]);
            let last_piece = i == bounds.len() - 2;
            let end_node = if last_piece {
                edge.to
            } else {
                let id = next_node_id;
                next_node_id += 1;
                graph.add_node(Node::new(id, *piece.last().unwrap()));
                id
            };
            let mut geometry = piece;
            *geometry.first_mut().unwrap() = graph.nodes[&prev_node].pos;
            *geometry.last_mut().unwrap() = graph.nodes[&end_node].pos;

            let new_edge = Edge {
                id: next_edge_id,
                from: prev_node,
                to: end_node,
                geometry,
                lines: edge.lines.clone(),
            };
            weights.insert(next_edge_id, weight);
            next_edge_id += 1;
            graph.add_edge(new_edge);
            prev_node = end_node;
        }
        true
    }

    // --- Pass 3: smoothing ---

    fn smooth(&self, graph: &mut LineGraph) {
        for edge in graph.edges.iter_mut().flatten() {
            if edge.geometry.len() >= 3 {
                edge.geometry = chaikin_smooth(&edge.geometry, self.smooth_iterations);
            }
        }
    }

    // --- Pass 4: station clustering ---

    fn cluster_stations(&self, graph: &mut LineGraph) {
        let tol = self.max_aggr_dist / 2.0;
        let tree = graph.station_tree();

        let mut station_ids: Vec<i64> = graph
            .nodes
            .values()
            .filter(|n| n.is_station())
            .map(|n| n.id)
            .collect();
        station_ids.sort_unstable();

        let mut visited: AHashSet<i64> = AHashSet::new();
        let mut merged = 0usize;

        for seed in station_ids {
            if visited.contains(&seed) || !graph.nodes.contains_key(&seed) {
                continue;
            }
            visited.insert(seed);

            // Greedy BFS over the station tree.
            let mut cluster = vec![seed];
            let mut queue = vec![seed];
            while let Some(cur) = queue.pop() {
                let Some(cur_node) = graph.nodes.get(&cur) else {
                    continue;
                };
                let pos = cur_node.pos;
                for hit in tree.locate_within_distance(pos, tol * tol) {
                    let cand = hit.data;
                    if !visited.contains(&cand) && graph.nodes.contains_key(&cand) {
                        visited.insert(cand);
                        cluster.push(cand);
                        queue.push(cand);
                    }
                }
            }
            if cluster.len() < 2 {
                continue;
            }

            // Representative: lowest id, at the member-weighted centroid.
            cluster.sort_unstable();
            let rep = cluster[0];
            let mut cx = 0.0;
            let mut cy = 0.0;
            for &id in &cluster {
                let p = graph.nodes[&id].pos;
                cx += p[0];
                cy += p[1];
            }
            let centroid = [cx / cluster.len() as f64, cy / cluster.len() as f64];

            for &member in &cluster[1..] {
                self.merge_node(graph, member, rep);
                merged += 1;
            }
            graph.nodes.get_mut(&rep).unwrap().pos = centroid;

            // Re-anchor incident edge geometry at the moved node.
            let incident: Vec<usize> = graph.incident(rep).to_vec();
            for idx in incident {
                let Some(edge) = graph.edge_mut(idx) else {
                    continue;
                };
                if edge.from == rep {
                    *edge.geometry.first_mut().unwrap() = centroid;
                }
                if edge.to == rep {
                    *edge.geometry.last_mut().unwrap() = centroid;
                }
            }
        }

        if merged > 0 {
            info!("station clustering merged {merged} node(s)");
            // Parallel duplicates between clustered stations collapse.
            let live: Vec<usize> = graph.live_edges().map(|(i, _)| i).collect();
            for idx in live {
                if graph.edge(idx).is_some() {
                    self.merge_duplicate_of(graph, idx);
                }
            }
        }
    }

    /// Merges the bundle of any other live edge connecting the same node
    /// pair into `idx` and removes it.
    fn merge_duplicate_of(&self, graph: &mut LineGraph, idx: usize) {
        let kept = graph.edge(idx).unwrap();
        let (from, to) = (kept.from, kept.to);
        let dup: Vec<usize> = graph
            .live_edges()
            .filter(|(i, e)| {
                *i != idx && ((e.from == from && e.to == to) || (e.from == to && e.to == from))
            })
            .map(|(i, _)| i)
            .collect();
        for d in dup {
            let reversed = graph.edge(d).unwrap().from != from;
            let removed = graph.remove_edge(d).unwrap();
            let kept = graph.edge_mut(idx).unwrap();
            for mut occ in removed.lines {
                if reversed {
                    occ.dir = occ.dir.reversed();
                }
                match kept.lines.iter_mut().find(|l| l.line == occ.line) {
                    Some(existing) => {
                        if existing.dir != occ.dir {
                            existing.dir = LineDir::Both;
                        }
                    }
                    None => kept.lines.push(occ),
                }
            }
        }
    }

    fn drop_degenerate_edges(&self, graph: &mut LineGraph) {
        let degenerate: Vec<(usize, i64, i64)> = graph
            .live_edges()
            .filter(|(_, e)| polyline_length(&e.geometry) < GEOM_TOL || e.from == e.to)
            .map(|(i, e)| (i, e.from, e.to))
            .collect();
        for (idx, from, to) in degenerate {
            if graph.edge(idx).is_none() {
                continue;
            }
            debug!("contracting degenerate edge at index {idx}");
            graph.remove_edge(idx);
            if from != to {
                self.merge_node(graph, to, from);
            }
        }
    }
}

/// Convenience entry point matching the other stages.
pub fn build_topology(graph: &mut LineGraph, cfg: &LayoutConfig) -> Result<()> {
    TopoBuilder::new(cfg).run(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linegraph::{Line, LineOcc, StationInfo};

    fn cfg() -> LayoutConfig {
        LayoutConfig {
            max_aggr_dist: 50.0,
            smooth: 20.0,
            ..LayoutConfig::default()
        }
    }

    fn add_line(g: &mut LineGraph, id: &str) {
        g.add_line(Line {
            id: id.to_string(),
            label: id.to_uppercase(),
            color: None,
        });
    }

    fn station(g: &mut LineGraph, id: i64, pos: [f64; 2], name: &str) {
        let mut n = Node::new(id, pos);
        n.stations.push(StationInfo {
            id: format!("s{id}"),
            name: name.to_string(),
        });
        g.add_node(n);
    }

    /// Two near-duplicate shapes of the same corridor between shared
    /// stations must merge into one edge carrying both lines.
    #[test]
    fn parallel_duplicates_aggregate() {
        let mut g = LineGraph::new();
        station(&mut g, 0, [0.0, 0.0], "West");
        station(&mut g, 1, [1000.0, 0.0], "East");
        g.add_node(Node::new(2, [0.0, 20.0]));
        g.add_node(Node::new(3, [1000.0, 20.0]));
        add_line(&mut g, "u1");
        add_line(&mut g, "u2");
        g.add_edge(Edge {
            id: 0,
            from: 0,
            to: 1,
            geometry: vec![[0.0, 0.0], [500.0, 0.0], [1000.0, 0.0]],
            lines: vec![LineOcc::new("u1", LineDir::Both)],
        });
        g.add_edge(Edge {
            id: 1,
            from: 2,
            to: 3,
            geometry: vec![[0.0, 20.0], [500.0, 20.0], [1000.0, 20.0]],
            lines: vec![LineOcc::new("u2", LineDir::Both)],
        });

        build_topology(&mut g, &cfg()).unwrap();

        assert_eq!(g.edge_count(), 1);
        let (_, edge) = g.live_edges().next().unwrap();
        assert!(edge.has_line("u1") && edge.has_line("u2"));
        // Median geometry runs between the inputs.
        for p in &edge.geometry[1..edge.geometry.len() - 1] {
            assert!(p[1] > 0.0 && p[1] < 20.0, "point {:?} not between inputs", p);
        }
        let mid = edge
            .geometry
            .iter()
            .min_by(|a, b| {
                (a[0] - 500.0)
                    .abs()
                    .partial_cmp(&(b[0] - 500.0).abs())
                    .unwrap()
            })
            .unwrap();
        assert!((mid[1] - 10.0).abs() < 3.0, "median off-centre at {:?}", mid);
    }

    /// An edge that joins a longer corridor halfway gets the corridor split
    /// at the overlap boundary and the shared stretch merged.
    #[test]
    fn partial_overlap_splits_then_merges() {
        let mut g = LineGraph::new();
        station(&mut g, 0, [0.0, 0.0], "A");
        station(&mut g, 1, [900.0, 0.0], "B");
        station(&mut g, 2, [450.0, 10.0], "C");
        g.add_node(Node::new(3, [900.0, 10.0]));
        add_line(&mut g, "u1");
        add_line(&mut g, "u2");
        g.add_edge(Edge {
            id: 0,
            from: 0,
            to: 1,
            geometry: vec![[0.0, 0.0], [450.0, 0.0], [900.0, 0.0]],
            lines: vec![LineOcc::new("u1", LineDir::Both)],
        });
        // u2 runs only the second half, slightly offset.
        g.add_edge(Edge {
            id: 1,
            from: 2,
            to: 3,
            geometry: vec![[450.0, 10.0], [900.0, 10.0]],
            lines: vec![LineOcc::new("u2", LineDir::Both)],
        });

        build_topology(&mut g, &cfg()).unwrap();
        g.check_invariants().unwrap();

        // The shared stretch carries both lines; the leading stretch only u1.
        let both: Vec<_> = g
            .live_edges()
            .filter(|(_, e)| e.has_line("u1") && e.has_line("u2"))
            .collect();
        assert_eq!(both.len(), 1, "exactly one merged stretch expected");
        assert!(
            g.live_edges()
                .any(|(_, e)| e.has_line("u1") && !e.has_line("u2")),
            "leading stretch must keep only u1"
        );
    }

    #[test]
    fn nearby_stations_cluster() {
        let mut g = LineGraph::new();
        station(&mut g, 0, [0.0, 0.0], "Alpha");
        station(&mut g, 1, [10.0, 0.0], "Alpha North");
        station(&mut g, 2, [800.0, 0.0], "Far");
        add_line(&mut g, "u1");
        g.add_edge(Edge {
            id: 0,
            from: 0,
            to: 2,
            geometry: vec![[0.0, 0.0], [800.0, 0.0]],
            lines: vec![LineOcc::new("u1", LineDir::Both)],
        });
        g.add_edge(Edge {
            id: 1,
            from: 1,
            to: 2,
            geometry: vec![[10.0, 0.0], [10.0, 300.0], [800.0, 300.0], [800.0, 0.0]],
            lines: vec![LineOcc::new("u1", LineDir::Both)],
        });

        build_topology(&mut g, &cfg()).unwrap();

        let stations: Vec<_> = g.nodes.values().filter(|n| n.is_station()).collect();
        assert_eq!(stations.len(), 2);
        let merged = stations.iter().find(|n| n.stations.len() == 2).unwrap();
        assert_eq!(merged.id, 0);
    }

    #[test]
    fn topology_is_idempotent() {
        let mut g = LineGraph::new();
        station(&mut g, 0, [0.0, 0.0], "West");
        station(&mut g, 1, [1000.0, 0.0], "East");
        g.add_node(Node::new(2, [0.0, 20.0]));
        g.add_node(Node::new(3, [1000.0, 20.0]));
        add_line(&mut g, "u1");
        add_line(&mut g, "u2");
        g.add_edge(Edge {
            id: 0,
            from: 0,
            to: 1,
            geometry: vec![[0.0, 0.0], [480.0, 30.0], [1000.0, 0.0]],
            lines: vec![LineOcc::new("u1", LineDir::Both)],
        });
        g.add_edge(Edge {
            id: 1,
            from: 2,
            to: 3,
            geometry: vec![[0.0, 20.0], [520.0, 45.0], [1000.0, 20.0]],
            lines: vec![LineOcc::new("u2", LineDir::Both)],
        });

        build_topology(&mut g, &cfg()).unwrap();
        let nodes_after_one = g.nodes.len();
        let edges_after_one = g.edge_count();
        let geom_after_one: Vec<Vec<[f64; 2]>> = g
            .live_edges()
            .map(|(_, e)| e.geometry.clone())
            .collect();

        build_topology(&mut g, &cfg()).unwrap();
        assert_eq!(g.nodes.len(), nodes_after_one);
        assert_eq!(g.edge_count(), edges_after_one);
        for ((_, e), before) in g.live_edges().zip(&geom_after_one) {
            let d = geometry::mean_polyline_distance(&e.geometry, before, 10.0);
            assert!(d < 5.0, "geometry drifted {d} map units on second run");
        }
    }

    #[test]
    fn empty_graph_is_a_noop() {
        let mut g = LineGraph::new();
        build_topology(&mut g, &cfg()).unwrap();
        assert_eq!(g.nodes.len(), 0);
        assert_eq!(g.edge_count(), 0);
    }
}

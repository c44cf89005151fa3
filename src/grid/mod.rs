// ===========================================================================
// Grid graph: the routing substrate for schematization. Every cell owns a
// centre vertex and eight port vertices; sink edges bind ports to their
// centre, bend edges connect ports of one cell, traversal edges connect
// opposite ports of neighbouring cells. All vertices and edges live in
// flat arenas with index-based adjacency.
// ===========================================================================

pub mod topology;

use crate::config::LayoutConfig;
use ahash::AHashMap;
use log::warn;
use ordered_float::OrderedFloat;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use topology::{GridTopology, PORT_COUNT};

pub const INF: f64 = f64::INFINITY;
/// Cost-vector entries below this mark a port as closed rather than
/// penalized.
pub const CLOSE: f64 = f64::NEG_INFINITY;

#[derive(Debug, Clone, Copy)]
pub struct Penalties {
    pub p_0: f64,
    pub p_45: f64,
    pub p_90: f64,
    pub p_135: f64,
    pub vertical: f64,
    pub horizontal: f64,
    pub diagonal: f64,
}

impl Penalties {
    pub fn from_config(cfg: &LayoutConfig) -> Penalties {
        Penalties {
            p_0: cfg.p_0,
            p_45: cfg.p_45,
            p_90: cfg.p_90,
            p_135: cfg.p_135,
            vertical: cfg.vertical_pen,
            horizontal: cfg.horizontal_pen,
            diagonal: cfg.diagonal_pen,
        }
    }
}

impl Default for Penalties {
    fn default() -> Self {
        Penalties::from_config(&LayoutConfig::default())
    }
}

/// Additive per-port cost vector; `CLOSE` entries close the port.
#[derive(Debug, Clone, Copy)]
pub struct NodeCost(pub [f64; PORT_COUNT]);

impl NodeCost {
    pub fn zero() -> NodeCost {
        NodeCost([0.0; PORT_COUNT])
    }
}

#[derive(Debug, Clone)]
pub struct GridNode {
    pub cell: (usize, usize),
    /// None for centres, the port direction otherwise.
    pub port: Option<u8>,
    pub pos: [f64; 2],
    pub closed: bool,
    /// Port vertex indices; meaningful on centres only.
    pub ports: [usize; PORT_COUNT],
}

#[derive(Debug, Clone)]
pub struct GridEdge {
    pub from: usize,
    pub to: usize,
    pub cost: f64,
    pub closed: bool,
    /// Comb edge settled onto this grid edge, if any.
    pub res: Option<usize>,
}

pub struct GridGraph<T: GridTopology> {
    pub topo: T,
    pub pens: Penalties,
    pub nodes: Vec<GridNode>,
    pub edges: Vec<GridEdge>,
    /// node -> (edge index, other endpoint).
    pub adj: Vec<Vec<(usize, usize)>>,
    centres: AHashMap<(usize, usize), usize>,
    edge_index: AHashMap<(usize, usize), usize>,
    /// comb node -> settled centre.
    settled: AHashMap<usize, usize>,
}

impl<T: GridTopology> GridGraph<T> {
    pub fn new(topo: T, pens: Penalties) -> GridGraph<T> {
        assert!(pens.p_0 < pens.p_135 && pens.p_135 < pens.p_90 && pens.p_90 < pens.p_45);

        let mut g = GridGraph {
            topo,
            pens,
            nodes: Vec::new(),
            edges: Vec::new(),
            adj: Vec::new(),
            centres: AHashMap::new(),
            edge_index: AHashMap::new(),
            settled: AHashMap::new(),
        };

        for x in 0..g.topo.width() {
            for y in 0..g.topo.height() {
                g.write_cell(x, y);
            }
        }

        // Traversal edges between opposite ports of neighbouring cells,
        // with direction-dependent base costs.
        for x in 0..g.topo.width() {
            for y in 0..g.topo.height() {
                let centre = g.centres[&(x, y)];
                for dir in 0..PORT_COUNT {
                    let Some((nx, ny)) = g.topo.neighbor(x, y, dir) else {
                        continue;
                    };
                    let from = g.nodes[centre].ports[dir];
                    let to_centre = g.centres[&(nx, ny)];
                    let to = g.nodes[to_centre].ports[(dir + 4) % PORT_COUNT];
                    let cost = if dir % 4 == 0 {
                        g.pens.vertical
                    } else if (dir + 2) % 4 == 0 {
                        g.pens.horizontal
                    } else {
                        g.pens.diagonal
                    };
                    // adding twice (once from each side) is a no-op
                    g.add_edge(from, to, cost, false);
                }
            }
        }

        g
    }

    /// Creates the centre, its ports, the sink edges and the in-cell bend
    /// edges of one cell.
    fn write_cell(&mut self, x: usize, y: usize) {
        let pos = self.topo.position(x, y);
        let centre = self.nodes.len();
        self.nodes.push(GridNode {
            cell: (x, y),
            port: None,
            pos,
            closed: false,
            ports: [usize::MAX; PORT_COUNT],
        });
        self.adj.push(Vec::new());
        self.centres.insert((x, y), centre);

        for dir in 0..PORT_COUNT {
            let idx = self.nodes.len();
            self.nodes.push(GridNode {
                cell: (x, y),
                port: Some(dir as u8),
                pos,
                closed: false,
                ports: [usize::MAX; PORT_COUNT],
            });
            self.adj.push(Vec::new());
            self.nodes[centre].ports[dir] = idx;
            // Sink edges start unusable; they are opened per routing
            // endpoint by lowering their cost.
            self.add_edge(centre, idx, INF, false);
        }

        // Bend edges between ports: straight through is cheapest, the
        // sharpest allowed turn dearest; 135-degree turns are forbidden
        // entirely (no edge).
        let c_0 = self.pens.p_45 - self.pens.p_135;
        let c_90 = self.pens.p_45 - self.pens.p_135 + self.pens.p_90;
        let c_135 = self.pens.p_45;

        for i in 0..PORT_COUNT {
            for j in (i + 1)..PORT_COUNT {
                let d = i as i64 - j as i64;
                let deg = ((((d + 4).rem_euclid(8)) - 4) as i64).unsigned_abs() as usize;
                let pen = match deg {
                    1 => continue,
                    2 => c_90,
                    3 => c_135,
                    _ => c_0,
                };
                let (pi, pj) = (self.nodes[centre].ports[i], self.nodes[centre].ports[j]);
                self.add_edge(pi, pj, pen, false);
            }
        }
    }

    fn add_edge(&mut self, a: usize, b: usize, cost: f64, closed: bool) -> usize {
        let key = (a.min(b), a.max(b));
        if let Some(&idx) = self.edge_index.get(&key) {
            return idx;
        }
        let idx = self.edges.len();
        self.edges.push(GridEdge {
            from: a,
            to: b,
            cost,
            closed,
            res: None,
        });
        self.adj[a].push((idx, b));
        self.adj[b].push((idx, a));
        self.edge_index.insert(key, idx);
        idx
    }

    pub fn centre(&self, x: usize, y: usize) -> usize {
        self.centres[&(x, y)]
    }

    /// The traversal edge leaving `centre` through port `dir`, if the
    /// neighbour exists.
    pub fn traversal_edge(&self, centre: usize, dir: usize) -> Option<usize> {
        let (x, y) = self.nodes[centre].cell;
        let (nx, ny) = self.topo.neighbor(x, y, dir)?;
        let a = self.nodes[centre].ports[dir];
        let b = self.nodes[self.centres[&(nx, ny)]].ports[(dir + 4) % PORT_COUNT];
        self.edge_index.get(&(a.min(b), a.max(b))).copied()
    }

    // --- open/close bookkeeping ---

    pub fn open_node_sink(&mut self, centre: usize, cost: f64) {
        for dir in 0..PORT_COUNT {
            let port = self.nodes[centre].ports[dir];
            let key = (centre.min(port), centre.max(port));
            let e = self.edge_index[&key];
            self.edges[e].cost = cost;
        }
    }

    pub fn close_node_sink(&mut self, centre: usize) {
        for dir in 0..PORT_COUNT {
            let port = self.nodes[centre].ports[dir];
            let key = (centre.min(port), centre.max(port));
            let e = self.edge_index[&key];
            self.edges[e].cost = INF;
        }
    }

    /// Closes every traversal edge at a cell and flags it; routed edges
    /// keep their residents.
    pub fn close_node(&mut self, centre: usize) {
        if self.nodes[centre].closed {
            return;
        }
        for dir in 0..PORT_COUNT {
            if let Some(e) = self.traversal_edge(centre, dir) {
                self.edges[e].closed = true;
            }
        }
        self.nodes[centre].closed = true;
    }

    pub fn open_node(&mut self, centre: usize) {
        if !self.nodes[centre].closed {
            return;
        }
        for dir in 0..PORT_COUNT {
            if let Some(e) = self.traversal_edge(centre, dir) {
                let (x, y) = self.nodes[centre].cell;
                let neigh = self.topo.neighbor(x, y, dir).unwrap();
                let neigh_closed = self.nodes[self.centres[&neigh]].closed;
                if self.edges[e].res.is_none() && !neigh_closed {
                    self.edges[e].closed = false;
                }
            }
        }
        self.nodes[centre].closed = false;
    }

    /// Marks a cell reserved for a specific comb node.
    pub fn settle(&mut self, comb_node: usize, centre: usize) {
        self.settled.insert(comb_node, centre);
    }

    pub fn settled_centre(&self, comb_node: usize) -> Option<usize> {
        self.settled.get(&comb_node).copied()
    }

    /// Open centres within `max_dist` of a position, nearest first.
    pub fn candidates(
        &self,
        pos: [f64; 2],
        max_dist: f64,
    ) -> Vec<usize> {
        let mut heap: BinaryHeap<Reverse<(OrderedFloat<f64>, usize)>> = BinaryHeap::new();
        for x in 0..self.topo.width() {
            for y in 0..self.topo.height() {
                let centre = self.centres[&(x, y)];
                if self.nodes[centre].closed || self.settled.values().any(|&c| c == centre) {
                    continue;
                }
                let c = self.nodes[centre].pos;
                let d = ((c[0] - pos[0]).powi(2) + (c[1] - pos[1]).powi(2)).sqrt();
                if d <= max_dist {
                    heap.push(Reverse((OrderedFloat(d), centre)));
                }
            }
        }
        let mut out = Vec::with_capacity(heap.len());
        while let Some(Reverse((_, c))) = heap.pop() {
            out.push(c);
        }
        out
    }

    /// Comb edges already routed through each port of a cell.
    pub fn settled_outgoing(&self, centre: usize) -> [Option<usize>; PORT_COUNT] {
        let mut out = [None; PORT_COUNT];
        for (dir, slot) in out.iter_mut().enumerate() {
            if let Some(e) = self.traversal_edge(centre, dir) {
                *slot = self.edges[e].res;
            }
        }
        out
    }

    /// Applies an additive cost vector to the traversal edges of a cell.
    /// Returns the inverse vector for `remove_cost_vector`.
    pub fn add_cost_vector(&mut self, centre: usize, add: &NodeCost) -> NodeCost {
        let mut inv = NodeCost::zero();
        for dir in 0..PORT_COUNT {
            let Some(e) = self.traversal_edge(centre, dir) else {
                continue;
            };
            if add.0[dir] < -1.0 {
                if self.edges[e].closed {
                    // already closed, keep it closed on removal
                    inv.0[dir] = 0.0;
                } else {
                    self.edges[e].closed = true;
                    let (x, y) = self.nodes[centre].cell;
                    let neigh = self.topo.neighbor(x, y, dir).unwrap();
                    let neigh_centre = self.centres[&neigh];
                    self.close_node(neigh_centre);
                    inv.0[dir] = add.0[dir];
                }
            } else {
                self.edges[e].cost += add.0[dir];
                inv.0[dir] = add.0[dir];
            }
        }
        inv
    }

    pub fn remove_cost_vector(&mut self, centre: usize, inv: &NodeCost) {
        for dir in 0..PORT_COUNT {
            let Some(e) = self.traversal_edge(centre, dir) else {
                continue;
            };
            if inv.0[dir] < -1.0 {
                self.edges[e].closed = false;
                let (x, y) = self.nodes[centre].cell;
                let neigh = self.topo.neighbor(x, y, dir).unwrap();
                let neigh_centre = self.centres[&neigh];
                self.open_node(neigh_centre);
            } else {
                self.edges[e].cost -= inv.0[dir];
            }
        }
    }

    // --- routing penalties (cost vectors) ---

    /// Penalizes ports whose use would space this edge unevenly between
    /// the already-settled edges of the station, and closes the arcs where
    /// it may not land at all.
    pub fn spacing_penalty(
        &self,
        centre: usize,
        ordering: &EdgeOrdering,
        comb_edge: usize,
    ) -> NodeCost {
        let mut add = NodeCost::zero();
        let deg = ordering.len();
        if deg == 0 {
            return add;
        }
        let optim_dist = (PORT_COUNT / deg).saturating_sub(1);

        if !ordering.contains(comb_edge) {
            warn!("spacing penalty requested for comb edge {comb_edge} absent from the node ordering");
            return add;
        }

        let outgoing = self.settled_outgoing(centre);

        for (i, out) in outgoing.iter().enumerate() {
            let Some(settled) = *out else { continue };
            let d_cw = ordering.dist(settled, comb_edge) as i64 - 1;
            let d_ccw = ordering.dist(comb_edge, settled) as i64 - 1;

            let dd = (((((d_cw + 1) + d_cw).rem_euclid(8)) as usize) * optim_dist) % 8;
            let ddd = (6usize.wrapping_sub(dd)) % 8;

            let pen = self.pens.p_45 * 2.0 - 1.0;

            for j in 1..=(dd as i64 + 1) {
                if dd == 0 {
                    break;
                }
                let slot = (i + j as usize) % PORT_COUNT;
                if add.0[slot] < -1.0 {
                    continue;
                }
                add.0[slot] += pen * (1.0 - (j - 1) as f64 / dd as f64);
            }
            for j in 1..=(ddd as i64 + 1) {
                if ddd == 0 {
                    break;
                }
                let slot = (i + PORT_COUNT - j as usize % PORT_COUNT) % PORT_COUNT;
                if add.0[slot] < -1.0 {
                    continue;
                }
                add.0[slot] += pen * (1.0 - (j - 1) as f64 / ddd as f64);
            }

            // the settled edge's own port, and the arcs closer to it than
            // the cyclic order allows, are off limits
            add.0[i] = CLOSE;
            for j in 1..=d_cw {
                add.0[(i + j as usize) % PORT_COUNT] = CLOSE;
            }
            for j in 1..=d_ccw {
                add.0[(i + PORT_COUNT - j as usize % PORT_COUNT) % PORT_COUNT] = CLOSE;
            }
        }

        add
    }

    /// Closes ports that would place the new edge between two settled
    /// edges whose cyclic order around the station disagrees with the
    /// source graph.
    pub fn topo_block_penalty(
        &self,
        centre: usize,
        ordering: &EdgeOrdering,
        comb_edge: usize,
    ) -> NodeCost {
        let mut add = NodeCost::zero();
        let outgoing = self.settled_outgoing(centre);

        for i in 0..PORT_COUNT {
            let Some(out_i) = outgoing[i] else { continue };
            for j in (i + 1)..(i + PORT_COUNT) {
                let Some(out_j) = outgoing[j % PORT_COUNT] else {
                    continue;
                };
                if out_j == out_i {
                    break;
                }
                let da = ordering.dist(out_i, comb_edge);
                let db = ordering.dist(out_j, comb_edge);
                if db < da {
                    // the new edge does not belong in this arc
                    for x in (i + 1)..j {
                        add.0[x % PORT_COUNT] = CLOSE;
                    }
                }
            }
        }
        add
    }

    /// Prefers ports matching the true geographic bearing towards the
    /// other endpoint; the penalty grows linearly with the angular
    /// difference.
    pub fn deviation_penalty(&self, from_pos: [f64; 2], to_pos: [f64; 2]) -> NodeCost {
        let mut add = NodeCost::zero();
        let bearing = (to_pos[1] - from_pos[1]).atan2(to_pos[0] - from_pos[0]);

        let mut deg = (-bearing * (180.0 / std::f64::consts::PI)) as i64;
        if deg < 0 {
            deg += 360;
        }
        let deg = ((deg + 90) % 360) as f64;

        for (i, slot) in add.0.iter_mut().enumerate() {
            let port_deg = 45.0 * i as f64;
            let diff = (deg - port_deg).abs().min(360.0 - (deg - port_deg).abs());
            *slot += 0.1 * diff;
        }
        add
    }

    // --- shortest path ---

    /// A* from one centre to another over open edges. Returns the vertex
    /// path (centre ... centre) and its cost.
    pub fn shortest_path(&self, from: usize, to: usize) -> Option<(Vec<usize>, f64)> {
        let target_cell = self.nodes[to].cell;
        let mut dist: AHashMap<usize, f64> = AHashMap::new();
        let mut prev: AHashMap<usize, usize> = AHashMap::new();
        let mut heap: BinaryHeap<Reverse<(OrderedFloat<f64>, usize)>> = BinaryHeap::new();

        dist.insert(from, 0.0);
        heap.push(Reverse((
            OrderedFloat(self.topo.heuristic(self.nodes[from].cell, target_cell, &self.pens)),
            from,
        )));

        while let Some(Reverse((_, u))) = heap.pop() {
            if u == to {
                let mut path = vec![to];
                let mut cur = to;
                while let Some(&p) = prev.get(&cur) {
                    path.push(p);
                    cur = p;
                }
                path.reverse();
                return Some((path, dist[&to]));
            }
            let du = dist[&u];

            for &(e, v) in &self.adj[u] {
                let edge = &self.edges[e];
                if edge.closed || edge.cost.is_infinite() {
                    continue;
                }
                // Centres may only appear at the path ends.
                if self.nodes[v].port.is_none() && v != to {
                    continue;
                }
                let nd = du + edge.cost;
                if nd < *dist.get(&v).unwrap_or(&INF) {
                    dist.insert(v, nd);
                    prev.insert(v, u);
                    let h = self.topo.heuristic(self.nodes[v].cell, target_cell, &self.pens);
                    heap.push(Reverse((OrderedFloat(nd + h), v)));
                }
            }
        }
        None
    }

    /// Settles a routed path for a comb edge: residents on traversal
    /// edges, intermediate cells closed, crossing diagonals closed.
    pub fn settle_path(&mut self, path: &[usize], comb_edge: usize) {
        // Mark traversal edges and close diagonal counterparts.
        for w in path.windows(2) {
            let (u, v) = (w[0], w[1]);
            let (nu, nv) = (&self.nodes[u], &self.nodes[v]);
            let key = (u.min(v), u.max(v));
            let e = self.edge_index[&key];
            self.edges[e].res = Some(comb_edge);
            self.edges[e].closed = true;

            // A diagonal hop closes the opposing diagonal of the cell
            // pair so no later route can cross it.
            if nu.cell != nv.cell {
                if let (Some(pu), Some(_)) = (nu.port, nv.port) {
                    let dir = pu as usize;
                    if dir % 2 == 1 {
                        let (x, y) = nu.cell;
                        let na = self.topo.neighbor(x, y, (dir + 7) % PORT_COUNT);
                        let nb = self.topo.neighbor(x, y, (dir + 1) % PORT_COUNT);
                        if let (Some(na), Some(nb)) = (na, nb) {
                            let ca = self.centres[&na];
                            let cb = self.centres[&nb];
                            if let Some(cross) = self.edge_between_cells(ca, cb) {
                                self.edges[cross].cost = INF;
                                self.edges[cross].closed = true;
                            }
                        }
                    }
                }
            }
        }

        // Close the interior cells of the path. The interior consists of
        // port vertices; endpoint cells stay open for the station's
        // remaining edges.
        let end_cells = [
            self.nodes[*path.first().unwrap()].cell,
            self.nodes[*path.last().unwrap()].cell,
        ];
        let interior_cells: Vec<(usize, usize)> = path
            .iter()
            .map(|&n| self.nodes[n].cell)
            .filter(|c| !end_cells.contains(c))
            .collect();
        for cell in interior_cells {
            let centre = self.centres[&cell];
            self.close_node(centre);
        }
    }

    /// The traversal edge directly connecting two neighbouring cell
    /// centres, if any.
    fn edge_between_cells(&self, centre_a: usize, centre_b: usize) -> Option<usize> {
        for dir in 0..PORT_COUNT {
            let (x, y) = self.nodes[centre_a].cell;
            if self.topo.neighbor(x, y, dir) == Some(self.nodes[centre_b].cell) {
                return self.traversal_edge(centre_a, dir);
            }
        }
        None
    }
}

/// Cyclic order of comb edges around a node, by geographic bearing.
pub struct EdgeOrdering {
    order: Vec<usize>,
}

impl EdgeOrdering {
    pub fn new(mut edges_with_angles: Vec<(usize, f64)>) -> EdgeOrdering {
        edges_with_angles
            .sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        EdgeOrdering {
            order: edges_with_angles.into_iter().map(|(e, _)| e).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, edge: usize) -> bool {
        self.order.contains(&edge)
    }

    /// Cyclic distance from `a` to `b`, in edges.
    pub fn dist(&self, a: usize, b: usize) -> usize {
        let pa = self.order.iter().position(|&e| e == a).unwrap_or(0);
        let pb = self.order.iter().position(|&e| e == b).unwrap_or(0);
        (pb + self.order.len() - pa) % self.order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::topology::Octilinear;
    use super::*;

    fn small_grid() -> GridGraph<Octilinear> {
        GridGraph::new(
            Octilinear {
                origin: [0.0, 0.0],
                cell_size: 100.0,
                width: 4,
                height: 4,
            },
            Penalties::default(),
        )
    }

    #[test]
    fn cells_have_nine_vertices() {
        let g = small_grid();
        assert_eq!(g.nodes.len(), 4 * 4 * 9);
        let centre = g.centre(1, 1);
        assert!(g.nodes[centre].port.is_none());
        for dir in 0..PORT_COUNT {
            let p = g.nodes[centre].ports[dir];
            assert_eq!(g.nodes[p].port, Some(dir as u8));
        }
    }

    #[test]
    fn route_between_neighbours_uses_one_traversal() {
        let mut g = small_grid();
        let a = g.centre(1, 1);
        let b = g.centre(2, 1);
        g.open_node_sink(a, 0.0);
        g.open_node_sink(b, 0.0);
        let (path, cost) = g.shortest_path(a, b).expect("route exists");
        assert_eq!(path.first(), Some(&a));
        assert_eq!(path.last(), Some(&b));
        // centre -> port E -> port W -> centre
        assert_eq!(path.len(), 4);
        assert!((cost - g.pens.horizontal).abs() < 1e-9);
    }

    #[test]
    fn straight_route_beats_detour() {
        let mut g = small_grid();
        let a = g.centre(0, 1);
        let b = g.centre(3, 1);
        g.open_node_sink(a, 0.0);
        g.open_node_sink(b, 0.0);
        let (path, _) = g.shortest_path(a, b).expect("route exists");
        // All interior centres on the straight line are skipped (ports
        // only), so the path is centre + 3 * 2 ports + centre long.
        let cells: Vec<(usize, usize)> = path.iter().map(|&n| g.nodes[n].cell).collect();
        assert!(cells.windows(2).all(|w| w[0].1 == 1 && w[1].1 == 1));
    }

    #[test]
    fn settled_paths_block_later_routes() {
        let mut g = small_grid();
        let a = g.centre(1, 0);
        let b = g.centre(1, 3);
        g.open_node_sink(a, 0.0);
        g.open_node_sink(b, 0.0);
        let (path, _) = g.shortest_path(a, b).expect("route exists");
        g.settle_path(&path, 0);
        g.close_node_sink(a);
        g.close_node_sink(b);

        // A crossing route must now avoid the settled column cells.
        let c = g.centre(0, 1);
        let d = g.centre(3, 1);
        g.open_node_sink(c, 0.0);
        g.open_node_sink(d, 0.0);
        let (path2, _) = g.shortest_path(c, d).expect("detour exists");
        for &n in &path2 {
            assert!(
                g.nodes[n].cell != (1, 1) && g.nodes[n].cell != (1, 2),
                "crossing route reused a settled cell"
            );
        }
    }

    #[test]
    fn cost_vectors_are_reversible() {
        let mut g = small_grid();
        let centre = g.centre(1, 1);
        let before: Vec<f64> = (0..PORT_COUNT)
            .filter_map(|d| g.traversal_edge(centre, d))
            .map(|e| g.edges[e].cost)
            .collect();

        let mut add = NodeCost::zero();
        add.0[0] = 5.0;
        add.0[3] = CLOSE;
        let inv = g.add_cost_vector(centre, &add);
        let during: Vec<f64> = (0..PORT_COUNT)
            .filter_map(|d| g.traversal_edge(centre, d))
            .map(|e| g.edges[e].cost)
            .collect();
        assert!((during[0] - (before[0] + 5.0)).abs() < 1e-9);
        assert!(g.edges[g.traversal_edge(centre, 3).unwrap()].closed);

        g.remove_cost_vector(centre, &inv);
        let after: Vec<f64> = (0..PORT_COUNT)
            .filter_map(|d| g.traversal_edge(centre, d))
            .map(|e| g.edges[e].cost)
            .collect();
        assert_eq!(before, after);
        assert!(!g.edges[g.traversal_edge(centre, 3).unwrap()].closed);
    }

    #[test]
    fn edge_ordering_distance_is_cyclic() {
        let ord = EdgeOrdering::new(vec![(10, 0.0), (20, 1.0), (30, 2.0)]);
        assert_eq!(ord.dist(10, 20), 1);
        assert_eq!(ord.dist(20, 10), 2);
        assert_eq!(ord.dist(30, 30), 0);
    }
}

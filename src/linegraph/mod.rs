// ===========================================================================
// Line graph: the shared in-memory model every stage reads and writes.
// Nodes live in an id-keyed map, edges in an index-stable arena; adjacency
// is a derived node -> edge-index map so entities never hold owning
// back-references.
// ===========================================================================

pub mod geojson;

use crate::error::{LayoutError, Result};
use ahash::AHashMap;
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::RTree;
use serde::{Deserialize, Serialize};

/// Endpoint tolerance between an edge polyline and its node positions,
/// in map units.
pub const GEOM_TOL: f64 = 1e-3;

/// A transit line. Shared by id across edges; immutable after load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub id: String,
    pub label: String,
    pub color: Option<String>,
}

/// Travel direction of a line occurrence relative to the edge orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LineDir {
    Both,
    /// from -> to
    Forward,
    /// to -> from
    Backward,
}

impl LineDir {
    pub fn from_code(code: u8) -> Option<LineDir> {
        match code {
            0 => Some(LineDir::Both),
            1 => Some(LineDir::Forward),
            2 => Some(LineDir::Backward),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            LineDir::Both => 0,
            LineDir::Forward => 1,
            LineDir::Backward => 2,
        }
    }

    /// Direction as seen when the edge is walked against its orientation.
    pub fn reversed(self) -> LineDir {
        match self {
            LineDir::Both => LineDir::Both,
            LineDir::Forward => LineDir::Backward,
            LineDir::Backward => LineDir::Forward,
        }
    }
}

/// One appearance of a line on an edge.
#[derive(Debug, Clone, PartialEq)]
pub struct LineOcc {
    pub line: String,
    pub dir: LineDir,
    /// Collapsed parallel lines this occurrence represents after topology
    /// merging. Always contains at least the line itself.
    pub relatives: Vec<String>,
    /// Position in the edge bundle, stamped by the ordering stage.
    pub order: Option<u32>,
}

impl LineOcc {
    pub fn new(line: impl Into<String>, dir: LineDir) -> Self {
        let line = line.into();
        Self {
            relatives: vec![line.clone()],
            line,
            dir,
            order: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: i64,
    pub pos: [f64; 2],
    /// Stations bound to this node. Clustering concatenates these; the
    /// first entry is the display representative.
    pub stations: Vec<StationInfo>,
    /// Lines that do not continue between a given pair of incident edges
    /// at this node: (line id, edge a, edge b).
    pub conn_exceptions: Vec<(String, i64, i64)>,
}

impl Node {
    pub fn new(id: i64, pos: [f64; 2]) -> Self {
        Self {
            id,
            pos,
            stations: Vec::new(),
            conn_exceptions: Vec::new(),
        }
    }

    pub fn is_station(&self) -> bool {
        !self.stations.is_empty()
    }

    pub fn station(&self) -> Option<&StationInfo> {
        self.stations.first()
    }

    /// True if `line` may continue from edge `a` to edge `b` through this
    /// node.
    pub fn conn_occurs(&self, line: &str, a: i64, b: i64) -> bool {
        !self
            .conn_exceptions
            .iter()
            .any(|(l, ea, eb)| l == line && ((*ea == a && *eb == b) || (*ea == b && *eb == a)))
    }
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub id: i64,
    pub from: i64,
    pub to: i64,
    /// Ordered planar points, from-node first.
    pub geometry: Vec<[f64; 2]>,
    /// The line bundle. Vec order is the track layout once stage D ran.
    pub lines: Vec<LineOcc>,
}

impl Edge {
    /// Position of a line in the bundle, if present.
    pub fn line_pos(&self, line: &str) -> Option<usize> {
        self.lines.iter().position(|l| l.line == line)
    }

    pub fn has_line(&self, line: &str) -> bool {
        self.line_pos(line).is_some()
    }

    pub fn other_node(&self, node: i64) -> i64 {
        if self.from == node { self.to } else { self.from }
    }
}

/// The line graph. Edges are arena-allocated; a removed edge leaves a
/// tombstone (`None`) so indices stay stable within a stage. `compact`
/// drops tombstones between stages.
pub struct LineGraph {
    pub nodes: AHashMap<i64, Node>,
    pub edges: Vec<Option<Edge>>,
    pub lines: AHashMap<String, Line>,
    /// node id -> indices into `edges`. Derived; rebuild after edits.
    pub node_to_edges: AHashMap<i64, Vec<usize>>,
}

impl LineGraph {
    pub fn new() -> Self {
        Self {
            nodes: AHashMap::new(),
            edges: Vec::new(),
            lines: AHashMap::new(),
            node_to_edges: AHashMap::new(),
        }
    }

    pub fn add_node(&mut self, node: Node) {
        self.nodes.insert(node.id, node);
    }

    pub fn add_line(&mut self, line: Line) {
        self.lines.entry(line.id.clone()).or_insert(line);
    }

    /// Inserts an edge and returns its arena index. Endpoints must exist.
    /// Negative ids are replaced with a fresh unique id.
    pub fn add_edge(&mut self, mut edge: Edge) -> usize {
        let idx = self.edges.len();
        if edge.id < 0 {
            edge.id = self
                .edges
                .iter()
                .flatten()
                .map(|e| e.id)
                .max()
                .map_or(0, |m| m + 1);
        }
        self.node_to_edges.entry(edge.from).or_default().push(idx);
        self.node_to_edges.entry(edge.to).or_default().push(idx);
        self.edges.push(Some(edge));
        idx
    }

    pub fn edge(&self, idx: usize) -> Option<&Edge> {
        self.edges.get(idx).and_then(|e| e.as_ref())
    }

    pub fn edge_mut(&mut self, idx: usize) -> Option<&mut Edge> {
        self.edges.get_mut(idx).and_then(|e| e.as_mut())
    }

    pub fn remove_edge(&mut self, idx: usize) -> Option<Edge> {
        let removed = self.edges.get_mut(idx)?.take();
        if removed.is_some() {
            self.rebuild_adjacency();
        }
        removed
    }

    /// Iterator over live edges with their arena indices.
    pub fn live_edges(&self) -> impl Iterator<Item = (usize, &Edge)> {
        self.edges
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (i, e)))
    }

    pub fn edge_count(&self) -> usize {
        self.edges.iter().filter(|e| e.is_some()).count()
    }

    pub fn degree(&self, node: i64) -> usize {
        self.node_to_edges.get(&node).map_or(0, |v| v.len())
    }

    pub fn incident(&self, node: i64) -> &[usize] {
        self.node_to_edges
            .get(&node)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn rebuild_adjacency(&mut self) {
        self.node_to_edges.clear();
        for (idx, edge) in self.edges.iter().enumerate() {
            let Some(edge) = edge else { continue };
            self.node_to_edges.entry(edge.from).or_default().push(idx);
            self.node_to_edges.entry(edge.to).or_default().push(idx);
        }
    }

    /// Drops edge tombstones and nodes without incident edges, renumbering
    /// nothing the caller can see (edge ids are kept, arena indices are
    /// refreshed).
    pub fn compact(&mut self) {
        self.edges.retain(|e| e.is_some());
        self.rebuild_adjacency();
        let reachable: ahash::AHashSet<i64> = self
            .edges
            .iter()
            .flatten()
            .flat_map(|e| [e.from, e.to])
            .collect();
        self.nodes
            .retain(|id, n| reachable.contains(id) || n.is_station());
    }

    /// Spatial index over live edge bounding boxes, data = arena index.
    pub fn edge_tree(&self) -> RTree<GeomWithData<Rectangle<[f64; 2]>, usize>> {
        let mut items = Vec::new();
        for (idx, edge) in self.live_edges() {
            if edge.geometry.is_empty() {
                continue;
            }
            let mut min = [f64::MAX, f64::MAX];
            let mut max = [f64::MIN, f64::MIN];
            for p in &edge.geometry {
                min[0] = min[0].min(p[0]);
                min[1] = min[1].min(p[1]);
                max[0] = max[0].max(p[0]);
                max[1] = max[1].max(p[1]);
            }
            items.push(GeomWithData::new(Rectangle::from_corners(min, max), idx));
        }
        RTree::bulk_load(items)
    }

    /// Spatial index over station node positions, data = node id.
    pub fn station_tree(&self) -> RTree<GeomWithData<[f64; 2], i64>> {
        let items: Vec<_> = self
            .nodes
            .values()
            .filter(|n| n.is_station())
            .map(|n| GeomWithData::new(n.pos, n.id))
            .collect();
        RTree::bulk_load(items)
    }

    /// Checks the structural invariants every stage must preserve: finite
    /// positions, endpoints present, geometry anchored at node positions,
    /// no duplicate line per bundle, orders forming a 0..k-1 permutation
    /// where stamped.
    pub fn check_invariants(&self) -> Result<()> {
        for node in self.nodes.values() {
            if !node.pos[0].is_finite() || !node.pos[1].is_finite() {
                return Err(LayoutError::InvariantViolated(format!(
                    "node {} has non-finite position",
                    node.id
                )));
            }
            for st in &node.stations {
                if st.name.is_empty() {
                    return Err(LayoutError::InvariantViolated(format!(
                        "station node {} has empty name",
                        node.id
                    )));
                }
            }
        }
        for (_, edge) in self.live_edges() {
            for end in [edge.from, edge.to] {
                if !self.nodes.contains_key(&end) {
                    return Err(LayoutError::InvariantViolated(format!(
                        "edge {} references missing node {}",
                        edge.id, end
                    )));
                }
            }
            if edge.geometry.len() >= 2 {
                let from_pos = self.nodes[&edge.from].pos;
                let to_pos = self.nodes[&edge.to].pos;
                let d0 = dist(edge.geometry[0], from_pos);
                let d1 = dist(*edge.geometry.last().unwrap(), to_pos);
                if d0 > GEOM_TOL || d1 > GEOM_TOL {
                    return Err(LayoutError::GeometryMismatch {
                        edge: edge.id,
                        node: if d0 > GEOM_TOL { edge.from } else { edge.to },
                        dist: d0.max(d1),
                    });
                }
            }
            let mut seen = ahash::AHashSet::new();
            for occ in &edge.lines {
                if !seen.insert(occ.line.as_str()) {
                    return Err(LayoutError::InvariantViolated(format!(
                        "edge {} carries line '{}' twice",
                        edge.id, occ.line
                    )));
                }
            }
            let mut orders: Vec<u32> = edge.lines.iter().filter_map(|l| l.order).collect();
            if !orders.is_empty() {
                orders.sort_unstable();
                let expected: Vec<u32> = (0..edge.lines.len() as u32).collect();
                if orders != expected {
                    return Err(LayoutError::InvariantViolated(format!(
                        "edge {} orders are not a 0..{} permutation",
                        edge.id,
                        edge.lines.len()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Semantic equality: same nodes, same edge endpoints and bundle
    /// multisets (order ignored unless both sides carry stamps).
    pub fn semantically_eq(&self, other: &LineGraph) -> bool {
        if self.nodes.len() != other.nodes.len() || self.edge_count() != other.edge_count() {
            return false;
        }
        for (id, node) in &self.nodes {
            let Some(o) = other.nodes.get(id) else {
                return false;
            };
            if node.stations != o.stations || dist(node.pos, o.pos) > GEOM_TOL {
                return false;
            }
        }
        let key = |e: &Edge| {
            let mut lines: Vec<(String, u8, Option<u32>)> = e
                .lines
                .iter()
                .map(|l| (l.line.clone(), l.dir.code(), l.order))
                .collect();
            lines.sort();
            let (a, b) = if e.from <= e.to {
                (e.from, e.to)
            } else {
                (e.to, e.from)
            };
            (a, b, lines)
        };
        let mut ours: Vec<_> = self.live_edges().map(|(_, e)| key(e)).collect();
        let mut theirs: Vec<_> = other.live_edges().map(|(_, e)| key(e)).collect();
        ours.sort();
        theirs.sort();
        ours == theirs
    }

    pub fn next_node_id(&self) -> i64 {
        self.nodes.keys().max().map_or(0, |m| m + 1)
    }
}

impl Default for LineGraph {
    fn default() -> Self {
        Self::new()
    }
}

pub fn dist(a: [f64; 2], b: [f64; 2]) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_node_graph() -> LineGraph {
        let mut g = LineGraph::new();
        g.add_node(Node::new(0, [0.0, 0.0]));
        g.add_node(Node::new(1, [100.0, 0.0]));
        g.add_line(Line {
            id: "a".into(),
            label: "A".into(),
            color: None,
        });
        g.add_edge(Edge {
            id: -1,
            from: 0,
            to: 1,
            geometry: vec![[0.0, 0.0], [100.0, 0.0]],
            lines: vec![LineOcc::new("a", LineDir::Both)],
        });
        g
    }

    #[test]
    fn adjacency_is_symmetric() {
        let g = two_node_graph();
        assert_eq!(g.incident(0), &[0]);
        assert_eq!(g.incident(1), &[0]);
        let e = g.edge(0).unwrap();
        assert!(g.incident(e.from).contains(&0) && g.incident(e.to).contains(&0));
    }

    #[test]
    fn invariants_hold_for_simple_graph() {
        two_node_graph().check_invariants().unwrap();
    }

    #[test]
    fn geometry_mismatch_is_detected() {
        let mut g = two_node_graph();
        g.edge_mut(0).unwrap().geometry[0] = [5.0, 5.0];
        match g.check_invariants() {
            Err(LayoutError::GeometryMismatch { edge: 0, .. }) => {}
            other => panic!("expected GeometryMismatch, got {:?}", other.err()),
        }
    }

    #[test]
    fn duplicate_line_in_bundle_is_rejected() {
        let mut g = two_node_graph();
        g.edge_mut(0)
            .unwrap()
            .lines
            .push(LineOcc::new("a", LineDir::Both));
        assert!(g.check_invariants().is_err());
    }

    #[test]
    fn remove_edge_rebuilds_adjacency() {
        let mut g = two_node_graph();
        g.remove_edge(0);
        assert_eq!(g.degree(0), 0);
        assert_eq!(g.degree(1), 0);
        assert_eq!(g.edge_count(), 0);
    }
}

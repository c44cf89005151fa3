// ===========================================================================
// Optimization view of the line graph: maximal chains of non-station
// degree-2 nodes collapse into single OptEdges so the ordering problem
// sees one segment per corridor. Each OptEdge remembers its underlying
// edges and the direction it walked them, so solved permutations can be
// written back per segment.
// ===========================================================================

use crate::error::{LayoutError, Result};
use crate::linegraph::{LineDir, LineGraph};
use ahash::{AHashMap, AHashSet};
use log::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct OptLineOcc {
    pub line: String,
    /// Direction relative to the OptEdge's from -> to orientation.
    pub dir: LineDir,
    pub relatives: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct OptSegment {
    /// Arena index of the underlying edge in the line graph.
    pub edge_idx: usize,
    /// True iff the underlying edge runs from -> to when the OptEdge is
    /// walked from its own from-node.
    pub forward: bool,
}

#[derive(Debug, Clone)]
pub struct OptEdge {
    pub from: usize,
    pub to: usize,
    pub segments: Vec<OptSegment>,
    /// The shared bundle, expressed in the OptEdge orientation.
    pub lines: Vec<OptLineOcc>,
}

impl OptEdge {
    pub fn cardinality(&self) -> usize {
        self.lines.len()
    }

    pub fn has_line(&self, line: &str) -> bool {
        self.lines.iter().any(|l| l.line == line)
    }

    pub fn other_node(&self, n: usize) -> usize {
        if self.from == n { self.to } else { self.from }
    }
}

#[derive(Debug, Clone)]
pub struct OptNode {
    /// Underlying line graph node id.
    pub node: i64,
    /// Incident OptEdge indices.
    pub adj: Vec<usize>,
}

pub struct OptGraph {
    pub nodes: Vec<OptNode>,
    pub edges: Vec<OptEdge>,
    node_index: AHashMap<i64, usize>,
}

impl OptGraph {
    /// Contracts the line graph. Terminal nodes (stations and nodes of
    /// degree != 2) become OptNodes; everything between two terminals
    /// becomes one OptEdge.
    pub fn build(graph: &LineGraph) -> Result<OptGraph> {
        let mut og = OptGraph {
            nodes: Vec::new(),
            edges: Vec::new(),
            node_index: AHashMap::new(),
        };

        let is_terminal = |id: i64| -> bool {
            let node = &graph.nodes[&id];
            node.is_station() || graph.degree(id) != 2
        };

        let mut consumed: AHashSet<usize> = AHashSet::new();

        let mut terminal_ids: Vec<i64> = graph
            .nodes
            .keys()
            .copied()
            .filter(|id| is_terminal(*id))
            .collect();
        terminal_ids.sort_unstable();

        for &start in &terminal_ids {
            let incident: Vec<usize> = graph.incident(start).to_vec();
            for first_idx in incident {
                if consumed.contains(&first_idx) {
                    continue;
                }

                // Walk the chain away from `start`.
                let mut segments = Vec::new();
                let mut cur_node = start;
                let mut cur_edge = first_idx;
                let end = loop {
                    consumed.insert(cur_edge);
                    let edge = graph.edge(cur_edge).expect("adjacency points at live edge");
                    let forward = edge.from == cur_node;
                    segments.push(OptSegment {
                        edge_idx: cur_edge,
                        forward,
                    });
                    let next_node = edge.other_node(cur_node);
                    if is_terminal(next_node) {
                        break next_node;
                    }
                    // Degree-2 interior node: continue on the other edge.
                    let next_edge = graph
                        .incident(next_node)
                        .iter()
                        .copied()
                        .find(|e| *e != cur_edge)
                        .ok_or_else(|| {
                            LayoutError::InvariantViolated(format!(
                                "degree-2 node {next_node} has no second edge"
                            ))
                        })?;
                    cur_node = next_node;
                    cur_edge = next_edge;
                };

                let from = og.intern_node(start);
                let to = og.intern_node(end);
                let opt_edge_idx = og.edges.len();

                let lines = Self::chain_bundle(graph, &segments)?;
                og.edges.push(OptEdge {
                    from,
                    to,
                    segments,
                    lines,
                });
                og.nodes[from].adj.push(opt_edge_idx);
                if to != from {
                    og.nodes[to].adj.push(opt_edge_idx);
                }
            }
        }

        // Chains that are pure cycles of degree-2 nodes have no terminal to
        // start from; they carry no ordering decisions relevant to other
        // edges, but must still be represented.
        for (idx, edge) in graph.live_edges() {
            if !consumed.contains(&idx) {
                let mut segments = vec![OptSegment {
                    edge_idx: idx,
                    forward: true,
                }];
                let mut cur_node = edge.to;
                let mut cur_edge = idx;
                consumed.insert(idx);
                while cur_node != edge.from {
                    let next_edge = graph
                        .incident(cur_node)
                        .iter()
                        .copied()
                        .find(|e| *e != cur_edge && !consumed.contains(e));
                    let Some(next_edge) = next_edge else { break };
                    consumed.insert(next_edge);
                    let e = graph.edge(next_edge).unwrap();
                    segments.push(OptSegment {
                        edge_idx: next_edge,
                        forward: e.from == cur_node,
                    });
                    cur_node = e.other_node(cur_node);
                    cur_edge = next_edge;
                }
                let from = og.intern_node(edge.from);
                let to = og.intern_node(cur_node);
                let opt_edge_idx = og.edges.len();
                let lines = Self::chain_bundle(graph, &segments)?;
                og.edges.push(OptEdge {
                    from,
                    to,
                    segments,
                    lines,
                });
                og.nodes[from].adj.push(opt_edge_idx);
                if to != from {
                    og.nodes[to].adj.push(opt_edge_idx);
                }
            }
        }

        debug!(
            "contracted {} line graph edges into {} opt edges over {} opt nodes",
            graph.edge_count(),
            og.edges.len(),
            og.nodes.len()
        );
        Ok(og)
    }

    fn intern_node(&mut self, id: i64) -> usize {
        if let Some(&idx) = self.node_index.get(&id) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(OptNode {
            node: id,
            adj: Vec::new(),
        });
        self.node_index.insert(id, idx);
        idx
    }

    pub fn opt_node_of(&self, line_graph_node: i64) -> Option<usize> {
        self.node_index.get(&line_graph_node).copied()
    }

    /// The shared bundle of a chain, in walk orientation, validated to be
    /// identical (as a line set) on every constituent edge.
    fn chain_bundle(graph: &LineGraph, segments: &[OptSegment]) -> Result<Vec<OptLineOcc>> {
        let head = &segments[0];
        let head_edge = graph.edge(head.edge_idx).unwrap();

        let mut head_lines: Vec<&str> = head_edge.lines.iter().map(|l| l.line.as_str()).collect();
        head_lines.sort_unstable();

        for seg in &segments[1..] {
            let edge = graph.edge(seg.edge_idx).unwrap();
            let mut lines: Vec<&str> = edge.lines.iter().map(|l| l.line.as_str()).collect();
            lines.sort_unstable();
            if lines != head_lines {
                // Diagnostic dump of the offending chain.
                let dump: Vec<String> = segments
                    .iter()
                    .map(|s| {
                        let e = graph.edge(s.edge_idx).unwrap();
                        format!(
                            "edge {} [{}]",
                            e.id,
                            e.lines
                                .iter()
                                .map(|l| l.line.as_str())
                                .collect::<Vec<_>>()
                                .join(",")
                        )
                    })
                    .collect();
                return Err(LayoutError::InvariantViolated(format!(
                    "bundle mismatch along contracted chain: {}",
                    dump.join(" -> ")
                )));
            }
        }

        Ok(head_edge
            .lines
            .iter()
            .map(|occ| OptLineOcc {
                line: occ.line.clone(),
                dir: if head.forward {
                    occ.dir
                } else {
                    occ.dir.reversed()
                },
                relatives: occ.relatives.clone(),
            })
            .collect())
    }

    /// Connected components as lists of OptEdge indices.
    pub fn components(&self) -> Vec<Vec<usize>> {
        let mut visited = vec![false; self.edges.len()];
        let mut components = Vec::new();

        for start in 0..self.edges.len() {
            if visited[start] {
                continue;
            }
            let mut component = Vec::new();
            let mut stack = vec![start];
            visited[start] = true;
            while let Some(e) = stack.pop() {
                component.push(e);
                let edge = &self.edges[e];
                for n in [edge.from, edge.to] {
                    for &adj in &self.nodes[n].adj {
                        if !visited[adj] {
                            visited[adj] = true;
                            stack.push(adj);
                        }
                    }
                }
            }
            component.sort_unstable();
            components.push(component);
        }
        components
    }

    /// Writes a solved permutation back onto the underlying edges. `perm`
    /// lists line ids of the OptEdge bundle in final track order, expressed
    /// in the OptEdge's from -> to orientation. Segments walked against
    /// their underlying edge get the reversed order.
    pub fn apply_order(&self, graph: &mut LineGraph, opt_edge: usize, perm: &[String]) -> Result<()> {
        let oe = &self.edges[opt_edge];
        if perm.len() != oe.lines.len() {
            return Err(LayoutError::InvariantViolated(format!(
                "permutation length {} does not match bundle cardinality {}",
                perm.len(),
                oe.lines.len()
            )));
        }

        for seg in &oe.segments {
            let edge = graph.edge_mut(seg.edge_idx).ok_or_else(|| {
                LayoutError::InvariantViolated(format!(
                    "contracted edge index {} no longer live",
                    seg.edge_idx
                ))
            })?;
            for (pos, line) in perm.iter().enumerate() {
                let occ = edge.lines.iter_mut().find(|l| &l.line == line).ok_or_else(|| {
                    LayoutError::InvariantViolated(format!(
                        "line '{line}' missing from underlying edge {}",
                        edge.id
                    ))
                })?;
                occ.order = Some(if seg.forward {
                    pos as u32
                } else {
                    (perm.len() - 1 - pos) as u32
                });
            }
            edge.lines.sort_by_key(|l| l.order.unwrap_or(u32::MAX));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linegraph::{Edge, Line, LineOcc, Node, StationInfo};

    fn station(g: &mut LineGraph, id: i64, pos: [f64; 2]) {
        let mut n = Node::new(id, pos);
        n.stations.push(StationInfo {
            id: format!("s{id}"),
            name: format!("Station {id}"),
        });
        g.add_node(n);
    }

    fn line(g: &mut LineGraph, id: &str) {
        g.add_line(Line {
            id: id.to_string(),
            label: id.to_string(),
            color: None,
        });
    }

    fn edge(g: &mut LineGraph, id: i64, from: i64, to: i64, lines: &[&str]) -> usize {
        let from_pos = g.nodes[&from].pos;
        let to_pos = g.nodes[&to].pos;
        g.add_edge(Edge {
            id,
            from,
            to,
            geometry: vec![from_pos, to_pos],
            lines: lines
                .iter()
                .map(|l| LineOcc::new(*l, LineDir::Both))
                .collect(),
        })
    }

    /// Station - joint - joint - station collapses into one OptEdge of
    /// three segments.
    #[test]
    fn chain_contracts_to_single_opt_edge() {
        let mut g = LineGraph::new();
        station(&mut g, 0, [0.0, 0.0]);
        g.add_node(Node::new(1, [100.0, 0.0]));
        g.add_node(Node::new(2, [200.0, 0.0]));
        station(&mut g, 3, [300.0, 0.0]);
        line(&mut g, "a");
        line(&mut g, "b");
        edge(&mut g, 0, 0, 1, &["a", "b"]);
        // Middle segment stored reversed.
        edge(&mut g, 1, 2, 1, &["a", "b"]);
        edge(&mut g, 2, 2, 3, &["a", "b"]);

        let og = OptGraph::build(&g).unwrap();
        assert_eq!(og.edges.len(), 1);
        assert_eq!(og.nodes.len(), 2);
        let oe = &og.edges[0];
        assert_eq!(oe.segments.len(), 3);
        assert!(oe.segments[0].forward);
        assert!(!oe.segments[1].forward);
        assert!(oe.segments[2].forward);
        assert_eq!(oe.cardinality(), 2);
    }

    #[test]
    fn branch_nodes_stay() {
        let mut g = LineGraph::new();
        station(&mut g, 0, [0.0, 0.0]);
        g.add_node(Node::new(1, [100.0, 0.0]));
        station(&mut g, 2, [200.0, 50.0]);
        station(&mut g, 3, [200.0, -50.0]);
        line(&mut g, "a");
        line(&mut g, "b");
        edge(&mut g, 0, 0, 1, &["a", "b"]);
        edge(&mut g, 1, 1, 2, &["a"]);
        edge(&mut g, 2, 1, 3, &["b"]);

        let og = OptGraph::build(&g).unwrap();
        assert_eq!(og.edges.len(), 3);
        assert_eq!(og.nodes.len(), 4);
        assert_eq!(og.components().len(), 1);
    }

    #[test]
    fn bundle_mismatch_is_invariant_violation() {
        let mut g = LineGraph::new();
        station(&mut g, 0, [0.0, 0.0]);
        g.add_node(Node::new(1, [100.0, 0.0]));
        station(&mut g, 2, [200.0, 0.0]);
        line(&mut g, "a");
        line(&mut g, "b");
        edge(&mut g, 0, 0, 1, &["a", "b"]);
        edge(&mut g, 1, 1, 2, &["a"]);

        match OptGraph::build(&g) {
            Err(LayoutError::InvariantViolated(msg)) => {
                assert!(msg.contains("bundle mismatch"));
            }
            other => panic!("expected InvariantViolated, got {:?}", other.err()),
        }
    }

    #[test]
    fn apply_order_respects_segment_direction() {
        let mut g = LineGraph::new();
        station(&mut g, 0, [0.0, 0.0]);
        g.add_node(Node::new(1, [100.0, 0.0]));
        station(&mut g, 2, [200.0, 0.0]);
        line(&mut g, "a");
        line(&mut g, "b");
        edge(&mut g, 0, 0, 1, &["a", "b"]);
        let reversed_idx = edge(&mut g, 1, 2, 1, &["a", "b"]);

        let og = OptGraph::build(&g).unwrap();
        og.apply_order(&mut g, 0, &["b".to_string(), "a".to_string()])
            .unwrap();

        let head = g.edge(0).unwrap();
        assert_eq!(head.lines[0].line, "b");
        assert_eq!(head.lines[0].order, Some(0));
        // Reversed segment carries the mirrored order.
        let tail = g.edge(reversed_idx).unwrap();
        assert_eq!(tail.lines[0].line, "a");
        assert_eq!(tail.lines[0].order, Some(0));
        assert_eq!(tail.lines[1].line, "b");
        g.check_invariants().unwrap();
    }

    #[test]
    fn disconnected_components_are_separate() {
        let mut g = LineGraph::new();
        station(&mut g, 0, [0.0, 0.0]);
        station(&mut g, 1, [100.0, 0.0]);
        station(&mut g, 2, [0.0, 500.0]);
        station(&mut g, 3, [100.0, 500.0]);
        line(&mut g, "a");
        line(&mut g, "b");
        edge(&mut g, 0, 0, 1, &["a"]);
        edge(&mut g, 1, 2, 3, &["b"]);

        let og = OptGraph::build(&g).unwrap();
        assert_eq!(og.components().len(), 2);
    }
}

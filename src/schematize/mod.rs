// ===========================================================================
// Schematization engine: places every station (and branch joint) of the
// ordered line graph on a distinct grid vertex and routes every corridor
// as a shortest path over the grid, then writes grid positions back into
// the line graph. The base grid kind is selected by configuration.
// ===========================================================================

use crate::config::{BaseGridKind, LayoutConfig, OnInfeasible};
use crate::error::{LayoutError, Result};
use crate::grid::topology::{GridTopology, Octilinear, Orthoradial, PORT_COUNT};
use crate::grid::{EdgeOrdering, GridGraph, NodeCost, Penalties};
use crate::linegraph::LineGraph;
use crate::optgraph::OptGraph;
use crate::topo::geometry::{extract_sub_polyline, interpolate_along_polyline};
use ahash::AHashMap;
use log::{debug, info, warn};
use std::time::{Duration, Instant};

pub fn schematize(graph: &mut LineGraph, cfg: &LayoutConfig) -> Result<()> {
    if graph.edge_count() == 0 {
        return Ok(());
    }
    match cfg.mode {
        BaseGridKind::Geographic => Ok(()),
        BaseGridKind::Octilinear => {
            let (min, max) = bounding_box(graph);
            run_with_retry(graph, cfg, |expand| {
                let lo = [min[0] - expand, min[1] - expand];
                let hi = [max[0] + expand, max[1] + expand];
                Octilinear::covering(lo, hi, cfg.cell_size)
            })
        }
        BaseGridKind::Orthoradial => {
            let (min, max) = bounding_box(graph);
            let centre = [(min[0] + max[0]) / 2.0, (min[1] + max[1]) / 2.0];
            let radius = graph
                .nodes
                .values()
                .map(|n| {
                    ((n.pos[0] - centre[0]).powi(2) + (n.pos[1] - centre[1]).powi(2)).sqrt()
                })
                .fold(0.0f64, f64::max);
            run_with_retry(graph, cfg, |expand| {
                Orthoradial::covering(centre, radius + expand + cfg.cell_size, cfg.cell_size)
            })
        }
    }
}

fn run_with_retry<T, F>(graph: &mut LineGraph, cfg: &LayoutConfig, mut make_topo: F) -> Result<()>
where
    T: GridTopology,
    F: FnMut(f64) -> T,
{
    let (min, max) = bounding_box(graph);
    let extent = (max[0] - min[0]).max(max[1] - min[1]).max(cfg.cell_size);

    match attempt(graph, cfg, make_topo(0.0)) {
        Err(LayoutError::Infeasible(msg)) if cfg.on_infeasible == OnInfeasible::Grow => {
            warn!("layout infeasible ({msg}); growing the grid and retrying once");
            attempt(graph, cfg, make_topo(extent / 2.0))
        }
        other => other,
    }
}

fn attempt<T: GridTopology>(graph: &mut LineGraph, cfg: &LayoutConfig, topo: T) -> Result<()> {
    let comb = OptGraph::build(graph)?;
    let mut grid = GridGraph::new(topo, Penalties::from_config(cfg));
    let deadline = Instant::now() + Duration::from_millis(cfg.time_budget_ms);

    info!(
        "schematizing {} comb nodes / {} comb edges on a {}x{} grid",
        comb.nodes.len(),
        comb.edges.len(),
        grid.topo.width(),
        grid.topo.height()
    );

    place_nodes(graph, &comb, cfg, &mut grid)?;
    let paths = route_edges(graph, &comb, cfg, &mut grid, deadline)?;
    write_back(graph, &comb, &grid, &paths)?;

    graph.check_invariants()
}

fn bounding_box(graph: &LineGraph) -> ([f64; 2], [f64; 2]) {
    let mut min = [f64::MAX, f64::MAX];
    let mut max = [f64::MIN, f64::MIN];
    for n in graph.nodes.values() {
        min[0] = min[0].min(n.pos[0]);
        min[1] = min[1].min(n.pos[1]);
        max[0] = max[0].max(n.pos[0]);
        max[1] = max[1].max(n.pos[1]);
    }
    (min, max)
}

/// Assigns every comb node its grid vertex. Priority: descending degree,
/// then descending summed bundle cardinality, then ascending node id.
fn place_nodes<T: GridTopology>(
    graph: &LineGraph,
    comb: &OptGraph,
    cfg: &LayoutConfig,
    grid: &mut GridGraph<T>,
) -> Result<()> {
    let mut order: Vec<usize> = (0..comb.nodes.len()).collect();
    let card_sum = |n: usize| -> usize {
        comb.nodes[n]
            .adj
            .iter()
            .map(|&e| comb.edges[e].cardinality())
            .sum()
    };
    order.sort_by_key(|&n| {
        (
            std::cmp::Reverse(comb.nodes[n].adj.len()),
            std::cmp::Reverse(card_sum(n)),
            comb.nodes[n].node,
        )
    });

    let search_radius = cfg.max_station_dis * cfg.cell_size;
    for n in order {
        let lg_node = &graph.nodes[&comb.nodes[n].node];
        if !grid.topo.admissible(lg_node.pos) {
            return Err(LayoutError::Infeasible(format!(
                "node {} lies in the undefined region of the grid",
                lg_node.id
            )));
        }
        let cands = grid.candidates(lg_node.pos, search_radius);
        let Some(&centre) = cands.first() else {
            return Err(LayoutError::Infeasible(format!(
                "no open grid vertex within {search_radius} of node {}",
                lg_node.id
            )));
        };
        debug!("settled node {} on grid cell {:?}", lg_node.id, grid.nodes[centre].cell);
        grid.settle(n, centre);
    }
    Ok(())
}

/// Cyclic order of comb edges around each comb node, by the geographic
/// bearing of their first segment.
fn edge_orderings(graph: &LineGraph, comb: &OptGraph) -> AHashMap<usize, EdgeOrdering> {
    let mut orderings = AHashMap::new();
    for (n, opt_node) in comb.nodes.iter().enumerate() {
        let pairs: Vec<(usize, f64)> = opt_node
            .adj
            .iter()
            .map(|&e| (e, comb_edge_angle(graph, comb, e, n)))
            .collect();
        orderings.insert(n, EdgeOrdering::new(pairs));
    }
    orderings
}

fn comb_edge_angle(graph: &LineGraph, comb: &OptGraph, e: usize, at_node: usize) -> f64 {
    let oe = &comb.edges[e];
    let seg = if oe.from == at_node {
        oe.segments.first().unwrap()
    } else {
        oe.segments.last().unwrap()
    };
    let edge = graph.edge(seg.edge_idx).unwrap();
    let node_id = comb.nodes[at_node].node;
    let geom = &edge.geometry;
    let (dx, dy) = if edge.from == node_id {
        let p0 = geom.first().unwrap();
        let p1 = geom.get(1).unwrap_or(p0);
        (p1[0] - p0[0], p1[1] - p0[1])
    } else {
        let pl = geom.last().unwrap();
        let pp = geom.get(geom.len().saturating_sub(2)).unwrap_or(pl);
        (pp[0] - pl[0], pp[1] - pl[1])
    };
    let a = dy.atan2(dx);
    if a < 0.0 { a + 2.0 * std::f64::consts::PI } else { a }
}

/// Routes every comb edge in descending bundle cardinality order.
fn route_edges<T: GridTopology>(
    graph: &LineGraph,
    comb: &OptGraph,
    cfg: &LayoutConfig,
    grid: &mut GridGraph<T>,
    deadline: Instant,
) -> Result<AHashMap<usize, Vec<usize>>> {
    let orderings = edge_orderings(graph, comb);

    let mut edge_order: Vec<usize> = (0..comb.edges.len()).collect();
    edge_order.sort_by_key(|&e| (std::cmp::Reverse(comb.edges[e].cardinality()), e));

    let mut paths = AHashMap::new();

    for e in edge_order {
        if Instant::now() >= deadline {
            return Err(LayoutError::Timeout {
                stage: "schematization",
                budget_ms: cfg.time_budget_ms,
            });
        }

        let oe = &comb.edges[e];
        if oe.from == oe.to {
            // Degenerate loop; nothing to route on the grid.
            continue;
        }
        let (u, v) = (oe.from, oe.to);
        let cu = grid.settled_centre(u).expect("placed in place_nodes");
        let cv = grid.settled_centre(v).expect("placed in place_nodes");

        let u_pos = graph.nodes[&comb.nodes[u].node].pos;
        let v_pos = graph.nodes[&comb.nodes[v].node].pos;

        // Temporary per-route cost vectors at both endpoints.
        let add_u = combine(&[
            grid.spacing_penalty(cu, &orderings[&u], e),
            grid.topo_block_penalty(cu, &orderings[&u], e),
            grid.deviation_penalty(u_pos, v_pos),
        ]);
        let add_v = combine(&[
            grid.spacing_penalty(cv, &orderings[&v], e),
            grid.topo_block_penalty(cv, &orderings[&v], e),
            grid.deviation_penalty(v_pos, u_pos),
        ]);

        let inv_u = grid.add_cost_vector(cu, &add_u);
        let inv_v = grid.add_cost_vector(cv, &add_v);
        grid.open_node_sink(cu, 0.0);
        grid.open_node_sink(cv, 0.0);

        let route = grid.shortest_path(cu, cv);

        // The penalties guide only this route; undo them either way.
        grid.remove_cost_vector(cu, &inv_u);
        grid.remove_cost_vector(cv, &inv_v);

        match route {
            Some((path, cost)) => {
                debug!(
                    "routed comb edge {e} ({} lines) at cost {cost:.2}, {} vertices",
                    oe.cardinality(),
                    path.len()
                );
                grid.settle_path(&path, e);
                grid.close_node_sink(cu);
                grid.close_node_sink(cv);
                paths.insert(e, path);
            }
            None => {
                grid.close_node_sink(cu);
                grid.close_node_sink(cv);
                return Err(LayoutError::Infeasible(format!(
                    "no open grid path for edge between nodes {} and {}",
                    comb.nodes[u].node, comb.nodes[v].node
                )));
            }
        }
    }

    Ok(paths)
}

fn combine(costs: &[NodeCost]) -> NodeCost {
    let mut out = NodeCost::zero();
    for c in costs {
        for i in 0..PORT_COUNT {
            out.0[i] += c.0[i];
        }
    }
    out
}

/// Rewrites node positions and edge geometries from the routed grid.
/// Interior joints of a contracted chain are spread along the path.
fn write_back<T: GridTopology>(
    graph: &mut LineGraph,
    comb: &OptGraph,
    grid: &GridGraph<T>,
    paths: &AHashMap<usize, Vec<usize>>,
) -> Result<()> {
    for (n, opt_node) in comb.nodes.iter().enumerate() {
        let centre = grid.settled_centre(n).ok_or_else(|| {
            LayoutError::InvariantViolated(format!("comb node {n} was never settled"))
        })?;
        graph.nodes.get_mut(&opt_node.node).unwrap().pos = grid.nodes[centre].pos;
    }

    for (e, oe) in comb.edges.iter().enumerate() {
        let Some(path) = paths.get(&e) else { continue };
        // Collapse the vertex path (centre, ports, ..., centre) into the
        // polyline of distinct cell centres.
        let mut polyline: Vec<[f64; 2]> = Vec::new();
        for &node in path {
            let p = grid.nodes[node].pos;
            if polyline.last().is_none_or(|l| *l != p) {
                polyline.push(p);
            }
        }
        if polyline.len() < 2 {
            return Err(LayoutError::InvariantViolated(format!(
                "routed path of comb edge {e} collapsed to a point"
            )));
        }

        let segs = &oe.segments;
        let k = segs.len();
        for (i, seg) in segs.iter().enumerate() {
            let lo = i as f64 / k as f64;
            let hi = (i + 1) as f64 / k as f64;
            let mut piece = extract_sub_polyline(&polyline, lo, hi);
            if piece.len() < 2 {
                piece.push(*piece.last().unwrap());
            }
            if !seg.forward {
                piece.reverse();
            }
            let edge = graph.edge_mut(seg.edge_idx).unwrap();
            edge.geometry = piece;
        }

        // Interior chain joints move onto the path.
        for (i, seg) in segs.iter().enumerate().take(k - 1) {
            let frac = (i + 1) as f64 / k as f64;
            let pos = interpolate_along_polyline(&polyline, frac);
            let joint = {
                let edge = graph.edge(seg.edge_idx).unwrap();
                if seg.forward { edge.to } else { edge.from }
            };
            graph.nodes.get_mut(&joint).unwrap().pos = pos;
        }

        // Re-anchor each segment's endpoints exactly on its node
        // positions.
        for seg in segs {
            let (from, to) = {
                let edge = graph.edge(seg.edge_idx).unwrap();
                (edge.from, edge.to)
            };
            let from_pos = graph.nodes[&from].pos;
            let to_pos = graph.nodes[&to].pos;
            let edge = graph.edge_mut(seg.edge_idx).unwrap();
            *edge.geometry.first_mut().unwrap() = from_pos;
            *edge.geometry.last_mut().unwrap() = to_pos;
        }
    }

    Ok(())
}

// GeoJSON exchange codec. Every pipeline stage reads and writes this
// format: a FeatureCollection with a top-level `lines` member, Point
// features for nodes and LineString features for edges.

use super::{dist, Edge, Line, LineDir, LineGraph, LineOcc, Node, StationInfo, GEOM_TOL};
use crate::error::{LayoutError, Result};
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject, JsonValue, Value};
use log::debug;
use std::io::{Read, Write};

pub fn load<R: Read>(reader: R) -> Result<LineGraph> {
    let gj: GeoJson = serde_json::from_reader(reader)
        .map_err(|e| LayoutError::MalformedInput(format!("unparseable GeoJSON: {e}")))?;

    let fc = match gj {
        GeoJson::FeatureCollection(fc) => fc,
        _ => {
            return Err(LayoutError::MalformedInput(
                "expected a FeatureCollection".to_string(),
            ));
        }
    };

    let mut graph = LineGraph::new();

    // Top-level line registry.
    if let Some(members) = &fc.foreign_members {
        if let Some(JsonValue::Object(lines)) = members.get("lines") {
            for (id, spec) in lines {
                let label = spec
                    .get("label")
                    .and_then(|v| v.as_str())
                    .unwrap_or(id)
                    .to_string();
                let color = spec
                    .get("colour")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                graph.add_line(Line {
                    id: id.clone(),
                    label,
                    color,
                });
            }
        }
    }

    // Two passes: nodes first so edges can validate endpoints.
    let mut edge_features = Vec::new();
    for feature in fc.features {
        let Some(geometry) = &feature.geometry else {
            return Err(LayoutError::MalformedInput(
                "feature without geometry".to_string(),
            ));
        };
        match &geometry.value {
            Value::Point(coords) => parse_node(&feature, coords, &mut graph)?,
            Value::LineString(_) => edge_features.push(feature),
            _ => {
                return Err(LayoutError::MalformedInput(
                    "only Point and LineString features are supported".to_string(),
                ));
            }
        }
    }

    for feature in &edge_features {
        parse_edge(feature, &mut graph)?;
    }

    debug!(
        "loaded line graph: {} nodes, {} edges, {} lines",
        graph.nodes.len(),
        graph.edge_count(),
        graph.lines.len()
    );

    graph.check_invariants()?;
    Ok(graph)
}

fn prop_i64(props: Option<&JsonObject>, key: &str) -> Option<i64> {
    props?.get(key)?.as_i64()
}

fn parse_node(feature: &Feature, coords: &[f64], graph: &mut LineGraph) -> Result<()> {
    let id = prop_i64(feature.properties.as_ref(), "id")
        .ok_or_else(|| LayoutError::MalformedInput("node feature without id".to_string()))?;
    if coords.len() < 2 || !coords[0].is_finite() || !coords[1].is_finite() {
        return Err(LayoutError::MalformedInput(format!(
            "node {id} has invalid coordinates"
        )));
    }
    let mut node = Node::new(id, [coords[0], coords[1]]);

    if let Some(props) = &feature.properties {
        if let Some(JsonValue::Object(st)) = props.get("station") {
            let sid = st.get("id").and_then(|v| v.as_str()).unwrap_or_default();
            let name = st.get("name").and_then(|v| v.as_str()).unwrap_or_default();
            if name.is_empty() {
                return Err(LayoutError::MalformedInput(format!(
                    "station at node {id} has no name"
                )));
            }
            node.stations.push(StationInfo {
                id: sid.to_string(),
                name: name.to_string(),
            });
        }
        if let Some(JsonValue::Array(extra)) = props.get("stations") {
            for st in extra {
                let (Some(sid), Some(name)) = (
                    st.get("id").and_then(|v| v.as_str()),
                    st.get("name").and_then(|v| v.as_str()),
                ) else {
                    return Err(LayoutError::MalformedInput(format!(
                        "malformed stations entry at node {id}"
                    )));
                };
                let info = StationInfo {
                    id: sid.to_string(),
                    name: name.to_string(),
                };
                if node.stations.first() != Some(&info) {
                    node.stations.push(info);
                }
            }
        }
        if let Some(JsonValue::Array(excs)) = props.get("not_serving") {
            for exc in excs {
                let (Some(line), Some(from), Some(to)) = (
                    exc.get("line").and_then(|v| v.as_str()),
                    exc.get("from").and_then(|v| v.as_i64()),
                    exc.get("to").and_then(|v| v.as_i64()),
                ) else {
                    return Err(LayoutError::MalformedInput(format!(
                        "malformed not_serving entry at node {id}"
                    )));
                };
                node.conn_exceptions.push((line.to_string(), from, to));
            }
        }
    }

    graph.add_node(node);
    Ok(())
}

fn parse_edge(feature: &Feature, graph: &mut LineGraph) -> Result<()> {
    let props = feature.properties.as_ref();
    let id = prop_i64(props, "id").unwrap_or(-1);
    let from = prop_i64(props, "from")
        .ok_or_else(|| LayoutError::MalformedInput(format!("edge {id} without 'from'")))?;
    let to = prop_i64(props, "to")
        .ok_or_else(|| LayoutError::MalformedInput(format!("edge {id} without 'to'")))?;

    for (node, kind) in [(from, "from node"), (to, "to node")] {
        if !graph.nodes.contains_key(&node) {
            return Err(LayoutError::DanglingReference {
                edge: id,
                kind,
                id: node.to_string(),
            });
        }
    }

    let Some(Geometry {
        value: Value::LineString(coords),
        ..
    }) = &feature.geometry
    else {
        unreachable!("caller filtered to LineString features");
    };
    let mut geometry: Vec<[f64; 2]> = Vec::with_capacity(coords.len());
    for c in coords {
        if c.len() < 2 || !c[0].is_finite() || !c[1].is_finite() {
            return Err(LayoutError::MalformedInput(format!(
                "edge {id} has an invalid geometry position"
            )));
        }
        geometry.push([c[0], c[1]]);
    }
    if geometry.len() < 2 {
        return Err(LayoutError::MalformedInput(format!(
            "edge {id} geometry has fewer than two points"
        )));
    }

    // Endpoint anchoring.
    let d_from = dist(geometry[0], graph.nodes[&from].pos);
    let d_to = dist(*geometry.last().unwrap(), graph.nodes[&to].pos);
    if d_from > GEOM_TOL || d_to > GEOM_TOL {
        return Err(LayoutError::GeometryMismatch {
            edge: id,
            node: if d_from > GEOM_TOL { from } else { to },
            dist: d_from.max(d_to),
        });
    }

    let mut lines = Vec::new();
    if let Some(JsonValue::Array(specs)) = props.and_then(|p| p.get("lines")) {
        for spec in specs {
            let line_id = spec
                .get("id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    LayoutError::MalformedInput(format!("edge {id} bundle entry without line id"))
                })?
                .to_string();
            if !graph.lines.contains_key(&line_id) {
                return Err(LayoutError::DanglingReference {
                    edge: id,
                    kind: "line",
                    id: line_id,
                });
            }
            let dir = spec
                .get("direction")
                .and_then(|v| v.as_u64())
                .and_then(|c| LineDir::from_code(c as u8))
                .unwrap_or(LineDir::Both);
            let mut occ = LineOcc::new(line_id, dir);
            occ.order = spec
                .get("order")
                .and_then(|v| v.as_u64())
                .map(|o| o as u32);
            if let Some(JsonValue::Array(rels)) = spec.get("relatives") {
                let rels: Vec<String> = rels
                    .iter()
                    .filter_map(|r| r.as_str().map(str::to_string))
                    .collect();
                if !rels.is_empty() {
                    occ.relatives = rels;
                }
            }
            lines.push(occ);
        }
    }

    // Bundles carrying explicit orders are materialized in that order.
    if lines.iter().all(|l| l.order.is_some()) && !lines.is_empty() {
        lines.sort_by_key(|l| l.order.unwrap());
    }

    graph.add_edge(Edge {
        id,
        from,
        to,
        geometry,
        lines,
    });
    Ok(())
}

pub fn write<W: Write>(graph: &LineGraph, writer: W) -> Result<()> {
    let mut features = Vec::with_capacity(graph.nodes.len() + graph.edge_count());

    // Deterministic output: nodes by id, edges by arena order.
    let mut node_ids: Vec<i64> = graph.nodes.keys().copied().collect();
    node_ids.sort_unstable();

    for id in node_ids {
        let node = &graph.nodes[&id];
        let mut props = JsonObject::new();
        props.insert("id".to_string(), JsonValue::from(node.id));
        if let Some(st) = node.station() {
            props.insert(
                "station".to_string(),
                serde_json::json!({ "id": st.id, "name": st.name }),
            );
        }
        if node.stations.len() > 1 {
            let all: Vec<JsonValue> = node
                .stations
                .iter()
                .map(|st| serde_json::json!({ "id": st.id, "name": st.name }))
                .collect();
            props.insert("stations".to_string(), JsonValue::Array(all));
        }
        if !node.conn_exceptions.is_empty() {
            let excs: Vec<JsonValue> = node
                .conn_exceptions
                .iter()
                .map(|(line, from, to)| serde_json::json!({"line": line, "from": from, "to": to}))
                .collect();
            props.insert("not_serving".to_string(), JsonValue::Array(excs));
        }
        features.push(Feature {
            bbox: None,
            geometry: Some(Geometry::new(Value::Point(node.pos.to_vec()))),
            id: None,
            properties: Some(props),
            foreign_members: None,
        });
    }

    for (_, edge) in graph.live_edges() {
        let mut props = JsonObject::new();
        props.insert("id".to_string(), JsonValue::from(edge.id));
        props.insert("from".to_string(), JsonValue::from(edge.from));
        props.insert("to".to_string(), JsonValue::from(edge.to));
        let lines: Vec<JsonValue> = edge
            .lines
            .iter()
            .map(|occ| {
                let mut entry = JsonObject::new();
                entry.insert("id".to_string(), JsonValue::from(occ.line.clone()));
                entry.insert("direction".to_string(), JsonValue::from(occ.dir.code()));
                if let Some(order) = occ.order {
                    entry.insert("order".to_string(), JsonValue::from(order));
                }
                if occ.relatives.len() > 1 || occ.relatives[0] != occ.line {
                    entry.insert(
                        "relatives".to_string(),
                        JsonValue::Array(
                            occ.relatives
                                .iter()
                                .map(|r| JsonValue::from(r.clone()))
                                .collect(),
                        ),
                    );
                }
                JsonValue::Object(entry)
            })
            .collect();
        props.insert("lines".to_string(), JsonValue::Array(lines));

        let coords: Vec<Vec<f64>> = edge.geometry.iter().map(|p| p.to_vec()).collect();
        features.push(Feature {
            bbox: None,
            geometry: Some(Geometry::new(Value::LineString(coords))),
            id: None,
            properties: Some(props),
            foreign_members: None,
        });
    }

    let mut line_ids: Vec<&String> = graph.lines.keys().collect();
    line_ids.sort();
    let mut lines = JsonObject::new();
    for id in line_ids {
        let line = &graph.lines[id];
        let mut spec = JsonObject::new();
        spec.insert("label".to_string(), JsonValue::from(line.label.clone()));
        if let Some(c) = &line.color {
            spec.insert("colour".to_string(), JsonValue::from(c.clone()));
        }
        lines.insert(id.clone(), JsonValue::Object(spec));
    }
    let mut foreign = JsonObject::new();
    foreign.insert("lines".to_string(), JsonValue::Object(lines));

    let fc = FeatureCollection {
        bbox: None,
        features,
        foreign_members: Some(foreign),
    };

    serde_json::to_writer(writer, &GeoJson::FeatureCollection(fc))
        .map_err(|e| LayoutError::Io(std::io::Error::other(e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_graph() -> LineGraph {
        let mut g = LineGraph::new();
        for (id, x, y, station) in [
            (0i64, 0.0, 0.0, Some(("s0", "Alpha"))),
            (1, 500.0, 0.0, None),
            (2, 1000.0, 100.0, Some(("s2", "Beta"))),
        ] {
            let mut n = Node::new(id, [x, y]);
            n.stations = station
                .map(|(sid, name)| {
                    vec![StationInfo {
                        id: sid.to_string(),
                        name: name.to_string(),
                    }]
                })
                .unwrap_or_default();
            g.add_node(n);
        }
        for id in ["u1", "u2"] {
            g.add_line(Line {
                id: id.to_string(),
                label: id.to_uppercase(),
                color: Some("ff0000".to_string()),
            });
        }
        g.add_edge(Edge {
            id: 0,
            from: 0,
            to: 1,
            geometry: vec![[0.0, 0.0], [250.0, 10.0], [500.0, 0.0]],
            lines: vec![
                LineOcc::new("u1", LineDir::Both),
                LineOcc::new("u2", LineDir::Forward),
            ],
        });
        g.add_edge(Edge {
            id: 1,
            from: 1,
            to: 2,
            geometry: vec![[500.0, 0.0], [1000.0, 100.0]],
            lines: vec![LineOcc::new("u1", LineDir::Both)],
        });
        g
    }

    #[test]
    fn round_trip_preserves_graph() {
        let g = sample_graph();
        let mut buf = Vec::new();
        write(&g, &mut buf).unwrap();
        let loaded = load(buf.as_slice()).unwrap();
        assert!(g.semantically_eq(&loaded));
        assert_eq!(loaded.lines.len(), 2);
        assert_eq!(loaded.lines["u1"].color.as_deref(), Some("ff0000"));
    }

    #[test]
    fn round_trip_preserves_orders() {
        let mut g = sample_graph();
        for (i, occ) in g.edge_mut(0).unwrap().lines.iter_mut().enumerate() {
            occ.order = Some(i as u32);
        }
        g.edge_mut(1).unwrap().lines[0].order = Some(0);
        let mut buf = Vec::new();
        write(&g, &mut buf).unwrap();
        let loaded = load(buf.as_slice()).unwrap();
        assert!(g.semantically_eq(&loaded));
        let e0 = loaded.edge(0).unwrap();
        assert_eq!(e0.lines[0].order, Some(0));
        assert_eq!(e0.lines[1].order, Some(1));
    }

    #[test]
    fn dangling_line_reference_is_reported() {
        let g = sample_graph();
        let mut buf = Vec::new();
        write(&g, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap().replace("\"u2\":", "\"zz\":");
        match load(text.as_bytes()) {
            Err(LayoutError::DanglingReference { kind: "line", .. }) => {}
            other => panic!("expected dangling line, got {:?}", other.err()),
        }
    }

    #[test]
    fn empty_collection_loads_as_empty_graph() {
        let text = r#"{"type":"FeatureCollection","features":[],"lines":{}}"#;
        let g = load(text.as_bytes()).unwrap();
        assert_eq!(g.nodes.len(), 0);
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn garbage_is_malformed_input() {
        assert!(matches!(
            load(&b"not json at all"[..]),
            Err(LayoutError::MalformedInput(_))
        ));
    }
}

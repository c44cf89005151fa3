use crate::linegraph::Node;

/// Node-local penalty weights consumed by the ordering objective. Values
/// must be non-negative; higher-traffic nodes may return higher weights.
pub trait Scorer: Send + Sync {
    fn crossing_penalty_same(&self, node: &Node) -> u64;
    fn crossing_penalty_diff(&self, node: &Node) -> u64;
    fn splitting_penalty(&self, node: &Node) -> u64;
}

/// Default scorer: crossings and splittings under a station label weigh
/// three times as much as at interior joints.
pub struct DegreeScorer;

impl Scorer for DegreeScorer {
    fn crossing_penalty_same(&self, node: &Node) -> u64 {
        if node.is_station() { 12 } else { 4 }
    }

    fn crossing_penalty_diff(&self, node: &Node) -> u64 {
        if node.is_station() { 3 } else { 1 }
    }

    fn splitting_penalty(&self, node: &Node) -> u64 {
        if node.is_station() { 9 } else { 3 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linegraph::StationInfo;

    #[test]
    fn stations_weigh_more() {
        let scorer = DegreeScorer;
        let mut node = Node::new(0, [0.0, 0.0]);
        let interior = (
            scorer.crossing_penalty_same(&node),
            scorer.crossing_penalty_diff(&node),
            scorer.splitting_penalty(&node),
        );
        node.stations.push(StationInfo {
            id: "s".into(),
            name: "S".into(),
        });
        assert!(scorer.crossing_penalty_same(&node) > interior.0);
        assert!(scorer.crossing_penalty_diff(&node) > interior.1);
        assert!(scorer.splitting_penalty(&node) > interior.2);
    }
}

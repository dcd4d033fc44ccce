//! Topological leveling, ordering and auto-layout
//!
//! `level(n) = 0` for nodes without incoming connections, otherwise one more
//! than the deepest predecessor. Nodes are ordered by level, then by name,
//! so the order only changes when the structure does.
//!
//! Drafts may contain cycles. Nodes that cannot be leveled (on a cycle or
//! downstream of one) are placed together one level below the deepest
//! leveled node.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use crate::catalog::NodeCatalog;
use crate::config::LayoutConfig;
use crate::types::{NodeId, NodePosition, Pipeline};

/// Level of every node
pub fn levels(pipeline: &Pipeline) -> BTreeMap<NodeId, usize> {
    let mut in_degree: HashMap<&str, usize> =
        pipeline.nodes.keys().map(|id| (id.as_str(), 0)).collect();
    for conn in valid_connections(pipeline) {
        if let Some(deg) = in_degree.get_mut(conn.1) {
            *deg += 1;
        }
    }

    let mut level: BTreeMap<NodeId, usize> = BTreeMap::new();
    // BTreeMap iteration keeps the queue deterministic
    let mut queue: VecDeque<&str> = pipeline
        .nodes
        .keys()
        .map(String::as_str)
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();
    for id in &queue {
        level.insert(id.to_string(), 0);
    }

    while let Some(node_id) = queue.pop_front() {
        let current = level.get(node_id).copied().unwrap_or(0);
        for (from, to) in valid_connections(pipeline) {
            if from != node_id {
                continue;
            }
            let entry = level.entry(to.to_string()).or_insert(0);
            *entry = (*entry).max(current + 1);
            if let Some(deg) = in_degree.get_mut(to) {
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(to);
                }
            }
        }
    }

    let leveled: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .collect();
    let deepest = pipeline
        .nodes
        .keys()
        .filter(|id| leveled.contains(id.as_str()))
        .filter_map(|id| level.get(id))
        .max()
        .copied();
    let overflow = deepest.map_or(0, |d| d + 1);

    pipeline
        .nodes
        .keys()
        .map(|id| {
            let lvl = if leveled.contains(id.as_str()) {
                level.get(id).copied().unwrap_or(0)
            } else {
                overflow
            };
            (id.clone(), lvl)
        })
        .collect()
}

/// Connections whose endpoints both exist, as `(from, to)`
fn valid_connections(pipeline: &Pipeline) -> impl Iterator<Item = (&str, &str)> {
    pipeline
        .connections
        .iter()
        .filter(move |c| pipeline.contains_node(&c.from_node) && pipeline.contains_node(&c.to_node))
        .map(|c| (c.from_node.as_str(), c.to_node.as_str()))
}

/// Node names sorted by level, then name
pub fn topo_order(pipeline: &Pipeline) -> Vec<NodeId> {
    let levels = levels(pipeline);
    let mut order: Vec<(usize, NodeId)> = levels.into_iter().map(|(id, lvl)| (lvl, id)).collect();
    order.sort();
    order.into_iter().map(|(_, id)| id).collect()
}

/// Nodes on a cycle or on a path between cycles
///
/// Empty for a DAG.
pub fn cycle_members(pipeline: &Pipeline) -> BTreeSet<NodeId> {
    let mut remaining: BTreeSet<&str> = pipeline.nodes.keys().map(String::as_str).collect();
    let edges: Vec<(&str, &str)> = valid_connections(pipeline).collect();

    // Peel sources and sinks until only cyclic structure is left.
    loop {
        let peelable: Vec<&str> = remaining
            .iter()
            .copied()
            .filter(|id| {
                let has_in = edges
                    .iter()
                    .any(|(from, to)| to == id && remaining.contains(from));
                let has_out = edges
                    .iter()
                    .any(|(from, to)| from == id && remaining.contains(to));
                !has_in || !has_out
            })
            .collect();
        if peelable.is_empty() {
            break;
        }
        for id in peelable {
            remaining.remove(id);
        }
    }

    remaining.into_iter().map(str::to_string).collect()
}

/// Cycle members once connections touching bidirectional kinds are ignored
///
/// A bidirectional node (e.g. a network peer) feeds the graph and is fed by
/// it, so a loop through it is not a dependency cycle.
pub fn directed_cycle_members(pipeline: &Pipeline, catalog: &NodeCatalog) -> BTreeSet<NodeId> {
    let bidirectional: BTreeSet<&str> = pipeline
        .nodes
        .iter()
        .filter(|(_, node)| catalog.get(&node.kind).is_some_and(|d| d.bidirectional))
        .map(|(id, _)| id.as_str())
        .collect();
    if bidirectional.is_empty() {
        return cycle_members(pipeline);
    }

    let mut directed = pipeline.clone();
    directed.connections.retain(|c| {
        !bidirectional.contains(c.from_node.as_str()) && !bidirectional.contains(c.to_node.as_str())
    });
    cycle_members(&directed)
}

/// Assign positions: one horizontal band per level, bands stacked downward
///
/// Sizes come from `measured` when present; otherwise the default width and
/// the kind's fallback height from `config`. Bands are centered on the
/// widest one.
pub fn auto_layout(
    pipeline: &Pipeline,
    measured: &HashMap<NodeId, (f64, f64)>,
    config: &LayoutConfig,
) -> BTreeMap<NodeId, NodePosition> {
    let mut bands: BTreeMap<usize, Vec<NodeId>> = BTreeMap::new();
    for (id, lvl) in levels(pipeline) {
        bands.entry(lvl).or_default().push(id);
    }

    let size_of = |id: &str| -> (f64, f64) {
        if let Some(size) = measured.get(id) {
            return *size;
        }
        let height = pipeline
            .node(id)
            .map(|n| config.fallback_height(&n.kind))
            .unwrap_or(config.default_node_height);
        (config.default_node_width, height)
    };

    let band_width = |ids: &[NodeId]| -> f64 {
        let widths: f64 = ids.iter().map(|id| size_of(id.as_str()).0).sum();
        widths + config.horizontal_gap * ids.len().saturating_sub(1) as f64
    };
    let widest = bands
        .values()
        .map(|ids| band_width(ids.as_slice()))
        .fold(0.0_f64, f64::max);

    let mut positions = BTreeMap::new();
    let mut y = 0.0;
    for ids in bands.values() {
        let mut x = (widest - band_width(ids.as_slice())) / 2.0;
        let mut band_height = 0.0_f64;
        for id in ids {
            let (w, h) = size_of(id.as_str());
            positions.insert(id.clone(), NodePosition::new(x, y));
            x += w + config.horizontal_gap;
            band_height = band_height.max(h);
        }
        y += band_height + config.vertical_gap;
    }
    positions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Connection, Node};

    fn pipeline(nodes: &[&str], conns: &[(&str, &str)]) -> Pipeline {
        let mut p = Pipeline::new();
        for name in nodes {
            p.nodes.insert(name.to_string(), Node::new("core::passthrough"));
        }
        for (a, b) in conns {
            p.connections.push(Connection::new(*a, "out", *b, "in"));
        }
        p
    }

    #[test]
    fn test_longest_path_levels() {
        let p = pipeline(
            &["src", "a", "b", "mix"],
            &[("src", "a"), ("a", "b"), ("src", "mix"), ("b", "mix")],
        );
        let lv = levels(&p);
        assert_eq!(lv["src"], 0);
        assert_eq!(lv["a"], 1);
        assert_eq!(lv["b"], 2);
        assert_eq!(lv["mix"], 3);

        for conn in &p.connections {
            assert!(lv[&conn.to_node] > lv[&conn.from_node]);
        }
    }

    #[test]
    fn test_order_is_level_then_name() {
        let p = pipeline(&["z", "y", "b", "a"], &[("z", "b"), ("y", "a")]);
        assert_eq!(topo_order(&p), vec!["y", "z", "a", "b"]);
    }

    #[test]
    fn test_cycles_are_placed_after_dag() {
        let p = pipeline(
            &["src", "a", "b", "tail"],
            &[("src", "a"), ("a", "b"), ("b", "a"), ("b", "tail")],
        );
        let lv = levels(&p);
        assert_eq!(lv["src"], 0);
        assert_eq!(lv["a"], 1);
        assert_eq!(lv["b"], 1);
        assert_eq!(lv["tail"], 1);

        let members = cycle_members(&p);
        assert_eq!(members.into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_dag_has_no_cycle_members() {
        let p = pipeline(&["a", "b", "c"], &[("a", "b"), ("b", "c"), ("a", "c")]);
        assert!(cycle_members(&p).is_empty());
    }

    #[test]
    fn test_auto_layout_bands() {
        let p = pipeline(&["src", "a", "b"], &[("src", "a"), ("src", "b")]);
        let mut measured = HashMap::new();
        measured.insert("src".to_string(), (100.0, 50.0));
        let config = LayoutConfig::default();
        let pos = auto_layout(&p, &measured, &config);

        assert_eq!(pos["src"].y, 0.0);
        assert_eq!(pos["a"].y, 50.0 + config.vertical_gap);
        assert_eq!(pos["a"].y, pos["b"].y);
        assert_eq!(pos["a"].x, 0.0);
        assert_eq!(pos["b"].x, config.default_node_width + config.horizontal_gap);
        // src band is narrower, so it is centered over the second band
        let widest = 2.0 * config.default_node_width + config.horizontal_gap;
        assert_eq!(pos["src"].x, (widest - 100.0) / 2.0);
    }
}

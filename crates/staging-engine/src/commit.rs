//! Commit planning
//!
//! Turns a staged pipeline and the last-known live pipeline into the
//! batch of operations that moves the runtime from one to the other. The
//! batch is submitted as one atomic unit; nothing is applied locally.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::catalog::NodeCatalog;
use crate::params::{merge_params, params_equal};
use crate::topology;
use crate::types::{Connection, ConnectionMode, Pipeline};

/// One runtime mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BatchOperation {
    AddNode {
        node_id: String,
        kind: String,
        params: serde_json::Value,
    },
    RemoveNode {
        node_id: String,
    },
    Connect {
        from_node: String,
        from_pin: String,
        to_node: String,
        to_pin: String,
        #[serde(default, skip_serializing_if = "ConnectionMode::is_default")]
        mode: ConnectionMode,
    },
    Disconnect {
        from_node: String,
        from_pin: String,
        to_node: String,
        to_pin: String,
    },
    /// Replace the params of a node present on both sides
    UpdateParams {
        node_id: String,
        params: serde_json::Value,
    },
}

impl BatchOperation {
    fn connect(conn: &Connection) -> Self {
        Self::Connect {
            from_node: conn.from_node.clone(),
            from_pin: conn.from_pin.clone(),
            to_node: conn.to_node.clone(),
            to_pin: conn.to_pin.clone(),
            mode: conn.mode,
        }
    }

    fn disconnect(conn: &Connection) -> Self {
        Self::Disconnect {
            from_node: conn.from_node.clone(),
            from_pin: conn.from_pin.clone(),
            to_node: conn.to_node.clone(),
            to_pin: conn.to_pin.clone(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::AddNode { .. } => "add_node",
            Self::RemoveNode { .. } => "remove_node",
            Self::Connect { .. } => "connect",
            Self::Disconnect { .. } => "disconnect",
            Self::UpdateParams { .. } => "update_params",
        }
    }
}

/// Runtime answer to a batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub success: bool,
    /// Per-operation messages when the runtime provides them
    #[serde(default)]
    pub errors: Vec<String>,
}

impl BatchResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            errors: Vec::new(),
        }
    }

    pub fn failed(errors: Vec<String>) -> Self {
        Self {
            success: false,
            errors,
        }
    }
}

/// Plan the batch that turns `live` into `staged`
///
/// Order: `add_node`, `remove_node`, `connect`, `disconnect`, then
/// `update_params`. New nodes follow the staged topological order; the rest
/// follow name or connection order. An empty plan means nothing to send.
///
/// A node id present on both sides under different kinds is a replacement:
/// its `remove_node` leads the batch, ahead of the adds, and every staged
/// connection touching it is connected again.
///
/// New fan-in nodes get their input count injected into params, merged
/// over any explicit values.
pub fn plan(staged: &Pipeline, live: &Pipeline, catalog: &NodeCatalog) -> Vec<BatchOperation> {
    let replaced: BTreeSet<&str> = staged
        .nodes
        .iter()
        .filter(|(id, node)| live.node(id).is_some_and(|current| current.kind != node.kind))
        .map(|(id, _)| id.as_str())
        .collect();

    let mut adds = Vec::new();
    for node_id in topology::topo_order(staged) {
        if live.contains_node(&node_id) && !replaced.contains(node_id.as_str()) {
            continue;
        }
        if let Some(node) = staged.node(&node_id) {
            adds.push((node_id, node.kind.clone(), node.params.clone()));
        }
    }

    let removes: Vec<BatchOperation> = live
        .nodes
        .keys()
        .filter(|id| !staged.contains_node(id))
        .map(|id| BatchOperation::RemoveNode {
            node_id: id.clone(),
        })
        .collect();

    let live_keys = live.connection_keys();
    let staged_keys: BTreeSet<_> = staged.connection_keys();
    let touches_replaced = |c: &Connection| {
        replaced.contains(c.from_node.as_str()) || replaced.contains(c.to_node.as_str())
    };
    let new_connections: Vec<&Connection> = staged
        .connections
        .iter()
        .filter(|c| !live_keys.contains(&c.key()) || touches_replaced(*c))
        .collect();
    let disconnects: Vec<BatchOperation> = live
        .connections
        .iter()
        .filter(|c| !staged_keys.contains(&c.key()) && !touches_replaced(*c))
        .map(BatchOperation::disconnect)
        .collect();

    let mut fan_in_counts: HashMap<&str, usize> = HashMap::new();
    for conn in &new_connections {
        *fan_in_counts.entry(conn.to_node.as_str()).or_insert(0) += 1;
    }

    let mut ops: Vec<BatchOperation> = replaced
        .iter()
        .map(|id| BatchOperation::RemoveNode {
            node_id: id.to_string(),
        })
        .collect();
    ops.extend(adds.into_iter().map(|(node_id, kind, mut params)| {
        let fan_in = catalog.get(&kind).and_then(|d| d.fan_in.as_ref());
        let count = fan_in_counts.get(node_id.as_str()).copied().unwrap_or(0);
        if let (Some(fan_in), true) = (fan_in, count > 0) {
            let mut injected = serde_json::Map::new();
            injected.insert(fan_in.count_param.clone(), count.into());
            params = merge_params(&params, &serde_json::Value::Object(injected));
            log::debug!("Injected {}={} into new node '{}'", fan_in.count_param, count, node_id);
        }
        BatchOperation::AddNode {
            node_id,
            kind,
            params,
        }
    }));

    ops.extend(removes);
    ops.extend(new_connections.into_iter().map(BatchOperation::connect));
    ops.extend(disconnects);

    for (id, node) in &staged.nodes {
        if replaced.contains(id.as_str()) {
            continue;
        }
        if let Some(current) = live.node(id) {
            if !params_equal(&current.params, &node.params) {
                ops.push(BatchOperation::UpdateParams {
                    node_id: id.clone(),
                    params: node.params.clone(),
                });
            }
        }
    }

    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FanIn, NodeDefinition};
    use crate::types::Node;
    use serde_json::json;

    fn catalog() -> NodeCatalog {
        let mut catalog = NodeCatalog::new();
        let mut mixer = NodeDefinition::new("audio::mixer");
        mixer.fan_in = Some(FanIn {
            count_param: "num_inputs".into(),
        });
        catalog.register(mixer);
        catalog.register(NodeDefinition::new("audio::gain"));
        catalog
    }

    fn live() -> Pipeline {
        let mut p = Pipeline::new();
        p.nodes.insert("a".into(), Node::new("audio::gain"));
        p.nodes.insert("b".into(), Node::new("audio::gain"));
        p.connections.push(Connection::new("a", "out", "b", "in"));
        p
    }

    #[test]
    fn test_identical_pipelines_plan_nothing() {
        assert!(plan(&live(), &live(), &catalog()).is_empty());
    }

    #[test]
    fn test_operation_order() {
        let mut staged = live();
        staged.nodes.remove("b");
        staged.connections.clear();
        staged.nodes.insert("c".into(), Node::new("audio::gain"));
        staged.connections.push(Connection::new("a", "out", "c", "in"));
        staged
            .nodes
            .get_mut("a")
            .unwrap()
            .params = json!({"gain": 2.0});

        let ops = plan(&staged, &live(), &catalog());
        let labels: Vec<&str> = ops.iter().map(BatchOperation::label).collect();
        assert_eq!(
            labels,
            vec!["add_node", "remove_node", "connect", "disconnect", "update_params"]
        );
    }

    #[test]
    fn test_fan_in_injection_merges_params() {
        let staged_base = live();
        let mut staged = staged_base.clone();
        staged.nodes.insert(
            "m".into(),
            Node::new("audio::mixer").with_params(json!({"gain": 0.5, "num_inputs": 1})),
        );
        for (i, src) in ["a", "b", "a"].iter().enumerate() {
            let pin = if i == 2 { "aux" } else { "out" };
            staged
                .connections
                .push(Connection::new(*src, pin, "m", format!("in_{}", i)));
        }

        let ops = plan(&staged, &staged_base, &catalog());
        assert_eq!(ops.len(), 4);
        match &ops[0] {
            BatchOperation::AddNode { node_id, params, .. } => {
                assert_eq!(node_id, "m");
                assert_eq!(params, &json!({"gain": 0.5, "num_inputs": 3}));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(ops[1..]
            .iter()
            .all(|op| matches!(op, BatchOperation::Connect { to_node, .. } if to_node == "m")));
    }

    #[test]
    fn test_integer_and_float_params_plan_nothing() {
        let mut current = live();
        current.nodes.get_mut("a").unwrap().params = json!({"gain": 1.0});
        let mut staged = live();
        staged.nodes.get_mut("a").unwrap().params = json!({"gain": 1});
        assert!(plan(&staged, &current, &catalog()).is_empty());
    }

    #[test]
    fn test_kind_change_replaces_node() {
        let mut staged = live();
        staged.nodes.insert(
            "a".into(),
            Node::new("audio::mixer").with_params(json!({"gain": 2.0})),
        );

        let ops = plan(&staged, &live(), &catalog());
        assert_eq!(
            ops,
            vec![
                BatchOperation::RemoveNode {
                    node_id: "a".into()
                },
                BatchOperation::AddNode {
                    node_id: "a".into(),
                    kind: "audio::mixer".into(),
                    params: json!({"gain": 2.0}),
                },
                BatchOperation::connect(&Connection::new("a", "out", "b", "in")),
            ]
        );
    }

    #[test]
    fn test_wire_format() {
        let op = BatchOperation::connect(
            &Connection::new("a", "out", "b", "in").with_mode(ConnectionMode::BestEffort),
        );
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["action"], "connect");
        assert_eq!(json["mode"], "best_effort");

        let op = BatchOperation::connect(&Connection::new("a", "out", "b", "in"));
        assert!(serde_json::to_value(&op).unwrap().get("mode").is_none());
    }
}

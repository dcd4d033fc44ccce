//! Declarative YAML form of a pipeline
//!
//! Export walks nodes in topological order so that edits which do not
//! touch structure (moving a node, tuning a param) never reorder the text.
//! Each node lists what it `needs`: a single name, a list of names, or
//! objects when a connection uses non-default pins or mode.
//!
//! Import accepts two shapes:
//!
//! ```yaml
//! nodes:
//!   reader:
//!     kind: core::file_reader
//!   gain:
//!     kind: audio::gain
//!     needs: reader
//! ```
//!
//! ```yaml
//! steps:
//!   - kind: core::file_reader
//!   - kind: audio::gain
//! ```
//!
//! A single dependency connects `out -> in`; several connect
//! `out -> in_<i>` in listed order.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_yaml::{Mapping, Value as YamlValue};

use crate::catalog::NodeCatalog;
use crate::constants::pins;
use crate::error::{Result, StagingError};
use crate::topology;
use crate::types::{Connection, ConnectionMode, Node, Pipeline};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Document {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    nodes: Option<BTreeMap<String, NodeSpec>>,
    #[serde(default)]
    steps: Option<Vec<StepSpec>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NodeSpec {
    kind: String,
    #[serde(default)]
    params: Option<serde_json::Value>,
    #[serde(default)]
    needs: Option<Needs>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StepSpec {
    kind: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    params: Option<serde_json::Value>,
}

/// Untagged variants are tried in order. A list goes first: a detailed
/// need would also accept a list of names as its fields.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Needs {
    Many(Vec<NeedRef>),
    One(NeedRef),
}

impl Needs {
    fn into_vec(self) -> Vec<NeedRef> {
        match self {
            Needs::One(need) => vec![need],
            Needs::Many(needs) => needs,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NeedRef {
    Name(String),
    Detailed(NeedSpec),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NeedSpec {
    node: String,
    #[serde(default)]
    from_pin: Option<String>,
    #[serde(default)]
    to_pin: Option<String>,
    #[serde(default)]
    mode: ConnectionMode,
}

fn default_to_pin(index: usize, count: usize) -> String {
    if count == 1 {
        pins::IN.to_string()
    } else {
        format!("{}_{}", pins::IN, index)
    }
}

/// Parse a YAML pipeline
///
/// With a catalog, cycles through bidirectional kinds are allowed; every
/// other cycle, self reference or dangling `needs` is a parse error. Kinds
/// are not checked here; validation reports unknown kinds.
pub fn parse_yaml(text: &str, catalog: Option<&NodeCatalog>) -> Result<Pipeline> {
    let doc: Document = serde_yaml::from_str(text)
        .map_err(|e| StagingError::parse(format!("invalid pipeline YAML: {}", e)))?;

    let mut pipeline = match (doc.nodes, doc.steps) {
        (Some(_), Some(_)) => {
            return Err(StagingError::parse(
                "a pipeline has either `nodes` or `steps`, not both",
            ))
        }
        (None, None) => return Err(StagingError::parse("expected `nodes` or `steps`")),
        (Some(nodes), None) => from_nodes(nodes)?,
        (None, Some(steps)) => from_steps(steps)?,
    };
    pipeline.name = doc.name;
    pipeline.description = doc.description;

    reject_cycles(&pipeline, catalog)?;
    Ok(pipeline)
}

fn from_nodes(specs: BTreeMap<String, NodeSpec>) -> Result<Pipeline> {
    let mut pipeline = Pipeline::new();
    let mut needs_by_node = Vec::new();

    for (id, spec) in specs {
        let params = spec.params.unwrap_or_else(|| serde_json::json!({}));
        pipeline
            .nodes
            .insert(id.clone(), Node::new(spec.kind).with_params(params));
        if let Some(needs) = spec.needs {
            needs_by_node.push((id, needs.into_vec()));
        }
    }

    for (id, needs) in needs_by_node {
        let count = needs.len();
        for (index, need) in needs.into_iter().enumerate() {
            let (from, from_pin, to_pin, mode) = match need {
                NeedRef::Name(node) => (node, None, None, ConnectionMode::default()),
                NeedRef::Detailed(spec) => (spec.node, spec.from_pin, spec.to_pin, spec.mode),
            };
            if from == id {
                return Err(StagingError::parse(format!("node '{}' needs itself", id)));
            }
            if !pipeline.contains_node(&from) {
                return Err(StagingError::parse(format!(
                    "node '{}' needs unknown node '{}'",
                    id, from
                )));
            }

            let conn = Connection::new(
                from,
                from_pin.unwrap_or_else(|| pins::OUT.to_string()),
                id.clone(),
                to_pin.unwrap_or_else(|| default_to_pin(index, count)),
            )
            .with_mode(mode);
            if pipeline.contains_connection(&conn.key()) {
                return Err(StagingError::parse(format!("duplicate connection {}", conn)));
            }
            pipeline.connections.push(conn);
        }
    }

    Ok(pipeline)
}

fn from_steps(steps: Vec<StepSpec>) -> Result<Pipeline> {
    if steps.is_empty() {
        return Err(StagingError::parse("`steps` is empty"));
    }

    let mut pipeline = Pipeline::new();
    let mut previous: Option<String> = None;
    for (index, step) in steps.into_iter().enumerate() {
        let id = step.name.unwrap_or_else(|| format!("step_{}", index));
        if pipeline.contains_node(&id) {
            return Err(StagingError::parse(format!("duplicate step name '{}'", id)));
        }
        let params = step.params.unwrap_or_else(|| serde_json::json!({}));
        pipeline
            .nodes
            .insert(id.clone(), Node::new(step.kind).with_params(params));

        if let Some(prev) = previous.take() {
            pipeline
                .connections
                .push(Connection::new(prev, pins::OUT, id.clone(), pins::IN));
        }
        previous = Some(id);
    }
    Ok(pipeline)
}

fn reject_cycles(pipeline: &Pipeline, catalog: Option<&NodeCatalog>) -> Result<()> {
    let members = match catalog {
        Some(catalog) => topology::directed_cycle_members(pipeline, catalog),
        None => topology::cycle_members(pipeline),
    };
    if members.is_empty() {
        Ok(())
    } else {
        let names: Vec<&str> = members.iter().map(String::as_str).collect();
        Err(StagingError::parse(format!(
            "circular dependency between: {}",
            names.join(", ")
        )))
    }
}

/// Render `pipeline` as YAML in topological order
pub fn export_yaml(pipeline: &Pipeline) -> Result<String> {
    let mut doc = Mapping::new();
    if let Some(name) = &pipeline.name {
        doc.insert("name".into(), name.as_str().into());
    }
    if let Some(description) = &pipeline.description {
        doc.insert("description".into(), description.as_str().into());
    }

    let mut nodes = Mapping::new();
    for id in topology::topo_order(pipeline) {
        let Some(node) = pipeline.node(&id) else {
            continue;
        };
        let mut entry = Mapping::new();
        entry.insert("kind".into(), node.kind.as_str().into());

        let has_params = match &node.params {
            serde_json::Value::Null => false,
            serde_json::Value::Object(map) => !map.is_empty(),
            _ => true,
        };
        if has_params {
            entry.insert("params".into(), serde_yaml::to_value(&node.params)?);
        }

        let incoming: Vec<&Connection> = pipeline.incoming(&id).collect();
        let count = incoming.len();
        let needs: Vec<YamlValue> = incoming
            .iter()
            .enumerate()
            .map(|(index, conn)| need_value(conn, index, count))
            .collect();
        match needs.len() {
            0 => {}
            1 => {
                entry.insert("needs".into(), needs.into_iter().next().unwrap_or_default());
            }
            _ => {
                entry.insert("needs".into(), YamlValue::Sequence(needs));
            }
        }

        nodes.insert(id.as_str().into(), YamlValue::Mapping(entry));
    }
    doc.insert("nodes".into(), YamlValue::Mapping(nodes));

    Ok(serde_yaml::to_string(&YamlValue::Mapping(doc))?)
}

fn need_value(conn: &Connection, index: usize, count: usize) -> YamlValue {
    let default_pins = conn.from_pin == pins::OUT && conn.to_pin == default_to_pin(index, count);
    if default_pins && conn.mode.is_default() {
        return conn.from_node.as_str().into();
    }

    let mut need = Mapping::new();
    need.insert("node".into(), conn.from_node.as_str().into());
    if !default_pins {
        need.insert("from_pin".into(), conn.from_pin.as_str().into());
        need.insert("to_pin".into(), conn.to_pin.as_str().into());
    }
    if !conn.mode.is_default() {
        need.insert("mode".into(), "best_effort".into());
    }
    YamlValue::Mapping(need)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::NodeDefinition;
    use crate::types::NodePosition;
    use serde_json::json;

    const DAG: &str = r#"
name: two-mics
nodes:
  mic_a:
    kind: core::file_reader
    params: { path: a.ogg }
  mic_b:
    kind: core::file_reader
  mix:
    kind: audio::mixer
    needs: [mic_a, mic_b]
  out:
    kind: core::sink
    needs:
      node: mix
      mode: best_effort
"#;

    #[test]
    fn test_parse_dag_form() {
        let p = parse_yaml(DAG, None).unwrap();
        assert_eq!(p.name.as_deref(), Some("two-mics"));
        assert_eq!(p.nodes.len(), 4);
        assert_eq!(p.nodes["mic_a"].params, json!({"path": "a.ogg"}));
        assert!(p.contains_connection("mic_a.out->mix.in_0"));
        assert!(p.contains_connection("mic_b.out->mix.in_1"));
        let out = p.connection("mix.out->out.in").unwrap();
        assert_eq!(out.mode, ConnectionMode::BestEffort);
    }

    #[test]
    fn test_needs_lists_connect_every_entry() {
        let text = "nodes:\n  a: { kind: x }\n  b: { kind: x }\n  c: { kind: x }\n  m:\n    kind: mix\n    needs: [a, b, c]\n";
        let p = parse_yaml(text, None).unwrap();
        assert_eq!(p.connections.len(), 3);
        for (index, from) in ["a", "b", "c"].iter().enumerate() {
            let key = format!("{}.out->m.in_{}", from, index);
            assert!(p.contains_connection(&key), "missing {}", key);
        }

        let text = "nodes:\n  a: { kind: x }\n  b: { kind: x }\n  m:\n    kind: mix\n    needs:\n      - a\n      - { node: b, to_pin: aux }\n";
        let p = parse_yaml(text, None).unwrap();
        assert!(p.contains_connection("a.out->m.in_0"));
        assert!(p.contains_connection("b.out->m.aux"));
    }

    #[test]
    fn test_parse_steps_form() {
        let text = "steps:\n  - kind: core::file_reader\n  - kind: audio::gain\n    params: { gain: 2.0 }\n  - kind: core::sink\n    name: speaker\n";
        let p = parse_yaml(text, None).unwrap();
        assert_eq!(p.connections.len(), 2);
        assert!(p.contains_connection("step_0.out->step_1.in"));
        assert!(p.contains_connection("step_1.out->speaker.in"));
    }

    #[test]
    fn test_parse_errors_are_descriptive() {
        let err = parse_yaml("nodes:\n  a: { kind: x, needs: ghost }\n", None).unwrap_err();
        assert!(err.to_string().contains("unknown node 'ghost'"));

        let err = parse_yaml("nodes:\n  a: { kind: x, needs: a }\n", None).unwrap_err();
        assert!(err.to_string().contains("needs itself"));

        let err = parse_yaml("nodes: [", None).unwrap_err();
        assert!(matches!(err, StagingError::Parse(_)));

        let err = parse_yaml("name: empty\n", None).unwrap_err();
        assert!(err.to_string().contains("expected `nodes` or `steps`"));
    }

    #[test]
    fn test_cycles_rejected_unless_bidirectional() {
        let text = "nodes:\n  a: { kind: peer, needs: b }\n  b: { kind: gain, needs: a }\n";
        let err = parse_yaml(text, None).unwrap_err();
        assert!(err.to_string().contains("circular dependency between: a, b"));

        let mut catalog = NodeCatalog::new();
        let mut peer = NodeDefinition::new("peer");
        peer.bidirectional = true;
        catalog.register(peer);
        assert!(parse_yaml(text, Some(&catalog)).is_ok());
    }

    #[test]
    fn test_export_is_topological_and_reparses() {
        let p = parse_yaml(DAG, None).unwrap();
        let text = export_yaml(&p).unwrap();

        let order: Vec<usize> = ["mic_a:", "mic_b:", "mix:", "out:"]
            .iter()
            .map(|k| text.find(k).unwrap())
            .collect();
        assert!(order.windows(2).all(|w| w[0] < w[1]));
        assert!(text.contains("- mic_a"));

        let reparsed = parse_yaml(&text, None).unwrap();
        assert_eq!(reparsed, p);
    }

    #[test]
    fn test_export_keeps_custom_pins() {
        let mut p = Pipeline::new();
        p.nodes.insert("a".into(), Node::new("x"));
        p.nodes.insert("b".into(), Node::new("x"));
        p.connections.push(Connection::new("a", "aux", "b", "sidechain"));

        let text = export_yaml(&p).unwrap();
        assert!(text.contains("from_pin: aux"));
        assert_eq!(parse_yaml(&text, None).unwrap(), p);
    }

    #[test]
    fn test_positions_do_not_affect_export() {
        let p = parse_yaml(DAG, None).unwrap();
        let mut overlay = crate::overlay::StagingOverlay::enter("s1", p.clone());
        let before = export_yaml(overlay.staged()).unwrap();
        overlay.set_position("mix", NodePosition::new(500.0, 10.0));
        assert_eq!(export_yaml(overlay.staged()).unwrap(), before);
    }
}

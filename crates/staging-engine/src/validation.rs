//! Pipeline validation
//!
//! Staging is permissive: edits that leave the draft cyclic or otherwise
//! inconsistent are accepted and reported here as values. Only findings
//! with `Severity::Error` block a commit.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::catalog::NodeCatalog;
use crate::compat::{accepts, ConnectionRejection, TypeResolver};
use crate::packet::PacketTypeMeta;
use crate::pins::PinCardinality;
use crate::topology;
use crate::types::{ConnectionKey, NodeId, Pipeline};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Blocks commit
    Error,
    /// Informational only
    Warning,
}

/// Class of a validation finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    Cycle,
    DanglingPin,
    IncompatibleTypes,
    UnresolvedPassthrough,
    DuplicateInput,
    UnknownNode,
    UnknownKind,
    OrphanedNode,
}

/// Validation finding with location context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub severity: Severity,
    pub kind: ValidationKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<ConnectionKey>,
}

impl ValidationError {
    fn error(kind: ValidationKind, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            kind,
            message: message.into(),
            node_id: None,
            connection_id: None,
        }
    }

    fn warning(kind: ValidationKind, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(kind, message)
        }
    }

    fn on_node(mut self, node_id: &str) -> Self {
        self.node_id = Some(node_id.to_string());
        self
    }

    fn on_connection(mut self, key: ConnectionKey) -> Self {
        self.connection_id = Some(key);
        self
    }

    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Whether any finding blocks a commit
pub fn has_blocking_errors(errors: &[ValidationError]) -> bool {
    errors.iter().any(ValidationError::is_blocking)
}

/// Validate a pipeline against a catalog
///
/// Returns all findings, not just the first.
pub fn validate_pipeline(
    pipeline: &Pipeline,
    catalog: &NodeCatalog,
    registry: &[PacketTypeMeta],
) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    validate_node_kinds(pipeline, catalog, &mut errors);
    validate_connections(pipeline, catalog, registry, &mut errors);
    detect_cycles(pipeline, catalog, &mut errors);
    detect_orphans(pipeline, &mut errors);

    errors
}

fn validate_node_kinds(pipeline: &Pipeline, catalog: &NodeCatalog, errors: &mut Vec<ValidationError>) {
    for (id, node) in &pipeline.nodes {
        if !catalog.has_kind(&node.kind) {
            errors.push(
                ValidationError::error(
                    ValidationKind::UnknownKind,
                    format!("Unknown node kind '{}' for node '{}'", node.kind, id),
                )
                .on_node(id),
            );
        }
    }
}

fn validate_connections(
    pipeline: &Pipeline,
    catalog: &NodeCatalog,
    registry: &[PacketTypeMeta],
    errors: &mut Vec<ValidationError>,
) {
    let mut resolver = TypeResolver::new(pipeline, catalog);
    let mut reported_passthrough: BTreeSet<String> = BTreeSet::new();
    let mut inputs_used: BTreeMap<(&str, &str), usize> = BTreeMap::new();
    let mut outputs_used: BTreeMap<(&str, &str), usize> = BTreeMap::new();

    for conn in &pipeline.connections {
        let key = conn.key();

        let (Some(from), Some(to)) = (pipeline.node(&conn.from_node), pipeline.node(&conn.to_node)) else {
            for missing in [&conn.from_node, &conn.to_node] {
                if !pipeline.contains_node(missing) {
                    errors.push(
                        ValidationError::error(
                            ValidationKind::UnknownNode,
                            format!("Connection {} references unknown node '{}'", key, missing),
                        )
                        .on_connection(key.clone()),
                    );
                }
            }
            continue;
        };
        // Unknown kinds were already reported
        let (Some(from_def), Some(to_def)) = (catalog.get(&from.kind), catalog.get(&to.kind)) else {
            continue;
        };

        let output = from_def.output(&conn.from_pin);
        let input = to_def.input(&conn.to_pin);
        if output.is_none() {
            errors.push(
                ValidationError::error(
                    ValidationKind::DanglingPin,
                    format!(
                        "Node '{}' ({}) has no output pin '{}'",
                        conn.from_node, from.kind, conn.from_pin
                    ),
                )
                .on_node(&conn.from_node)
                .on_connection(key.clone()),
            );
        }
        if input.is_none() {
            errors.push(
                ValidationError::error(
                    ValidationKind::DanglingPin,
                    format!(
                        "Node '{}' ({}) has no input pin '{}'",
                        conn.to_node, to.kind, conn.to_pin
                    ),
                )
                .on_node(&conn.to_node)
                .on_connection(key.clone()),
            );
        }
        let (Some(output), Some(input)) = (output, input) else {
            continue;
        };

        if !matches!(input.cardinality, PinCardinality::Broadcast) {
            let count = inputs_used
                .entry((conn.to_node.as_str(), conn.to_pin.as_str()))
                .or_insert(0);
            *count += 1;
            if *count > 1 {
                errors.push(
                    ValidationError::error(
                        ValidationKind::DuplicateInput,
                        format!("Input '{}.{}' has more than one connection", conn.to_node, conn.to_pin),
                    )
                    .on_node(&conn.to_node)
                    .on_connection(key.clone()),
                );
            }
        }
        if output.cardinality == PinCardinality::One {
            let count = outputs_used
                .entry((conn.from_node.as_str(), conn.from_pin.as_str()))
                .or_insert(0);
            *count += 1;
            if *count > 1 {
                errors.push(
                    ValidationError::error(
                        ValidationKind::DuplicateInput,
                        format!(
                            "Output '{}.{}' allows one connection",
                            conn.from_node, conn.from_pin
                        ),
                    )
                    .on_node(&conn.from_node)
                    .on_connection(key.clone()),
                );
            }
        }

        match resolver.output_type(&conn.from_node, &conn.from_pin) {
            Ok(produced) => {
                if !accepts(input, &produced, registry) {
                    errors.push(
                        ValidationError::error(
                            ValidationKind::IncompatibleTypes,
                            format!("Connection {} carries {} which '{}' does not accept", key, produced, conn.to_pin),
                        )
                        .on_connection(key.clone()),
                    );
                }
            }
            Err(ConnectionRejection::UnresolvedPassthrough { node_id, reason }) => {
                if reported_passthrough.insert(node_id.clone()) {
                    errors.push(
                        ValidationError::error(
                            ValidationKind::UnresolvedPassthrough,
                            format!("Passthrough at '{}' cannot be resolved: {}", node_id, reason),
                        )
                        .on_node(&node_id)
                        .on_connection(key.clone()),
                    );
                }
            }
            Err(other) => {
                log::debug!("Skipping type check for {}: {}", key, other);
            }
        }
    }
}

fn detect_cycles(pipeline: &Pipeline, catalog: &NodeCatalog, errors: &mut Vec<ValidationError>) {
    let members = topology::directed_cycle_members(pipeline, catalog);
    if members.is_empty() {
        return;
    }
    let names: Vec<&str> = members.iter().map(String::as_str).collect();
    let mut error = ValidationError::error(
        ValidationKind::Cycle,
        format!("Cycle detected involving: {}", names.join(", ")),
    );
    if let Some(first) = names.first() {
        error = error.on_node(first);
    }
    errors.push(error);
}

fn detect_orphans(pipeline: &Pipeline, errors: &mut Vec<ValidationError>) {
    if pipeline.nodes.len() < 2 {
        return;
    }
    for id in pipeline.nodes.keys() {
        if !pipeline.connections.iter().any(|c| c.touches(id)) {
            errors.push(
                ValidationError::warning(
                    ValidationKind::OrphanedNode,
                    format!("Node '{}' has no connections", id),
                )
                .on_node(id),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::NodeDefinition;
    use crate::packet::{packet_type_registry, PacketType};
    use crate::pins::{InputPin, OutputPin};
    use crate::types::{Connection, Node};

    fn catalog() -> NodeCatalog {
        let mut catalog = NodeCatalog::new();
        let mut text = NodeDefinition::new("text");
        text.inputs.push(InputPin::one("in", vec![PacketType::Text]));
        text.outputs.push(OutputPin::broadcast("out", PacketType::Text));
        catalog.register(text);

        let mut bytes = NodeDefinition::new("bytes");
        bytes.outputs.push(OutputPin::broadcast("out", PacketType::Binary));
        catalog.register(bytes);

        let mut pass = NodeDefinition::new("pass");
        pass.inputs.push(InputPin::one("in", vec![PacketType::Any]));
        pass.outputs.push(OutputPin::broadcast("out", PacketType::Passthrough));
        catalog.register(pass);

        let mut peer = NodeDefinition::new("peer");
        peer.inputs.push(InputPin::one("in", vec![PacketType::Text]));
        peer.outputs.push(OutputPin::broadcast("out", PacketType::Text));
        peer.bidirectional = true;
        catalog.register(peer);
        catalog
    }

    fn build(nodes: &[(&str, &str)], conns: &[(&str, &str, &str, &str)]) -> Pipeline {
        let mut p = Pipeline::new();
        for (id, kind) in nodes {
            p.nodes.insert(id.to_string(), Node::new(*kind));
        }
        for (a, ap, b, bp) in conns {
            p.connections.push(Connection::new(*a, *ap, *b, *bp));
        }
        p
    }

    fn kinds(errors: &[ValidationError]) -> Vec<ValidationKind> {
        errors.iter().map(|e| e.kind).collect()
    }

    #[test]
    fn test_valid_pipeline() {
        let p = build(&[("a", "text"), ("b", "text")], &[("a", "out", "b", "in")]);
        let errors = validate_pipeline(&p, &catalog(), packet_type_registry());
        assert!(errors.is_empty(), "{:?}", errors);
    }

    #[test]
    fn test_cycle_blocks_commit() {
        let p = build(
            &[("a", "text"), ("b", "text")],
            &[("a", "out", "b", "in"), ("b", "out", "a", "in")],
        );
        let errors = validate_pipeline(&p, &catalog(), packet_type_registry());
        assert_eq!(kinds(&errors), vec![ValidationKind::Cycle]);
        assert!(has_blocking_errors(&errors));
    }

    #[test]
    fn test_loop_through_bidirectional_node_is_allowed() {
        let p = build(
            &[("net", "peer"), ("b", "text")],
            &[("net", "out", "b", "in"), ("b", "out", "net", "in")],
        );
        let errors = validate_pipeline(&p, &catalog(), packet_type_registry());
        assert!(errors.is_empty(), "{:?}", errors);
    }

    #[test]
    fn test_dangling_pin_and_unknown_kind() {
        let p = build(
            &[("a", "text"), ("b", "text"), ("c", "mystery")],
            &[("a", "aux", "b", "in"), ("b", "out", "c", "in")],
        );
        let errors = validate_pipeline(&p, &catalog(), packet_type_registry());
        let found = kinds(&errors);
        assert!(found.contains(&ValidationKind::UnknownKind));
        assert!(found.contains(&ValidationKind::DanglingPin));
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_incompatible_and_duplicate_input() {
        let p = build(
            &[("a", "text"), ("raw", "bytes"), ("b", "text")],
            &[("a", "out", "b", "in"), ("raw", "out", "b", "in")],
        );
        let errors = validate_pipeline(&p, &catalog(), packet_type_registry());
        let found = kinds(&errors);
        assert!(found.contains(&ValidationKind::DuplicateInput));
        assert!(found.contains(&ValidationKind::IncompatibleTypes));
    }

    #[test]
    fn test_unresolved_passthrough_reported_once() {
        let p = build(
            &[("p", "pass"), ("x", "text"), ("y", "text")],
            &[("p", "out", "x", "in"), ("p", "out", "y", "in")],
        );
        let errors = validate_pipeline(&p, &catalog(), packet_type_registry());
        let unresolved: Vec<_> = errors
            .iter()
            .filter(|e| e.kind == ValidationKind::UnresolvedPassthrough)
            .collect();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].node_id.as_deref(), Some("p"));
    }

    #[test]
    fn test_orphan_is_warning_only() {
        let p = build(
            &[("a", "text"), ("b", "text"), ("lonely", "text")],
            &[("a", "out", "b", "in")],
        );
        let errors = validate_pipeline(&p, &catalog(), packet_type_registry());
        assert_eq!(kinds(&errors), vec![ValidationKind::OrphanedNode]);
        assert!(!has_blocking_errors(&errors));
    }
}

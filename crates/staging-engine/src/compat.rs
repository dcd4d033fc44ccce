//! Pin compatibility checking
//!
//! Decides whether a candidate connection may be added to a pipeline:
//! both endpoints must exist and be declared by their kinds, cardinality
//! limits must hold, and the produced type must be accepted by the input.
//!
//! `Passthrough` outputs are resolved by walking upstream through each
//! node's primary input until a concrete producer is found. Resolution is a
//! pure function of the pipeline; `TypeResolver` memoizes it for one
//! pipeline value and is rebuilt whenever the structure changes.
//!
//! Templates of `Dynamic` input families (e.g. a mixer's "in") are expanded
//! to the lowest free concrete pin (`in_0`, `in_1`, ...) at check time.

use std::collections::{BTreeSet, HashMap, HashSet};

use thiserror::Error;

use crate::catalog::{NodeCatalog, NodeDefinition};
use crate::packet::{can_connect_any, PacketType, PacketTypeMeta};
use crate::pins::{InputPin, PinCardinality};
use crate::types::{Connection, ConnectionKey, Pipeline};

/// Why a connection was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionRejection {
    #[error("node '{0}' does not exist")]
    UnknownNode(String),

    #[error("node '{node_id}' has unknown kind '{kind}'")]
    UnknownKind { node_id: String, kind: String },

    #[error("node '{node_id}' has no {direction} pin '{pin}'")]
    DanglingPin {
        node_id: String,
        pin: String,
        direction: PinDirection,
    },

    #[error("{produced} from '{from}' is not accepted by '{to}' (accepts {accepted})")]
    TypeMismatch {
        from: String,
        to: String,
        produced: String,
        accepted: String,
    },

    #[error("unresolved passthrough at '{node_id}': {reason}")]
    UnresolvedPassthrough { node_id: String, reason: String },

    #[error("pin '{node_id}.{pin}' already has a connection")]
    PinOccupied { node_id: String, pin: String },

    #[error("connection {0} already exists")]
    Duplicate(ConnectionKey),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinDirection {
    Input,
    Output,
}

impl std::fmt::Display for PinDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Output => f.write_str("output"),
        }
    }
}

/// How strictly passthrough chains are enforced
#[derive(Debug, Clone, Default, PartialEq)]
pub enum CheckMode {
    /// Committed graphs: every passthrough must resolve
    Strict,
    /// Staging edits: unresolved chains are left for commit-time validation
    #[default]
    Draft,
    /// Live modification: unresolved chains are checked against the type
    /// actually flowing, when the runtime reports one
    Live { observed: Option<PacketType> },
}

/// Memoized passthrough resolution over one pipeline value
pub struct TypeResolver<'a> {
    pipeline: &'a Pipeline,
    catalog: &'a NodeCatalog,
    resolved: HashMap<String, Result<PacketType, ConnectionRejection>>,
}

impl<'a> TypeResolver<'a> {
    pub fn new(pipeline: &'a Pipeline, catalog: &'a NodeCatalog) -> Self {
        Self {
            pipeline,
            catalog,
            resolved: HashMap::new(),
        }
    }

    fn definition(&self, node_id: &str) -> Result<&'a NodeDefinition, ConnectionRejection> {
        let node = self
            .pipeline
            .node(node_id)
            .ok_or_else(|| ConnectionRejection::UnknownNode(node_id.to_string()))?;
        self.catalog
            .get(&node.kind)
            .ok_or_else(|| ConnectionRejection::UnknownKind {
                node_id: node_id.to_string(),
                kind: node.kind.clone(),
            })
    }

    /// Concrete type produced by `node_id.pin`
    pub fn output_type(&mut self, node_id: &str, pin: &str) -> Result<PacketType, ConnectionRejection> {
        let mut visiting = HashSet::new();
        self.output_type_inner(node_id, pin, &mut visiting)
    }

    fn output_type_inner(
        &mut self,
        node_id: &str,
        pin: &str,
        visiting: &mut HashSet<String>,
    ) -> Result<PacketType, ConnectionRejection> {
        let def = self.definition(node_id)?;
        let output = def.output(pin).ok_or_else(|| ConnectionRejection::DanglingPin {
            node_id: node_id.to_string(),
            pin: pin.to_string(),
            direction: PinDirection::Output,
        })?;
        if !output.produces_type.is_passthrough() {
            return Ok(output.produces_type.clone());
        }
        self.mirrored_type(node_id, def, visiting)
    }

    /// Type flowing into the primary input of a passthrough node
    fn mirrored_type(
        &mut self,
        node_id: &str,
        def: &NodeDefinition,
        visiting: &mut HashSet<String>,
    ) -> Result<PacketType, ConnectionRejection> {
        if let Some(cached) = self.resolved.get(node_id) {
            return cached.clone();
        }
        if !visiting.insert(node_id.to_string()) {
            return Err(unresolved(node_id, "passthrough chain forms a cycle"));
        }

        let result = self.resolve_upstream(node_id, def, visiting);
        visiting.remove(node_id);
        self.resolved.insert(node_id.to_string(), result.clone());
        result
    }

    fn resolve_upstream(
        &mut self,
        node_id: &str,
        def: &NodeDefinition,
        visiting: &mut HashSet<String>,
    ) -> Result<PacketType, ConnectionRejection> {
        let Some(primary) = def.primary_input() else {
            return Err(unresolved(node_id, "kind has no input to mirror"));
        };

        let sources: Vec<(String, String)> = self
            .pipeline
            .incoming(node_id)
            .filter(|c| primary.matches(&c.to_pin))
            .map(|c| (c.from_node.clone(), c.from_pin.clone()))
            .collect();
        if sources.is_empty() {
            return Err(unresolved(node_id, "no upstream connection"));
        }

        let mut found: Option<PacketType> = None;
        for (from_node, from_pin) in sources {
            let ty = self.output_type_inner(&from_node, &from_pin, visiting)?;
            match &found {
                Some(existing) if *existing != ty => {
                    return Err(unresolved(
                        node_id,
                        &format!("upstream types disagree ({} vs {})", existing, ty),
                    ));
                }
                Some(_) => {}
                None => found = Some(ty),
            }
        }
        found.ok_or_else(|| unresolved(node_id, "no upstream connection"))
    }
}

fn unresolved(node_id: &str, reason: &str) -> ConnectionRejection {
    ConnectionRejection::UnresolvedPassthrough {
        node_id: node_id.to_string(),
        reason: reason.to_string(),
    }
}

/// Split a connection key into `(to_node, to_pin)`
fn key_target(key: &str) -> Option<(&str, &str)> {
    let (_, target) = key.split_once("->")?;
    target.rsplit_once('.')
}

/// Validates candidate connections against a catalog
pub struct ConnectionChecker<'a> {
    catalog: &'a NodeCatalog,
    registry: &'a [PacketTypeMeta],
    mode: CheckMode,
    reserved: BTreeSet<(String, String)>,
}

impl<'a> ConnectionChecker<'a> {
    pub fn new(catalog: &'a NodeCatalog, registry: &'a [PacketTypeMeta]) -> Self {
        Self {
            catalog,
            registry,
            mode: CheckMode::default(),
            reserved: BTreeSet::new(),
        }
    }

    pub fn with_mode(mut self, mode: CheckMode) -> Self {
        self.mode = mode;
        self
    }

    /// Keep dynamic pin indices used by these keys out of allocation
    pub fn reserve_keys<'k>(mut self, keys: impl IntoIterator<Item = &'k ConnectionKey>) -> Self {
        for key in keys {
            if let Some((node, pin)) = key_target(key) {
                self.reserved.insert((node.to_string(), pin.to_string()));
            }
        }
        self
    }

    /// Check `candidate` against `pipeline`
    ///
    /// Returns the connection to insert, with a dynamic template pin
    /// replaced by its allocated concrete name.
    pub fn check(
        &self,
        pipeline: &Pipeline,
        candidate: &Connection,
    ) -> Result<Connection, ConnectionRejection> {
        let mut resolver = TypeResolver::new(pipeline, self.catalog);
        let from_def = resolver.definition(&candidate.from_node)?;
        let to_def = resolver.definition(&candidate.to_node)?;

        let output = from_def
            .output(&candidate.from_pin)
            .ok_or_else(|| ConnectionRejection::DanglingPin {
                node_id: candidate.from_node.clone(),
                pin: candidate.from_pin.clone(),
                direction: PinDirection::Output,
            })?;
        let input = to_def
            .input(&candidate.to_pin)
            .ok_or_else(|| ConnectionRejection::DanglingPin {
                node_id: candidate.to_node.clone(),
                pin: candidate.to_pin.clone(),
                direction: PinDirection::Input,
            })?;

        let mut conn = candidate.clone();
        if input.is_dynamic() && conn.to_pin == input.name {
            conn.to_pin = self.allocate_dynamic_pin(pipeline, &conn.to_node, input);
            log::debug!(
                "Allocated dynamic pin '{}.{}'",
                conn.to_node,
                conn.to_pin
            );
        }

        let key = conn.key();
        if pipeline.contains_connection(&key) {
            return Err(ConnectionRejection::Duplicate(key));
        }

        // Concrete dynamic instances take one connection each, like `One`.
        let input_exclusive = matches!(
            input.cardinality,
            PinCardinality::One | PinCardinality::Dynamic { .. }
        );
        if input_exclusive
            && pipeline
                .incoming(&conn.to_node)
                .any(|c| c.to_pin == conn.to_pin)
        {
            return Err(ConnectionRejection::PinOccupied {
                node_id: conn.to_node.clone(),
                pin: conn.to_pin.clone(),
            });
        }
        if output.cardinality == PinCardinality::One
            && pipeline
                .outgoing(&conn.from_node)
                .any(|c| c.from_pin == conn.from_pin)
        {
            return Err(ConnectionRejection::PinOccupied {
                node_id: conn.from_node.clone(),
                pin: conn.from_pin.clone(),
            });
        }

        let produced = match resolver.output_type(&conn.from_node, &conn.from_pin) {
            Ok(ty) => ty,
            Err(rejection @ ConnectionRejection::UnresolvedPassthrough { .. }) => match &self.mode {
                CheckMode::Strict => return Err(rejection),
                CheckMode::Draft => {
                    log::debug!("Deferring passthrough check for {}: {}", key, rejection);
                    return Ok(conn);
                }
                CheckMode::Live { observed: Some(ty) } => ty.clone(),
                CheckMode::Live { observed: None } => return Ok(conn),
            },
            Err(other) => return Err(other),
        };

        if accepts(input, &produced, self.registry) {
            Ok(conn)
        } else {
            Err(ConnectionRejection::TypeMismatch {
                from: format!("{}.{}", conn.from_node, conn.from_pin),
                to: format!("{}.{}", conn.to_node, conn.to_pin),
                produced: produced.to_string(),
                accepted: input
                    .accepts_types
                    .iter()
                    .map(PacketType::to_string)
                    .collect::<Vec<_>>()
                    .join(" | "),
            })
        }
    }

    /// Lowest index not used by a connection or a reserved key
    fn allocate_dynamic_pin(&self, pipeline: &Pipeline, node_id: &str, input: &InputPin) -> String {
        let used: HashSet<u32> = pipeline
            .incoming(node_id)
            .map(|c| c.to_pin.as_str())
            .chain(
                self.reserved
                    .iter()
                    .filter(|(node, _)| node == node_id)
                    .map(|(_, pin)| pin.as_str()),
            )
            .filter_map(|pin| input.dynamic_index(pin))
            .collect();

        let mut index = 0;
        while used.contains(&index) {
            index += 1;
        }
        input
            .instance_name(index)
            .unwrap_or_else(|| input.name.clone())
    }
}

/// Whether an input declaration takes `produced`
///
/// Inputs that list `Passthrough` take anything.
pub fn accepts(input: &InputPin, produced: &PacketType, registry: &[PacketTypeMeta]) -> bool {
    input.accepts_types.iter().any(PacketType::is_passthrough)
        || can_connect_any(produced, &input.accepts_types, registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{packet_type_registry, SampleFormat};
    use crate::pins::OutputPin;
    use crate::types::Node;

    fn catalog() -> NodeCatalog {
        let mut catalog = NodeCatalog::new();

        let mut reader = NodeDefinition::new("reader");
        reader.outputs.push(OutputPin::broadcast("out", PacketType::Binary));
        catalog.register(reader);

        let mut decoder = NodeDefinition::new("decoder");
        decoder.inputs.push(InputPin::one("in", vec![PacketType::OpusAudio]));
        decoder
            .outputs
            .push(OutputPin::broadcast("out", PacketType::raw_audio_any(SampleFormat::F32)));
        catalog.register(decoder);

        let mut opus_src = NodeDefinition::new("opus_src");
        opus_src.outputs.push(OutputPin::broadcast("out", PacketType::OpusAudio));
        catalog.register(opus_src);

        let mut pacer = NodeDefinition::new("pacer");
        pacer.inputs.push(InputPin::one("in", vec![PacketType::Any]));
        pacer.outputs.push(OutputPin::broadcast("out", PacketType::Passthrough));
        catalog.register(pacer);

        let mut mixer = NodeDefinition::new("mixer");
        mixer.inputs.push(InputPin::dynamic(
            "in",
            "in",
            vec![PacketType::raw_audio_any(SampleFormat::F32)],
        ));
        mixer
            .outputs
            .push(OutputPin::one("out", PacketType::raw_audio_any(SampleFormat::F32)));
        catalog.register(mixer);

        catalog
    }

    fn pipeline(nodes: &[(&str, &str)], conns: &[(&str, &str, &str, &str)]) -> Pipeline {
        let mut p = Pipeline::new();
        for (name, kind) in nodes {
            p.nodes.insert(name.to_string(), Node::new(*kind));
        }
        for (a, ap, b, bp) in conns {
            p.connections.push(Connection::new(*a, *ap, *b, *bp));
        }
        p
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let cat = catalog();
        let p = pipeline(&[("r", "reader"), ("d", "decoder")], &[]);
        let checker = ConnectionChecker::new(&cat, packet_type_registry());
        let err = checker.check(&p, &Connection::new("r", "out", "d", "in")).unwrap_err();
        assert!(matches!(err, ConnectionRejection::TypeMismatch { .. }));
    }

    #[test]
    fn test_dangling_pins_rejected() {
        let cat = catalog();
        let p = pipeline(&[("s", "opus_src"), ("d", "decoder")], &[]);
        let checker = ConnectionChecker::new(&cat, packet_type_registry());
        let err = checker.check(&p, &Connection::new("s", "nope", "d", "in")).unwrap_err();
        assert!(matches!(
            err,
            ConnectionRejection::DanglingPin { direction: PinDirection::Output, .. }
        ));
        let err = checker.check(&p, &Connection::new("s", "out", "d", "aux")).unwrap_err();
        assert!(matches!(
            err,
            ConnectionRejection::DanglingPin { direction: PinDirection::Input, .. }
        ));
    }

    #[test]
    fn test_passthrough_resolves_through_chain() {
        let cat = catalog();
        let p = pipeline(
            &[("s", "opus_src"), ("p1", "pacer"), ("p2", "pacer"), ("d", "decoder")],
            &[("s", "out", "p1", "in"), ("p1", "out", "p2", "in")],
        );
        let mut resolver = TypeResolver::new(&p, &cat);
        assert_eq!(resolver.output_type("p2", "out").unwrap(), PacketType::OpusAudio);

        let checker = ConnectionChecker::new(&cat, packet_type_registry()).with_mode(CheckMode::Strict);
        assert!(checker.check(&p, &Connection::new("p2", "out", "d", "in")).is_ok());
    }

    #[test]
    fn test_unresolved_passthrough_by_mode() {
        let cat = catalog();
        let p = pipeline(&[("p", "pacer"), ("d", "decoder")], &[]);
        let candidate = Connection::new("p", "out", "d", "in");

        let strict = ConnectionChecker::new(&cat, packet_type_registry()).with_mode(CheckMode::Strict);
        assert!(matches!(
            strict.check(&p, &candidate).unwrap_err(),
            ConnectionRejection::UnresolvedPassthrough { .. }
        ));

        let draft = ConnectionChecker::new(&cat, packet_type_registry());
        assert!(draft.check(&p, &candidate).is_ok());

        let live = ConnectionChecker::new(&cat, packet_type_registry()).with_mode(CheckMode::Live {
            observed: Some(PacketType::Text),
        });
        assert!(matches!(
            live.check(&p, &candidate).unwrap_err(),
            ConnectionRejection::TypeMismatch { .. }
        ));
    }

    #[test]
    fn test_passthrough_cycle_is_unresolved() {
        let cat = catalog();
        let p = pipeline(
            &[("p1", "pacer"), ("p2", "pacer")],
            &[("p1", "out", "p2", "in"), ("p2", "out", "p1", "in")],
        );
        let mut resolver = TypeResolver::new(&p, &cat);
        assert!(matches!(
            resolver.output_type("p1", "out").unwrap_err(),
            ConnectionRejection::UnresolvedPassthrough { .. }
        ));
    }

    #[test]
    fn test_one_cardinality_enforced() {
        let cat = catalog();
        let p = pipeline(
            &[("s", "opus_src"), ("s2", "opus_src"), ("d", "decoder")],
            &[("s", "out", "d", "in")],
        );
        let checker = ConnectionChecker::new(&cat, packet_type_registry());
        assert!(matches!(
            checker.check(&p, &Connection::new("s2", "out", "d", "in")).unwrap_err(),
            ConnectionRejection::PinOccupied { .. }
        ));
        assert!(matches!(
            checker.check(&p, &Connection::new("s", "out", "d", "in")).unwrap_err(),
            ConnectionRejection::Duplicate(_)
        ));
    }

    #[test]
    fn test_dynamic_allocation_lowest_free_index() {
        let cat = catalog();
        let mut p = pipeline(
            &[("a", "decoder"), ("b", "decoder"), ("c", "decoder"), ("m", "mixer")],
            &[("a", "out", "m", "in_0"), ("b", "out", "m", "in_2")],
        );
        let checker = ConnectionChecker::new(&cat, packet_type_registry());
        let conn = checker.check(&p, &Connection::new("c", "out", "m", "in")).unwrap();
        assert_eq!(conn.to_pin, "in_1");

        p.connections.push(conn);
        p.connections.retain(|c| c.to_pin != "in_0");
        let reserved: Vec<ConnectionKey> = vec!["x.out->m.in_0".into()];
        let checker = ConnectionChecker::new(&cat, packet_type_registry()).reserve_keys(&reserved);
        let conn = checker.check(&p, &Connection::new("a", "out", "m", "in")).unwrap();
        assert_eq!(conn.to_pin, "in_3");
    }
}

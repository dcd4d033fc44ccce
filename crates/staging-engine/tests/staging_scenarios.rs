//! End-to-end staging scenarios against an in-memory runtime

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use staging_engine::constants::defaults::FAN_IN_PARAM;
use staging_engine::mirror::NodeStats;
use staging_engine::topology;
use staging_engine::{
    plan, BatchOperation, ChangeType, Connection, EditMode, FanIn, InputPin, MemoryRuntime,
    MirrorHandle, NodeCatalog, NodeDefinition, NodePosition, NodeState, OutputPin, PacketType,
    ParamField, ParamSchema, Pipeline, PipelineBuilder, RuntimeEvent, RuntimeStateMirror,
    StagingConfig, StagingError, StagingEvent, StagingRegistry, StagingService, VecEventSink,
};

const TARGET: &str = "session-1";

fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .is_test(true)
        .try_init();
}

fn catalog() -> Arc<NodeCatalog> {
    let mut catalog = NodeCatalog::new();

    let mut source = NodeDefinition::new("test::source");
    source.outputs.push(OutputPin::broadcast("out", PacketType::Text));
    catalog.register(source);

    let mut gain = NodeDefinition::new("test::gain");
    gain.inputs.push(InputPin::one("in", vec![PacketType::Text]));
    gain.outputs.push(OutputPin::broadcast("out", PacketType::Text));
    gain.param_schema = ParamSchema::new().field("gain", ParamField::number(1.0, 0.0, 4.0).tunable());
    catalog.register(gain);

    let mut mixer = NodeDefinition::new("test::mixer");
    mixer.inputs.push(InputPin::dynamic("in", "in", vec![PacketType::Text]));
    mixer.outputs.push(OutputPin::broadcast("out", PacketType::Text));
    mixer.param_schema = ParamSchema::new()
        .field(FAN_IN_PARAM, ParamField::integer(0))
        .field("label", ParamField::string(Some("mix")));
    mixer.fan_in = Some(FanIn {
        count_param: FAN_IN_PARAM.to_string(),
    });
    catalog.register(mixer);

    Arc::new(catalog)
}

/// `{A: Initializing, B: Initializing}` with `A.out -> B.in`
fn live() -> Pipeline {
    PipelineBuilder::new("live")
        .add_node("A", "test::gain")
        .with_params(json!({"gain": 1.0}))
        .add_node("B", "test::gain")
        .with_params(json!({"gain": 1.0}))
        .connect("A", "out", "B", "in")
        .build()
}

fn registry() -> StagingRegistry {
    let mut registry = StagingRegistry::new(catalog(), StagingConfig::default());
    registry.enter(TARGET, live()).unwrap();
    registry
}

#[test]
fn test_add_remove_new_node_nets_zero_then_remove_live_node() {
    let mut registry = registry();

    registry.add_node(TARGET, "C", "test::gain", None).unwrap();
    registry.remove_node(TARGET, "C").unwrap();
    assert!(registry.overlay(TARGET).unwrap().change_log().is_empty());

    let overlay = registry.remove_node(TARGET, "A").unwrap().unwrap();
    let log = overlay.change_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].change_type, ChangeType::RemoveNode);
    assert_eq!(log[0].node_id.as_deref(), Some("A"));
    assert!(overlay.staged().connections.is_empty());
    assert!(overlay.staged_connection_keys().is_empty());

    // Restoring A brings its live connection back and nets to nothing
    let overlay = registry
        .add_node(TARGET, "A", "test::gain", Some(json!({"gain": 1})))
        .unwrap()
        .unwrap();
    assert!(overlay.change_log().is_empty());
    assert!(overlay.staged().contains_connection("A.out->B.in"));
    assert!(plan(overlay.staged(), &live(), &catalog()).is_empty());
}

#[test]
fn test_connection_cancellation() {
    let mut registry = registry();
    let live_key = "A.out->B.in";

    // Live connection: remove, re-add, remove nets to one removal
    registry.disconnect(TARGET, live_key).unwrap();
    registry
        .connect(TARGET, Connection::new("A", "out", "B", "in"))
        .unwrap();
    assert!(registry.overlay(TARGET).unwrap().change_log().is_empty());
    let overlay = registry.disconnect(TARGET, live_key).unwrap().unwrap();
    assert_eq!(overlay.change_log().len(), 1);
    assert_eq!(overlay.change_log()[0].change_type, ChangeType::RemoveConnection);

    // New connection: add then remove nets to nothing beyond the removal above
    registry.add_node(TARGET, "S", "test::source", None).unwrap();
    registry
        .connect(TARGET, Connection::new("S", "out", "B", "in"))
        .unwrap();
    registry.disconnect(TARGET, "S.out->B.in").unwrap();
    registry.remove_node(TARGET, "S").unwrap();

    let overlay = registry.overlay(TARGET).unwrap();
    assert_eq!(overlay.change_log().len(), 1);
    assert!(overlay.staged_connection_keys().is_empty());
}

#[test]
fn test_remove_node_drops_every_touching_connection() {
    let mut registry = registry();
    registry.add_node(TARGET, "M", "test::mixer", None).unwrap();
    registry
        .connect(TARGET, Connection::new("A", "out", "M", "in"))
        .unwrap();
    registry
        .connect(TARGET, Connection::new("B", "out", "M", "in"))
        .unwrap();

    let overlay = registry.remove_node(TARGET, "A").unwrap().unwrap();
    assert!(overlay.staged().connections.iter().all(|c| !c.touches("A")));
    assert!(overlay.staged_connection_keys().iter().all(|k| !k.starts_with("A.")));
    assert_eq!(
        overlay.staged_connection_keys().iter().collect::<Vec<_>>(),
        vec!["B.out->M.in_1"]
    );
}

#[test]
fn test_mixer_plan_injects_input_count() {
    let mut registry = registry();
    registry.add_node(TARGET, "D", "test::gain", None).unwrap();
    registry.add_node(TARGET, "M", "test::mixer", None).unwrap();
    for source in ["A", "B", "D"] {
        registry
            .connect(TARGET, Connection::new(source, "out", "M", "in"))
            .unwrap();
    }

    let overlay = registry.overlay(TARGET).unwrap();
    let ops = plan(overlay.staged(), overlay.original(), &catalog());

    let mixer_adds: Vec<(usize, &BatchOperation)> = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| matches!(op, BatchOperation::AddNode { node_id, .. } if node_id == "M"))
        .collect();
    assert_eq!(mixer_adds.len(), 1);
    let (add_index, BatchOperation::AddNode { params, .. }) = mixer_adds[0] else {
        unreachable!()
    };
    assert_eq!(params[FAN_IN_PARAM], json!(3));
    assert_eq!(params["label"], json!("mix"));

    let connect_indices: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| matches!(op, BatchOperation::Connect { to_node, .. } if to_node == "M"))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(connect_indices.len(), 3);
    assert!(connect_indices.iter().all(|i| *i > add_index));
}

#[test]
fn test_levels_exceed_predecessors() {
    let pipeline = PipelineBuilder::new("dag")
        .add_node("src", "test::source")
        .add_node("a", "test::gain")
        .add_node("b", "test::gain")
        .add_node("mix", "test::mixer")
        .add_node("tail", "test::gain")
        .connect("src", "out", "a", "in")
        .connect("a", "out", "b", "in")
        .connect("src", "out", "mix", "in_0")
        .connect("b", "out", "mix", "in_1")
        .connect("mix", "out", "tail", "in")
        .build();

    let levels = topology::levels(&pipeline);
    for (node_id, level) in &levels {
        let preds: Vec<usize> = pipeline
            .incoming(node_id)
            .map(|c| levels[&c.from_node])
            .collect();
        match preds.iter().max() {
            Some(max) => assert!(level > max, "{} at {} not above {}", node_id, level, max),
            None => assert_eq!(*level, 0),
        }
    }
    assert_eq!(levels["mix"], 3);
}

#[test]
fn test_cached_editor_data_survives_a_new_registry() {
    let dir = tempfile::tempdir().unwrap();
    let config = StagingConfig {
        persistence_dir: Some(dir.path().to_path_buf()),
        ..StagingConfig::default()
    };

    let mut first = StagingRegistry::new(catalog(), config.clone());
    first.enter(TARGET, live()).unwrap();
    first.add_node(TARGET, "M", "test::mixer", None).unwrap();
    first
        .connect(TARGET, Connection::new("A", "out", "M", "in"))
        .unwrap();
    assert!(first.set_position(TARGET, "A", NodePosition::new(10.0, 20.0)));
    assert!(first.exit(TARGET));

    let mut second = StagingRegistry::new(catalog(), config);
    let overlay = second.enter(TARGET, live()).unwrap();
    assert_eq!(overlay.node_positions()["A"], NodePosition::new(10.0, 20.0));
    assert!(overlay.staged_node_ids().contains("M"));
    assert!(overlay.staged_connection_keys().contains("A.out->M.in_0"));
    assert!(overlay.change_log().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_gain_edit_and_revert_after_quiet_period() {
    init_logging();
    let runtime = Arc::new(MemoryRuntime::new());
    runtime.insert(TARGET, live());
    let sink = Arc::new(VecEventSink::new());
    let service = StagingService::new(catalog(), StagingConfig::default(), runtime, sink.clone());
    service.enter(TARGET).await.unwrap();

    assert!(service.update_params(TARGET, "A", json!({"gain": 2.0})).unwrap());
    tokio::time::sleep(Duration::from_millis(400)).await;
    let overlay = service.overlay(TARGET).unwrap();
    let updates: Vec<_> = overlay
        .change_log()
        .iter()
        .filter(|c| c.change_type == ChangeType::UpdateParams)
        .collect();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].node_id.as_deref(), Some("A"));

    service.update_params(TARGET, "A", json!({"gain": 1.0})).unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(service.overlay(TARGET).unwrap().change_log().is_empty());

    let coalesced = sink
        .events()
        .into_iter()
        .filter(|e| matches!(e, StagingEvent::ParamsCoalesced { .. }))
        .count();
    assert_eq!(coalesced, 2);
}

#[tokio::test(start_paused = true)]
async fn test_rapid_edits_collapse_to_one_entry() {
    let runtime = Arc::new(MemoryRuntime::new());
    runtime.insert(TARGET, live());
    let service = StagingService::new(
        catalog(),
        StagingConfig::default(),
        runtime,
        Arc::new(VecEventSink::new()),
    );
    service.enter(TARGET).await.unwrap();

    for gain in [2.0, 3.0, 3.5] {
        service.update_params(TARGET, "B", json!({"gain": gain})).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    // Still inside the window of the last edit
    assert!(service.overlay(TARGET).unwrap().change_log().is_empty());

    tokio::time::sleep(Duration::from_millis(300)).await;
    let overlay = service.overlay(TARGET).unwrap();
    assert_eq!(overlay.change_log().len(), 1);
    assert_eq!(overlay.staged().nodes["B"].params, json!({"gain": 3.5}));
}

#[tokio::test]
async fn test_import_with_kind_change_replaces_live_node() {
    init_logging();
    let runtime = Arc::new(MemoryRuntime::new());
    runtime.insert(TARGET, live());
    let service = StagingService::new(
        catalog(),
        StagingConfig::default(),
        runtime.clone(),
        Arc::new(VecEventSink::new()),
    );
    service.enter(TARGET).await.unwrap();

    let yaml = "nodes:\n  A:\n    kind: test::source\n  B:\n    kind: test::gain\n    params:\n      gain: 1\n    needs: A\n";
    tokio_test::assert_ok!(service.import_yaml(TARGET, yaml));

    let ops = tokio_test::assert_ok!(service.commit(TARGET).await);
    let labels: Vec<&str> = ops.iter().map(BatchOperation::label).collect();
    assert_eq!(labels, vec!["remove_node", "add_node", "connect"]);

    let applied = runtime.pipeline(TARGET).unwrap();
    assert_eq!(applied.nodes["A"].kind, "test::source");
    assert_eq!(applied.nodes["B"].params, json!({"gain": 1.0}));
    assert!(applied.contains_connection("A.out->B.in"));
}

#[tokio::test]
async fn test_commit_round_trip_through_memory_runtime() {
    init_logging();
    let runtime = Arc::new(MemoryRuntime::new());
    runtime.insert(TARGET, live());
    let service = StagingService::new(
        catalog(),
        StagingConfig::default(),
        runtime.clone(),
        Arc::new(VecEventSink::new()),
    );

    service.enter(TARGET).await.unwrap();
    service.add_node(TARGET, "M", "test::mixer", None).unwrap();
    service
        .connect(TARGET, Connection::new("A", "out", "M", "in"))
        .unwrap();
    service
        .connect(TARGET, Connection::new("B", "out", "M", "in"))
        .unwrap();

    let ops = tokio_test::assert_ok!(service.commit(TARGET).await);
    assert_eq!(ops.len(), 3);
    assert_eq!(service.mode(TARGET), EditMode::Monitor);

    let applied = runtime.pipeline(TARGET).unwrap();
    assert_eq!(applied.nodes["M"].params[FAN_IN_PARAM], json!(2));
    assert!(applied.contains_connection("B.out->M.in_1"));

    // Committing left staging, so there is no overlay to commit
    let err = tokio_test::assert_err!(service.commit(TARGET).await);
    assert!(matches!(err, StagingError::NotStaging(_)));
}

#[tokio::test]
async fn test_mirror_attributes_slow_inputs() {
    init_logging();
    let pipeline = PipelineBuilder::new("live")
        .add_node("A", "test::source")
        .add_node("B", "test::source")
        .add_node("M", "test::mixer")
        .with_state(NodeState::Running)
        .connect("B", "out", "M", "in_0")
        .connect("A", "out", "M", "in_1")
        .build();

    let sink = Arc::new(VecEventSink::new());
    let (handle, task) = MirrorHandle::spawn(RuntimeStateMirror::new(TARGET, pipeline), sink.clone());
    let tx = handle.sender();

    let degraded = NodeState::Degraded {
        reason: "slow_input_timeout".into(),
        details: Some(json!({"slow_pins": ["in_1", "in_0"]})),
    };
    for _ in 0..2 {
        tx.send(RuntimeEvent::NodeStateChanged {
            node_id: "M".into(),
            state: degraded.clone(),
        })
        .await
        .unwrap();
    }
    // Events are ingested in order; once the stats land, both states have too
    tx.send(RuntimeEvent::NodeStatsUpdated {
        node_id: "M".into(),
        stats: NodeStats {
            received: 10,
            ..NodeStats::default()
        },
    })
    .await
    .unwrap();
    while handle.read(|m| m.stats("M").is_none()) {
        tokio::task::yield_now().await;
    }

    assert_eq!(handle.read(|m| m.node_state("M").cloned()), Some(degraded));
    let causes = handle.read(|m| m.degraded_causes("M"));
    let sources: Vec<(&str, &str)> = causes
        .iter()
        .map(|c| (c.pin.as_str(), c.from_node.as_str()))
        .collect();
    assert_eq!(sources, vec![("in_0", "B"), ("in_1", "A")]);

    let state_events = sink
        .events()
        .into_iter()
        .filter(|e| matches!(e, StagingEvent::NodeStateChanged { .. }))
        .count();
    assert_eq!(state_events, 1);

    drop(tx);
    drop(handle);
    task.await.unwrap();
}

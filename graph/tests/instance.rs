//! Instance-level behaviour: definitions, parameters, external and child
//! graphs, cached values, layers and snapshots.

mod common;

use std::sync::Arc;

use animgraph_core::{
    NodeIndex, SampledEventFlags, Seconds, StringId, Transform,
};
use animgraph_graph::{
    CachedValueMode, CachedValueSettings, ClipSettings, DefinitionError, ExternalGraphError,
    ExternalGraphSlotSettings, GraphDefinition, GraphDefinitionBuilder, GraphInstance,
    GraphValueType, LayerBlendSettings, LayerSettings, NodeSettings, StateSettings,
    TransitionSettings,
};
use animgraph_task::Task;

use common::*;

fn step(instance: &mut GraphInstance, dt: Seconds) -> animgraph_graph::PoseNodeResult {
    instance.evaluate_graph(dt, Transform::identity(), None, None, false)
}

/// A trivial definition whose root is a single looping clip.
fn clip_graph(name: &str, duration: f32) -> Arc<GraphDefinition> {
    let mut builder = GraphDefinitionBuilder::new(StringId::new(name), skeleton());
    let handle = builder.add_clip(clip(name, duration, 1.0));
    let node = builder.add_node(NodeSettings::Clip(ClipSettings {
        clip: handle,
        looping: true,
    }));
    builder.set_root_node(node);
    builder.build().expect("clip graph")
}

// Definitions
// ---------------------------------------------------------------------

#[test]
fn definition_rejects_unresolved_child() {
    let mut builder = GraphDefinitionBuilder::new(StringId::new("bad"), skeleton());
    let state = builder.add_node(NodeSettings::State(StateSettings {
        child: Some(NodeIndex(99)),
        ..StateSettings::default()
    }));
    builder.set_root_node(state);
    match builder.build() {
        Err(DefinitionError::UnresolvedChildIndex { child, .. }) => assert_eq!(child, 99),
        other => panic!("expected unresolved child, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn definition_rejects_capability_mismatch() {
    let mut builder = GraphDefinitionBuilder::new(StringId::new("bad"), skeleton());
    let handle = builder.add_clip(clip("A", 1.0, 0.0));
    let clip_node = builder.add_node(NodeSettings::Clip(ClipSettings {
        clip: handle,
        looping: true,
    }));
    // A cached value node whose source is a pose node.
    builder.add_node(NodeSettings::CachedValue(CachedValueSettings {
        source: clip_node,
        mode: CachedValueMode::OnEntry,
    }));
    builder.set_root_node(clip_node);
    assert!(matches!(
        builder.build(),
        Err(DefinitionError::ChildCapabilityMismatch { .. })
    ));
}

#[test]
fn definition_requires_root() {
    let mut builder = GraphDefinitionBuilder::new(StringId::new("bad"), skeleton());
    let handle = builder.add_clip(clip("A", 1.0, 0.0));
    builder.add_node(NodeSettings::Clip(ClipSettings {
        clip: handle,
        looping: true,
    }));
    assert!(matches!(
        builder.build(),
        Err(DefinitionError::MissingRootNode)
    ));
}

// Control parameters
// ---------------------------------------------------------------------

#[test]
fn parameters_read_last_written_value() {
    let graph = machine_graph(MachineSpec {
        clips: &[clip("A", 1.0, 0.0), clip("B", 1.0, 0.0)],
        rules: &[(0, 1, transition(0.5))],
    });
    let mut inst = GraphInstance::new(&graph.definition, 7).unwrap();

    assert_eq!(
        inst.control_parameter_index(StringId::new("Trigger0")),
        Some(graph.parameters[0])
    );
    assert_eq!(inst.get_control_parameter::<bool>(graph.parameters[0]), false);
    inst.set_control_parameter(graph.parameters[0], true);
    assert_eq!(inst.get_control_parameter::<bool>(graph.parameters[0]), true);
}

#[test]
fn cached_value_snapshots_at_state_entry() {
    // "Speed" feeds an OnEntry cached value owned by state A; the cached
    // value is the duration override of the A -> B transition.
    let mut builder = GraphDefinitionBuilder::new(StringId::new("cached"), skeleton());
    let speed = builder.add_control_parameter(StringId::new("Speed"), GraphValueType::Float);
    let go = builder.add_control_parameter(StringId::new("Go"), GraphValueType::Bool);

    let clip_a = builder.add_clip(clip("A", 2.0, 0.0));
    let clip_b = builder.add_clip(clip("B", 2.0, 0.0));
    let node_a = builder.add_node(NodeSettings::Clip(ClipSettings {
        clip: clip_a,
        looping: true,
    }));
    let node_b = builder.add_node(NodeSettings::Clip(ClipSettings {
        clip: clip_b,
        looping: true,
    }));
    let cached = builder.add_node(NodeSettings::CachedValue(CachedValueSettings {
        source: speed,
        mode: CachedValueMode::OnEntry,
    }));
    let state_a = builder.add_node(NodeSettings::State(StateSettings {
        child: Some(node_a),
        owned_value_nodes: vec![cached],
        ..StateSettings::default()
    }));
    let state_b = builder.add_node(NodeSettings::State(StateSettings {
        child: Some(node_b),
        ..StateSettings::default()
    }));
    let mut settings = TransitionSettings::new(state_b, Seconds(9.0));
    settings.duration_override = Some(cached);
    let transition_node = builder.add_node(NodeSettings::Transition(settings));
    let machine = builder.add_node(NodeSettings::StateMachine(
        animgraph_graph::StateMachineSettings {
            states: vec![
                animgraph_graph::StateMachineStateSettings {
                    state_node: state_a,
                    transitions: vec![animgraph_graph::TransitionRule {
                        target_state: 1,
                        condition: Some(go),
                        transition_node,
                    }],
                },
                animgraph_graph::StateMachineStateSettings {
                    state_node: state_b,
                    transitions: vec![],
                },
            ],
            default_state: 0,
        },
    ));
    builder.set_root_node(machine);
    let definition = builder.build().unwrap();

    let mut inst = GraphInstance::new(&definition, 1).unwrap();
    inst.set_control_parameter(speed, 0.5f32);

    // State A activates on the first evaluation and snapshots Speed=0.5.
    step(&mut inst, DT);

    // A later write must not leak into the snapshot.
    inst.set_control_parameter(speed, 5.0f32);
    inst.set_control_parameter(go, true);
    step(&mut inst, DT);

    // One post-start frame: progress = 0.1 / 0.5 = 0.2. Had the override
    // read the live value the weight would be 0.02.
    step(&mut inst, DT);
    let weights = blend_weights(inst.task_system().unwrap());
    assert_eq!(weights.len(), 1);
    assert!(approx(weights[0], 0.2), "got {}", weights[0]);
}

// State events
// ---------------------------------------------------------------------

#[test]
fn state_events_follow_the_transition_lifecycle() {
    let entry = StringId::new("OnEntry");
    let execute = StringId::new("OnExecute");
    let exit = StringId::new("OnExit");

    let mut builder = GraphDefinitionBuilder::new(StringId::new("events"), skeleton());
    let go = builder.add_control_parameter(StringId::new("Go"), GraphValueType::Bool);
    let clip_a = builder.add_clip(clip("A", 1.0, 0.0));
    let clip_b = builder.add_clip(clip("B", 1.0, 0.0));
    let node_a = builder.add_node(NodeSettings::Clip(ClipSettings {
        clip: clip_a,
        looping: true,
    }));
    let node_b = builder.add_node(NodeSettings::Clip(ClipSettings {
        clip: clip_b,
        looping: true,
    }));
    let state_a = builder.add_node(NodeSettings::State(StateSettings {
        child: Some(node_a),
        entry_events: vec![entry],
        execute_events: vec![execute],
        exit_events: vec![exit],
        ..StateSettings::default()
    }));
    let state_b = builder.add_node(NodeSettings::State(StateSettings {
        child: Some(node_b),
        ..StateSettings::default()
    }));
    let transition_node = builder.add_node(NodeSettings::Transition(TransitionSettings::new(
        state_b,
        Seconds(0.5),
    )));
    let machine = builder.add_node(NodeSettings::StateMachine(
        animgraph_graph::StateMachineSettings {
            states: vec![
                animgraph_graph::StateMachineStateSettings {
                    state_node: state_a,
                    transitions: vec![animgraph_graph::TransitionRule {
                        target_state: 1,
                        condition: Some(go),
                        transition_node,
                    }],
                },
                animgraph_graph::StateMachineStateSettings {
                    state_node: state_b,
                    transitions: vec![],
                },
            ],
            default_state: 0,
        },
    ));
    builder.set_root_node(machine);
    let definition = builder.build().unwrap();
    let mut inst = GraphInstance::new(&definition, 1).unwrap();

    // First frame samples the entry event, later frames the execute one.
    step(&mut inst, DT);
    let events = inst.sampled_events().events().to_vec();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, entry);
    assert!(events[0].flags.contains(SampledEventFlags::STATE_ENTRY));

    step(&mut inst, DT);
    let events = inst.sampled_events().events().to_vec();
    assert_eq!(events[0].id, execute);
    assert!(events[0].flags.contains(SampledEventFlags::STATE_EXECUTE));

    // Transition start: A's exit event fires and the range returned by the
    // frame covers it plus the target's output.
    inst.set_control_parameter(go, true);
    let result = step(&mut inst, DT);
    let events = inst.sampled_events().events().to_vec();
    assert!(events
        .iter()
        .any(|e| e.id == exit && e.flags.contains(SampledEventFlags::STATE_EXIT)));
    assert_eq!(result.sampled_events.len(), events.len());
}

// External graphs
// ---------------------------------------------------------------------

fn slot_graph() -> Arc<GraphDefinition> {
    let mut builder = GraphDefinitionBuilder::new(StringId::new("parent"), skeleton());
    let slot = builder.add_node(NodeSettings::ExternalGraphSlot(ExternalGraphSlotSettings {
        slot_id: StringId::new("Gesture"),
    }));
    builder.set_root_node(slot);
    builder.build().expect("slot graph")
}

#[test]
fn external_slot_unknown_is_an_error() {
    let definition = slot_graph();
    let mut inst = GraphInstance::new(&definition, 1).unwrap();
    let child = clip_graph("Wave", 1.0);

    let before_events = inst.sampled_events().len();
    match inst.connect_external_graph(StringId::new("missing"), &child) {
        Err(ExternalGraphError::SlotUnknown(_)) => {}
        other => panic!("expected SlotUnknown, got {:?}", other.map(|_| ())),
    }
    assert_eq!(inst.sampled_events().len(), before_events);
    assert_eq!(inst.task_system().unwrap().num_live_cached_poses(), 0);
    assert!(inst.connected_external_graphs().is_empty());
}

#[test]
fn external_graph_connect_evaluate_disconnect() {
    let definition = slot_graph();
    let mut inst = GraphInstance::new(&definition, 1).unwrap();
    let child = clip_graph("Wave", 1.0);

    // Unfilled slot produces nothing.
    let result = step(&mut inst, DT);
    assert_eq!(result.task, None);

    inst.connect_external_graph(StringId::new("Gesture"), &child)
        .expect("connect");
    assert!(inst.is_external_graph_slot_filled(StringId::new("Gesture")));

    // Double connect is refused.
    assert!(matches!(
        inst.connect_external_graph(StringId::new("Gesture"), &child),
        Err(ExternalGraphError::SlotAlreadyFilled(_))
    ));

    // The nested graph's tasks land in the parent's task system.
    let result = step(&mut inst, DT);
    assert!(result.task.is_some());
    let clips = sampled_clips(inst.task_system().unwrap());
    assert_eq!(clips, vec![(StringId::new("Wave"), 0.1)]);

    inst.disconnect_external_graph(StringId::new("Gesture"))
        .expect("disconnect");
    assert!(!inst.is_external_graph_slot_filled(StringId::new("Gesture")));
    let result = step(&mut inst, DT);
    assert_eq!(result.task, None);

    assert!(matches!(
        inst.disconnect_external_graph(StringId::new("Gesture")),
        Err(ExternalGraphError::SlotNotFilled(_))
    ));
}

#[test]
fn connect_disconnect_leaves_parent_unchanged() {
    let definition = slot_graph();
    let mut inst = GraphInstance::new(&definition, 1).unwrap();
    let child = clip_graph("Wave", 1.0);

    step(&mut inst, DT);
    let events_before = inst.sampled_events().len();
    let live_before = inst.task_system().unwrap().num_live_cached_poses();

    inst.connect_external_graph(StringId::new("Gesture"), &child)
        .expect("connect");
    inst.disconnect_external_graph(StringId::new("Gesture"))
        .expect("disconnect");

    assert_eq!(inst.sampled_events().len(), events_before);
    assert_eq!(
        inst.task_system().unwrap().num_live_cached_poses(),
        live_before
    );
    assert!(inst.connected_external_graphs().is_empty());
}

// Child graphs
// ---------------------------------------------------------------------

#[test]
fn child_graphs_evaluate_with_the_parent() {
    let child = clip_graph("Run", 1.0);
    let mut builder = GraphDefinitionBuilder::new(StringId::new("parent"), skeleton());
    let child_handle = builder.add_child_graph(child);
    let node = builder.add_node(NodeSettings::ChildGraph(
        animgraph_graph::ChildGraphSettings {
            child_graph: child_handle,
        },
    ));
    builder.set_root_node(node);
    let definition = builder.build().unwrap();

    let mut inst = GraphInstance::new(&definition, 1).unwrap();
    let result = step(&mut inst, DT);
    assert!(result.task.is_some());
    assert_eq!(
        sampled_clips(inst.task_system().unwrap()),
        vec![(StringId::new("Run"), 0.1)]
    );
    // Root motion flows through from the nested clip.
    assert!(approx(result.root_motion_delta.translation.x, 0.1));
}

// Layers
// ---------------------------------------------------------------------

#[test]
fn layer_blend_registers_masked_blends() {
    let mut builder = GraphDefinitionBuilder::new(StringId::new("layers"), skeleton());
    let clip_base = builder.add_clip(clip("Base", 1.0, 0.0));
    let clip_layer = builder.add_clip(clip("Layer", 1.0, 0.0));
    let base = builder.add_node(NodeSettings::Clip(ClipSettings {
        clip: clip_base,
        looping: true,
    }));
    let overlay = builder.add_node(NodeSettings::Clip(ClipSettings {
        clip: clip_layer,
        looping: true,
    }));
    let layer_node = builder.add_node(NodeSettings::LayerBlend(LayerBlendSettings {
        base,
        layers: vec![LayerSettings {
            input: overlay,
            weight_node: None,
            mask_weights: Some(vec![1.0, 1.0, 0.0, 0.0]),
        }],
    }));
    builder.set_root_node(layer_node);
    let definition = builder.build().unwrap();

    let mut inst = GraphInstance::new(&definition, 1).unwrap();
    let result = step(&mut inst, DT);
    assert!(result.task.is_some());

    let ts = inst.task_system().unwrap();
    let masked = ts.tasks().iter().any(|task| {
        matches!(task, Task::Blend { mask: Some(mask), .. } if mask.weight(2) == 0.0)
    });
    assert!(masked, "layer blend carries the authored mask");
}

// Snapshots
// ---------------------------------------------------------------------

#[test]
fn snapshot_round_trip_is_bit_identical() {
    let graph = machine_graph(MachineSpec {
        clips: &[clip("A", 2.0, 1.0), clip("B", 1.0, 2.0)],
        rules: &[(0, 1, transition(0.5))],
    });

    let mut original = GraphInstance::new(&graph.definition, 1).unwrap();
    step(&mut original, DT);
    original.set_control_parameter(graph.parameters[0], true);
    step(&mut original, DT);
    original.execute_pre_physics_pose_tasks(Transform::identity());
    original.execute_post_physics_pose_tasks();

    // Mid-transition snapshot.
    let snapshot = original.record_state();

    let mut restored = GraphInstance::new(&graph.definition, 2).unwrap();
    restored.restore_state(&snapshot);

    for frame in 0..4 {
        let a = step(&mut original, DT);
        let b = step(&mut restored, DT);
        assert_eq!(a, b, "results diverge at frame {}", frame);
        assert_eq!(
            original.task_system().unwrap().tasks(),
            restored.task_system().unwrap().tasks(),
            "task graphs diverge at frame {}",
            frame
        );
        assert_eq!(
            original.sampled_events(),
            restored.sampled_events(),
            "events diverge at frame {}",
            frame
        );

        original.execute_pre_physics_pose_tasks(Transform::identity());
        original.execute_post_physics_pose_tasks();
        restored.execute_pre_physics_pose_tasks(Transform::identity());
        restored.execute_post_physics_pose_tasks();
        assert_eq!(original.get_pose(), restored.get_pose());
    }
}

#[test]
fn recording_captures_frame_inputs() {
    let graph = machine_graph(MachineSpec {
        clips: &[clip("A", 2.0, 0.0), clip("B", 1.0, 0.0)],
        rules: &[(0, 1, transition(0.5))],
    });
    let mut inst = GraphInstance::new(&graph.definition, 1).unwrap();

    inst.start_recording();
    step(&mut inst, DT);
    inst.set_control_parameter(graph.parameters[0], true);
    step(&mut inst, Seconds(0.2));
    let frames = inst.stop_recording();

    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].delta_time, DT);
    assert_eq!(frames[1].delta_time, Seconds(0.2));
    assert_eq!(
        frames[0].parameter_values,
        vec![animgraph_graph::GraphValue::Bool(false)]
    );
    assert_eq!(
        frames[1].parameter_values,
        vec![animgraph_graph::GraphValue::Bool(true)]
    );
}

//! Shared fixtures for the evaluator tests: a skeleton, a few clips and
//! builders for small state-machine graphs.
#![allow(dead_code)]

use std::sync::Arc;

use nalgebra::Vector3;

use animgraph_core::{
    AnimationClip, Percentage, Seconds, Skeleton, StringId, SyncTrack, Transform,
};
use animgraph_graph::{
    ClipSettings, GraphDefinition, GraphDefinitionBuilder, GraphValueType, NodeSettings,
    StateMachineSettings, StateMachineStateSettings, StateSettings, TransitionRule,
    TransitionSettings,
};
use animgraph_core::NodeIndex;
use animgraph_task::{Task, TaskSystem};

pub const DT: Seconds = Seconds(0.1);

pub fn skeleton() -> Arc<Skeleton> {
    Arc::new(Skeleton::new(StringId::new("biped"), 4))
}

pub fn clip(name: &str, duration: f32, displacement: f32) -> Arc<AnimationClip> {
    Arc::new(
        AnimationClip::new(StringId::new(name), Seconds(duration)).with_root_motion(
            Transform::from_translation(Vector3::new(displacement, 0.0, 0.0)),
        ),
    )
}

pub fn clip_with_track(
    name: &str,
    duration: f32,
    markers: &[(StringId, f32)],
) -> Arc<AnimationClip> {
    Arc::new(
        AnimationClip::new(StringId::new(name), Seconds(duration))
            .with_sync_track(SyncTrack::from_markers(markers)),
    )
}

/// Every sampled clip in registration order, as `(clip id, to)`.
pub fn sampled_clips(task_system: &TaskSystem) -> Vec<(StringId, f32)> {
    task_system
        .tasks()
        .iter()
        .filter_map(|task| match task {
            Task::SampleClip { clip, to, .. } => Some((clip.id, to.value())),
            _ => None,
        })
        .collect()
}

/// Blend-task weights in registration order.
pub fn blend_weights(task_system: &TaskSystem) -> Vec<f32> {
    task_system
        .tasks()
        .iter()
        .filter_map(|task| match task {
            Task::Blend { blend_weight, .. } => Some(*blend_weight),
            _ => None,
        })
        .collect()
}

pub fn has_cached_pose_read(task_system: &TaskSystem) -> bool {
    task_system
        .tasks()
        .iter()
        .any(|task| matches!(task, Task::CachedPoseRead { .. }))
}

pub fn has_cached_pose_write(task_system: &TaskSystem) -> bool {
    task_system
        .tasks()
        .iter()
        .any(|task| matches!(task, Task::CachedPoseWrite { .. }))
}

/// The graph of most tests: a boolean parameter per transition, one state
/// per clip, rules in declaration order.
pub struct MachineGraph {
    pub definition: Arc<GraphDefinition>,
    pub parameters: Vec<NodeIndex>,
    pub states: Vec<NodeIndex>,
}

pub struct MachineSpec<'a> {
    pub clips: &'a [Arc<AnimationClip>],
    /// `(source state, target state, settings)`; the parameter for rule
    /// `i` is `parameters[i]`.
    pub rules: &'a [(usize, usize, TransitionSettings)],
}

/// Assemble a one-machine graph. The transition settings' target is
/// filled in here so specs only name state indices.
pub fn machine_graph(spec: MachineSpec<'_>) -> MachineGraph {
    let mut builder = GraphDefinitionBuilder::new(StringId::new("test-graph"), skeleton());

    let parameters: Vec<NodeIndex> = (0..spec.rules.len())
        .map(|i| {
            builder.add_control_parameter(
                StringId::new(&format!("Trigger{}", i)),
                GraphValueType::Bool,
            )
        })
        .collect();

    let clip_nodes: Vec<NodeIndex> = spec
        .clips
        .iter()
        .map(|clip| {
            let handle = builder.add_clip(clip.clone());
            builder.add_node(NodeSettings::Clip(ClipSettings {
                clip: handle,
                looping: true,
            }))
        })
        .collect();

    let states: Vec<NodeIndex> = clip_nodes
        .iter()
        .map(|&child| {
            builder.add_node(NodeSettings::State(StateSettings {
                child: Some(child),
                ..StateSettings::default()
            }))
        })
        .collect();

    let transition_nodes: Vec<NodeIndex> = spec
        .rules
        .iter()
        .map(|(_, target, settings)| {
            let mut settings = settings.clone();
            settings.target_state_node = states[*target];
            builder.add_node(NodeSettings::Transition(settings))
        })
        .collect();

    let machine_states = (0..spec.clips.len())
        .map(|state| StateMachineStateSettings {
            state_node: states[state],
            transitions: spec
                .rules
                .iter()
                .enumerate()
                .filter(|(_, (source, _, _))| *source == state)
                .map(|(rule_idx, (_, target, _))| TransitionRule {
                    target_state: *target as u16,
                    condition: Some(parameters[rule_idx]),
                    transition_node: transition_nodes[rule_idx],
                })
                .collect(),
        })
        .collect();

    let machine = builder.add_node(NodeSettings::StateMachine(StateMachineSettings {
        states: machine_states,
        default_state: 0,
    }));
    builder.set_root_node(machine);

    MachineGraph {
        definition: builder.build().expect("test definition is well-formed"),
        parameters,
        states,
    }
}

/// Placeholder target for `TransitionSettings::new` in specs; rewired by
/// `machine_graph`.
pub fn transition(duration: f32) -> TransitionSettings {
    TransitionSettings::new(NodeIndex(0), Seconds(duration))
}

pub fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-4
}

pub fn percentage(p: f32) -> Percentage {
    Percentage(p)
}

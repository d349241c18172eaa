//! The immutable graph definition and its builder.
//!
//! A definition is the compiler's output: a flat vector of per-node
//! settings in construction order, the declared instance-memory layout,
//! the control-parameter prefix, external-slot and child-graph tables and
//! the shared resources (skeleton, clips). Instantiation validates the
//! declared layout against the runtime's and refuses the definition on any
//! mismatch.

use std::{mem, sync::Arc};

use bitflags::bitflags;

use animgraph_core::{
    AnimationClip, NodeIndex, RootMotionBlendMode, Seconds, Skeleton, StringId,
};

use crate::{
    error::DefinitionError,
    node::{EasingOperation, GraphValue, GraphValueType, RuntimeNode},
};

/// Mode of a cached value node, relative to its enclosing state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum CachedValueMode {
    /// Snapshot the upstream value when the state activates.
    OnEntry,
    /// Freeze the last live value when the state deactivates.
    OnExit,
}

bitflags! {
    /// Authored behaviour switches of a transition.
    #[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
    pub struct TransitionFlags: u16 {
        const SYNCHRONIZED = 0x01;
        const CLAMP_DURATION = 0x02;
        const MATCH_SOURCE_TIME = 0x04;
        const MATCH_SYNC_EVENT_INDEX = 0x08;
        const MATCH_SYNC_EVENT_ID = 0x10;
        const MATCH_SYNC_EVENT_PERCENTAGE = 0x20;
        const FORCED_TRANSITION_ALLOWED = 0x40;
    }
}

impl Default for TransitionFlags {
    fn default() -> Self {
        TransitionFlags::empty()
    }
}

#[derive(Clone, Debug)]
pub struct ControlParameterSettings {
    pub parameter_id: StringId,
    pub value_type: GraphValueType,
}

#[derive(Clone, Debug)]
pub struct ConstValueSettings {
    pub value: GraphValue,
}

#[derive(Clone, Debug)]
pub struct CachedValueSettings {
    pub source: NodeIndex,
    pub mode: CachedValueMode,
}

#[derive(Clone, Debug)]
pub struct ClipSettings {
    /// Index into the definition's clip table.
    pub clip: u16,
    pub looping: bool,
}

#[derive(Clone, Debug)]
pub struct ReferencePoseSettings;

#[derive(Clone, Debug, Default)]
pub struct StateSettings {
    /// The wrapped blend tree; off states may have none.
    pub child: Option<NodeIndex>,
    /// Sampled while the state is transitioning in.
    pub entry_events: Vec<StringId>,
    /// Sampled while the state is fully active.
    pub execute_events: Vec<StringId>,
    /// Sampled once the state starts transitioning out.
    pub exit_events: Vec<StringId>,
    /// Value nodes whose lifecycle follows this state (cached values).
    pub owned_value_nodes: Vec<NodeIndex>,
    /// Off states contribute nothing and are treated specially by
    /// layer-mask selection.
    pub is_off_state: bool,
}

/// One authored transition rule out of a state.
#[derive(Clone, Debug)]
pub struct TransitionRule {
    /// Index into the state machine's state table.
    pub target_state: u16,
    /// Bool value node gating the rule; `None` never fires.
    pub condition: Option<NodeIndex>,
    /// The dedicated transition node carrying out the rule.
    pub transition_node: NodeIndex,
}

#[derive(Clone, Debug)]
pub struct StateMachineStateSettings {
    pub state_node: NodeIndex,
    pub transitions: Vec<TransitionRule>,
}

#[derive(Clone, Debug)]
pub struct StateMachineSettings {
    pub states: Vec<StateMachineStateSettings>,
    pub default_state: u16,
}

#[derive(Clone, Debug)]
pub struct TransitionSettings {
    pub target_state_node: NodeIndex,
    /// Default transition length in seconds; a clamped synchronized
    /// transition re-expresses it as event-distance at start.
    pub duration: Seconds,
    pub sync_event_offset: f32,
    pub flags: TransitionFlags,
    pub root_motion_blend: RootMotionBlendMode,
    pub easing: EasingOperation,
    /// Optional runtime overrides.
    pub duration_override: Option<NodeIndex>,
    pub sync_event_offset_override: Option<NodeIndex>,
}

impl TransitionSettings {
    pub fn new(target_state_node: NodeIndex, duration: Seconds) -> TransitionSettings {
        TransitionSettings {
            target_state_node,
            duration,
            sync_event_offset: 0.0,
            flags: TransitionFlags::empty(),
            root_motion_blend: RootMotionBlendMode::Blend,
            easing: EasingOperation::Linear,
            duration_override: None,
            sync_event_offset_override: None,
        }
    }

    pub fn is_synchronized(&self) -> bool {
        self.flags.contains(TransitionFlags::SYNCHRONIZED)
    }

    pub fn should_clamp_duration(&self) -> bool {
        self.flags.contains(TransitionFlags::CLAMP_DURATION)
    }

    pub fn should_match_source_time(&self) -> bool {
        self.flags.contains(TransitionFlags::MATCH_SOURCE_TIME)
    }

    pub fn should_match_sync_event_index(&self) -> bool {
        self.flags.contains(TransitionFlags::MATCH_SYNC_EVENT_INDEX)
    }

    pub fn should_match_sync_event_id(&self) -> bool {
        self.flags.contains(TransitionFlags::MATCH_SYNC_EVENT_ID)
    }

    pub fn should_match_sync_event_percentage(&self) -> bool {
        self.flags
            .contains(TransitionFlags::MATCH_SYNC_EVENT_PERCENTAGE)
    }

    pub fn is_forced_transition_allowed(&self) -> bool {
        self.flags.contains(TransitionFlags::FORCED_TRANSITION_ALLOWED)
    }
}

#[derive(Clone, Debug)]
pub struct LayerSettings {
    pub input: NodeIndex,
    /// Float value node scaling the layer; defaults to full weight.
    pub weight_node: Option<NodeIndex>,
    /// Authored bone-mask weights seeding the layer's mask.
    pub mask_weights: Option<Vec<f32>>,
}

#[derive(Clone, Debug)]
pub struct LayerBlendSettings {
    pub base: NodeIndex,
    pub layers: Vec<LayerSettings>,
}

#[derive(Clone, Debug)]
pub struct ExternalGraphSlotSettings {
    pub slot_id: StringId,
}

#[derive(Clone, Debug)]
pub struct ChildGraphSettings {
    /// Index into the definition's child-graph table.
    pub child_graph: u16,
}

/// One settings record per node, in construction order.
#[derive(Clone, Debug)]
pub enum NodeSettings {
    ControlParameter(ControlParameterSettings),
    ConstValue(ConstValueSettings),
    CachedValue(CachedValueSettings),
    Clip(ClipSettings),
    ReferencePose(ReferencePoseSettings),
    State(StateSettings),
    StateMachine(StateMachineSettings),
    Transition(TransitionSettings),
    LayerBlend(LayerBlendSettings),
    ExternalGraphSlot(ExternalGraphSlotSettings),
    ChildGraph(ChildGraphSettings),
}

impl NodeSettings {
    pub fn is_pose_node(&self) -> bool {
        match self {
            NodeSettings::ControlParameter(_)
            | NodeSettings::ConstValue(_)
            | NodeSettings::CachedValue(_) => false,
            _ => true,
        }
    }
}

/// Immutable, shared between every instance created from it.
#[derive(Debug)]
pub struct GraphDefinition {
    id: StringId,
    skeleton: Arc<Skeleton>,
    settings: Vec<NodeSettings>,
    instance_arena_size: usize,
    node_offsets: Vec<usize>,
    control_parameter_ids: Vec<StringId>,
    external_slots: Vec<(StringId, NodeIndex)>,
    child_graphs: Vec<Arc<GraphDefinition>>,
    clips: Vec<Arc<AnimationClip>>,
    root_node: NodeIndex,
}

impl GraphDefinition {
    /// The stride and alignment one arena slot occupies at runtime. The
    /// compiler-side builder derives the declared layout from this.
    pub fn node_memory_layout() -> (usize, usize) {
        (mem::size_of::<RuntimeNode>(), mem::align_of::<RuntimeNode>())
    }

    pub fn id(&self) -> StringId {
        self.id
    }

    pub fn skeleton(&self) -> &Arc<Skeleton> {
        &self.skeleton
    }

    pub fn node_count(&self) -> usize {
        self.settings.len()
    }

    pub fn settings(&self, node: NodeIndex) -> &NodeSettings {
        &self.settings[node.index()]
    }

    pub fn all_settings(&self) -> &[NodeSettings] {
        &self.settings
    }

    pub fn instance_arena_size(&self) -> usize {
        self.instance_arena_size
    }

    pub fn node_offset(&self, node: NodeIndex) -> usize {
        self.node_offsets[node.index()]
    }

    pub fn num_control_parameters(&self) -> usize {
        self.control_parameter_ids.len()
    }

    pub fn control_parameter_id(&self, parameter: NodeIndex) -> StringId {
        debug_assert!(self.is_control_parameter(parameter));
        self.control_parameter_ids[parameter.index()]
    }

    pub fn control_parameter_index(&self, parameter_id: StringId) -> Option<NodeIndex> {
        self.control_parameter_ids
            .iter()
            .position(|&id| id == parameter_id)
            .map(|idx| NodeIndex(idx as u16))
    }

    pub fn is_control_parameter(&self, node: NodeIndex) -> bool {
        node.index() < self.control_parameter_ids.len()
    }

    pub fn external_slots(&self) -> &[(StringId, NodeIndex)] {
        &self.external_slots
    }

    pub fn external_slot_node(&self, slot_id: StringId) -> Option<NodeIndex> {
        self.external_slots
            .iter()
            .find(|(id, _)| *id == slot_id)
            .map(|&(_, node)| node)
    }

    pub fn child_graph(&self, index: u16) -> &Arc<GraphDefinition> {
        &self.child_graphs[index as usize]
    }

    pub fn clip(&self, index: u16) -> &Arc<AnimationClip> {
        &self.clips[index as usize]
    }

    pub fn root_node(&self) -> NodeIndex {
        self.root_node
    }

    pub fn state_settings(&self, node: NodeIndex) -> &StateSettings {
        match self.settings(node) {
            NodeSettings::State(s) => s,
            other => panic!("node {} is not a state: {:?}", node, other),
        }
    }

    pub fn state_machine_settings(&self, node: NodeIndex) -> &StateMachineSettings {
        match self.settings(node) {
            NodeSettings::StateMachine(s) => s,
            other => panic!("node {} is not a state machine: {:?}", node, other),
        }
    }

    pub fn transition_settings(&self, node: NodeIndex) -> &TransitionSettings {
        match self.settings(node) {
            NodeSettings::Transition(s) => s,
            other => panic!("node {} is not a transition: {:?}", node, other),
        }
    }
}

/// Compiler-side assembly of a [`GraphDefinition`]. Control parameters
/// must be added before any other node so the parameter prefix invariant
/// holds; `build` validates every cross-reference and computes the
/// declared memory layout.
#[derive(Debug)]
pub struct GraphDefinitionBuilder {
    id: StringId,
    skeleton: Arc<Skeleton>,
    settings: Vec<NodeSettings>,
    control_parameter_ids: Vec<StringId>,
    child_graphs: Vec<Arc<GraphDefinition>>,
    clips: Vec<Arc<AnimationClip>>,
    root_node: Option<NodeIndex>,
}

impl GraphDefinitionBuilder {
    pub fn new(id: StringId, skeleton: Arc<Skeleton>) -> GraphDefinitionBuilder {
        GraphDefinitionBuilder {
            id,
            skeleton,
            settings: Vec::new(),
            control_parameter_ids: Vec::new(),
            child_graphs: Vec::new(),
            clips: Vec::new(),
            root_node: None,
        }
    }

    pub fn add_clip(&mut self, clip: Arc<AnimationClip>) -> u16 {
        debug_assert!(self.clips.len() < u16::max_value() as usize);
        self.clips.push(clip);
        (self.clips.len() - 1) as u16
    }

    pub fn add_child_graph(&mut self, definition: Arc<GraphDefinition>) -> u16 {
        debug_assert!(self.child_graphs.len() < u16::max_value() as usize);
        self.child_graphs.push(definition);
        (self.child_graphs.len() - 1) as u16
    }

    pub fn add_control_parameter(
        &mut self,
        parameter_id: StringId,
        value_type: GraphValueType,
    ) -> NodeIndex {
        debug_assert!(
            self.settings.len() == self.control_parameter_ids.len(),
            "control parameters must be declared before other nodes"
        );
        self.control_parameter_ids.push(parameter_id);
        self.add_node(NodeSettings::ControlParameter(ControlParameterSettings {
            parameter_id,
            value_type,
        }))
    }

    pub fn add_node(&mut self, settings: NodeSettings) -> NodeIndex {
        debug_assert!(self.settings.len() < u16::max_value() as usize);
        let idx = NodeIndex(self.settings.len() as u16);
        self.settings.push(settings);
        idx
    }

    pub fn set_root_node(&mut self, root: NodeIndex) {
        self.root_node = Some(root);
    }

    pub fn build(self) -> Result<Arc<GraphDefinition>, DefinitionError> {
        let (stride, _align) = GraphDefinition::node_memory_layout();
        let node_offsets: Vec<usize> = (0..self.settings.len()).map(|i| i * stride).collect();
        let instance_arena_size = self.settings.len() * stride;

        let mut external_slots = Vec::new();
        for (idx, settings) in self.settings.iter().enumerate() {
            if let NodeSettings::ExternalGraphSlot(slot) = settings {
                external_slots.push((slot.slot_id, NodeIndex(idx as u16)));
            }
        }

        let definition = GraphDefinition {
            id: self.id,
            skeleton: self.skeleton,
            settings: self.settings,
            instance_arena_size,
            node_offsets,
            control_parameter_ids: self.control_parameter_ids,
            external_slots,
            child_graphs: self.child_graphs,
            clips: self.clips,
            root_node: self.root_node.ok_or(DefinitionError::MissingRootNode)?,
        };
        definition.validate()?;
        Ok(Arc::new(definition))
    }
}

impl GraphDefinition {
    fn check_child(
        &self,
        node: NodeIndex,
        child: NodeIndex,
        want_pose: bool,
    ) -> Result<(), DefinitionError> {
        let child_settings = self
            .settings
            .get(child.index())
            .ok_or(DefinitionError::UnresolvedChildIndex {
                node,
                child: child.0,
            })?;
        if child_settings.is_pose_node() != want_pose {
            return Err(DefinitionError::ChildCapabilityMismatch {
                node,
                child,
                expected: if want_pose { "pose" } else { "value" },
            });
        }
        Ok(())
    }

    /// The transition engine drives state-specific hooks on these
    /// children; anything else in the slot is a malformed definition.
    fn check_state_child(&self, node: NodeIndex, child: NodeIndex) -> Result<(), DefinitionError> {
        match self.settings.get(child.index()) {
            None => Err(DefinitionError::UnresolvedChildIndex {
                node,
                child: child.0,
            }),
            Some(NodeSettings::State(_)) => Ok(()),
            Some(_) => Err(DefinitionError::ChildCapabilityMismatch {
                node,
                child,
                expected: "state",
            }),
        }
    }

    fn validate(&self) -> Result<(), DefinitionError> {
        // Parameter prefix.
        for idx in 0..self.control_parameter_ids.len() {
            let node = NodeIndex(idx as u16);
            match self.settings.get(idx) {
                Some(NodeSettings::ControlParameter(_)) => {}
                _ => {
                    return Err(DefinitionError::MalformedParameterPrefix {
                        node,
                        prefix: self.control_parameter_ids.len(),
                    });
                }
            }
        }

        for (idx, settings) in self.settings.iter().enumerate() {
            let node = NodeIndex(idx as u16);
            match settings {
                NodeSettings::ControlParameter(_)
                | NodeSettings::ConstValue(_)
                | NodeSettings::ReferencePose(_) => {}
                NodeSettings::CachedValue(s) => self.check_child(node, s.source, false)?,
                NodeSettings::Clip(s) => {
                    if self.clips.get(s.clip as usize).is_none() {
                        return Err(DefinitionError::MissingClip { node, clip: s.clip });
                    }
                }
                NodeSettings::State(s) => {
                    if let Some(child) = s.child {
                        self.check_child(node, child, true)?;
                    }
                    for &value in &s.owned_value_nodes {
                        self.check_child(node, value, false)?;
                    }
                }
                NodeSettings::StateMachine(s) => {
                    if s.states.get(s.default_state as usize).is_none() {
                        return Err(DefinitionError::MissingState {
                            node,
                            state: s.default_state,
                        });
                    }
                    for state in &s.states {
                        self.check_state_child(node, state.state_node)?;
                        for rule in &state.transitions {
                            if s.states.get(rule.target_state as usize).is_none() {
                                return Err(DefinitionError::MissingState {
                                    node,
                                    state: rule.target_state,
                                });
                            }
                            if let Some(condition) = rule.condition {
                                self.check_child(node, condition, false)?;
                            }
                            self.check_child(node, rule.transition_node, true)?;
                            match self.settings.get(rule.transition_node.index()) {
                                Some(NodeSettings::Transition(t))
                                    if t.target_state_node
                                        == s.states[rule.target_state as usize].state_node => {}
                                _ => {
                                    return Err(DefinitionError::TransitionTargetMismatch {
                                        node,
                                        transition: rule.transition_node,
                                    });
                                }
                            }
                        }
                    }
                }
                NodeSettings::Transition(s) => {
                    self.check_state_child(node, s.target_state_node)?;
                    if let Some(duration) = s.duration_override {
                        self.check_child(node, duration, false)?;
                    }
                    if let Some(offset) = s.sync_event_offset_override {
                        self.check_child(node, offset, false)?;
                    }
                }
                NodeSettings::LayerBlend(s) => {
                    self.check_child(node, s.base, true)?;
                    for layer in &s.layers {
                        self.check_child(node, layer.input, true)?;
                        if let Some(weight) = layer.weight_node {
                            self.check_child(node, weight, false)?;
                        }
                    }
                }
                NodeSettings::ExternalGraphSlot(_) => {}
                NodeSettings::ChildGraph(s) => {
                    if self.child_graphs.get(s.child_graph as usize).is_none() {
                        return Err(DefinitionError::MissingChildGraph {
                            node,
                            graph: s.child_graph,
                        });
                    }
                }
            }
        }

        if !self
            .settings
            .get(self.root_node.index())
            .map(NodeSettings::is_pose_node)
            .unwrap_or(false)
        {
            return Err(DefinitionError::MissingRootNode);
        }
        Ok(())
    }
}

//! The instance arena: one contiguous slab of runtime nodes addressed by
//! 16-bit index.
//!
//! While a node runs its own update it is taken out of its slot, leaving
//! `Vacant` behind; children are then reached through the arena without
//! aliasing. Taking a vacant slot means a node re-entered itself, which
//! the authoring model makes impossible, so it asserts.

use std::{mem, sync::Arc};

use smallvec::SmallVec;

use animgraph_core::{NodeIndex, SyncTrackTime, SyncTrackTimeRange};
use animgraph_task::CachedPoseBufferId;

use crate::{
    context::GraphContext,
    debug::PoseNodeDebugInfo,
    definition::{GraphDefinition, NodeSettings},
    error::DefinitionError,
    instance::GraphInstance,
    node::{
        CachedValueNode, ChildGraphNode, ClipNode, ConstValueNode, ControlParameterNode,
        GraphValue, GraphValueConvert, LayerBlendNode, PoseNodeResult, ReferencePoseNode,
        RuntimeNode, StateMachineNode, StateNode, TransitionNode, TransitionState,
    },
};

#[derive(Debug)]
pub struct NodeArena {
    nodes: Box<[RuntimeNode]>,
}

impl NodeArena {
    /// Materialize the runtime network. The definition's declared memory
    /// layout must agree with the runtime's; any mismatch or unresolved
    /// reference refuses the whole instance.
    pub fn instantiate(definition: &Arc<GraphDefinition>) -> Result<NodeArena, DefinitionError> {
        let (stride, _align) = GraphDefinition::node_memory_layout();
        let required = definition.node_count() * stride;
        if definition.instance_arena_size() != required {
            return Err(DefinitionError::ArenaSizeMismatch {
                declared: definition.instance_arena_size(),
                required,
            });
        }
        for idx in 0..definition.node_count() {
            let node = NodeIndex(idx as u16);
            let declared = definition.node_offset(node);
            if declared != idx * stride {
                return Err(DefinitionError::NodeOffsetMismatch {
                    node,
                    declared,
                    required: idx * stride,
                });
            }
        }

        let mut nodes = Vec::with_capacity(definition.node_count());
        for (idx, settings) in definition.all_settings().iter().enumerate() {
            let node_idx = NodeIndex(idx as u16);
            let node = match settings {
                NodeSettings::ControlParameter(s) => {
                    RuntimeNode::ControlParameter(ControlParameterNode::new(node_idx, s))
                }
                NodeSettings::ConstValue(s) => {
                    RuntimeNode::ConstValue(ConstValueNode::new(node_idx, s))
                }
                NodeSettings::CachedValue(s) => {
                    RuntimeNode::CachedValue(CachedValueNode::new(node_idx, s))
                }
                NodeSettings::Clip(s) => RuntimeNode::Clip(ClipNode::new(
                    node_idx,
                    definition.clip(s.clip).clone(),
                    s.looping,
                )),
                NodeSettings::ReferencePose(_) => {
                    RuntimeNode::ReferencePose(ReferencePoseNode::new(node_idx))
                }
                NodeSettings::State(s) => RuntimeNode::State(StateNode::new(node_idx, s)),
                NodeSettings::StateMachine(s) => {
                    RuntimeNode::StateMachine(StateMachineNode::new(node_idx, s))
                }
                NodeSettings::Transition(s) => {
                    RuntimeNode::Transition(TransitionNode::new(node_idx, s))
                }
                NodeSettings::LayerBlend(s) => {
                    RuntimeNode::LayerBlend(LayerBlendNode::new(node_idx, s))
                }
                NodeSettings::ExternalGraphSlot(s) => {
                    RuntimeNode::ExternalGraphSlot(crate::node::ExternalGraphSlotNode::new(
                        node_idx, s.slot_id,
                    ))
                }
                NodeSettings::ChildGraph(s) => RuntimeNode::ChildGraph(ChildGraphNode::new(
                    node_idx,
                    GraphInstance::new_nested(definition.child_graph(s.child_graph))?,
                )),
            };
            nodes.push(node);
        }

        Ok(NodeArena {
            nodes: nodes.into_boxed_slice(),
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, idx: NodeIndex) -> &RuntimeNode {
        let node = &self.nodes[idx.index()];
        debug_assert!(
            !matches!(node, RuntimeNode::Vacant),
            "node {} read while vacated",
            idx
        );
        node
    }

    pub fn node_mut(&mut self, idx: NodeIndex) -> &mut RuntimeNode {
        let node = &mut self.nodes[idx.index()];
        debug_assert!(
            !matches!(node, RuntimeNode::Vacant),
            "node {} borrowed while vacated",
            idx
        );
        node
    }

    fn take(&mut self, idx: NodeIndex) -> RuntimeNode {
        let node = mem::replace(&mut self.nodes[idx.index()], RuntimeNode::Vacant);
        assert!(
            !matches!(node, RuntimeNode::Vacant),
            "runtime cycle: node {} re-entered during its own update",
            idx
        );
        node
    }

    fn restore(&mut self, idx: NodeIndex, node: RuntimeNode) {
        debug_assert!(matches!(self.nodes[idx.index()], RuntimeNode::Vacant));
        self.nodes[idx.index()] = node;
    }

    // Typed accessors
    // -----------------------------------------------------------------

    pub fn transition(&self, idx: NodeIndex) -> &TransitionNode {
        match self.node(idx) {
            RuntimeNode::Transition(t) => t,
            other => panic!("node {} is not a transition: {:?}", idx, other),
        }
    }

    pub fn transition_mut(&mut self, idx: NodeIndex) -> &mut TransitionNode {
        match self.node_mut(idx) {
            RuntimeNode::Transition(t) => t,
            _ => panic!("node {} is not a transition", idx),
        }
    }

    pub fn pose_debug_info(&self, idx: NodeIndex) -> Option<PoseNodeDebugInfo> {
        self.node(idx).pose_data().map(|data| PoseNodeDebugInfo {
            previous_time: data.previous_time,
            current_time: data.current_time,
            duration: data.duration,
        })
    }

    // Lifecycle dispatch
    // -----------------------------------------------------------------

    pub fn initialize_pose(
        &mut self,
        ctx: &mut GraphContext<'_>,
        idx: NodeIndex,
        initial_time: SyncTrackTime,
    ) {
        let mut node = self.take(idx);
        match &mut node {
            RuntimeNode::Clip(n) => n.initialize(ctx, initial_time),
            RuntimeNode::ReferencePose(n) => n.initialize(ctx, initial_time),
            RuntimeNode::State(n) => n.initialize(self, ctx, initial_time),
            RuntimeNode::StateMachine(n) => n.initialize(self, ctx, initial_time),
            RuntimeNode::LayerBlend(n) => n.initialize(self, ctx, initial_time),
            RuntimeNode::ExternalGraphSlot(n) => n.initialize(ctx, initial_time),
            RuntimeNode::ChildGraph(n) => n.initialize(ctx, initial_time),
            RuntimeNode::Transition(_) => {
                debug_assert!(false, "transitions are started by their state machine")
            }
            _ => debug_assert!(false, "initialize_pose on value node {}", idx),
        }
        self.restore(idx, node);
    }

    pub fn initialize_value(&mut self, ctx: &mut GraphContext<'_>, idx: NodeIndex) {
        let mut node = self.take(idx);
        match &mut node {
            RuntimeNode::ControlParameter(n) => n.data.initialize(),
            RuntimeNode::ConstValue(n) => n.data.initialize(),
            RuntimeNode::CachedValue(n) => n.initialize(self, ctx),
            _ => debug_assert!(false, "initialize_value on pose node {}", idx),
        }
        self.restore(idx, node);
    }

    pub fn shutdown_node(&mut self, ctx: &mut GraphContext<'_>, idx: NodeIndex) {
        let mut node = self.take(idx);
        match &mut node {
            RuntimeNode::ControlParameter(n) => n.data.shutdown(),
            RuntimeNode::ConstValue(n) => n.data.shutdown(),
            RuntimeNode::CachedValue(n) => n.shutdown(self, ctx),
            RuntimeNode::Clip(n) => n.shutdown(ctx),
            RuntimeNode::ReferencePose(n) => n.shutdown(ctx),
            RuntimeNode::State(n) => n.shutdown(self, ctx),
            RuntimeNode::StateMachine(n) => n.shutdown(self, ctx),
            RuntimeNode::Transition(n) => n.shutdown(self, ctx),
            RuntimeNode::LayerBlend(n) => n.shutdown(self, ctx),
            RuntimeNode::ExternalGraphSlot(n) => n.shutdown(ctx),
            RuntimeNode::ChildGraph(n) => n.shutdown(ctx),
            RuntimeNode::Vacant => unreachable!(),
        }
        self.restore(idx, node);
    }

    // Evaluation dispatch
    // -----------------------------------------------------------------

    pub fn update_pose(&mut self, ctx: &mut GraphContext<'_>, idx: NodeIndex) -> PoseNodeResult {
        let mut node = self.take(idx);
        let result = match &mut node {
            RuntimeNode::Clip(n) => n.update(ctx),
            RuntimeNode::ReferencePose(n) => n.update(ctx),
            RuntimeNode::State(n) => n.update(self, ctx, None),
            RuntimeNode::StateMachine(n) => n.update(self, ctx, None),
            RuntimeNode::Transition(n) => n.update(self, ctx),
            RuntimeNode::LayerBlend(n) => n.update(self, ctx, None),
            RuntimeNode::ExternalGraphSlot(n) => n.update(ctx, None),
            RuntimeNode::ChildGraph(n) => n.update(ctx, None),
            _ => {
                debug_assert!(false, "update_pose on value node {}", idx);
                PoseNodeResult::empty_at(ctx.sampled_events.mark())
            }
        };
        self.restore(idx, node);
        result
    }

    pub fn update_pose_ranged(
        &mut self,
        ctx: &mut GraphContext<'_>,
        idx: NodeIndex,
        update_range: &SyncTrackTimeRange,
    ) -> PoseNodeResult {
        let mut node = self.take(idx);
        let result = match &mut node {
            RuntimeNode::Clip(n) => n.update_ranged(ctx, update_range),
            RuntimeNode::ReferencePose(n) => n.update(ctx),
            RuntimeNode::State(n) => n.update(self, ctx, Some(update_range)),
            RuntimeNode::StateMachine(n) => n.update(self, ctx, Some(update_range)),
            RuntimeNode::Transition(n) => n.update_ranged(self, ctx, update_range),
            RuntimeNode::LayerBlend(n) => n.update(self, ctx, Some(update_range)),
            RuntimeNode::ExternalGraphSlot(n) => n.update(ctx, Some(update_range)),
            RuntimeNode::ChildGraph(n) => n.update(ctx, Some(update_range)),
            _ => {
                debug_assert!(false, "update_pose on value node {}", idx);
                PoseNodeResult::empty_at(ctx.sampled_events.mark())
            }
        };
        self.restore(idx, node);
        result
    }

    pub fn value(&mut self, ctx: &mut GraphContext<'_>, idx: NodeIndex) -> GraphValue {
        let mut node = self.take(idx);
        let value = match &mut node {
            RuntimeNode::ControlParameter(n) => n.value(ctx),
            RuntimeNode::ConstValue(n) => n.value(ctx),
            RuntimeNode::CachedValue(n) => n.value(self, ctx),
            _ => {
                debug_assert!(false, "value read on pose node {}", idx);
                GraphValue::Float(0.0)
            }
        };
        self.restore(idx, node);
        value
    }

    /// Typed value read; a type mismatch is a programmer error, asserted
    /// in development and yielding the default in release.
    pub fn value_as<T: GraphValueConvert>(
        &mut self,
        ctx: &mut GraphContext<'_>,
        idx: NodeIndex,
    ) -> T {
        let value = self.value(ctx, idx);
        match T::from_value(value) {
            Some(v) => v,
            None => {
                debug_assert!(
                    false,
                    "node {} read as {:?} but holds {:?}",
                    idx,
                    T::TYPE,
                    value.value_type()
                );
                T::default_value()
            }
        }
    }

    /// Start a transition node from a state source. The node is taken out
    /// of its slot for the whole start, like any update.
    pub fn start_transition_from_state(
        &mut self,
        ctx: &mut GraphContext<'_>,
        transition_idx: NodeIndex,
        options: crate::node::transition::TransitionInitOptions,
        source_state: NodeIndex,
    ) -> PoseNodeResult {
        let mut node = self.take(transition_idx);
        let result = match &mut node {
            RuntimeNode::Transition(t) => t.start_from_state(self, ctx, options, source_state),
            _ => {
                debug_assert!(false, "node {} is not a transition", transition_idx);
                PoseNodeResult::empty_at(ctx.sampled_events.mark())
            }
        };
        self.restore(transition_idx, node);
        result
    }

    /// Start a transition node whose source is an in-flight transition.
    pub fn start_transition_from_transition(
        &mut self,
        ctx: &mut GraphContext<'_>,
        transition_idx: NodeIndex,
        options: crate::node::transition::TransitionInitOptions,
        source_transition: NodeIndex,
        forced: bool,
    ) -> PoseNodeResult {
        let mut node = self.take(transition_idx);
        let result = match &mut node {
            RuntimeNode::Transition(t) => {
                t.start_from_transition(self, ctx, options, source_transition, forced)
            }
            _ => {
                debug_assert!(false, "node {} is not a transition", transition_idx);
                PoseNodeResult::empty_at(ctx.sampled_events.mark())
            }
        };
        self.restore(transition_idx, node);
        result
    }

    // State helpers used by the transition engine
    // -----------------------------------------------------------------

    pub fn state_start_transition_in(&mut self, idx: NodeIndex) {
        match self.node_mut(idx) {
            RuntimeNode::State(s) => s.start_transition_in(),
            _ => debug_assert!(false, "node {} is not a state", idx),
        }
    }

    pub fn state_start_transition_out(&mut self, ctx: &mut GraphContext<'_>, idx: NodeIndex) {
        match self.node_mut(idx) {
            RuntimeNode::State(s) => s.start_transition_out(ctx),
            _ => debug_assert!(false, "node {} is not a state", idx),
        }
    }

    pub fn set_state_transition_state(&mut self, idx: NodeIndex, state: TransitionState) {
        match self.node_mut(idx) {
            RuntimeNode::State(s) => s.set_transitioning_state(state),
            _ => debug_assert!(false, "node {} is not a state", idx),
        }
    }

    /// Walk a transition chain collecting every cached-pose buffer it
    /// owns, clearing the sources. The forced-transition path is the only
    /// caller; this is the ownership transfer of spec lore.
    pub fn transfer_additional_pose_buffers(
        &mut self,
        from: NodeIndex,
        out: &mut SmallVec<[CachedPoseBufferId; 2]>,
    ) {
        let mut cursor = Some(from);
        while let Some(idx) = cursor {
            let transition = self.transition_mut(idx);
            if let Some(buffer) = transition.cached_pose_buffer.take() {
                out.push(buffer);
            }
            if let Some(buffer) = transition.source_cached_pose_buffer.take() {
                out.push(buffer);
            }
            out.extend(transition.inherited_cached_pose_buffers.drain());
            cursor = transition.source_transition_index();
        }
    }
}

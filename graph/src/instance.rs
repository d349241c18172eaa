//! The per-character graph instance: the frame driver.
//!
//! An instance owns the node arena built from its definition, the frame
//! context state (sampled events, bone-mask pool) and — for root
//! instances — the task system. Nested instances (child graphs, external
//! slots) share the root's task system and are driven by their wrapping
//! node instead of the host.

use std::sync::Arc;

use animgraph_core::{
    Percentage, Pose, SampledEventsBuffer, Seconds, StringId, SyncTrack, SyncTrackTime,
    SyncTrackTimeRange, Transform,
};
use animgraph_core::{BoneMaskPool, NodeIndex};
use animgraph_task::TaskSystem;

use crate::{
    arena::NodeArena,
    context::{BranchState, GraphContext, PhysicsScene},
    debug::GraphDebugState,
    definition::GraphDefinition,
    error::{DefinitionError, ExternalGraphError},
    node::{GraphValue, GraphValueConvert, PoseNodeResult, RuntimeNode},
    recording::RecordedFrameData,
};

#[cfg(feature = "development-tools")]
use crate::{
    debug::{GraphLogEntry, PoseNodeDebugInfo, RootMotionDebugger},
    recording::RecordedGraphState,
};

/// Book-keeping for one filled external slot.
#[derive(Clone, Debug)]
pub struct ConnectedExternalGraph {
    pub slot_id: StringId,
    pub node_idx: NodeIndex,
}

pub struct GraphInstance {
    definition: Arc<GraphDefinition>,
    nodes: NodeArena,
    /// `None` for nested instances; they register into the root's.
    task_system: Option<TaskSystem>,
    owner_id: u64,
    frame_id: u64,
    sampled_events: SampledEventsBuffer,
    bone_mask_pool: BoneMaskPool,
    external_graphs: Vec<ConnectedExternalGraph>,
    debug: GraphDebugState,
    recording: Option<Vec<RecordedFrameData>>,
}

impl GraphInstance {
    /// Build a root instance. Infallible for a well-formed definition;
    /// a definition whose declared layout disagrees with the runtime is
    /// refused.
    pub fn new(
        definition: &Arc<GraphDefinition>,
        owner_id: u64,
    ) -> Result<GraphInstance, DefinitionError> {
        let nodes = NodeArena::instantiate(definition)?;
        Ok(GraphInstance {
            definition: definition.clone(),
            nodes,
            task_system: Some(TaskSystem::new(definition.skeleton().clone())),
            owner_id,
            frame_id: 0,
            sampled_events: SampledEventsBuffer::new(),
            bone_mask_pool: BoneMaskPool::new(definition.skeleton()),
            external_graphs: Vec::new(),
            debug: GraphDebugState::default(),
            recording: None,
        })
    }

    /// Build a nested instance sharing the root's task system.
    pub(crate) fn new_nested(
        definition: &Arc<GraphDefinition>,
    ) -> Result<GraphInstance, DefinitionError> {
        let nodes = NodeArena::instantiate(definition)?;
        Ok(GraphInstance {
            definition: definition.clone(),
            nodes,
            task_system: None,
            owner_id: 0,
            frame_id: 0,
            sampled_events: SampledEventsBuffer::new(),
            bone_mask_pool: BoneMaskPool::new(definition.skeleton()),
            external_graphs: Vec::new(),
            debug: GraphDebugState::default(),
            recording: None,
        })
    }

    pub fn definition(&self) -> &Arc<GraphDefinition> {
        &self.definition
    }

    pub fn owner_id(&self) -> u64 {
        self.owner_id
    }

    pub fn is_initialized(&self) -> bool {
        self.nodes.node(self.definition.root_node()).is_initialized()
    }

    // Evaluation
    // -----------------------------------------------------------------

    /// Run the graph for one frame and return the root's result (the
    /// root-motion delta plus the frame's task and event range).
    pub fn evaluate_graph(
        &mut self,
        delta_time: Seconds,
        start_world_transform: Transform,
        physics_scene: Option<&dyn PhysicsScene>,
        update_range: Option<SyncTrackTimeRange>,
        reset_graph_state: bool,
    ) -> PoseNodeResult {
        let mut task_system = self
            .task_system
            .take()
            .expect("nested instances are evaluated through their parent");
        task_system.reset();
        let result = self.evaluate_internal(
            &mut task_system,
            delta_time,
            start_world_transform,
            physics_scene,
            update_range,
            reset_graph_state,
        );
        self.task_system = Some(task_system);
        result
    }

    /// Evaluation entry used by wrapping nodes of nested instances.
    pub(crate) fn evaluate_nested(
        &mut self,
        task_system: &mut TaskSystem,
        delta_time: Seconds,
        world_transform: Transform,
        physics_scene: Option<&dyn PhysicsScene>,
        update_range: Option<SyncTrackTimeRange>,
    ) -> PoseNodeResult {
        self.evaluate_internal(
            task_system,
            delta_time,
            world_transform,
            physics_scene,
            update_range,
            false,
        )
    }

    fn evaluate_internal(
        &mut self,
        task_system: &mut TaskSystem,
        delta_time: Seconds,
        world_transform: Transform,
        physics_scene: Option<&dyn PhysicsScene>,
        update_range: Option<SyncTrackTimeRange>,
        reset_graph_state: bool,
    ) -> PoseNodeResult {
        self.frame_id += 1;
        self.sampled_events.clear();
        self.bone_mask_pool.reset();
        self.debug.begin_frame(world_transform);

        if let Some(frames) = &mut self.recording {
            let mut parameter_values = Vec::new();
            for idx in 0..self.definition.num_control_parameters() {
                if let RuntimeNode::ControlParameter(parameter) =
                    self.nodes.node(NodeIndex(idx as u16))
                {
                    parameter_values.push(parameter.peek());
                }
            }
            frames.push(RecordedFrameData {
                delta_time,
                start_world_transform: world_transform,
                update_range,
                parameter_values,
            });
        }

        let root = self.definition.root_node();
        let mut ctx = GraphContext {
            definition: &self.definition,
            skeleton: self.definition.skeleton(),
            task_system,
            sampled_events: &mut self.sampled_events,
            bone_mask_pool: &mut self.bone_mask_pool,
            physics_scene,
            debug: &mut self.debug,
            frame_id: self.frame_id,
            delta_time,
            world_transform,
            branch_state: BranchState::Active,
            layer: None,
        };

        if reset_graph_state && self.nodes.node(root).is_initialized() {
            self.nodes.shutdown_node(&mut ctx, root);
        }
        if !self.nodes.node(root).is_initialized() {
            self.nodes
                .initialize_pose(&mut ctx, root, SyncTrackTime::default());
        }

        match update_range {
            Some(range) => self.nodes.update_pose_ranged(&mut ctx, root, &range),
            None => self.nodes.update_pose(&mut ctx, root),
        }
    }

    /// Shut the root down through a context borrowing the given task
    /// system, releasing every cached-pose buffer the graph still owns.
    pub(crate) fn shutdown_with(&mut self, task_system: &mut TaskSystem) {
        let root = self.definition.root_node();
        if !self.nodes.node(root).is_initialized() {
            return;
        }
        let mut ctx = GraphContext {
            definition: &self.definition,
            skeleton: self.definition.skeleton(),
            task_system,
            sampled_events: &mut self.sampled_events,
            bone_mask_pool: &mut self.bone_mask_pool,
            physics_scene: None,
            debug: &mut self.debug,
            frame_id: self.frame_id,
            delta_time: Seconds(0.0),
            world_transform: Transform::identity(),
            branch_state: BranchState::Active,
            layer: None,
        };
        self.nodes.shutdown_node(&mut ctx, root);
    }

    /// Explicitly tear down a root instance, destroying cached-pose
    /// buffers. Dropping without this is safe; the task system and its
    /// buffers are dropped together.
    pub fn shutdown(&mut self) {
        if let Some(mut task_system) = self.task_system.take() {
            self.shutdown_with(&mut task_system);
            self.task_system = Some(task_system);
        }
    }

    // Task execution
    // -----------------------------------------------------------------

    pub fn execute_pre_physics_pose_tasks(&mut self, end_world_transform: Transform) {
        self.debug.root_motion.end_frame(end_world_transform);
        if let Some(task_system) = &mut self.task_system {
            task_system.execute_pre_physics_tasks(end_world_transform);
        }
    }

    pub fn execute_post_physics_pose_tasks(&mut self) {
        if let Some(task_system) = &mut self.task_system {
            task_system.execute_post_physics_tasks();
        }
    }

    /// The final pose from the task system, once executed.
    pub fn get_pose(&self) -> Option<&Pose> {
        self.task_system.as_ref().and_then(TaskSystem::final_pose)
    }

    pub fn does_task_system_need_update(&self) -> bool {
        self.task_system
            .as_ref()
            .map(TaskSystem::needs_update)
            .unwrap_or(false)
    }

    pub fn task_system(&self) -> Option<&TaskSystem> {
        self.task_system.as_ref()
    }

    pub fn sampled_events(&self) -> &SampledEventsBuffer {
        &self.sampled_events
    }

    // Control parameters
    // -----------------------------------------------------------------

    pub fn num_control_parameters(&self) -> usize {
        self.definition.num_control_parameters()
    }

    pub fn control_parameter_index(&self, parameter_id: StringId) -> Option<NodeIndex> {
        self.definition.control_parameter_index(parameter_id)
    }

    pub fn set_control_parameter<T: GraphValueConvert>(&mut self, idx: NodeIndex, value: T) {
        debug_assert!(self.definition.is_control_parameter(idx));
        match self.nodes.node_mut(idx) {
            RuntimeNode::ControlParameter(parameter) => parameter.set(value.into_value()),
            _ => debug_assert!(false, "node {} is not a control parameter", idx),
        }
    }

    pub fn get_control_parameter<T: GraphValueConvert>(&self, idx: NodeIndex) -> T {
        debug_assert!(self.definition.is_control_parameter(idx));
        let value = match self.nodes.node(idx) {
            RuntimeNode::ControlParameter(parameter) => parameter.peek(),
            _ => {
                debug_assert!(false, "node {} is not a control parameter", idx);
                GraphValue::default_for(T::TYPE)
            }
        };
        match T::from_value(value) {
            Some(v) => v,
            None => {
                debug_assert!(false, "parameter {} read at the wrong type", idx);
                T::default_value()
            }
        }
    }

    // External graphs
    // -----------------------------------------------------------------

    pub fn is_valid_external_graph_slot(&self, slot_id: StringId) -> bool {
        self.definition.external_slot_node(slot_id).is_some()
    }

    pub fn is_external_graph_slot_filled(&self, slot_id: StringId) -> bool {
        self.external_graphs.iter().any(|e| e.slot_id == slot_id)
    }

    /// Instantiate `definition` into the named slot. The slot node owns
    /// the created instance until [`GraphInstance::disconnect_external_graph`].
    pub fn connect_external_graph(
        &mut self,
        slot_id: StringId,
        definition: &Arc<GraphDefinition>,
    ) -> Result<&GraphInstance, ExternalGraphError> {
        let node_idx = self
            .definition
            .external_slot_node(slot_id)
            .ok_or(ExternalGraphError::SlotUnknown(slot_id))?;
        if self.is_external_graph_slot_filled(slot_id) {
            return Err(ExternalGraphError::SlotAlreadyFilled(slot_id));
        }
        if definition.skeleton().as_ref() != self.definition.skeleton().as_ref() {
            return Err(ExternalGraphError::SkeletonMismatch);
        }

        let nested =
            GraphInstance::new_nested(definition).map_err(ExternalGraphError::InvalidDefinition)?;
        match self.nodes.node_mut(node_idx) {
            RuntimeNode::ExternalGraphSlot(slot) => slot.connect(Box::new(nested)),
            _ => unreachable!("external slot table references a non-slot node"),
        }
        self.external_graphs.push(ConnectedExternalGraph {
            slot_id,
            node_idx,
        });

        match self.nodes.node(node_idx) {
            RuntimeNode::ExternalGraphSlot(slot) => Ok(slot
                .connected_instance()
                .expect("slot was connected a moment ago")),
            _ => unreachable!(),
        }
    }

    /// Unlink and destroy the connected instance.
    pub fn disconnect_external_graph(
        &mut self,
        slot_id: StringId,
    ) -> Result<(), ExternalGraphError> {
        let position = self
            .external_graphs
            .iter()
            .position(|e| e.slot_id == slot_id)
            .ok_or_else(|| {
                if self.is_valid_external_graph_slot(slot_id) {
                    ExternalGraphError::SlotNotFilled(slot_id)
                } else {
                    ExternalGraphError::SlotUnknown(slot_id)
                }
            })?;
        let entry = self.external_graphs.remove(position);

        let mut task_system = self
            .task_system
            .take()
            .expect("external graphs are managed on the root instance");
        match self.nodes.node_mut(entry.node_idx) {
            RuntimeNode::ExternalGraphSlot(slot) => slot.disconnect(&mut task_system),
            _ => unreachable!("external slot table references a non-slot node"),
        }
        self.task_system = Some(task_system);
        Ok(())
    }

    pub fn connected_external_graphs(&self) -> &[ConnectedExternalGraph] {
        &self.external_graphs
    }

    // Nested plumbing
    // -----------------------------------------------------------------

    pub(crate) fn root_sync_track(&self) -> &SyncTrack {
        let root = self.definition.root_node();
        self.nodes.node(root).sync_track(&self.nodes)
    }

    pub(crate) fn root_timing(&self) -> (Percentage, Percentage, Seconds) {
        let root = self.nodes.node(self.definition.root_node());
        (root.previous_time(), root.current_time(), root.duration())
    }

    pub(crate) fn nodes(&self) -> &NodeArena {
        &self.nodes
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut NodeArena {
        &mut self.nodes
    }

    pub(crate) fn task_system_mut(&mut self) -> Option<&mut TaskSystem> {
        self.task_system.as_mut()
    }

    pub(crate) fn frame_id(&self) -> u64 {
        self.frame_id
    }

    pub(crate) fn set_frame_id(&mut self, frame_id: u64) {
        self.frame_id = frame_id;
    }
}

// Development observables
// ---------------------------------------------------------------------

#[cfg(feature = "development-tools")]
impl GraphInstance {
    /// Nodes marked active during the last evaluation, in evaluation
    /// order.
    pub fn active_nodes(&self) -> &[NodeIndex] {
        &self.debug.active_nodes
    }

    pub fn is_node_active(&self, idx: NodeIndex) -> bool {
        self.nodes
            .node(idx)
            .pose_data()
            .map(|data| data.is_active(self.frame_id))
            .unwrap_or(false)
    }

    pub fn pose_node_debug_info(&self, idx: NodeIndex) -> Option<PoseNodeDebugInfo> {
        self.nodes.pose_debug_info(idx)
    }

    pub fn log(&self) -> &[GraphLogEntry] {
        &self.debug.log
    }

    pub fn root_motion_debugger(&self) -> &RootMotionDebugger {
        &self.debug.root_motion
    }

    pub fn external_graph_instance(&self, slot_id: StringId) -> Option<&GraphInstance> {
        let entry = self.external_graphs.iter().find(|e| e.slot_id == slot_id)?;
        match self.nodes.node(entry.node_idx) {
            RuntimeNode::ExternalGraphSlot(slot) => slot.connected_instance(),
            _ => None,
        }
    }

    // Recording
    // -----------------------------------------------------------------

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Start capturing per-frame inputs (delta time, start transform,
    /// parameter values) on every evaluation.
    pub fn start_recording(&mut self) {
        debug_assert!(self.recording.is_none());
        self.recording = Some(Vec::new());
    }

    pub fn stop_recording(&mut self) -> Vec<RecordedFrameData> {
        self.recording.take().unwrap_or_default()
    }

    /// Snapshot the full runtime state of this instance.
    pub fn record_state(&self) -> RecordedGraphState {
        RecordedGraphState::record(self)
    }

    /// Restore a snapshot taken from an instance of the same definition.
    pub fn restore_state(&mut self, state: &RecordedGraphState) {
        state.restore(self);
    }
}

impl std::fmt::Debug for GraphInstance {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("GraphInstance")
            .field("definition", &self.definition.id())
            .field("owner_id", &self.owner_id)
            .field("frame_id", &self.frame_id)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

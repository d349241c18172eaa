//! Nested graphs: runtime-connected external slots and authored child
//! graphs. Both wrap a whole nested [`GraphInstance`] that registers its
//! tasks into the root instance's task system.

use animgraph_core::{
    NodeIndex, Percentage, SampledEventFlags, StringId, SyncTrack, SyncTrackTime,
    SyncTrackTimeRange,
};
use animgraph_task::TaskSystem;

use crate::{
    context::{BranchState, GraphContext},
    instance::GraphInstance,
    node::{PoseNodeData, PoseNodeResult},
};

/// Evaluate a nested instance and splice its output into the parent
/// frame: tasks are already shared, events are copied across buffers.
fn evaluate_nested(
    data: &mut PoseNodeData,
    instance: &mut GraphInstance,
    ctx: &mut GraphContext<'_>,
    update_range: Option<&SyncTrackTimeRange>,
) -> PoseNodeResult {
    let mark = ctx.sampled_events.mark();

    let nested = instance.evaluate_nested(
        ctx.task_system,
        ctx.delta_time,
        ctx.world_transform,
        ctx.physics_scene,
        update_range.copied(),
    );

    // Nested node indices mean nothing to the parent; events are
    // re-stamped with the wrapping node's index.
    let extra_flags = if ctx.branch_state == BranchState::Inactive {
        SampledEventFlags::IGNORED
    } else {
        SampledEventFlags::empty()
    };
    for event in instance.sampled_events().events() {
        let mut copied = *event;
        copied.source_node = data.node_idx;
        copied.flags |= extra_flags;
        ctx.sampled_events.append(copied);
    }

    let (previous_time, current_time, duration) = instance.root_timing();
    data.previous_time = previous_time;
    data.current_time = current_time;
    data.duration = duration;

    PoseNodeResult {
        task: nested.task,
        root_motion_delta: nested.root_motion_delta,
        sampled_events: ctx.sampled_events.range_from(mark),
    }
}

/// A slot another graph can be connected into at runtime. The slot owns
/// the nested instance's lifetime; disconnecting destroys it.
#[derive(Debug)]
pub struct ExternalGraphSlotNode {
    pub data: PoseNodeData,
    slot_id: StringId,
    instance: Option<Box<GraphInstance>>,
    default_sync_track: SyncTrack,
}

impl ExternalGraphSlotNode {
    pub fn new(node_idx: NodeIndex, slot_id: StringId) -> ExternalGraphSlotNode {
        ExternalGraphSlotNode {
            data: PoseNodeData::new(node_idx),
            slot_id,
            instance: None,
            default_sync_track: SyncTrack::default(),
        }
    }

    pub fn slot_id(&self) -> StringId {
        self.slot_id
    }

    pub fn is_filled(&self) -> bool {
        self.instance.is_some()
    }

    pub fn connected_instance(&self) -> Option<&GraphInstance> {
        self.instance.as_deref()
    }

    pub(crate) fn connect(&mut self, instance: Box<GraphInstance>) {
        debug_assert!(self.instance.is_none());
        self.instance = Some(instance);
    }

    /// Unlink and destroy the nested instance, releasing any cached-pose
    /// buffers it still owns in the shared task system.
    pub(crate) fn disconnect(&mut self, task_system: &mut TaskSystem) {
        if let Some(mut instance) = self.instance.take() {
            instance.shutdown_with(task_system);
        }
    }

    pub fn sync_track(&self) -> &SyncTrack {
        match &self.instance {
            Some(instance) => instance.root_sync_track(),
            None => &self.default_sync_track,
        }
    }

    pub fn initialize(&mut self, _ctx: &mut GraphContext<'_>, _initial_time: SyncTrackTime) {
        self.data.initialize(Percentage::ZERO);
    }

    pub fn shutdown(&mut self, ctx: &mut GraphContext<'_>) {
        if let Some(instance) = &mut self.instance {
            instance.shutdown_with(ctx.task_system);
        }
        self.data.shutdown();
    }

    pub fn update(
        &mut self,
        ctx: &mut GraphContext<'_>,
        update_range: Option<&SyncTrackTimeRange>,
    ) -> PoseNodeResult {
        self.data.mark_active(ctx);
        match &mut self.instance {
            Some(instance) => evaluate_nested(&mut self.data, instance, ctx, update_range),
            None => PoseNodeResult::empty_at(ctx.sampled_events.mark()),
        }
    }
}

/// An authored reference to another graph definition, instantiated with
/// the parent and following its lifetime.
#[derive(Debug)]
pub struct ChildGraphNode {
    pub data: PoseNodeData,
    instance: Box<GraphInstance>,
}

impl ChildGraphNode {
    pub fn new(node_idx: NodeIndex, instance: GraphInstance) -> ChildGraphNode {
        ChildGraphNode {
            data: PoseNodeData::new(node_idx),
            instance: Box::new(instance),
        }
    }

    pub fn instance(&self) -> &GraphInstance {
        &self.instance
    }

    pub fn sync_track(&self) -> &SyncTrack {
        self.instance.root_sync_track()
    }

    pub fn initialize(&mut self, _ctx: &mut GraphContext<'_>, _initial_time: SyncTrackTime) {
        self.data.initialize(Percentage::ZERO);
    }

    pub fn shutdown(&mut self, ctx: &mut GraphContext<'_>) {
        self.instance.shutdown_with(ctx.task_system);
        self.data.shutdown();
    }

    pub fn update(
        &mut self,
        ctx: &mut GraphContext<'_>,
        update_range: Option<&SyncTrackTimeRange>,
    ) -> PoseNodeResult {
        self.data.mark_active(ctx);
        evaluate_nested(&mut self.data, &mut self.instance, ctx, update_range)
    }
}

// Snapshot support
// ---------------------------------------------------------------------

use crate::recording::{record_pose_data, restore_pose_data, ValueStream};

impl ExternalGraphSlotNode {
    /// External connections are host-driven and not part of a snapshot;
    /// the host re-connects before restoring.
    pub(crate) fn record(&self, stream: &mut ValueStream) {
        record_pose_data(&self.data, stream);
    }

    pub(crate) fn restore(&mut self, stream: &mut ValueStream) {
        restore_pose_data(&mut self.data, stream);
    }
}

impl ChildGraphNode {
    pub(crate) fn record(&self, stream: &mut ValueStream) {
        record_pose_data(&self.data, stream);
        stream.write_u64(self.instance.frame_id());
        self.instance.nodes().record_all(stream);
    }

    pub(crate) fn restore(&mut self, stream: &mut ValueStream) {
        restore_pose_data(&mut self.data, stream);
        let frame_id = stream.read_u64();
        self.instance.set_frame_id(frame_id);
        self.instance.nodes_mut().restore_all(stream);
    }
}

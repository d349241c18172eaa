//! Leaf pose nodes: animation clips and the reference pose.

use std::sync::Arc;

use animgraph_core::{
    AnimationClip, NodeIndex, Percentage, SampledEventFlags, Seconds, SyncTrack, SyncTrackTime,
    SyncTrackTimeRange,
};
use animgraph_task::Task;

use crate::{
    context::{BranchState, GraphContext},
    debug::RootMotionActionKind,
    node::{PoseNodeData, PoseNodeResult},
};

/// Plays an animation clip, looping or holding at the end.
#[derive(Debug)]
pub struct ClipNode {
    pub data: PoseNodeData,
    clip: Arc<AnimationClip>,
    looping: bool,
}

impl ClipNode {
    pub fn new(node_idx: NodeIndex, clip: Arc<AnimationClip>, looping: bool) -> ClipNode {
        ClipNode {
            data: PoseNodeData::new(node_idx),
            clip,
            looping,
        }
    }

    pub fn sync_track(&self) -> &SyncTrack {
        &self.clip.sync_track
    }

    pub fn initialize(&mut self, _ctx: &mut GraphContext<'_>, initial_time: SyncTrackTime) {
        let start = self.clip.sync_track.percentage_from_time(initial_time);
        self.data.initialize(start);
        self.data.duration = self.clip.duration;
    }

    pub fn shutdown(&mut self, _ctx: &mut GraphContext<'_>) {
        self.data.shutdown();
    }

    pub fn update(&mut self, ctx: &mut GraphContext<'_>) -> PoseNodeResult {
        self.data.mark_active(ctx);

        let from = self.data.current_time;
        let delta = if self.data.duration.value() > 0.0 {
            ctx.delta_time.value() / self.data.duration.value()
        } else {
            0.0
        };
        let raw = Percentage(from.value() + delta);
        // Events and root motion are driven by the distance travelled, not
        // the normalized end position, so whole laps are not lost when a
        // frame covers the clip duration exactly (or several times over).
        let (to, distance) = if self.looping {
            (raw.normalized(), delta)
        } else {
            let clamped = raw.clamped();
            (clamped, clamped.value() - from.value())
        };
        self.data.previous_time = from;
        self.data.current_time = to;

        self.sample(ctx, from, to, distance)
    }

    pub fn update_ranged(
        &mut self,
        ctx: &mut GraphContext<'_>,
        update_range: &SyncTrackTimeRange,
    ) -> PoseNodeResult {
        self.data.mark_active(ctx);

        let track = &self.clip.sync_track;
        let from = track.percentage_from_time(update_range.start);
        let to = track.percentage_from_time(update_range.end);
        // Synchronized ranges describe a sub-loop move; a backwards pair
        // of endpoints means the move wrapped the loop once.
        let distance = if to >= from {
            to.value() - from.value()
        } else {
            (1.0 - from.value()) + to.value()
        };
        self.data.previous_time = from;
        self.data.current_time = to;

        self.sample(ctx, from, to, distance)
    }

    fn sample(
        &self,
        ctx: &mut GraphContext<'_>,
        from: Percentage,
        to: Percentage,
        distance: f32,
    ) -> PoseNodeResult {
        let mark = ctx.sampled_events.mark();

        let mut flags = SampledEventFlags::empty();
        if ctx.branch_state == BranchState::Inactive {
            flags |= SampledEventFlags::IGNORED;
        }
        {
            let node_idx = self.data.node_idx;
            let events = &mut *ctx.sampled_events;
            self.clip.sample_events(from, distance, |event| {
                events.sample(node_idx, event.id, event.time, flags);
            });
        }

        let root_motion_delta = self.clip.root_motion_delta(distance);
        ctx.record_root_motion(
            self.data.node_idx,
            RootMotionActionKind::Sample,
            root_motion_delta,
        );

        let task = ctx.task_system.register_task(Task::SampleClip {
            source_node: self.data.node_idx,
            clip: self.clip.clone(),
            from,
            to,
        });

        PoseNodeResult {
            task: Some(task),
            root_motion_delta,
            sampled_events: ctx.sampled_events.range_from(mark),
        }
    }
}

/// Produces the skeleton's reference pose; a do-nothing animation source.
#[derive(Debug)]
pub struct ReferencePoseNode {
    pub data: PoseNodeData,
    sync_track: SyncTrack,
}

impl ReferencePoseNode {
    pub fn new(node_idx: NodeIndex) -> ReferencePoseNode {
        ReferencePoseNode {
            data: PoseNodeData::new(node_idx),
            sync_track: SyncTrack::default(),
        }
    }

    pub fn sync_track(&self) -> &SyncTrack {
        &self.sync_track
    }

    pub fn initialize(&mut self, _ctx: &mut GraphContext<'_>, _initial_time: SyncTrackTime) {
        self.data.initialize(Percentage::ZERO);
        self.data.duration = Seconds(0.0);
    }

    pub fn shutdown(&mut self, _ctx: &mut GraphContext<'_>) {
        self.data.shutdown();
    }

    pub fn update(&mut self, ctx: &mut GraphContext<'_>) -> PoseNodeResult {
        self.data.mark_active(ctx);
        let mark = ctx.sampled_events.mark();
        let task = ctx.task_system.register_task(Task::ReferencePose {
            source_node: self.data.node_idx,
        });
        PoseNodeResult {
            task: Some(task),
            ..PoseNodeResult::empty_at(mark)
        }
    }
}

// Snapshot support
// ---------------------------------------------------------------------

use crate::recording::{record_pose_data, restore_pose_data, ValueStream};

impl ClipNode {
    pub(crate) fn record(&self, stream: &mut ValueStream) {
        record_pose_data(&self.data, stream);
    }

    pub(crate) fn restore(&mut self, stream: &mut ValueStream) {
        restore_pose_data(&mut self.data, stream);
    }
}

impl ReferencePoseNode {
    pub(crate) fn record(&self, stream: &mut ValueStream) {
        record_pose_data(&self.data, stream);
    }

    pub(crate) fn restore(&mut self, stream: &mut ValueStream) {
        restore_pose_data(&mut self.data, stream);
    }
}

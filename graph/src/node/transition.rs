//! The transition node: blends from a source (a state, or another
//! in-flight transition) to a target state.
//!
//! Everything difficult about the state machine lives here — forced
//! interruption with cached-pose ownership transfer, synchronized and
//! clamped progress tracking, layer-context recombination and the
//! cached-pose blend-in window.

use either::Either;
use smallvec::SmallVec;

use animgraph_core::{
    Blender, NodeIndex, Percentage, Seconds, SyncTrack, SyncTrackTime, SyncTrackTimeRange,
};
use animgraph_task::{CachedPoseBufferId, Task, TaskIndex};

use crate::{
    arena::NodeArena,
    context::{BranchState, GraphContext, LayerContext},
    debug::RootMotionActionKind,
    definition::TransitionSettings,
    node::{PoseNodeData, PoseNodeResult, RuntimeNode, TransitionState},
};

/// Wall-clock window over which an inherited cached pose is blended out
/// after a forced interruption (roughly three frames).
const CACHED_POSE_BLEND_TIME: f32 = 0.1;

/// Everything the enclosing state machine feeds into a starting
/// transition: the already-computed source result for this frame and
/// whether the new transition should keep a cached copy of its blend.
#[derive(Clone, Copy, Debug)]
pub struct TransitionInitOptions {
    pub source_result: PoseNodeResult,
    pub should_cache_pose: bool,
}

#[derive(Debug)]
pub struct TransitionNode {
    pub data: PoseNodeData,
    /// `Left` is a state source, `Right` another transition.
    pub(crate) source: Option<Either<NodeIndex, NodeIndex>>,
    target: NodeIndex,
    pub(crate) sync_track: SyncTrack,
    /// Normalized progress through the transition, `[0, 1]`.
    transition_progress: f32,
    /// Seconds, or event-distance for a clamped synchronized transition.
    transition_duration: f32,
    sync_event_offset: f32,
    blend_weight: f32,
    pub(crate) cached_pose_buffer: Option<CachedPoseBufferId>,
    pub(crate) source_cached_pose_buffer: Option<CachedPoseBufferId>,
    pub(crate) inherited_cached_pose_buffers: SmallVec<[CachedPoseBufferId; 2]>,
    source_cached_pose_blend_weight: f32,
    rm_action_source: Option<usize>,
    rm_action_target: Option<usize>,
}

impl TransitionNode {
    pub fn new(node_idx: NodeIndex, settings: &TransitionSettings) -> TransitionNode {
        TransitionNode {
            data: PoseNodeData::new(node_idx),
            source: None,
            target: settings.target_state_node,
            sync_track: SyncTrack::default(),
            transition_progress: 0.0,
            transition_duration: settings.duration.value(),
            sync_event_offset: 0.0,
            blend_weight: 0.0,
            cached_pose_buffer: None,
            source_cached_pose_buffer: None,
            inherited_cached_pose_buffers: SmallVec::new(),
            source_cached_pose_blend_weight: 0.0,
            rm_action_source: None,
            rm_action_target: None,
        }
    }

    pub fn target_state_index(&self) -> NodeIndex {
        self.target
    }

    pub fn source_state_index(&self) -> Option<NodeIndex> {
        match self.source {
            Some(Either::Left(state)) => Some(state),
            _ => None,
        }
    }

    pub fn source_transition_index(&self) -> Option<NodeIndex> {
        match self.source {
            Some(Either::Right(transition)) => Some(transition),
            _ => None,
        }
    }

    fn source_index(&self) -> NodeIndex {
        match self.source.expect("transition has no source") {
            Either::Left(idx) | Either::Right(idx) => idx,
        }
    }

    pub fn progress(&self) -> f32 {
        self.transition_progress
    }

    pub fn duration_value(&self) -> f32 {
        self.transition_duration
    }

    pub fn blend_weight(&self) -> f32 {
        self.blend_weight
    }

    pub fn has_cached_pose(&self) -> bool {
        self.cached_pose_buffer.is_some()
    }

    pub fn source_cached_pose_buffer(&self) -> Option<CachedPoseBufferId> {
        self.source_cached_pose_buffer
    }

    pub fn source_cached_pose_blend_weight(&self) -> f32 {
        self.source_cached_pose_blend_weight
    }

    /// Completion test, one frame ahead: the transition finishes on the
    /// update where progress would reach one.
    pub fn is_complete(&self, delta_time: Seconds) -> bool {
        if self.transition_duration <= 0.0 {
            return true;
        }
        self.transition_progress + delta_time.value() / self.transition_duration >= 1.0
    }

    // Starting
    // -----------------------------------------------------------------

    pub fn start_from_state(
        &mut self,
        nodes: &mut NodeArena,
        ctx: &mut GraphContext<'_>,
        options: TransitionInitOptions,
        source_state: NodeIndex,
    ) -> PoseNodeResult {
        debug_assert!(self.source.is_none() && !self.data.is_initialized());

        self.initialize_internal(nodes, ctx);
        nodes.state_start_transition_out(ctx, source_state);
        self.source = Some(Either::Left(source_state));

        self.initialize_target_and_update(nodes, ctx, options)
    }

    pub fn start_from_transition(
        &mut self,
        nodes: &mut NodeArena,
        ctx: &mut GraphContext<'_>,
        options: TransitionInitOptions,
        source_transition: NodeIndex,
        forced: bool,
    ) -> PoseNodeResult {
        debug_assert!(self.source.is_none() && !self.data.is_initialized());

        let definition = std::sync::Arc::clone(ctx.definition);
        let settings = definition.transition_settings(self.data.node_idx);

        if forced {
            debug_assert!(settings.is_forced_transition_allowed());
            debug_assert!(nodes.transition(source_transition).has_cached_pose());

            // Take over every buffer the interrupted chain owns; the
            // source's own write buffer becomes our read-back source.
            self.source_cached_pose_buffer =
                nodes.transition_mut(source_transition).cached_pose_buffer.take();
            nodes.transfer_additional_pose_buffers(
                source_transition,
                &mut self.inherited_cached_pose_buffers,
            );

            // Force-stop the old transition and restart from its target.
            let interrupted_state = nodes.transition(source_transition).target;
            nodes.shutdown_node(ctx, source_transition);
            self.start_from_state(nodes, ctx, options, interrupted_state)
        } else {
            self.initialize_internal(nodes, ctx);
            let source_target = nodes.transition(source_transition).target;
            nodes.state_start_transition_out(ctx, source_target);
            self.source = Some(Either::Right(source_transition));

            self.initialize_target_and_update(nodes, ctx, options)
        }
    }

    fn initialize_internal(&mut self, nodes: &mut NodeArena, ctx: &mut GraphContext<'_>) {
        let definition = std::sync::Arc::clone(ctx.definition);
        let settings = definition.transition_settings(self.data.node_idx);

        self.data.initialize(Percentage::ZERO);
        self.sync_track = SyncTrack::default();
        self.sync_event_offset = 0.0;

        self.transition_duration = match settings.duration_override {
            Some(override_node) => {
                nodes.initialize_value(ctx, override_node);
                let value: f32 = nodes.value_as(ctx, override_node);
                nodes.shutdown_node(ctx, override_node);
                value.max(0.0).min(10.0)
            }
            None => settings.duration.value(),
        };

        self.transition_progress = 0.0;
        self.blend_weight = 0.0;
        self.source_cached_pose_blend_weight = 0.0;
    }

    fn evaluate_sync_event_offset(
        &mut self,
        nodes: &mut NodeArena,
        ctx: &mut GraphContext<'_>,
        settings: &TransitionSettings,
        whole_events_only: bool,
    ) {
        let raw = match settings.sync_event_offset_override {
            Some(override_node) => {
                nodes.initialize_value(ctx, override_node);
                let value: f32 = nodes.value_as(ctx, override_node);
                nodes.shutdown_node(ctx, override_node);
                value
            }
            None => settings.sync_event_offset,
        };
        self.sync_event_offset = if whole_events_only { raw.floor() } else { raw };
    }

    /// The shared tail of both start paths: bring the target state up at
    /// the right sync time, evaluate it once this frame, and recombine
    /// with the already-evaluated source.
    fn initialize_target_and_update(
        &mut self,
        nodes: &mut NodeArena,
        ctx: &mut GraphContext<'_>,
        options: TransitionInitOptions,
    ) -> PoseNodeResult {
        let definition = std::sync::Arc::clone(ctx.definition);
        let settings = definition.transition_settings(self.data.node_idx);

        self.data.mark_active(ctx);
        self.rm_action_source = ctx.debug.root_motion.last_action_index();

        // The parent layer context doubles as the source-side capture: the
        // source was evaluated into it earlier this frame.
        let parent_layer = if ctx.is_in_layer() {
            let saved = ctx.layer;
            ctx.layer = Some(LayerContext::new());
            saved
        } else {
            None
        };

        let source_idx = self.source_index();
        let target = self.target;
        let target_result;

        if !settings.is_synchronized() {
            self.data.current_time = Percentage::ZERO;
            self.data.duration = nodes.node(source_idx).duration();

            self.evaluate_sync_event_offset(nodes, ctx, settings, false);

            let should_match_source_time = settings.should_match_source_time();
            if should_match_source_time || self.sync_event_offset != 0.0 {
                let mut target_start = SyncTrackTime::default();

                if should_match_source_time {
                    let source_track = nodes.node(source_idx).sync_track(nodes).clone();
                    let source_time =
                        source_track.time_from_percentage(nodes.node(source_idx).current_time());

                    if settings.should_match_sync_event_index() {
                        target_start.event_idx = source_time.event_idx;
                    } else if settings.should_match_sync_event_id() {
                        // The target's track is only reachable through an
                        // initialized node; bring it up briefly.
                        nodes.initialize_pose(ctx, target, target_start);
                        let target_track = nodes.node(target).sync_track(nodes).clone();
                        let source_event_id = source_track.event_id(source_time.event_idx);
                        target_start.event_idx = target_track
                            .event_index_for_id(source_event_id)
                            .unwrap_or(0);
                        nodes.shutdown_node(ctx, target);
                    }

                    if settings.should_match_sync_event_percentage() {
                        target_start.percentage_through = source_time.percentage_through;
                    }
                }

                // Split the offset into whole events and a fraction, then
                // carry any fractional overflow into the event index.
                let event_offset = self.sync_event_offset.trunc();
                let percentage_offset = self.sync_event_offset - event_offset;
                target_start.event_idx += event_offset as i32;

                let summed = target_start.percentage_through.value() + percentage_offset;
                let carry = summed.trunc();
                target_start.percentage_through = Percentage(summed - carry);
                target_start.event_idx += carry as i32;

                nodes.initialize_pose(ctx, target, target_start);
                nodes.state_start_transition_in(target);

                // Evaluate with a zero step: a target pose must exist this
                // frame but its time must not advance.
                let old_delta = ctx.delta_time;
                ctx.delta_time = Seconds(0.0);
                target_result = nodes.update_pose(ctx, target);
                ctx.delta_time = old_delta;
            } else {
                nodes.initialize_pose(ctx, target, SyncTrackTime::default());
                nodes.state_start_transition_in(target);
                target_result = nodes.update_pose(ctx, target);
            }

            self.rm_action_target = ctx.debug.root_motion.last_action_index();

            if settings.should_clamp_duration() {
                let source_node = nodes.node(source_idx);
                let remaining = (1.0 - source_node.current_time().value())
                    * source_node.duration().value();
                self.transition_duration = self.transition_duration.min(remaining);
            }
        } else {
            // Synchronized: the target starts on the source's current sync
            // position, offset by whole events.
            let source_track = nodes.node(source_idx).sync_track(nodes).clone();
            let source_update_range = SyncTrackTimeRange::new(
                source_track.time_from_percentage(nodes.node(source_idx).previous_time()),
                source_track.time_from_percentage(nodes.node(source_idx).current_time()),
            );

            self.evaluate_sync_event_offset(nodes, ctx, settings, true);
            let offset = self.sync_event_offset as i32;

            let mut target_range = source_update_range;
            target_range.start.event_idx += offset;
            target_range.end.event_idx += offset;

            nodes.initialize_pose(ctx, target, target_range.start);
            nodes.state_start_transition_in(target);
            target_result = nodes.update_pose_ranged(ctx, target, &target_range);

            self.rm_action_target = ctx.debug.root_motion.last_action_index();

            self.sync_track = source_track.clone();
            self.data.duration = nodes.node(source_idx).duration();
            self.data.previous_time = self.sync_track.percentage_from_time(target_range.start);
            self.data.current_time = self.sync_track.percentage_from_time(target_range.end);

            if settings.should_clamp_duration() {
                // Re-express the authored duration as event distance,
                // clamped so the source finishes on its real end.
                let real_end = source_track.end_time();
                let real_end_pct = source_track.percentage_from_time(real_end).value();
                let current_pct = source_track
                    .percentage_from_time(source_update_range.start)
                    .value();

                // An exact tie counts as already at the end and clamps.
                let to_end = if real_end_pct >= current_pct {
                    real_end_pct - current_pct
                } else {
                    1.0 - (current_pct - real_end_pct)
                };

                let source_duration = nodes.node(source_idx).duration();
                let duration_pct = if source_duration.value() > 0.0 {
                    settings.duration.value() / source_duration.value()
                } else {
                    0.0
                };

                let end_time = if to_end < duration_pct {
                    real_end
                } else {
                    source_track
                        .time_from_percentage(Percentage(current_pct + duration_pct).normalized())
                };
                self.transition_duration = source_track.percentage_covered(
                    &SyncTrackTimeRange::new(source_update_range.start, end_time),
                );
            } else {
                self.transition_duration = settings.duration.value();
            }
        }

        // Capture the target-side layer context and restore the parent's.
        let target_layer = if parent_layer.is_some() {
            let captured = ctx.layer;
            ctx.layer = parent_layer;
            captured
        } else {
            None
        };

        self.calculate_blend_weight(settings);
        let mut result =
            self.register_pose_tasks_and_update_root_motion(ctx, &options.source_result, &target_result, settings);

        // A state source may have rewritten its event range in
        // `start_transition_out`; re-read it.
        let mut source_event_range = options.source_result.sampled_events;
        if let Some(state_idx) = self.source_state_index() {
            if let RuntimeNode::State(state) = nodes.node(state_idx) {
                source_event_range = state.sampled_event_range();
            }
        }
        result.sampled_events = ctx.sampled_events.blend_event_ranges(
            source_event_range,
            target_result.sampled_events,
            self.blend_weight,
        );

        self.update_layer_context(nodes, ctx, parent_layer, target_layer);

        if options.should_cache_pose {
            debug_assert!(self.cached_pose_buffer.is_none());
            let buffer = ctx.task_system.create_cached_pose();
            self.cached_pose_buffer = Some(buffer);
            if let Some(task) = result.task {
                result.task = Some(ctx.task_system.register_task(Task::CachedPoseWrite {
                    source_node: self.data.node_idx,
                    source: task,
                    buffer,
                }));
            }
        }

        result
    }

    // Per-frame updates
    // -----------------------------------------------------------------

    pub fn update(&mut self, nodes: &mut NodeArena, ctx: &mut GraphContext<'_>) -> PoseNodeResult {
        debug_assert!(self.data.is_initialized() && self.source.is_some());
        let definition = std::sync::Arc::clone(ctx.definition);
        let settings = definition.transition_settings(self.data.node_idx);

        self.update_cached_pose_buffers(ctx);

        if settings.is_synchronized() {
            self.data.mark_active(ctx);

            let source_idx = self.source_index();
            let source_track = nodes.node(source_idx).sync_track(nodes).clone();
            let target_track = nodes.node(self.target).sync_track(nodes).clone();

            let mut update_range = SyncTrackTimeRange::new(
                self.sync_track.time_from_percentage(self.data.current_time),
                SyncTrackTime::default(),
            );

            if settings.should_clamp_duration() {
                let estimated_to = (self.data.current_time
                    + percentage_delta(ctx.delta_time, self.data.duration))
                .normalized();
                update_range.end = self.sync_track.time_from_percentage(estimated_to);
                self.update_progress_clamped_synchronized(nodes, ctx, &update_range, false);
            } else {
                self.update_progress(nodes, ctx, false);
            }

            // The definitive range for this frame.
            let to = (self.data.current_time
                + percentage_delta(ctx.delta_time, self.data.duration))
            .normalized();
            update_range.end = self.sync_track.time_from_percentage(to);

            self.calculate_blend_weight(settings);
            self.sync_track = SyncTrack::blend(&source_track, &target_track, self.blend_weight);

            // Progress tracking may have collapsed an inner transition;
            // durations come from the current source.
            let source_idx = self.source_index();
            self.data.duration = SyncTrack::duration_synchronized(
                nodes.node(source_idx).duration(),
                nodes.node(self.target).duration(),
                source_track.num_events(),
                target_track.num_events(),
                self.sync_track.num_events(),
                self.blend_weight,
            );

            self.update_synchronized(nodes, ctx, update_range)
        } else {
            self.data.mark_active(ctx);

            self.update_progress(nodes, ctx, false);
            self.calculate_blend_weight(settings);

            let source_idx = self.source_index();
            self.data.duration = Seconds::lerp(
                nodes.node(source_idx).duration(),
                nodes.node(self.target).duration(),
                self.blend_weight,
            );

            self.update_unsynchronized(nodes, ctx)
        }
    }

    pub fn update_ranged(
        &mut self,
        nodes: &mut NodeArena,
        ctx: &mut GraphContext<'_>,
        update_range: &SyncTrackTimeRange,
    ) -> PoseNodeResult {
        debug_assert!(self.data.is_initialized() && self.source.is_some());
        let definition = std::sync::Arc::clone(ctx.definition);
        let settings = definition.transition_settings(self.data.node_idx);

        if !settings.is_synchronized() {
            // A synchronized update on an unsynchronized transition is a
            // bad authored graph; terminate the transition immediately and
            // carry on unsynchronized.
            self.transition_progress = 1.0;
            ctx.log_node_error(
                self.data.node_idx,
                "transition terminated: synchronized update on an unsynchronized transition",
            );
            return self.update(nodes, ctx);
        }

        self.update_cached_pose_buffers(ctx);
        self.data.mark_active(ctx);

        if settings.should_clamp_duration() {
            self.update_progress_clamped_synchronized(nodes, ctx, update_range, false);
        } else {
            self.update_progress(nodes, ctx, false);
        }

        self.calculate_blend_weight(settings);

        let source_idx = self.source_index();
        let source_track = nodes.node(source_idx).sync_track(nodes).clone();
        let target_track = nodes.node(self.target).sync_track(nodes).clone();
        self.sync_track = SyncTrack::blend(&source_track, &target_track, self.blend_weight);
        self.data.duration = SyncTrack::duration_synchronized(
            nodes.node(source_idx).duration(),
            nodes.node(self.target).duration(),
            source_track.num_events(),
            target_track.num_events(),
            self.sync_track.num_events(),
            self.blend_weight,
        );

        self.update_synchronized(nodes, ctx, *update_range)
    }

    fn update_unsynchronized(
        &mut self,
        nodes: &mut NodeArena,
        ctx: &mut GraphContext<'_>,
    ) -> PoseNodeResult {
        let definition = std::sync::Arc::clone(ctx.definition);
        let settings = definition.transition_settings(self.data.node_idx);

        let parent_layer = if ctx.is_in_layer() {
            let saved = ctx.layer;
            ctx.layer = Some(LayerContext::new());
            saved
        } else {
            None
        };

        // Source side, in an inactive branch. If we inherited a cached
        // pose it is read back and folded into the source's task.
        let source_idx = self.source_index();
        let cached_read_task = self.register_cached_read_task(ctx);

        let previous_branch = ctx.branch_state;
        ctx.branch_state = BranchState::Inactive;
        let mut source_result = nodes.update_pose(ctx, source_idx);
        self.rm_action_source = ctx.debug.root_motion.last_action_index();
        source_result.task = self.fold_cached_read(ctx, cached_read_task, source_result.task);
        ctx.branch_state = previous_branch;

        let source_layer = if parent_layer.is_some() {
            let captured = ctx.layer;
            ctx.layer = Some(LayerContext::new());
            captured
        } else {
            None
        };

        // Target side.
        let target_result = nodes.update_pose(ctx, self.target);
        self.rm_action_target = ctx.debug.root_motion.last_action_index();

        let target_layer = if parent_layer.is_some() {
            let captured = ctx.layer;
            ctx.layer = parent_layer;
            captured
        } else {
            None
        };

        let mut result = self.register_pose_tasks_and_update_root_motion(
            ctx,
            &source_result,
            &target_result,
            settings,
        );

        self.data.previous_time = self.data.current_time;
        self.data.current_time = (self.data.current_time
            + percentage_delta(ctx.delta_time, self.data.duration))
        .clamped();

        result.sampled_events = ctx.sampled_events.blend_event_ranges(
            source_result.sampled_events,
            target_result.sampled_events,
            self.blend_weight,
        );
        self.update_layer_context(nodes, ctx, source_layer, target_layer);

        self.wrap_with_cache_write(ctx, result)
    }

    fn update_synchronized(
        &mut self,
        nodes: &mut NodeArena,
        ctx: &mut GraphContext<'_>,
        update_range: SyncTrackTimeRange,
    ) -> PoseNodeResult {
        let definition = std::sync::Arc::clone(ctx.definition);
        let settings = definition.transition_settings(self.data.node_idx);
        debug_assert!(settings.is_synchronized());

        // The range is expressed for the target; undo the event offset to
        // get the source's range.
        let offset = self.sync_event_offset as i32;
        let mut source_range = update_range;
        source_range.start.event_idx -= offset;
        source_range.end.event_idx -= offset;

        // Once a clamped transition has fully progressed, pin the source
        // to finish its final event.
        if settings.should_clamp_duration() && self.transition_progress >= 1.0 {
            source_range.end.event_idx = source_range.start.event_idx;
            source_range.end.percentage_through = Percentage::ONE;
        }

        let parent_layer = if ctx.is_in_layer() {
            let saved = ctx.layer;
            ctx.layer = Some(LayerContext::new());
            saved
        } else {
            None
        };

        let source_idx = self.source_index();
        let cached_read_task = self.register_cached_read_task(ctx);

        let previous_branch = ctx.branch_state;
        ctx.branch_state = BranchState::Inactive;
        let mut source_result = nodes.update_pose_ranged(ctx, source_idx, &source_range);
        self.rm_action_source = ctx.debug.root_motion.last_action_index();
        source_result.task = self.fold_cached_read(ctx, cached_read_task, source_result.task);
        ctx.branch_state = previous_branch;

        let source_layer = if parent_layer.is_some() {
            let captured = ctx.layer;
            ctx.layer = Some(LayerContext::new());
            captured
        } else {
            None
        };

        let target_result = nodes.update_pose_ranged(ctx, self.target, &update_range);
        self.rm_action_target = ctx.debug.root_motion.last_action_index();

        let target_layer = if parent_layer.is_some() {
            let captured = ctx.layer;
            ctx.layer = parent_layer;
            captured
        } else {
            None
        };

        let mut result = self.register_pose_tasks_and_update_root_motion(
            ctx,
            &source_result,
            &target_result,
            settings,
        );

        self.data.previous_time = self.sync_track.percentage_from_time(update_range.start);
        self.data.current_time = self.sync_track.percentage_from_time(update_range.end);

        result.sampled_events = ctx.sampled_events.blend_event_ranges(
            source_result.sampled_events,
            target_result.sampled_events,
            self.blend_weight,
        );
        self.update_layer_context(nodes, ctx, source_layer, target_layer);

        self.wrap_with_cache_write(ctx, result)
    }

    // Progress
    // -----------------------------------------------------------------

    fn complete_source_transition_if_done(
        &mut self,
        nodes: &mut NodeArena,
        ctx: &mut GraphContext<'_>,
        is_initializing: bool,
    ) {
        // Not allowed while initializing: the source was already updated
        // this frame and may have registered tasks.
        if is_initializing {
            return;
        }
        if let Some(inner) = self.source_transition_index() {
            if nodes.transition(inner).is_complete(ctx.delta_time) {
                self.end_source_transition(nodes, ctx);
            }
        }
    }

    fn update_progress(
        &mut self,
        nodes: &mut NodeArena,
        ctx: &mut GraphContext<'_>,
        is_initializing: bool,
    ) {
        self.complete_source_transition_if_done(nodes, ctx, is_initializing);

        debug_assert!(self.transition_duration > 0.0);
        if self.transition_duration > 0.0 {
            self.transition_progress += ctx.delta_time.value() / self.transition_duration;
        } else {
            self.transition_progress = 1.0;
        }
        self.transition_progress = self.transition_progress.max(0.0).min(1.0);
    }

    fn update_progress_clamped_synchronized(
        &mut self,
        nodes: &mut NodeArena,
        ctx: &mut GraphContext<'_>,
        update_range: &SyncTrackTimeRange,
        is_initializing: bool,
    ) {
        self.complete_source_transition_if_done(nodes, ctx, is_initializing);

        // Progress is measured in event distance over the clamped range.
        let covered = self.sync_track.percentage_covered(update_range);
        if self.transition_duration > 0.0 {
            self.transition_progress += covered / self.transition_duration;
        } else {
            self.transition_progress = 1.0;
        }
        self.transition_progress = self.transition_progress.max(0.0).min(1.0);
    }

    /// The inner transition finished: its target state becomes our direct
    /// source.
    fn end_source_transition(&mut self, nodes: &mut NodeArena, ctx: &mut GraphContext<'_>) {
        let inner = self
            .source_transition_index()
            .expect("source is not a transition");
        let adopted_state = nodes.transition(inner).target;

        nodes.shutdown_node(ctx, inner);
        nodes.set_state_transition_state(adopted_state, TransitionState::TransitioningOut);
        self.source = Some(Either::Left(adopted_state));
    }

    // Cached poses
    // -----------------------------------------------------------------

    fn update_cached_pose_buffers(&mut self, ctx: &mut GraphContext<'_>) {
        // Inherited buffers were only needed for the frame they were
        // transferred in; release them now.
        for buffer in self.inherited_cached_pose_buffers.drain() {
            ctx.task_system.destroy_cached_pose(buffer);
        }

        if let Some(buffer) = self.source_cached_pose_buffer {
            self.source_cached_pose_blend_weight = (self.source_cached_pose_blend_weight
                + ctx.delta_time.value() / CACHED_POSE_BLEND_TIME)
                .min(1.0);

            if self.source_cached_pose_blend_weight >= 1.0 {
                ctx.task_system.destroy_cached_pose(buffer);
                self.source_cached_pose_buffer = None;
            }
        }
    }

    fn register_cached_read_task(&self, ctx: &mut GraphContext<'_>) -> Option<TaskIndex> {
        self.source_cached_pose_buffer.map(|buffer| {
            ctx.task_system.register_task(Task::CachedPoseRead {
                source_node: self.data.node_idx,
                buffer,
            })
        })
    }

    fn fold_cached_read(
        &self,
        ctx: &mut GraphContext<'_>,
        cached_read_task: Option<TaskIndex>,
        source_task: Option<TaskIndex>,
    ) -> Option<TaskIndex> {
        match (cached_read_task, source_task) {
            (Some(read), Some(live)) => Some(ctx.task_system.register_task(Task::Blend {
                source_node: self.data.node_idx,
                first: read,
                second: live,
                blend_weight: self.source_cached_pose_blend_weight,
                mask: None,
            })),
            (Some(read), None) => Some(read),
            (None, live) => live,
        }
    }

    fn wrap_with_cache_write(
        &self,
        ctx: &mut GraphContext<'_>,
        mut result: PoseNodeResult,
    ) -> PoseNodeResult {
        if let (Some(task), Some(buffer)) = (result.task, self.cached_pose_buffer) {
            result.task = Some(ctx.task_system.register_task(Task::CachedPoseWrite {
                source_node: self.data.node_idx,
                source: task,
                buffer,
            }));
        }
        result
    }

    // Blending
    // -----------------------------------------------------------------

    fn calculate_blend_weight(&mut self, settings: &TransitionSettings) {
        self.blend_weight = settings.easing.apply(self.transition_progress);
    }

    fn register_pose_tasks_and_update_root_motion(
        &mut self,
        ctx: &mut GraphContext<'_>,
        source_result: &PoseNodeResult,
        target_result: &PoseNodeResult,
        settings: &TransitionSettings,
    ) -> PoseNodeResult {
        let mut result = PoseNodeResult::empty_at(ctx.sampled_events.mark());

        match (source_result.task, target_result.task) {
            (Some(source_task), Some(target_task)) => {
                result.root_motion_delta = Blender::blend_root_motion_deltas(
                    &source_result.root_motion_delta,
                    &target_result.root_motion_delta,
                    self.blend_weight,
                    settings.root_motion_blend,
                );
                result.task = Some(ctx.task_system.register_task(Task::Blend {
                    source_node: self.data.node_idx,
                    first: source_task,
                    second: target_task,
                    blend_weight: self.blend_weight,
                    mask: None,
                }));
                ctx.record_root_motion(
                    self.data.node_idx,
                    RootMotionActionKind::Blend,
                    result.root_motion_delta,
                );
            }
            (Some(_), None) => {
                result.task = source_result.task;
                result.root_motion_delta = source_result.root_motion_delta;
            }
            (None, _) => {
                result.task = target_result.task;
                result.root_motion_delta = target_result.root_motion_delta;
            }
        }
        result
    }

    fn is_state_off(nodes: &NodeArena, idx: NodeIndex) -> bool {
        match nodes.node(idx) {
            RuntimeNode::State(state) => state.is_off_state(),
            _ => false,
        }
    }

    fn update_layer_context(
        &mut self,
        nodes: &NodeArena,
        ctx: &mut GraphContext<'_>,
        source_layer: Option<LayerContext>,
        target_layer: Option<LayerContext>,
    ) {
        if !ctx.is_in_layer() {
            return;
        }

        let source_layer = source_layer.unwrap_or_default();
        let target_layer = target_layer.unwrap_or_default();

        let weight = source_layer.weight
            + (target_layer.weight - source_layer.weight) * self.blend_weight;

        let mask = match (source_layer.mask, target_layer.mask) {
            (Some(source_mask), Some(target_mask)) => {
                let source = ctx.bone_mask_pool.get(source_mask).clone();
                ctx.bone_mask_pool
                    .get_mut(target_mask)
                    .blend_from(&source, self.blend_weight);
                Some(target_mask)
            }
            (Some(source_mask), None) => {
                if Self::is_state_off(nodes, self.target) {
                    Some(source_mask)
                } else {
                    // Blend out towards an all-ones mask.
                    let handle = ctx.bone_mask_pool.alloc();
                    let source = ctx.bone_mask_pool.get(source_mask).clone();
                    ctx.bone_mask_pool
                        .get_mut(handle)
                        .blend_from(&source, self.blend_weight);
                    Some(handle)
                }
            }
            (None, Some(target_mask)) => {
                let source_is_off = self
                    .source_state_index()
                    .map(|idx| Self::is_state_off(nodes, idx))
                    .unwrap_or(false);
                if source_is_off {
                    Some(target_mask)
                } else {
                    let handle = ctx.bone_mask_pool.alloc();
                    let target = ctx.bone_mask_pool.get(target_mask).clone();
                    ctx.bone_mask_pool
                        .get_mut(handle)
                        .blend_to(&target, self.blend_weight);
                    Some(handle)
                }
            }
            (None, None) => None,
        };

        ctx.layer = Some(LayerContext { weight, mask });
    }

    // Shutdown
    // -----------------------------------------------------------------

    pub fn shutdown(&mut self, nodes: &mut NodeArena, ctx: &mut GraphContext<'_>) {
        if let Some(buffer) = self.cached_pose_buffer.take() {
            ctx.task_system.destroy_cached_pose(buffer);
        }
        if let Some(buffer) = self.source_cached_pose_buffer.take() {
            ctx.task_system.destroy_cached_pose(buffer);
        }
        for buffer in self.inherited_cached_pose_buffers.drain() {
            ctx.task_system.destroy_cached_pose(buffer);
        }

        nodes.set_state_transition_state(self.target, TransitionState::None);
        self.data.current_time = Percentage::ONE;

        if self.source_transition_index().is_some() {
            self.end_source_transition(nodes, ctx);
        }

        if let Some(source) = self.source {
            let source_idx = match source {
                Either::Left(idx) | Either::Right(idx) => idx,
            };
            nodes.shutdown_node(ctx, source_idx);
        }
        self.source = None;

        self.data.shutdown();
    }
}

fn percentage_delta(delta_time: Seconds, duration: Seconds) -> Percentage {
    if duration.value() > 0.0 {
        Percentage(delta_time.value() / duration.value())
    } else {
        Percentage::ZERO
    }
}

// Snapshot support
// ---------------------------------------------------------------------

use crate::recording::{record_pose_data, restore_pose_data, ValueStream};

impl TransitionNode {
    pub(crate) fn record(&self, stream: &mut ValueStream) {
        record_pose_data(&self.data, stream);
        stream.write_f32(self.transition_progress);
        stream.write_f32(self.transition_duration);
        stream.write_f32(self.sync_event_offset);
        stream.write_f32(self.blend_weight);
        stream.write_opt_buffer(self.cached_pose_buffer);
        stream.write_opt_buffer(self.source_cached_pose_buffer);
        stream.write_u16(self.inherited_cached_pose_buffers.len() as u16);
        for &buffer in &self.inherited_cached_pose_buffers {
            stream.write_u32(buffer.to_raw());
        }
        stream.write_f32(self.source_cached_pose_blend_weight);
        match self.source {
            None => stream.write_u16(0),
            Some(Either::Left(state)) => {
                stream.write_u16(1);
                stream.write_u16(state.0);
            }
            Some(Either::Right(transition)) => {
                stream.write_u16(2);
                stream.write_u16(transition.0);
            }
        }
        stream.write_sync_track(&self.sync_track);
    }

    pub(crate) fn restore(&mut self, stream: &mut ValueStream) {
        restore_pose_data(&mut self.data, stream);
        self.transition_progress = stream.read_f32();
        self.transition_duration = stream.read_f32();
        self.sync_event_offset = stream.read_f32();
        self.blend_weight = stream.read_f32();
        self.cached_pose_buffer = stream.read_opt_buffer();
        self.source_cached_pose_buffer = stream.read_opt_buffer();
        self.inherited_cached_pose_buffers.clear();
        let inherited = stream.read_u16();
        for _ in 0..inherited {
            self.inherited_cached_pose_buffers
                .push(animgraph_task::CachedPoseBufferId::from_raw(stream.read_u32()));
        }
        self.source_cached_pose_blend_weight = stream.read_f32();
        self.source = match stream.read_u16() {
            1 => Some(Either::Left(NodeIndex(stream.read_u16()))),
            2 => Some(Either::Right(NodeIndex(stream.read_u16()))),
            _ => None,
        };
        self.sync_track = stream.read_sync_track();
    }
}

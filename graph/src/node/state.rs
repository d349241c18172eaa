//! State nodes: the unit a state machine activates and transitions
//! between. A state wraps one child blend tree, samples its authored state
//! events around the child's output and tracks which side of a transition
//! it is currently on.

use animgraph_core::{
    NodeIndex, Percentage, SampledEventFlags, SampledEventRange, Seconds, StringId, SyncTrack,
    SyncTrackTime, SyncTrackTimeRange,
};

use crate::{
    arena::NodeArena,
    context::{BranchState, GraphContext},
    node::{PoseNodeData, PoseNodeResult},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionState {
    None,
    TransitioningIn,
    TransitioningOut,
}

#[derive(Debug)]
pub struct StateNode {
    pub data: PoseNodeData,
    child: Option<NodeIndex>,
    owned_value_nodes: Vec<NodeIndex>,
    entry_events: Vec<StringId>,
    execute_events: Vec<StringId>,
    exit_events: Vec<StringId>,
    is_off_state: bool,
    transition_state: TransitionState,
    elapsed_time_in_state: Seconds,
    sampled_event_range: SampledEventRange,
    is_first_update: bool,
    default_sync_track: SyncTrack,
}

impl StateNode {
    pub fn new(node_idx: NodeIndex, settings: &crate::definition::StateSettings) -> StateNode {
        StateNode {
            data: PoseNodeData::new(node_idx),
            child: settings.child,
            owned_value_nodes: settings.owned_value_nodes.clone(),
            entry_events: settings.entry_events.clone(),
            execute_events: settings.execute_events.clone(),
            exit_events: settings.exit_events.clone(),
            is_off_state: settings.is_off_state,
            transition_state: TransitionState::None,
            elapsed_time_in_state: Seconds(0.0),
            sampled_event_range: SampledEventRange::default(),
            is_first_update: true,
            default_sync_track: SyncTrack::default(),
        }
    }

    pub fn is_off_state(&self) -> bool {
        self.is_off_state
    }

    pub fn transition_state(&self) -> TransitionState {
        self.transition_state
    }

    pub fn set_transitioning_state(&mut self, state: TransitionState) {
        self.transition_state = state;
    }

    pub fn elapsed_time_in_state(&self) -> Seconds {
        self.elapsed_time_in_state
    }

    /// The event range this state produced this frame. Transitions re-read
    /// this after `start_transition_out`, which may rewrite it.
    pub fn sampled_event_range(&self) -> SampledEventRange {
        self.sampled_event_range
    }

    pub fn sync_track<'a>(&'a self, nodes: &'a NodeArena) -> &'a SyncTrack {
        match self.child {
            Some(child) => nodes.node(child).sync_track(nodes),
            None => &self.default_sync_track,
        }
    }

    pub fn initialize(
        &mut self,
        nodes: &mut NodeArena,
        ctx: &mut GraphContext<'_>,
        initial_time: SyncTrackTime,
    ) {
        self.data.initialize(Percentage::ZERO);
        self.transition_state = TransitionState::None;
        self.elapsed_time_in_state = Seconds(0.0);
        self.is_first_update = true;
        self.sampled_event_range = SampledEventRange::empty_at(ctx.sampled_events.mark());

        for &value_node in &self.owned_value_nodes {
            nodes.initialize_value(ctx, value_node);
        }

        if let Some(child) = self.child {
            nodes.initialize_pose(ctx, child, initial_time);
            let child_node = nodes.node(child);
            self.data.duration = child_node.duration();
            self.data.previous_time = child_node.previous_time();
            self.data.current_time = child_node.current_time();
        }
    }

    pub fn shutdown(&mut self, nodes: &mut NodeArena, ctx: &mut GraphContext<'_>) {
        if let Some(child) = self.child {
            nodes.shutdown_node(ctx, child);
        }
        for &value_node in &self.owned_value_nodes {
            nodes.shutdown_node(ctx, value_node);
        }
        self.transition_state = TransitionState::None;
        self.data.shutdown();
    }

    pub fn start_transition_in(&mut self) {
        self.transition_state = TransitionState::TransitioningIn;
    }

    /// Flip to transitioning-out and sample the exit events immediately.
    /// If the state already sampled this frame its range is extended,
    /// otherwise it is replaced by the exit events alone.
    pub fn start_transition_out(&mut self, ctx: &mut GraphContext<'_>) {
        self.transition_state = TransitionState::TransitioningOut;

        let before = ctx.sampled_events.mark();
        let mut flags = SampledEventFlags::STATE_EXIT;
        if ctx.branch_state == BranchState::Inactive {
            flags |= SampledEventFlags::IGNORED;
        }
        for &id in &self.exit_events {
            ctx.sampled_events
                .sample(self.data.node_idx, id, self.data.current_time, flags);
        }

        if self.sampled_event_range.end == before {
            self.sampled_event_range.end = ctx.sampled_events.mark();
        } else {
            self.sampled_event_range = ctx.sampled_events.range_from(before);
        }
    }

    pub fn update(
        &mut self,
        nodes: &mut NodeArena,
        ctx: &mut GraphContext<'_>,
        update_range: Option<&SyncTrackTimeRange>,
    ) -> PoseNodeResult {
        self.data.mark_active(ctx);

        let mark = ctx.sampled_events.mark();
        self.sample_state_events(ctx);

        let mut result = match self.child {
            Some(child) if !self.is_off_state => {
                let child_result = match update_range {
                    Some(range) => nodes.update_pose_ranged(ctx, child, range),
                    None => nodes.update_pose(ctx, child),
                };
                let child_node = nodes.node(child);
                self.data.duration = child_node.duration();
                self.data.previous_time = child_node.previous_time();
                self.data.current_time = child_node.current_time();
                child_result
            }
            _ => PoseNodeResult::empty_at(ctx.sampled_events.mark()),
        };

        self.elapsed_time_in_state = self.elapsed_time_in_state + ctx.delta_time;
        self.is_first_update = false;

        result.sampled_events = ctx.sampled_events.range_from(mark);
        self.sampled_event_range = result.sampled_events;
        result
    }

    fn sample_state_events(&self, ctx: &mut GraphContext<'_>) {
        let mut flags = SampledEventFlags::empty();
        if ctx.branch_state == BranchState::Inactive {
            flags |= SampledEventFlags::IGNORED;
        }

        let (ids, kind) = match self.transition_state {
            TransitionState::TransitioningIn => {
                (&self.entry_events, SampledEventFlags::STATE_ENTRY)
            }
            TransitionState::TransitioningOut => {
                (&self.exit_events, SampledEventFlags::STATE_EXIT)
            }
            TransitionState::None => {
                if self.is_first_update {
                    (&self.entry_events, SampledEventFlags::STATE_ENTRY)
                } else {
                    (&self.execute_events, SampledEventFlags::STATE_EXECUTE)
                }
            }
        };
        for &id in ids {
            ctx.sampled_events
                .sample(self.data.node_idx, id, self.data.current_time, flags | kind);
        }
    }
}

// Snapshot support
// ---------------------------------------------------------------------

use crate::recording::{record_pose_data, restore_pose_data, ValueStream};

impl StateNode {
    pub(crate) fn record(&self, stream: &mut ValueStream) {
        record_pose_data(&self.data, stream);
        stream.write_u16(match self.transition_state {
            TransitionState::None => 0,
            TransitionState::TransitioningIn => 1,
            TransitionState::TransitioningOut => 2,
        });
        stream.write_f32(self.elapsed_time_in_state.value());
        stream.write_event_range(self.sampled_event_range);
        stream.write_bool(self.is_first_update);
    }

    pub(crate) fn restore(&mut self, stream: &mut ValueStream) {
        restore_pose_data(&mut self.data, stream);
        self.transition_state = match stream.read_u16() {
            1 => TransitionState::TransitioningIn,
            2 => TransitionState::TransitioningOut,
            _ => TransitionState::None,
        };
        self.elapsed_time_in_state = Seconds(stream.read_f32());
        self.sampled_event_range = stream.read_event_range();
        self.is_first_update = stream.read_bool();
    }
}

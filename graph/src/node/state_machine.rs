//! The state machine node: a table of states, a table of authored
//! transition rules, and at most one new transition scheduled per frame.

use animgraph_core::{NodeIndex, Percentage, SyncTrack, SyncTrackTime, SyncTrackTimeRange};

use crate::{
    arena::NodeArena,
    context::GraphContext,
    definition::StateMachineSettings,
    node::{transition::TransitionInitOptions, PoseNodeData, PoseNodeResult},
};

#[derive(Debug)]
pub struct StateMachineNode {
    pub data: PoseNodeData,
    /// Index into the settings' state table.
    active_state: u16,
    active_state_node: NodeIndex,
    active_transition: Option<NodeIndex>,
}

impl StateMachineNode {
    pub fn new(node_idx: NodeIndex, settings: &StateMachineSettings) -> StateMachineNode {
        let default_state = settings.default_state;
        StateMachineNode {
            data: PoseNodeData::new(node_idx),
            active_state: default_state,
            active_state_node: settings.states[default_state as usize].state_node,
            active_transition: None,
        }
    }

    pub fn active_state(&self) -> u16 {
        self.active_state
    }

    pub fn active_state_node(&self) -> NodeIndex {
        self.active_state_node
    }

    pub fn active_transition(&self) -> Option<NodeIndex> {
        self.active_transition
    }

    pub fn sync_track<'a>(&'a self, nodes: &'a NodeArena) -> &'a SyncTrack {
        match self.active_transition {
            Some(transition) => nodes.node(transition).sync_track(nodes),
            None => nodes.node(self.active_state_node).sync_track(nodes),
        }
    }

    pub fn initialize(
        &mut self,
        nodes: &mut NodeArena,
        ctx: &mut GraphContext<'_>,
        initial_time: SyncTrackTime,
    ) {
        let definition = std::sync::Arc::clone(ctx.definition);
        let settings = definition.state_machine_settings(self.data.node_idx);

        self.data.initialize(Percentage::ZERO);
        self.active_state = settings.default_state;
        self.active_state_node = settings.states[self.active_state as usize].state_node;
        self.active_transition = None;

        nodes.initialize_pose(ctx, self.active_state_node, initial_time);
        let state = nodes.node(self.active_state_node);
        self.data.duration = state.duration();
        self.data.previous_time = state.previous_time();
        self.data.current_time = state.current_time();
    }

    pub fn shutdown(&mut self, nodes: &mut NodeArena, ctx: &mut GraphContext<'_>) {
        // The transition shuts down its own source chain; the target state
        // (our active state) is shut down separately.
        if let Some(transition) = self.active_transition.take() {
            nodes.shutdown_node(ctx, transition);
        }
        nodes.shutdown_node(ctx, self.active_state_node);
        self.data.shutdown();
    }

    pub fn update(
        &mut self,
        nodes: &mut NodeArena,
        ctx: &mut GraphContext<'_>,
        update_range: Option<&SyncTrackTimeRange>,
    ) -> PoseNodeResult {
        self.data.mark_active(ctx);
        let definition = std::sync::Arc::clone(ctx.definition);
        let settings = definition.state_machine_settings(self.data.node_idx);

        // Collapse a finished transition; its target carries on as the
        // active state.
        if let Some(transition) = self.active_transition {
            if nodes.transition(transition).is_complete(ctx.delta_time) {
                nodes.shutdown_node(ctx, transition);
                self.active_transition = None;
            }
        }

        // Evaluate the current state's rules; at most one may fire per
        // frame. Rules whose transition node or target state is still in
        // use are not eligible.
        let rules = &settings.states[self.active_state as usize].transitions;
        let mut pending = None;
        for rule in rules {
            if nodes.node(rule.transition_node).is_initialized() {
                continue;
            }
            let target_state_node = settings.states[rule.target_state as usize].state_node;
            if nodes.node(target_state_node).is_initialized() {
                continue;
            }
            let fires = match rule.condition {
                Some(condition) => nodes.value_as::<bool>(ctx, condition),
                None => false,
            };
            if fires {
                pending = Some(rule);
                break;
            }
        }

        // Update whichever node currently drives the machine. If a rule
        // fired, this result becomes the new transition's source input.
        let source_result = match (self.active_transition, update_range) {
            (Some(t), Some(range)) => nodes.update_pose_ranged(ctx, t, range),
            (Some(t), None) => nodes.update_pose(ctx, t),
            (None, Some(range)) => nodes.update_pose_ranged(ctx, self.active_state_node, range),
            (None, None) => nodes.update_pose(ctx, self.active_state_node),
        };

        let result = if let Some(rule) = pending {
            let transition_idx = rule.transition_node;
            let target_state_node = settings.states[rule.target_state as usize].state_node;

            // The new transition caches its blend when any rule out of its
            // target allows a forced interruption later.
            let should_cache_pose = settings.states[rule.target_state as usize]
                .transitions
                .iter()
                .any(|r| {
                    definition
                        .transition_settings(r.transition_node)
                        .is_forced_transition_allowed()
                });
            let options = TransitionInitOptions {
                source_result,
                should_cache_pose,
            };

            let result = match self.active_transition {
                Some(source_transition) => {
                    let forced_allowed = definition
                        .transition_settings(transition_idx)
                        .is_forced_transition_allowed();
                    let has_cached_pose = nodes.transition(source_transition).has_cached_pose();
                    let forced = if forced_allowed && !has_cached_pose {
                        // Requested a forced interruption with nothing to
                        // read back; recoverable as a chained transition.
                        debug_assert!(false, "forced transition without a cached source pose");
                        ctx.log_node_warning(
                            transition_idx,
                            "forced transition without a cached source pose; chaining instead",
                        );
                        false
                    } else {
                        forced_allowed
                    };
                    nodes.start_transition_from_transition(
                        ctx,
                        transition_idx,
                        options,
                        source_transition,
                        forced,
                    )
                }
                None => nodes.start_transition_from_state(
                    ctx,
                    transition_idx,
                    options,
                    self.active_state_node,
                ),
            };

            self.active_transition = Some(transition_idx);
            self.active_state = rule.target_state;
            self.active_state_node = target_state_node;
            result
        } else {
            source_result
        };

        // Mirror the driving node's timing.
        let driving = self.active_transition.unwrap_or(self.active_state_node);
        let driving_node = nodes.node(driving);
        self.data.duration = driving_node.duration();
        self.data.previous_time = driving_node.previous_time();
        self.data.current_time = driving_node.current_time();

        result
    }
}

// Snapshot support
// ---------------------------------------------------------------------

use crate::recording::{record_pose_data, restore_pose_data, ValueStream};

impl StateMachineNode {
    pub(crate) fn record(&self, stream: &mut ValueStream) {
        record_pose_data(&self.data, stream);
        stream.write_u16(self.active_state);
        stream.write_u16(self.active_state_node.0);
        stream.write_opt_u16(self.active_transition.map(|idx| idx.0));
    }

    pub(crate) fn restore(&mut self, stream: &mut ValueStream) {
        restore_pose_data(&mut self.data, stream);
        self.active_state = stream.read_u16();
        self.active_state_node = NodeIndex(stream.read_u16());
        self.active_transition = stream.read_opt_u16().map(NodeIndex);
    }
}

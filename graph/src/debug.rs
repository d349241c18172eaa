//! Development-mode observables: active-node list, graph log, root-motion
//! recorder. None of it is load-bearing; the evaluator behaves identically
//! with the `development-tools` feature disabled, only the accessors
//! disappear.

use animgraph_core::{NodeIndex, Percentage, Seconds, Transform};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogSeverity {
    Warning,
    Error,
}

#[derive(Clone, Debug)]
pub struct GraphLogEntry {
    pub frame_id: u64,
    pub node: NodeIndex,
    pub severity: LogSeverity,
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RootMotionActionKind {
    Sample,
    Blend,
    Modify,
}

#[derive(Clone, Copy, Debug)]
pub struct RootMotionAction {
    pub node: NodeIndex,
    pub kind: RootMotionActionKind,
    pub delta: Transform,
}

/// Records every root-motion contribution a frame makes, so tooling can
/// visualize where the final delta came from.
#[derive(Debug, Default)]
pub struct RootMotionDebugger {
    start_transform: Transform,
    end_transform: Transform,
    actions: Vec<RootMotionAction>,
}

impl RootMotionDebugger {
    pub fn begin_frame(&mut self, start_transform: Transform) {
        self.actions.clear();
        self.start_transform = start_transform;
    }

    pub fn record(
        &mut self,
        node: NodeIndex,
        kind: RootMotionActionKind,
        delta: Transform,
    ) -> usize {
        self.actions.push(RootMotionAction { node, kind, delta });
        self.actions.len() - 1
    }

    pub fn last_action_index(&self) -> Option<usize> {
        self.actions.len().checked_sub(1)
    }

    pub fn end_frame(&mut self, end_transform: Transform) {
        self.end_transform = end_transform;
    }

    pub fn start_transform(&self) -> &Transform {
        &self.start_transform
    }

    pub fn end_transform(&self) -> &Transform {
        &self.end_transform
    }

    pub fn actions(&self) -> &[RootMotionAction] {
        &self.actions
    }
}

/// Snapshot of a pose node's timing, exposed for tooling.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoseNodeDebugInfo {
    pub previous_time: Percentage,
    pub current_time: Percentage,
    pub duration: Seconds,
}

/// Per-instance debug state; reset piecewise at frame begin.
#[derive(Debug, Default)]
pub struct GraphDebugState {
    pub active_nodes: Vec<NodeIndex>,
    pub log: Vec<GraphLogEntry>,
    pub root_motion: RootMotionDebugger,
}

impl GraphDebugState {
    pub fn begin_frame(&mut self, start_transform: Transform) {
        self.active_nodes.clear();
        self.root_motion.begin_frame(start_transform);
    }
}

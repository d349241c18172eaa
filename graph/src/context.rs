//! The evaluation context: the only mutable shared object during a frame.
//!
//! Every `update` receives `&mut GraphContext`. It threads the frame's
//! inputs (delta time, world transform, physics scene), the frame-scoped
//! collectors (sampled events, bone-mask pool, task system) and the two
//! evaluation flags (branch state, layer context) through the node tree.

use std::sync::Arc;

use animgraph_core::{
    BoneMaskHandle, BoneMaskPool, NodeIndex, SampledEventsBuffer, Seconds, Skeleton, Transform,
};
use animgraph_task::TaskSystem;

use crate::{
    debug::{GraphDebugState, GraphLogEntry, LogSeverity, RootMotionActionKind},
    definition::GraphDefinition,
};

/// Opaque physics scene passed through to nodes that query it.
pub trait PhysicsScene {}

/// Whether the branch currently being evaluated feeds the final output.
/// The source side of a transition runs `Inactive` so downstream guards
/// can suppress child-graph side effects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BranchState {
    Active,
    Inactive,
}

/// Blend weight and optional bone mask accumulated inside a layered
/// blend. `None` on the context means evaluation is not inside a layer.
#[derive(Clone, Copy, Debug)]
pub struct LayerContext {
    pub weight: f32,
    pub mask: Option<BoneMaskHandle>,
}

impl LayerContext {
    pub fn new() -> LayerContext {
        LayerContext {
            weight: 1.0,
            mask: None,
        }
    }
}

impl Default for LayerContext {
    fn default() -> Self {
        LayerContext::new()
    }
}

pub struct GraphContext<'a> {
    pub definition: &'a Arc<GraphDefinition>,
    pub skeleton: &'a Arc<Skeleton>,
    pub task_system: &'a mut TaskSystem,
    pub sampled_events: &'a mut SampledEventsBuffer,
    pub bone_mask_pool: &'a mut BoneMaskPool,
    pub physics_scene: Option<&'a dyn PhysicsScene>,
    pub debug: &'a mut GraphDebugState,
    pub frame_id: u64,
    pub delta_time: Seconds,
    pub world_transform: Transform,
    pub branch_state: BranchState,
    pub layer: Option<LayerContext>,
}

impl<'a> GraphContext<'a> {
    pub fn is_in_layer(&self) -> bool {
        self.layer.is_some()
    }

    /// Record a node as active this frame. Only active-branch nodes land
    /// in the debug list.
    pub fn mark_node_active(&mut self, node: NodeIndex) {
        if self.branch_state == BranchState::Active {
            self.debug.active_nodes.push(node);
        }
    }

    pub fn record_root_motion(
        &mut self,
        node: NodeIndex,
        kind: RootMotionActionKind,
        delta: Transform,
    ) {
        self.debug.root_motion.record(node, kind, delta);
    }

    pub fn log_node_warning(&mut self, node: NodeIndex, message: impl Into<String>) {
        let message = message.into();
        log::warn!("graph node {}: {}", node, message);
        self.debug.log.push(GraphLogEntry {
            frame_id: self.frame_id,
            node,
            severity: LogSeverity::Warning,
            message,
        });
    }

    pub fn log_node_error(&mut self, node: NodeIndex, message: impl Into<String>) {
        let message = message.into();
        log::error!("graph node {}: {}", node, message);
        self.debug.log.push(GraphLogEntry {
            frame_id: self.frame_id,
            node,
            severity: LogSeverity::Error,
            message,
        });
    }
}

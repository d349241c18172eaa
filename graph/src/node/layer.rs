//! Layered blending: a base input plus N additive layers, each evaluated
//! inside a fresh layer context. This node is the producer of the layer
//! context the transition engine recombines.

use animgraph_core::{
    Blender, BoneMask, NodeIndex, RootMotionBlendMode, SyncTrack, SyncTrackTime,
    SyncTrackTimeRange,
};
use animgraph_task::Task;

use crate::{
    arena::NodeArena,
    context::{GraphContext, LayerContext},
    definition::LayerBlendSettings,
    node::{PoseNodeData, PoseNodeResult},
};

#[derive(Debug)]
pub struct LayerBlendNode {
    pub data: PoseNodeData,
    base: NodeIndex,
}

impl LayerBlendNode {
    pub fn new(node_idx: NodeIndex, settings: &LayerBlendSettings) -> LayerBlendNode {
        LayerBlendNode {
            data: PoseNodeData::new(node_idx),
            base: settings.base,
        }
    }

    fn settings<'a>(
        &self,
        definition: &'a crate::definition::GraphDefinition,
    ) -> &'a LayerBlendSettings {
        match definition.settings(self.data.node_idx) {
            crate::definition::NodeSettings::LayerBlend(s) => s,
            _ => panic!("node {} is not a layer blend", self.data.node_idx),
        }
    }

    /// Timing follows the base input.
    pub fn sync_track<'a>(&'a self, nodes: &'a NodeArena) -> &'a SyncTrack {
        nodes.node(self.base).sync_track(nodes)
    }

    pub fn initialize(
        &mut self,
        nodes: &mut NodeArena,
        ctx: &mut GraphContext<'_>,
        initial_time: SyncTrackTime,
    ) {
        let definition = std::sync::Arc::clone(ctx.definition);
        let settings = self.settings(&definition);

        self.data.initialize(animgraph_core::Percentage::ZERO);
        nodes.initialize_pose(ctx, settings.base, initial_time);
        for layer in &settings.layers {
            nodes.initialize_pose(ctx, layer.input, SyncTrackTime::default());
        }

        let base = nodes.node(settings.base);
        self.data.duration = base.duration();
        self.data.previous_time = base.previous_time();
        self.data.current_time = base.current_time();
    }

    pub fn shutdown(&mut self, nodes: &mut NodeArena, ctx: &mut GraphContext<'_>) {
        let definition = std::sync::Arc::clone(ctx.definition);
        let settings = self.settings(&definition);

        for layer in settings.layers.iter().rev() {
            nodes.shutdown_node(ctx, layer.input);
        }
        nodes.shutdown_node(ctx, settings.base);
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
        let settings = self.settings(&definition);

        let mut result = match update_range {
            Some(range) => nodes.update_pose_ranged(ctx, settings.base, range),
            None => nodes.update_pose(ctx, settings.base),
        };
        let base = nodes.node(settings.base);
        self.data.duration = base.duration();
        self.data.previous_time = base.previous_time();
        self.data.current_time = base.current_time();

        for layer in &settings.layers {
            // Each layer runs in a fresh layer context; transitions and
            // states inside it may adjust the weight and mask.
            let parent_layer = ctx.layer;
            let mut layer_ctx = LayerContext::new();
            if let Some(weights) = &layer.mask_weights {
                let handle = ctx.bone_mask_pool.alloc();
                *ctx.bone_mask_pool.get_mut(handle) = BoneMask::from_weights(weights.clone());
                layer_ctx.mask = Some(handle);
            }
            ctx.layer = Some(layer_ctx);

            let layer_result = nodes.update_pose(ctx, layer.input);

            let final_layer_ctx = ctx.layer.take().unwrap_or_default();
            ctx.layer = parent_layer;

            let authored_weight: f32 = match layer.weight_node {
                Some(weight_node) => nodes.value_as(ctx, weight_node),
                None => 1.0,
            };
            let weight = (final_layer_ctx.weight * authored_weight).max(0.0).min(1.0);

            match (result.task, layer_result.task) {
                (Some(base_task), Some(layer_task)) => {
                    let mask = final_layer_ctx
                        .mask
                        .map(|handle| ctx.bone_mask_pool.get(handle).clone());
                    result.task = Some(ctx.task_system.register_task(Task::Blend {
                        source_node: self.data.node_idx,
                        first: base_task,
                        second: layer_task,
                        blend_weight: weight,
                        mask,
                    }));
                    result.root_motion_delta = Blender::blend_root_motion_deltas(
                        &result.root_motion_delta,
                        &layer_result.root_motion_delta,
                        weight,
                        RootMotionBlendMode::Blend,
                    );
                }
                (None, Some(_)) => {
                    result.task = layer_result.task;
                    result.root_motion_delta = layer_result.root_motion_delta;
                }
                _ => {}
            }

            result.sampled_events = ctx.sampled_events.blend_event_ranges(
                result.sampled_events,
                layer_result.sampled_events,
                weight,
            );
        }

        result
    }
}

// Snapshot support
// ---------------------------------------------------------------------

use crate::recording::{record_pose_data, restore_pose_data, ValueStream};

impl LayerBlendNode {
    pub(crate) fn record(&self, stream: &mut ValueStream) {
        record_pose_data(&self.data, stream);
    }

    pub(crate) fn restore(&mut self, stream: &mut ValueStream) {
        restore_pose_data(&mut self.data, stream);
    }
}

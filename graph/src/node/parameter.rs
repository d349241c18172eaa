//! Value nodes: control parameters, constants and cached values.

use animgraph_core::NodeIndex;

use crate::{
    arena::NodeArena,
    context::GraphContext,
    definition::{CachedValueMode, CachedValueSettings, ConstValueSettings, ControlParameterSettings},
    node::{GraphValue, GraphValueType, ValueNodeData},
};

/// Externally writable typed slot. The stored value *is* the per-frame
/// cache: a write lands in the slot and every read this frame returns it.
#[derive(Debug)]
pub struct ControlParameterNode {
    pub data: ValueNodeData,
    value_type: GraphValueType,
    value: GraphValue,
}

impl ControlParameterNode {
    pub fn new(node_idx: NodeIndex, settings: &ControlParameterSettings) -> ControlParameterNode {
        ControlParameterNode {
            data: ValueNodeData::new(node_idx),
            value_type: settings.value_type,
            value: GraphValue::default_for(settings.value_type),
        }
    }

    pub fn value_type(&self) -> GraphValueType {
        self.value_type
    }

    pub fn value(&mut self, _ctx: &mut GraphContext<'_>) -> GraphValue {
        self.value
    }

    pub fn peek(&self) -> GraphValue {
        self.value
    }

    pub fn set(&mut self, value: GraphValue) {
        debug_assert_eq!(
            value.value_type(),
            self.value_type,
            "parameter {} written with mismatched type",
            self.data.node_idx
        );
        if value.value_type() == self.value_type {
            self.value = value;
        }
    }
}

/// Authored constant.
#[derive(Debug)]
pub struct ConstValueNode {
    pub data: ValueNodeData,
    value: GraphValue,
}

impl ConstValueNode {
    pub fn new(node_idx: NodeIndex, settings: &ConstValueSettings) -> ConstValueNode {
        ConstValueNode {
            data: ValueNodeData::new(node_idx),
            value: settings.value,
        }
    }

    pub fn value_type(&self) -> GraphValueType {
        self.value.value_type()
    }

    pub fn value(&mut self, _ctx: &mut GraphContext<'_>) -> GraphValue {
        self.value
    }
}

/// Snapshots an upstream value relative to its owning state's lifecycle.
///
/// `OnEntry` captures the upstream value at the first read after the state
/// activates and holds it until the state re-activates. `OnExit` passes
/// the live value through while the state is active and freezes the last
/// read when the state shuts down.
#[derive(Debug)]
pub struct CachedValueNode {
    pub data: ValueNodeData,
    source: NodeIndex,
    mode: CachedValueMode,
    captured: Option<GraphValue>,
}

impl CachedValueNode {
    pub fn new(node_idx: NodeIndex, settings: &CachedValueSettings) -> CachedValueNode {
        CachedValueNode {
            data: ValueNodeData::new(node_idx),
            source: settings.source,
            mode: settings.mode,
            captured: None,
        }
    }

    pub fn value_type(&self) -> GraphValueType {
        // Mirrors whatever the upstream produces; unknown until read.
        self.captured
            .map(|v| v.value_type())
            .unwrap_or(GraphValueType::Float)
    }

    pub fn mode(&self) -> CachedValueMode {
        self.mode
    }

    pub fn initialize(&mut self, nodes: &mut NodeArena, ctx: &mut GraphContext<'_>) {
        let first_activation = !self.data.is_initialized();
        self.data.initialize();
        if first_activation {
            match self.mode {
                // Snapshot the upstream value at state entry.
                CachedValueMode::OnEntry => {
                    let value = nodes.value(ctx, self.source);
                    self.captured = Some(value);
                }
                CachedValueMode::OnExit => self.captured = None,
            }
        }
    }

    pub fn shutdown(&mut self, nodes: &mut NodeArena, ctx: &mut GraphContext<'_>) {
        if self.data.init_count == 1 {
            if let CachedValueMode::OnExit = self.mode {
                // Freeze the value as it stands at state exit.
                let value = nodes.value(ctx, self.source);
                self.captured = Some(value);
            }
        }
        self.data.shutdown();
    }

    pub fn value(&mut self, nodes: &mut NodeArena, ctx: &mut GraphContext<'_>) -> GraphValue {
        if let Some(value) = self.data.cached_this_frame(ctx.frame_id) {
            return value;
        }

        let value = match self.mode {
            // Holds the entry snapshot while the state is active (and
            // after it deactivates, until the next activation). Reads on a
            // never-activated node pass through.
            CachedValueMode::OnEntry => match self.captured {
                Some(captured) => captured,
                None => nodes.value(ctx, self.source),
            },
            // Live while the owning state is active, frozen once it exits.
            CachedValueMode::OnExit => {
                if self.data.is_initialized() {
                    nodes.value(ctx, self.source)
                } else {
                    match self.captured {
                        Some(captured) => captured,
                        None => nodes.value(ctx, self.source),
                    }
                }
            }
        };
        self.data.store(ctx.frame_id, value);
        value
    }
}

// Snapshot support
// ---------------------------------------------------------------------

use crate::recording::{record_value_data, restore_value_data, ValueStream};

impl ControlParameterNode {
    pub(crate) fn record(&self, stream: &mut ValueStream) {
        record_value_data(&self.data, stream);
        stream.write_value(self.value);
    }

    pub(crate) fn restore(&mut self, stream: &mut ValueStream) {
        restore_value_data(&mut self.data, stream);
        self.value = stream.read_value();
    }
}

impl ConstValueNode {
    pub(crate) fn record(&self, stream: &mut ValueStream) {
        record_value_data(&self.data, stream);
    }

    pub(crate) fn restore(&mut self, stream: &mut ValueStream) {
        restore_value_data(&mut self.data, stream);
    }
}

impl CachedValueNode {
    pub(crate) fn record(&self, stream: &mut ValueStream) {
        record_value_data(&self.data, stream);
        stream.write_opt_value(self.captured);
    }

    pub(crate) fn restore(&mut self, stream: &mut ValueStream) {
        restore_value_data(&mut self.data, stream);
        self.captured = stream.read_opt_value();
    }
}

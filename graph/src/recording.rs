//! Record/replay support.
//!
//! A per-frame record captures the evaluation inputs; a full snapshot is
//! an ordered typed value stream with every node's persisted fields plus
//! the cached-pose inventory. Restoring reads the stream back in the same
//! order, so a snapshot restored onto a fresh instance of the same
//! definition continues bit-identically.

use animgraph_core::{
    NodeIndex, Percentage, SampledEventRange, Seconds, StringId, SyncTrack, SyncTrackEvent,
    SyncTrackTime, SyncTrackTimeRange, Transform,
};
use animgraph_task::{CachedPoseBufferId, CachedPoseSnapshot};
use nalgebra::{Quaternion, UnitQuaternion, Vector3};

use crate::{
    arena::NodeArena,
    instance::GraphInstance,
    node::{GraphValue, PoseNodeData, RuntimeNode, Target, ValueNodeData},
};

/// The inputs of one recorded evaluation.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedFrameData {
    pub delta_time: Seconds,
    pub start_world_transform: Transform,
    pub update_range: Option<SyncTrackTimeRange>,
    pub parameter_values: Vec<GraphValue>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum RecordedValue {
    Bool(bool),
    U16(u16),
    U32(u32),
    U64(u64),
    I32(i32),
    F32(f32),
}

/// Ordered typed stream of persisted fields. Writes and reads must agree
/// on order and type; disagreement is a definition/version mismatch and
/// asserts.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValueStream {
    values: Vec<RecordedValue>,
    cursor: usize,
}

macro_rules! stream_accessors {
    ($write:ident, $read:ident, $ty:ty, $variant:ident) => {
        pub fn $write(&mut self, value: $ty) {
            self.values.push(RecordedValue::$variant(value));
        }

        pub fn $read(&mut self) -> $ty {
            let value = self.values.get(self.cursor).copied();
            self.cursor += 1;
            match value {
                Some(RecordedValue::$variant(v)) => v,
                other => {
                    debug_assert!(false, "recorded state stream mismatch: {:?}", other);
                    Default::default()
                }
            }
        }
    };
}

impl ValueStream {
    pub fn new() -> ValueStream {
        ValueStream::default()
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.values.len()
    }

    stream_accessors!(write_bool, read_bool, bool, Bool);
    stream_accessors!(write_u16, read_u16, u16, U16);
    stream_accessors!(write_u32, read_u32, u32, U32);
    stream_accessors!(write_u64, read_u64, u64, U64);
    stream_accessors!(write_i32, read_i32, i32, I32);
    stream_accessors!(write_f32, read_f32, f32, F32);

    pub fn write_opt_u16(&mut self, value: Option<u16>) {
        self.write_bool(value.is_some());
        if let Some(v) = value {
            self.write_u16(v);
        }
    }

    pub fn read_opt_u16(&mut self) -> Option<u16> {
        if self.read_bool() {
            Some(self.read_u16())
        } else {
            None
        }
    }

    pub fn write_opt_buffer(&mut self, value: Option<CachedPoseBufferId>) {
        self.write_bool(value.is_some());
        if let Some(v) = value {
            self.write_u32(v.to_raw());
        }
    }

    pub fn read_opt_buffer(&mut self) -> Option<CachedPoseBufferId> {
        if self.read_bool() {
            Some(CachedPoseBufferId::from_raw(self.read_u32()))
        } else {
            None
        }
    }

    pub fn write_id(&mut self, id: StringId) {
        self.write_u64(id.raw());
    }

    pub fn read_id(&mut self) -> StringId {
        StringId::from_raw(self.read_u64())
    }

    pub fn write_event_range(&mut self, range: SampledEventRange) {
        self.write_u32(range.start);
        self.write_u32(range.end);
    }

    pub fn read_event_range(&mut self) -> SampledEventRange {
        let start = self.read_u32();
        let end = self.read_u32();
        SampledEventRange::new(start, end)
    }

    pub fn write_transform(&mut self, transform: &Transform) {
        let coords = transform.rotation.as_ref().coords;
        self.write_f32(coords.x);
        self.write_f32(coords.y);
        self.write_f32(coords.z);
        self.write_f32(coords.w);
        self.write_f32(transform.translation.x);
        self.write_f32(transform.translation.y);
        self.write_f32(transform.translation.z);
        self.write_f32(transform.scale);
    }

    pub fn read_transform(&mut self) -> Transform {
        let x = self.read_f32();
        let y = self.read_f32();
        let z = self.read_f32();
        let w = self.read_f32();
        let translation = Vector3::new(self.read_f32(), self.read_f32(), self.read_f32());
        let scale = self.read_f32();
        Transform {
            // The stored quaternion was unit; keep the exact bits.
            rotation: UnitQuaternion::new_unchecked(Quaternion::new(w, x, y, z)),
            translation,
            scale,
        }
    }

    pub fn write_value(&mut self, value: GraphValue) {
        match value {
            GraphValue::Bool(v) => {
                self.write_u16(0);
                self.write_bool(v);
            }
            GraphValue::Int(v) => {
                self.write_u16(1);
                self.write_i32(v);
            }
            GraphValue::Float(v) => {
                self.write_u16(2);
                self.write_f32(v);
            }
            GraphValue::Vector(v) => {
                self.write_u16(3);
                self.write_f32(v.x);
                self.write_f32(v.y);
                self.write_f32(v.z);
            }
            GraphValue::Target(v) => {
                self.write_u16(4);
                self.write_transform(&v.transform);
                self.write_bool(v.bone_id.is_some());
                if let Some(id) = v.bone_id {
                    self.write_id(id);
                }
            }
            GraphValue::Id(v) => {
                self.write_u16(5);
                self.write_id(v);
            }
        }
    }

    pub fn read_value(&mut self) -> GraphValue {
        match self.read_u16() {
            0 => GraphValue::Bool(self.read_bool()),
            1 => GraphValue::Int(self.read_i32()),
            2 => GraphValue::Float(self.read_f32()),
            3 => GraphValue::Vector(Vector3::new(
                self.read_f32(),
                self.read_f32(),
                self.read_f32(),
            )),
            4 => {
                let transform = self.read_transform();
                let bone_id = if self.read_bool() {
                    Some(self.read_id())
                } else {
                    None
                };
                GraphValue::Target(Target { transform, bone_id })
            }
            5 => GraphValue::Id(self.read_id()),
            tag => {
                debug_assert!(false, "unknown recorded value tag {}", tag);
                GraphValue::Float(0.0)
            }
        }
    }

    pub fn write_opt_value(&mut self, value: Option<GraphValue>) {
        self.write_bool(value.is_some());
        if let Some(v) = value {
            self.write_value(v);
        }
    }

    pub fn read_opt_value(&mut self) -> Option<GraphValue> {
        if self.read_bool() {
            Some(self.read_value())
        } else {
            None
        }
    }

    pub fn write_sync_time(&mut self, time: SyncTrackTime) {
        self.write_i32(time.event_idx);
        self.write_f32(time.percentage_through.value());
    }

    pub fn read_sync_time(&mut self) -> SyncTrackTime {
        let event_idx = self.read_i32();
        let percentage = self.read_f32();
        SyncTrackTime::new(event_idx, percentage)
    }

    pub fn write_sync_track(&mut self, track: &SyncTrack) {
        self.write_u16(track.num_events() as u16);
        for event in track.events() {
            self.write_id(event.id);
            self.write_f32(event.start_time.value());
            self.write_f32(event.duration.value());
        }
    }

    pub fn read_sync_track(&mut self) -> SyncTrack {
        let count = self.read_u16();
        let events = (0..count)
            .map(|_| SyncTrackEvent {
                id: self.read_id(),
                start_time: Percentage(self.read_f32()),
                duration: Percentage(self.read_f32()),
            })
            .collect::<Vec<_>>();
        SyncTrack::from_events(events)
    }
}

// Common node data
// ---------------------------------------------------------------------

pub(crate) fn record_pose_data(data: &PoseNodeData, stream: &mut ValueStream) {
    stream.write_u16(data.init_count);
    stream.write_u64(data.last_update_frame);
    stream.write_f32(data.previous_time.value());
    stream.write_f32(data.current_time.value());
    stream.write_f32(data.duration.value());
}

pub(crate) fn restore_pose_data(data: &mut PoseNodeData, stream: &mut ValueStream) {
    data.init_count = stream.read_u16();
    data.last_update_frame = stream.read_u64();
    data.previous_time = Percentage(stream.read_f32());
    data.current_time = Percentage(stream.read_f32());
    data.duration = Seconds(stream.read_f32());
}

pub(crate) fn record_value_data(data: &ValueNodeData, stream: &mut ValueStream) {
    stream.write_u16(data.init_count);
    stream.write_u64(data.cached_frame);
    stream.write_opt_value(data.cached);
}

pub(crate) fn restore_value_data(data: &mut ValueNodeData, stream: &mut ValueStream) {
    data.init_count = stream.read_u16();
    data.cached_frame = stream.read_u64();
    data.cached = stream.read_opt_value();
}

// Arena-wide dispatch
// ---------------------------------------------------------------------

impl NodeArena {
    pub(crate) fn record_all(&self, stream: &mut ValueStream) {
        for idx in 0..self.len() {
            let node = self.node(NodeIndex(idx as u16));
            match node {
                RuntimeNode::ControlParameter(n) => n.record(stream),
                RuntimeNode::ConstValue(n) => n.record(stream),
                RuntimeNode::CachedValue(n) => n.record(stream),
                RuntimeNode::Clip(n) => n.record(stream),
                RuntimeNode::ReferencePose(n) => n.record(stream),
                RuntimeNode::State(n) => n.record(stream),
                RuntimeNode::StateMachine(n) => n.record(stream),
                RuntimeNode::Transition(n) => n.record(stream),
                RuntimeNode::LayerBlend(n) => n.record(stream),
                RuntimeNode::ExternalGraphSlot(n) => n.record(stream),
                RuntimeNode::ChildGraph(n) => n.record(stream),
                RuntimeNode::Vacant => unreachable!("snapshot during evaluation"),
            }
        }
    }

    pub(crate) fn restore_all(&mut self, stream: &mut ValueStream) {
        for idx in 0..self.len() {
            let node = self.node_mut(NodeIndex(idx as u16));
            match node {
                RuntimeNode::ControlParameter(n) => n.restore(stream),
                RuntimeNode::ConstValue(n) => n.restore(stream),
                RuntimeNode::CachedValue(n) => n.restore(stream),
                RuntimeNode::Clip(n) => n.restore(stream),
                RuntimeNode::ReferencePose(n) => n.restore(stream),
                RuntimeNode::State(n) => n.restore(stream),
                RuntimeNode::StateMachine(n) => n.restore(stream),
                RuntimeNode::Transition(n) => n.restore(stream),
                RuntimeNode::LayerBlend(n) => n.restore(stream),
                RuntimeNode::ExternalGraphSlot(n) => n.restore(stream),
                RuntimeNode::ChildGraph(n) => n.restore(stream),
                RuntimeNode::Vacant => unreachable!("restore during evaluation"),
            }
        }
    }
}

/// Full-instance snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedGraphState {
    frame_id: u64,
    nodes: ValueStream,
    cached_poses: CachedPoseSnapshot,
}

impl RecordedGraphState {
    pub(crate) fn record(instance: &GraphInstance) -> RecordedGraphState {
        let mut nodes = ValueStream::new();
        instance.nodes().record_all(&mut nodes);
        let cached_poses = instance
            .task_system()
            .map(|task_system| task_system.cached_pose_snapshot())
            .unwrap_or_default();
        RecordedGraphState {
            frame_id: instance.frame_id(),
            nodes,
            cached_poses,
        }
    }

    pub(crate) fn restore(&self, instance: &mut GraphInstance) {
        let mut stream = self.nodes.clone();
        stream.rewind();
        instance.nodes_mut().restore_all(&mut stream);
        debug_assert!(stream.is_exhausted(), "snapshot not fully consumed");
        instance.set_frame_id(self.frame_id);
        if let Some(task_system) = instance.task_system_mut() {
            task_system.restore_cached_poses(&self.cached_poses);
        }
    }
}

//! Runtime node kinds and the capability surface shared between them.
//!
//! The node set is closed: every kind is a variant of [`RuntimeNode`] and
//! lives in the instance arena. Nodes come in two capability sets — value
//! nodes produce a typed [`GraphValue`] on demand, pose nodes produce a
//! [`PoseNodeResult`] plus sync-track timing.

pub mod external;
pub mod layer;
pub mod parameter;
pub mod pose;
pub mod state;
pub mod state_machine;
pub mod transition;

use nalgebra::Vector3;

use animgraph_core::{
    NodeIndex, Percentage, SampledEventRange, Seconds, StringId, SyncTrack, Transform,
};
use animgraph_task::TaskIndex;

use crate::{arena::NodeArena, context::GraphContext};

pub use self::{
    external::{ChildGraphNode, ExternalGraphSlotNode},
    layer::LayerBlendNode,
    parameter::{CachedValueNode, ConstValueNode, ControlParameterNode},
    pose::{ClipNode, ReferencePoseNode},
    state::{StateNode, TransitionState},
    state_machine::StateMachineNode,
    transition::TransitionNode,
};

/// World- or bone-space aim target.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Target {
    pub transform: Transform,
    pub bone_id: Option<StringId>,
}

impl Default for Target {
    fn default() -> Self {
        Target {
            transform: Transform::identity(),
            bone_id: None,
        }
    }
}

/// The closed set of value types a value node can produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum GraphValueType {
    Bool,
    Int,
    Float,
    Vector,
    Target,
    Id,
    Pose,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GraphValue {
    Bool(bool),
    Int(i32),
    Float(f32),
    Vector(Vector3<f32>),
    Target(Target),
    Id(StringId),
}

impl GraphValue {
    pub fn value_type(&self) -> GraphValueType {
        match self {
            GraphValue::Bool(_) => GraphValueType::Bool,
            GraphValue::Int(_) => GraphValueType::Int,
            GraphValue::Float(_) => GraphValueType::Float,
            GraphValue::Vector(_) => GraphValueType::Vector,
            GraphValue::Target(_) => GraphValueType::Target,
            GraphValue::Id(_) => GraphValueType::Id,
        }
    }

    pub fn default_for(value_type: GraphValueType) -> GraphValue {
        match value_type {
            GraphValueType::Bool => GraphValue::Bool(false),
            GraphValueType::Int => GraphValue::Int(0),
            GraphValueType::Float => GraphValue::Float(0.0),
            GraphValueType::Vector => GraphValue::Vector(Vector3::zeros()),
            GraphValueType::Target => GraphValue::Target(Target::default()),
            GraphValueType::Id => GraphValue::Id(StringId::none()),
            GraphValueType::Pose => {
                debug_assert!(false, "pose is not a value-node type");
                GraphValue::Bool(false)
            }
        }
    }
}

/// Typed access to [`GraphValue`] slots; implemented for every payload
/// type so parameter reads and writes stay statically typed.
pub trait GraphValueConvert: Sized {
    const TYPE: GraphValueType;
    fn from_value(value: GraphValue) -> Option<Self>;
    fn into_value(self) -> GraphValue;

    /// The type's zero value, taken from [`GraphValue::default_for`];
    /// used as the release-mode fallback on a type-mismatched read.
    fn default_value() -> Self {
        match Self::from_value(GraphValue::default_for(Self::TYPE)) {
            Some(value) => value,
            None => unreachable!("default value always matches its own type"),
        }
    }
}

macro_rules! impl_graph_value_convert {
    ($ty:ty, $variant:ident, $kind:ident) => {
        impl GraphValueConvert for $ty {
            const TYPE: GraphValueType = GraphValueType::$kind;

            fn from_value(value: GraphValue) -> Option<Self> {
                match value {
                    GraphValue::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn into_value(self) -> GraphValue {
                GraphValue::$variant(self)
            }
        }
    };
}

impl_graph_value_convert!(bool, Bool, Bool);
impl_graph_value_convert!(i32, Int, Int);
impl_graph_value_convert!(f32, Float, Float);
impl_graph_value_convert!(Vector3<f32>, Vector, Vector);
impl_graph_value_convert!(Target, Target, Target);
impl_graph_value_convert!(StringId, Id, Id);

/// What a pose node hands back from `update`: the task it registered (if
/// any), the root-motion delta it covered, and the slice of the frame's
/// sampled-events buffer it produced.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoseNodeResult {
    pub task: Option<TaskIndex>,
    pub root_motion_delta: Transform,
    pub sampled_events: SampledEventRange,
}

impl PoseNodeResult {
    pub fn empty_at(mark: u32) -> PoseNodeResult {
        PoseNodeResult {
            task: None,
            root_motion_delta: Transform::identity(),
            sampled_events: SampledEventRange::empty_at(mark),
        }
    }

    pub fn has_registered_tasks(&self) -> bool {
        self.task.is_some()
    }
}

/// Easing applied to a transition's progress to produce its blend weight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum EasingOperation {
    Linear,
    QuadIn,
    QuadOut,
    QuadInOut,
    CubicIn,
    CubicOut,
    SineIn,
    SineOut,
}

impl Default for EasingOperation {
    fn default() -> Self {
        EasingOperation::Linear
    }
}

impl EasingOperation {
    pub fn apply(self, t: f32) -> f32 {
        let t = t.max(0.0).min(1.0);
        match self {
            EasingOperation::Linear => t,
            EasingOperation::QuadIn => t * t,
            EasingOperation::QuadOut => t * (2.0 - t),
            EasingOperation::QuadInOut => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    -1.0 + (4.0 - 2.0 * t) * t
                }
            }
            EasingOperation::CubicIn => t * t * t,
            EasingOperation::CubicOut => {
                let u = t - 1.0;
                u * u * u + 1.0
            }
            EasingOperation::SineIn => 1.0 - (t * std::f32::consts::FRAC_PI_2).cos(),
            EasingOperation::SineOut => (t * std::f32::consts::FRAC_PI_2).sin(),
        }
    }
}

/// State every pose node carries: lifecycle, timing and activity
/// bookkeeping.
#[derive(Clone, Debug)]
pub struct PoseNodeData {
    pub node_idx: NodeIndex,
    pub init_count: u16,
    pub last_update_frame: u64,
    pub previous_time: Percentage,
    pub current_time: Percentage,
    pub duration: Seconds,
}

impl PoseNodeData {
    pub fn new(node_idx: NodeIndex) -> PoseNodeData {
        PoseNodeData {
            node_idx,
            init_count: 0,
            last_update_frame: 0,
            previous_time: Percentage::ZERO,
            current_time: Percentage::ZERO,
            duration: Seconds(0.0),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.init_count > 0
    }

    /// Pose nodes are never initialized re-entrantly.
    pub fn initialize(&mut self, initial_time: Percentage) {
        debug_assert!(self.init_count == 0, "nested initialize of {}", self.node_idx);
        self.init_count += 1;
        self.previous_time = initial_time.clamped();
        self.current_time = self.previous_time;
    }

    pub fn shutdown(&mut self) {
        debug_assert!(self.init_count > 0, "shutdown of uninitialized {}", self.node_idx);
        self.init_count = self.init_count.saturating_sub(1);
    }

    /// Must be called at the top of every update, before side effects.
    pub fn mark_active(&mut self, ctx: &mut GraphContext<'_>) {
        debug_assert!(self.is_initialized());
        self.last_update_frame = ctx.frame_id;
        ctx.mark_node_active(self.node_idx);
    }

    pub fn is_active(&self, frame_id: u64) -> bool {
        self.is_initialized() && self.last_update_frame == frame_id
    }
}

/// State every value node carries: lifecycle plus the per-frame value
/// cache that makes reads idempotent within a frame.
#[derive(Clone, Debug)]
pub struct ValueNodeData {
    pub node_idx: NodeIndex,
    pub init_count: u16,
    pub cached: Option<GraphValue>,
    pub cached_frame: u64,
}

impl ValueNodeData {
    pub fn new(node_idx: NodeIndex) -> ValueNodeData {
        ValueNodeData {
            node_idx,
            init_count: 0,
            cached: None,
            cached_frame: 0,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.init_count > 0
    }

    /// Value nodes may be shared by several parents, so their lifecycle is
    /// counted rather than flagged.
    pub fn initialize(&mut self) {
        self.init_count += 1;
    }

    pub fn shutdown(&mut self) {
        debug_assert!(self.init_count > 0, "shutdown of uninitialized {}", self.node_idx);
        self.init_count = self.init_count.saturating_sub(1);
    }

    pub fn cached_this_frame(&self, frame_id: u64) -> Option<GraphValue> {
        if self.cached_frame == frame_id {
            self.cached
        } else {
            None
        }
    }

    pub fn store(&mut self, frame_id: u64, value: GraphValue) {
        self.cached = Some(value);
        self.cached_frame = frame_id;
    }
}

/// A runtime node in the instance arena.
///
/// `Vacant` marks a slot whose node is currently on the stack, taken out
/// for its own update; reaching a vacant slot from below would mean the
/// authored graph contains a runtime cycle, which is impossible by
/// construction and asserted in the arena.
#[derive(Debug)]
pub enum RuntimeNode {
    Vacant,
    ControlParameter(ControlParameterNode),
    ConstValue(ConstValueNode),
    CachedValue(CachedValueNode),
    Clip(ClipNode),
    ReferencePose(ReferencePoseNode),
    State(StateNode),
    StateMachine(StateMachineNode),
    Transition(TransitionNode),
    LayerBlend(LayerBlendNode),
    ExternalGraphSlot(ExternalGraphSlotNode),
    ChildGraph(ChildGraphNode),
}

impl RuntimeNode {
    pub fn is_pose_node(&self) -> bool {
        self.pose_data().is_some()
    }

    pub fn is_value_node(&self) -> bool {
        self.value_data().is_some()
    }

    pub fn pose_data(&self) -> Option<&PoseNodeData> {
        match self {
            RuntimeNode::Clip(n) => Some(&n.data),
            RuntimeNode::ReferencePose(n) => Some(&n.data),
            RuntimeNode::State(n) => Some(&n.data),
            RuntimeNode::StateMachine(n) => Some(&n.data),
            RuntimeNode::Transition(n) => Some(&n.data),
            RuntimeNode::LayerBlend(n) => Some(&n.data),
            RuntimeNode::ExternalGraphSlot(n) => Some(&n.data),
            RuntimeNode::ChildGraph(n) => Some(&n.data),
            _ => None,
        }
    }

    pub fn value_data(&self) -> Option<&ValueNodeData> {
        match self {
            RuntimeNode::ControlParameter(n) => Some(&n.data),
            RuntimeNode::ConstValue(n) => Some(&n.data),
            RuntimeNode::CachedValue(n) => Some(&n.data),
            _ => None,
        }
    }

    pub fn value_type(&self) -> GraphValueType {
        match self {
            RuntimeNode::ControlParameter(n) => n.value_type(),
            RuntimeNode::ConstValue(n) => n.value_type(),
            RuntimeNode::CachedValue(n) => n.value_type(),
            _ => GraphValueType::Pose,
        }
    }

    pub fn is_initialized(&self) -> bool {
        if let Some(data) = self.pose_data() {
            data.is_initialized()
        } else if let Some(data) = self.value_data() {
            data.is_initialized()
        } else {
            false
        }
    }

    pub fn duration(&self) -> Seconds {
        self.pose_data().map(|d| d.duration).unwrap_or(Seconds(0.0))
    }

    pub fn current_time(&self) -> Percentage {
        self.pose_data()
            .map(|d| d.current_time)
            .unwrap_or(Percentage::ZERO)
    }

    pub fn previous_time(&self) -> Percentage {
        self.pose_data()
            .map(|d| d.previous_time)
            .unwrap_or(Percentage::ZERO)
    }

    /// The sync track this node is currently playing against. Composite
    /// nodes delegate to whichever child currently drives them.
    pub fn sync_track<'a>(&'a self, nodes: &'a NodeArena) -> &'a SyncTrack {
        match self {
            RuntimeNode::Clip(n) => n.sync_track(),
            RuntimeNode::ReferencePose(n) => n.sync_track(),
            RuntimeNode::State(n) => n.sync_track(nodes),
            RuntimeNode::StateMachine(n) => n.sync_track(nodes),
            RuntimeNode::Transition(n) => &n.sync_track,
            RuntimeNode::LayerBlend(n) => n.sync_track(nodes),
            RuntimeNode::ExternalGraphSlot(n) => n.sync_track(),
            RuntimeNode::ChildGraph(n) => n.sync_track(),
            _ => {
                debug_assert!(false, "sync track queried on a value node");
                unreachable!()
            }
        }
    }
}

//! Runtime animation-graph evaluator.
//!
//! A [`GraphDefinition`] is the immutable output of the authoring
//! compiler: flat node settings, a declared instance-memory layout and
//! the shared resources. A [`GraphInstance`] materializes it into a
//! contiguous node arena and drives it once per frame: `evaluate_graph`
//! walks the node network, registers pose tasks with the task system and
//! returns the frame's root-motion delta and sampled-event range; the
//! host then executes the tasks around its physics step.

pub mod arena;
pub mod context;
pub mod debug;
pub mod definition;
pub mod error;
pub mod instance;
pub mod node;
pub mod recording;

pub use arena::NodeArena;
pub use context::{BranchState, GraphContext, LayerContext, PhysicsScene};
pub use definition::{
    CachedValueMode, CachedValueSettings, ChildGraphSettings, ClipSettings, ConstValueSettings,
    ControlParameterSettings, ExternalGraphSlotSettings, GraphDefinition, GraphDefinitionBuilder,
    LayerBlendSettings, LayerSettings, NodeSettings, ReferencePoseSettings, StateMachineSettings,
    StateMachineStateSettings, StateSettings, TransitionFlags, TransitionRule, TransitionSettings,
};
pub use error::{DefinitionError, ExternalGraphError};
pub use instance::{ConnectedExternalGraph, GraphInstance};
pub use node::{
    EasingOperation, GraphValue, GraphValueConvert, GraphValueType, PoseNodeResult, RuntimeNode,
    Target, TransitionState,
};
pub use recording::{RecordedFrameData, ValueStream};

#[cfg(feature = "development-tools")]
pub use debug::{
    GraphDebugState, GraphLogEntry, LogSeverity, PoseNodeDebugInfo, RootMotionAction,
    RootMotionActionKind, RootMotionDebugger,
};
#[cfg(feature = "development-tools")]
pub use recording::RecordedGraphState;

use failure::Fail;

use animgraph_core::{NodeIndex, StringId};

/// Fatal instantiation errors: the definition and the runtime layout
/// disagree, or the definition references something it does not contain.
/// No instance is constructed when any of these fire.
#[derive(Clone, Debug, Fail)]
pub enum DefinitionError {
    #[fail(
        display = "declared arena size {} does not match required size {}",
        declared, required
    )]
    ArenaSizeMismatch { declared: usize, required: usize },

    #[fail(
        display = "node {} declares offset {} but the layout requires {}",
        node, declared, required
    )]
    NodeOffsetMismatch {
        node: NodeIndex,
        declared: usize,
        required: usize,
    },

    #[fail(display = "node {} references unresolved child index {}", node, child)]
    UnresolvedChildIndex { node: NodeIndex, child: u16 },

    #[fail(
        display = "node {} expects a {} node at child {}",
        node, expected, child
    )]
    ChildCapabilityMismatch {
        node: NodeIndex,
        child: NodeIndex,
        expected: &'static str,
    },

    #[fail(
        display = "node {} must be a control parameter (parameter prefix is {} nodes)",
        node, prefix
    )]
    MalformedParameterPrefix { node: NodeIndex, prefix: usize },

    #[fail(display = "node {} references missing clip {}", node, clip)]
    MissingClip { node: NodeIndex, clip: u16 },

    #[fail(display = "node {} references missing child graph {}", node, graph)]
    MissingChildGraph { node: NodeIndex, graph: u16 },

    #[fail(
        display = "state machine node {} references state {} out of range",
        node, state
    )]
    MissingState { node: NodeIndex, state: u16 },

    #[fail(
        display = "state machine node {} rule targets a state that is not the transition node {}'s target",
        node, transition
    )]
    TransitionTargetMismatch {
        node: NodeIndex,
        transition: NodeIndex,
    },

    #[fail(display = "definition has no root pose node")]
    MissingRootNode,
}

/// Recoverable errors returned from the external-graph API.
#[derive(Clone, Debug, Fail)]
pub enum ExternalGraphError {
    #[fail(display = "unknown external slot {:?}", _0)]
    SlotUnknown(StringId),

    #[fail(display = "external slot {:?} is already filled", _0)]
    SlotAlreadyFilled(StringId),

    #[fail(display = "external slot {:?} is not filled", _0)]
    SlotNotFilled(StringId),

    #[fail(
        display = "external graph skeleton does not match the parent instance"
    )]
    SkeletonMismatch,

    #[fail(display = "external graph definition is invalid: {}", _0)]
    InvalidDefinition(#[fail(cause)] DefinitionError),
}

//! Umbrella crate re-exporting the animgraph subcrates.

#[cfg(feature = "core")]
#[doc(inline)]
pub use animgraph_core as core;

#[cfg(feature = "task")]
#[doc(inline)]
pub use animgraph_task as task;

#[cfg(feature = "graph")]
#[doc(inline)]
pub use animgraph_graph as graph;

#[cfg(feature = "graph")]
pub use animgraph_graph::{GraphDefinition, GraphDefinitionBuilder, GraphInstance};

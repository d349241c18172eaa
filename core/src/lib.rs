//! Primitive animation model shared by the animgraph crates.
//!
//! Everything in here is plain data and math: identifiers, time
//! coordinates, sync tracks, sampled events, poses and bone masks. The
//! evaluator (`animgraph-graph`) and the task executor (`animgraph-task`)
//! are built on top of these types.

mod blender;
mod bone_mask;
mod clip;
mod events;
mod ids;
mod skeleton;
mod sync;
mod time;
mod transform;

pub use blender::{Blender, RootMotionBlendMode};
pub use bone_mask::{BoneMask, BoneMaskHandle, BoneMaskPool};
pub use clip::{AnimationClip, ClipEvent};
pub use events::{SampledEvent, SampledEventFlags, SampledEventRange, SampledEventsBuffer};
pub use ids::{NodeIndex, StringId};
pub use skeleton::{Pose, Skeleton};
pub use sync::{SyncTrack, SyncTrackEvent, SyncTrackTime, SyncTrackTimeRange};
pub use time::{Percentage, Seconds};
pub use transform::Transform;

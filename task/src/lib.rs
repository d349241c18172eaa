//! Pose task registration and execution.
//!
//! The evaluator walks the node network and *registers* work; nothing is
//! sampled or blended until the host asks for the tasks to execute. Task
//! indices are handed out in registration order, so a blend task always
//! references earlier indices and the list forms a DAG whose final entry
//! is the frame's output pose.

use std::sync::Arc;

use derivative::Derivative;

use animgraph_core::{
    AnimationClip, Blender, BoneMask, NodeIndex, Percentage, Pose, Skeleton, Transform,
};

mod cached_pose;

pub use cached_pose::{CachedPoseBufferId, CachedPoseSnapshot};
use cached_pose::CachedPoseInventory;

/// Index of a task registered this frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskIndex(pub u16);

impl TaskIndex {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A unit of pose work registered by a node.
#[derive(Clone, Debug, PartialEq)]
pub enum Task {
    /// Sample a clip's pose at `to` (the `from` edge is kept for
    /// event/debug tooling).
    SampleClip {
        source_node: NodeIndex,
        clip: Arc<AnimationClip>,
        from: Percentage,
        to: Percentage,
    },
    /// The skeleton's reference pose.
    ReferencePose { source_node: NodeIndex },
    /// Blend two earlier tasks, optionally restricted by a bone mask.
    Blend {
        source_node: NodeIndex,
        first: TaskIndex,
        second: TaskIndex,
        blend_weight: f32,
        mask: Option<BoneMask>,
    },
    /// Copy an earlier task's result into a cached-pose buffer.
    CachedPoseWrite {
        source_node: NodeIndex,
        source: TaskIndex,
        buffer: CachedPoseBufferId,
    },
    /// Read a cached-pose buffer written on an earlier frame.
    CachedPoseRead {
        source_node: NodeIndex,
        buffer: CachedPoseBufferId,
    },
}

impl Task {
    pub fn source_node(&self) -> NodeIndex {
        match *self {
            Task::SampleClip { source_node, .. }
            | Task::ReferencePose { source_node }
            | Task::Blend { source_node, .. }
            | Task::CachedPoseWrite { source_node, .. }
            | Task::CachedPoseRead { source_node, .. } => source_node,
        }
    }

    /// Whether this task must wait for the physics step. None of the
    /// current kinds do; the split exists so the two execution phases stay
    /// part of the contract.
    fn requires_physics(&self) -> bool {
        false
    }
}

/// Collects the frame's tasks and owns the cached-pose buffers that
/// outlive frames.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct TaskSystem {
    skeleton: Arc<Skeleton>,
    tasks: Vec<Task>,
    #[derivative(Debug = "ignore")]
    task_poses: Vec<Pose>,
    pre_physics_executed: bool,
    post_physics_executed: bool,
    cached_poses: CachedPoseInventory,
}

impl TaskSystem {
    pub fn new(skeleton: Arc<Skeleton>) -> TaskSystem {
        TaskSystem {
            skeleton,
            tasks: Vec::new(),
            task_poses: Vec::new(),
            pre_physics_executed: false,
            post_physics_executed: false,
            cached_poses: CachedPoseInventory::default(),
        }
    }

    pub fn skeleton(&self) -> &Arc<Skeleton> {
        &self.skeleton
    }

    /// Drop the frame's registrations. Cached-pose buffers survive.
    pub fn reset(&mut self) {
        self.tasks.clear();
        self.task_poses.clear();
        self.pre_physics_executed = false;
        self.post_physics_executed = false;
    }

    pub fn register_task(&mut self, task: Task) -> TaskIndex {
        debug_assert!(self.tasks.len() < u16::max_value() as usize);
        let index = TaskIndex(self.tasks.len() as u16);
        log::trace!("register task {:?}: {:?}", index, task);
        self.tasks.push(task);
        index
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn has_tasks(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Are there registered tasks that have not been executed yet?
    pub fn needs_update(&self) -> bool {
        self.has_tasks() && !(self.pre_physics_executed && self.post_physics_executed)
    }

    // Cached poses
    // -----------------------------------------------------------------

    pub fn create_cached_pose(&mut self) -> CachedPoseBufferId {
        self.cached_poses.create()
    }

    pub fn destroy_cached_pose(&mut self, id: CachedPoseBufferId) {
        self.cached_poses.destroy(id);
    }

    pub fn num_live_cached_poses(&self) -> usize {
        self.cached_poses.live_count()
    }

    pub fn live_cached_poses(&self) -> impl Iterator<Item = (CachedPoseBufferId, Option<&Pose>)> {
        self.cached_poses.live()
    }

    /// Capture the whole inventory for a snapshot.
    pub fn cached_pose_snapshot(&self) -> CachedPoseSnapshot {
        self.cached_poses.snapshot()
    }

    /// Replace the whole inventory; used by snapshot restore.
    pub fn restore_cached_poses(&mut self, snapshot: &CachedPoseSnapshot) {
        self.cached_poses.restore(snapshot);
    }

    // Execution
    // -----------------------------------------------------------------

    /// Execute every task up to the pre-physics barrier. The end-of-frame
    /// world transform is accepted for parity with the contract (root
    /// motion is finalized by the character controller).
    pub fn execute_pre_physics_tasks(&mut self, _end_world_transform: Transform) {
        debug_assert!(!self.pre_physics_executed);
        let barrier = self
            .tasks
            .iter()
            .position(Task::requires_physics)
            .unwrap_or_else(|| self.tasks.len());
        self.execute_range(0, barrier);
        self.pre_physics_executed = true;
    }

    /// Execute the remaining tasks.
    pub fn execute_post_physics_tasks(&mut self) {
        debug_assert!(self.pre_physics_executed);
        let from = self.task_poses.len();
        let to = self.tasks.len();
        self.execute_range(from, to);
        self.post_physics_executed = true;
    }

    /// The frame's output pose: the last executed task's result.
    pub fn final_pose(&self) -> Option<&Pose> {
        self.task_poses.last()
    }

    fn execute_range(&mut self, from: usize, to: usize) {
        for idx in from..to {
            let pose = match self.tasks[idx] {
                Task::SampleClip { ref clip, to, .. } => {
                    let mut pose = Pose::reference(&self.skeleton);
                    pose.set_transform(0, clip.root_motion.scaled(to.value()));
                    pose
                }
                Task::ReferencePose { .. } => Pose::reference(&self.skeleton),
                Task::Blend {
                    first,
                    second,
                    blend_weight,
                    ref mask,
                    ..
                } => {
                    let a = &self.task_poses[first.index()];
                    let b = &self.task_poses[second.index()];
                    match mask {
                        Some(mask) => Blender::blend_poses_masked(a, b, blend_weight, mask),
                        None => Blender::blend_poses(a, b, blend_weight),
                    }
                }
                Task::CachedPoseWrite { source, buffer, .. } => {
                    let pose = self.task_poses[source.index()].clone();
                    self.cached_poses.write(buffer, pose.clone());
                    pose
                }
                Task::CachedPoseRead { buffer, .. } => self
                    .cached_poses
                    .read(buffer)
                    .cloned()
                    .unwrap_or_else(|| Pose::reference(&self.skeleton)),
            };
            self.task_poses.push(pose);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use animgraph_core::{Seconds, StringId, Transform};
    use nalgebra::Vector3;

    fn system() -> TaskSystem {
        TaskSystem::new(Arc::new(Skeleton::new(StringId::new("biped"), 4)))
    }

    fn clip(displacement: f32) -> Arc<AnimationClip> {
        Arc::new(
            AnimationClip::new(StringId::new("clip"), Seconds(1.0)).with_root_motion(
                Transform::from_translation(Vector3::new(displacement, 0.0, 0.0)),
            ),
        )
    }

    #[test]
    fn indices_follow_registration_order() {
        let mut ts = system();
        let a = ts.register_task(Task::ReferencePose {
            source_node: NodeIndex(0),
        });
        let b = ts.register_task(Task::ReferencePose {
            source_node: NodeIndex(1),
        });
        assert_eq!(a, TaskIndex(0));
        assert_eq!(b, TaskIndex(1));
    }

    #[test]
    fn cached_pose_round_trip_across_frames() {
        let mut ts = system();
        let buffer = ts.create_cached_pose();

        let sample = ts.register_task(Task::SampleClip {
            source_node: NodeIndex(0),
            clip: clip(2.0),
            from: Percentage(0.0),
            to: Percentage(1.0),
        });
        ts.register_task(Task::CachedPoseWrite {
            source_node: NodeIndex(0),
            source: sample,
            buffer,
        });
        ts.execute_pre_physics_tasks(Transform::identity());
        ts.execute_post_physics_tasks();
        let written = ts.final_pose().unwrap().clone();

        ts.reset();
        ts.register_task(Task::CachedPoseRead {
            source_node: NodeIndex(0),
            buffer,
        });
        ts.execute_pre_physics_tasks(Transform::identity());
        assert_eq!(ts.final_pose(), Some(&written));

        ts.destroy_cached_pose(buffer);
        assert_eq!(ts.num_live_cached_poses(), 0);
    }

    #[test]
    fn blend_produces_midpoint() {
        let mut ts = system();
        let a = ts.register_task(Task::SampleClip {
            source_node: NodeIndex(0),
            clip: clip(2.0),
            from: Percentage(0.0),
            to: Percentage(1.0),
        });
        let b = ts.register_task(Task::ReferencePose {
            source_node: NodeIndex(1),
        });
        ts.register_task(Task::Blend {
            source_node: NodeIndex(2),
            first: a,
            second: b,
            blend_weight: 0.5,
            mask: None,
        });
        ts.execute_pre_physics_tasks(Transform::identity());
        let pose = ts.final_pose().unwrap();
        assert!((pose.transform(0).translation.x - 1.0).abs() < 1e-5);
    }

    #[test]
    fn needs_update_tracks_execution() {
        let mut ts = system();
        assert!(!ts.needs_update());
        ts.register_task(Task::ReferencePose {
            source_node: NodeIndex(0),
        });
        assert!(ts.needs_update());
        ts.execute_pre_physics_tasks(Transform::identity());
        ts.execute_post_physics_tasks();
        assert!(!ts.needs_update());
    }
}

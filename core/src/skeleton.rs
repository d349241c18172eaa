use derivative::Derivative;

use crate::{ids::StringId, transform::Transform};

/// Minimal skeleton description: the evaluator only needs an identity and
/// a bone count to size poses and masks.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct Skeleton {
    id: StringId,
    bone_count: usize,
}

impl Skeleton {
    pub fn new(id: StringId, bone_count: usize) -> Skeleton {
        debug_assert!(bone_count > 0);
        Skeleton { id, bone_count }
    }

    pub fn id(&self) -> StringId {
        self.id
    }

    pub fn num_bones(&self) -> usize {
        self.bone_count
    }
}

/// A skeleton-sized transform array.
#[derive(Clone, Derivative, PartialEq)]
#[derivative(Debug)]
pub struct Pose {
    #[derivative(Debug = "ignore")]
    transforms: Vec<Transform>,
}

impl Pose {
    /// Reference pose: every bone at identity.
    pub fn reference(skeleton: &Skeleton) -> Pose {
        Pose {
            transforms: vec![Transform::identity(); skeleton.num_bones()],
        }
    }

    pub fn num_bones(&self) -> usize {
        self.transforms.len()
    }

    pub fn transform(&self, bone: usize) -> &Transform {
        &self.transforms[bone]
    }

    pub fn set_transform(&mut self, bone: usize, transform: Transform) {
        self.transforms[bone] = transform;
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    pub fn transforms_mut(&mut self) -> &mut [Transform] {
        &mut self.transforms
    }
}

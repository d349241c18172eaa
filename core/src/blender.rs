use crate::{bone_mask::BoneMask, skeleton::Pose, transform::Transform};

/// How a transition combines its source and target root-motion deltas.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum RootMotionBlendMode {
    /// Interpolate between the two deltas by the blend weight.
    Blend,
    /// Discard the source's contribution entirely.
    IgnoreSource,
    /// Apply the target's delta on top of the source's, scaled by weight.
    Additive,
}

impl Default for RootMotionBlendMode {
    fn default() -> Self {
        RootMotionBlendMode::Blend
    }
}

/// Stateless pose and root-motion blending.
pub struct Blender;

impl Blender {
    pub fn blend_root_motion_deltas(
        source: &Transform,
        target: &Transform,
        blend_weight: f32,
        mode: RootMotionBlendMode,
    ) -> Transform {
        match mode {
            RootMotionBlendMode::Blend => Transform::interpolate(source, target, blend_weight),
            RootMotionBlendMode::IgnoreSource => *target,
            RootMotionBlendMode::Additive => source.append(&target.scaled(blend_weight)),
        }
    }

    pub fn blend_poses(source: &Pose, target: &Pose, blend_weight: f32) -> Pose {
        debug_assert_eq!(source.num_bones(), target.num_bones());
        let mut result = source.clone();
        for (bone, out) in result.transforms_mut().iter_mut().enumerate() {
            *out = Transform::interpolate(
                source.transform(bone),
                target.transform(bone),
                blend_weight,
            );
        }
        result
    }

    /// Masked blend: each bone's effective weight is the blend weight
    /// scaled by the mask.
    pub fn blend_poses_masked(
        source: &Pose,
        target: &Pose,
        blend_weight: f32,
        mask: &BoneMask,
    ) -> Pose {
        debug_assert_eq!(source.num_bones(), target.num_bones());
        debug_assert_eq!(source.num_bones(), mask.num_weights());
        let mut result = source.clone();
        for (bone, out) in result.transforms_mut().iter_mut().enumerate() {
            *out = Transform::interpolate(
                source.transform(bone),
                target.transform(bone),
                blend_weight * mask.weight(bone),
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn ignore_source_holds_target() {
        let source = Transform::from_translation(Vector3::new(1.0, 0.0, 0.0));
        let target = Transform::from_translation(Vector3::new(0.0, 1.0, 0.0));
        let out = Blender::blend_root_motion_deltas(
            &source,
            &target,
            0.1,
            RootMotionBlendMode::IgnoreSource,
        );
        assert_eq!(out, target);
    }

    #[test]
    fn blend_interpolates() {
        let source = Transform::from_translation(Vector3::new(1.0, 0.0, 0.0));
        let target = Transform::from_translation(Vector3::new(3.0, 0.0, 0.0));
        let out =
            Blender::blend_root_motion_deltas(&source, &target, 0.5, RootMotionBlendMode::Blend);
        assert!((out.translation.x - 2.0).abs() < 1e-6);
    }
}

use nalgebra::{UnitQuaternion, Vector3};

/// Rigid transform with uniform scale.
///
/// Root-motion deltas, pose bones and character world transforms all use
/// this representation.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct Transform {
    pub rotation: UnitQuaternion<f32>,
    pub translation: Vector3<f32>,
    pub scale: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Transform::identity()
    }
}

impl Transform {
    pub fn identity() -> Transform {
        Transform {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
            scale: 1.0,
        }
    }

    pub fn new(rotation: UnitQuaternion<f32>, translation: Vector3<f32>, scale: f32) -> Transform {
        Transform {
            rotation,
            translation,
            scale,
        }
    }

    pub fn from_translation(translation: Vector3<f32>) -> Transform {
        Transform {
            rotation: UnitQuaternion::identity(),
            translation,
            scale: 1.0,
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Transform::identity()
    }

    /// Apply `delta` after `self`, in `self`'s space.
    pub fn append(&self, delta: &Transform) -> Transform {
        Transform {
            rotation: self.rotation * delta.rotation,
            translation: self.translation + self.rotation * (delta.translation * self.scale),
            scale: self.scale * delta.scale,
        }
    }

    /// Component-wise interpolation: slerp for rotation, lerp for the rest.
    pub fn interpolate(from: &Transform, to: &Transform, t: f32) -> Transform {
        Transform {
            rotation: from.rotation.slerp(&to.rotation, t),
            translation: from.translation + (to.translation - from.translation) * t,
            scale: from.scale + (to.scale - from.scale) * t,
        }
    }

    /// Fractional application of a delta transform: `scaled(0.5)` is half
    /// the rotation, half the displacement. Used to slice per-loop root
    /// motion into per-frame deltas.
    pub fn scaled(&self, fraction: f32) -> Transform {
        Transform {
            rotation: UnitQuaternion::identity().slerp(&self.rotation, fraction),
            translation: self.translation * fraction,
            scale: 1.0 + (self.scale - 1.0) * fraction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_splits_displacement() {
        let delta = Transform::from_translation(Vector3::new(2.0, 0.0, 0.0));
        let half = delta.scaled(0.5);
        assert!((half.translation.x - 1.0).abs() < 1e-6);
        assert_eq!(half.rotation, UnitQuaternion::identity());
    }

    #[test]
    fn interpolate_endpoints() {
        let a = Transform::from_translation(Vector3::new(1.0, 0.0, 0.0));
        let b = Transform::from_translation(Vector3::new(3.0, 0.0, 0.0));
        assert_eq!(Transform::interpolate(&a, &b, 0.0), a);
        assert_eq!(Transform::interpolate(&a, &b, 1.0), b);
    }
}

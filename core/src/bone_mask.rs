use derivative::Derivative;

use crate::skeleton::Skeleton;

/// Per-bone blend weights used by layered blending.
#[derive(Clone, Derivative, PartialEq)]
#[derivative(Debug)]
pub struct BoneMask {
    #[derivative(Debug = "ignore")]
    weights: Vec<f32>,
}

impl BoneMask {
    pub fn all(skeleton: &Skeleton) -> BoneMask {
        BoneMask {
            weights: vec![1.0; skeleton.num_bones()],
        }
    }

    pub fn from_weights(weights: Vec<f32>) -> BoneMask {
        BoneMask { weights }
    }

    pub fn num_weights(&self) -> usize {
        self.weights.len()
    }

    pub fn weight(&self, bone: usize) -> f32 {
        self.weights[bone]
    }

    pub fn reset_weights(&mut self, weight: f32) {
        for w in &mut self.weights {
            *w = weight;
        }
    }

    /// `self = lerp(source, self, blend_weight)`.
    pub fn blend_from(&mut self, source: &BoneMask, blend_weight: f32) {
        debug_assert_eq!(self.weights.len(), source.weights.len());
        for (w, s) in self.weights.iter_mut().zip(source.weights.iter()) {
            *w = s + (*w - s) * blend_weight;
        }
    }

    /// `self = lerp(self, target, blend_weight)`.
    pub fn blend_to(&mut self, target: &BoneMask, blend_weight: f32) {
        debug_assert_eq!(self.weights.len(), target.weights.len());
        for (w, t) in self.weights.iter_mut().zip(target.weights.iter()) {
            *w += (t - *w) * blend_weight;
        }
    }
}

/// Handle to a mask in the frame's [`BoneMaskPool`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoneMaskHandle(usize);

/// Reusable mask storage, reset once per frame. Handles are only valid
/// until the next [`BoneMaskPool::reset`].
#[derive(Debug)]
pub struct BoneMaskPool {
    bone_count: usize,
    masks: Vec<BoneMask>,
    in_use: usize,
}

impl BoneMaskPool {
    pub fn new(skeleton: &Skeleton) -> BoneMaskPool {
        BoneMaskPool {
            bone_count: skeleton.num_bones(),
            masks: Vec::new(),
            in_use: 0,
        }
    }

    pub fn reset(&mut self) {
        self.in_use = 0;
    }

    /// Hand out a mask with all weights at `1.0`.
    pub fn alloc(&mut self) -> BoneMaskHandle {
        if self.in_use == self.masks.len() {
            self.masks.push(BoneMask {
                weights: vec![1.0; self.bone_count],
            });
        } else {
            self.masks[self.in_use].reset_weights(1.0);
        }
        let handle = BoneMaskHandle(self.in_use);
        self.in_use += 1;
        handle
    }

    pub fn get(&self, handle: BoneMaskHandle) -> &BoneMask {
        debug_assert!(handle.0 < self.in_use);
        &self.masks[handle.0]
    }

    pub fn get_mut(&mut self, handle: BoneMaskHandle) -> &mut BoneMask {
        debug_assert!(handle.0 < self.in_use);
        &mut self.masks[handle.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::StringId;

    #[test]
    fn pool_reuses_storage_after_reset() {
        let skeleton = Skeleton::new(StringId::new("biped"), 4);
        let mut pool = BoneMaskPool::new(&skeleton);

        let a = pool.alloc();
        pool.get_mut(a).reset_weights(0.0);
        pool.reset();

        let b = pool.alloc();
        assert_eq!(pool.get(b).weight(0), 1.0);
    }

    #[test]
    fn blend_from_moves_towards_self() {
        let skeleton = Skeleton::new(StringId::new("biped"), 2);
        let mut mask = BoneMask::all(&skeleton);
        let mut source = BoneMask::all(&skeleton);
        source.reset_weights(0.0);

        mask.blend_from(&source, 0.25);
        assert!((mask.weight(0) - 0.25).abs() < 1e-6);
    }
}

use crate::{
    ids::StringId,
    sync::SyncTrack,
    time::{Percentage, Seconds},
    transform::Transform,
};

/// Marker event authored on a clip's timeline.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct ClipEvent {
    pub id: StringId,
    pub time: Percentage,
}

/// An animation source: duration, sync track, timeline events and the
/// root-motion delta accumulated over one full loop.
///
/// Pose data itself lives with the task executor; the evaluator only needs
/// the timing model.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct AnimationClip {
    pub id: StringId,
    pub duration: Seconds,
    pub sync_track: SyncTrack,
    pub events: Vec<ClipEvent>,
    pub root_motion: Transform,
}

impl AnimationClip {
    pub fn new(id: StringId, duration: Seconds) -> AnimationClip {
        debug_assert!(duration.value() > 0.0);
        AnimationClip {
            id,
            duration,
            sync_track: SyncTrack::default(),
            events: Vec::new(),
            root_motion: Transform::identity(),
        }
    }

    pub fn with_sync_track(mut self, sync_track: SyncTrack) -> AnimationClip {
        self.sync_track = sync_track;
        self
    }

    pub fn with_events(mut self, events: Vec<ClipEvent>) -> AnimationClip {
        self.events = events;
        self
    }

    pub fn with_root_motion(mut self, root_motion: Transform) -> AnimationClip {
        self.root_motion = root_motion;
        self
    }

    /// Root-motion delta for a playhead move covering `distance`
    /// normalized laps. The move is measured as distance rather than an
    /// end position so whole laps are not lost: a frame that covers
    /// `distance >= 1.0` composes the full per-loop delta once per
    /// completed lap before applying the final partial lap.
    pub fn root_motion_delta(&self, distance: f32) -> Transform {
        debug_assert!(distance >= 0.0);
        let whole_laps = distance.max(0.0).floor();
        let remainder = distance.max(0.0) - whole_laps;

        let mut delta = Transform::identity();
        let mut lap = 0.0;
        while lap < whole_laps {
            delta = delta.append(&self.root_motion);
            lap += 1.0;
        }
        delta.append(&self.root_motion.scaled(remainder))
    }

    /// Invoke `sample` for every timeline event crossed by a playhead
    /// move of `distance` normalized laps starting at `from`: each event
    /// fires once per crossing, so a move spanning whole laps fires every
    /// event once per lap. A zero-length move samples nothing.
    pub fn sample_events(
        &self,
        from: Percentage,
        distance: f32,
        mut sample: impl FnMut(&ClipEvent),
    ) {
        debug_assert!(distance >= 0.0);
        if distance <= 0.0 {
            return;
        }
        let from = from.value();
        let end = from + distance;

        for event in &self.events {
            // First crossing strictly after `from`, then one per lap.
            let mut at = event.time.value();
            while at <= from {
                at += 1.0;
            }
            while at <= end {
                sample(event);
                at += 1.0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn walk() -> AnimationClip {
        AnimationClip::new(StringId::new("walk"), Seconds(2.0))
            .with_events(vec![
                ClipEvent {
                    id: StringId::new("FootDown"),
                    time: Percentage(0.25),
                },
                ClipEvent {
                    id: StringId::new("FootDown"),
                    time: Percentage(0.75),
                },
            ])
            .with_root_motion(Transform::from_translation(Vector3::new(4.0, 0.0, 0.0)))
    }

    #[test]
    fn events_sampled_in_window() {
        let clip = walk();
        let mut hits = 0;
        clip.sample_events(Percentage(0.2), 0.3, |_| hits += 1);
        assert_eq!(hits, 1);
    }

    #[test]
    fn events_sampled_across_loop() {
        let clip = walk();
        let mut hits = 0;
        clip.sample_events(Percentage(0.7), 0.6, |_| hits += 2);
        assert_eq!(hits, 4);
    }

    #[test]
    fn exact_full_lap_samples_every_event_once() {
        let clip = walk();
        let mut hits = 0;
        clip.sample_events(Percentage(0.5), 1.0, |_| hits += 1);
        assert_eq!(hits, 2);
    }

    #[test]
    fn multi_lap_move_samples_once_per_crossing() {
        let clip = walk();
        // 0.1 -> 2.4: the 0.25 event is crossed at 0.25, 1.25, 2.25 and
        // the 0.75 event at 0.75 and 1.75.
        let mut hits = 0;
        clip.sample_events(Percentage(0.1), 2.3, |_| hits += 1);
        assert_eq!(hits, 5);
    }

    #[test]
    fn root_motion_slices_linearly() {
        let clip = walk();
        let delta = clip.root_motion_delta(0.5);
        assert!((delta.translation.x - 2.0).abs() < 1e-5);
    }

    #[test]
    fn root_motion_keeps_whole_laps() {
        let clip = walk();
        let delta = clip.root_motion_delta(1.0);
        assert!((delta.translation.x - 4.0).abs() < 1e-5);
        let delta = clip.root_motion_delta(2.5);
        assert!((delta.translation.x - 10.0).abs() < 1e-5);
    }
}

//! Sync tracks: the event-space time coordinate used for synchronized
//! blending.
//!
//! A track is a list of named events covering `[0, 1)` of a clip. A
//! position on the track is `(event_idx, percentage_through)`; event
//! indices outside `0..num_events` wrap, so offset arithmetic can move a
//! position across loop boundaries without special cases.

use smallvec::SmallVec;

use crate::{
    ids::StringId,
    time::{Percentage, Seconds},
};

/// Position on a sync track.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct SyncTrackTime {
    pub event_idx: i32,
    pub percentage_through: Percentage,
}

impl SyncTrackTime {
    pub fn new(event_idx: i32, percentage_through: f32) -> SyncTrackTime {
        SyncTrackTime {
            event_idx,
            percentage_through: Percentage(percentage_through),
        }
    }
}

/// Half-open span on a sync track, start inclusive.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct SyncTrackTimeRange {
    pub start: SyncTrackTime,
    pub end: SyncTrackTime,
}

impl SyncTrackTimeRange {
    pub fn new(start: SyncTrackTime, end: SyncTrackTime) -> SyncTrackTimeRange {
        SyncTrackTimeRange { start, end }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct SyncTrackEvent {
    pub id: StringId,
    pub start_time: Percentage,
    pub duration: Percentage,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct SyncTrack {
    events: SmallVec<[SyncTrackEvent; 4]>,
}

impl Default for SyncTrack {
    /// A single unnamed event covering the whole clip.
    fn default() -> Self {
        let mut events = SmallVec::new();
        events.push(SyncTrackEvent {
            id: StringId::none(),
            start_time: Percentage::ZERO,
            duration: Percentage::ONE,
        });
        SyncTrack { events }
    }
}

impl SyncTrack {
    /// Build a track from ordered `(id, start_time)` markers. Durations run
    /// marker-to-marker, the last event closing the loop at `1.0`. The
    /// first marker must sit at `0.0`.
    pub fn from_markers(markers: &[(StringId, f32)]) -> SyncTrack {
        if markers.is_empty() {
            return SyncTrack::default();
        }
        debug_assert!(markers[0].1 == 0.0, "first sync marker must start at 0");

        let mut events: SmallVec<[SyncTrackEvent; 4]> = SmallVec::new();
        for (i, &(id, start)) in markers.iter().enumerate() {
            let end = if i + 1 < markers.len() {
                markers[i + 1].1
            } else {
                1.0
            };
            debug_assert!(end > start, "sync markers must be strictly ordered");
            events.push(SyncTrackEvent {
                id,
                start_time: Percentage(start),
                duration: Percentage(end - start),
            });
        }
        SyncTrack { events }
    }

    /// Rebuild a track from raw events; the events are trusted to cover
    /// `[0, 1]` in order (snapshot restore uses this).
    pub fn from_events(events: impl IntoIterator<Item = SyncTrackEvent>) -> SyncTrack {
        let events: SmallVec<[SyncTrackEvent; 4]> = events.into_iter().collect();
        if events.is_empty() {
            return SyncTrack::default();
        }
        SyncTrack { events }
    }

    pub fn num_events(&self) -> usize {
        self.events.len()
    }

    pub fn events(&self) -> &[SyncTrackEvent] {
        &self.events
    }

    fn wrap_index(&self, event_idx: i32) -> usize {
        let n = self.events.len() as i32;
        (((event_idx % n) + n) % n) as usize
    }

    pub fn event(&self, event_idx: i32) -> &SyncTrackEvent {
        &self.events[self.wrap_index(event_idx)]
    }

    pub fn event_id(&self, event_idx: i32) -> StringId {
        self.event(event_idx).id
    }

    /// First event carrying `id`, if any.
    pub fn event_index_for_id(&self, id: StringId) -> Option<i32> {
        self.events
            .iter()
            .position(|event| event.id == id)
            .map(|idx| idx as i32)
    }

    /// Convert a normalized clip position into track coordinates.
    pub fn time_from_percentage(&self, percentage: Percentage) -> SyncTrackTime {
        let p = percentage.normalized().value();
        let last = self.events.len() - 1;
        for (idx, event) in self.events.iter().enumerate() {
            let end = event.start_time.value() + event.duration.value();
            if p < end || idx == last {
                let through = if event.duration.value() > 0.0 {
                    (p - event.start_time.value()) / event.duration.value()
                } else {
                    0.0
                };
                return SyncTrackTime {
                    event_idx: idx as i32,
                    percentage_through: Percentage(through).clamped(),
                };
            }
        }
        unreachable!("sync track covers [0, 1]");
    }

    /// Convert track coordinates back into a normalized clip position. The
    /// event index wraps, so positions offset past the loop map onto the
    /// equivalent in-loop position.
    pub fn percentage_from_time(&self, time: SyncTrackTime) -> Percentage {
        let event = self.event(time.event_idx);
        Percentage(
            event.start_time.value()
                + event.duration.value() * time.percentage_through.clamped().value(),
        )
        .clamped()
    }

    /// Start of the last event's final moment: the track's real end.
    pub fn end_time(&self) -> SyncTrackTime {
        SyncTrackTime {
            event_idx: self.events.len() as i32 - 1,
            percentage_through: Percentage::ONE,
        }
    }

    /// Forward distance covered by `range`, measured in normalized clip
    /// space. A range that wraps the loop measures through the boundary; a
    /// degenerate range covers zero.
    pub fn percentage_covered(&self, range: &SyncTrackTimeRange) -> f32 {
        let start = self.percentage_from_time(range.start).value();
        let end = self.percentage_from_time(range.end).value();
        let delta = end - start;
        if delta >= 0.0 {
            delta
        } else {
            delta + 1.0
        }
    }

    /// Blend two tracks. Tracks with matching event counts blend pairwise
    /// (durations lerped then renormalized, ids taken from the dominant
    /// side); otherwise the dominant side's track is used verbatim.
    pub fn blend(source: &SyncTrack, target: &SyncTrack, blend_weight: f32) -> SyncTrack {
        let source_dominant = blend_weight < 0.5;
        if source.num_events() != target.num_events() {
            return if source_dominant {
                source.clone()
            } else {
                target.clone()
            };
        }

        let mut durations: SmallVec<[f32; 4]> = SmallVec::new();
        let mut total = 0.0;
        for (s, t) in source.events.iter().zip(target.events.iter()) {
            let d = s.duration.value() + (t.duration.value() - s.duration.value()) * blend_weight;
            total += d;
            durations.push(d);
        }

        let mut events: SmallVec<[SyncTrackEvent; 4]> = SmallVec::new();
        let mut start = 0.0;
        for (i, (s, t)) in source.events.iter().zip(target.events.iter()).enumerate() {
            let duration = durations[i] / total;
            events.push(SyncTrackEvent {
                id: if source_dominant { s.id } else { t.id },
                start_time: Percentage(start),
                duration: Percentage(duration),
            });
            start += duration;
        }
        SyncTrack { events }
    }

    /// Duration of a synchronized blend: the per-event durations of both
    /// inputs are lerped and scaled back up by the blended event count.
    pub fn duration_synchronized(
        source_duration: Seconds,
        target_duration: Seconds,
        source_events: usize,
        target_events: usize,
        blended_events: usize,
        blend_weight: f32,
    ) -> Seconds {
        debug_assert!(source_events > 0 && target_events > 0);
        let source_per_event = source_duration.value() / source_events as f32;
        let target_per_event = target_duration.value() / target_events as f32;
        let per_event =
            source_per_event + (target_per_event - source_per_event) * blend_weight;
        Seconds(per_event * blended_events as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_step() -> SyncTrack {
        SyncTrack::from_markers(&[(StringId::new("Left"), 0.0), (StringId::new("Right"), 0.5)])
    }

    #[test]
    fn round_trip_time_percentage() {
        let track = two_step();
        let time = track.time_from_percentage(Percentage(0.7));
        assert_eq!(time.event_idx, 1);
        assert!((time.percentage_through.value() - 0.4).abs() < 1e-5);
        let back = track.percentage_from_time(time);
        assert!((back.value() - 0.7).abs() < 1e-5);
    }

    #[test]
    fn event_index_wraps_both_directions() {
        let track = two_step();
        assert_eq!(track.event_id(2), StringId::new("Left"));
        assert_eq!(track.event_id(-1), StringId::new("Right"));
    }

    #[test]
    fn percentage_covered_wraps_forward() {
        let track = two_step();
        let range = SyncTrackTimeRange::new(
            SyncTrackTime::new(1, 0.8), // 0.9 normalized
            SyncTrackTime::new(0, 0.4), // 0.2 normalized
        );
        let covered = track.percentage_covered(&range);
        assert!((covered - 0.3).abs() < 1e-5);
    }

    #[test]
    fn degenerate_range_covers_nothing() {
        let track = two_step();
        let at = SyncTrackTime::new(0, 0.25);
        let covered = track.percentage_covered(&SyncTrackTimeRange::new(at, at));
        assert_eq!(covered, 0.0);
    }

    #[test]
    fn blend_matching_counts_is_pairwise() {
        let a = two_step();
        let b = SyncTrack::from_markers(&[
            (StringId::new("Left"), 0.0),
            (StringId::new("Right"), 0.25),
        ]);
        let blended = SyncTrack::blend(&a, &b, 0.5);
        assert_eq!(blended.num_events(), 2);
        // durations: lerp(0.5, 0.25) = 0.375 and lerp(0.5, 0.75) = 0.625
        assert!((blended.events()[0].duration.value() - 0.375).abs() < 1e-5);
        assert!((blended.events()[1].start_time.value() - 0.375).abs() < 1e-5);
        assert_eq!(blended.event_id(0), StringId::new("Left"));
    }

    #[test]
    fn synchronized_duration_scales_by_event_count() {
        let duration = SyncTrack::duration_synchronized(
            Seconds(2.0),
            Seconds(1.0),
            2,
            2,
            2,
            0.5,
        );
        assert!((duration.value() - 1.5).abs() < 1e-5);
    }
}

//! The frame-scoped sampled-events buffer.
//!
//! Nodes append events as they update; a node's result carries a
//! `[start, end)` range into the buffer. Blending two results requires the
//! ranges to be adjacent, which holds by construction because evaluation is
//! depth-first and the buffer is append-only.

use bitflags::bitflags;

use crate::{ids::NodeIndex, ids::StringId, time::Percentage};

bitflags! {
    #[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
    pub struct SampledEventFlags: u8 {
        /// Sampled from an inactive branch (e.g. the source side of a
        /// transition); consumers usually filter these out.
        const IGNORED = 0x01;
        const STATE_ENTRY = 0x02;
        const STATE_EXECUTE = 0x04;
        const STATE_EXIT = 0x08;
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SampledEvent {
    pub source_node: NodeIndex,
    pub id: StringId,
    /// Blend weight of the branch that sampled the event; scaled as ranges
    /// are blended up the tree.
    pub weight: f32,
    pub percentage_through: Percentage,
    pub flags: SampledEventFlags,
}

/// Half-open index range into the frame's [`SampledEventsBuffer`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct SampledEventRange {
    pub start: u32,
    pub end: u32,
}

impl SampledEventRange {
    pub fn new(start: u32, end: u32) -> SampledEventRange {
        debug_assert!(start <= end);
        SampledEventRange { start, end }
    }

    pub fn empty_at(at: u32) -> SampledEventRange {
        SampledEventRange { start: at, end: at }
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampledEventsBuffer {
    events: Vec<SampledEvent>,
}

impl SampledEventsBuffer {
    pub fn new() -> SampledEventsBuffer {
        SampledEventsBuffer::default()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[SampledEvent] {
        &self.events
    }

    pub fn events_in_range(&self, range: SampledEventRange) -> &[SampledEvent] {
        &self.events[range.start as usize..range.end as usize]
    }

    /// Position the next appended event will take; pair with
    /// [`SampledEventsBuffer::range_from`] around a node's sampling.
    pub fn mark(&self) -> u32 {
        self.events.len() as u32
    }

    pub fn range_from(&self, start: u32) -> SampledEventRange {
        SampledEventRange::new(start, self.events.len() as u32)
    }

    pub fn append(&mut self, event: SampledEvent) {
        self.events.push(event);
    }

    pub fn sample(
        &mut self,
        source_node: NodeIndex,
        id: StringId,
        percentage_through: Percentage,
        flags: SampledEventFlags,
    ) {
        self.events.push(SampledEvent {
            source_node,
            id,
            weight: 1.0,
            percentage_through,
            flags,
        });
    }

    /// Combine two ranges into one covering both, scaling the source
    /// events' weights by `1 - blend_weight` and the target events' by
    /// `blend_weight`. The source must not come after the target; events
    /// appended between the two (e.g. a state's exit events) are covered
    /// unscaled.
    pub fn blend_event_ranges(
        &mut self,
        source: SampledEventRange,
        target: SampledEventRange,
        blend_weight: f32,
    ) -> SampledEventRange {
        debug_assert!(
            source.end <= target.start,
            "source event range must precede the target: {:?} / {:?}",
            source,
            target
        );

        for event in &mut self.events[source.start as usize..source.end as usize] {
            event.weight *= 1.0 - blend_weight;
        }
        for event in &mut self.events[target.start as usize..target.end as usize] {
            event.weight *= blend_weight;
        }
        SampledEventRange::new(source.start.min(target.start), target.end.max(source.end))
    }

    /// Flag every event in `range` as sampled from an inactive branch.
    pub fn mark_range_ignored(&mut self, range: SampledEventRange) {
        for event in &mut self.events[range.start as usize..range.end as usize] {
            event.flags |= SampledEventFlags::IGNORED;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(weight: f32) -> SampledEvent {
        SampledEvent {
            source_node: NodeIndex(0),
            id: StringId::new("Footstep"),
            weight,
            percentage_through: Percentage(0.5),
            flags: SampledEventFlags::empty(),
        }
    }

    #[test]
    fn blend_scales_weights_and_unions() {
        let mut buffer = SampledEventsBuffer::new();
        buffer.append(event(1.0));
        buffer.append(event(1.0));
        let source = SampledEventRange::new(0, 1);
        let target = SampledEventRange::new(1, 2);

        let blended = buffer.blend_event_ranges(source, target, 0.25);
        assert_eq!(blended, SampledEventRange::new(0, 2));
        assert!((buffer.events()[0].weight - 0.75).abs() < 1e-6);
        assert!((buffer.events()[1].weight - 0.25).abs() < 1e-6);
    }

    #[test]
    fn blend_with_empty_source() {
        let mut buffer = SampledEventsBuffer::new();
        buffer.append(event(1.0));
        let source = SampledEventRange::empty_at(0);
        let target = SampledEventRange::new(0, 1);
        let blended = buffer.blend_event_ranges(source, target, 0.5);
        assert_eq!(blended.len(), 1);
    }
}

use animgraph_core::Pose;

/// Generational handle to a cached-pose buffer.
///
/// Exactly one transition node owns a given id at a time; ownership moves
/// on forced transitions and the generation check catches any double
/// destroy that would break that linearity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CachedPoseBufferId {
    index: u16,
    generation: u16,
}

impl CachedPoseBufferId {
    pub fn to_raw(self) -> u32 {
        (u32::from(self.index) << 16) | u32::from(self.generation)
    }

    pub fn from_raw(raw: u32) -> CachedPoseBufferId {
        CachedPoseBufferId {
            index: (raw >> 16) as u16,
            generation: raw as u16,
        }
    }
}

#[derive(Debug)]
struct Slot {
    generation: u16,
    live: bool,
    pose: Option<Pose>,
}

#[derive(Debug, Default)]
pub(crate) struct CachedPoseInventory {
    slots: Vec<Slot>,
    free: Vec<u16>,
}

impl CachedPoseInventory {
    pub fn create(&mut self) -> CachedPoseBufferId {
        let index = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                debug_assert!(!slot.live);
                slot.live = true;
                slot.pose = None;
                index
            }
            None => {
                debug_assert!(self.slots.len() < u16::max_value() as usize);
                self.slots.push(Slot {
                    generation: 0,
                    live: true,
                    pose: None,
                });
                (self.slots.len() - 1) as u16
            }
        };
        CachedPoseBufferId {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    pub fn destroy(&mut self, id: CachedPoseBufferId) {
        let slot = match self.slots.get_mut(id.index as usize) {
            Some(slot) => slot,
            None => {
                debug_assert!(false, "destroy of unknown cached pose {:?}", id);
                log::error!("destroy of unknown cached pose {:?}", id);
                return;
            }
        };
        if !slot.live || slot.generation != id.generation {
            debug_assert!(false, "double destroy of cached pose {:?}", id);
            log::error!("double destroy of cached pose {:?}", id);
            return;
        }
        slot.live = false;
        slot.pose = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
    }

    pub fn write(&mut self, id: CachedPoseBufferId, pose: Pose) {
        let slot = &mut self.slots[id.index as usize];
        debug_assert!(slot.live && slot.generation == id.generation);
        slot.pose = Some(pose);
    }

    /// `None` for a buffer created this frame but not yet written.
    pub fn read(&self, id: CachedPoseBufferId) -> Option<&Pose> {
        let slot = self.slots.get(id.index as usize)?;
        if !slot.live || slot.generation != id.generation {
            debug_assert!(false, "read of stale cached pose {:?}", id);
            log::error!("read of stale cached pose {:?}", id);
            return None;
        }
        slot.pose.as_ref()
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.live).count()
    }

    pub fn live(&self) -> impl Iterator<Item = (CachedPoseBufferId, Option<&Pose>)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            if slot.live {
                Some((
                    CachedPoseBufferId {
                        index: index as u16,
                        generation: slot.generation,
                    },
                    slot.pose.as_ref(),
                ))
            } else {
                None
            }
        })
    }

    /// Full-state capture for snapshots: slot generations, liveness,
    /// contents and the free-list order, so ids handed out after a
    /// restore match the original instance exactly.
    pub fn snapshot(&self) -> CachedPoseSnapshot {
        CachedPoseSnapshot {
            slots: self
                .slots
                .iter()
                .map(|slot| (slot.generation, slot.live, slot.pose.clone()))
                .collect(),
            free: self.free.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: &CachedPoseSnapshot) {
        self.slots = snapshot
            .slots
            .iter()
            .map(|(generation, live, pose)| Slot {
                generation: *generation,
                live: *live,
                pose: pose.clone(),
            })
            .collect();
        self.free = snapshot.free.clone();
    }
}

/// Serializable state of a [`CachedPoseInventory`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CachedPoseSnapshot {
    slots: Vec<(u16, bool, Option<Pose>)>,
    free: Vec<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generations_catch_stale_destroys() {
        let mut inventory = CachedPoseInventory::default();
        let first = inventory.create();
        inventory.destroy(first);
        let second = inventory.create();
        // Same slot, new generation.
        assert_ne!(first, second);
        assert_eq!(inventory.live_count(), 1);
    }

    #[test]
    fn raw_round_trip() {
        let mut inventory = CachedPoseInventory::default();
        let id = inventory.create();
        assert_eq!(CachedPoseBufferId::from_raw(id.to_raw()), id);
    }
}

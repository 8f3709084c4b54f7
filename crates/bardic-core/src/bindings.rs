use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotAssignment {
    pub slot: usize,
    pub pitch: u8,
}

/// Display lanes for upcoming pitches. A pitch keeps its lane for as long as
/// it stays among the upcoming pitches; freed lanes are reused in order.
#[derive(Clone, Debug, Default)]
pub struct BindingSlots {
    slots: Vec<Option<u8>>,
}

impl BindingSlots {
    pub fn new(lanes: usize) -> Self {
        Self {
            slots: vec![None; lanes],
        }
    }

    pub fn lanes(&self) -> usize {
        self.slots.len()
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }

    /// `upcoming` holds distinct pitches, nearest first. Returns the
    /// assignments in `upcoming` order; pitches that found no free lane are
    /// left out.
    pub fn assign(&mut self, upcoming: &[u8]) -> Vec<SlotAssignment> {
        for slot in &mut self.slots {
            if slot.is_some_and(|pitch| !upcoming.contains(&pitch)) {
                *slot = None;
            }
        }

        let mut out = Vec::with_capacity(upcoming.len().min(self.slots.len()));
        for &pitch in upcoming {
            let slot = match self.slots.iter().position(|s| *s == Some(pitch)) {
                Some(existing) => Some(existing),
                None => {
                    let free = self.slots.iter().position(Option::is_none);
                    if let Some(free) = free {
                        self.slots[free] = Some(pitch);
                    }
                    free
                }
            };
            if let Some(slot) = slot {
                out.push(SlotAssignment { slot, pitch });
            }
        }
        out
    }
}

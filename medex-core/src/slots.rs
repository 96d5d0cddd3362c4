//! Fixed-size conversion slot pool.
//!
//! Each slot runs at most one pipeline task; the pool caps concurrency and
//! carries the in-flight dedup interlock: the first slot to register a
//! fingerprint owns the work, later arrivals for the same fingerprint hand
//! over their occurrence and bow out.

use medex_model::{Fingerprint, Occurrence};
use std::sync::Mutex;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct SlotState {
    busy: bool,
    id: Option<Fingerprint>,
    occurrences: Vec<Occurrence>,
}

/// Outcome of registering a fingerprint on a slot.
#[derive(Debug, PartialEq, Eq)]
pub enum InFlight {
    /// This slot owns the fingerprint and must do the work.
    Owned,
    /// Another active slot already holds it; our occurrence was appended to
    /// that slot and this task must stop.
    Adopted { owner: usize },
}

#[derive(Debug)]
pub struct SlotPool {
    slots: Mutex<Vec<SlotState>>,
    freed: Notify,
}

impl SlotPool {
    pub fn new(size: usize) -> Self {
        let slots = (0..size).map(|_| SlotState::default()).collect();
        SlotPool {
            slots: Mutex::new(slots),
            freed: Notify::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First-fit claim of a free slot, waiting if all are busy.
    pub async fn acquire(&self) -> usize {
        loop {
            if let Some(index) = self.try_acquire() {
                return index;
            }
            self.freed.notified().await;
        }
    }

    fn try_acquire(&self) -> Option<usize> {
        let mut slots = self.slots.lock().unwrap();
        let index = slots.iter().position(|s| !s.busy)?;
        slots[index].busy = true;
        Some(index)
    }

    /// Register the task's fingerprint on its slot, or adopt into a sibling
    /// already working on the same fingerprint.
    pub fn begin(&self, slot: usize, id: Fingerprint, occurrence: Occurrence) -> InFlight {
        let mut slots = self.slots.lock().unwrap();
        let owner = slots
            .iter()
            .position(|s| s.busy && s.id.as_ref() == Some(&id));
        match owner {
            Some(owner) if owner != slot => {
                slots[owner].occurrences.push(occurrence);
                InFlight::Adopted { owner }
            }
            _ => {
                slots[slot].id = Some(id);
                slots[slot].occurrences.push(occurrence);
                InFlight::Owned
            }
        }
    }

    /// Take every occurrence accumulated on the slot (the owner's own plus
    /// any adopted ones), in arrival order. The slot keeps its fingerprint,
    /// so siblings may still adopt into it; collect those later with
    /// [`SlotPool::finish`].
    pub fn drain_occurrences(&self, slot: usize) -> Vec<Occurrence> {
        let mut slots = self.slots.lock().unwrap();
        std::mem::take(&mut slots[slot].occurrences)
    }

    /// Atomically take any remaining occurrences and retire the slot's
    /// fingerprint. After this, a sibling with the same fingerprint owns
    /// its own work and resolves against the catalog instead.
    pub fn finish(&self, slot: usize) -> Vec<Occurrence> {
        let mut slots = self.slots.lock().unwrap();
        slots[slot].id = None;
        std::mem::take(&mut slots[slot].occurrences)
    }

    pub fn release(&self, slot: usize) {
        let mut slots = self.slots.lock().unwrap();
        slots[slot] = SlotState::default();
        drop(slots);
        self.freed.notify_one();
    }
}

// SPDX-License-Identifier: MPL-2.0

//! The reference-counted IOVA page table.

use hashbrown::{hash_map::Entry, HashMap};
use spin::Mutex;

use super::Pfn;

/// The outcome of [`IovaPageTable::map_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapOutcome {
    /// The frame was not tracked before; the insert closure has run and the
    /// new entry holds the supplied pin.
    NewlyMapped,
    /// The frame is already tracked; its reference count was bumped and the
    /// caller's duplicate pin released. The IOMMU was not touched.
    AlreadyMapped,
}

/// The outcome of [`IovaPageTable::unmap_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmapOutcome {
    /// The last reference is gone; the remove closure has run and the
    /// owning pin was released with the entry.
    Released,
    /// Other mapping requests still reference the frame.
    StillReferenced,
    /// The frame is not tracked.
    NotFound,
}

/// Tracks pinned physical pages currently mapped into IOVA space, keyed by
/// page frame number.
///
/// A frame appears at most once. The entry owns the pin that keeps the frame
/// resident, so removing the entry is what unpins the page. The first mapper
/// of a frame wins the IOMMU page-table insert, the last unmapper performs
/// the remove; both run inside the table lock, so a concurrent request on
/// the same frame observes either the finished IOMMU edit or none of it,
/// never a double insert or a double unpin.
#[derive(Debug)]
pub struct IovaPageTable<T> {
    frames: Mutex<HashMap<Pfn, FrameEntry<T>>>,
}

#[derive(Debug)]
struct FrameEntry<T> {
    ref_count: usize,
    page: T,
}

impl<T> IovaPageTable<T> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            frames: Mutex::new(HashMap::new()),
        }
    }

    /// Records a mapping request for `pfn`.
    ///
    /// If the frame is untracked, `insert` runs under the table lock (the
    /// IOMMU page-table insert); only when it succeeds is the entry created
    /// with a reference count of 1. If the frame is tracked, the reference
    /// count is bumped, `insert` does not run, and the duplicate `page` pin
    /// is released; the entry's original pin keeps the frame resident.
    pub fn map_frame<E>(
        &self,
        pfn: Pfn,
        page: T,
        insert: impl FnOnce(&T) -> core::result::Result<(), E>,
    ) -> core::result::Result<MapOutcome, E> {
        let mut frames = self.frames.lock();
        match frames.entry(pfn) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().ref_count += 1;
                drop(page);
                Ok(MapOutcome::AlreadyMapped)
            }
            Entry::Vacant(slot) => {
                insert(&page)?;
                slot.insert(FrameEntry { ref_count: 1, page });
                Ok(MapOutcome::NewlyMapped)
            }
        }
    }

    /// Records an unmapping request for `pfn`.
    ///
    /// On the last reference, `remove` runs under the table lock (the IOMMU
    /// page-table remove) and the entry is dropped together with its pin.
    pub fn unmap_frame(&self, pfn: Pfn, remove: impl FnOnce(&T)) -> UnmapOutcome {
        let mut frames = self.frames.lock();
        match frames.entry(pfn) {
            Entry::Vacant(_) => UnmapOutcome::NotFound,
            Entry::Occupied(mut entry) => {
                if entry.get().ref_count > 1 {
                    entry.get_mut().ref_count -= 1;
                    UnmapOutcome::StillReferenced
                } else {
                    remove(&entry.get().page);
                    entry.remove();
                    UnmapOutcome::Released
                }
            }
        }
    }

    /// Returns the reference count of a tracked frame.
    pub fn ref_count(&self, pfn: Pfn) -> Option<usize> {
        self.frames.lock().get(&pfn).map(|entry| entry.ref_count)
    }

    /// Removes every entry, handing the owning pins to the caller.
    ///
    /// Used by forced device teardown, which releases entries regardless of
    /// their reference counts.
    pub fn drain(&self) -> Vec<(Pfn, T)> {
        self.frames
            .lock()
            .drain()
            .map(|(pfn, entry)| (pfn, entry.page))
            .collect()
    }

    /// Returns the number of tracked frames.
    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    /// Whether no frame is tracked.
    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}

impl<T> Default for IovaPageTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

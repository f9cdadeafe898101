// SPDX-License-Identifier: MPL-2.0

//! Long-lived coherent regions established over the memory-mapping path.
//!
//! The memory-mapping entry point (an external collaborator) allocates a
//! coherent buffer, maps it into the caller and registers it here; the core
//! only serves translate and free requests against the resulting ledger.

use hashbrown::{hash_map::Entry, HashMap};
use log::warn;
use spin::Mutex;

use super::{Daddr, Vaddr, PAGE_SIZE};
use crate::error::{Error, Result};

/// A coherent region addressable by the caller virtual address it is mapped
/// at.
///
/// Owns the platform's coherent allocation: dropping the region frees it.
#[derive(Debug)]
pub struct ContiguousRegion<C> {
    daddr: Daddr,
    size: usize,
    nr_pages: usize,
    alloc: C,
}

impl<C> ContiguousRegion<C> {
    /// Creates the record of a coherent allocation with device address
    /// `daddr`, spanning `size` bytes.
    pub fn new(daddr: Daddr, size: usize, alloc: C) -> Self {
        Self {
            daddr,
            size,
            nr_pages: size.div_ceil(PAGE_SIZE),
            alloc,
        }
    }

    /// The device address of the region.
    pub fn daddr(&self) -> Daddr {
        self.daddr
    }

    /// The size of the region in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The number of pages backing the region, for fault-mapping by the
    /// memory-mapping collaborator.
    pub fn nr_pages(&self) -> usize {
        self.nr_pages
    }

    /// The owning coherent allocation.
    pub fn allocation(&self) -> &C {
        &self.alloc
    }
}

/// Tracks long-lived coherent allocations, keyed by caller virtual address.
#[derive(Debug)]
pub struct ContiguousLedger<C> {
    regions: Mutex<HashMap<Vaddr, ContiguousRegion<C>>>,
}

impl<C> ContiguousLedger<C> {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self {
            regions: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a region under the caller virtual address it is mapped at.
    pub fn insert(&self, va: Vaddr, region: ContiguousRegion<C>) -> Result<()> {
        match self.regions.lock().entry(va) {
            Entry::Occupied(_) => {
                warn!("a coherent region is already mapped at va {va:#x}");
                Err(Error::InvalidArgs)
            }
            Entry::Vacant(slot) => {
                slot.insert(region);
                Ok(())
            }
        }
    }

    /// Looks up the device address of the region mapped at `va`.
    pub fn translate(&self, va: Vaddr) -> Option<Daddr> {
        self.regions.lock().get(&va).map(ContiguousRegion::daddr)
    }

    /// Removes the region mapped at `va`, handing it to the caller.
    pub fn remove(&self, va: Vaddr) -> Option<ContiguousRegion<C>> {
        self.regions.lock().remove(&va)
    }

    /// Removes every region, handing them to the caller.
    pub fn drain(&self) -> Vec<(Vaddr, ContiguousRegion<C>)> {
        self.regions.lock().drain().collect()
    }

    /// Returns the number of tracked regions.
    pub fn len(&self) -> usize {
        self.regions.lock().len()
    }

    /// Whether no region is tracked.
    pub fn is_empty(&self) -> bool {
        self.regions.lock().is_empty()
    }
}

impl<C> Default for ContiguousLedger<C> {
    fn default() -> Self {
        Self::new()
    }
}

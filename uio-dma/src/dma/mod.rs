// SPDX-License-Identifier: MPL-2.0

//! The mapping engine.
//!
//! Two address-translation strategies live here behind the per-device
//! dispatch in [`crate::device`]:
//!
//! - `mapped` pins caller pages and maps them page by page into the
//!   device's IOMMU domain, deduplicating overlapping requests through the
//!   reference-counted [`IovaPageTable`].
//! - `bounce` stages transfers through core-owned scratch buffers tracked
//!   by the [`BounceLedger`], and serves translate/free against the
//!   [`ContiguousLedger`] of memory-mapped coherent regions.

pub(crate) mod bounce;
pub(crate) mod contiguous;
pub(crate) mod iova;
pub(crate) mod mapped;
pub(crate) mod pin;

pub use self::{
    bounce::BounceLedger,
    contiguous::{ContiguousLedger, ContiguousRegion},
    iova::{IovaPageTable, MapOutcome, UnmapOutcome},
    pin::{PinnedRange, MAX_MAP_PAGES},
};

/// A virtual address in the caller's address space.
pub type Vaddr = usize;

/// A physical address.
pub type Paddr = usize;

/// A device address: what the device uses to address memory, via the IOMMU
/// or directly.
pub type Daddr = usize;

/// A page frame number: the identity of one physical page.
pub type Pfn = usize;

/// The page size by which buffers are pinned and mapped.
pub const PAGE_SIZE: usize = 4096;

bitflags::bitflags! {
    /// Access and coherency flags of an IOMMU page-table entry.
    pub struct MappingFlags: u32 {
        /// The device may read through the mapping.
        const READ = 1 << 0;
        /// The device may write through the mapping.
        const WRITE = 1 << 1;
        /// The device accesses main memory CPU-cache-coherently.
        const CACHE = 1 << 2;
    }
}

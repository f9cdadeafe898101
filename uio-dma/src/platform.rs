// SPDX-License-Identifier: MPL-2.0

//! Interfaces to the platform services the mapping engine consumes.
//!
//! The embedding program provides the character-device transport, the PCI
//! glue and the memory-mapping entry point; this module defines the narrow
//! surface the core needs from it: pinning caller pages, editing the IOMMU
//! domain's page table, assigning streaming DMA addresses, and copying
//! between caller buffers and core-owned memory.
//!
//! The pin and IOMMU calls are the only calls the core may issue while
//! holding a ledger lock; implementations must not block on other mapping
//! requests from within them.

use crate::{
    dma::{Daddr, MappingFlags, Paddr, Pfn, Vaddr, PAGE_SIZE},
    error::Result,
    request::DmaDirection,
};

/// A pinned (resident, non-swappable) physical page.
///
/// The handle owns the pin: dropping it releases the page. Entries of the
/// [`IovaPageTable`] hold these handles, so removing an entry is what unpins
/// the page; there is no separate release step to forget.
///
/// [`IovaPageTable`]: crate::dma::IovaPageTable
pub trait PinnedPage: Send + 'static {
    /// Returns the page frame number of the pinned page.
    fn pfn(&self) -> Pfn;

    /// Returns the physical address of the pinned page.
    fn paddr(&self) -> Paddr {
        self.pfn() * PAGE_SIZE
    }
}

/// An isolated address-translation context a device can be attached to.
pub trait IommuDomain: Send + Sync + 'static {
    /// Attaches the owning device to this domain.
    fn attach(&self) -> Result<()>;

    /// Detaches the owning device from this domain.
    fn detach(&self);

    /// Inserts a page-granular translation from `daddr` to `paddr`.
    fn map(&self, daddr: Daddr, paddr: Paddr, flags: MappingFlags) -> Result<()>;

    /// Removes the translation at `daddr`.
    fn unmap(&self, daddr: Daddr) -> Result<()>;
}

/// The platform services backing one device.
pub trait Platform: Send + Sync + 'static {
    /// The owning handle of one pinned physical page.
    type Page: PinnedPage;

    /// The IOMMU domain handle of the device.
    type Domain: IommuDomain;

    /// An owning coherent allocation; dropping it frees the allocation.
    type Coherent: Send + 'static;

    /// Pins the `nr_pages` physical pages backing the caller buffer at `va`.
    ///
    /// The pages are returned in ascending address order. Returning fewer or
    /// more pages than requested is treated as a pin failure by the caller,
    /// which drops whatever was returned.
    fn pin_user_pages(&self, va: Vaddr, nr_pages: usize) -> Result<Vec<Self::Page>>;

    /// Copies `buf.len()` bytes out of the caller buffer at `va`.
    fn read_user(&self, va: Vaddr, buf: &mut [u8]) -> Result<()>;

    /// Copies `buf` into the caller buffer at `va`.
    fn write_user(&self, va: Vaddr, buf: &[u8]) -> Result<()>;

    /// Assigns a device address to a core-owned scratch buffer.
    fn map_streaming(&self, buf: &[u8], direction: DmaDirection) -> Result<Daddr>;

    /// Releases a device address obtained from [`map_streaming`].
    ///
    /// [`map_streaming`]: Platform::map_streaming
    fn unmap_streaming(&self, daddr: Daddr, size: usize, direction: DmaDirection);
}

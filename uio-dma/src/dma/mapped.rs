// SPDX-License-Identifier: MPL-2.0

//! Direct IOMMU mapping of caller pages.
//!
//! The device's IOMMU domain is kept identity-mapped at page granularity
//! relative to caller virtual addresses: mapping a buffer inserts one
//! translation per page at `page_aligned(va) + i * PAGE_SIZE`, and the
//! address handed back to the caller is its own `va`, offset preserved.

use log::{debug, warn};

use super::{
    iova::{MapOutcome, UnmapOutcome},
    pin::pin_user_range,
    Daddr, Pfn, PAGE_SIZE,
};
use crate::{
    device::DmaDevice,
    error::{Error, Result},
    platform::{IommuDomain, PinnedPage, Platform},
    request::DmaRequest,
};

/// Maps a caller buffer into the device's IOVA space, page by page.
///
/// All-or-nothing: a failed IOMMU insert undoes every frame this request
/// already touched and releases every pin before the error is surfaced.
pub(crate) fn map<P: Platform>(dev: &DmaDevice<P>, req: &mut DmaRequest) -> Result<()> {
    let domain = dev.domain().ok_or(Error::IommuInsertFailed)?;
    let range = pin_user_range(
        dev.platform(),
        req.va,
        req.size,
        dev.options().max_map_pages,
    )?;

    let base = req.va & !(PAGE_SIZE - 1);
    let base_pfn = req.va / PAGE_SIZE;
    let flags = dev.options().mapping_flags();

    for (i, page) in range.into_pages().into_iter().enumerate() {
        let pfn = base_pfn + i;
        let daddr = base + i * PAGE_SIZE;
        let outcome = dev
            .iova()
            .map_frame(pfn, page, |page| domain.map(daddr, page.paddr(), flags));
        match outcome {
            Ok(MapOutcome::NewlyMapped) => {
                debug!("mapped iova {daddr:#x} for frame {pfn:#x}");
            }
            Ok(MapOutcome::AlreadyMapped) => {
                debug!("iova {daddr:#x} already mapped, bumped frame {pfn:#x}");
            }
            Err(err) => {
                warn!("IOMMU insert at {daddr:#x} failed: {err:?}");
                unwind(dev, domain, base_pfn, base, i);
                // The remaining pinned pages are released when the iterator
                // drops.
                return Err(Error::IommuInsertFailed);
            }
        }
    }

    req.iova = req.va;
    Ok(())
}

/// Undoes the first `processed` frames of a failed mapping request.
fn unwind<P: Platform>(
    dev: &DmaDevice<P>,
    domain: &P::Domain,
    base_pfn: Pfn,
    base: Daddr,
    processed: usize,
) {
    for i in (0..processed).rev() {
        let pfn = base_pfn + i;
        let daddr = base + i * PAGE_SIZE;
        let outcome = dev.iova().unmap_frame(pfn, |_| {
            if let Err(err) = domain.unmap(daddr) {
                warn!("IOMMU remove at {daddr:#x} failed during unwind: {err:?}");
            }
        });
        if outcome == UnmapOutcome::NotFound {
            warn!("frame {pfn:#x} vanished during unwind");
        }
    }
}

/// Unmaps the pages spanned by `[iova, iova + size)`.
///
/// Frames that are not tracked are logged and skipped; a partially failed
/// mapping may already have cleaned them up. The loop never aborts.
pub(crate) fn unmap<P: Platform>(dev: &DmaDevice<P>, req: &mut DmaRequest) -> Result<()> {
    let domain = dev.domain().ok_or(Error::NotFound)?;
    let offset = req.iova % PAGE_SIZE;
    let nr_pages = offset
        .checked_add(req.size)
        .ok_or(Error::InvalidSize)?
        .div_ceil(PAGE_SIZE);
    let base_pfn = req.iova / PAGE_SIZE;

    for i in 0..nr_pages {
        let pfn = base_pfn + i;
        let outcome = dev.iova().unmap_frame(pfn, |_| {
            if let Err(err) = domain.unmap(pfn * PAGE_SIZE) {
                warn!("IOMMU remove for frame {pfn:#x} failed: {err:?}");
            }
        });
        match outcome {
            UnmapOutcome::Released => debug!("released frame {pfn:#x}"),
            UnmapOutcome::StillReferenced => {}
            UnmapOutcome::NotFound => {
                warn!("frame {pfn:#x} is not tracked, skipping");
            }
        }
    }

    Ok(())
}

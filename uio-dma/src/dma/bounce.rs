// SPDX-License-Identifier: MPL-2.0

//! Bounce-buffer DMA.
//!
//! When the device cannot reach caller memory directly, every transfer is
//! staged through a core-owned scratch buffer: map allocates the scratch and
//! copies caller data in, unmap copies device data back out. The caller gets
//! the scratch buffer's device address, never its own.

use hashbrown::{hash_map::Entry, HashMap};
use log::{debug, warn};
use spin::Mutex;

use super::{Daddr, Vaddr};
use crate::{
    device::DmaDevice,
    error::{Error, Result},
    platform::Platform,
    request::{DmaDirection, DmaRequest},
};

/// One in-flight bounce transfer.
#[derive(Debug)]
pub(crate) struct BounceEntry {
    /// The caller buffer the scratch stands in for.
    pub(crate) va: Vaddr,
    pub(crate) direction: DmaDirection,
    /// The scratch buffer. Freed together with the entry, never separately.
    pub(crate) buf: Vec<u8>,
}

/// Tracks the scratch buffers backing in-flight bounce transfers, keyed by
/// the `(device address, size)` pair handed to the caller.
///
/// The compound key is authoritative: an unmap request must name both values
/// exactly. A request naming a tracked address with the wrong size matches
/// nothing; even if the platform reused the address across a fast
/// free/realloc cycle, the size keeps the two transfers apart.
#[derive(Debug, Default)]
pub struct BounceLedger {
    entries: Mutex<HashMap<(Daddr, usize), BounceEntry>>,
}

impl BounceLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, daddr: Daddr, size: usize, entry: BounceEntry) -> Result<()> {
        match self.entries.lock().entry((daddr, size)) {
            Entry::Occupied(_) => {
                warn!("streaming address {daddr:#x} ({size} bytes) is still in flight");
                Err(Error::InvalidArgs)
            }
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
        }
    }

    pub(crate) fn remove(&self, daddr: Daddr, size: usize) -> Result<BounceEntry> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.remove(&(daddr, size)) {
            return Ok(entry);
        }
        let mut mismatched = false;
        for &(tracked_daddr, tracked_size) in entries.keys() {
            if tracked_daddr == daddr {
                warn!(
                    "bounce entry at {daddr:#x} has size {tracked_size}, request says {size}"
                );
                mismatched = true;
            }
        }
        if mismatched {
            Err(Error::SizeMismatch)
        } else {
            Err(Error::NotFound)
        }
    }

    pub(crate) fn drain(&self) -> Vec<((Daddr, usize), BounceEntry)> {
        self.entries.lock().drain().collect()
    }

    /// Returns the number of in-flight transfers.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no transfer is in flight.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Assigns a device address to a caller buffer by staging it in a scratch
/// buffer.
pub(crate) fn map<P: Platform>(dev: &DmaDevice<P>, req: &mut DmaRequest) -> Result<()> {
    if req.size == 0 {
        return Err(Error::InvalidSize);
    }

    let mut buf = vec![0u8; req.size];
    if req.direction.copies_to_device() {
        dev.platform().read_user(req.va, &mut buf)?;
    }

    let daddr = dev.platform().map_streaming(&buf, req.direction)?;
    let entry = BounceEntry {
        va: req.va,
        direction: req.direction,
        buf,
    };
    if let Err(err) = dev.bounce().insert(daddr, req.size, entry) {
        // The platform handed out an address that is still in flight;
        // revert this mapping and surface the violation.
        dev.platform().unmap_streaming(daddr, req.size, req.direction);
        return Err(err);
    }

    debug!(
        "bounce map: va {:#x} -> iova {daddr:#x} ({} bytes)",
        req.va, req.size
    );
    req.iova = daddr;
    Ok(())
}

/// Releases a bounce transfer, copying device data back to the caller if the
/// direction asks for it.
pub(crate) fn unmap<P: Platform>(dev: &DmaDevice<P>, req: &mut DmaRequest) -> Result<()> {
    let entry = dev.bounce().remove(req.iova, req.size)?;
    release_entry(dev.platform(), req.iova, req.size, entry);
    req.iova = 0;
    Ok(())
}

/// Releases one bounce transfer outside the ledger lock: the streaming
/// mapping first, then the copy-back, then the scratch buffer together with
/// the entry.
pub(crate) fn release_entry<P: Platform>(
    platform: &P,
    daddr: Daddr,
    size: usize,
    entry: BounceEntry,
) {
    platform.unmap_streaming(daddr, size, entry.direction);
    if entry.direction.copies_from_device() {
        if let Err(err) = platform.write_user(entry.va, &entry.buf) {
            warn!("copy-back to va {:#x} failed: {err:?}", entry.va);
        }
    }
    debug!("bounce unmap: iova {daddr:#x} ({size} bytes)");
}

/// Looks up the device address of a coherent region established over the
/// memory-mapping path.
pub(crate) fn translate<P: Platform>(dev: &DmaDevice<P>, req: &mut DmaRequest) -> Result<()> {
    let daddr = dev.contiguous().translate(req.va).ok_or(Error::NotFound)?;
    req.iova = daddr;
    Ok(())
}

/// Frees a coherent region established over the memory-mapping path.
pub(crate) fn free<P: Platform>(dev: &DmaDevice<P>, req: &mut DmaRequest) -> Result<()> {
    let region = dev.contiguous().remove(req.va).ok_or(Error::NotFound)?;
    debug!(
        "freeing coherent region at va {:#x} (iova {:#x})",
        req.va,
        region.daddr()
    );
    // The coherent allocation is freed together with the ledger entry.
    drop(region);
    req.va = 0;
    req.iova = 0;
    req.size = 0;
    Ok(())
}

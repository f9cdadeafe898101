// SPDX-License-Identifier: MPL-2.0

//! Per-device aggregate state, lifecycle and request dispatch.

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use hashbrown::HashMap;
use log::{debug, info, warn};
use spin::Mutex;

use crate::{
    dma::{
        bounce::{self, BounceLedger},
        contiguous::{ContiguousLedger, ContiguousRegion},
        iova::IovaPageTable,
        mapped,
        pin::MAX_MAP_PAGES,
        MappingFlags, Vaddr, PAGE_SIZE,
    },
    error::{Error, Result},
    platform::{IommuDomain, Platform},
    request::{DmaOperation, DmaRequest},
    sync::WaitQueue,
};

/// The active address-translation strategy of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaMode {
    /// Stage transfers through core-owned scratch buffers.
    Bounce,
    /// Map caller pages directly through the device's IOMMU domain.
    IommuMapped,
}

/// Per-device tunables.
#[derive(Debug, Clone, Copy)]
pub struct DeviceOptions {
    pub(crate) max_map_pages: usize,
    pub(crate) cache_coherent: bool,
}

impl DeviceOptions {
    /// Creates the default options: the [`MAX_MAP_PAGES`] page ceiling and a
    /// non-cache-coherent device.
    pub fn new() -> Self {
        Self {
            max_map_pages: MAX_MAP_PAGES,
            cache_coherent: false,
        }
    }

    /// Sets the ceiling on pages pinned by a single mapping request.
    pub fn max_map_pages(mut self, max_map_pages: usize) -> Self {
        self.max_map_pages = max_map_pages;
        self
    }

    /// Declares whether the device accesses main memory CPU-cache-coherently.
    pub fn cache_coherent(mut self, cache_coherent: bool) -> Self {
        self.cache_coherent = cache_coherent;
        self
    }

    pub(crate) fn mapping_flags(&self) -> MappingFlags {
        let mut flags = MappingFlags::READ | MappingFlags::WRITE;
        if self.cache_coherent {
            flags |= MappingFlags::CACHE;
        }
        flags
    }
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct LifecycleState {
    mode: DmaMode,
    attached: bool,
    open_handles: usize,
}

/// A registered device's aggregate DMA state.
///
/// One aggregate owns the three ledgers and the mode that routes requests
/// between them. The mode may change only while no handle is open; while
/// handles are open it is stable, so requests dispatch without holding the
/// lifecycle lock.
pub struct DmaDevice<P: Platform> {
    platform: Arc<P>,
    domain: Option<P::Domain>,
    options: DeviceOptions,
    state: Mutex<LifecycleState>,
    closed: WaitQueue,
    iova: IovaPageTable<P::Page>,
    bounce: BounceLedger,
    contiguous: ContiguousLedger<P::Coherent>,
}

impl<P: Platform> DmaDevice<P> {
    fn new(platform: Arc<P>, domain: Option<P::Domain>, options: DeviceOptions) -> Self {
        Self {
            platform,
            domain,
            options,
            state: Mutex::new(LifecycleState {
                mode: DmaMode::Bounce,
                attached: false,
                open_handles: 0,
            }),
            closed: WaitQueue::new(),
            iova: IovaPageTable::new(),
            bounce: BounceLedger::new(),
            contiguous: ContiguousLedger::new(),
        }
    }

    pub(crate) fn platform(&self) -> &P {
        &self.platform
    }

    pub(crate) fn domain(&self) -> Option<&P::Domain> {
        self.domain.as_ref()
    }

    pub(crate) fn options(&self) -> &DeviceOptions {
        &self.options
    }

    /// The reference-counted IOVA page table of the device.
    pub fn iova(&self) -> &IovaPageTable<P::Page> {
        &self.iova
    }

    /// The bounce-transfer ledger of the device.
    pub fn bounce(&self) -> &BounceLedger {
        &self.bounce
    }

    /// The coherent-region ledger of the device.
    pub fn contiguous(&self) -> &ContiguousLedger<P::Coherent> {
        &self.contiguous
    }

    /// Returns the active translation mode.
    pub fn mode(&self) -> DmaMode {
        self.state.lock().mode
    }

    /// Whether the device has an IOMMU domain at all.
    pub fn has_iommu(&self) -> bool {
        self.domain.is_some()
    }

    /// Returns the number of open handles.
    pub fn open_count(&self) -> usize {
        self.state.lock().open_handles
    }

    /// Opens a user handle on the device.
    ///
    /// Dropping the last open handle forcibly releases every outstanding
    /// ledger entry of the device.
    pub fn open(self: &Arc<Self>) -> DmaHandle<P> {
        self.state.lock().open_handles += 1;
        DmaHandle {
            device: self.clone(),
        }
    }

    /// Switches the translation strategy, returning the mode in effect.
    ///
    /// Rejected with [`Error::Busy`] while any handle is open. Switching to
    /// [`DmaMode::IommuMapped`] attaches the device to its domain; a missing
    /// domain or a failed attach falls back to bounce buffers. The device
    /// stays usable, the fallback is logged, and the degraded mode is the
    /// return value rather than an error.
    pub fn switch_mode(&self, new_mode: DmaMode) -> Result<DmaMode> {
        let mut state = self.state.lock();
        if state.open_handles > 0 {
            return Err(Error::Busy);
        }
        if state.mode == new_mode {
            return Ok(state.mode);
        }

        match new_mode {
            DmaMode::IommuMapped => match self.domain.as_ref() {
                Some(domain) => match domain.attach() {
                    Ok(()) => {
                        state.attached = true;
                        state.mode = DmaMode::IommuMapped;
                        info!("IOVA mappings enabled");
                    }
                    Err(err) => {
                        warn!("IOMMU attach failed: {err:?}, falling back to bounce buffers");
                        state.mode = DmaMode::Bounce;
                    }
                },
                None => {
                    info!("no IOMMU available, using bounce buffers");
                    state.mode = DmaMode::Bounce;
                }
            },
            DmaMode::Bounce => {
                if state.attached {
                    if let Some(domain) = self.domain.as_ref() {
                        domain.detach();
                    }
                    state.attached = false;
                }
                state.mode = DmaMode::Bounce;
                info!("DMA using bounce buffers enabled");
            }
        }

        Ok(state.mode)
    }

    /// Registers a coherent region created by the memory-mapping
    /// collaborator, making it visible to translate and free requests.
    pub fn insert_coherent(&self, va: Vaddr, region: ContiguousRegion<P::Coherent>) -> Result<()> {
        self.contiguous.insert(va, region)
    }

    fn dispatch(&self, req: &mut DmaRequest) -> Result<()> {
        match self.mode() {
            DmaMode::IommuMapped => match req.op {
                // The IOMMU strategy reuses the map/unmap semantics for
                // translate and free.
                DmaOperation::Map | DmaOperation::Translate => mapped::map(self, req),
                DmaOperation::Unmap | DmaOperation::Free => mapped::unmap(self, req),
            },
            DmaMode::Bounce => match req.op {
                DmaOperation::Map => bounce::map(self, req),
                DmaOperation::Unmap => bounce::unmap(self, req),
                DmaOperation::Translate => bounce::translate(self, req),
                DmaOperation::Free => bounce::free(self, req),
            },
        }
    }

    /// Forcibly releases every ledger entry of the device, regardless of
    /// individual reference counts.
    fn release_all(&self) {
        for (va, region) in self.contiguous.drain() {
            debug!("releasing coherent region at va {va:#x}");
            drop(region);
        }

        for ((daddr, size), entry) in self.bounce.drain() {
            bounce::release_entry(self.platform.as_ref(), daddr, size, entry);
        }

        for (pfn, page) in self.iova.drain() {
            if let Some(domain) = self.domain.as_ref() {
                if let Err(err) = domain.unmap(pfn * PAGE_SIZE) {
                    warn!("IOMMU remove for frame {pfn:#x} failed during teardown: {err:?}");
                }
            }
            debug!("removing page mapping for frame {pfn:#x}");
            drop(page);
        }
    }

    fn release_handle(&self) {
        let is_last = {
            let mut state = self.state.lock();
            if state.open_handles == 1 {
                // Keep the count at 1 until the teardown below finishes, so
                // that unregistration cannot observe a half-torn-down device.
                true
            } else {
                state.open_handles -= 1;
                false
            }
        };
        if is_last {
            self.release_all();
            self.state.lock().open_handles -= 1;
            self.closed.wake_all();
        }
    }
}

/// An open user handle onto a device.
///
/// Requests are submitted through a handle. Dropping the last handle of a
/// device forcibly releases all of its outstanding mappings.
pub struct DmaHandle<P: Platform> {
    device: Arc<DmaDevice<P>>,
}

impl<P: Platform> DmaHandle<P> {
    /// The device this handle is open on.
    pub fn device(&self) -> &Arc<DmaDevice<P>> {
        &self.device
    }

    /// Submits one control-channel request, updating the record in place.
    ///
    /// On success the record carries the response: `iova` populated for MAP
    /// and TRANSLATE, the record zeroed for FREE. On failure the record is
    /// left as the caller sent it, and no partial mapping state survives.
    pub fn submit(&self, req: &mut DmaRequest) -> Result<()> {
        self.device.dispatch(req)
    }
}

impl<P: Platform> Drop for DmaHandle<P> {
    fn drop(&mut self) {
        self.device.release_handle();
    }
}

/// Identifies a registered device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(u32);

/// Owns every registered device aggregate, indexed by handle.
pub struct DeviceRegistry<P: Platform> {
    devices: Mutex<HashMap<u32, Arc<DmaDevice<P>>>>,
    next_id: AtomicU32,
}

impl<P: Platform> DeviceRegistry<P> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(0),
        }
    }

    /// Registers a device and returns its handle and aggregate.
    ///
    /// Registration eagerly attempts IOMMU mode; a device without a domain,
    /// or one whose attach fails, comes up in bounce mode instead.
    pub fn register(
        &self,
        platform: Arc<P>,
        domain: Option<P::Domain>,
        options: DeviceOptions,
    ) -> (DeviceId, Arc<DmaDevice<P>>) {
        let device = Arc::new(DmaDevice::new(platform, domain, options));
        // No handle can be open yet, so the switch cannot be busy.
        let mode = device
            .switch_mode(DmaMode::IommuMapped)
            .unwrap_or(DmaMode::Bounce);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!("registered DMA device {id} in {mode:?} mode");
        self.devices.lock().insert(id, device.clone());
        (DeviceId(id), device)
    }

    /// Looks up a registered device.
    pub fn get(&self, id: DeviceId) -> Option<Arc<DmaDevice<P>>> {
        self.devices.lock().get(&id.0).cloned()
    }

    /// Returns the number of registered devices.
    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }

    /// Whether no device is registered.
    pub fn is_empty(&self) -> bool {
        self.devices.lock().is_empty()
    }

    /// Unregisters a device, blocking until its last handle closes.
    ///
    /// The wait sleeps on the device's wait queue; it holds no ledger lock
    /// and does not poll. Afterwards the device is detached from its IOMMU
    /// domain; the domain handle is freed together with the aggregate when
    /// the last reference drops.
    pub fn unregister(&self, id: DeviceId) -> Result<()> {
        let device = self.devices.lock().remove(&id.0).ok_or(Error::NotFound)?;

        device.closed.wait_until(|| {
            let state = device.state.lock();
            (state.open_handles == 0).then_some(())
        });

        {
            let mut state = device.state.lock();
            if state.attached {
                if let Some(domain) = device.domain.as_ref() {
                    domain.detach();
                }
                state.attached = false;
            }
        }
        info!("unregistered DMA device {}", id.0);
        Ok(())
    }
}

impl<P: Platform> Default for DeviceRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

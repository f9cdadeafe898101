// SPDX-License-Identifier: MPL-2.0

//! DMA address mapping for user-space device drivers.
//!
//! A driver running in user space owns its buffers but cannot hand their
//! virtual addresses to a device. This crate turns `(virtual address, size)`
//! buffers into device-addressable addresses (IOVAs) and releases them again,
//! hiding whether the platform has a hardware IOMMU:
//!
//! - With an IOMMU, caller pages are pinned and mapped page by page into the
//!   device's IOMMU domain, identity-mapped relative to the caller virtual
//!   address. Overlapping requests onto the same physical page share one
//!   page-table entry through a reference-counted [`IovaPageTable`].
//! - Without an IOMMU (or when attaching the domain fails), transfers are
//!   staged through kernel-owned scratch buffers tracked by a
//!   [`BounceLedger`]. The caller sees the same request protocol, only the
//!   returned address differs from its own.
//!
//! Requests arrive as fixed-format [`DmaRequest`] records (map / unmap /
//! translate / free) over a per-device control channel and are dispatched by
//! the active [`DmaMode`] of the [`DmaDevice`] aggregate. Platform services
//! (page pinning, IOMMU page-table edits, streaming DMA addresses) are
//! supplied by the embedding program through the [`platform`] traits.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod device;
pub mod dma;
pub mod platform;
pub mod request;
pub mod sync;

mod error;

pub use self::{
    device::{DeviceId, DeviceOptions, DeviceRegistry, DmaDevice, DmaHandle, DmaMode},
    dma::{
        BounceLedger, ContiguousLedger, ContiguousRegion, Daddr, IovaPageTable, MapOutcome,
        MappingFlags, Paddr, Pfn, PinnedRange, UnmapOutcome, Vaddr, MAX_MAP_PAGES, PAGE_SIZE,
    },
    error::{Error, Result},
    request::{DmaDirection, DmaOperation, DmaRequest, RawDmaOp},
};

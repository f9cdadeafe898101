// SPDX-License-Identifier: MPL-2.0

//! Pinning of caller buffers.

use log::debug;
use smallvec::SmallVec;

use super::{Vaddr, PAGE_SIZE};
use crate::{
    error::{Error, Result},
    platform::Platform,
};

/// The default ceiling on pages pinned by a single mapping request.
///
/// Requests are batched one buffer at a time, so the ceiling stays small; it
/// can be raised per device through [`DeviceOptions::max_map_pages`], but it
/// is always finite and explicit.
///
/// [`DeviceOptions::max_map_pages`]: crate::device::DeviceOptions::max_map_pages
pub const MAX_MAP_PAGES: usize = 3;

/// A caller buffer turned into a list of pinned physical pages.
///
/// Dropping the range (or any page taken out of it) releases the pins.
#[derive(Debug)]
pub struct PinnedRange<T> {
    pages: SmallVec<[T; MAX_MAP_PAGES]>,
    offset: usize,
}

impl<T> PinnedRange<T> {
    /// The offset of the buffer start within its first page.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The number of pinned pages.
    pub fn nr_pages(&self) -> usize {
        self.pages.len()
    }

    /// Takes ownership of the pinned pages, in ascending address order.
    pub fn into_pages(self) -> SmallVec<[T; MAX_MAP_PAGES]> {
        self.pages
    }
}

/// Pins the physical pages backing the caller buffer `[va, va + size)`.
///
/// Rejects zero-sized and overflowing buffers with [`Error::InvalidSize`]
/// and buffers spanning more than `max_pages` pages with
/// [`Error::TooManyPages`]. A partial pin (the platform returning fewer
/// pages than the buffer spans, or more than it was asked for) releases
/// everything that was pinned and fails with [`Error::PinFailed`]; no
/// partial state is retained.
pub(crate) fn pin_user_range<P: Platform>(
    platform: &P,
    va: Vaddr,
    size: usize,
    max_pages: usize,
) -> Result<PinnedRange<P::Page>> {
    if size == 0 {
        return Err(Error::InvalidSize);
    }
    if va.checked_add(size).is_none() {
        return Err(Error::InvalidSize);
    }

    let offset = va % PAGE_SIZE;
    let nr_pages = offset
        .checked_add(size)
        .ok_or(Error::InvalidSize)?
        .div_ceil(PAGE_SIZE);
    if nr_pages > max_pages {
        return Err(Error::TooManyPages);
    }

    let pages = platform
        .pin_user_pages(va, nr_pages)
        .map_err(|err| {
            debug!("pinning {nr_pages} pages at va {va:#x} failed: {err:?}");
            Error::PinFailed
        })?;
    if pages.len() != nr_pages {
        // Dropping `pages` releases every pin the platform did take.
        debug!(
            "pinned {} of {nr_pages} pages at va {va:#x}",
            pages.len()
        );
        return Err(Error::PinFailed);
    }

    Ok(PinnedRange {
        pages: SmallVec::from_vec(pages),
        offset,
    })
}

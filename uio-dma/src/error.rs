// SPDX-License-Identifier: MPL-2.0

/// The error type which is returned from the APIs of this crate.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Error {
    /// A request named a zero-sized buffer, or its address range overflows.
    InvalidSize,
    /// A buffer spans more pages than the per-request ceiling allows.
    TooManyPages,
    /// The platform pinned fewer or more pages than requested, or none at all.
    PinFailed,
    /// The IOMMU rejected a page-table insert.
    IommuInsertFailed,
    /// No ledger entry matches the request.
    NotFound,
    /// A bounce entry exists at the requested address, but with another size.
    SizeMismatch,
    /// The operation requires that no handle is open on the device.
    Busy,
    /// Attaching the device to its IOMMU domain failed.
    DomainAttachFailed,
    /// A malformed control record, or a platform contract violation.
    InvalidArgs,
    /// The platform could not allocate memory.
    NoMemory,
}

/// The result type returned from the APIs of this crate.
pub type Result<T> = core::result::Result<T, Error>;

impl From<int_to_c_enum::TryFromIntError> for Error {
    fn from(_: int_to_c_enum::TryFromIntError) -> Self {
        Error::InvalidArgs
    }
}

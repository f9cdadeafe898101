// SPDX-License-Identifier: MPL-2.0

//! The control-channel request protocol.
//!
//! Every request and response travels as one fixed-format record. The
//! transport copies request records into core-owned memory before dispatch
//! and copies the record back to the caller only on success; the core never
//! touches caller memory except through the sanctioned [`platform`] paths.
//!
//! [`platform`]: crate::platform

use int_to_c_enum::TryFromInt;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    dma::{Daddr, Vaddr},
    error::{Error, Result},
};

/// A control-channel operation code.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromInt)]
pub enum DmaOperation {
    /// Map a caller buffer and hand back its device address.
    Map = 1,
    /// Release a mapping by device address.
    Unmap = 2,
    /// Look up the device address of a coherent region.
    Translate = 3,
    /// Free a coherent region.
    Free = 4,
}

/// The direction of a DMA transfer.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromInt)]
pub enum DmaDirection {
    /// Data flows from the device to memory.
    FromDevice = 1,
    /// Data flows from memory to the device.
    ToDevice = 2,
    /// Data flows both ways.
    Bidirectional = 3,
    /// No data transfer.
    None = 4,
}

impl DmaDirection {
    /// Whether mapping must stage caller data into the scratch buffer.
    pub(crate) fn copies_to_device(self) -> bool {
        matches!(self, DmaDirection::ToDevice | DmaDirection::Bidirectional)
    }

    /// Whether unmapping must copy scratch contents back to the caller.
    pub(crate) fn copies_from_device(self) -> bool {
        matches!(self, DmaDirection::FromDevice | DmaDirection::Bidirectional)
    }
}

/// A decoded control-channel record.
///
/// The same record type serves as request and response: a successful MAP or
/// TRANSLATE populates `iova`, a successful FREE zeroes `va`, `iova` and
/// `size` before the record is copied back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaRequest {
    /// The requested operation.
    pub op: DmaOperation,
    /// The caller virtual address (meaningful for MAP, TRANSLATE and FREE).
    pub va: Vaddr,
    /// The device address (input of UNMAP, output of MAP and TRANSLATE).
    pub iova: Daddr,
    /// The buffer size in bytes.
    pub size: usize,
    /// The transfer direction.
    pub direction: DmaDirection,
}

/// The fixed-format wire encoding of a control record.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct RawDmaOp {
    /// Caller virtual address.
    pub va: u64,
    /// Device address.
    pub iova: u64,
    /// Size in bytes.
    pub size: u64,
    /// Operation code.
    pub op: u32,
    /// Direction code.
    pub direction: u32,
}

impl DmaRequest {
    /// Decodes a wire record, rejecting unknown operation or direction codes.
    pub fn decode(raw: &RawDmaOp) -> Result<Self> {
        let op = DmaOperation::try_from(raw.op)?;
        let direction = DmaDirection::try_from(raw.direction)?;
        Ok(Self {
            op,
            va: raw.va as Vaddr,
            iova: raw.iova as Daddr,
            size: raw.size as usize,
            direction,
        })
    }

    /// Decodes a wire record from its raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw = RawDmaOp::read_from_bytes(bytes).map_err(|_| Error::InvalidArgs)?;
        Self::decode(&raw)
    }

    /// Encodes the record for the response path.
    pub fn encode(&self) -> RawDmaOp {
        RawDmaOp {
            va: self.va as u64,
            iova: self.iova as u64,
            size: self.size as u64,
            op: self.op as u32,
            direction: self.direction as u32,
        }
    }
}

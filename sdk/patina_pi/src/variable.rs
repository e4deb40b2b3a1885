//! Non-volatile variable store format.
//!
//! The store is a header followed by a packed sequence of variable records. Each record is a variable header, the
//! UTF-16LE variable name (NUL terminated), the variable data, and padding. Records are never rewritten in place:
//! an update appends a new record and retires the old one by clearing bits in its `state` byte, so the state of a
//! record only ever moves forward through [`VariableState`].
//!
//! The header layout used here carries the 64-bit monotonic counter that the store checks on every write to reject
//! replayed or stale updates.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use bitflags::bitflags;
use r_efi::efi;
use scroll::{
    ctx::{TryFromCtx, TryIntoCtx},
    Endian, Pread, Pwrite, LE,
};

use crate::{
    guid::{read_guid, write_guid},
    hob::HobList,
};

/// Signature of a store whose records carry a monotonic counter.
pub const MONOTONIC_BASED_VARIABLE_GUID: efi::Guid =
    efi::Guid::from_fields(0x515fa686, 0xb06e, 0x4550, 0x91, 0x12, &[0x38, 0x2b, 0xf1, 0x06, 0x7b, 0xfb]);

/// File system GUID of the firmware volume that holds the variable store.
pub const SYSTEM_NV_DATA_FV_GUID: efi::Guid =
    efi::Guid::from_fields(0xfff12b8d, 0x7696, 0x4c8b, 0xa9, 0x85, &[0x27, 0x47, 0x07, 0x5b, 0x4f, 0x50]);

/// Name of the GUID HOB that carries [`VariableFlashInfo`].
pub const VARIABLE_FLASH_INFO_HOB_GUID: efi::Guid =
    efi::Guid::from_fields(0x5d11c653, 0x8154, 0x4ac3, 0xa8, 0xc2, &[0xfb, 0xa2, 0x89, 0x3f, 0xc4, 0x5f]);

pub const VARIABLE_DATA: u16 = 0x55AA;

pub const VARIABLE_STORE_FORMATTED: u8 = 0x5A;
pub const VARIABLE_STORE_HEALTHY: u8 = 0xFE;

// Variable states. Each transition clears bits of the current state.
pub const VAR_IN_DELETED_TRANSITION: u8 = 0xFE;
pub const VAR_DELETED: u8 = 0xFD;
pub const VAR_HEADER_VALID_ONLY: u8 = 0x7F;
pub const VAR_ADDED: u8 = 0x3F;

/// Variable headers start on this boundary relative to the start of the store.
pub const HEADER_ALIGNMENT: usize = 4;

bitflags! {
    /// EFI variable attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VariableAttributes: u32 {
        const NON_VOLATILE = 0x00000001;
        const BOOTSERVICE_ACCESS = 0x00000002;
        const RUNTIME_ACCESS = 0x00000004;
        const HARDWARE_ERROR_RECORD = 0x00000008;
        const AUTHENTICATED_WRITE_ACCESS = 0x00000010;
        const TIME_BASED_AUTHENTICATED_WRITE_ACCESS = 0x00000020;
        const APPEND_WRITE = 0x00000040;
    }
}

/// Decoded lifecycle state of a variable record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableState {
    /// Header written, name and data not yet committed.
    HeaderValidOnly,
    /// Fully committed. The only state visible to readers.
    Added,
    /// Superseded by a newer copy that has not been committed yet.
    InDeletedTransition,
    /// Logically gone. Space is recovered only by a reclaim.
    Deleted,
    /// Bit pattern that does not belong to the state machine.
    Unknown(u8),
}

impl VariableState {
    /// The state byte that results from applying `mask` to `current`.
    pub const fn transition(current: u8, mask: u8) -> u8 {
        current & mask
    }
}

impl From<u8> for VariableState {
    fn from(state: u8) -> Self {
        // VAR_DELETED clears a bit that no other transition touches.
        if state & !VAR_DELETED == 0 {
            return VariableState::Deleted;
        }
        match state {
            VAR_HEADER_VALID_ONLY => VariableState::HeaderValidOnly,
            VAR_ADDED => VariableState::Added,
            s if s == VAR_ADDED & VAR_IN_DELETED_TRANSITION => VariableState::InDeletedTransition,
            other => VariableState::Unknown(other),
        }
    }
}

/// Alignment of the name and data fields inside a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VariableAlignment {
    /// IA-32 and x64.
    #[default]
    X86 = 1,
    /// Itanium.
    Itanium = 8,
}

impl VariableAlignment {
    /// Padding needed after a field of `size` bytes.
    pub const fn pad_size(self, size: usize) -> usize {
        (!size).wrapping_add(1) & (self as usize - 1)
    }
}

/// Rounds `offset` up to the next variable header boundary.
pub const fn header_align(offset: usize) -> usize {
    (offset + (HEADER_ALIGNMENT - 1)) & !(HEADER_ALIGNMENT - 1)
}

/// VARIABLE_STORE_HEADER
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableStoreHeader {
    pub signature: efi::Guid,
    /// Size of the whole store, header included.
    pub size: u32,
    pub format: u8,
    pub state: u8,
    pub reserved: u16,
    pub reserved1: u32,
}

impl VariableStoreHeader {
    pub const SIZE: usize = 28;

    pub fn new(size: u32) -> Self {
        Self {
            signature: MONOTONIC_BASED_VARIABLE_GUID,
            size,
            format: VARIABLE_STORE_FORMATTED,
            state: VARIABLE_STORE_HEALTHY,
            reserved: 0,
            reserved1: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.signature == MONOTONIC_BASED_VARIABLE_GUID
            && self.format == VARIABLE_STORE_FORMATTED
            && self.state == VARIABLE_STORE_HEALTHY
    }
}

impl<'a> TryFromCtx<'a, Endian> for VariableStoreHeader {
    type Error = scroll::Error;

    fn try_from_ctx(src: &'a [u8], ctx: Endian) -> Result<(Self, usize), Self::Error> {
        let mut offset = 0;
        let signature = read_guid(src, &mut offset)?;
        let size = src.gread_with(&mut offset, ctx)?;
        let format = src.gread_with(&mut offset, ctx)?;
        let state = src.gread_with(&mut offset, ctx)?;
        let reserved = src.gread_with(&mut offset, ctx)?;
        let reserved1 = src.gread_with(&mut offset, ctx)?;
        Ok((Self { signature, size, format, state, reserved, reserved1 }, offset))
    }
}

impl TryIntoCtx<Endian> for VariableStoreHeader {
    type Error = scroll::Error;

    fn try_into_ctx(self, dest: &mut [u8], ctx: Endian) -> Result<usize, Self::Error> {
        let mut offset = 0;
        write_guid(dest, &mut offset, &self.signature)?;
        dest.gwrite_with(self.size, &mut offset, ctx)?;
        dest.gwrite_with(self.format, &mut offset, ctx)?;
        dest.gwrite_with(self.state, &mut offset, ctx)?;
        dest.gwrite_with(self.reserved, &mut offset, ctx)?;
        dest.gwrite_with(self.reserved1, &mut offset, ctx)?;
        Ok(offset)
    }
}

/// MONOTONIC_COUNTER based VARIABLE_HEADER
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableHeader {
    pub start_id: u16,
    pub state: u8,
    pub reserved: u8,
    pub attributes: u32,
    pub monotonic_count: u64,
    pub pubkey_index: u32,
    pub name_size: u32,
    pub data_size: u32,
    pub vendor_guid: efi::Guid,
}

impl VariableHeader {
    pub const SIZE: usize = 44;

    /// Byte offset of the `state` field inside the header.
    pub const STATE_OFFSET: usize = 2;

    pub fn is_valid(&self) -> bool {
        self.start_id == VARIABLE_DATA
    }

    pub fn state(&self) -> VariableState {
        VariableState::from(self.state)
    }

    pub fn attributes(&self) -> VariableAttributes {
        VariableAttributes::from_bits_retain(self.attributes)
    }

    /// Offset of the name, given the offset of this header.
    pub fn name_offset(&self, header_offset: usize) -> usize {
        header_offset + Self::SIZE
    }

    /// Offset of the data, given the offset of this header.
    pub fn data_offset(&self, header_offset: usize, alignment: VariableAlignment) -> usize {
        let name_size = self.name_size as usize;
        self.name_offset(header_offset) + name_size + alignment.pad_size(name_size)
    }

    /// Offset of the next header, given the offset of this header.
    pub fn next_offset(&self, header_offset: usize, alignment: VariableAlignment) -> usize {
        let data_size = self.data_size as usize;
        header_align(self.data_offset(header_offset, alignment) + data_size + alignment.pad_size(data_size))
    }

    /// Encoded size of a record with the given name and data sizes, trailing header alignment included.
    pub fn record_size(name_size: usize, data_size: usize, alignment: VariableAlignment) -> usize {
        header_align(
            Self::SIZE + name_size + alignment.pad_size(name_size) + data_size + alignment.pad_size(data_size),
        )
    }
}

impl<'a> TryFromCtx<'a, Endian> for VariableHeader {
    type Error = scroll::Error;

    fn try_from_ctx(src: &'a [u8], ctx: Endian) -> Result<(Self, usize), Self::Error> {
        let mut offset = 0;
        let start_id = src.gread_with(&mut offset, ctx)?;
        let state = src.gread_with(&mut offset, ctx)?;
        let reserved = src.gread_with(&mut offset, ctx)?;
        let attributes = src.gread_with(&mut offset, ctx)?;
        let monotonic_count = src.gread_with(&mut offset, ctx)?;
        let pubkey_index = src.gread_with(&mut offset, ctx)?;
        let name_size = src.gread_with(&mut offset, ctx)?;
        let data_size = src.gread_with(&mut offset, ctx)?;
        let vendor_guid = read_guid(src, &mut offset)?;
        Ok((
            Self {
                start_id,
                state,
                reserved,
                attributes,
                monotonic_count,
                pubkey_index,
                name_size,
                data_size,
                vendor_guid,
            },
            offset,
        ))
    }
}

impl TryIntoCtx<Endian> for VariableHeader {
    type Error = scroll::Error;

    fn try_into_ctx(self, dest: &mut [u8], ctx: Endian) -> Result<usize, Self::Error> {
        let mut offset = 0;
        dest.gwrite_with(self.start_id, &mut offset, ctx)?;
        dest.gwrite_with(self.state, &mut offset, ctx)?;
        dest.gwrite_with(self.reserved, &mut offset, ctx)?;
        dest.gwrite_with(self.attributes, &mut offset, ctx)?;
        dest.gwrite_with(self.monotonic_count, &mut offset, ctx)?;
        dest.gwrite_with(self.pubkey_index, &mut offset, ctx)?;
        dest.gwrite_with(self.name_size, &mut offset, ctx)?;
        dest.gwrite_with(self.data_size, &mut offset, ctx)?;
        write_guid(dest, &mut offset, &self.vendor_guid)?;
        Ok(offset)
    }
}

/// Size in bytes of `name` encoded as NUL terminated UTF-16LE.
pub fn name_size(name: &str) -> usize {
    (name.encode_utf16().count() + 1) * 2
}

/// Writes `name` as NUL terminated UTF-16LE at `offset`, advancing the offset.
pub fn write_name(dest: &mut [u8], offset: &mut usize, name: &str) -> Result<usize, scroll::Error> {
    let start = *offset;
    for unit in name.encode_utf16().chain(core::iter::once(0)) {
        dest.gwrite_with(unit, offset, LE)?;
    }
    Ok(*offset - start)
}

/// Whether the raw UTF-16LE `encoded` name (NUL terminator included) spells `name`.
pub fn name_matches(encoded: &[u8], name: &str) -> bool {
    if encoded.len() != name_size(name) {
        return false;
    }
    encoded
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .eq(name.encode_utf16().chain(core::iter::once(0)))
}

/// Location of the variable store and its fault tolerant write regions, published by PEI in a GUID HOB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VariableFlashInfo {
    pub version: u32,
    pub reserved: u32,
    pub nv_variable_base_address: u64,
    pub nv_variable_length: u64,
    pub ftw_spare_base_address: u64,
    pub ftw_spare_length: u64,
    pub ftw_working_base_address: u64,
    pub ftw_working_length: u64,
}

impl VariableFlashInfo {
    pub const SIZE: usize = 56;
    pub const VERSION: u32 = 1;

    /// Finds the first flash info HOB in `hob_list`.
    ///
    /// Returns `None` when no HOB is present or when its payload cannot be decoded.
    pub fn from_hob_list(hob_list: &HobList<'_>) -> Option<Self> {
        let data = hob_list.guid_hobs(&VARIABLE_FLASH_INFO_HOB_GUID).next()?;
        match data.pread_with::<VariableFlashInfo>(0, LE) {
            Ok(info) if info.version == Self::VERSION => Some(info),
            Ok(info) => {
                log::warn!(target: "variable", "Unsupported variable flash info version {}", info.version);
                None
            }
            Err(err) => {
                log::warn!(target: "variable", "Malformed variable flash info HOB: {err:?}");
                None
            }
        }
    }
}

impl<'a> TryFromCtx<'a, Endian> for VariableFlashInfo {
    type Error = scroll::Error;

    fn try_from_ctx(src: &'a [u8], ctx: Endian) -> Result<(Self, usize), Self::Error> {
        let mut offset = 0;
        let info = Self {
            version: src.gread_with(&mut offset, ctx)?,
            reserved: src.gread_with(&mut offset, ctx)?,
            nv_variable_base_address: src.gread_with(&mut offset, ctx)?,
            nv_variable_length: src.gread_with(&mut offset, ctx)?,
            ftw_spare_base_address: src.gread_with(&mut offset, ctx)?,
            ftw_spare_length: src.gread_with(&mut offset, ctx)?,
            ftw_working_base_address: src.gread_with(&mut offset, ctx)?,
            ftw_working_length: src.gread_with(&mut offset, ctx)?,
        };
        Ok((info, offset))
    }
}

impl TryIntoCtx<Endian> for VariableFlashInfo {
    type Error = scroll::Error;

    fn try_into_ctx(self, dest: &mut [u8], ctx: Endian) -> Result<usize, Self::Error> {
        let mut offset = 0;
        dest.gwrite_with(self.version, &mut offset, ctx)?;
        dest.gwrite_with(self.reserved, &mut offset, ctx)?;
        dest.gwrite_with(self.nv_variable_base_address, &mut offset, ctx)?;
        dest.gwrite_with(self.nv_variable_length, &mut offset, ctx)?;
        dest.gwrite_with(self.ftw_spare_base_address, &mut offset, ctx)?;
        dest.gwrite_with(self.ftw_spare_length, &mut offset, ctx)?;
        dest.gwrite_with(self.ftw_working_base_address, &mut offset, ctx)?;
        dest.gwrite_with(self.ftw_working_length, &mut offset, ctx)?;
        Ok(offset)
    }
}

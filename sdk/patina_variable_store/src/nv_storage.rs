//! Variable store wrapped in the firmware volume that holds non-volatile storage.
//!
//! The flash region starts with a firmware volume header (file system GUID [`SYSTEM_NV_DATA_FV_GUID`], one block
//! map entry plus terminator) and the variable store follows it directly. The store size covers the rest of the
//! volume.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use patina_pi::{
    guid::{read_guid, write_guid},
    variable::{VariableAlignment, SYSTEM_NV_DATA_FV_GUID},
};
use r_efi::efi;
use scroll::{
    ctx::{TryFromCtx, TryIntoCtx},
    Endian, Pread, Pwrite, LE,
};

use crate::{
    error::VariableStoreError,
    store::{VariableStore, FIRST_VARIABLE_OFFSET},
};

/// ASCII `_FVH`.
pub const FV_SIGNATURE: u32 = u32::from_le_bytes(*b"_FVH");

/// Firmware volume header revision.
pub const FV_REVISION: u8 = 2;

/// Read, write and lock capabilities with erase polarity 1.
pub const NV_STORAGE_ATTRIBUTES: u32 = 0x0004_FEFF;

/// EFI_FV_BLOCK_MAP_ENTRY
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMapEntry {
    pub num_blocks: u32,
    pub length: u32,
}

/// EFI_FIRMWARE_VOLUME_HEADER with a single block map entry and its terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVolumeHeader {
    pub zero_vector: [u8; 16],
    pub file_system_guid: efi::Guid,
    pub fv_length: u64,
    pub signature: u32,
    pub attributes: u32,
    pub header_length: u16,
    pub checksum: u16,
    pub ext_header_offset: u16,
    pub reserved: u8,
    pub revision: u8,
    pub block_map: BlockMapEntry,
}

impl FirmwareVolumeHeader {
    pub const SIZE: usize = 0x48;

    /// Byte offset of the `checksum` field.
    const CHECKSUM_OFFSET: usize = 0x32;

    /// Header for a non-volatile storage volume of `fv_length` bytes made of `block_size` byte blocks.
    pub fn new(fv_length: u64, block_size: u32) -> Self {
        Self {
            zero_vector: [0; 16],
            file_system_guid: SYSTEM_NV_DATA_FV_GUID,
            fv_length,
            signature: FV_SIGNATURE,
            attributes: NV_STORAGE_ATTRIBUTES,
            header_length: Self::SIZE as u16,
            checksum: 0,
            ext_header_offset: 0,
            reserved: 0,
            revision: FV_REVISION,
            block_map: BlockMapEntry { num_blocks: (fv_length / block_size as u64) as u32, length: block_size },
        }
    }

    /// Reads and validates the header at the start of `buffer`.
    pub fn parse(buffer: &[u8]) -> Result<Self, VariableStoreError> {
        let header: Self = buffer.pread_with(0, LE).map_err(|_| VariableStoreError::BufferTooSmall)?;

        if header.signature != FV_SIGNATURE {
            log::warn!(target: "variable_store", "NV storage has no firmware volume signature");
            Err(VariableStoreError::InvalidHeader)?;
        }
        if header.revision < FV_REVISION {
            Err(VariableStoreError::InvalidHeader)?;
        }
        if header.file_system_guid != SYSTEM_NV_DATA_FV_GUID {
            log::warn!(target: "variable_store", "Firmware volume is not an NV data volume");
            Err(VariableStoreError::InvalidHeader)?;
        }

        let header_length = header.header_length as usize;
        if header_length < Self::SIZE || header_length > buffer.len() || header_length & 0x01 != 0 {
            Err(VariableStoreError::InvalidHeader)?;
        }
        if checksum16(&buffer[..header_length]) != 0 {
            log::warn!(target: "variable_store", "NV storage firmware volume header checksum failed");
            Err(VariableStoreError::InvalidHeader)?;
        }

        if header.fv_length > buffer.len() as u64 || header.fv_length < (header_length + FIRST_VARIABLE_OFFSET) as u64 {
            log::error!(
                target: "variable_store",
                "Firmware volume length {:#x} does not fit {:#x} bytes",
                header.fv_length,
                buffer.len()
            );
            Err(VariableStoreError::VolumeCorrupted)?;
        }
        Ok(header)
    }
}

impl<'a> TryFromCtx<'a, Endian> for FirmwareVolumeHeader {
    type Error = scroll::Error;

    fn try_from_ctx(src: &'a [u8], ctx: Endian) -> Result<(Self, usize), Self::Error> {
        let mut offset = 0;
        let mut zero_vector = [0u8; 16];
        src.gread_inout_with(&mut offset, &mut zero_vector, ctx)?;
        let file_system_guid = read_guid(src, &mut offset)?;
        let fv_length = src.gread_with(&mut offset, ctx)?;
        let signature = src.gread_with(&mut offset, ctx)?;
        let attributes = src.gread_with(&mut offset, ctx)?;
        let header_length = src.gread_with(&mut offset, ctx)?;
        let checksum = src.gread_with(&mut offset, ctx)?;
        let ext_header_offset = src.gread_with(&mut offset, ctx)?;
        let reserved = src.gread_with(&mut offset, ctx)?;
        let revision = src.gread_with(&mut offset, ctx)?;
        let num_blocks = src.gread_with(&mut offset, ctx)?;
        let length = src.gread_with(&mut offset, ctx)?;
        let _terminator: u64 = src.gread_with(&mut offset, ctx)?;
        Ok((
            Self {
                zero_vector,
                file_system_guid,
                fv_length,
                signature,
                attributes,
                header_length,
                checksum,
                ext_header_offset,
                reserved,
                revision,
                block_map: BlockMapEntry { num_blocks, length },
            },
            offset,
        ))
    }
}

impl TryIntoCtx<Endian> for FirmwareVolumeHeader {
    type Error = scroll::Error;

    fn try_into_ctx(self, dest: &mut [u8], ctx: Endian) -> Result<usize, Self::Error> {
        let mut offset = 0;
        for byte in self.zero_vector {
            dest.gwrite_with(byte, &mut offset, ctx)?;
        }
        write_guid(dest, &mut offset, &self.file_system_guid)?;
        dest.gwrite_with(self.fv_length, &mut offset, ctx)?;
        dest.gwrite_with(self.signature, &mut offset, ctx)?;
        dest.gwrite_with(self.attributes, &mut offset, ctx)?;
        dest.gwrite_with(self.header_length, &mut offset, ctx)?;
        dest.gwrite_with(self.checksum, &mut offset, ctx)?;
        dest.gwrite_with(self.ext_header_offset, &mut offset, ctx)?;
        dest.gwrite_with(self.reserved, &mut offset, ctx)?;
        dest.gwrite_with(self.revision, &mut offset, ctx)?;
        dest.gwrite_with(self.block_map.num_blocks, &mut offset, ctx)?;
        dest.gwrite_with(self.block_map.length, &mut offset, ctx)?;
        dest.gwrite_with(0u64, &mut offset, ctx)?;
        Ok(offset)
    }
}

fn checksum16(bytes: &[u8]) -> u16 {
    bytes.chunks_exact(2).fold(0u16, |sum, pair| sum.wrapping_add(u16::from_le_bytes([pair[0], pair[1]])))
}

/// Formats `buffer` as an NV storage volume of `block_size` byte blocks and returns the empty store inside it.
pub fn format_nv_storage(
    buffer: &mut [u8],
    block_size: u32,
    alignment: VariableAlignment,
) -> Result<VariableStore<'_>, VariableStoreError> {
    if buffer.len() < FirmwareVolumeHeader::SIZE + FIRST_VARIABLE_OFFSET {
        return Err(VariableStoreError::BufferTooSmall);
    }
    if block_size == 0 || buffer.len() % block_size as usize != 0 {
        log::error!(
            target: "variable_store",
            "NV storage of {:#x} bytes is not a whole number of {:#x} byte blocks",
            buffer.len(),
            block_size
        );
        return Err(VariableStoreError::InvalidParameter);
    }

    let (volume, store) = buffer.split_at_mut(FirmwareVolumeHeader::SIZE);
    volume.pwrite_with(FirmwareVolumeHeader::new((volume.len() + store.len()) as u64, block_size), 0, LE)?;
    let checksum = 0u16.wrapping_sub(checksum16(volume));
    volume.pwrite_with(checksum, FirmwareVolumeHeader::CHECKSUM_OFFSET, LE)?;

    VariableStore::format(store, alignment)
}

/// Validates the NV storage volume header in `buffer` and opens the store inside it.
pub fn open_nv_storage(
    buffer: &mut [u8],
    alignment: VariableAlignment,
) -> Result<VariableStore<'_>, VariableStoreError> {
    let header = FirmwareVolumeHeader::parse(buffer)?;
    let store = &mut buffer[header.header_length as usize..header.fv_length as usize];
    VariableStore::open(store, alignment)
}

//! Hand-Off Block (HOB) definitions and HOB list traversal.
//!
//! A HOB list is an append-only sequence of variable-length, typed records that starts with the Phase Handoff
//! Information Table (PHIT) and ends with an end-of-list record. Records are chained by adjacency: the next record
//! starts `length` bytes after the current one. There are no backward links.
//!
//! Records are decoded from and encoded to byte slices field by field. [`HobList::new`] validates every record
//! length against the backing buffer before anything is exposed, so traversal never trusts a length field that runs
//! past the end of the list.
//!
//! Based on the definitions in the PI Specification, Volume 3 (Shared Architectural Elements).
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use core::fmt;

use indoc::indoc;
use r_efi::efi;
use scroll::{
    ctx::{TryFromCtx, TryIntoCtx},
    Endian, Pread, Pwrite, LE,
};

use crate::{
    boot_mode::BootMode,
    guid::{read_guid, write_guid, GuidFmt},
};

// HOB type field is a UINT16
pub const HANDOFF: u16 = 0x0001;
pub const MEMORY_ALLOCATION: u16 = 0x0002;
pub const RESOURCE_DESCRIPTOR: u16 = 0x0003;
pub const GUID_EXTENSION: u16 = 0x0004;
pub const FV: u16 = 0x0005;
pub const CPU: u16 = 0x0006;
pub const MEMORY_POOL: u16 = 0x0007;
pub const FV2: u16 = 0x0009;
pub const LOAD_PEIM_UNUSED: u16 = 0x000A;
pub const UEFI_CAPSULE: u16 = 0x000B;
pub const FV3: u16 = 0x000C;
pub const UNUSED: u16 = 0xFFFE;
pub const END_OF_HOB_LIST: u16 = 0xFFFF;

/// EFI_HOB_HANDOFF_TABLE_VERSION
pub const HANDOFF_TABLE_VERSION: u32 = 0x0009;

/// Every HOB starts on an 8-byte boundary relative to the start of the list.
pub const HOB_ALIGNMENT: usize = 8;

// EFI_RESOURCE_TYPE
pub const EFI_RESOURCE_SYSTEM_MEMORY: u32 = 0x00000000;
pub const EFI_RESOURCE_MEMORY_MAPPED_IO: u32 = 0x00000001;
pub const EFI_RESOURCE_IO: u32 = 0x00000002;
pub const EFI_RESOURCE_FIRMWARE_DEVICE: u32 = 0x00000003;
pub const EFI_RESOURCE_MEMORY_MAPPED_IO_PORT: u32 = 0x00000004;
pub const EFI_RESOURCE_MEMORY_RESERVED: u32 = 0x00000005;
pub const EFI_RESOURCE_IO_RESERVED: u32 = 0x00000006;

// EFI_RESOURCE_ATTRIBUTE_TYPE
pub const EFI_RESOURCE_ATTRIBUTE_PRESENT: u32 = 0x00000001;
pub const EFI_RESOURCE_ATTRIBUTE_INITIALIZED: u32 = 0x00000002;
pub const EFI_RESOURCE_ATTRIBUTE_TESTED: u32 = 0x00000004;
pub const EFI_RESOURCE_ATTRIBUTE_UNCACHEABLE: u32 = 0x00000400;
pub const EFI_RESOURCE_ATTRIBUTE_WRITE_COMBINEABLE: u32 = 0x00000800;
pub const EFI_RESOURCE_ATTRIBUTE_WRITE_THROUGH_CACHEABLE: u32 = 0x00001000;
pub const EFI_RESOURCE_ATTRIBUTE_WRITE_BACK_CACHEABLE: u32 = 0x00002000;

pub const TESTED_MEMORY_ATTRIBUTES: u32 =
    EFI_RESOURCE_ATTRIBUTE_PRESENT | EFI_RESOURCE_ATTRIBUTE_INITIALIZED | EFI_RESOURCE_ATTRIBUTE_TESTED;

/// gEfiHobMemoryAllocStackGuid
pub const HOB_MEMORY_ALLOC_STACK_GUID: efi::Guid =
    efi::Guid::from_fields(0x4ed4bf27, 0x4092, 0x42e9, 0x80, 0x7d, &[0x52, 0x7b, 0x1d, 0x00, 0xc9, 0xbd]);

/// gEfiHobMemoryAllocModuleGuid
pub const HOB_MEMORY_ALLOC_MODULE_GUID: efi::Guid =
    efi::Guid::from_fields(0xf8e21975, 0x0899, 0x4f58, 0xa4, 0xbe, &[0x55, 0x25, 0xa9, 0xc6, 0xd7, 0x7a]);

/// Errors reported while validating a HOB list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HobError {
    /// The list does not start with a Phase Handoff Information Table.
    MissingHandoff,
    /// The PHIT memory ranges are not ordered `bottom <= free bottom <= free top <= top`.
    InvalidHandoff,
    /// The record at `offset` has a length that is not a multiple of 8 or is smaller than a header.
    InvalidLength { offset: usize },
    /// The record at `offset` is shorter than its type requires.
    RecordTooShort { offset: usize, hob_type: u16 },
    /// The record at `offset` runs past the end of the buffer.
    Truncated { offset: usize },
}

impl From<HobError> for efi::Status {
    fn from(value: HobError) -> Self {
        match value {
            HobError::Truncated { .. } => efi::Status::BUFFER_TOO_SMALL,
            HobError::MissingHandoff
            | HobError::InvalidHandoff
            | HobError::InvalidLength { .. }
            | HobError::RecordTooShort { .. } => efi::Status::INVALID_PARAMETER,
        }
    }
}

/// A HOB with a fixed encoded layout.
pub trait HobRecord: Copy + TryIntoCtx<Endian, Error = scroll::Error> {
    /// The HOB type placed in the generic header.
    const TYPE: u16;
    /// The encoded size in bytes, including the generic header.
    const SIZE: usize;
}

pub mod header {
    use super::*;

    /// EFI_HOB_GENERIC_HEADER
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Hob {
        pub r#type: u16,   // UINT16
        pub length: u16,   // UINT16
        pub reserved: u32, // UINT32
    }

    impl Hob {
        pub const SIZE: usize = 8;

        pub const fn new(hob_type: u16, length: u16) -> Self {
            Self { r#type: hob_type, length, reserved: 0 }
        }
    }

    impl<'a> TryFromCtx<'a, Endian> for Hob {
        type Error = scroll::Error;

        fn try_from_ctx(src: &'a [u8], ctx: Endian) -> Result<(Self, usize), Self::Error> {
            let mut offset = 0;
            let r#type = src.gread_with(&mut offset, ctx)?;
            let length = src.gread_with(&mut offset, ctx)?;
            let reserved = src.gread_with(&mut offset, ctx)?;
            Ok((Self { r#type, length, reserved }, offset))
        }
    }

    impl TryIntoCtx<Endian> for Hob {
        type Error = scroll::Error;

        fn try_into_ctx(self, dest: &mut [u8], ctx: Endian) -> Result<usize, Self::Error> {
            let mut offset = 0;
            dest.gwrite_with(self.r#type, &mut offset, ctx)?;
            dest.gwrite_with(self.length, &mut offset, ctx)?;
            dest.gwrite_with(self.reserved, &mut offset, ctx)?;
            Ok(offset)
        }
    }

    /// EFI_HOB_MEMORY_ALLOCATION_HEADER
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MemoryAllocation {
        pub name: efi::Guid,            // EFI_GUID
        pub memory_base_address: u64,   // EFI_PHYSICAL_ADDRESS
        pub memory_length: u64,         // UINT64
        pub memory_type: efi::MemoryType, // EFI_MEMORY_TYPE
        pub reserved: [u8; 4],          // UINT8[4]
    }

    impl MemoryAllocation {
        pub const SIZE: usize = 40;
    }

    impl<'a> TryFromCtx<'a, Endian> for MemoryAllocation {
        type Error = scroll::Error;

        fn try_from_ctx(src: &'a [u8], ctx: Endian) -> Result<(Self, usize), Self::Error> {
            let mut offset = 0;
            let name = read_guid(src, &mut offset)?;
            let memory_base_address = src.gread_with(&mut offset, ctx)?;
            let memory_length = src.gread_with(&mut offset, ctx)?;
            let memory_type = src.gread_with(&mut offset, ctx)?;
            let mut reserved = [0u8; 4];
            for byte in reserved.iter_mut() {
                *byte = src.gread_with(&mut offset, ctx)?;
            }
            Ok((Self { name, memory_base_address, memory_length, memory_type, reserved }, offset))
        }
    }

    impl TryIntoCtx<Endian> for MemoryAllocation {
        type Error = scroll::Error;

        fn try_into_ctx(self, dest: &mut [u8], ctx: Endian) -> Result<usize, Self::Error> {
            let mut offset = 0;
            write_guid(dest, &mut offset, &self.name)?;
            dest.gwrite_with(self.memory_base_address, &mut offset, ctx)?;
            dest.gwrite_with(self.memory_length, &mut offset, ctx)?;
            dest.gwrite_with(self.memory_type, &mut offset, ctx)?;
            dest.gwrite_with(self.reserved.as_slice(), &mut offset, ())?;
            Ok(offset)
        }
    }
}

/// EFI_HOB_HANDOFF_INFO_TABLE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseHandoffInformationTable {
    pub header: header::Hob,     // EFI_HOB_GENERIC_HEADER
    pub version: u32,            // UINT32
    pub boot_mode: BootMode,     // EFI_BOOT_MODE
    pub memory_top: u64,         // EFI_PHYSICAL_ADDRESS
    pub memory_bottom: u64,      // EFI_PHYSICAL_ADDRESS
    pub free_memory_top: u64,    // EFI_PHYSICAL_ADDRESS
    pub free_memory_bottom: u64, // EFI_PHYSICAL_ADDRESS
    pub end_of_hob_list: u64,    // EFI_PHYSICAL_ADDRESS
}

impl PhaseHandoffInformationTable {
    /// Whether `memory_bottom <= free_memory_bottom <= free_memory_top <= memory_top`.
    pub fn is_consistent(&self) -> bool {
        self.memory_bottom <= self.free_memory_bottom
            && self.free_memory_bottom <= self.free_memory_top
            && self.free_memory_top <= self.memory_top
    }
}

impl HobRecord for PhaseHandoffInformationTable {
    const TYPE: u16 = HANDOFF;
    const SIZE: usize = 56;
}

impl<'a> TryFromCtx<'a, Endian> for PhaseHandoffInformationTable {
    type Error = scroll::Error;

    fn try_from_ctx(src: &'a [u8], ctx: Endian) -> Result<(Self, usize), Self::Error> {
        let mut offset = 0;
        let header = src.gread_with(&mut offset, ctx)?;
        let version = src.gread_with(&mut offset, ctx)?;
        let boot_mode = BootMode(src.gread_with(&mut offset, ctx)?);
        let memory_top = src.gread_with(&mut offset, ctx)?;
        let memory_bottom = src.gread_with(&mut offset, ctx)?;
        let free_memory_top = src.gread_with(&mut offset, ctx)?;
        let free_memory_bottom = src.gread_with(&mut offset, ctx)?;
        let end_of_hob_list = src.gread_with(&mut offset, ctx)?;
        Ok((
            Self {
                header,
                version,
                boot_mode,
                memory_top,
                memory_bottom,
                free_memory_top,
                free_memory_bottom,
                end_of_hob_list,
            },
            offset,
        ))
    }
}

impl TryIntoCtx<Endian> for PhaseHandoffInformationTable {
    type Error = scroll::Error;

    fn try_into_ctx(self, dest: &mut [u8], ctx: Endian) -> Result<usize, Self::Error> {
        let mut offset = 0;
        dest.gwrite_with(self.header, &mut offset, ctx)?;
        dest.gwrite_with(self.version, &mut offset, ctx)?;
        dest.gwrite_with(self.boot_mode.0, &mut offset, ctx)?;
        dest.gwrite_with(self.memory_top, &mut offset, ctx)?;
        dest.gwrite_with(self.memory_bottom, &mut offset, ctx)?;
        dest.gwrite_with(self.free_memory_top, &mut offset, ctx)?;
        dest.gwrite_with(self.free_memory_bottom, &mut offset, ctx)?;
        dest.gwrite_with(self.end_of_hob_list, &mut offset, ctx)?;
        Ok(offset)
    }
}

/// EFI_HOB_MEMORY_ALLOCATION
///
/// Also used for EFI_HOB_MEMORY_ALLOCATION_STACK and EFI_HOB_MEMORY_ALLOCATION_BSP_STORE, which share the layout and
/// are told apart by `alloc_descriptor.name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryAllocation {
    pub header: header::Hob,                         // EFI_HOB_GENERIC_HEADER
    pub alloc_descriptor: header::MemoryAllocation, // EFI_HOB_MEMORY_ALLOCATION_HEADER
}

impl HobRecord for MemoryAllocation {
    const TYPE: u16 = MEMORY_ALLOCATION;
    const SIZE: usize = header::Hob::SIZE + header::MemoryAllocation::SIZE;
}

impl<'a> TryFromCtx<'a, Endian> for MemoryAllocation {
    type Error = scroll::Error;

    fn try_from_ctx(src: &'a [u8], ctx: Endian) -> Result<(Self, usize), Self::Error> {
        let mut offset = 0;
        let header = src.gread_with(&mut offset, ctx)?;
        let alloc_descriptor = src.gread_with(&mut offset, ctx)?;
        Ok((Self { header, alloc_descriptor }, offset))
    }
}

impl TryIntoCtx<Endian> for MemoryAllocation {
    type Error = scroll::Error;

    fn try_into_ctx(self, dest: &mut [u8], ctx: Endian) -> Result<usize, Self::Error> {
        let mut offset = 0;
        dest.gwrite_with(self.header, &mut offset, ctx)?;
        dest.gwrite_with(self.alloc_descriptor, &mut offset, ctx)?;
        Ok(offset)
    }
}

/// EFI_HOB_MEMORY_ALLOCATION_MODULE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryAllocationModule {
    pub header: header::Hob,                         // EFI_HOB_GENERIC_HEADER
    pub alloc_descriptor: header::MemoryAllocation, // EFI_HOB_MEMORY_ALLOCATION_HEADER
    pub module_name: efi::Guid,                      // EFI_GUID
    pub entry_point: u64,                            // EFI_PHYSICAL_ADDRESS
}

impl HobRecord for MemoryAllocationModule {
    const TYPE: u16 = MEMORY_ALLOCATION;
    const SIZE: usize = MemoryAllocation::SIZE + 16 + 8;
}

impl<'a> TryFromCtx<'a, Endian> for MemoryAllocationModule {
    type Error = scroll::Error;

    fn try_from_ctx(src: &'a [u8], ctx: Endian) -> Result<(Self, usize), Self::Error> {
        let mut offset = 0;
        let header = src.gread_with(&mut offset, ctx)?;
        let alloc_descriptor = src.gread_with(&mut offset, ctx)?;
        let module_name = read_guid(src, &mut offset)?;
        let entry_point = src.gread_with(&mut offset, ctx)?;
        Ok((Self { header, alloc_descriptor, module_name, entry_point }, offset))
    }
}

impl TryIntoCtx<Endian> for MemoryAllocationModule {
    type Error = scroll::Error;

    fn try_into_ctx(self, dest: &mut [u8], ctx: Endian) -> Result<usize, Self::Error> {
        let mut offset = 0;
        dest.gwrite_with(self.header, &mut offset, ctx)?;
        dest.gwrite_with(self.alloc_descriptor, &mut offset, ctx)?;
        write_guid(dest, &mut offset, &self.module_name)?;
        dest.gwrite_with(self.entry_point, &mut offset, ctx)?;
        Ok(offset)
    }
}

/// EFI_HOB_RESOURCE_DESCRIPTOR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub header: header::Hob,     // EFI_HOB_GENERIC_HEADER
    pub owner: efi::Guid,        // EFI_GUID
    pub resource_type: u32,      // EFI_RESOURCE_TYPE
    pub resource_attribute: u32, // EFI_RESOURCE_ATTRIBUTE_TYPE
    pub physical_start: u64,     // EFI_PHYSICAL_ADDRESS
    pub resource_length: u64,    // UINT64
}

impl HobRecord for ResourceDescriptor {
    const TYPE: u16 = RESOURCE_DESCRIPTOR;
    const SIZE: usize = 48;
}

impl<'a> TryFromCtx<'a, Endian> for ResourceDescriptor {
    type Error = scroll::Error;

    fn try_from_ctx(src: &'a [u8], ctx: Endian) -> Result<(Self, usize), Self::Error> {
        let mut offset = 0;
        let header = src.gread_with(&mut offset, ctx)?;
        let owner = read_guid(src, &mut offset)?;
        let resource_type = src.gread_with(&mut offset, ctx)?;
        let resource_attribute = src.gread_with(&mut offset, ctx)?;
        let physical_start = src.gread_with(&mut offset, ctx)?;
        let resource_length = src.gread_with(&mut offset, ctx)?;
        Ok((Self { header, owner, resource_type, resource_attribute, physical_start, resource_length }, offset))
    }
}

impl TryIntoCtx<Endian> for ResourceDescriptor {
    type Error = scroll::Error;

    fn try_into_ctx(self, dest: &mut [u8], ctx: Endian) -> Result<usize, Self::Error> {
        let mut offset = 0;
        dest.gwrite_with(self.header, &mut offset, ctx)?;
        write_guid(dest, &mut offset, &self.owner)?;
        dest.gwrite_with(self.resource_type, &mut offset, ctx)?;
        dest.gwrite_with(self.resource_attribute, &mut offset, ctx)?;
        dest.gwrite_with(self.physical_start, &mut offset, ctx)?;
        dest.gwrite_with(self.resource_length, &mut offset, ctx)?;
        Ok(offset)
    }
}

/// EFI_HOB_GUID_TYPE
///
/// The GUID-specific data follows the record and is covered by `header.length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuidHob {
    pub header: header::Hob, // EFI_HOB_GENERIC_HEADER
    pub name: efi::Guid,     // EFI_GUID
}

impl HobRecord for GuidHob {
    const TYPE: u16 = GUID_EXTENSION;
    const SIZE: usize = 24;
}

impl<'a> TryFromCtx<'a, Endian> for GuidHob {
    type Error = scroll::Error;

    fn try_from_ctx(src: &'a [u8], ctx: Endian) -> Result<(Self, usize), Self::Error> {
        let mut offset = 0;
        let header = src.gread_with(&mut offset, ctx)?;
        let name = read_guid(src, &mut offset)?;
        Ok((Self { header, name }, offset))
    }
}

impl TryIntoCtx<Endian> for GuidHob {
    type Error = scroll::Error;

    fn try_into_ctx(self, dest: &mut [u8], ctx: Endian) -> Result<usize, Self::Error> {
        let mut offset = 0;
        dest.gwrite_with(self.header, &mut offset, ctx)?;
        write_guid(dest, &mut offset, &self.name)?;
        Ok(offset)
    }
}

/// EFI_HOB_FIRMWARE_VOLUME
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVolume {
    pub header: header::Hob, // EFI_HOB_GENERIC_HEADER
    pub base_address: u64,   // EFI_PHYSICAL_ADDRESS
    pub length: u64,         // UINT64
}

impl HobRecord for FirmwareVolume {
    const TYPE: u16 = FV;
    const SIZE: usize = 24;
}

impl<'a> TryFromCtx<'a, Endian> for FirmwareVolume {
    type Error = scroll::Error;

    fn try_from_ctx(src: &'a [u8], ctx: Endian) -> Result<(Self, usize), Self::Error> {
        let mut offset = 0;
        let header = src.gread_with(&mut offset, ctx)?;
        let base_address = src.gread_with(&mut offset, ctx)?;
        let length = src.gread_with(&mut offset, ctx)?;
        Ok((Self { header, base_address, length }, offset))
    }
}

impl TryIntoCtx<Endian> for FirmwareVolume {
    type Error = scroll::Error;

    fn try_into_ctx(self, dest: &mut [u8], ctx: Endian) -> Result<usize, Self::Error> {
        let mut offset = 0;
        dest.gwrite_with(self.header, &mut offset, ctx)?;
        dest.gwrite_with(self.base_address, &mut offset, ctx)?;
        dest.gwrite_with(self.length, &mut offset, ctx)?;
        Ok(offset)
    }
}

/// EFI_HOB_CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cpu {
    pub header: header::Hob,       // EFI_HOB_GENERIC_HEADER
    pub size_of_memory_space: u8, // UINT8
    pub size_of_io_space: u8,     // UINT8
    pub reserved: [u8; 6],        // UINT8[6]
}

impl HobRecord for Cpu {
    const TYPE: u16 = CPU;
    const SIZE: usize = 16;
}

impl<'a> TryFromCtx<'a, Endian> for Cpu {
    type Error = scroll::Error;

    fn try_from_ctx(src: &'a [u8], ctx: Endian) -> Result<(Self, usize), Self::Error> {
        let mut offset = 0;
        let header = src.gread_with(&mut offset, ctx)?;
        let size_of_memory_space = src.gread_with(&mut offset, ctx)?;
        let size_of_io_space = src.gread_with(&mut offset, ctx)?;
        let mut reserved = [0u8; 6];
        for byte in reserved.iter_mut() {
            *byte = src.gread_with(&mut offset, ctx)?;
        }
        Ok((Self { header, size_of_memory_space, size_of_io_space, reserved }, offset))
    }
}

impl TryIntoCtx<Endian> for Cpu {
    type Error = scroll::Error;

    fn try_into_ctx(self, dest: &mut [u8], ctx: Endian) -> Result<usize, Self::Error> {
        let mut offset = 0;
        dest.gwrite_with(self.header, &mut offset, ctx)?;
        dest.gwrite_with(self.size_of_memory_space, &mut offset, ctx)?;
        dest.gwrite_with(self.size_of_io_space, &mut offset, ctx)?;
        dest.gwrite_with(self.reserved.as_slice(), &mut offset, ())?;
        Ok(offset)
    }
}

/// EFI_HOB_MEMORY_POOL
///
/// The pool payload follows the header and is covered by `length`.
pub type MemoryPool = header::Hob;

/// The minimum encoded size of the HOB types that carry a fixed body.
fn minimum_size(hob_type: u16) -> usize {
    match hob_type {
        HANDOFF => PhaseHandoffInformationTable::SIZE,
        MEMORY_ALLOCATION => MemoryAllocation::SIZE,
        RESOURCE_DESCRIPTOR => ResourceDescriptor::SIZE,
        GUID_EXTENSION => GuidHob::SIZE,
        FV => FirmwareVolume::SIZE,
        CPU => Cpu::SIZE,
        _ => header::Hob::SIZE,
    }
}

/// A decoded HOB.
#[derive(Clone, Copy, Debug)]
pub enum Hob<'a> {
    Handoff(PhaseHandoffInformationTable),
    MemoryAllocation(MemoryAllocation),
    MemoryAllocationModule(MemoryAllocationModule),
    ResourceDescriptor(ResourceDescriptor),
    GuidHob(GuidHob, &'a [u8]),
    FirmwareVolume(FirmwareVolume),
    Cpu(Cpu),
    MemoryPool(MemoryPool, &'a [u8]),
    Misc(header::Hob),
}

impl<'a> Hob<'a> {
    /// Decodes one record. `record` must span exactly `header.length` bytes.
    ///
    /// Records that fail to decode as their declared type are reported as [`Hob::Misc`].
    fn decode(header: header::Hob, record: &'a [u8]) -> Self {
        let decoded = match header.r#type {
            HANDOFF => record.pread_with(0, LE).map(Hob::Handoff),
            MEMORY_ALLOCATION if record.len() >= MemoryAllocationModule::SIZE => {
                record.pread_with(0, LE).map(Hob::MemoryAllocationModule)
            }
            MEMORY_ALLOCATION => record.pread_with(0, LE).map(Hob::MemoryAllocation),
            RESOURCE_DESCRIPTOR => record.pread_with(0, LE).map(Hob::ResourceDescriptor),
            GUID_EXTENSION => record
                .pread_with::<GuidHob>(0, LE)
                .map(|guid_hob| Hob::GuidHob(guid_hob, &record[GuidHob::SIZE..])),
            FV => record.pread_with(0, LE).map(Hob::FirmwareVolume),
            CPU => record.pread_with(0, LE).map(Hob::Cpu),
            MEMORY_POOL => Ok(Hob::MemoryPool(header, &record[header::Hob::SIZE..])),
            _ => Ok(Hob::Misc(header)),
        };
        decoded.unwrap_or(Hob::Misc(header))
    }

    /// The HOB type of this record.
    pub fn hob_type(&self) -> u16 {
        match self {
            Hob::Handoff(_) => HANDOFF,
            Hob::MemoryAllocation(_) | Hob::MemoryAllocationModule(_) => MEMORY_ALLOCATION,
            Hob::ResourceDescriptor(_) => RESOURCE_DESCRIPTOR,
            Hob::GuidHob(_, _) => GUID_EXTENSION,
            Hob::FirmwareVolume(_) => FV,
            Hob::Cpu(_) => CPU,
            Hob::MemoryPool(_, _) => MEMORY_POOL,
            Hob::Misc(header) => header.r#type,
        }
    }
}

/// A validated, read-only view over a HOB list.
///
/// The view covers the bytes from the PHIT up to and including the end-of-list record.
#[derive(Clone, Copy)]
pub struct HobList<'a> {
    buffer: &'a [u8],
    phit: PhaseHandoffInformationTable,
}

impl<'a> HobList<'a> {
    /// Validates the HOB list at the start of `buffer`.
    ///
    /// Walks the list once, checking that it starts with a consistent PHIT, that every record length is a non-zero
    /// multiple of 8 that stays inside `buffer`, that known record types are long enough for their fixed body, and
    /// that an end-of-list record is reached.
    pub fn new(buffer: &'a [u8]) -> Result<Self, HobError> {
        let phit: PhaseHandoffInformationTable =
            buffer.pread_with(0, LE).map_err(|_| HobError::Truncated { offset: 0 })?;
        if phit.header.r#type != HANDOFF {
            return Err(HobError::MissingHandoff);
        }
        if !phit.is_consistent() {
            return Err(HobError::InvalidHandoff);
        }

        let mut offset = 0;
        loop {
            let header: header::Hob = buffer.pread_with(offset, LE).map_err(|_| HobError::Truncated { offset })?;
            let length = header.length as usize;
            if length < header::Hob::SIZE || length % HOB_ALIGNMENT != 0 {
                return Err(HobError::InvalidLength { offset });
            }
            if length < minimum_size(header.r#type) {
                return Err(HobError::RecordTooShort { offset, hob_type: header.r#type });
            }
            let end = offset
                .checked_add(length)
                .filter(|end| *end <= buffer.len())
                .ok_or(HobError::Truncated { offset })?;

            if header.r#type == END_OF_HOB_LIST {
                return Ok(Self { buffer: &buffer[..end], phit });
            }
            offset = end;
        }
    }

    /// The Phase Handoff Information Table that starts the list.
    pub fn phit(&self) -> PhaseHandoffInformationTable {
        self.phit
    }

    /// Size in bytes of the list, including the end-of-list record.
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    /// Raw bytes of the list.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.buffer
    }

    /// Forward iterator over the records, stopping at the end-of-list record.
    pub fn iter(&self) -> HobIter<'a> {
        HobIter { buffer: self.buffer, offset: 0 }
    }

    /// Data of every GUID extension HOB named `guid`, in list order.
    pub fn guid_hobs<'g>(&self, guid: &'g efi::Guid) -> impl Iterator<Item = &'a [u8]> + 'g
    where
        'a: 'g,
    {
        self.iter().filter_map(move |hob| match hob {
            Hob::GuidHob(guid_hob, data) if guid_hob.name == *guid => Some(data),
            _ => None,
        })
    }
}

impl<'a> IntoIterator for &HobList<'a> {
    type Item = Hob<'a>;
    type IntoIter = HobIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Single-pass iterator over a validated HOB list.
pub struct HobIter<'a> {
    buffer: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for HobIter<'a> {
    type Item = Hob<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let header: header::Hob = self.buffer.pread_with(self.offset, LE).ok()?;
        if header.r#type == END_OF_HOB_LIST {
            return None;
        }
        let end = self.offset.checked_add(header.length as usize)?;
        let record = self.buffer.get(self.offset..end)?;
        self.offset = end;
        Some(Hob::decode(header, record))
    }
}

#[cfg(not(tarpaulin_include))]
impl fmt::Debug for HobList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for hob in self.iter() {
            match hob {
                Hob::Handoff(hob) => {
                    write!(
                        f,
                        indoc! {"
                        PHASE HANDOFF INFORMATION TABLE (PHIT) HOB
                          HOB Length: 0x{:x}
                          Version: 0x{:x}
                          Boot Mode: {:?}
                          Memory Bottom: 0x{:x}
                          Memory Top: 0x{:x}
                          Free Memory Bottom: 0x{:x}
                          Free Memory Top: 0x{:x}
                          End of HOB List: 0x{:x}\n"},
                        hob.header.length,
                        hob.version,
                        hob.boot_mode,
                        hob.memory_bottom,
                        hob.memory_top,
                        hob.free_memory_bottom,
                        hob.free_memory_top,
                        hob.end_of_hob_list
                    )?;
                }
                Hob::MemoryAllocation(hob) => {
                    write!(
                        f,
                        indoc! {"
                        MEMORY ALLOCATION HOB
                          HOB Length: 0x{:x}
                          Name: {}
                          Memory Base Address: 0x{:x}
                          Memory Length: 0x{:x}
                          Memory Type: {:?}\n"},
                        hob.header.length,
                        GuidFmt(&hob.alloc_descriptor.name),
                        hob.alloc_descriptor.memory_base_address,
                        hob.alloc_descriptor.memory_length,
                        hob.alloc_descriptor.memory_type
                    )?;
                }
                Hob::MemoryAllocationModule(hob) => {
                    write!(
                        f,
                        indoc! {"
                        MEMORY ALLOCATION MODULE HOB
                          HOB Length: 0x{:x}
                          Module Name: {}
                          Memory Base Address: 0x{:x}
                          Memory Length: 0x{:x}
                          Entry Point: 0x{:x}\n"},
                        hob.header.length,
                        GuidFmt(&hob.module_name),
                        hob.alloc_descriptor.memory_base_address,
                        hob.alloc_descriptor.memory_length,
                        hob.entry_point
                    )?;
                }
                Hob::ResourceDescriptor(hob) => {
                    write!(
                        f,
                        indoc! {"
                        RESOURCE DESCRIPTOR HOB
                          HOB Length: 0x{:x}
                          Owner: {}
                          Resource Type: 0x{:x}
                          Resource Attribute Type: 0x{:x}
                          Resource Start Address: 0x{:x}
                          Resource Length: 0x{:x}\n"},
                        hob.header.length,
                        GuidFmt(&hob.owner),
                        hob.resource_type,
                        hob.resource_attribute,
                        hob.physical_start,
                        hob.resource_length
                    )?;
                }
                Hob::GuidHob(hob, data) => {
                    write!(
                        f,
                        indoc! {"
                        GUID HOB
                          HOB Length: 0x{:x}
                          Name: {}
                          Data Length: 0x{:x}\n"},
                        hob.header.length,
                        GuidFmt(&hob.name),
                        data.len()
                    )?;
                }
                Hob::FirmwareVolume(hob) => {
                    write!(
                        f,
                        indoc! {"
                        FIRMWARE VOLUME (FV) HOB
                          HOB Length: 0x{:x}
                          Base Address: 0x{:x}
                          Length: 0x{:x}\n"},
                        hob.header.length, hob.base_address, hob.length
                    )?;
                }
                Hob::Cpu(hob) => {
                    write!(
                        f,
                        indoc! {"
                        CPU HOB
                          Memory Space Size: 0x{:x}
                          IO Space Size: 0x{:x}\n"},
                        hob.size_of_memory_space, hob.size_of_io_space
                    )?;
                }
                Hob::MemoryPool(hob, data) => {
                    write!(
                        f,
                        indoc! {"
                        MEMORY POOL HOB
                          HOB Length: 0x{:x}
                          Pool Size: 0x{:x}\n"},
                        hob.length,
                        data.len()
                    )?;
                }
                Hob::Misc(hob) => {
                    writeln!(f, "UNKNOWN HOB (type 0x{:x}, length 0x{:x})", hob.r#type, hob.length)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_GUID: efi::Guid =
        efi::Guid::from_fields(0x12345678, 0x1234, 0x5678, 0x90, 0xab, &[0xcd, 0xef, 0x01, 0x23, 0x45, 0x67]);

    fn phit(end_of_hob_list: u64) -> PhaseHandoffInformationTable {
        PhaseHandoffInformationTable {
            header: header::Hob::new(HANDOFF, PhaseHandoffInformationTable::SIZE as u16),
            version: HANDOFF_TABLE_VERSION,
            boot_mode: BootMode::BOOT_WITH_FULL_CONFIGURATION,
            memory_top: 0x20_0000,
            memory_bottom: 0x10_0000,
            free_memory_top: 0x20_0000,
            free_memory_bottom: 0x10_1000,
            end_of_hob_list,
        }
    }

    // Builds a list of PHIT, CPU, a GUID HOB with 5 data bytes, a memory pool, and the end marker.
    fn build_test_list() -> Vec<u8> {
        let mut buffer = vec![0u8; 0x200];
        let mut offset = 0;
        buffer.gwrite_with(phit(0x10_0000 + 56 + 16 + 32 + 24), &mut offset, LE).unwrap();
        buffer
            .gwrite_with(
                Cpu {
                    header: header::Hob::new(CPU, Cpu::SIZE as u16),
                    size_of_memory_space: 48,
                    size_of_io_space: 16,
                    reserved: [0; 6],
                },
                &mut offset,
                LE,
            )
            .unwrap();
        let guid_start = offset;
        let guid_hob = GuidHob { header: header::Hob::new(GUID_EXTENSION, 32), name: TEST_GUID };
        buffer.gwrite_with(guid_hob, &mut offset, LE).unwrap();
        buffer.gwrite_with(&[1u8, 2, 3, 4, 5][..], &mut offset, ()).unwrap();
        offset = guid_start + 32;
        buffer.gwrite_with(header::Hob::new(MEMORY_POOL, 24), &mut offset, LE).unwrap();
        offset += 16;
        buffer.gwrite_with(header::Hob::new(END_OF_HOB_LIST, 8), &mut offset, LE).unwrap();
        buffer
    }

    #[test]
    fn records_encode_to_their_declared_size() {
        let mut buffer = [0u8; 128];
        assert_eq!(buffer.pwrite_with(phit(0), 0, LE).unwrap(), PhaseHandoffInformationTable::SIZE);

        let alloc = MemoryAllocation {
            header: header::Hob::new(MEMORY_ALLOCATION, MemoryAllocation::SIZE as u16),
            alloc_descriptor: header::MemoryAllocation {
                name: TEST_GUID,
                memory_base_address: 0x1000,
                memory_length: 0x2000,
                memory_type: efi::BOOT_SERVICES_DATA,
                reserved: [0; 4],
            },
        };
        assert_eq!(buffer.pwrite_with(alloc, 0, LE).unwrap(), MemoryAllocation::SIZE);
        assert_eq!(buffer.pread_with::<MemoryAllocation>(0, LE).unwrap(), alloc);

        let module = MemoryAllocationModule {
            header: header::Hob::new(MEMORY_ALLOCATION, MemoryAllocationModule::SIZE as u16),
            alloc_descriptor: alloc.alloc_descriptor,
            module_name: TEST_GUID,
            entry_point: 0x1234,
        };
        assert_eq!(buffer.pwrite_with(module, 0, LE).unwrap(), MemoryAllocationModule::SIZE);

        let resource = ResourceDescriptor {
            header: header::Hob::new(RESOURCE_DESCRIPTOR, ResourceDescriptor::SIZE as u16),
            owner: TEST_GUID,
            resource_type: EFI_RESOURCE_SYSTEM_MEMORY,
            resource_attribute: TESTED_MEMORY_ATTRIBUTES,
            physical_start: 0,
            resource_length: 0x1000,
        };
        assert_eq!(buffer.pwrite_with(resource, 0, LE).unwrap(), ResourceDescriptor::SIZE);

        let fv =
            FirmwareVolume { header: header::Hob::new(FV, FirmwareVolume::SIZE as u16), base_address: 1, length: 2 };
        assert_eq!(buffer.pwrite_with(fv, 0, LE).unwrap(), FirmwareVolume::SIZE);
    }

    #[test]
    fn phit_fields_are_little_endian_at_fixed_offsets() {
        let mut buffer = [0u8; PhaseHandoffInformationTable::SIZE];
        buffer.pwrite_with(phit(0x1122_3344_5566_7788), 0, LE).unwrap();
        assert_eq!(&buffer[0..4], &[0x01, 0x00, 56, 0x00]);
        assert_eq!(&buffer[8..12], &[0x09, 0x00, 0x00, 0x00]);
        assert_eq!(&buffer[48..56], &[0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11]);
    }

    #[test]
    fn hob_list_walks_forward_until_end_marker() {
        let buffer = build_test_list();
        let list = HobList::new(&buffer).unwrap();
        assert_eq!(list.size(), 56 + 16 + 32 + 24 + 8);

        let types: Vec<u16> = list.iter().map(|hob| hob.hob_type()).collect();
        assert_eq!(types, vec![HANDOFF, CPU, GUID_EXTENSION, MEMORY_POOL]);

        match list.iter().nth(3) {
            Some(Hob::MemoryPool(_, data)) => assert_eq!(data.len(), 16),
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn guid_hobs_filters_by_name() {
        let buffer = build_test_list();
        let list = HobList::new(&buffer).unwrap();
        let data: Vec<&[u8]> = list.guid_hobs(&TEST_GUID).collect();
        assert_eq!(data.len(), 1);
        assert_eq!(&data[0][..5], &[1, 2, 3, 4, 5]);

        let other = efi::Guid::from_fields(0, 0, 0, 0, 0, &[0; 6]);
        assert_eq!(list.guid_hobs(&other).count(), 0);
    }

    #[test]
    fn list_must_start_with_phit() {
        let mut buffer = build_test_list();
        buffer[0] = CPU as u8;
        assert_eq!(HobList::new(&buffer).err(), Some(HobError::MissingHandoff));
    }

    #[test]
    fn inconsistent_phit_is_rejected() {
        let mut buffer = build_test_list();
        let mut bad = phit(0);
        bad.free_memory_bottom = bad.free_memory_top + 0x1000;
        buffer.pwrite_with(bad, 0, LE).unwrap();
        assert_eq!(HobList::new(&buffer).err(), Some(HobError::InvalidHandoff));
    }

    #[test]
    fn length_running_past_buffer_is_rejected() {
        let mut buffer = build_test_list();
        // Stretch the GUID HOB so that it claims more bytes than the buffer has.
        buffer.pwrite_with(0xFFF8u16, 56 + 16 + 2, LE).unwrap();
        assert_eq!(HobList::new(&buffer).err(), Some(HobError::Truncated { offset: 72 }));
    }

    #[test]
    fn unaligned_or_zero_length_is_rejected() {
        let mut buffer = build_test_list();
        buffer.pwrite_with(0u16, 56 + 2, LE).unwrap();
        assert_eq!(HobList::new(&buffer).err(), Some(HobError::InvalidLength { offset: 56 }));

        let mut buffer = build_test_list();
        buffer.pwrite_with(17u16, 56 + 2, LE).unwrap();
        assert_eq!(HobList::new(&buffer).err(), Some(HobError::InvalidLength { offset: 56 }));
    }

    #[test]
    fn short_typed_record_is_rejected() {
        let mut buffer = build_test_list();
        // A resource descriptor cannot fit in 16 bytes.
        buffer.pwrite_with(RESOURCE_DESCRIPTOR, 56, LE).unwrap();
        assert_eq!(
            HobList::new(&buffer).err(),
            Some(HobError::RecordTooShort { offset: 56, hob_type: RESOURCE_DESCRIPTOR })
        );
    }

    #[test]
    fn missing_end_marker_is_truncation() {
        let buffer = build_test_list();
        let cut = &buffer[..56 + 16 + 32 + 24];
        assert!(matches!(HobList::new(cut), Err(HobError::Truncated { .. })));
    }

    #[test]
    fn debug_dump_names_each_record() {
        let buffer = build_test_list();
        let list = HobList::new(&buffer).unwrap();
        let dump = format!("{list:?}");
        assert!(dump.contains("PHASE HANDOFF INFORMATION TABLE (PHIT) HOB"));
        assert!(dump.contains("CPU HOB"));
        assert!(dump.contains("GUID HOB"));
        assert!(dump.contains("MEMORY POOL HOB"));
        assert!(dump.contains("Boot Mode: BootWithFullConfiguration"));
    }

    #[test]
    fn hob_error_maps_to_status() {
        assert_eq!(efi::Status::from(HobError::Truncated { offset: 0 }), efi::Status::BUFFER_TOO_SMALL);
        assert_eq!(efi::Status::from(HobError::MissingHandoff), efi::Status::INVALID_PARAMETER);
    }
}

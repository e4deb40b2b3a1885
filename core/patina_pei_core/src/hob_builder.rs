//! HOB builders.
//!
//! Typed wrappers over [`BootContext::create_hob`] for the HOBs the PEI core and platform code publish to DXE.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use patina_pi::hob::{
    self, header, Cpu, FirmwareVolume, GuidHob, HobRecord, MemoryAllocation, MemoryAllocationModule,
    ResourceDescriptor, HOB_MEMORY_ALLOC_MODULE_GUID, HOB_MEMORY_ALLOC_STACK_GUID,
};
use r_efi::efi;
use scroll::{Pread, Pwrite, LE};

use crate::{
    base::UEFI_PAGE_MASK,
    context::{BootContext, MAX_HOB_LENGTH},
    error::PeiCoreError,
    memory::ZERO_GUID,
};

fn is_page_aligned(value: u64) -> bool {
    value & UEFI_PAGE_MASK as u64 == 0
}

impl BootContext<'_> {
    /// Describes a range of system resources.
    pub fn build_resource_descriptor_hob(
        &mut self,
        resource_type: u32,
        resource_attribute: u32,
        physical_start: u64,
        resource_length: u64,
    ) -> Result<u64, PeiCoreError> {
        self.append_hob(ResourceDescriptor {
            header: header::Hob::new(hob::RESOURCE_DESCRIPTOR, ResourceDescriptor::SIZE as u16),
            owner: ZERO_GUID,
            resource_type,
            resource_attribute,
            physical_start,
            resource_length,
        })
    }

    /// Records an allocated memory range. Base and length must be page aligned.
    pub fn build_memory_allocation_hob(
        &mut self,
        memory_base_address: u64,
        memory_length: u64,
        memory_type: efi::MemoryType,
    ) -> Result<u64, PeiCoreError> {
        self.build_named_memory_allocation_hob(ZERO_GUID, memory_base_address, memory_length, memory_type)
    }

    pub(crate) fn build_named_memory_allocation_hob(
        &mut self,
        name: efi::Guid,
        memory_base_address: u64,
        memory_length: u64,
        memory_type: efi::MemoryType,
    ) -> Result<u64, PeiCoreError> {
        if !is_page_aligned(memory_base_address) || !is_page_aligned(memory_length) {
            log::error!(
                target: "pei_hob",
                "Memory allocation {:#x}+{:#x} is not page aligned",
                memory_base_address,
                memory_length
            );
            return Err(PeiCoreError::InvalidParameter);
        }
        self.append_hob(MemoryAllocation {
            header: header::Hob::new(hob::MEMORY_ALLOCATION, MemoryAllocation::SIZE as u16),
            alloc_descriptor: header::MemoryAllocation {
                name,
                memory_base_address,
                memory_length,
                memory_type,
                reserved: [0; 4],
            },
        })
    }

    /// Records the image a module was loaded into, and its entry point.
    pub fn build_module_hob(
        &mut self,
        module_name: &efi::Guid,
        memory_base_address: u64,
        memory_length: u64,
        entry_point: u64,
    ) -> Result<u64, PeiCoreError> {
        if !is_page_aligned(memory_base_address) || !is_page_aligned(memory_length) {
            return Err(PeiCoreError::InvalidParameter);
        }
        self.append_hob(MemoryAllocationModule {
            header: header::Hob::new(hob::MEMORY_ALLOCATION, MemoryAllocationModule::SIZE as u16),
            alloc_descriptor: header::MemoryAllocation {
                name: HOB_MEMORY_ALLOC_MODULE_GUID,
                memory_base_address,
                memory_length,
                memory_type: efi::BOOT_SERVICES_CODE,
                reserved: [0; 4],
            },
            module_name: *module_name,
            entry_point,
        })
    }

    /// Records the stack handed to the next phase.
    pub fn build_stack_hob(&mut self, base_address: u64, length: u64) -> Result<u64, PeiCoreError> {
        self.build_named_memory_allocation_hob(
            HOB_MEMORY_ALLOC_STACK_GUID,
            base_address,
            length,
            efi::BOOT_SERVICES_DATA,
        )
    }

    /// Describes the width of the processor's memory and I/O address spaces.
    pub fn build_cpu_hob(&mut self, size_of_memory_space: u8, size_of_io_space: u8) -> Result<u64, PeiCoreError> {
        self.append_hob(Cpu {
            header: header::Hob::new(hob::CPU, Cpu::SIZE as u16),
            size_of_memory_space,
            size_of_io_space,
            reserved: [0; 6],
        })
    }

    /// Publishes a firmware volume for DXE to dispatch from.
    pub fn build_fv_hob(&mut self, base_address: u64, length: u64) -> Result<u64, PeiCoreError> {
        self.append_hob(FirmwareVolume {
            header: header::Hob::new(hob::FV, FirmwareVolume::SIZE as u16),
            base_address,
            length,
        })
    }

    /// Reserves a GUID extension HOB with `data_length` bytes of zeroed data. Returns the address of the data.
    pub fn build_guid_hob(&mut self, guid: &efi::Guid, data_length: usize) -> Result<u64, PeiCoreError> {
        let length = GuidHob::SIZE.checked_add(data_length).filter(|length| *length <= MAX_HOB_LENGTH);
        let Some(length) = length else {
            log::error!(target: "pei_hob", "GUID HOB data of {:#x} bytes does not fit a HOB", data_length);
            return Err(PeiCoreError::InvalidParameter);
        };

        let address = self.create_hob(hob::GUID_EXTENSION, length)?;
        let header: header::Hob = self.bytes(address, header::Hob::SIZE)?.pread_with(0, LE)?;
        let guid_hob = GuidHob { header, name: *guid };
        self.bytes_mut(address, GuidHob::SIZE)?.pwrite_with(guid_hob, 0, LE)?;
        Ok(address + GuidHob::SIZE as u64)
    }

    /// Publishes `data` in a GUID extension HOB. Returns the address of the copied data.
    pub fn build_guid_data_hob(&mut self, guid: &efi::Guid, data: &[u8]) -> Result<u64, PeiCoreError> {
        let address = self.build_guid_hob(guid, data.len())?;
        self.bytes_mut(address, data.len())?.copy_from_slice(data);
        Ok(address)
    }
}

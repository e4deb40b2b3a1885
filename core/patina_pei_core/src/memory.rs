//! Early page allocator.
//!
//! Pages are carved from the top of the free memory range and the top moves down. The HOB list grows up from the
//! bottom of the same range, so the two meet in the middle. Nothing is ever freed: the whole range is abandoned at
//! the hand-off to DXE, and the memory allocation HOBs tell DXE which pages are still in use.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use patina_pi::hob::{HobRecord, MemoryAllocation};
use r_efi::efi;

use crate::{
    base::{align_down, align_up, pages_to_size, size_to_pages, UEFI_PAGE_SIZE},
    context::BootContext,
    error::PeiCoreError,
};

/// Name used for memory allocation HOBs that do not describe a special region.
pub const ZERO_GUID: efi::Guid = efi::Guid::from_fields(0, 0, 0, 0, 0, &[0; 6]);

impl BootContext<'_> {
    /// Allocates `pages` contiguous 4 KiB pages from the top of free memory.
    ///
    /// The top of free memory is first aligned down to a page boundary. On success it is lowered by the size of the
    /// allocation and the new top is returned. No HOB is created.
    ///
    /// ## Errors
    ///
    /// - [`PeiCoreError::InvalidParameter`] when `pages` is zero.
    /// - [`PeiCoreError::OutOfResources`] when the pages would cross the bottom of free memory. The context is left
    ///   untouched.
    pub fn allocate_pages(&mut self, pages: usize) -> Result<u64, PeiCoreError> {
        let address = self.find_pages(pages, 0)?;
        self.set_free_memory_top(address)?;
        log::debug!(target: "pei_memory", "Allocated {:#x} pages at {:#x}", pages, address);
        Ok(address)
    }

    /// Allocates `pages` pages and records them in a memory allocation HOB of `memory_type`.
    ///
    /// Room for the HOB is checked before anything is committed.
    pub fn allocate_typed_pages(&mut self, pages: usize, memory_type: efi::MemoryType) -> Result<u64, PeiCoreError> {
        self.allocate_pages_with_hob(pages, memory_type, ZERO_GUID)
    }

    /// Allocates `pages` pages whose base is a multiple of `alignment`.
    ///
    /// An `alignment` of zero or up to a page behaves like [`allocate_pages`](Self::allocate_pages). Larger alignments
    /// over-allocate by one alignment unit and return the aligned address inside the allocation. The pages lost
    /// below and above the aligned range stay allocated.
    ///
    /// ## Errors
    ///
    /// - [`PeiCoreError::InvalidAlignment`] when `alignment` is neither zero nor a power of two.
    /// - [`PeiCoreError::InvalidParameter`] when `pages` is zero.
    /// - [`PeiCoreError::OutOfResources`] when the padded allocation does not fit.
    pub fn allocate_aligned_pages(&mut self, pages: usize, alignment: usize) -> Result<u64, PeiCoreError> {
        if alignment != 0 && !alignment.is_power_of_two() {
            log::error!(target: "pei_memory", "Alignment {:#x} is not a power of two", alignment);
            return Err(PeiCoreError::InvalidAlignment);
        }
        if pages == 0 {
            return Err(PeiCoreError::InvalidParameter);
        }
        if alignment <= UEFI_PAGE_SIZE {
            return self.allocate_pages(pages);
        }

        let padded = pages.checked_add(size_to_pages(alignment)).ok_or(PeiCoreError::OutOfResources)?;
        let base = self.allocate_pages(padded)?;
        let aligned = align_up(base, alignment as u64).map_err(|_| PeiCoreError::OutOfResources)?;
        log::debug!(
            target: "pei_memory",
            "Aligned {:#x} pages to {:#x} at {:#x} (allocation base {:#x})",
            pages,
            alignment,
            aligned,
            base
        );
        Ok(aligned)
    }

    /// Allocates pages and records them in a memory allocation HOB named `name`.
    pub(crate) fn allocate_pages_with_hob(
        &mut self,
        pages: usize,
        memory_type: efi::MemoryType,
        name: efi::Guid,
    ) -> Result<u64, PeiCoreError> {
        let address = self.find_pages(pages, MemoryAllocation::SIZE)?;
        self.set_free_memory_top(address)?;
        let length = pages_to_size(pages).ok_or(PeiCoreError::OutOfResources)? as u64;
        self.build_named_memory_allocation_hob(name, address, length, memory_type)?;
        log::debug!(
            target: "pei_memory",
            "Allocated {:#x} pages of type {} at {:#x}",
            pages,
            memory_type,
            address
        );
        Ok(address)
    }

    /// Finds the base of `pages` pages below the top of free memory, leaving `reserve` bytes above the bottom of free
    /// memory for HOBs. Nothing is committed.
    fn find_pages(&self, pages: usize, reserve: usize) -> Result<u64, PeiCoreError> {
        if pages == 0 {
            log::error!(target: "pei_memory", "Zero page allocation requested");
            return Err(PeiCoreError::InvalidParameter);
        }
        let phit = self.phit();
        let size = pages_to_size(pages).ok_or(PeiCoreError::OutOfResources)? as u64;
        let top = align_down(phit.free_memory_top, UEFI_PAGE_SIZE as u64).map_err(|_| PeiCoreError::OutOfResources)?;
        let floor = phit.free_memory_bottom + reserve as u64;

        match top.checked_sub(size) {
            Some(address) if address >= floor => Ok(address),
            _ => {
                log::error!(
                    target: "pei_memory",
                    "Out of memory allocating {:#x} pages (free {:#x}..{:#x})",
                    pages,
                    phit.free_memory_bottom,
                    phit.free_memory_top
                );
                Err(PeiCoreError::OutOfResources)
            }
        }
    }
}

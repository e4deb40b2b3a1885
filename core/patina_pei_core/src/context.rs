//! Boot context and HOB list constructor.
//!
//! [`BootContext`] owns the permanent memory handed to the PEI core and the HOB list that lives inside it. It is
//! threaded by reference through every allocation and HOB builder, so several independent boots can be simulated in
//! one process.
//!
//! Memory is described by physical addresses. The context translates every address into an offset of its backing
//! buffer and checks it against the buffer bounds before touching memory.
//!
//! ```text
//!  memory_bottom                                                        memory_top
//!  |  PHIT | HOB | ... | END |        free memory        | allocated pages  |
//!  ^ hob_list                ^ free_memory_bottom        ^ free_memory_top
//! ```
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use patina_pi::hob::{self, header, HobList, HobRecord, PhaseHandoffInformationTable, HOB_ALIGNMENT};
use scroll::{Pwrite, LE};

use crate::{base::align_up, config::PeiCoreConfig, error::PeiCoreError};

/// Largest HOB the 16-bit length field can describe while staying 8-byte aligned.
pub const MAX_HOB_LENGTH: usize = u16::MAX as usize & !(HOB_ALIGNMENT - 1);

/// The PEI core state: permanent memory, the HOB list inside it, and the platform configuration.
pub struct BootContext<'a> {
    memory: &'a mut [u8],
    base: u64,
    hob_list: u64,
    phit: PhaseHandoffInformationTable,
    config: PeiCoreConfig,
}

impl<'a> BootContext<'a> {
    /// Creates the HOB list at the bottom of the free memory range.
    ///
    /// `memory` is the whole permanent memory range and starts at physical address `memory_base`. The free range
    /// `[free_memory_bottom, free_memory_top)` must lie inside it. The PHIT is placed at `free_memory_bottom` rounded
    /// up to 8 bytes and is followed by the end-of-list record. On return the free range starts past that record.
    ///
    /// ## Errors
    ///
    /// - [`PeiCoreError::InvalidParameter`] when the free range is not inside `memory`.
    /// - [`PeiCoreError::OutOfResources`] when the free range cannot hold the PHIT and the end-of-list record.
    pub fn new(
        memory: &'a mut [u8],
        memory_base: u64,
        free_memory_bottom: u64,
        free_memory_top: u64,
        config: PeiCoreConfig,
    ) -> Result<Self, PeiCoreError> {
        let memory_top = memory_base.checked_add(memory.len() as u64).ok_or(PeiCoreError::InvalidParameter)?;
        if memory_base > free_memory_bottom || free_memory_bottom > free_memory_top || free_memory_top > memory_top {
            log::error!(
                target: "pei_hob",
                "Free range {:#x}..{:#x} is not inside memory {:#x}..{:#x}",
                free_memory_bottom,
                free_memory_top,
                memory_base,
                memory_top
            );
            return Err(PeiCoreError::InvalidParameter);
        }

        let hob_list = align_up(free_memory_bottom, HOB_ALIGNMENT as u64).map_err(|_| PeiCoreError::OutOfResources)?;
        let end_of_hob_list = hob_list + PhaseHandoffInformationTable::SIZE as u64;
        let free_bottom = end_of_hob_list + header::Hob::SIZE as u64;
        if free_bottom > free_memory_top {
            log::error!(
                target: "pei_hob",
                "No room for the HOB list in {:#x}..{:#x}",
                free_memory_bottom,
                free_memory_top
            );
            return Err(PeiCoreError::OutOfResources);
        }

        let phit = PhaseHandoffInformationTable {
            header: header::Hob::new(hob::HANDOFF, PhaseHandoffInformationTable::SIZE as u16),
            version: config.hob_version,
            boot_mode: config.boot_mode,
            memory_top,
            memory_bottom: memory_base,
            free_memory_top,
            free_memory_bottom: free_bottom,
            end_of_hob_list,
        };

        let mut context = BootContext { memory, base: memory_base, hob_list, phit, config };
        context.write_end_of_hob_list(end_of_hob_list)?;
        context.update_phit(phit)?;

        log::info!(
            target: "pei_hob",
            "HOB list created at {:#x}, free memory {:#x}..{:#x}",
            hob_list,
            free_bottom,
            free_memory_top
        );
        Ok(context)
    }

    /// Creates a boot context over raw physical memory.
    ///
    /// ## Safety
    ///
    /// `memory_base..memory_base + memory_length` must be identity mapped, writable memory that nothing else uses for
    /// the lifetime of the returned context.
    pub unsafe fn from_physical(
        memory_base: u64,
        memory_length: u64,
        free_memory_bottom: u64,
        free_memory_top: u64,
        config: PeiCoreConfig,
    ) -> Result<BootContext<'static>, PeiCoreError> {
        let length = usize::try_from(memory_length).map_err(|_| PeiCoreError::InvalidParameter)?;
        if memory_base == 0 {
            return Err(PeiCoreError::InvalidParameter);
        }
        let memory = unsafe { core::slice::from_raw_parts_mut(memory_base as *mut u8, length) };
        BootContext::new(memory, memory_base, free_memory_bottom, free_memory_top, config)
    }

    /// Appends a HOB of `hob_type` whose length is `length` rounded up to 8 bytes.
    ///
    /// The generic header is filled in and the body is zeroed. The end-of-list record and the bottom of free memory
    /// move past the new HOB. Returns the address of the new HOB.
    ///
    /// ## Errors
    ///
    /// - [`PeiCoreError::InvalidParameter`] when `length` is shorter than a HOB header or does not fit the HOB
    ///   length field.
    /// - [`PeiCoreError::OutOfResources`] when the free memory range is too small.
    pub fn create_hob(&mut self, hob_type: u16, length: usize) -> Result<u64, PeiCoreError> {
        if length < header::Hob::SIZE || length > MAX_HOB_LENGTH {
            return Err(PeiCoreError::InvalidParameter);
        }
        let length = (length + (HOB_ALIGNMENT - 1)) & !(HOB_ALIGNMENT - 1);

        let mut phit = self.phit;
        if (self.free_memory() as usize) < length {
            log::error!(
                target: "pei_hob",
                "Out of space for HOB type {:#x} of {:#x} bytes ({:#x} free)",
                hob_type,
                length,
                self.free_memory()
            );
            return Err(PeiCoreError::OutOfResources);
        }

        let hob_address = phit.end_of_hob_list;
        let new_end = hob_address + length as u64;

        let record = self.bytes_mut(hob_address, length)?;
        record.fill(0);
        record.pwrite_with(header::Hob::new(hob_type, length as u16), 0, LE)?;
        self.write_end_of_hob_list(new_end)?;

        phit.end_of_hob_list = new_end;
        phit.free_memory_bottom = new_end + header::Hob::SIZE as u64;
        self.update_phit(phit)?;

        log::trace!(target: "pei_hob", "Created HOB type {:#x} at {:#x}, length {:#x}", hob_type, hob_address, length);
        Ok(hob_address)
    }

    /// Appends `record` as a new HOB. Returns its address.
    pub(crate) fn append_hob<R: HobRecord>(&mut self, record: R) -> Result<u64, PeiCoreError> {
        let address = self.create_hob(R::TYPE, R::SIZE)?;
        self.bytes_mut(address, R::SIZE)?.pwrite_with(record, 0, LE)?;
        Ok(address)
    }

    /// The Phase Handoff Information Table as last written.
    pub fn phit(&self) -> PhaseHandoffInformationTable {
        self.phit
    }

    /// The configuration this context was created with.
    pub fn config(&self) -> &PeiCoreConfig {
        &self.config
    }

    /// Physical address of the first HOB (the PHIT).
    pub fn hob_list_address(&self) -> u64 {
        self.hob_list
    }

    /// A validated view of the HOB list as consumers will see it.
    pub fn hob_list(&self) -> Result<HobList<'_>, PeiCoreError> {
        let length = (self.phit.end_of_hob_list - self.hob_list) as usize + header::Hob::SIZE;
        let list = HobList::new(self.bytes(self.hob_list, length)?)?;
        Ok(list)
    }

    /// Bytes between the bottom and the top of free memory.
    pub fn free_memory(&self) -> u64 {
        self.phit.free_memory_top - self.phit.free_memory_bottom
    }

    /// Borrows `length` bytes of memory at physical `address`.
    pub fn bytes(&self, address: u64, length: usize) -> Result<&[u8], PeiCoreError> {
        let offset = self.offset_of(address, length)?;
        Ok(&self.memory[offset..offset + length])
    }

    /// Mutably borrows `length` bytes of memory at physical `address`.
    pub fn bytes_mut(&mut self, address: u64, length: usize) -> Result<&mut [u8], PeiCoreError> {
        let offset = self.offset_of(address, length)?;
        Ok(&mut self.memory[offset..offset + length])
    }

    /// Moves the top of free memory. Used by the page allocator.
    pub(crate) fn set_free_memory_top(&mut self, free_memory_top: u64) -> Result<(), PeiCoreError> {
        let mut phit = self.phit;
        phit.free_memory_top = free_memory_top;
        self.update_phit(phit)
    }

    fn offset_of(&self, address: u64, length: usize) -> Result<usize, PeiCoreError> {
        let offset = address.checked_sub(self.base).ok_or(PeiCoreError::InvalidAddress)?;
        let offset = usize::try_from(offset).map_err(|_| PeiCoreError::InvalidAddress)?;
        match offset.checked_add(length) {
            Some(end) if end <= self.memory.len() => Ok(offset),
            _ => Err(PeiCoreError::InvalidAddress),
        }
    }

    fn write_end_of_hob_list(&mut self, address: u64) -> Result<(), PeiCoreError> {
        self.bytes_mut(address, header::Hob::SIZE)?.pwrite_with(
            header::Hob::new(hob::END_OF_HOB_LIST, header::Hob::SIZE as u16),
            0,
            LE,
        )?;
        Ok(())
    }

    fn update_phit(&mut self, phit: PhaseHandoffInformationTable) -> Result<(), PeiCoreError> {
        debug_assert!(phit.is_consistent(), "PHIT ranges out of order: {phit:?}");
        debug_assert!(phit.end_of_hob_list + header::Hob::SIZE as u64 == phit.free_memory_bottom);
        let hob_list = self.hob_list;
        self.bytes_mut(hob_list, PhaseHandoffInformationTable::SIZE)?.pwrite_with(phit, 0, LE)?;
        self.phit = phit;
        Ok(())
    }
}

impl core::fmt::Debug for BootContext<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BootContext")
            .field("base", &format_args!("{:#x}", self.base))
            .field("hob_list", &format_args!("{:#x}", self.hob_list))
            .field("phit", &self.phit)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patina_pi::hob::Hob;

    const BASE: u64 = 0x8000_0000;

    #[test]
    fn new_places_phit_and_end_marker() {
        let mut memory = vec![0xAAu8; 0x4000];
        let ctx = BootContext::new(&mut memory, BASE, BASE + 4, BASE + 0x4000, PeiCoreConfig::default()).unwrap();

        assert_eq!(ctx.hob_list_address(), BASE + 8);
        let phit = ctx.phit();
        assert_eq!(phit.memory_bottom, BASE);
        assert_eq!(phit.memory_top, BASE + 0x4000);
        assert_eq!(phit.end_of_hob_list, BASE + 8 + 56);
        assert_eq!(phit.free_memory_bottom, BASE + 8 + 64);
        assert_eq!(phit.free_memory_top, BASE + 0x4000);
        assert_eq!(phit.version, 0x0009);

        let list = ctx.hob_list().unwrap();
        assert_eq!(list.size(), 64);
        assert_eq!(list.phit(), phit);
        assert_eq!(list.iter().count(), 1);
    }

    #[test]
    fn free_range_must_be_inside_memory() {
        let mut memory = vec![0u8; 0x1000];
        let result = BootContext::new(&mut memory, BASE, BASE, BASE + 0x2000, PeiCoreConfig::default());
        assert_eq!(result.err(), Some(PeiCoreError::InvalidParameter));

        let mut memory = vec![0u8; 0x1000];
        let result = BootContext::new(&mut memory, BASE, BASE + 0x800, BASE + 0x400, PeiCoreConfig::default());
        assert_eq!(result.err(), Some(PeiCoreError::InvalidParameter));
    }

    #[test]
    fn new_fails_when_phit_does_not_fit() {
        let mut memory = vec![0u8; 0x1000];
        let result = BootContext::new(&mut memory, BASE, BASE, BASE + 32, PeiCoreConfig::default());
        assert_eq!(result.err(), Some(PeiCoreError::OutOfResources));
    }

    #[test]
    fn create_hob_moves_end_marker() {
        let mut memory = vec![0u8; 0x1000];
        let mut ctx = BootContext::new(&mut memory, BASE, BASE, BASE + 0x1000, PeiCoreConfig::default()).unwrap();
        let before = ctx.phit();

        let address = ctx.create_hob(hob::GUID_EXTENSION, 27).unwrap();
        assert_eq!(address, before.end_of_hob_list);

        let after = ctx.phit();
        assert_eq!(after.end_of_hob_list, address + 32);
        assert_eq!(after.free_memory_bottom, address + 40);
        assert_eq!(after.free_memory_top, before.free_memory_top);

        let list = ctx.hob_list().unwrap();
        assert_eq!(list.size(), 64 + 32);
        assert!(matches!(list.iter().nth(1), Some(Hob::GuidHob(_, data)) if data == [0u8; 8]));
    }

    #[test]
    fn create_hob_rejects_bad_lengths() {
        let mut memory = vec![0u8; 0x1000];
        let mut ctx = BootContext::new(&mut memory, BASE, BASE, BASE + 0x1000, PeiCoreConfig::default()).unwrap();
        assert_eq!(ctx.create_hob(hob::CPU, 4), Err(PeiCoreError::InvalidParameter));
        assert_eq!(ctx.create_hob(hob::MEMORY_POOL, 0x10000), Err(PeiCoreError::InvalidParameter));
    }

    #[test]
    fn create_hob_fails_when_free_memory_is_exhausted() {
        let mut memory = vec![0u8; 0x100];
        let mut ctx = BootContext::new(&mut memory, BASE, BASE, BASE + 0x100, PeiCoreConfig::default()).unwrap();
        let before = ctx.phit();
        assert_eq!(ctx.free_memory(), 0x100 - 64);
        assert_eq!(ctx.create_hob(hob::MEMORY_POOL, 0x100), Err(PeiCoreError::OutOfResources));
        assert_eq!(ctx.phit(), before);
        assert!(ctx.create_hob(hob::MEMORY_POOL, 0x100 - 64).is_ok());
        assert_eq!(ctx.free_memory(), 0);
    }

    #[test]
    fn bytes_are_bounds_checked() {
        let mut memory = vec![0u8; 0x1000];
        let mut ctx = BootContext::new(&mut memory, BASE, BASE, BASE + 0x1000, PeiCoreConfig::default()).unwrap();
        assert!(ctx.bytes(BASE + 0xFF0, 0x10).is_ok());
        assert_eq!(ctx.bytes(BASE + 0xFF0, 0x11).err(), Some(PeiCoreError::InvalidAddress));
        assert_eq!(ctx.bytes(BASE - 1, 1).err(), Some(PeiCoreError::InvalidAddress));
        assert_eq!(ctx.bytes_mut(u64::MAX, 2).err(), Some(PeiCoreError::InvalidAddress));
    }

    #[test]
    fn contexts_are_independent() {
        let mut first_memory = vec![0u8; 0x1000];
        let mut second_memory = vec![0u8; 0x1000];
        let mut first =
            BootContext::new(&mut first_memory, BASE, BASE, BASE + 0x1000, PeiCoreConfig::default()).unwrap();
        let second =
            BootContext::new(&mut second_memory, BASE, BASE, BASE + 0x1000, PeiCoreConfig::default()).unwrap();

        first.create_hob(hob::CPU, 16).unwrap();
        assert_eq!(first.hob_list().unwrap().iter().count(), 2);
        assert_eq!(second.hob_list().unwrap().iter().count(), 1);
    }
}

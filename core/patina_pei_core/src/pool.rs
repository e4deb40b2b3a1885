//! Pool allocator.
//!
//! Each pool allocation is a memory pool HOB appended to the HOB list; the caller's buffer is the HOB body. The HOB
//! length field is 16 bits wide, so requests that do not fit a single HOB but are still within the configured
//! ceiling are served from whole pages instead, recorded by a memory allocation HOB named [`POOL_ALLOCATION_GUID`].
//!
//! Pool memory is never freed.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use patina_pi::hob::{self, header};
use r_efi::efi;

use crate::{
    base::size_to_pages,
    context::{BootContext, MAX_HOB_LENGTH},
    error::PeiCoreError,
};

/// Name of the memory allocation HOBs that back pool allocations too large for a memory pool HOB.
pub const POOL_ALLOCATION_GUID: efi::Guid =
    efi::Guid::from_fields(0x7a1c6e3d, 0x52b9, 0x4f0e, 0x9d, 0x3a, &[0x6c, 0x0e, 0x41, 0x8b, 0x27, 0xd5]);

/// Largest payload a memory pool HOB can carry.
pub const MAX_POOL_HOB_PAYLOAD: usize = MAX_HOB_LENGTH - header::Hob::SIZE;

impl BootContext<'_> {
    /// Allocates `size` bytes of pool and returns their address.
    ///
    /// ## Errors
    ///
    /// - [`PeiCoreError::PoolTooLarge`] when `size` is above the configured ceiling. Use the page allocator instead.
    /// - [`PeiCoreError::OutOfResources`] when free memory is exhausted.
    pub fn allocate_pool(&mut self, size: usize) -> Result<u64, PeiCoreError> {
        if size > self.config().max_pool_allocation {
            log::warn!(
                target: "pei_pool",
                "Pool request of {:#x} bytes is above the {:#x} byte ceiling",
                size,
                self.config().max_pool_allocation
            );
            return Err(PeiCoreError::PoolTooLarge);
        }

        if size <= MAX_POOL_HOB_PAYLOAD {
            let hob = self.create_hob(hob::MEMORY_POOL, header::Hob::SIZE + size)?;
            log::trace!(target: "pei_pool", "Allocated {:#x} pool bytes at {:#x}", size, hob);
            return Ok(hob + header::Hob::SIZE as u64);
        }

        let address = self.allocate_pages_with_hob(size_to_pages(size), efi::BOOT_SERVICES_DATA, POOL_ALLOCATION_GUID)?;
        log::debug!(target: "pei_pool", "Allocated {:#x} pool bytes from pages at {:#x}", size, address);
        Ok(address)
    }

    /// Allocates `size` bytes of zeroed pool.
    pub fn allocate_zero_pool(&mut self, size: usize) -> Result<u64, PeiCoreError> {
        let address = self.allocate_pool(size)?;
        self.bytes_mut(address, size)?.fill(0);
        Ok(address)
    }

    /// Allocates pool holding a copy of `data`.
    pub fn allocate_copy_pool(&mut self, data: &[u8]) -> Result<u64, PeiCoreError> {
        let address = self.allocate_pool(data.len())?;
        self.bytes_mut(address, data.len())?.copy_from_slice(data);
        Ok(address)
    }
}

#[cfg(test)]
mod tests {
    use patina_pi::hob::Hob;
    use scroll::{Pread, LE};

    use super::*;
    use crate::{config::PeiCoreConfig, test_support::boot_context};

    #[test]
    fn pool_follows_a_memory_pool_hob_header() {
        let mut memory = vec![0u8; 0x20000];
        let mut ctx = boot_context(&mut memory);

        for size in [0usize, 1, 24, 0x1000, MAX_POOL_HOB_PAYLOAD] {
            let end_before = ctx.phit().end_of_hob_list;
            let address = ctx.allocate_pool(size).unwrap();
            assert_eq!(address, end_before + header::Hob::SIZE as u64);

            let hob_header: header::Hob = ctx.bytes(end_before, header::Hob::SIZE).unwrap().pread_with(0, LE).unwrap();
            assert_eq!(hob_header.r#type, hob::MEMORY_POOL);
            assert!(hob_header.length as usize >= header::Hob::SIZE + size);
            assert_eq!(hob_header.length % 8, 0);

            ctx.bytes_mut(address, size).unwrap().fill(0x5A);
        }

        let pools = ctx.hob_list().unwrap().iter().filter(|hob| matches!(hob, Hob::MemoryPool(_, _))).count();
        assert_eq!(pools, 5);
    }

    #[test]
    fn pool_up_to_the_ceiling_is_writable() {
        let mut memory = vec![0u8; 0x40000];
        let mut ctx = boot_context(&mut memory);

        let address = ctx.allocate_pool(0x10000).unwrap();
        ctx.bytes_mut(address, 0x10000).unwrap().fill(0xA5);

        let list = ctx.hob_list().unwrap();
        let backing = list
            .iter()
            .find_map(|hob| match hob {
                Hob::MemoryAllocation(allocation) if allocation.alloc_descriptor.name == POOL_ALLOCATION_GUID => {
                    Some(allocation)
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(backing.alloc_descriptor.memory_base_address, address);
        assert_eq!(backing.alloc_descriptor.memory_length, 0x10000);
        assert_eq!(backing.alloc_descriptor.memory_type, efi::BOOT_SERVICES_DATA);
    }

    #[test]
    fn pool_above_the_ceiling_always_fails() {
        let mut memory = vec![0u8; 0x40000];
        let mut ctx = boot_context(&mut memory);
        let before = ctx.phit();
        for size in [0x10001usize, 0x20000, usize::MAX] {
            assert_eq!(ctx.allocate_pool(size), Err(PeiCoreError::PoolTooLarge));
        }
        assert_eq!(ctx.phit(), before);
        assert_eq!(efi::Status::from(PeiCoreError::PoolTooLarge), efi::Status::OUT_OF_RESOURCES);
    }

    #[test]
    fn ceiling_is_configurable() {
        let mut memory = vec![0u8; 0x4000];
        let config = PeiCoreConfig { max_pool_allocation: 0x100, ..Default::default() };
        let base = crate::test_support::BASE;
        let mut ctx = BootContext::new(&mut memory, base, base, base + 0x4000, config).unwrap();
        assert!(ctx.allocate_pool(0x100).is_ok());
        assert_eq!(ctx.allocate_pool(0x101), Err(PeiCoreError::PoolTooLarge));
    }

    #[test]
    fn pool_exhaustion_is_reported() {
        let mut memory = vec![0u8; 0x100];
        let mut ctx = boot_context(&mut memory);
        assert_eq!(ctx.allocate_pool(0x100), Err(PeiCoreError::OutOfResources));
    }

    #[test]
    fn zero_and_copy_pool() {
        let mut memory = vec![0xFFu8; 0x1000];
        let mut ctx = boot_context(&mut memory);

        let zeroed = ctx.allocate_zero_pool(16).unwrap();
        assert_eq!(ctx.bytes(zeroed, 16).unwrap(), &[0u8; 16]);

        let copied = ctx.allocate_copy_pool(b"firmware").unwrap();
        assert_eq!(ctx.bytes(copied, 8).unwrap(), b"firmware");
    }
}

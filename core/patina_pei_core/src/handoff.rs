//! Hand-off to the DXE core.
//!
//! The last act of the PEI core: publish the DXE core image and a fresh stack in the HOB list, check that the list
//! a consumer will walk is well formed, and jump to the DXE entry point with the HOB list address as its only
//! argument. The jump is performed by a [`DxeTrampoline`], so the sequence can be exercised without leaving the
//! process.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use patina_pi::hob::{header, HobError, HOB_MEMORY_ALLOC_STACK_GUID};
use r_efi::efi;

#[cfg(any(test, feature = "mockall"))]
use mockall::automock;

use crate::{
    base::{align_down, pages_to_size, size_to_pages},
    context::BootContext,
    error::PeiCoreError,
};

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        mod x64;
        pub use x64::X64Trampoline as ArchTrampoline;
    } else {
        mod null;
        pub use null::NullTrampoline as ArchTrampoline;
    }
}

/// Stack alignment required by the DXE entry point calling convention.
pub const STACK_ALIGNMENT: u64 = 16;

/// Transfers control to the next phase.
///
/// Implementations receive only the entry point, the HOB list address and the top of the new stack. They never call
/// back into the allocator.
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait DxeTrampoline {
    /// Switches to `stack_top` and calls `entry_point` with `hob_list` as its argument. Returns only if the entry
    /// point returns.
    fn transfer(&self, entry_point: u64, hob_list: u64, stack_top: u64);
}

/// The DXE core image, already loaded into memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DxeImage {
    /// File name GUID of the image.
    pub module_name: efi::Guid,
    /// Page aligned base of the loaded image.
    pub image_base: u64,
    /// Page aligned size of the loaded image.
    pub image_size: u64,
    /// Entry point inside the loaded image.
    pub entry_point: u64,
}

/// Where control goes at the hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handoff {
    pub entry_point: u64,
    pub hob_list: u64,
    pub stack_top: u64,
}

/// Finishes the HOB list and transfers control to the DXE core.
///
/// Only returns on failure: either the hand-off could not be prepared, or the DXE entry point returned
/// ([`PeiCoreError::HandoffReturned`]).
pub fn hand_off_to_dxe<T: DxeTrampoline + ?Sized>(
    ctx: &mut BootContext<'_>,
    image: &DxeImage,
    trampoline: &T,
) -> PeiCoreError {
    let handoff = match prepare_handoff(ctx, image) {
        Ok(handoff) => handoff,
        Err(err) => {
            log::error!(target: "pei_handoff", "Failed to prepare DXE hand-off: {:?}", err);
            return err;
        }
    };

    log::info!(
        target: "pei_handoff",
        "Jumping to DXE core at {:#x}, HOB list {:#x}, stack top {:#x}",
        handoff.entry_point,
        handoff.hob_list,
        handoff.stack_top
    );
    trampoline.transfer(handoff.entry_point, handoff.hob_list, handoff.stack_top);

    log::error!(target: "pei_handoff", "DXE core returned to PEI");
    PeiCoreError::HandoffReturned
}

/// Publishes the DXE image and stack, then validates the finished HOB list.
pub fn prepare_handoff(ctx: &mut BootContext<'_>, image: &DxeImage) -> Result<Handoff, PeiCoreError> {
    let image_end = image.image_base.checked_add(image.image_size).ok_or(PeiCoreError::InvalidParameter)?;
    if !(image.image_base..image_end).contains(&image.entry_point) {
        log::error!(
            target: "pei_handoff",
            "Entry point {:#x} is outside the DXE image {:#x}..{:#x}",
            image.entry_point,
            image.image_base,
            image_end
        );
        return Err(PeiCoreError::InvalidParameter);
    }
    ctx.build_module_hob(&image.module_name, image.image_base, image.image_size, image.entry_point)?;

    let stack_pages = size_to_pages(ctx.config().dxe_stack_size);
    let stack_base = ctx.allocate_pages_with_hob(stack_pages, efi::BOOT_SERVICES_DATA, HOB_MEMORY_ALLOC_STACK_GUID)?;
    let stack_size = pages_to_size(stack_pages).ok_or(PeiCoreError::OutOfResources)? as u64;
    let stack_top = align_down(stack_base + stack_size, STACK_ALIGNMENT).map_err(|_| PeiCoreError::InvalidParameter)?;

    let hob_list_address = ctx.hob_list_address();
    let phit = ctx.phit();
    let hob_list = ctx.hob_list()?;
    if hob_list.size() as u64 != phit.end_of_hob_list + header::Hob::SIZE as u64 - hob_list_address {
        log::error!(target: "pei_handoff", "HOB list ends before the PHIT end-of-list address");
        return Err(HobError::Truncated { offset: hob_list.size() }.into());
    }

    log::info!(
        target: "pei_handoff",
        "Memory {:#x}..{:#x}, free {:#x}..{:#x}, HOB list {:#x}..{:#x}",
        phit.memory_bottom,
        phit.memory_top,
        phit.free_memory_bottom,
        phit.free_memory_top,
        hob_list_address,
        phit.end_of_hob_list
    );
    log::debug!(target: "pei_handoff", "{:?}", hob_list);

    Ok(Handoff { entry_point: image.entry_point, hob_list: hob_list_address, stack_top })
}

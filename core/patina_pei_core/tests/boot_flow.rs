//! End to end PEI boot flow.
//!
//! Builds the HOB list a platform would publish, allocates from permanent memory, hands off to a recording
//! trampoline, then walks the HOB list the way the DXE core would.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use std::cell::Cell;

use patina_pei_core::{
    base::SIZE_128KB, build_variable_flash_info_hob, hand_off_to_dxe, handoff::Handoff, BootContext, DxeImage,
    DxeTrampoline, PeiCoreConfig, PeiCoreError,
};
use patina_pi::{
    hob::{self, Hob, HobList, HOB_MEMORY_ALLOC_MODULE_GUID, HOB_MEMORY_ALLOC_STACK_GUID},
    variable::{VariableAlignment, VariableAttributes, VariableFlashInfo},
    BootMode,
};
use patina_variable_store::{format_nv_storage, open_nv_storage};
use r_efi::efi;

const MEMORY_BASE: u64 = 0x8000_0000;
const MEMORY_SIZE: usize = 0x80000;
const FLASH_SIZE: usize = 0x10000;

const DXE_CORE_GUID: efi::Guid =
    efi::Guid::from_fields(0xd6a2cb7f, 0x6a18, 0x4e2f, 0xb4, 0x3b, &[0x99, 0x20, 0xa7, 0x33, 0x70, 0x0a]);
const PLATFORM_GUID: efi::Guid =
    efi::Guid::from_fields(0x3a4f9c21, 0x77e0, 0x4d6b, 0x8a, 0x5c, &[0x10, 0x20, 0x30, 0x40, 0x50, 0x60]);
const GLOBAL_VARIABLE: efi::Guid =
    efi::Guid::from_fields(0x8be4df61, 0x93ca, 0x11d2, 0xaa, 0x0d, &[0x00, 0xe0, 0x98, 0x03, 0x2b, 0x8c]);

/// Records the hand-off instead of jumping.
#[derive(Default)]
struct RecordingTrampoline {
    handoff: Cell<Option<Handoff>>,
}

impl DxeTrampoline for RecordingTrampoline {
    fn transfer(&self, entry_point: u64, hob_list: u64, stack_top: u64) {
        self.handoff.set(Some(Handoff { entry_point, hob_list, stack_top }));
    }
}

fn hob_list<'a>(ctx: &'a BootContext<'_>, address: u64) -> HobList<'a> {
    let length = ctx.phit().end_of_hob_list + hob::header::Hob::SIZE as u64 - address;
    HobList::new(ctx.bytes(address, length as usize).unwrap()).unwrap()
}

#[test]
fn platform_hobs_reach_dxe() {
    let mut memory = vec![0u8; MEMORY_SIZE];
    let config = PeiCoreConfig { boot_mode: BootMode::BOOT_WITH_FULL_CONFIGURATION, ..Default::default() };
    let mut ctx =
        BootContext::new(&mut memory, MEMORY_BASE, MEMORY_BASE, MEMORY_BASE + MEMORY_SIZE as u64, config).unwrap();

    // Platform initialization.
    ctx.build_resource_descriptor_hob(
        hob::EFI_RESOURCE_SYSTEM_MEMORY,
        hob::TESTED_MEMORY_ATTRIBUTES,
        MEMORY_BASE,
        MEMORY_SIZE as u64,
    )
    .unwrap();
    ctx.build_cpu_hob(48, 16).unwrap();
    ctx.build_fv_hob(0xFF80_0000, 0x40_0000).unwrap();
    ctx.build_guid_data_hob(&PLATFORM_GUID, b"board-rev-3").unwrap();

    // Non-volatile storage, formatted on first boot and described to DXE.
    let mut flash = vec![0u8; FLASH_SIZE];
    let flash_base = 0xFFE0_0000u64;
    {
        let mut store = format_nv_storage(&mut flash, 0x1000, VariableAlignment::X86).unwrap();
        let attributes = VariableAttributes::NON_VOLATILE | VariableAttributes::BOOTSERVICE_ACCESS;
        store.set_variable("Timeout", &GLOBAL_VARIABLE, attributes, &[3, 0]).unwrap();
    }
    let flash_info = VariableFlashInfo {
        version: VariableFlashInfo::VERSION,
        nv_variable_base_address: flash_base,
        nv_variable_length: FLASH_SIZE as u64,
        ..Default::default()
    };
    build_variable_flash_info_hob(&mut ctx, &flash_info).unwrap();

    // Early allocations.
    let scratch = ctx.allocate_typed_pages(2, efi::BOOT_SERVICES_DATA).unwrap();
    ctx.bytes_mut(scratch, 0x2000).unwrap().fill(0xCC);
    let table = ctx.allocate_copy_pool(b"ACPI").unwrap();
    assert_eq!(ctx.bytes(table, 4).unwrap(), b"ACPI");

    // Load the DXE core.
    let image_base = ctx.allocate_pages(4).unwrap();
    let image = DxeImage {
        module_name: DXE_CORE_GUID,
        image_base,
        image_size: 0x4000,
        entry_point: image_base + 0x1000,
    };

    let trampoline = RecordingTrampoline::default();
    assert_eq!(hand_off_to_dxe(&mut ctx, &image, &trampoline), PeiCoreError::HandoffReturned);
    let handoff = trampoline.handoff.get().unwrap();
    assert_eq!(handoff.entry_point, image.entry_point);
    assert_eq!(handoff.hob_list, ctx.hob_list_address());
    assert_eq!(handoff.stack_top % 16, 0);

    // DXE side: walk the list from the address it was given.
    let list = hob_list(&ctx, handoff.hob_list);
    let phit = list.phit();
    assert_eq!(phit.boot_mode, BootMode::BOOT_WITH_FULL_CONFIGURATION);
    assert!(phit.free_memory_bottom <= phit.free_memory_top);
    assert_eq!(phit.memory_bottom, MEMORY_BASE);

    let mut stack = None;
    let mut module = None;
    let mut resources = 0;
    for hob in &list {
        match hob {
            Hob::ResourceDescriptor(resource) => {
                assert_eq!(resource.physical_start, MEMORY_BASE);
                resources += 1;
            }
            Hob::MemoryAllocation(allocation) if allocation.alloc_descriptor.name == HOB_MEMORY_ALLOC_STACK_GUID => {
                stack = Some(allocation.alloc_descriptor)
            }
            Hob::MemoryAllocationModule(allocation) => {
                assert_eq!(allocation.alloc_descriptor.name, HOB_MEMORY_ALLOC_MODULE_GUID);
                module = Some(allocation)
            }
            _ => {}
        }
    }
    assert_eq!(resources, 1);

    let stack = stack.unwrap();
    assert_eq!(stack.memory_length, SIZE_128KB as u64);
    assert_eq!(handoff.stack_top, stack.memory_base_address + stack.memory_length);
    assert!(stack.memory_base_address >= phit.free_memory_top);

    let module = module.unwrap();
    assert_eq!(module.module_name, DXE_CORE_GUID);
    assert_eq!(module.entry_point, image.entry_point);
    assert_eq!(module.alloc_descriptor.memory_base_address, image_base);

    let platform: Vec<&[u8]> = list.guid_hobs(&PLATFORM_GUID).collect();
    assert_eq!(&platform[0][..11], b"board-rev-3");

    // The variable driver finds its store through the flash info HOB.
    let info = VariableFlashInfo::from_hob_list(&list).unwrap();
    assert_eq!(info, flash_info);
    let offset = (info.nv_variable_base_address - flash_base) as usize;
    let store = open_nv_storage(&mut flash[offset..offset + info.nv_variable_length as usize], VariableAlignment::X86)
        .unwrap();
    assert_eq!(store.get_variable("Timeout", &GLOBAL_VARIABLE).unwrap().data, &[3, 0]);
}

#[test]
fn allocations_never_overlap_the_hob_list() {
    let mut memory = vec![0u8; MEMORY_SIZE];
    let mut ctx = BootContext::new(
        &mut memory,
        MEMORY_BASE,
        MEMORY_BASE + 0x100,
        MEMORY_BASE + MEMORY_SIZE as u64,
        PeiCoreConfig::default(),
    )
    .unwrap();

    let mut ranges = Vec::new();
    for round in 0..16usize {
        let pages = ctx.allocate_pages(1 + round % 3).unwrap();
        ranges.push((pages, pages + ((1 + round % 3) * 0x1000) as u64));
        let pool = ctx.allocate_pool(round * 40).unwrap();
        ranges.push((pool, pool + (round * 40) as u64));
    }
    let large = ctx.allocate_pool(0x10000).unwrap();
    ranges.push((large, large + 0x10000));

    let phit = ctx.phit();
    for (start, end) in &ranges {
        let in_hob_list = *end <= phit.end_of_hob_list;
        let in_allocated_pages = *start >= phit.free_memory_top;
        assert!(in_hob_list || in_allocated_pages, "{start:#x}..{end:#x} is in free memory");
    }
    ranges.sort();
    for pair in ranges.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "{:x?} overlaps {:x?}", pair[0], pair[1]);
    }

    let list = hob_list(&ctx, ctx.hob_list_address());
    let pools = list.iter().filter(|hob| matches!(hob, Hob::MemoryPool(_, _))).count();
    assert_eq!(pools, 16);
}

#[test]
fn exhausted_memory_leaves_a_valid_hob_list() {
    let mut memory = vec![0u8; 0x8000];
    let config = PeiCoreConfig::default();
    let mut ctx = BootContext::new(&mut memory, MEMORY_BASE, MEMORY_BASE, MEMORY_BASE + 0x8000, config).unwrap();

    while ctx.allocate_pool(0x100).is_ok() {}
    assert_eq!(ctx.allocate_pages(1), Err(PeiCoreError::OutOfResources));
    assert_eq!(efi::Status::from(PeiCoreError::OutOfResources), efi::Status::OUT_OF_RESOURCES);

    let before = ctx.phit();
    let image =
        DxeImage { module_name: DXE_CORE_GUID, image_base: MEMORY_BASE, image_size: 0x1000, entry_point: MEMORY_BASE };
    let trampoline = RecordingTrampoline::default();
    assert_eq!(hand_off_to_dxe(&mut ctx, &image, &trampoline), PeiCoreError::OutOfResources);
    assert!(trampoline.handoff.get().is_none());
    assert_eq!(ctx.phit().free_memory_top, before.free_memory_top);

    let list = hob_list(&ctx, ctx.hob_list_address());
    assert!(list.iter().count() > 1);
}

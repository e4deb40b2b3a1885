//! Publishes the location of the variable store to DXE.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use patina_pi::variable::{VariableFlashInfo, VARIABLE_FLASH_INFO_HOB_GUID};
use scroll::{Pwrite, LE};

use crate::{context::BootContext, error::PeiCoreError};

/// Builds the GUID HOB carrying `info`. Returns the address of the HOB data.
pub fn build_variable_flash_info_hob(ctx: &mut BootContext<'_>, info: &VariableFlashInfo) -> Result<u64, PeiCoreError> {
    if info.nv_variable_length == 0 {
        log::error!(target: "pei_hob", "Variable store at {:#x} has no length", info.nv_variable_base_address);
        return Err(PeiCoreError::InvalidParameter);
    }
    let address = ctx.build_guid_hob(&VARIABLE_FLASH_INFO_HOB_GUID, VariableFlashInfo::SIZE)?;
    ctx.bytes_mut(address, VariableFlashInfo::SIZE)?.pwrite_with(*info, 0, LE)?;
    log::info!(
        target: "pei_hob",
        "Variable store at {:#x}, length {:#x}",
        info.nv_variable_base_address,
        info.nv_variable_length
    );
    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::boot_context;

    #[test]
    fn flash_info_round_trips_through_the_hob_list() {
        let mut memory = vec![0u8; 0x1000];
        let mut ctx = boot_context(&mut memory);
        let info = VariableFlashInfo {
            version: VariableFlashInfo::VERSION,
            nv_variable_base_address: 0xFFE0_0000,
            nv_variable_length: 0x2_0000,
            ftw_spare_base_address: 0xFFE4_0000,
            ftw_spare_length: 0x2_0000,
            ftw_working_base_address: 0xFFE2_0000,
            ftw_working_length: 0x2_0000,
            ..Default::default()
        };
        build_variable_flash_info_hob(&mut ctx, &info).unwrap();

        let list = ctx.hob_list().unwrap();
        assert_eq!(VariableFlashInfo::from_hob_list(&list), Some(info));
    }

    #[test]
    fn empty_store_is_rejected() {
        let mut memory = vec![0u8; 0x1000];
        let mut ctx = boot_context(&mut memory);
        let info = VariableFlashInfo { version: VariableFlashInfo::VERSION, ..Default::default() };
        assert_eq!(build_variable_flash_info_hob(&mut ctx, &info), Err(PeiCoreError::InvalidParameter));
    }
}

//! PEI Core Configuration
//!
//! Platform tunables for the PEI core. The values are fixed when the [`BootContext`](crate::BootContext) is created
//! and do not change for the rest of the phase.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use patina_pi::{hob::HANDOFF_TABLE_VERSION, BootMode};

use crate::base::{SIZE_128KB, SIZE_64KB};

/// PEI Core Configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeiCoreConfig {
    /// Largest request [`allocate_pool`](crate::BootContext::allocate_pool) accepts, in bytes.
    pub max_pool_allocation: usize,
    /// Size of the stack handed to the DXE core, in bytes. Rounded up to whole pages.
    pub dxe_stack_size: usize,
    /// Version written into the Phase Handoff Information Table.
    pub hob_version: u32,
    /// Boot mode written into the Phase Handoff Information Table.
    pub boot_mode: BootMode,
}

impl Default for PeiCoreConfig {
    fn default() -> Self {
        PeiCoreConfig {
            max_pool_allocation: SIZE_64KB,
            dxe_stack_size: SIZE_128KB,
            hob_version: HANDOFF_TABLE_VERSION,
            boot_mode: BootMode::BOOT_WITH_FULL_CONFIGURATION,
        }
    }
}

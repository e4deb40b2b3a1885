//! PEI Core Test Support
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use crate::{config::PeiCoreConfig, context::BootContext};

/// Physical address the test memory buffers pretend to start at.
pub(crate) const BASE: u64 = 0x8000_0000;

/// Creates a boot context whose free range covers all of `memory`.
pub(crate) fn boot_context(memory: &mut [u8]) -> BootContext<'_> {
    let top = BASE + memory.len() as u64;
    BootContext::new(memory, BASE, BASE, top, PeiCoreConfig::default()).expect("test memory holds a HOB list")
}

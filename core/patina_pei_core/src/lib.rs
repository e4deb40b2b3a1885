//! PEI Core
//!
//! The part of the PEI core that turns a range of permanent memory into the HOB list DXE boots from:
//!
//! - [`BootContext`]: owns the memory and the HOB list, and replaces the PEI services table and HOB list globals with
//!   an explicit context passed by reference.
//! - Page and pool allocation carved out of the free memory range ([`memory`], [`pool`]).
//! - HOB builders for the records DXE consumes ([`hob_builder`], [`build_variable_flash_info_hob`]).
//! - The hand-off that publishes the DXE core image and stack and jumps to DXE ([`handoff`]).
//!
//! The core runs on a single processor with interrupts disabled, so none of this is synchronized.
//!
//! ## Examples
//!
//! ```rust
//! use patina_pei_core::{BootContext, PeiCoreConfig};
//!
//! let mut memory = vec![0u8; 0x10000];
//! let base = 0x1_0000_0000;
//! let mut ctx = BootContext::new(&mut memory, base, base, base + 0x10000, PeiCoreConfig::default()).unwrap();
//!
//! let pages = ctx.allocate_pages(2).unwrap();
//! assert_eq!(pages, base + 0xE000);
//!
//! let pool = ctx.allocate_pool(64).unwrap();
//! assert!(pool < pages);
//! assert_eq!(ctx.hob_list().unwrap().iter().count(), 2);
//! ```
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
#![cfg_attr(all(not(feature = "std"), not(test), not(feature = "mockall")), no_std)]

pub mod base;
pub mod config;
pub mod context;
pub mod error;
pub mod handoff;
pub mod hob_builder;
pub mod memory;
pub mod pool;
mod variable_info;

#[cfg(test)]
mod test_support;

pub use config::PeiCoreConfig;
pub use context::BootContext;
pub use error::PeiCoreError;
pub use handoff::{hand_off_to_dxe, DxeImage, DxeTrampoline};
pub use variable_info::build_variable_flash_info_hob;

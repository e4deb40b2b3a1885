//! Monotonic counter based UEFI variable store.
//!
//! [`VariableStore`] reads and writes the variable store format that the PEI phase publishes to DXE through the
//! variable flash information HOB: a store header followed by variable records, each carrying a monotonic count.
//! Records are only ever appended and retired by clearing bits of their state byte, which matches the write
//! semantics of NOR flash. [`nv_storage`] adds the firmware volume header that wraps the store on real flash.
//!
//! ## Example
//!
//! ```
//! use patina_pi::variable::{VariableAlignment, VariableAttributes};
//! use patina_variable_store::VariableStore;
//! use r_efi::efi;
//!
//! let vendor = efi::Guid::from_fields(0x8be4df61, 0x93ca, 0x11d2, 0xaa, 0x0d, &[0x00, 0xe0, 0x98, 0x03, 0x2b, 0x8c]);
//! let attributes = VariableAttributes::NON_VOLATILE | VariableAttributes::BOOTSERVICE_ACCESS;
//!
//! let mut flash = vec![0u8; 0x1000];
//! let mut store = VariableStore::format(&mut flash, VariableAlignment::X86).unwrap();
//! store.set_variable("Timeout", &vendor, attributes, &[5, 0]).unwrap();
//! assert_eq!(store.get_variable("Timeout", &vendor).unwrap().data, &[5, 0]);
//! ```
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
#![cfg_attr(all(not(feature = "std"), not(test)), no_std)]

pub mod error;
pub mod nv_storage;
pub mod store;

pub use error::VariableStoreError;
pub use nv_storage::{format_nv_storage, open_nv_storage};
pub use store::{VariableIter, VariableName, VariableRecord, VariableStore};

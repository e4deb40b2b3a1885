//! Platform Initialization (PI) Specification definitions used across the PEI to DXE hand-off.
//!
//! This crate holds the record shapes that every boot phase must agree on:
//!
//! - [`hob`]: Hand-Off Block (HOB) records and a validated, forward-only view over a HOB list.
//! - [`variable`]: the non-volatile variable store header and monotonic-counter based variable headers.
//! - [`boot_mode`]: the boot mode carried in the Phase Handoff Information Table.
//!
//! All records are encoded and decoded field by field with [`scroll`] in little endian, so the layouts do not depend
//! on the host compiler's struct packing.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
#![cfg_attr(not(test), no_std)]

pub mod boot_mode;
pub mod guid;
pub mod hob;
pub mod variable;

pub use boot_mode::BootMode;

//! Hand-off trampoline for architectures without a DXE entry sequence.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use super::DxeTrampoline;
use crate::error::PeiCoreError;

/// Placeholder for architectures the hand-off is not implemented for.
#[derive(Debug)]
pub struct NullTrampoline {
    _private: (),
}

impl NullTrampoline {
    /// Always fails with [`PeiCoreError::Unsupported`].
    ///
    /// ## Safety
    ///
    /// Matches the signature of the architecture trampolines. Nothing is required of the caller.
    pub unsafe fn new() -> Result<Self, PeiCoreError> {
        log::error!(target: "pei_handoff", "DXE hand-off is not supported on this architecture");
        Err(PeiCoreError::Unsupported)
    }
}

impl DxeTrampoline for NullTrampoline {
    fn transfer(&self, _entry_point: u64, _hob_list: u64, _stack_top: u64) {
        log::error!(target: "pei_handoff", "DXE hand-off is not supported on this architecture");
    }
}

//! x86_64 hand-off trampoline.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use core::arch::asm;

use super::DxeTrampoline;
use crate::error::PeiCoreError;

/// Jumps to the DXE entry point using the Microsoft x64 calling convention.
///
/// The HOB list address is passed in `rcx` and 32 bytes of shadow space are reserved below the new stack top.
#[derive(Debug)]
pub struct X64Trampoline {
    _private: (),
}

impl X64Trampoline {
    /// ## Safety
    ///
    /// [`DxeTrampoline::transfer`] abandons the current stack and never returns. The caller must only invoke it with
    /// an entry point and stack that are valid for the DXE core.
    pub unsafe fn new() -> Result<Self, PeiCoreError> {
        Ok(Self { _private: () })
    }
}

impl DxeTrampoline for X64Trampoline {
    fn transfer(&self, entry_point: u64, hob_list: u64, stack_top: u64) {
        // SAFETY: construction of the trampoline is unsafe and documents the requirements on the arguments.
        unsafe {
            asm!(
                "mov rsp, {stack_top}",
                "sub rsp, 0x20",
                "call {entry_point}",
                "ud2",
                stack_top = in(reg) stack_top,
                entry_point = in(reg) entry_point,
                in("rcx") hob_list,
                options(noreturn)
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trampoline_is_available_on_x64() {
        // SAFETY: the trampoline is only constructed, never used.
        assert!(unsafe { X64Trampoline::new() }.is_ok());
    }
}

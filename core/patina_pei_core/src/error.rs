//! Error types and conversions for the PEI core.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0

use patina_pi::hob::HobError;
use r_efi::efi;

/// Error definitions for the PEI core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeiCoreError {
    /// The free memory range cannot satisfy the request.
    OutOfResources,
    /// A parameter provided to a function is invalid.
    InvalidParameter,
    /// An alignment that is neither zero nor a power of two was requested.
    InvalidAlignment,
    /// A pool allocation above the configured ceiling was requested.
    PoolTooLarge,
    /// An address falls outside of the memory owned by the boot context.
    InvalidAddress,
    /// The HOB list failed validation.
    HobListCorrupted(HobError),
    /// Control came back from the DXE entry point.
    HandoffReturned,
    /// The operation is not available on this architecture.
    Unsupported,
}

impl From<HobError> for PeiCoreError {
    fn from(value: HobError) -> Self {
        PeiCoreError::HobListCorrupted(value)
    }
}

impl From<scroll::Error> for PeiCoreError {
    fn from(_: scroll::Error) -> Self {
        PeiCoreError::InvalidAddress
    }
}

impl From<PeiCoreError> for efi::Status {
    fn from(value: PeiCoreError) -> Self {
        match value {
            PeiCoreError::OutOfResources | PeiCoreError::PoolTooLarge => efi::Status::OUT_OF_RESOURCES,
            PeiCoreError::InvalidParameter | PeiCoreError::InvalidAlignment | PeiCoreError::InvalidAddress => {
                efi::Status::INVALID_PARAMETER
            }
            PeiCoreError::HobListCorrupted(err) => err.into(),
            PeiCoreError::HandoffReturned => efi::Status::ABORTED,
            PeiCoreError::Unsupported => efi::Status::UNSUPPORTED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_efi_status() {
        assert_eq!(efi::Status::from(PeiCoreError::PoolTooLarge), efi::Status::OUT_OF_RESOURCES);
        assert_eq!(efi::Status::from(PeiCoreError::InvalidAlignment), efi::Status::INVALID_PARAMETER);
        assert_eq!(efi::Status::from(PeiCoreError::Unsupported), efi::Status::UNSUPPORTED);
        assert_eq!(
            efi::Status::from(PeiCoreError::from(HobError::Truncated { offset: 8 })),
            efi::Status::BUFFER_TOO_SMALL
        );
    }
}

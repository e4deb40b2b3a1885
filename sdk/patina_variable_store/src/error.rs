//! Error types and conversions for the variable store.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0

use r_efi::efi;

/// Error definitions for the variable store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableStoreError {
    /// The store or firmware volume header is missing or not formatted.
    InvalidHeader,
    /// A record runs past the end of the store, or the store does not fit its buffer.
    VolumeCorrupted,
    /// No committed variable has the requested name and vendor GUID.
    NotFound,
    /// A parameter provided to a function is invalid.
    InvalidParameter,
    /// The store has no room for the new record. A reclaim may free space.
    VolumeFull,
    /// The monotonic count of a write is not above the count of the stored copy.
    StaleMonotonicCount,
    /// The caller's buffer cannot hold the variable data.
    BufferTooSmall,
}

impl From<scroll::Error> for VariableStoreError {
    fn from(_: scroll::Error) -> Self {
        VariableStoreError::VolumeCorrupted
    }
}

impl From<VariableStoreError> for efi::Status {
    fn from(value: VariableStoreError) -> Self {
        match value {
            VariableStoreError::InvalidHeader | VariableStoreError::VolumeCorrupted => efi::Status::VOLUME_CORRUPTED,
            VariableStoreError::NotFound => efi::Status::NOT_FOUND,
            VariableStoreError::InvalidParameter => efi::Status::INVALID_PARAMETER,
            VariableStoreError::VolumeFull => efi::Status::OUT_OF_RESOURCES,
            VariableStoreError::StaleMonotonicCount => efi::Status::SECURITY_VIOLATION,
            VariableStoreError::BufferTooSmall => efi::Status::BUFFER_TOO_SMALL,
        }
    }
}

//! GUID helpers shared by the record codecs.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use core::fmt;

use r_efi::efi;
use scroll::{Pread, Pwrite};

/// Encoded size of an EFI_GUID.
pub const GUID_SIZE: usize = 16;

/// Reads an EFI_GUID in its on-media byte order at `offset`, advancing the offset.
pub fn read_guid(src: &[u8], offset: &mut usize) -> Result<efi::Guid, scroll::Error> {
    let bytes: &[u8] = src.gread_with(offset, GUID_SIZE)?;
    let mut raw = [0u8; GUID_SIZE];
    raw.copy_from_slice(bytes);
    Ok(efi::Guid::from_bytes(&raw))
}

/// Writes an EFI_GUID in its on-media byte order at `offset`, advancing the offset.
pub fn write_guid(dest: &mut [u8], offset: &mut usize, guid: &efi::Guid) -> Result<usize, scroll::Error> {
    dest.gwrite_with(guid.as_bytes().as_slice(), offset, ())
}

/// Displays an EFI_GUID in registry format (`xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`).
pub struct GuidFmt<'a>(pub &'a efi::Guid);

impl fmt::Display for GuidFmt<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", uuid::Uuid::from_bytes_le(*self.0.as_bytes()))
    }
}

impl fmt::Debug for GuidFmt<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_fmt_uses_registry_format() {
        let guid =
            efi::Guid::from_fields(0x4ed4bf27, 0x4092, 0x42e9, 0x80, 0x7d, &[0x52, 0x7b, 0x1d, 0x00, 0xc9, 0xbd]);
        assert_eq!(format!("{}", GuidFmt(&guid)), "4ed4bf27-4092-42e9-807d-527b1d00c9bd");
    }

    #[test]
    fn guid_codec_preserves_bytes() {
        let guid =
            efi::Guid::from_fields(0x12345678, 0x9abc, 0xdef0, 0x11, 0x22, &[0x33, 0x44, 0x55, 0x66, 0x77, 0x88]);
        let mut buffer = [0u8; 20];
        let mut offset = 2;
        write_guid(&mut buffer, &mut offset, &guid).unwrap();
        assert_eq!(offset, 18);
        assert_eq!(&buffer[2..6], &[0x78, 0x56, 0x34, 0x12]);

        let mut offset = 2;
        assert_eq!(read_guid(&buffer, &mut offset).unwrap(), guid);
        assert_eq!(offset, 18);
    }

    #[test]
    fn short_buffer_is_an_error() {
        let mut offset = 0;
        assert!(read_guid(&[0u8; 15], &mut offset).is_err());
    }
}

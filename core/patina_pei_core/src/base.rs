//! Page size constants and address alignment helpers.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!

/// Size of a page in bytes.
pub const UEFI_PAGE_SIZE: usize = 0x1000;

/// Mask of the offset bits within a page.
pub const UEFI_PAGE_MASK: usize = UEFI_PAGE_SIZE - 1;

/// Number of bits to shift to convert between pages and bytes.
pub const UEFI_PAGE_SHIFT: usize = 12;

/// 64KB, 0x10000, 2^16
pub const SIZE_64KB: usize = 0x10000;

/// 128KB, 0x20000, 2^17
pub const SIZE_128KB: usize = 0x20000;

/// Aligns the given address down to the nearest boundary specified by align.
///
/// `align` must be a power of two.
///
/// ```rust
/// use patina_pei_core::base::align_down;
///
/// assert_eq!(align_down(0x1fff, 0x1000), Ok(0x1000));
/// assert!(align_down(0x1fff, 0x1800).is_err());
/// ```
#[inline]
pub const fn align_down(addr: u64, align: u64) -> Result<u64, &'static str> {
    if !align.is_power_of_two() {
        return Err("`align` must be a power of two");
    }
    Ok(addr & !(align - 1))
}

/// Aligns the given address up to the nearest boundary specified by align.
///
/// `align` must be a power of two and the result must fit in a `u64`.
///
/// ```rust
/// use patina_pei_core::base::align_up;
///
/// assert_eq!(align_up(0x1001, 0x1000), Ok(0x2000));
/// assert!(align_up(u64::MAX, 0x1000).is_err());
/// ```
#[inline]
pub const fn align_up(addr: u64, align: u64) -> Result<u64, &'static str> {
    if !align.is_power_of_two() {
        return Err("`align` must be a power of two");
    }
    let mask = align - 1;
    match addr.checked_add(mask) {
        Some(value) => Ok(value & !mask),
        None => Err("Address overflowed while aligning up"),
    }
}

/// Number of pages needed to hold `size` bytes.
#[inline]
pub const fn size_to_pages(size: usize) -> usize {
    (size >> UEFI_PAGE_SHIFT) + if size & UEFI_PAGE_MASK != 0 { 1 } else { 0 }
}

/// Size in bytes of `pages` pages, or `None` on overflow.
#[inline]
pub const fn pages_to_size(pages: usize) -> Option<usize> {
    pages.checked_mul(UEFI_PAGE_SIZE)
}

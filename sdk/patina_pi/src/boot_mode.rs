//! Boot Mode
//!
//! The boot mode reported in the Phase Handoff Information Table. Stored as the raw 32-bit value so that values
//! outside the ones named by the PI Specification survive a decode/encode cycle.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use core::fmt;

/// EFI_BOOT_MODE
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct BootMode(pub u32);

impl BootMode {
    pub const BOOT_WITH_FULL_CONFIGURATION: BootMode = BootMode(0x00);
    pub const BOOT_WITH_MINIMAL_CONFIGURATION: BootMode = BootMode(0x01);
    pub const BOOT_ASSUMING_NO_CONFIGURATION_CHANGES: BootMode = BootMode(0x02);
    pub const BOOT_WITH_FULL_CONFIGURATION_PLUS_DIAGNOSTICS: BootMode = BootMode(0x03);
    pub const BOOT_WITH_DEFAULT_SETTINGS: BootMode = BootMode(0x04);
    pub const BOOT_ON_S4_RESUME: BootMode = BootMode(0x05);
    pub const BOOT_ON_S5_RESUME: BootMode = BootMode(0x06);
    pub const BOOT_WITH_MFG_MODE_SETTINGS: BootMode = BootMode(0x07);
    pub const BOOT_ON_S2_RESUME: BootMode = BootMode(0x10);
    pub const BOOT_ON_S3_RESUME: BootMode = BootMode(0x11);
    pub const BOOT_ON_FLASH_UPDATE: BootMode = BootMode(0x12);
    pub const BOOT_IN_RECOVERY_MODE: BootMode = BootMode(0x20);

    fn name(&self) -> Option<&'static str> {
        let name = match *self {
            Self::BOOT_WITH_FULL_CONFIGURATION => "BootWithFullConfiguration",
            Self::BOOT_WITH_MINIMAL_CONFIGURATION => "BootWithMinimalConfiguration",
            Self::BOOT_ASSUMING_NO_CONFIGURATION_CHANGES => "BootAssumingNoConfigurationChanges",
            Self::BOOT_WITH_FULL_CONFIGURATION_PLUS_DIAGNOSTICS => "BootWithFullConfigurationPlusDiagnostics",
            Self::BOOT_WITH_DEFAULT_SETTINGS => "BootWithDefaultSettings",
            Self::BOOT_ON_S4_RESUME => "BootOnS4Resume",
            Self::BOOT_ON_S5_RESUME => "BootOnS5Resume",
            Self::BOOT_WITH_MFG_MODE_SETTINGS => "BootWithMfgModeSettings",
            Self::BOOT_ON_S2_RESUME => "BootOnS2Resume",
            Self::BOOT_ON_S3_RESUME => "BootOnS3Resume",
            Self::BOOT_ON_FLASH_UPDATE => "BootOnFlashUpdate",
            Self::BOOT_IN_RECOVERY_MODE => "BootInRecoveryMode",
            _ => return None,
        };
        Some(name)
    }
}

impl From<u32> for BootMode {
    fn from(value: u32) -> Self {
        BootMode(value)
    }
}

impl From<BootMode> for u32 {
    fn from(value: BootMode) -> Self {
        value.0
    }
}

impl fmt::Debug for BootMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "BootMode(0x{:x})", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_modes_print_their_name() {
        assert_eq!(format!("{:?}", BootMode::BOOT_ON_S3_RESUME), "BootOnS3Resume");
        assert_eq!(format!("{:?}", BootMode::from(0x42)), "BootMode(0x42)");
    }

    #[test]
    fn raw_value_is_preserved() {
        let mode = BootMode::from(0xdead);
        assert_eq!(u32::from(mode), 0xdead);
    }
}

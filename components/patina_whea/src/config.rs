//! WHEA Report Configuration
//!
//! Platform inputs consumed by the pipeline. The values are owned by the platform and handed to each phase adapter
//! at construction; the pipeline never changes them.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use r_efi::efi;

/// Largest index expressible in the four hex digit `HwErrRec####` naming scheme, plus one.
pub const MAX_HW_ERR_REC_COUNT: u32 = 0x1_0000;

/// WHEA report configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WheaConfig {
    /// Largest persisted record, in bytes, the platform variable store accepts.
    pub max_record_size: usize,
    /// Number of `HwErrRec####` slots the sink may use. Clamped to [`MAX_HW_ERR_REC_COUNT`].
    pub max_record_count: u32,
    /// Whether the variable store supports `EFI_VARIABLE_HARDWARE_ERROR_RECORD`.
    pub hw_error_record_supported: bool,
    /// Device identity GUID placed in the platform ID field of every record.
    pub platform_id: efi::Guid,
    /// Byte the platform uses for an erased early storage region.
    pub early_store_fill: u8,
}

impl Default for WheaConfig {
    fn default() -> Self {
        WheaConfig {
            max_record_size: 0x400,
            max_record_count: 0x100,
            hw_error_record_supported: true,
            platform_id: efi::Guid::from_bytes(&[0; 16]),
            early_store_fill: 0,
        }
    }
}

impl WheaConfig {
    /// Returns the number of slots the sink checks, bounded by the naming scheme.
    pub fn slot_count(&self) -> u32 {
        self.max_record_count.min(MAX_HW_ERR_REC_COUNT)
    }
}

//! Status code report builders.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent

use patina_whea::{
    metadata::{BootPhase, ErrorEntryMetadata, ExtraSection, Severity, WHEA_REV_0, WHEA_RSC_DATA_TYPE_GUID},
    router::ErrorReport,
    status_code::{EfiStatusCodeData, EFI_ERROR_CODE, EFI_ERROR_MAJOR, EFI_PROGRESS_CODE},
};
use r_efi::efi;

pub const REPORTER: efi::Guid =
    efi::Guid::from_fields(0x3f1c2a9e, 0x77d0, 0x4b8e, 0x9a, 0x41, &[0x0c, 0x5e, 0x61, 0xd2, 0x83, 0x17]);
pub const VENDOR_SECTION: efi::Guid =
    efi::Guid::from_fields(0x8e6b0f52, 0x12aa, 0x4c3d, 0xb0, 0x7e, &[0x51, 0x2d, 0x9c, 0x44, 0x01, 0xfa]);

/// Status code value every test report carries.
pub const STATUS_VALUE: u32 = 0x0301_0005;

/// Wraps `body` in an `EFI_STATUS_CODE_DATA` header of the given type.
pub fn extended_data(data_type: &efi::Guid, body: &[u8]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(EfiStatusCodeData::SIZE + body.len());
    blob.extend_from_slice(&(EfiStatusCodeData::SIZE as u16).to_le_bytes());
    blob.extend_from_slice(&(body.len() as u16).to_le_bytes());
    blob.extend_from_slice(data_type.as_bytes());
    blob.extend_from_slice(body);
    blob
}

/// Extended data for a structured report tagged with `tag` in its first additional info field.
pub fn whea_data(severity: Severity, tag: u64) -> Vec<u8> {
    let mut entry = ErrorEntryMetadata::new(WHEA_REV_0, BootPhase::Pei, severity, 0);
    entry.additional_info_1 = tag;
    extended_data(&WHEA_RSC_DATA_TYPE_GUID, &entry.to_payload())
}

/// Like [`whea_data`], with a vendor section appended.
pub fn whea_data_with_section(severity: Severity, tag: u64, section: &[u8]) -> Vec<u8> {
    let mut entry = ErrorEntryMetadata::new(WHEA_REV_0, BootPhase::Pei, severity, 0);
    entry.additional_info_1 = tag;
    entry.extra_section = Some(ExtraSection { section_type: VENDOR_SECTION, data: section.to_vec() });
    entry.payload_size = entry.serialized_size() as u32;
    extended_data(&WHEA_RSC_DATA_TYPE_GUID, &entry.to_payload())
}

/// An error report carrying `data` as extended data.
pub fn error_report(data: &[u8]) -> ErrorReport<'_> {
    ErrorReport {
        code_type: EFI_ERROR_CODE | EFI_ERROR_MAJOR,
        code_value: STATUS_VALUE,
        instance: 0,
        caller_id: Some(REPORTER),
        data: Some(data),
    }
}

/// A progress report, which the pipeline ignores.
pub fn progress_report(data: &[u8]) -> ErrorReport<'_> {
    ErrorReport { code_type: EFI_PROGRESS_CODE, ..error_report(data) }
}

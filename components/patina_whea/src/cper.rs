//! CPER record builder.
//!
//! Serializes an [`ErrorEntryMetadata`] into a Common Platform Error Record: a common header, one section
//! descriptor per section, the telemetry section body and, when the entry carries one, the vendor section body.
//! All integers are little-endian.
//!
//! See UEFI Specification Appendix N, Common Platform Error Record.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{vec, vec::Vec};

use r_efi::efi;
use scroll::Pwrite;

use crate::{
    config::WheaConfig,
    error::{EfiError, Result},
    metadata::{is_zero_guid, ErrorEntryMetadata},
};

// { 0x3d61a466, 0xab40, 0x409a, { 0xa6, 0x98, 0xf3, 0x62, 0xd4, 0x64, 0xb3, 0x8f } }
pub const BOOT_ERROR_NOTIFICATION_GUID: efi::Guid =
    efi::Guid::from_fields(0x3d61a466, 0xab40, 0x409a, 0xa6, 0x98, &[0xf3, 0x62, 0xd4, 0x64, 0xb3, 0x8f]);

// { 0x414e6bdd, 0xe47b, 0x47cc, { 0xb2, 0x44, 0xbb, 0x61, 0x02, 0x0c, 0xf5, 0x16 } }
pub const HARDWARE_ERROR_VARIABLE_GUID: efi::Guid =
    efi::Guid::from_fields(0x414e6bdd, 0xe47b, 0x47cc, 0xb2, 0x44, &[0xbb, 0x61, 0x02, 0x0c, 0xf5, 0x16]);

// { 0x85183a8b, 0x9c41, 0x429c, { 0x93, 0x9c, 0x5c, 0x3c, 0x08, 0x7c, 0xa2, 0x80 } }
pub const TELEMETRY_SECTION_GUID: efi::Guid =
    efi::Guid::from_fields(0x85183a8b, 0x9c41, 0x429c, 0x93, 0x9c, &[0x5c, 0x3c, 0x08, 0x7c, 0xa2, 0x80]);

/// Identifies this subsystem as the record creator. Also the namespace of the record ID counter.
// { 0x24b38db4, 0x2e0f, 0x4b1c, { 0x98, 0x2b, 0xd3, 0xd9, 0x7b, 0x4b, 0xce, 0xd6 } }
pub const WHEA_CREATOR_GUID: efi::Guid =
    efi::Guid::from_fields(0x24b38db4, 0x2e0f, 0x4b1c, 0x98, 0x2b, &[0xd3, 0xd9, 0x7b, 0x4b, 0xce, 0xd6]);

/// 'CPER'
pub const CPER_SIGNATURE_START: u32 = 0x52455043;
pub const CPER_SIGNATURE_END: u32 = 0xFFFF_FFFF;
pub const CPER_HEADER_REVISION: u16 = 0x0101;
pub const CPER_SECTION_REVISION: u16 = 0x0100;

// Header validation bits.
pub const CPER_VALID_PLATFORM_ID: u32 = 0x0000_0001;
pub const CPER_VALID_TIMESTAMP: u32 = 0x0000_0002;
pub const CPER_VALID_PARTITION_ID: u32 = 0x0000_0004;

/// Header flag: the error was reported in a previous boot.
pub const CPER_HEADER_FLAG_PREVERR: u32 = 0x0000_0002;
/// Section flag: the section is the one most closely associated with the error.
pub const CPER_SECTION_FLAG_PRIMARY: u32 = 0x0000_0001;
/// Timestamp flag: the time came from the real time clock.
pub const CPER_TIMESTAMP_PRECISE: u8 = 0x01;

pub const CPER_HEADER_SIZE: usize = 128;
pub const CPER_SECTION_DESCRIPTOR_SIZE: usize = 72;
pub const TELEMETRY_SECTION_SIZE: usize = 56;
pub const CPER_FRU_STRING_SIZE: usize = 20;

/// Returns the size of the record built for `metadata`.
pub fn record_size(metadata: &ErrorEntryMetadata) -> usize {
    match &metadata.extra_section {
        Some(section) => {
            CPER_HEADER_SIZE + 2 * CPER_SECTION_DESCRIPTOR_SIZE + TELEMETRY_SECTION_SIZE + section.data.len()
        }
        None => CPER_HEADER_SIZE + CPER_SECTION_DESCRIPTOR_SIZE + TELEMETRY_SECTION_SIZE,
    }
}

/// Encodes a CPER timestamp. Returns zeroes when no time is available.
fn timestamp_bytes(time: Option<&efi::Time>) -> [u8; 8] {
    match time {
        Some(time) => [
            time.second,
            time.minute,
            time.hour,
            CPER_TIMESTAMP_PRECISE,
            time.day,
            time.month,
            (time.year % 100) as u8,
            (time.year / 100) as u8,
        ],
        None => [0; 8],
    }
}

struct SectionDescriptor<'a> {
    offset: u32,
    length: u32,
    flags: u32,
    section_type: &'a efi::Guid,
    severity: u32,
}

impl scroll::ctx::TryIntoCtx<scroll::Endian> for SectionDescriptor<'_> {
    type Error = scroll::Error;

    fn try_into_ctx(self, dest: &mut [u8], ctx: scroll::Endian) -> core::result::Result<usize, Self::Error> {
        let mut offset = 0;
        dest.gwrite_with(self.offset, &mut offset, ctx)?;
        dest.gwrite_with(self.length, &mut offset, ctx)?;
        dest.gwrite_with(CPER_SECTION_REVISION, &mut offset, ctx)?;
        dest.gwrite_with(0_u8, &mut offset, ctx)?; // Validation bits, no FRU data.
        dest.gwrite_with(0_u8, &mut offset, ctx)?;
        dest.gwrite_with(self.flags, &mut offset, ctx)?;
        dest.gwrite_with(self.section_type.as_bytes().as_slice(), &mut offset, ())?;
        dest.gwrite_with([0_u8; 16].as_slice(), &mut offset, ())?; // FRU ID
        dest.gwrite_with(self.severity, &mut offset, ctx)?;
        dest.gwrite_with([0_u8; CPER_FRU_STRING_SIZE].as_slice(), &mut offset, ())?;
        Ok(offset)
    }
}

fn write_record(
    record: &mut [u8],
    metadata: &ErrorEntryMetadata,
    config: &WheaConfig,
    record_id: u64,
    timestamp: Option<&efi::Time>,
) -> core::result::Result<usize, scroll::Error> {
    let le = scroll::LE;
    let severity = metadata.severity.as_cper();
    let section_count: u16 = if metadata.extra_section.is_some() { 2 } else { 1 };

    let mut validation = 0;
    if !is_zero_guid(&config.platform_id) {
        validation |= CPER_VALID_PLATFORM_ID;
    }
    if timestamp.is_some() {
        validation |= CPER_VALID_TIMESTAMP;
    }
    if !is_zero_guid(&metadata.ihv_sharing_guid) {
        validation |= CPER_VALID_PARTITION_ID;
    }

    let mut offset = 0;
    record.gwrite_with(CPER_SIGNATURE_START, &mut offset, le)?;
    record.gwrite_with(CPER_HEADER_REVISION, &mut offset, le)?;
    record.gwrite_with(CPER_SIGNATURE_END, &mut offset, le)?;
    record.gwrite_with(section_count, &mut offset, le)?;
    record.gwrite_with(severity, &mut offset, le)?;
    record.gwrite_with(validation, &mut offset, le)?;
    record.gwrite_with(record.len() as u32, &mut offset, le)?;
    record.gwrite_with(timestamp_bytes(timestamp).as_slice(), &mut offset, ())?;
    record.gwrite_with(config.platform_id.as_bytes().as_slice(), &mut offset, ())?;
    record.gwrite_with(metadata.ihv_sharing_guid.as_bytes().as_slice(), &mut offset, ())?;
    record.gwrite_with(WHEA_CREATOR_GUID.as_bytes().as_slice(), &mut offset, ())?;
    record.gwrite_with(BOOT_ERROR_NOTIFICATION_GUID.as_bytes().as_slice(), &mut offset, ())?;
    record.gwrite_with(record_id, &mut offset, le)?;
    record.gwrite_with(CPER_HEADER_FLAG_PREVERR, &mut offset, le)?;
    record.gwrite_with(0_u64, &mut offset, le)?; // Persistence information
    record.gwrite_with([0_u8; 12].as_slice(), &mut offset, ())?;

    let telemetry_offset = CPER_HEADER_SIZE + section_count as usize * CPER_SECTION_DESCRIPTOR_SIZE;
    let telemetry = SectionDescriptor {
        offset: telemetry_offset as u32,
        length: TELEMETRY_SECTION_SIZE as u32,
        flags: CPER_SECTION_FLAG_PRIMARY,
        section_type: &TELEMETRY_SECTION_GUID,
        severity,
    };
    record.gwrite_with(telemetry, &mut offset, le)?;

    if let Some(section) = &metadata.extra_section {
        let vendor = SectionDescriptor {
            offset: (telemetry_offset + TELEMETRY_SECTION_SIZE) as u32,
            length: section.data.len() as u32,
            flags: 0,
            section_type: &section.section_type,
            severity,
        };
        record.gwrite_with(vendor, &mut offset, le)?;
    }

    record.gwrite_with(metadata.module_id.as_bytes().as_slice(), &mut offset, ())?;
    record.gwrite_with(metadata.library_id.as_bytes().as_slice(), &mut offset, ())?;
    record.gwrite_with(0_u32, &mut offset, le)?;
    record.gwrite_with(metadata.error_status_value, &mut offset, le)?;
    record.gwrite_with(metadata.additional_info_1, &mut offset, le)?;
    record.gwrite_with(metadata.additional_info_2, &mut offset, le)?;

    if let Some(section) = &metadata.extra_section {
        record.gwrite_with(section.data.as_slice(), &mut offset, ())?;
    }

    Ok(offset)
}

/// Builds the CPER record for `metadata`.
///
/// `timestamp` is best effort; without it the timestamp validation bit is left clear.
pub fn build_record(
    metadata: &ErrorEntryMetadata,
    config: &WheaConfig,
    record_id: u64,
    timestamp: Option<&efi::Time>,
) -> Result<Vec<u8>> {
    let size = record_size(metadata);
    if u32::try_from(size).is_err() {
        log::error!("WHEA: Record of {:#x} bytes cannot be described.", size);
        return Err(EfiError::InvalidParameter);
    }

    let mut record = vec![0u8; size];
    match write_record(&mut record, metadata, config, record_id, timestamp) {
        Ok(written) if written == size => Ok(record),
        Ok(written) => {
            log::error!("WHEA: Record size mismatch, wrote {:#x} of {:#x} bytes.", written, size);
            Err(EfiError::InvalidParameter)
        }
        Err(err) => {
            log::error!("WHEA: Failed to build record: {:?}", err);
            Err(EfiError::InvalidParameter)
        }
    }
}

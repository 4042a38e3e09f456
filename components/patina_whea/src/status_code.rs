#![cfg_attr(rustfmt, rustfmt_skip)]
//! Status code definitions consumed by the WHEA report pipeline.
//!
//! These are the subset of the PI status code definitions needed to classify a report and to unpack the extended
//! data a caller attaches to it.
//!
//! See <https://uefi.org/specs/PI/1.8A/V3_Status_Codes.html#code-definitions>.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!

use core::mem::size_of;

use r_efi::efi;
use zerocopy::FromBytes;
use zerocopy_derive::*;

use crate::error::{EfiError, Result};

/// Status code type as passed to ReportStatusCode.
pub type EfiStatusCodeType = u32;
/// Status code value as passed to ReportStatusCode.
pub type EfiStatusCodeValue = u32;

/// Mask for extracting status code type.
pub const EFI_STATUS_CODE_TYPE_MASK:      EfiStatusCodeType = 0x000000FF;
/// Mask for extracting severity level.
pub const EFI_STATUS_CODE_SEVERITY_MASK:  EfiStatusCodeType = 0xFF000000;

/// Progress code type.
pub const EFI_PROGRESS_CODE:  EfiStatusCodeType = 0x00000001;
/// Error code type.
pub const EFI_ERROR_CODE:     EfiStatusCodeType = 0x00000002;
/// Debug code type.
pub const EFI_DEBUG_CODE:     EfiStatusCodeType = 0x00000003;

/// Minor error severity.
pub const EFI_ERROR_MINOR:        EfiStatusCodeType = 0x40000000;
/// Major error severity.
pub const EFI_ERROR_MAJOR:        EfiStatusCodeType = 0x80000000;
/// Unrecovered error severity.
pub const EFI_ERROR_UNRECOVERED:  EfiStatusCodeType = 0x90000000;
/// Uncontained error severity.
pub const EFI_ERROR_UNCONTAINED:  EfiStatusCodeType = 0xa0000000;

/// Software class.
pub const EFI_SOFTWARE:      EfiStatusCodeValue = 0x03000000;
/// OEM-specific operation code.
pub const EFI_OEM_SPECIFIC:  EfiStatusCodeValue = 0x8000;

/// Status value carried by the record synthesized when the early store overflowed.
pub const WHEA_EARLY_STORE_FULL: EfiStatusCodeValue = EFI_SOFTWARE | EFI_OEM_SPECIFIC | 0x0000_0001;

/// Returns true if the status code type carries the error code type.
pub const fn is_error_code(code_type: EfiStatusCodeType) -> bool {
    code_type & EFI_STATUS_CODE_TYPE_MASK == EFI_ERROR_CODE
}

/// Header that prefixes the extended data of a status code report (`EFI_STATUS_CODE_DATA`).
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct EfiStatusCodeData {
    /// Size of this header in bytes.
    pub header_size: u16,
    /// Size of the data following the header in bytes.
    pub size: u16,
    /// GUID identifying the format of the data that follows the header.
    pub data_type: [u8; 16],
}

impl EfiStatusCodeData {
    /// Size of the header as laid out in memory.
    pub const SIZE: usize = size_of::<Self>();
}

/// Extended data of a report, split into its declared type and the body following the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtendedData<'a> {
    /// Format GUID declared in the status code data header.
    pub data_type: efi::Guid,
    /// Bytes following the status code data header.
    pub body: &'a [u8],
}

impl<'a> ExtendedData<'a> {
    /// Splits a raw status code data blob into its header and body.
    ///
    /// Returns `Ok(None)` for an empty blob, which is treated as "no structured data". A blob whose declared
    /// header size or data size disagrees with its actual length is rejected with `InvalidParameter`.
    pub fn parse(blob: &'a [u8]) -> Result<Option<Self>> {
        if blob.is_empty() {
            return Ok(None);
        }

        let (header, _) = EfiStatusCodeData::read_from_prefix(blob).map_err(|_| EfiError::InvalidParameter)?;
        let header_size = header.header_size as usize;
        if header_size < EfiStatusCodeData::SIZE || header_size + header.size as usize != blob.len() {
            log::error!(
                "WHEA: Status code data size mismatch (header {:#x}, data {:#x}, actual {:#x}).",
                header_size,
                { header.size },
                blob.len()
            );
            return Err(EfiError::InvalidParameter);
        }

        Ok(Some(Self { data_type: efi::Guid::from_bytes(&header.data_type), body: &blob[header_size..] }))
    }
}

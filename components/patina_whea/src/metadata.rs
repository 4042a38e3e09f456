//! Canonical error entry metadata.
//!
//! [`ErrorEntryMetadata`] is the form every report takes once the router has looked at it, independent of where it
//! ends up being stored. [`WheaErrorHeader`] is its compact byte form: callers place it at the start of a report's
//! extended data, and the pipeline uses the same layout for the payload it hands across phase boundaries.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::vec::Vec;
use core::mem::size_of;

use r_efi::efi;
use zerocopy::{FromBytes, IntoBytes};
use zerocopy_derive::*;

use crate::{
    error::{EfiError, Result},
    status_code::EfiStatusCodeValue,
};

/// Extended data type GUID identifying a [`WheaErrorHeader`] payload.
// { 0x91deea05, 0x8c0a, 0x4dcd, { 0xb9, 0x1e, 0xf2, 0x1c, 0xa0, 0xc6, 0x84, 0x05 } }
pub const WHEA_RSC_DATA_TYPE_GUID: efi::Guid =
    efi::Guid::from_fields(0x91deea05, 0x8c0a, 0x4dcd, 0xb9, 0x1e, &[0xf2, 0x1c, 0xa0, 0xc6, 0x84, 0x05]);

/// Revision of the structured header understood by the early store.
pub const WHEA_REV_0: u8 = 0;
/// Revision stamped on records synthesized from unstructured reports.
pub const WHEA_REV_UNKNOWN: u8 = 0xFF;

const ZERO_GUID: efi::Guid = efi::Guid::from_bytes(&[0; 16]);

/// Returns true if the GUID is all zeroes.
pub fn is_zero_guid(guid: &efi::Guid) -> bool {
    *guid == ZERO_GUID
}

/// Boot phase that observed a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BootPhase {
    /// Pre-memory initialization.
    Pei = 0,
    /// DXE before the variable write services are available.
    Dxe = 1,
    /// DXE once the variable write services are available.
    DxeRuntime = 2,
    /// Management mode.
    Smm = 3,
}

impl BootPhase {
    /// Converts the raw byte form of a phase.
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(BootPhase::Pei),
            1 => Some(BootPhase::Dxe),
            2 => Some(BootPhase::DxeRuntime),
            3 => Some(BootPhase::Smm),
            _ => None,
        }
    }

    /// Returns true for the phases that run before non-volatile variable writes are possible.
    pub const fn is_pre_variable(self) -> bool {
        matches!(self, BootPhase::Pei | BootPhase::Dxe)
    }
}

/// Severity of a report, using the CPER encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Severity {
    /// Recoverable (non-fatal uncorrected) error.
    Recoverable = 0,
    /// Fatal error.
    Fatal = 1,
    /// Informational entry.
    Informational = 3,
}

impl Severity {
    /// Converts the raw byte form of a severity, folding anything unknown to informational.
    pub const fn normalize(raw: u8) -> Self {
        match raw {
            0 => Severity::Recoverable,
            1 => Severity::Fatal,
            _ => Severity::Informational,
        }
    }

    /// Returns the severity as written into CPER headers and section descriptors.
    pub const fn as_cper(self) -> u32 {
        self as u32
    }
}

/// Vendor section attached to an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraSection {
    /// Section type GUID written into the second section descriptor.
    pub section_type: efi::Guid,
    /// Section body, copied verbatim into the record.
    pub data: Vec<u8>,
}

/// Structured error header, as supplied in extended data and as used for the serialized payload.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct WheaErrorHeader {
    /// Must be [`WheaErrorHeader::SIGNATURE`].
    pub signature: u32,
    /// Layout revision of the entry.
    pub revision: u8,
    /// Raw [`BootPhase`].
    pub phase: u8,
    /// Raw [`Severity`].
    pub severity: u8,
    reserved1: u8,
    /// Status code value of the report.
    pub error_status_value: u32,
    reserved2: u32,
    /// Opaque caller data.
    pub additional_info_1: u64,
    /// Opaque caller data.
    pub additional_info_2: u64,
    /// Reporting module.
    pub module_id: [u8; 16],
    /// Reporting library.
    pub library_id: [u8; 16],
    /// GUID of the partner the entry may be shared with; becomes the CPER partition ID.
    pub ihv_sharing_guid: [u8; 16],
    /// Vendor section type, zero when no vendor section follows.
    pub extra_section_guid: [u8; 16],
    /// Size of the vendor section body following the header.
    pub extra_section_size: u32,
    /// Total payload size, header included.
    pub payload_size: u32,
}

impl WheaErrorHeader {
    /// Signature 'WHEA'.
    pub const SIGNATURE: u32 = 0x41454857;

    /// Size of the header in bytes.
    pub const SIZE: usize = size_of::<Self>();

    /// Creates a header with the given identification and everything else zeroed.
    pub fn new(revision: u8, phase: BootPhase, severity: Severity) -> Self {
        Self {
            signature: Self::SIGNATURE,
            revision,
            phase: phase as u8,
            severity: severity as u8,
            reserved1: 0,
            error_status_value: 0,
            reserved2: 0,
            additional_info_1: 0,
            additional_info_2: 0,
            module_id: [0; 16],
            library_id: [0; 16],
            ihv_sharing_guid: [0; 16],
            extra_section_guid: [0; 16],
            extra_section_size: 0,
            payload_size: 0,
        }
    }

    /// Reads a header from the start of `bytes`, returning it only if the signature matches.
    pub fn read(bytes: &[u8]) -> Option<(Self, &[u8])> {
        let (header, rest) = Self::read_from_prefix(bytes).ok()?;
        if header.signature != Self::SIGNATURE {
            return None;
        }
        Some((header, rest))
    }
}

/// The canonical internal form of a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEntryMetadata {
    /// Layout revision of the source entry.
    pub revision: u8,
    /// Phase that observed the report.
    pub phase: BootPhase,
    /// Severity of the report.
    pub severity: Severity,
    /// Size of the serialized payload this entry was created from or produces.
    pub payload_size: u32,
    /// Status code value of the report.
    pub error_status_value: EfiStatusCodeValue,
    /// Opaque caller data.
    pub additional_info_1: u64,
    /// Opaque caller data.
    pub additional_info_2: u64,
    /// Reporting module.
    pub module_id: efi::Guid,
    /// Reporting library.
    pub library_id: efi::Guid,
    /// Partner GUID; zero when the entry is not shared.
    pub ihv_sharing_guid: efi::Guid,
    /// Optional vendor section.
    pub extra_section: Option<ExtraSection>,
}

impl ErrorEntryMetadata {
    /// Creates an entry with zeroed identification fields.
    pub fn new(revision: u8, phase: BootPhase, severity: Severity, error_status_value: EfiStatusCodeValue) -> Self {
        Self {
            revision,
            phase,
            severity,
            payload_size: WheaErrorHeader::SIZE as u32,
            error_status_value,
            additional_info_1: 0,
            additional_info_2: 0,
            module_id: ZERO_GUID,
            library_id: ZERO_GUID,
            ihv_sharing_guid: ZERO_GUID,
            extra_section: None,
        }
    }

    /// Synthesizes the informational entry used for reports that carry no recognizable header.
    ///
    /// Raw extended data, if any, is kept as the vendor section so it still reaches the record.
    pub fn wildcard(phase: BootPhase, raw: Option<ExtraSection>) -> Self {
        let mut entry = Self::new(WHEA_REV_UNKNOWN, phase, Severity::Informational, 0);
        entry.extra_section = raw.filter(|section| !section.data.is_empty());
        entry.payload_size = entry.serialized_size() as u32;
        entry
    }

    /// Builds an entry from a structured header and the bytes that follow it.
    ///
    /// The header's declared revision is trusted. A vendor section size larger than the trailing bytes is rejected,
    /// trailing bytes beyond it are dropped.
    pub fn from_header(header: &WheaErrorHeader, trailing: &[u8], phase: BootPhase) -> Result<Self> {
        let extra_size = header.extra_section_size as usize;
        if extra_size > trailing.len() {
            log::error!("WHEA: Vendor section size {:#x} exceeds the {:#x} bytes supplied.", extra_size, trailing.len());
            return Err(EfiError::InvalidParameter);
        }
        if trailing.len() > extra_size {
            log::warn!("WHEA: Ignoring {:#x} bytes past the declared vendor section.", trailing.len() - extra_size);
        }

        let section_type = efi::Guid::from_bytes(&header.extra_section_guid);
        let extra_section = if extra_size == 0 && is_zero_guid(&section_type) {
            None
        } else {
            Some(ExtraSection { section_type, data: trailing[..extra_size].to_vec() })
        };

        let mut entry = Self {
            revision: header.revision,
            phase: BootPhase::from_raw(header.phase).unwrap_or(phase),
            severity: Severity::normalize(header.severity),
            payload_size: 0,
            error_status_value: header.error_status_value,
            additional_info_1: header.additional_info_1,
            additional_info_2: header.additional_info_2,
            module_id: efi::Guid::from_bytes(&header.module_id),
            library_id: efi::Guid::from_bytes(&header.library_id),
            ihv_sharing_guid: efi::Guid::from_bytes(&header.ihv_sharing_guid),
            extra_section,
        };
        entry.payload_size = entry.serialized_size() as u32;
        Ok(entry)
    }

    /// Overwrites the fields the observer, not the caller, is authoritative for.
    pub fn stamp(&mut self, phase: BootPhase, module_id: efi::Guid, error_status_value: EfiStatusCodeValue) {
        self.phase = phase;
        self.module_id = module_id;
        self.error_status_value = error_status_value;
    }

    /// Returns the size of the serialized payload for this entry.
    pub fn serialized_size(&self) -> usize {
        WheaErrorHeader::SIZE + self.extra_section.as_ref().map_or(0, |section| section.data.len())
    }

    /// Returns the header describing this entry.
    pub fn header(&self) -> WheaErrorHeader {
        let mut header = WheaErrorHeader::new(self.revision, self.phase, self.severity);
        header.error_status_value = self.error_status_value;
        header.additional_info_1 = self.additional_info_1;
        header.additional_info_2 = self.additional_info_2;
        header.module_id = *self.module_id.as_bytes();
        header.library_id = *self.library_id.as_bytes();
        header.ihv_sharing_guid = *self.ihv_sharing_guid.as_bytes();
        if let Some(section) = &self.extra_section {
            header.extra_section_guid = *section.section_type.as_bytes();
            header.extra_section_size = section.data.len() as u32;
        }
        header.payload_size = self.serialized_size() as u32;
        header
    }

    /// Serializes the entry into its compact payload form: header followed by the vendor section body.
    pub fn to_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.serialized_size());
        payload.extend_from_slice(self.header().as_bytes());
        if let Some(section) = &self.extra_section {
            payload.extend_from_slice(&section.data);
        }
        payload
    }

    /// Deserializes an entry previously produced by [`Self::to_payload`].
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let (header, trailing) = WheaErrorHeader::read(payload).ok_or(EfiError::InvalidParameter)?;
        if header.payload_size as usize != payload.len() {
            return Err(EfiError::InvalidParameter);
        }
        let phase = BootPhase::from_raw(header.phase).ok_or(EfiError::InvalidParameter)?;
        Self::from_header(&header, trailing, phase)
    }
}

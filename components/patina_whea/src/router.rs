//! WHEA Record Router
//!
//! Classifies an incoming status code report and decides where it may be kept right now. Fatal reports seen before
//! the variable write services exist go to the early store, since nothing else is guaranteed to survive the reset
//! that follows. Everything else is handed to the [`ReportHandler`] of the current phase.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::vec::Vec;

#[cfg(any(test, feature = "mockall"))]
use mockall::automock;
use r_efi::efi;

use crate::{
    error::Result,
    metadata::{BootPhase, ErrorEntryMetadata, ExtraSection, Severity, WheaErrorHeader, WHEA_RSC_DATA_TYPE_GUID},
    status_code::{is_error_code, EfiStatusCodeType, EfiStatusCodeValue, ExtendedData},
};

/// A status code report as delivered by the dispatcher.
#[derive(Debug, Clone, Copy)]
pub struct ErrorReport<'a> {
    /// Status code type, including severity bits.
    pub code_type: EfiStatusCodeType,
    /// Status code value.
    pub code_value: EfiStatusCodeValue,
    /// Instance number of the reporter.
    pub instance: u32,
    /// Identity of the reporting module, if known.
    pub caller_id: Option<efi::Guid>,
    /// `EFI_STATUS_CODE_DATA`-prefixed extended data, if any.
    pub data: Option<&'a [u8]>,
}

/// Where a report has to go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Not an error report; nothing to do.
    Filtered,
    /// Fatal report seen before the variable write services exist.
    EarlyStore(ErrorEntryMetadata),
    /// Report for the phase's handler, with its serialized payload.
    Handler { metadata: ErrorEntryMetadata, payload: Vec<u8> },
}

/// Consumer of the reports the router does not send to the early store.
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait ReportHandler {
    /// Takes ownership of a report. `payload` is the serialized form of `metadata`.
    fn report(&mut self, metadata: &ErrorEntryMetadata, payload: &[u8]) -> Result<()>;
}

/// Decodes the extended data of a report into metadata.
///
/// Data that does not carry a recognizable header produces an informational wildcard entry, keeping any raw body
/// as its vendor section.
pub fn decode(data: Option<&[u8]>, phase: BootPhase) -> Result<ErrorEntryMetadata> {
    let Some(extended) = ExtendedData::parse(data.unwrap_or_default())? else {
        return Ok(ErrorEntryMetadata::wildcard(phase, None));
    };

    if extended.data_type == WHEA_RSC_DATA_TYPE_GUID {
        if let Some((header, trailing)) = WheaErrorHeader::read(extended.body) {
            return ErrorEntryMetadata::from_header(&header, trailing, phase);
        }
        log::warn!("WHEA: Extended data of {:#x} bytes has no valid header.", extended.body.len());
    }

    let raw = ExtraSection { section_type: extended.data_type, data: extended.body.to_vec() };
    Ok(ErrorEntryMetadata::wildcard(phase, Some(raw)))
}

/// Decides where `report` goes when observed during `phase`.
pub fn route(report: &ErrorReport, phase: BootPhase) -> Result<Route> {
    if !is_error_code(report.code_type) {
        return Ok(Route::Filtered);
    }

    let mut metadata = decode(report.data, phase)?;
    let module_id = report.caller_id.unwrap_or(efi::Guid::from_bytes(&[0; 16]));
    metadata.stamp(phase, module_id, report.code_value);

    if metadata.severity == Severity::Fatal && phase.is_pre_variable() {
        return Ok(Route::EarlyStore(metadata));
    }

    let payload = metadata.to_payload();
    metadata.payload_size = payload.len() as u32;
    Ok(Route::Handler { metadata, payload })
}

//! WHEA Durable Sink
//!
//! Persists built records as `HwErrRec####` variables under the hardware error record namespace, where the
//! operating system picks them up. One record per variable; the first free index wins.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{vec, vec::Vec};

use r_efi::efi;

use crate::{
    config::WheaConfig,
    cper::{self, HARDWARE_ERROR_VARIABLE_GUID, WHEA_CREATOR_GUID},
    error::{EfiError, Result},
    metadata::ErrorEntryMetadata,
    router::ReportHandler,
    runtime_services::RuntimeServices,
};

const HW_ERR_REC_PREFIX: &[u8; 8] = b"HwErrRec";
const HW_ERR_REC_NAME_LEN: usize = HW_ERR_REC_PREFIX.len() + 4 + 1;

/// Name of the variable holding the last record ID handed out.
const RECORD_ID_VARIABLE_NAME: &str = "WheaRecordId";

/// Builds the null-terminated UTF-16 name `HwErrRec####` for `index`.
pub fn hw_err_rec_name(index: u16) -> [u16; HW_ERR_REC_NAME_LEN] {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut name = [0u16; HW_ERR_REC_NAME_LEN];
    for (dest, &c) in name.iter_mut().zip(HW_ERR_REC_PREFIX.iter()) {
        *dest = c as u16;
    }
    for digit in 0..4 {
        let nibble = (index >> (12 - digit * 4)) & 0xF;
        name[HW_ERR_REC_PREFIX.len() + digit] = HEX[nibble as usize] as u16;
    }
    name
}

/// Returns true if `name` is an `HwErrRec` variable name.
pub fn is_hw_err_rec_name(name: &[u16]) -> bool {
    name.len() > HW_ERR_REC_PREFIX.len()
        && name.iter().zip(HW_ERR_REC_PREFIX.iter()).all(|(&actual, &expected)| actual == expected as u16)
}

fn utf16_name(name: &str) -> Vec<u16> {
    name.encode_utf16().chain(core::iter::once(0)).collect()
}

/// Writes built records to the `HwErrRec####` variables.
pub struct DurableSink<R: RuntimeServices> {
    runtime: R,
    config: WheaConfig,
}

impl<R: RuntimeServices> DurableSink<R> {
    /// Creates a sink over the variable services.
    pub fn new(runtime: R, config: WheaConfig) -> Self {
        Self { runtime, config }
    }

    /// The variable services the sink writes through.
    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    fn record_attributes(&self) -> u32 {
        let mut attributes =
            efi::VARIABLE_NON_VOLATILE | efi::VARIABLE_BOOTSERVICE_ACCESS | efi::VARIABLE_RUNTIME_ACCESS;
        if self.config.hw_error_record_supported {
            attributes |= efi::VARIABLE_HARDWARE_ERROR_RECORD;
        }
        attributes
    }

    /// Returns the lowest `HwErrRec####` index not in use.
    ///
    /// Never checks more than the configured record count.
    pub fn find_free_slot_index(&self) -> Result<u16> {
        for index in 0..self.config.slot_count() {
            let name = hw_err_rec_name(index as u16);
            match self.runtime.variable_size(&name, &HARDWARE_ERROR_VARIABLE_GUID) {
                Err(efi::Status::NOT_FOUND) => return Ok(index as u16),
                Ok(_) => continue,
                Err(status) => {
                    log::error!("WHEA: Checking HwErrRec{:04X} failed: {:?}", index, status);
                    return Err(EfiError::from(status));
                }
            }
        }

        log::error!("WHEA: All {} HwErrRec slots are in use.", self.config.slot_count());
        Err(EfiError::OutOfResources)
    }

    /// Hands out the next record ID, persisting it. Any failure yields 0.
    fn next_record_id(&self) -> u64 {
        let name = utf16_name(RECORD_ID_VARIABLE_NAME);

        let mut counter = [0u8; 8];
        let id = match self.runtime.read_variable(&name, &WHEA_CREATOR_GUID, &mut counter) {
            Ok(size) if size == counter.len() => u64::from_le_bytes(counter).wrapping_add(1),
            Ok(_) | Err(efi::Status::BUFFER_TOO_SMALL) => {
                log::warn!("WHEA: Record ID counter does not hold a u64.");
                return 0;
            }
            Err(efi::Status::NOT_FOUND) => 1,
            Err(status) => {
                log::warn!("WHEA: Unable to read the record ID counter: {:?}", status);
                return 0;
            }
        };

        let attributes = efi::VARIABLE_NON_VOLATILE | efi::VARIABLE_BOOTSERVICE_ACCESS | efi::VARIABLE_RUNTIME_ACCESS;
        match self.runtime.write_variable(&name, &WHEA_CREATOR_GUID, attributes, &id.to_le_bytes()) {
            Ok(()) => id,
            Err(status) => {
                log::warn!("WHEA: Unable to update the record ID counter: {:?}", status);
                0
            }
        }
    }

    /// Builds the record for `metadata` and writes it to the first free slot. Returns the slot index.
    ///
    /// A failed write is not retried.
    pub fn persist(&mut self, metadata: &ErrorEntryMetadata) -> Result<u16> {
        let size = cper::record_size(metadata);
        if size == 0 || size > self.config.max_record_size {
            log::error!(
                "WHEA: Record of {:#x} bytes exceeds the {:#x} byte limit, dropping.",
                size,
                self.config.max_record_size
            );
            return Err(EfiError::InvalidParameter);
        }

        let index = self.find_free_slot_index()?;
        let record_id = self.next_record_id();
        let time = self.runtime.get_time().ok();
        let record = cper::build_record(metadata, &self.config, record_id, time.as_ref())?;

        let name = hw_err_rec_name(index);
        self.runtime.write_variable(&name, &HARDWARE_ERROR_VARIABLE_GUID, self.record_attributes(), &record).map_err(
            |status| {
                log::error!("WHEA: Writing HwErrRec{:04X} failed: {:?}", index, status);
                EfiError::from(status)
            },
        )?;

        log::info!("WHEA: Status {:#x} persisted to HwErrRec{:04X}.", metadata.error_status_value, index);
        Ok(index)
    }

    /// Deletes every `HwErrRec` variable in the hardware error namespace.
    ///
    /// Keeps going after a failed deletion; the last failure other than `NotFound` is returned.
    pub fn clear_all(&mut self) -> Result<()> {
        let mut status = Ok(());
        let mut targets = Vec::new();

        let mut name = vec![0u16];
        let mut namespace = efi::Guid::from_bytes(&[0; 16]);
        loop {
            match self.runtime.next_variable_name(&mut name, &mut namespace) {
                Ok(()) => {
                    if namespace == HARDWARE_ERROR_VARIABLE_GUID && is_hw_err_rec_name(&name) {
                        targets.push(name.clone());
                    }
                }
                Err(efi::Status::NOT_FOUND) => break,
                Err(err) => {
                    log::error!("WHEA: Variable enumeration failed: {:?}", err);
                    status = Err(EfiError::from(err));
                    break;
                }
            }
        }

        for target in targets {
            match self.runtime.write_variable(&target, &HARDWARE_ERROR_VARIABLE_GUID, 0, &[]) {
                Ok(()) | Err(efi::Status::NOT_FOUND) => {}
                Err(err) => {
                    log::error!("WHEA: Deleting a hardware error record failed: {:?}", err);
                    status = Err(EfiError::from(err));
                }
            }
        }

        status
    }
}

impl<R: RuntimeServices> ReportHandler for DurableSink<R> {
    fn report(&mut self, metadata: &ErrorEntryMetadata, _payload: &[u8]) -> Result<()> {
        self.persist(metadata).map(|_| ())
    }
}

//! WHEA Early Store
//!
//! A fixed-capacity, checksum-protected log of fatal error entries kept in a region that survives a warm reset.
//! It is the only place a fatal error can be recorded before the variable services exist.
//!
//! The region starts with an [`EarlyStoreHeader`] followed by a data region of packed, fixed-size slots. The
//! header checksum covers the header itself and the active part of the data region, so any change made outside of
//! this module is detected and the region is reinitialized before it is used again.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
mod storage;

pub use storage::{EarlyStorage, MemoryEarlyStorage};

#[cfg(any(test, feature = "mockall"))]
pub use storage::MockEarlyStorage;

use core::mem::size_of;

use r_efi::efi;
use zerocopy::{FromBytes, IntoBytes};
use zerocopy_derive::*;

use crate::{
    config::WheaConfig,
    error::{EfiError, Result},
    metadata::{BootPhase, ErrorEntryMetadata, Severity, WHEA_REV_0},
    status_code::{EfiStatusCodeValue, WHEA_EARLY_STORE_FULL},
};

/// Chunk size used when walking the region for checksums and clears.
const CHUNK_SIZE: usize = 64;

/// Header at offset 0 of the early storage region.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct EarlyStoreHeader {
    /// Must be [`EarlyStoreHeader::SIGNATURE`].
    pub signature: u32,
    /// 16-bit checksum over the header (with this field zeroed) and the active range.
    pub checksum: u16,
    /// Number of data bytes in use.
    pub active_range: u16,
    /// Non-zero once a store attempt failed for lack of space.
    pub is_full: u8,
    /// Raw [`BootPhase`] that first found the store full.
    pub full_phase: u8,
    reserved: [u8; 6],
}

impl EarlyStoreHeader {
    /// Signature 'WHES'.
    pub const SIGNATURE: u32 = 0x53454857;

    /// Size of the header in bytes.
    pub const SIZE: usize = size_of::<Self>();

    fn new() -> Self {
        Self { signature: Self::SIGNATURE, checksum: 0, active_range: 0, is_full: 0, full_phase: 0, reserved: [0; 6] }
    }
}

/// Revision 0 slot.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct EarlyStoreSlotV0 {
    /// Always [`WHEA_REV_0`]; used as the tag when scanning.
    pub revision: u8,
    reserved1: u8,
    /// Raw [`BootPhase`] of the report.
    pub phase: u8,
    reserved2: u8,
    /// Status code value of the report.
    pub error_status_value: u32,
    /// Opaque caller data.
    pub additional_info_1: u64,
    /// Opaque caller data.
    pub additional_info_2: u64,
    /// IHV sharing GUID of the report.
    pub partition_id: [u8; 16],
    /// Reporting module.
    pub module_id: [u8; 16],
}

impl EarlyStoreSlotV0 {
    /// Size of the slot in bytes.
    pub const SIZE: usize = size_of::<Self>();

    fn from_metadata(metadata: &ErrorEntryMetadata) -> Self {
        Self {
            revision: WHEA_REV_0,
            reserved1: 0,
            phase: metadata.phase as u8,
            reserved2: 0,
            error_status_value: metadata.error_status_value,
            additional_info_1: metadata.additional_info_1,
            additional_info_2: metadata.additional_info_2,
            partition_id: *metadata.ihv_sharing_guid.as_bytes(),
            module_id: *metadata.module_id.as_bytes(),
        }
    }

    fn to_metadata(self) -> ErrorEntryMetadata {
        let phase = BootPhase::from_raw(self.phase).unwrap_or(BootPhase::Pei);
        let mut entry = ErrorEntryMetadata::new(WHEA_REV_0, phase, Severity::Fatal, self.error_status_value);
        entry.additional_info_1 = self.additional_info_1;
        entry.additional_info_2 = self.additional_info_2;
        entry.ihv_sharing_guid = efi::Guid::from_bytes(&self.partition_id);
        entry.module_id = efi::Guid::from_bytes(&self.module_id);
        entry
    }
}

/// Distance the drain advances past a tag it does not understand.
pub const MIN_RECORD_SIZE: usize = EarlyStoreSlotV0::SIZE;

/// Folds a byte stream into the running 16-bit word sum. `odd` carries a pending low byte between calls.
fn sum16(mut sum: u16, odd: &mut Option<u8>, bytes: &[u8]) -> u16 {
    for &byte in bytes {
        match odd.take() {
            Some(low) => sum = sum.wrapping_add(u16::from_le_bytes([low, byte])),
            None => *odd = Some(byte),
        }
    }
    sum
}

/// The early store, layered over a platform [`EarlyStorage`] region.
///
/// Offsets taken by [`read`](Self::read), [`write`](Self::write) and [`clear`](Self::clear) are relative to the end
/// of the header.
pub struct EarlyStore<S: EarlyStorage> {
    storage: S,
    fill: u8,
}

impl<S: EarlyStorage> EarlyStore<S> {
    /// Layers the store over `storage`. Nothing is read or written until the first operation.
    pub fn new(storage: S, config: &WheaConfig) -> Self {
        Self { storage, fill: config.early_store_fill }
    }

    /// Size of the data region in bytes.
    pub fn data_capacity(&self) -> usize {
        self.storage.capacity().saturating_sub(EarlyStoreHeader::SIZE)
    }

    fn check_range(&self, offset: usize, size: usize) -> Result<usize> {
        match offset.checked_add(size) {
            Some(end) if end <= self.data_capacity() => Ok(EarlyStoreHeader::SIZE + offset),
            _ => {
                log::error!("WHEA: Early store access {:#x}+{:#x} is out of range.", offset, size);
                Err(EfiError::InvalidParameter)
            }
        }
    }

    /// Reads `buffer.len()` data bytes starting at `offset`.
    pub fn read(&self, offset: usize, buffer: &mut [u8]) -> Result<()> {
        let absolute = self.check_range(offset, buffer.len())?;
        self.storage.read(absolute, buffer)
    }

    /// Writes `data` into the data region at `offset`.
    pub fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let absolute = self.check_range(offset, data.len())?;
        self.storage.write(absolute, data)
    }

    /// Resets `size` data bytes at `offset` to the platform fill byte.
    pub fn clear(&mut self, offset: usize, size: usize) -> Result<()> {
        let mut absolute = self.check_range(offset, size)?;
        let fill = [self.fill; CHUNK_SIZE];
        let mut remaining = size;
        while remaining > 0 {
            let len = remaining.min(CHUNK_SIZE);
            self.storage.write(absolute, &fill[..len])?;
            absolute += len;
            remaining -= len;
        }
        Ok(())
    }

    fn read_header(&self) -> Result<EarlyStoreHeader> {
        let mut bytes = [0u8; EarlyStoreHeader::SIZE];
        self.storage.read(0, &mut bytes)?;
        EarlyStoreHeader::read_from_bytes(&bytes).map_err(|_| EfiError::InvalidParameter)
    }

    /// Computes the checksum that `header` must carry given the current active data.
    fn checksum(&self, header: &EarlyStoreHeader) -> Result<u16> {
        let mut zeroed = *header;
        zeroed.checksum = 0;

        let mut odd = None;
        let mut sum = sum16(0, &mut odd, zeroed.as_bytes());

        let mut chunk = [0u8; CHUNK_SIZE];
        let active = header.active_range as usize;
        let mut offset = 0;
        while offset < active {
            let len = (active - offset).min(CHUNK_SIZE);
            self.read(offset, &mut chunk[..len])?;
            sum = sum16(sum, &mut odd, &chunk[..len]);
            offset += len;
        }
        if let Some(low) = odd {
            sum = sum.wrapping_add(low as u16);
        }

        Ok(0u16.wrapping_sub(sum))
    }

    /// Stores `header` with a freshly computed checksum. Always the last step of a mutation.
    fn commit_header(&mut self, mut header: EarlyStoreHeader) -> Result<()> {
        header.checksum = self.checksum(&header)?;
        self.storage.write(0, header.as_bytes())
    }

    /// Returns the header if the region holds a trustworthy store.
    pub fn is_valid(&self) -> Option<EarlyStoreHeader> {
        if self.storage.capacity() < EarlyStoreHeader::SIZE {
            return None;
        }
        let header = self.read_header().ok()?;
        if header.signature != EarlyStoreHeader::SIGNATURE || header.active_range as usize > self.data_capacity() {
            return None;
        }
        if self.checksum(&header).ok()? != header.checksum {
            return None;
        }
        Some(header)
    }

    /// Makes the region a valid store. Does nothing if it already is one.
    pub fn init(&mut self) -> Result<()> {
        if self.storage.capacity() < EarlyStoreHeader::SIZE + MIN_RECORD_SIZE {
            log::error!("WHEA: Early storage of {:#x} bytes cannot hold a single entry.", self.storage.capacity());
            return Err(EfiError::InvalidParameter);
        }
        if self.is_valid().is_some() {
            return Ok(());
        }

        log::info!("WHEA: Early store is not valid, reinitializing.");
        self.clear(0, self.data_capacity())?;
        self.commit_header(EarlyStoreHeader::new())
    }

    /// Returns the data offset at which `size` more bytes fit.
    pub fn find_slot(&self, size: usize) -> Result<usize> {
        let header = self.is_valid().ok_or(EfiError::NotReady)?;
        let active = header.active_range as usize;
        let end = active.checked_add(size).ok_or(EfiError::OutOfResources)?;
        if end > self.data_capacity() || end > u16::MAX as usize {
            return Err(EfiError::OutOfResources);
        }
        Ok(active)
    }

    /// Extends the active range over `size` freshly written bytes.
    pub fn grow_and_rechecksum(&mut self, size: usize) -> Result<()> {
        let mut header = self.is_valid().ok_or(EfiError::NotReady)?;
        let grown = (header.active_range as usize).checked_add(size).ok_or(EfiError::OutOfResources)?;
        if grown > self.data_capacity() {
            return Err(EfiError::OutOfResources);
        }
        header.active_range = grown as u16;
        self.commit_header(header)
    }

    /// Records that the store ran out of space during `phase`. Only the first call has an effect.
    pub fn mark_full(&mut self, phase: BootPhase) -> Result<()> {
        let mut header = self.is_valid().ok_or(EfiError::NotReady)?;
        if header.is_full != 0 {
            return Ok(());
        }
        header.is_full = 1;
        header.full_phase = phase as u8;
        self.commit_header(header)
    }

    /// Appends an entry to the store.
    ///
    /// Only revision 0 entries can be stored. When the store has no room left it is marked full and the entry is
    /// dropped with `OutOfResources`.
    pub fn store_entry(&mut self, metadata: &ErrorEntryMetadata) -> Result<()> {
        if metadata.revision != WHEA_REV_0 {
            log::error!("WHEA: Early store cannot hold revision {:#x} entries, dropping.", metadata.revision);
            return Err(EfiError::Unsupported);
        }
        self.init()?;

        let slot = EarlyStoreSlotV0::from_metadata(metadata);
        let offset = match self.find_slot(EarlyStoreSlotV0::SIZE) {
            Ok(offset) => offset,
            Err(EfiError::OutOfResources) => {
                log::error!("WHEA: Early store is full, dropping status {:#x}.", metadata.error_status_value);
                self.mark_full(metadata.phase)?;
                return Err(EfiError::OutOfResources);
            }
            Err(err) => return Err(err),
        };

        self.write(offset, slot.as_bytes())?;
        self.grow_and_rechecksum(EarlyStoreSlotV0::SIZE)
    }

    /// Hands every stored entry to `callback` and empties the store.
    ///
    /// An invalid store is reinitialized and yields nothing. If the store overflowed, an informational entry
    /// recording the phase it overflowed in is produced first. The store ends up empty whatever the callback
    /// returns; the last callback failure, if any, is returned once the store is reset.
    pub fn drain<F>(&mut self, mut callback: F) -> Result<()>
    where
        F: FnMut(ErrorEntryMetadata) -> Result<()>,
    {
        let Some(mut header) = self.is_valid() else {
            log::warn!("WHEA: Early store is not valid, nothing to drain.");
            return self.init();
        };

        let mut status = Ok(());

        if header.is_full != 0 {
            status = callback(Self::full_entry(header.full_phase));
            header.is_full = 0;
            header.full_phase = 0;
            self.commit_header(header)?;
        }

        let active = header.active_range as usize;
        let mut offset = 0;
        while offset < active {
            let mut tag = [0u8; 1];
            self.read(offset, &mut tag)?;
            if tag[0] != WHEA_REV_0 {
                log::warn!("WHEA: Skipping unknown early store tag {:#x} at {:#x}.", tag[0], offset);
                offset += MIN_RECORD_SIZE;
                continue;
            }
            if offset + EarlyStoreSlotV0::SIZE > active {
                log::warn!("WHEA: Truncated early store slot at {:#x}.", offset);
                break;
            }

            let mut bytes = [0u8; EarlyStoreSlotV0::SIZE];
            self.read(offset, &mut bytes)?;
            self.clear(offset, EarlyStoreSlotV0::SIZE)?;
            let slot = EarlyStoreSlotV0::read_from_bytes(&bytes).map_err(|_| EfiError::InvalidParameter)?;

            if let Err(err) = callback(slot.to_metadata()) {
                log::error!("WHEA: Early store entry at {:#x} was not consumed: {:?}", offset, err);
                status = Err(err);
            }
            offset += EarlyStoreSlotV0::SIZE;
        }

        self.clear(0, active)?;
        header.active_range = 0;
        self.commit_header(header)?;
        status
    }

    fn full_entry(full_phase: u8) -> ErrorEntryMetadata {
        let phase = BootPhase::from_raw(full_phase).unwrap_or(BootPhase::Pei);
        let value: EfiStatusCodeValue = WHEA_EARLY_STORE_FULL;
        let mut entry = ErrorEntryMetadata::new(WHEA_REV_0, phase, Severity::Informational, value);
        entry.additional_info_1 = full_phase as u64;
        entry
    }
}

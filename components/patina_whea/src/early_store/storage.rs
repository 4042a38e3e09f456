//! Early storage backends.
//!
//! The early store lives in a small platform region that survives a warm reset and is usable before the variable
//! services exist. How that region is reached is platform specific, so the store only talks to it through
//! [`EarlyStorage`].
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use core::slice;

#[cfg(any(test, feature = "mockall"))]
use mockall::automock;
use r_efi::efi;

use crate::error::{EfiError, Result};

/// Byte access to the full early storage region, header included. Offsets are absolute.
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait EarlyStorage {
    /// Total size of the region in bytes.
    fn capacity(&self) -> usize;

    /// Fills `buffer` from the region starting at `offset`.
    fn read(&self, offset: usize, buffer: &mut [u8]) -> Result<()>;

    /// Writes `data` into the region starting at `offset`.
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()>;
}

/// Early storage over a region of memory, such as a reserved RAM range or a mapped CMOS window.
#[derive(Debug)]
pub struct MemoryEarlyStorage<'a> {
    region: &'a mut [u8],
}

impl<'a> MemoryEarlyStorage<'a> {
    /// Creates early storage over an existing buffer.
    pub fn new(region: &'a mut [u8]) -> Self {
        Self { region }
    }

    fn range(&self, offset: usize, len: usize) -> Result<core::ops::Range<usize>> {
        let end = offset.checked_add(len).ok_or(EfiError::InvalidParameter)?;
        if end > self.region.len() {
            return Err(EfiError::InvalidParameter);
        }
        Ok(offset..end)
    }
}

impl MemoryEarlyStorage<'static> {
    /// Adopts the early storage region at the provided address.
    ///
    /// ### Safety
    ///
    /// The caller must ensure `address` points to `length` bytes of memory that are readable and writable for the
    /// rest of the boot and that nothing else accesses the region while this storage is alive.
    pub unsafe fn from_address(address: efi::PhysicalAddress, length: usize) -> Option<Self> {
        let start = address as *mut u8;
        if start.is_null() || length == 0 {
            return None;
        }

        // SAFETY: Validity of the region is guaranteed by the caller.
        let region = unsafe { slice::from_raw_parts_mut(start, length) };
        Some(Self { region })
    }
}

impl EarlyStorage for MemoryEarlyStorage<'_> {
    fn capacity(&self) -> usize {
        self.region.len()
    }

    fn read(&self, offset: usize, buffer: &mut [u8]) -> Result<()> {
        let range = self.range(offset, buffer.len())?;
        buffer.copy_from_slice(&self.region[range]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let range = self.range(offset, data.len())?;
        self.region[range].copy_from_slice(data);
        Ok(())
    }
}

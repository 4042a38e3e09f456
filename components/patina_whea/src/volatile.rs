//! In-memory report handlers used before the variable write services exist.
//!
//! [`HandOffList`] collects non-fatal PEI reports in their serialized form so they can be passed forward to DXE.
//! [`VolatileBuffer`] holds DXE reports (and the replayed PEI ones) until the durable sink becomes usable.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{collections::VecDeque, vec::Vec};

use crate::{error::Result, metadata::ErrorEntryMetadata, router::ReportHandler};

/// A buffered report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolatileListEntry {
    pub metadata: ErrorEntryMetadata,
    pub payload: Vec<u8>,
}

/// Serialized PEI reports handed forward to DXE.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HandOffList {
    payloads: Vec<Vec<u8>>,
}

impl HandOffList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a list from payloads that crossed the phase boundary.
    pub fn from_payloads(payloads: Vec<Vec<u8>>) -> Self {
        Self { payloads }
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    /// The serialized payloads, oldest first.
    pub fn payloads(&self) -> impl Iterator<Item = &[u8]> {
        self.payloads.iter().map(Vec::as_slice)
    }

    pub fn into_payloads(self) -> Vec<Vec<u8>> {
        self.payloads
    }
}

impl ReportHandler for HandOffList {
    fn report(&mut self, _metadata: &ErrorEntryMetadata, payload: &[u8]) -> Result<()> {
        self.payloads.push(payload.to_vec());
        Ok(())
    }
}

/// FIFO of reports waiting for the durable sink.
#[derive(Debug, Default)]
pub struct VolatileBuffer {
    entries: VecDeque<VolatileListEntry>,
}

impl VolatileBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends the entries of a hand-off list. Payloads that no longer decode are dropped.
    pub fn replay(&mut self, list: HandOffList) {
        for payload in list.into_payloads() {
            match ErrorEntryMetadata::from_payload(&payload) {
                Ok(metadata) => self.entries.push_back(VolatileListEntry { metadata, payload }),
                Err(err) => log::error!("WHEA: Dropping undecodable hand-off entry: {:?}", err),
            }
        }
    }

    /// Removes every entry, oldest first, handing each to `callback`.
    ///
    /// A failing entry does not stop the drain; the last failure is returned.
    pub fn drain<F>(&mut self, mut callback: F) -> Result<()>
    where
        F: FnMut(&ErrorEntryMetadata, &[u8]) -> Result<()>,
    {
        let mut status = Ok(());
        while let Some(entry) = self.entries.pop_front() {
            if let Err(err) = callback(&entry.metadata, &entry.payload) {
                log::error!("WHEA: Buffered status {:#x} was not consumed: {:?}", entry.metadata.error_status_value, err);
                status = Err(err);
            }
        }
        status
    }
}

impl ReportHandler for VolatileBuffer {
    fn report(&mut self, metadata: &ErrorEntryMetadata, payload: &[u8]) -> Result<()> {
        self.entries.push_back(VolatileListEntry { metadata: metadata.clone(), payload: payload.to_vec() });
        Ok(())
    }
}

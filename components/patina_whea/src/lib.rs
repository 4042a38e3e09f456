//! WHEA Report Pipeline
//!
//! This library turns hardware error status code reports into durable, OS-consumable Common Platform Error Records
//! (CPER), across boot phases that share neither memory nor storage availability.
//!
//! ## Examples and Usage
//!
//! Each phase owns one adapter and forwards the dispatcher's callbacks to it:
//!
//! - PEI: [`adapter::PeiAdapter`] keeps fatal reports in the [`early_store`] and everything else in a
//!   [`volatile::HandOffList`] for DXE.
//! - DXE: [`adapter::DxeAdapter`] buffers reports until the variable write services exist, then drains the early
//!   store and the buffered reports into the [`sink::DurableSink`] exactly once.
//! - MM: [`adapter::SmmAdapter`] persists every report directly once the MM variable services are located.
//!
//! ```ignore
//! use patina_whea::{adapter::DxeAdapter, config::WheaConfig, early_store::MemoryEarlyStorage};
//!
//! let storage = unsafe { MemoryEarlyStorage::from_address(early_store_base, early_store_len) }.unwrap();
//! let mut whea = DxeAdapter::new(storage, runtime_services, dispatcher, boot_events, WheaConfig::default(), hand_off);
//! whea.start()?;
//! // From the status code callback:
//! whea.report(&report)?;
//! ```
//!
//! The `std` feature adds the [`parser`] module and the `whea_parser` executable for decoding persisted records.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
#![cfg_attr(all(not(test), not(feature = "std"), not(feature = "mockall")), no_std)]

extern crate alloc;

pub mod adapter;
pub mod config;
pub mod cper;
pub mod early_store;
pub mod error;
pub mod metadata;
pub mod router;
pub mod runtime_services;
pub mod sink;
pub mod status_code;
pub mod volatile;

#[cfg(feature = "std")]
pub mod parser;

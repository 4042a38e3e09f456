//! WHEA Phase Adapters
//!
//! Each boot phase owns one adapter. The adapter registers the pipeline with the phase's status code dispatcher,
//! supplies the phase identity to the router and owns the storage the phase can use. The DXE adapter also performs
//! the one-time drain of everything recorded before the variable write services became available.
//!
//! ```text
//! Idle -> Registered -> VariableServicesUnavailable -> VariableServicesReady -> Unregistered
//! ```
//!
//! PEI and MM stop at `Registered`; DXE walks the whole chain.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
mod dxe;
mod pei;
mod smm;

pub use dxe::DxeAdapter;
pub use pei::PeiAdapter;
pub use smm::SmmAdapter;

#[cfg(any(test, feature = "mockall"))]
use mockall::automock;
use r_efi::efi;

use crate::{config::WheaConfig, error::Result, metadata::BootPhase};

/// Lifecycle of a phase adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    /// Created, not yet registered with the dispatcher.
    Idle,
    /// Registered; reports are accepted.
    Registered,
    /// Registered in DXE while the variable write services are still missing.
    VariableServicesUnavailable,
    /// Variable write services are available and the early records have been drained.
    VariableServicesReady,
    /// Unregistered at exit boot services.
    Unregistered,
}

/// Per-adapter pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineContext {
    pub config: WheaConfig,
    pub phase: BootPhase,
    pub state: AdapterState,
}

impl PipelineContext {
    pub fn new(config: WheaConfig, phase: BootPhase) -> Self {
        Self { config, phase, state: AdapterState::Idle }
    }
}

/// The phase's status code dispatcher (the RSC handler protocol or PPI).
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait StatusCodeDispatcher {
    /// Registers the pipeline's report callback. `tpl` is the task priority the callback runs at, where the phase
    /// has one.
    fn register(&mut self, tpl: Option<efi::Tpl>) -> Result<()>;

    /// Removes the pipeline's report callback.
    fn unregister(&mut self) -> Result<()>;
}

/// DXE boot event registration.
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait BootEventRegistrar {
    /// Requests a call to the adapter's exit boot services notification.
    fn register_exit_boot_services(&mut self) -> Result<()>;
}

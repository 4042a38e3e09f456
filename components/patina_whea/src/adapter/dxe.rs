//! DXE adapter.
//!
//! Reports are buffered in memory until both the variable and the variable write architectural services are
//! signaled. At that point the phase becomes DXE runtime and the early store, then the volatile buffer, are drained
//! into the durable sink exactly once. Later reports go straight to the sink until exit boot services.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use r_efi::efi;

use crate::{
    config::WheaConfig,
    early_store::{EarlyStorage, EarlyStore},
    error::{EfiError, Result},
    metadata::BootPhase,
    router::{self, ErrorReport, ReportHandler, Route},
    runtime_services::RuntimeServices,
    sink::DurableSink,
    volatile::{HandOffList, VolatileBuffer},
};

use super::{AdapterState, BootEventRegistrar, PipelineContext, StatusCodeDispatcher};

pub struct DxeAdapter<S, R, D, B>
where
    S: EarlyStorage,
    R: RuntimeServices,
    D: StatusCodeDispatcher,
    B: BootEventRegistrar,
{
    context: PipelineContext,
    early_store: EarlyStore<S>,
    volatile: VolatileBuffer,
    sink: DurableSink<R>,
    dispatcher: D,
    boot_events: B,
    hand_off: Option<HandOffList>,
    variable_ready: bool,
    variable_write_ready: bool,
}

impl<S, R, D, B> DxeAdapter<S, R, D, B>
where
    S: EarlyStorage,
    R: RuntimeServices,
    D: StatusCodeDispatcher,
    B: BootEventRegistrar,
{
    /// Creates the adapter. `hand_off` holds whatever PEI passed forward.
    pub fn new(
        storage: S,
        runtime: R,
        dispatcher: D,
        boot_events: B,
        config: WheaConfig,
        hand_off: HandOffList,
    ) -> Self {
        Self {
            context: PipelineContext::new(config, BootPhase::Dxe),
            early_store: EarlyStore::new(storage, &config),
            volatile: VolatileBuffer::new(),
            sink: DurableSink::new(runtime, config),
            dispatcher,
            boot_events,
            hand_off: Some(hand_off),
            variable_ready: false,
            variable_write_ready: false,
        }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    /// The sink records are persisted through.
    pub fn sink(&self) -> &DurableSink<R> {
        &self.sink
    }

    /// Number of reports waiting for the variable write services.
    pub fn pending(&self) -> usize {
        self.volatile.len()
    }

    /// Replays the PEI hand-off list and registers with the dispatcher at `TPL_HIGH_LEVEL`.
    ///
    /// Variable service notifications that arrived earlier take effect here.
    pub fn start(&mut self) -> Result<()> {
        if self.context.state != AdapterState::Idle {
            return Ok(());
        }

        if let Some(hand_off) = self.hand_off.take() {
            log::info!("WHEA: Replaying {} entries handed off from PEI.", hand_off.len());
            self.volatile.replay(hand_off);
        }

        self.dispatcher.register(Some(efi::TPL_HIGH_LEVEL))?;
        self.context.state = AdapterState::VariableServicesUnavailable;
        log::info!("WHEA: DXE report handler registered.");
        self.flush_if_ready()
    }

    /// Dispatcher callback.
    pub fn report(&mut self, report: &ErrorReport) -> Result<()> {
        match self.context.state {
            AdapterState::Idle => return Err(EfiError::NotReady),
            AdapterState::Unregistered => return Err(EfiError::AccessDenied),
            _ => {}
        }

        match router::route(report, self.context.phase)? {
            Route::Filtered => Ok(()),
            Route::EarlyStore(metadata) => self.early_store.store_entry(&metadata),
            Route::Handler { metadata, payload } => {
                if self.context.state == AdapterState::VariableServicesReady {
                    self.sink.report(&metadata, &payload)
                } else {
                    self.volatile.report(&metadata, &payload)
                }
            }
        }
    }

    /// Signals that the variable architectural services are installed.
    pub fn notify_variable_arch_ready(&mut self) -> Result<()> {
        self.variable_ready = true;
        self.flush_if_ready()
    }

    /// Signals that the variable write architectural services are installed.
    pub fn notify_variable_write_ready(&mut self) -> Result<()> {
        self.variable_write_ready = true;
        self.flush_if_ready()
    }

    fn flush_if_ready(&mut self) -> Result<()> {
        if !(self.variable_ready && self.variable_write_ready)
            || self.context.state != AdapterState::VariableServicesUnavailable
        {
            return Ok(());
        }

        self.context.phase = BootPhase::DxeRuntime;
        self.context.state = AdapterState::VariableServicesReady;

        let sink = &mut self.sink;
        if let Err(err) = self.early_store.drain(|metadata| sink.persist(&metadata).map(|_| ())) {
            log::error!("WHEA: Early store drain incomplete: {:?}", err);
        }
        if let Err(err) = self.volatile.drain(|metadata, payload| sink.report(metadata, payload)) {
            log::error!("WHEA: Volatile buffer drain incomplete: {:?}", err);
        }

        self.boot_events.register_exit_boot_services()
    }

    /// Exit boot services notification. Later reports are refused.
    pub fn on_exit_boot_services(&mut self) -> Result<()> {
        if self.context.state == AdapterState::Unregistered {
            return Ok(());
        }
        if !self.volatile.is_empty() {
            log::warn!("WHEA: {} buffered reports were never persisted.", self.volatile.len());
        }

        self.context.state = AdapterState::Unregistered;
        self.dispatcher.unregister()
    }

    /// Deletes every persisted hardware error record.
    pub fn clear_records(&mut self) -> Result<()> {
        if self.context.state != AdapterState::VariableServicesReady {
            return Err(EfiError::NotReady);
        }
        self.sink.clear_all()
    }
}

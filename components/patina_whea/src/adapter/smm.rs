//! MM adapter.
//!
//! MM has no early store and no buffering: once the MM variable services are located every report is persisted
//! directly.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use crate::{
    config::WheaConfig,
    error::{EfiError, Result},
    metadata::BootPhase,
    router::{self, ErrorReport, Route},
    runtime_services::RuntimeServices,
    sink::DurableSink,
};

use super::{AdapterState, PipelineContext, StatusCodeDispatcher};

pub struct SmmAdapter<R: RuntimeServices, D: StatusCodeDispatcher> {
    context: PipelineContext,
    dispatcher: D,
    sink: Option<DurableSink<R>>,
}

impl<R: RuntimeServices, D: StatusCodeDispatcher> SmmAdapter<R, D> {
    pub fn new(dispatcher: D, config: WheaConfig) -> Self {
        Self { context: PipelineContext::new(config, BootPhase::Smm), dispatcher, sink: None }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    /// Called once the MM variable services are located. Registers with the dispatcher.
    pub fn on_variable_services_located(&mut self, runtime: R) -> Result<()> {
        if self.context.state != AdapterState::Idle {
            return Ok(());
        }

        self.dispatcher.register(None)?;
        self.sink = Some(DurableSink::new(runtime, self.context.config));
        self.context.state = AdapterState::Registered;
        log::info!("WHEA: MM report handler registered.");
        Ok(())
    }

    /// Dispatcher callback.
    pub fn report(&mut self, report: &ErrorReport) -> Result<()> {
        let Some(sink) = self.sink.as_mut() else {
            return Err(EfiError::NotReady);
        };

        match router::route(report, self.context.phase)? {
            Route::Filtered => Ok(()),
            Route::EarlyStore(metadata) | Route::Handler { metadata, .. } => sink.persist(&metadata).map(|_| ()),
        }
    }
}

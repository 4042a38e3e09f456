//! PEI adapter.
//!
//! Only the early store exists this early. Fatal reports go there; everything else is kept in the hand-off list
//! that DXE picks up.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use crate::{
    config::WheaConfig,
    early_store::{EarlyStorage, EarlyStore},
    error::{EfiError, Result},
    metadata::BootPhase,
    router::{self, ErrorReport, ReportHandler, Route},
    volatile::HandOffList,
};

use super::{AdapterState, PipelineContext, StatusCodeDispatcher};

pub struct PeiAdapter<S: EarlyStorage, D: StatusCodeDispatcher> {
    context: PipelineContext,
    early_store: EarlyStore<S>,
    dispatcher: D,
    hand_off: HandOffList,
}

impl<S: EarlyStorage, D: StatusCodeDispatcher> PeiAdapter<S, D> {
    pub fn new(storage: S, dispatcher: D, config: WheaConfig) -> Self {
        Self {
            context: PipelineContext::new(config, BootPhase::Pei),
            early_store: EarlyStore::new(storage, &config),
            dispatcher,
            hand_off: HandOffList::new(),
        }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    /// Prepares the early store and registers with the dispatcher.
    pub fn start(&mut self) -> Result<()> {
        if self.context.state != AdapterState::Idle {
            return Ok(());
        }

        // Non-fatal reports do not need the early store, so keep going without it.
        if let Err(err) = self.early_store.init() {
            log::error!("WHEA: Early store unavailable in PEI: {:?}", err);
        }

        self.dispatcher.register(None)?;
        self.context.state = AdapterState::Registered;
        log::info!("WHEA: PEI report handler registered.");
        Ok(())
    }

    /// Dispatcher callback.
    pub fn report(&mut self, report: &ErrorReport) -> Result<()> {
        if self.context.state != AdapterState::Registered {
            return Err(EfiError::NotReady);
        }

        match router::route(report, self.context.phase)? {
            Route::Filtered => Ok(()),
            Route::EarlyStore(metadata) => self.early_store.store_entry(&metadata),
            Route::Handler { metadata, payload } => self.hand_off.report(&metadata, &payload),
        }
    }

    /// Ends PEI, releasing the entries DXE has to pick up.
    pub fn into_hand_off(self) -> HandOffList {
        self.hand_off
    }
}

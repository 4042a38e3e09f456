//! Whole-boot tests: PEI hands off to DXE, DXE drains into the variable store once it is writable.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent

use patina_whea::{
    adapter::{AdapterState, DxeAdapter, PeiAdapter},
    config::WheaConfig,
    cper::{HARDWARE_ERROR_VARIABLE_GUID, TELEMETRY_SECTION_GUID},
    early_store::MemoryEarlyStorage,
    error::EfiError,
    metadata::{BootPhase, Severity, WHEA_RSC_DATA_TYPE_GUID},
    volatile::HandOffList,
};
use r_efi::efi;

use super::common::*;

const EARLY_STORE_SIZE: usize = 0x200;

type Dxe<'a> = DxeAdapter<MemoryEarlyStorage<'a>, VariableStore, EventLog, EventLog>;

fn dxe<'a>(backing: &'a mut [u8], variables: &VariableStore, events: &EventLog, hand_off: HandOffList) -> Dxe<'a> {
    DxeAdapter::new(
        MemoryEarlyStorage::new(backing),
        variables.clone(),
        events.clone(),
        events.clone(),
        WheaConfig::default(),
        hand_off,
    )
}

fn bring_up_variable_services(adapter: &mut Dxe) {
    adapter.notify_variable_arch_ready().unwrap();
    adapter.notify_variable_write_ready().unwrap();
    assert_eq!(adapter.context().state, AdapterState::VariableServicesReady);
    assert_eq!(adapter.context().phase, BootPhase::DxeRuntime);
}

#[test]
fn every_report_of_a_boot_is_persisted_once_in_order() {
    let mut backing = vec![0u8; EARLY_STORE_SIZE];
    let variables = VariableStore::new();
    let events = EventLog::new();

    // PEI: one fatal report for the early store, one recoverable report for the hand-off list.
    let mut pei = PeiAdapter::new(MemoryEarlyStorage::new(&mut backing), events.clone(), WheaConfig::default());
    pei.start().unwrap();
    let fatal = whea_data(Severity::Fatal, 1);
    let recoverable = whea_data(Severity::Recoverable, 3);
    pei.report(&error_report(&fatal)).unwrap();
    pei.report(&error_report(&recoverable)).unwrap();
    pei.report(&progress_report(&recoverable)).unwrap();
    let hand_off = pei.into_hand_off();
    assert_eq!(hand_off.len(), 1);

    // DXE before variable services: fatal reports still go to the early store, the rest are buffered.
    let mut adapter = dxe(&mut backing, &variables, &events, hand_off);
    adapter.start().unwrap();
    let dxe_fatal = whea_data(Severity::Fatal, 2);
    let dxe_informational = whea_data(Severity::Informational, 4);
    adapter.report(&error_report(&dxe_fatal)).unwrap();
    adapter.report(&error_report(&dxe_informational)).unwrap();
    assert_eq!(adapter.pending(), 2);
    assert!(variables.hw_error_records().is_empty());

    adapter.notify_variable_write_ready().unwrap();
    assert!(variables.hw_error_records().is_empty());
    bring_up_variable_services(&mut adapter);
    assert_eq!(adapter.pending(), 0);

    // Early store first, then the buffered reports.
    let records = variables.hw_error_records();
    assert_eq!(tags(&records), vec![1, 2, 3, 4]);
    let ids: Vec<u64> = records.iter().map(|record| Record(record).record_id()).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);

    // Runtime reports are persisted straight away.
    let runtime = whea_data(Severity::Recoverable, 5);
    adapter.report(&error_report(&runtime)).unwrap();
    assert_eq!(tags(&variables.hw_error_records()), vec![1, 2, 3, 4, 5]);

    adapter.on_exit_boot_services().unwrap();
    assert_eq!(adapter.report(&error_report(&runtime)), Err(EfiError::AccessDenied));
    assert_eq!(variables.hw_error_records().len(), 5);

    assert_eq!(
        events.events(),
        vec![
            PlatformEvent::Registered(None),
            PlatformEvent::Registered(Some(efi::TPL_HIGH_LEVEL)),
            PlatformEvent::ExitBootServicesRequested,
            PlatformEvent::Unregistered,
        ]
    );
}

#[test]
fn records_carry_the_observed_identity() {
    let mut backing = vec![0u8; EARLY_STORE_SIZE];
    let variables = VariableStore::new();
    let events = EventLog::new();

    let mut adapter = dxe(&mut backing, &variables, &events, HandOffList::new());
    adapter.start().unwrap();
    bring_up_variable_services(&mut adapter);

    let data = whea_data(Severity::Recoverable, 0x77);
    adapter.report(&error_report(&data)).unwrap();

    let (attributes, record) = variables.hw_error_record(0).unwrap();
    assert_eq!(
        attributes,
        efi::VARIABLE_NON_VOLATILE
            | efi::VARIABLE_BOOTSERVICE_ACCESS
            | efi::VARIABLE_RUNTIME_ACCESS
            | efi::VARIABLE_HARDWARE_ERROR_RECORD
    );

    let record = Record(&record);
    assert_eq!(record.section_count(), 1);
    assert_eq!(record.severity(), Severity::Recoverable.as_cper());
    assert_eq!(record.record_length() as usize, record.0.len());
    assert_eq!(record.section_type(0), TELEMETRY_SECTION_GUID);
    assert_eq!(record.module_id(), REPORTER);
    assert_eq!(record.status_value(), STATUS_VALUE);
    assert_eq!(record.tag(), 0x77);
}

#[test]
fn vendor_sections_become_a_second_section() {
    let mut backing = vec![0u8; EARLY_STORE_SIZE];
    let variables = VariableStore::new();
    let events = EventLog::new();

    let mut adapter = dxe(&mut backing, &variables, &events, HandOffList::new());
    adapter.start().unwrap();
    bring_up_variable_services(&mut adapter);

    let data = whea_data_with_section(Severity::Recoverable, 9, &[0xA5; 24]);
    adapter.report(&error_report(&data)).unwrap();

    let (_, record) = variables.hw_error_record(0).unwrap();
    let record = Record(&record);
    assert_eq!(record.section_count(), 2);
    assert_eq!(record.section_type(1), VENDOR_SECTION);
    assert_eq!(record.section_body(1), &[0xA5; 24]);
}

#[test]
fn unstructured_data_is_kept_as_an_informational_record() {
    let mut backing = vec![0u8; EARLY_STORE_SIZE];
    let variables = VariableStore::new();
    let events = EventLog::new();

    let mut adapter = dxe(&mut backing, &variables, &events, HandOffList::new());
    adapter.start().unwrap();
    bring_up_variable_services(&mut adapter);

    let raw = extended_data(&VENDOR_SECTION, b"raw platform data");
    adapter.report(&error_report(&raw)).unwrap();
    // A structured type with a body too short for the header.
    let truncated = extended_data(&WHEA_RSC_DATA_TYPE_GUID, &[1, 2, 3]);
    adapter.report(&error_report(&truncated)).unwrap();

    let records = variables.hw_error_records();
    assert_eq!(records.len(), 2);

    let first = Record(&records[0]);
    assert_eq!(first.severity(), Severity::Informational.as_cper());
    assert_eq!(first.section_type(1), VENDOR_SECTION);
    assert_eq!(first.section_body(1), b"raw platform data");
    assert_eq!(first.status_value(), STATUS_VALUE);

    let second = Record(&records[1]);
    assert_eq!(second.section_type(1), WHEA_RSC_DATA_TYPE_GUID);
    assert_eq!(second.section_body(1), &[1, 2, 3]);
}

#[test]
fn malformed_extended_data_is_rejected() {
    let mut backing = vec![0u8; EARLY_STORE_SIZE];
    let variables = VariableStore::new();
    let events = EventLog::new();

    let mut adapter = dxe(&mut backing, &variables, &events, HandOffList::new());
    adapter.start().unwrap();

    let mut data = whea_data(Severity::Recoverable, 1);
    data.push(0);
    assert_eq!(adapter.report(&error_report(&data)), Err(EfiError::InvalidParameter));
    assert_eq!(adapter.pending(), 0);
}

#[test]
fn reports_before_start_are_not_ready() {
    let mut backing = vec![0u8; EARLY_STORE_SIZE];
    let events = EventLog::new();
    let data = whea_data(Severity::Fatal, 1);

    let mut pei = PeiAdapter::new(MemoryEarlyStorage::new(&mut backing), events.clone(), WheaConfig::default());
    assert_eq!(pei.report(&error_report(&data)), Err(EfiError::NotReady));
    drop(pei);

    let mut adapter = dxe(&mut backing, &VariableStore::new(), &events, HandOffList::new());
    assert_eq!(adapter.report(&error_report(&data)), Err(EfiError::NotReady));
    assert!(events.events().is_empty());
}

#[test]
fn clearing_removes_only_hardware_error_records() {
    let mut backing = vec![0u8; EARLY_STORE_SIZE];
    let variables = VariableStore::new();
    let events = EventLog::new();
    variables.insert("BootOrder", &HARDWARE_ERROR_VARIABLE_GUID, efi::VARIABLE_NON_VOLATILE, &[1, 0]);

    let mut adapter = dxe(&mut backing, &variables, &events, HandOffList::new());
    adapter.start().unwrap();
    bring_up_variable_services(&mut adapter);
    for tag in 0..3 {
        let data = whea_data(Severity::Recoverable, tag);
        adapter.report(&error_report(&data)).unwrap();
    }
    assert_eq!(variables.hw_error_records().len(), 3);

    adapter.clear_records().unwrap();
    assert!(variables.hw_error_records().is_empty());
    assert!(variables.contains("BootOrder", &HARDWARE_ERROR_VARIABLE_GUID));

    // Slots are reused from the start, record IDs keep counting.
    let data = whea_data(Severity::Recoverable, 10);
    adapter.report(&error_report(&data)).unwrap();
    let (_, record) = variables.hw_error_record(0).unwrap();
    assert_eq!(Record(&record).record_id(), 4);
}

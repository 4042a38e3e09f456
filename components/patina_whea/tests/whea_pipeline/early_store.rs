//! Early store behavior across resets, overflow and corruption.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent

use patina_whea::{
    adapter::{DxeAdapter, PeiAdapter},
    config::WheaConfig,
    early_store::{EarlyStore, EarlyStoreHeader, EarlyStoreSlotV0, MemoryEarlyStorage},
    error::EfiError,
    metadata::{BootPhase, Severity},
    status_code::WHEA_EARLY_STORE_FULL,
    volatile::HandOffList,
};

use super::common::*;

fn pei_boot(backing: &mut [u8], config: WheaConfig, reports: &[Vec<u8>]) -> (HandOffList, Vec<Result<(), EfiError>>) {
    let mut pei = PeiAdapter::new(MemoryEarlyStorage::new(backing), EventLog::new(), config);
    pei.start().unwrap();
    let results = reports.iter().map(|data| pei.report(&error_report(data))).collect();
    (pei.into_hand_off(), results)
}

fn dxe_boot(backing: &mut [u8], config: WheaConfig, variables: &VariableStore, hand_off: HandOffList) {
    let events = EventLog::new();
    let mut dxe = DxeAdapter::new(
        MemoryEarlyStorage::new(backing),
        variables.clone(),
        events.clone(),
        events,
        config,
        hand_off,
    );
    dxe.start().unwrap();
    dxe.notify_variable_arch_ready().unwrap();
    dxe.notify_variable_write_ready().unwrap();
}

#[test]
fn fatal_reports_survive_a_reset_before_variable_services() {
    let mut backing = vec![0u8; 0x200];
    let variables = VariableStore::new();

    // First boot resets during PEI; the hand-off list is lost, the early store is not.
    let (_, results) = pei_boot(
        &mut backing,
        WheaConfig::default(),
        &[whea_data(Severity::Fatal, 7), whea_data(Severity::Recoverable, 70)],
    );
    assert!(results.iter().all(Result::is_ok));

    let (hand_off, _) = pei_boot(&mut backing, WheaConfig::default(), &[whea_data(Severity::Fatal, 8)]);
    dxe_boot(&mut backing, WheaConfig::default(), &variables, hand_off);

    let records = variables.hw_error_records();
    assert_eq!(tags(&records), vec![7, 8]);
    assert!(records.iter().all(|record| Record(record).severity() == Severity::Fatal.as_cper()));
    assert!(records.iter().all(|record| Record(record).module_id() == REPORTER));

    // The store is empty again.
    let store = EarlyStore::new(MemoryEarlyStorage::new(&mut backing), &WheaConfig::default());
    assert_eq!({ store.is_valid().unwrap().active_range }, 0);
}

#[test]
fn overflow_is_reported_ahead_of_the_stored_entries() {
    let mut backing = vec![0u8; EarlyStoreHeader::SIZE + 2 * EarlyStoreSlotV0::SIZE];
    let variables = VariableStore::new();

    let reports: Vec<Vec<u8>> = (1..=4).map(|tag| whea_data(Severity::Fatal, tag)).collect();
    let (hand_off, results) = pei_boot(&mut backing, WheaConfig::default(), &reports);
    assert_eq!(results, vec![Ok(()), Ok(()), Err(EfiError::OutOfResources), Err(EfiError::OutOfResources)]);

    dxe_boot(&mut backing, WheaConfig::default(), &variables, hand_off);

    let records = variables.hw_error_records();
    assert_eq!(records.len(), 3);

    let marker = Record(&records[0]);
    assert_eq!(marker.severity(), Severity::Informational.as_cper());
    assert_eq!(marker.status_value(), WHEA_EARLY_STORE_FULL);
    assert_eq!(marker.tag(), BootPhase::Pei as u64);
    assert_eq!(tags(&records[1..]), vec![1, 2]);

    // Overflow is reported once.
    let second = VariableStore::new();
    dxe_boot(&mut backing, WheaConfig::default(), &second, HandOffList::new());
    assert!(second.hw_error_records().is_empty());
}

#[test]
fn corrupted_store_is_reinitialized_without_records() {
    let mut backing = vec![0x5Au8; 0x200];
    let variables = VariableStore::new();

    let (hand_off, _) = pei_boot(&mut backing, WheaConfig::default(), &[]);
    assert_eq!(&backing[..4], b"WHES");
    assert!(backing[EarlyStoreHeader::SIZE..].iter().all(|&b| b == 0));

    dxe_boot(&mut backing, WheaConfig::default(), &variables, hand_off);
    assert!(variables.hw_error_records().is_empty());
}

#[test]
fn tampered_entries_are_discarded() {
    let mut backing = vec![0u8; 0x200];
    let variables = VariableStore::new();

    let (hand_off, _) = pei_boot(&mut backing, WheaConfig::default(), &[whea_data(Severity::Fatal, 1)]);
    // Flip a byte of the stored entry without updating the checksum.
    backing[EarlyStoreHeader::SIZE + 8] ^= 0xFF;

    dxe_boot(&mut backing, WheaConfig::default(), &variables, hand_off);
    assert!(variables.hw_error_records().is_empty());
}

#[test]
fn erased_regions_use_the_platform_fill_byte() {
    let config = WheaConfig { early_store_fill: 0xFF, ..Default::default() };
    let mut backing = vec![0xFFu8; 0x100];
    let variables = VariableStore::new();

    let (hand_off, _) = pei_boot(&mut backing, config, &[whea_data(Severity::Fatal, 3)]);
    assert_eq!(backing[EarlyStoreHeader::SIZE], 0);
    assert!(backing[EarlyStoreHeader::SIZE + EarlyStoreSlotV0::SIZE..].iter().all(|&b| b == 0xFF));

    dxe_boot(&mut backing, config, &variables, hand_off);
    assert_eq!(tags(&variables.hw_error_records()), vec![3]);
    assert!(backing[EarlyStoreHeader::SIZE..].iter().all(|&b| b == 0xFF));
}

#[test]
fn region_too_small_for_an_entry_still_hands_off() {
    let mut backing = vec![0u8; EarlyStoreHeader::SIZE];
    let variables = VariableStore::new();

    let (hand_off, results) = pei_boot(
        &mut backing,
        WheaConfig::default(),
        &[whea_data(Severity::Fatal, 1), whea_data(Severity::Recoverable, 2)],
    );
    assert_eq!(results, vec![Err(EfiError::InvalidParameter), Ok(())]);

    dxe_boot(&mut backing, WheaConfig::default(), &variables, hand_off);
    assert_eq!(tags(&variables.hw_error_records()), vec![2]);
}

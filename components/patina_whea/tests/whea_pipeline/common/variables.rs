//! In-memory variable store for the WHEA pipeline integration tests.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent

use std::{
    cell::RefCell,
    collections::BTreeMap,
    ops::Bound,
    rc::Rc,
};

use patina_whea::{
    cper::HARDWARE_ERROR_VARIABLE_GUID,
    runtime_services::RuntimeServices,
    sink::{hw_err_rec_name, is_hw_err_rec_name},
};
use r_efi::efi;

/// Variable key: null-terminated name and namespace bytes.
type VariableKey = (Vec<u16>, [u8; 16]);

#[derive(Default)]
struct VariableStoreInner {
    variables: BTreeMap<VariableKey, (u32, Vec<u8>)>,
    fail_writes: Option<efi::Status>,
    writes: usize,
}

/// A variable store shared between the adapter under test and the test body.
///
/// Cloning yields another handle to the same store, the way a reset leaves NV storage intact.
#[derive(Clone, Default)]
pub struct VariableStore {
    inner: Rc<RefCell<VariableStoreInner>>,
}

fn key(name: &[u16], namespace: &efi::Guid) -> VariableKey {
    let end = name.iter().position(|&c| c == 0).map_or(name.len(), |i| i + 1);
    let mut name = name[..end].to_vec();
    if name.last() != Some(&0) {
        name.push(0);
    }
    (name, *namespace.as_bytes())
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later write fail with `status`.
    pub fn fail_writes(&self, status: efi::Status) {
        self.inner.borrow_mut().fail_writes = Some(status);
    }

    /// Number of successful writes, deletions included.
    pub fn writes(&self) -> usize {
        self.inner.borrow().writes
    }

    /// Stores `data` under `name` directly, bypassing the runtime services interface.
    pub fn insert(&self, name: &str, namespace: &efi::Guid, attributes: u32, data: &[u8]) {
        let name: Vec<u16> = name.encode_utf16().chain(core::iter::once(0)).collect();
        self.inner.borrow_mut().variables.insert(key(&name, namespace), (attributes, data.to_vec()));
    }

    pub fn contains(&self, name: &str, namespace: &efi::Guid) -> bool {
        let name: Vec<u16> = name.encode_utf16().chain(core::iter::once(0)).collect();
        self.inner.borrow().variables.contains_key(&key(&name, namespace))
    }

    /// Returns the attributes and contents of `HwErrRec####` at `index`.
    pub fn hw_error_record(&self, index: u16) -> Option<(u32, Vec<u8>)> {
        let name = hw_err_rec_name(index);
        self.inner.borrow().variables.get(&key(&name, &HARDWARE_ERROR_VARIABLE_GUID)).cloned()
    }

    /// Returns every hardware error record in slot order.
    pub fn hw_error_records(&self) -> Vec<Vec<u8>> {
        self.inner
            .borrow()
            .variables
            .iter()
            .filter(|((name, namespace), _)| {
                *namespace == *HARDWARE_ERROR_VARIABLE_GUID.as_bytes() && is_hw_err_rec_name(name)
            })
            .map(|(_, (_, data))| data.clone())
            .collect()
    }
}

impl RuntimeServices for VariableStore {
    fn get_time(&self) -> Result<efi::Time, efi::Status> {
        Ok(efi::Time {
            year: 2024,
            month: 5,
            day: 17,
            hour: 13,
            minute: 45,
            second: 9,
            pad1: 0,
            nanosecond: 0,
            timezone: 0,
            daylight: 0,
            pad2: 0,
        })
    }

    fn variable_size(&self, name: &[u16], namespace: &efi::Guid) -> Result<usize, efi::Status> {
        let inner = self.inner.borrow();
        inner.variables.get(&key(name, namespace)).map(|(_, value)| value.len()).ok_or(efi::Status::NOT_FOUND)
    }

    fn read_variable(&self, name: &[u16], namespace: &efi::Guid, data: &mut [u8]) -> Result<usize, efi::Status> {
        let inner = self.inner.borrow();
        let (_, value) = inner.variables.get(&key(name, namespace)).ok_or(efi::Status::NOT_FOUND)?;
        if data.len() < value.len() {
            return Err(efi::Status::BUFFER_TOO_SMALL);
        }
        data[..value.len()].copy_from_slice(value);
        Ok(value.len())
    }

    fn write_variable(
        &self,
        name: &[u16],
        namespace: &efi::Guid,
        attributes: u32,
        data: &[u8],
    ) -> Result<(), efi::Status> {
        let mut inner = self.inner.borrow_mut();
        if let Some(status) = inner.fail_writes {
            return Err(status);
        }

        let key = key(name, namespace);
        if attributes == 0 || data.is_empty() {
            inner.variables.remove(&key).ok_or(efi::Status::NOT_FOUND)?;
        } else {
            inner.variables.insert(key, (attributes, data.to_vec()));
        }
        inner.writes += 1;
        Ok(())
    }

    fn next_variable_name(&self, name: &mut Vec<u16>, namespace: &mut efi::Guid) -> Result<(), efi::Status> {
        let inner = self.inner.borrow();
        let next = if name.first() == Some(&0) {
            inner.variables.keys().next()
        } else {
            let current = key(name, namespace);
            inner.variables.range::<VariableKey, _>((Bound::Excluded(current), Bound::Unbounded)).next().map(|(k, _)| k)
        };

        let (next_name, next_namespace) = next.ok_or(efi::Status::NOT_FOUND)?;
        *name = next_name.clone();
        *namespace = efi::Guid::from_bytes(next_namespace);
        Ok(())
    }
}

//! Variable and time services used by the durable sink.
//!
//! The sink only needs a handful of operations: check a record slot, read and bump the record ID counter, write or
//! delete a variable, walk the variable namespace and read the clock. [`RuntimeServices`] exposes exactly those.
//! [`StandardRuntimeServices`] implements them over UEFI function pointers, taken either from the runtime services
//! table (DXE) or from the MM variable protocol, which uses the same calling conventions.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::vec::Vec;
use core::{ffi::c_void, mem::size_of, ptr};

#[cfg(any(test, feature = "mockall"))]
use mockall::automock;
use r_efi::efi;

/// Initial name buffer, in characters, used when walking the namespace.
const NAME_BUFFER_CHARS: usize = 64;

/// Variable and time services needed to persist records.
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait RuntimeServices {
    /// Returns the data size of a variable, or `NOT_FOUND` if it does not exist.
    fn variable_size(&self, name: &[u16], namespace: &efi::Guid) -> Result<usize, efi::Status>;

    /// Reads a variable into `data` and returns the number of bytes read.
    ///
    /// Returns `BUFFER_TOO_SMALL` if the data does not fit.
    fn read_variable(&self, name: &[u16], namespace: &efi::Guid, data: &mut [u8]) -> Result<usize, efi::Status>;

    /// Creates or replaces a variable. Zero `attributes` with empty `data` deletes it.
    fn write_variable(&self, name: &[u16], namespace: &efi::Guid, attributes: u32, data: &[u8])
        -> Result<(), efi::Status>;

    /// Advances an enumeration cursor to the next variable, in place.
    ///
    /// Start from the name `[0]`. Returns `NOT_FOUND` once the last variable has been returned.
    fn next_variable_name(&self, name: &mut Vec<u16>, namespace: &mut efi::Guid) -> Result<(), efi::Status>;

    /// Returns the current time.
    fn get_time(&self) -> Result<efi::Time, efi::Status>;
}

fn check_name(name: &[u16]) -> Result<(), efi::Status> {
    if name.contains(&0) {
        Ok(())
    } else {
        log::error!("WHEA: Variable name is not null-terminated.");
        Err(efi::Status::INVALID_PARAMETER)
    }
}

/// [`RuntimeServices`] over the UEFI GetTime, GetVariable, GetNextVariableName and SetVariable calls.
#[derive(Debug, Clone, Copy)]
pub struct StandardRuntimeServices {
    get_time: efi::RuntimeGetTime,
    get_variable: efi::RuntimeGetVariable,
    get_next_variable_name: efi::RuntimeGetNextVariableName,
    set_variable: efi::RuntimeSetVariable,
}

impl StandardRuntimeServices {
    /// Uses the calls of the runtime services table.
    #[cfg(not(tarpaulin_include))] // Tested through from_calls.
    pub fn new(table: &efi::RuntimeServices) -> Self {
        Self::from_calls(table.get_time, table.get_variable, table.get_next_variable_name, table.set_variable)
    }

    /// Uses individually located calls, e.g. the MM variable protocol together with the runtime clock.
    pub const fn from_calls(
        get_time: efi::RuntimeGetTime,
        get_variable: efi::RuntimeGetVariable,
        get_next_variable_name: efi::RuntimeGetNextVariableName,
        set_variable: efi::RuntimeSetVariable,
    ) -> Self {
        Self { get_time, get_variable, get_next_variable_name, set_variable }
    }

    /// Issues GetVariable with `data` as the buffer. Returns the status and the size the firmware reported.
    fn call_get_variable(&self, name: &[u16], namespace: &efi::Guid, data: &mut [u8]) -> (efi::Status, usize) {
        let mut attributes = 0u32;
        let mut size = data.len();
        let buffer = if data.is_empty() { ptr::null_mut() } else { data.as_mut_ptr() as *mut c_void };

        // The firmware does not write through the name or the namespace.
        let status = (self.get_variable)(
            name.as_ptr() as *mut u16,
            namespace as *const efi::Guid as *mut efi::Guid,
            &mut attributes,
            &mut size,
            buffer,
        );
        (status, size)
    }
}

impl RuntimeServices for StandardRuntimeServices {
    fn variable_size(&self, name: &[u16], namespace: &efi::Guid) -> Result<usize, efi::Status> {
        check_name(name)?;
        match self.call_get_variable(name, namespace, &mut [0u8; 0]) {
            (efi::Status::BUFFER_TOO_SMALL, size) => Ok(size),
            (status, _) if status.is_error() => Err(status),
            (_, size) => Ok(size),
        }
    }

    fn read_variable(&self, name: &[u16], namespace: &efi::Guid, data: &mut [u8]) -> Result<usize, efi::Status> {
        check_name(name)?;
        match self.call_get_variable(name, namespace, data) {
            (status, _) if status.is_error() => Err(status),
            (_, size) => Ok(size),
        }
    }

    fn write_variable(
        &self,
        name: &[u16],
        namespace: &efi::Guid,
        attributes: u32,
        data: &[u8],
    ) -> Result<(), efi::Status> {
        check_name(name)?;
        let status = (self.set_variable)(
            name.as_ptr() as *mut u16,
            namespace as *const efi::Guid as *mut efi::Guid,
            attributes,
            data.len(),
            data.as_ptr() as *mut c_void,
        );
        if status.is_error() {
            Err(status)
        } else {
            Ok(())
        }
    }

    fn next_variable_name(&self, name: &mut Vec<u16>, namespace: &mut efi::Guid) -> Result<(), efi::Status> {
        check_name(name)?;
        if name.len() < NAME_BUFFER_CHARS {
            name.resize(NAME_BUFFER_CHARS, 0);
        }

        // Growing the buffer keeps the previous name in place, as the call requires.
        for _ in 0..2 {
            let mut size = name.len() * size_of::<u16>();
            match (self.get_next_variable_name)(&mut size, name.as_mut_ptr(), namespace) {
                efi::Status::BUFFER_TOO_SMALL => name.resize(size.div_ceil(size_of::<u16>()), 0),
                status if status.is_error() => return Err(status),
                _ => {
                    if let Some(end) = name.iter().position(|&c| c == 0) {
                        name.truncate(end + 1);
                    }
                    return Ok(());
                }
            }
        }

        log::error!("WHEA: GetNextVariableName kept asking for a larger buffer.");
        Err(efi::Status::BUFFER_TOO_SMALL)
    }

    fn get_time(&self) -> Result<efi::Time, efi::Status> {
        let mut time = efi::Time::default();
        let status = (self.get_time)(&mut time, ptr::null_mut());
        if status.is_error() {
            Err(status)
        } else {
            Ok(time)
        }
    }
}

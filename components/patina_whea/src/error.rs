//! Error type for the WHEA report pipeline.
//!
//! Mirrors the UEFI status codes the pipeline can produce or receive from the variable services. Anything the
//! pipeline does not handle explicitly is carried through as [`EfiError::Unknown`].
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!

/// A specialized [`Result`](core::result::Result) type for WHEA pipeline operations.
pub type Result<T> = core::result::Result<T, EfiError>;

use r_efi::efi;

/// UEFI error codes seen by the WHEA report pipeline.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum EfiError {
    /// Malformed or missing required input. Never persisted, never retried.
    InvalidParameter,
    /// A well-formed entry whose schema revision is not understood.
    Unsupported,
    /// The buffer was not large enough to hold the requested data.
    BufferTooSmall,
    /// The service the operation depends on is not available yet.
    NotReady,
    /// The physical device reported an error while attempting the operation.
    DeviceError,
    /// The device can not be written to.
    WriteProtected,
    /// No slot is available, either in the early store or in the variable namespace.
    OutOfResources,
    /// The item was not found.
    NotFound,
    /// The report arrived after the subsystem unregistered at exit boot services.
    AccessDenied,
    /// The security status of the data is unknown or compromised.
    SecurityViolation,
    /// An unknown EFI status code was encountered.
    Unknown(efi::Status),
}

impl EfiError {
    /// Converts an `r_efi::efi::Status` to a `Result`.
    ///
    /// If the status is not an error, it returns `Ok(())`. Otherwise, it returns an `Err` with the corresponding
    /// `EfiError`.
    pub fn status_to_result(status: efi::Status) -> Result<()> {
        if !status.is_error() {
            return Ok(());
        }
        Err(EfiError::from(status))
    }
}

impl From<EfiError> for efi::Status {
    fn from(e: EfiError) -> efi::Status {
        match e {
            EfiError::InvalidParameter => efi::Status::INVALID_PARAMETER,
            EfiError::Unsupported => efi::Status::UNSUPPORTED,
            EfiError::BufferTooSmall => efi::Status::BUFFER_TOO_SMALL,
            EfiError::NotReady => efi::Status::NOT_READY,
            EfiError::DeviceError => efi::Status::DEVICE_ERROR,
            EfiError::WriteProtected => efi::Status::WRITE_PROTECTED,
            EfiError::OutOfResources => efi::Status::OUT_OF_RESOURCES,
            EfiError::NotFound => efi::Status::NOT_FOUND,
            EfiError::AccessDenied => efi::Status::ACCESS_DENIED,
            EfiError::SecurityViolation => efi::Status::SECURITY_VIOLATION,
            EfiError::Unknown(status) => status,
        }
    }
}

impl From<efi::Status> for EfiError {
    fn from(status: efi::Status) -> EfiError {
        match status {
            efi::Status::INVALID_PARAMETER => EfiError::InvalidParameter,
            efi::Status::UNSUPPORTED => EfiError::Unsupported,
            efi::Status::BUFFER_TOO_SMALL => EfiError::BufferTooSmall,
            efi::Status::NOT_READY => EfiError::NotReady,
            efi::Status::DEVICE_ERROR => EfiError::DeviceError,
            efi::Status::WRITE_PROTECTED => EfiError::WriteProtected,
            efi::Status::OUT_OF_RESOURCES => EfiError::OutOfResources,
            efi::Status::NOT_FOUND => EfiError::NotFound,
            efi::Status::ACCESS_DENIED => EfiError::AccessDenied,
            efi::Status::SECURITY_VIOLATION => EfiError::SecurityViolation,
            _ => EfiError::Unknown(status),
        }
    }
}

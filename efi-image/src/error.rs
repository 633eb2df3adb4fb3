//! Image execution error handling
//!
//! This module defines the error type returned by every probe, execute
//! and shim management operation.

use core::fmt;

use uefi_raw::Status;

/// Image execution error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecError {
    /// Allocation of a device path, command line or bookkeeping buffer failed
    OutOfMemory,

    /// A firmware service call failed
    Platform(Status),

    /// LoadImage() rejected the image
    LoadFailed(Status),

    /// LoadImage() rejected the image because of Secure Boot policy
    SecurityViolation,

    /// StartImage() failed, or the image returned an error
    StartFailed(Status),

    /// Image is not a PE executable for this machine
    UnsupportedFormat,

    /// No SNP device has been opened
    NoDevice,

    /// Image cannot be loaded directly and no shim is registered
    NoFallback,
}

impl ExecError {
    /// Map a LoadImage() status to the matching error
    pub fn from_load_status(status: Status) -> Self {
        if status == Status::SECURITY_VIOLATION {
            ExecError::SecurityViolation
        } else {
            ExecError::LoadFailed(status)
        }
    }

    /// Convert to an error code suitable for passing back to firmware
    pub fn as_error_code(&self) -> u32 {
        match self {
            ExecError::OutOfMemory => 0x2002,
            ExecError::Platform(status) => status.0 as u32,
            ExecError::LoadFailed(_) => 0x9001,
            ExecError::SecurityViolation => 0x9003,
            ExecError::StartFailed(_) => 0x9004,
            ExecError::UnsupportedFormat => 0x9002,
            ExecError::NoDevice => 0x6000,
            ExecError::NoFallback => 0x9005,
        }
    }

    /// Get a human-readable description of the error
    pub fn description(&self) -> &'static str {
        match self {
            ExecError::OutOfMemory => "Out of memory",
            ExecError::Platform(_) => "Firmware service failed",
            ExecError::LoadFailed(_) => "Could not load image",
            ExecError::SecurityViolation => "Image prohibited by security policy",
            ExecError::StartFailed(_) => "Could not start image",
            ExecError::UnsupportedFormat => "Not an EFI executable",
            ExecError::NoDevice => "No SNP device available",
            ExecError::NoFallback => "Image not loadable and no shim registered",
        }
    }

    /// Firmware status behind the error, if any
    pub fn status(&self) -> Option<Status> {
        match self {
            ExecError::Platform(status)
            | ExecError::LoadFailed(status)
            | ExecError::StartFailed(status) => Some(*status),
            ExecError::SecurityViolation => Some(Status::SECURITY_VIOLATION),
            ExecError::OutOfMemory => Some(Status::OUT_OF_RESOURCES),
            _ => None,
        }
    }

    /// Check whether a shim could still run an image rejected this way
    pub fn is_policy_rejection(&self) -> bool {
        matches!(self, ExecError::SecurityViolation)
    }
}

impl From<Status> for ExecError {
    fn from(status: Status) -> Self {
        ExecError::Platform(status)
    }
}

impl From<alloc::collections::TryReserveError> for ExecError {
    fn from(_: alloc::collections::TryReserveError) -> Self {
        ExecError::OutOfMemory
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status() {
            Some(status) if !matches!(self, ExecError::OutOfMemory) => write!(
                f,
                "ExecError: {} ({:?}, code: {:#x})",
                self.description(),
                status,
                self.as_error_code()
            ),
            _ => write!(
                f,
                "ExecError: {} (code: {:#x})",
                self.description(),
                self.as_error_code()
            ),
        }
    }
}

/// Result type alias for image execution operations
pub type Result<T> = core::result::Result<T, ExecError>;

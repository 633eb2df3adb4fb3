// Shim lock protocol
//
// Shim publishes this interface itself and it has no UEFI definition, so
// the layout lives here.

use core::ffi::c_void;

use uefi_raw::Status;

/// `Verify()` entry point
///
/// Shim declares its protocol functions without `EFIAPI`, so on x86_64
/// they take their arguments in SysV registers.
#[cfg(target_arch = "x86_64")]
pub type ShimLockVerifyFn = unsafe extern "sysv64" fn(buffer: *const c_void, size: u32) -> Status;

/// `Verify()` entry point
#[cfg(not(target_arch = "x86_64"))]
pub type ShimLockVerifyFn = unsafe extern "C" fn(buffer: *const c_void, size: u32) -> Status;

#[repr(C)]
pub struct ShimLockProtocol {
    pub verify: ShimLockVerifyFn,
    pub hash: *const c_void,
    pub context: *const c_void,
}

// Raw UEFI firmware backend
//
// Drives the `uefi-raw` boot services table directly instead of going
// through a higher level UEFI crate, so the same binary works on firmware
// that only implements the subset of services used here.

pub mod services;
pub mod shim_lock;

pub use services::{FirmwareEvent, FirmwareLoadedImage, FirmwareServices, FirmwareShimLock};
pub use shim_lock::{ShimLockProtocol, ShimLockVerifyFn};

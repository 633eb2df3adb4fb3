//! Firmware service contracts
//!
//! The execution state machine only ever talks to the platform through
//! these traits. [`crate::firmware`] implements [`BootServices`] on top of
//! the raw boot services table; SNP devices and the auxiliary protocols
//! are provided by the network stack.

use core::ffi::c_void;

use uefi_raw::table::boot::MemoryType;
use uefi_raw::{Guid, Handle, Status};

use crate::image::ImageRef;

/// LoadImage() failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// Refused by Secure Boot policy. The firmware may still have created
    /// the image handle, which must be unloaded.
    SecurityViolation(Handle),
    /// Any other failure; nothing was loaded
    Failed(Status),
}

impl LoadError {
    pub fn status(&self) -> Status {
        match self {
            LoadError::SecurityViolation(_) => Status::SECURITY_VIOLATION,
            LoadError::Failed(status) => *status,
        }
    }
}

/// Loaded image protocol instance of a freshly loaded image
pub trait LoadedImageRecord {
    fn parent_handle(&self) -> Handle;
    fn device_handle(&self) -> Handle;
    fn set_device_handle(&mut self, device: Handle);
    fn load_options_size(&self) -> u32;
    fn has_load_options(&self) -> bool;
    fn image_code_type(&self) -> MemoryType;

    /// Point LoadOptions at `options`
    ///
    /// # Safety
    ///
    /// `options` must stay valid for as long as the loaded image may read
    /// its load options.
    unsafe fn set_load_options(&mut self, options: *const u16, size: u32);
}

/// Event notification function
pub type NotifyFn = unsafe fn(context: *mut c_void);

/// Boot services used to load, start and unlock images
pub trait BootServices {
    type LoadedImage: LoadedImageRecord;
    type Event: Copy;
    type Registration: Copy;
    type ShimLock: Copy;

    /// Handle of the running firmware image, parent of everything loaded
    fn image_handle(&self) -> Handle;

    fn load_image(&self, parent: Handle, path: &[u8], data: &[u8]) -> Result<Handle, LoadError>;
    fn unload_image(&self, image: Handle) -> Result<(), Status>;
    fn start_image(&self, image: Handle) -> Result<(), Status>;
    fn open_loaded_image(&self, image: Handle) -> Result<Self::LoadedImage, Status>;

    /// Connect every driver to every controller it supports
    fn connect_all_drivers(&self);

    /// Create a notify-signal event running `notify(context)`
    ///
    /// # Safety
    ///
    /// `context` must stay valid until the event is closed.
    unsafe fn create_event(&self, notify: NotifyFn, context: *mut c_void)
        -> Result<Self::Event, Status>;

    /// Close an event, cancelling any protocol notification tied to it
    fn close_event(&self, event: Self::Event);

    fn signal_event(&self, event: Self::Event) -> Result<(), Status>;

    fn register_protocol_notify(
        &self,
        protocol: &Guid,
        event: Self::Event,
    ) -> Result<Self::Registration, Status>;

    /// Next shim lock instance not yet returned for `registration`
    fn locate_shim_lock(&self, registration: Self::Registration) -> Option<Self::ShimLock>;

    /// Call the shim lock Verify() entry point
    fn shim_lock_verify(&self, lock: Self::ShimLock, buffer: &[u8]) -> Status;

    /// Stop the firmware's own PXE base code on `device`
    fn stop_pxe_base_code(&self, device: Handle) -> Result<(), Status>;
}

/// Opened SNP device
#[derive(Debug, Clone, Copy)]
pub struct SnpDevice<'a> {
    pub handle: Handle,
    /// END-terminated device path of the network device
    pub path: &'a [u8],
    pub name: &'a str,
}

/// SNP device bookkeeping provided by the network stack
pub trait SnpDevices {
    /// Most recently opened SNP device
    fn last_opened(&self) -> Option<SnpDevice<'_>>;
    /// Release network devices for use via SNP by the executed image
    fn release(&self);
    /// Reclaim network devices after the executed image returns
    fn claim(&self);
}

/// Image served by the file protocol under an alternate name
#[derive(Debug, Clone, Copy)]
pub struct SecondStage<'a> {
    pub image: &'a ImageRef,
    pub name: &'a str,
}

/// Auxiliary protocols installed on the SNP device handle
pub trait AuxServices {
    fn install_file(&self, device: Handle, second: Option<SecondStage<'_>>) -> Result<(), Status>;
    fn uninstall_file(&self, device: Handle);
    fn install_pxe(&self, device: Handle) -> Result<(), Status>;
    fn uninstall_pxe(&self, device: Handle);
    fn install_download(&self, device: Handle) -> Result<(), Status>;
    fn uninstall_download(&self, device: Handle);
}

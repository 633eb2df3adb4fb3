// Boot services backend over the raw UEFI boot services table

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::ffi::c_void;
use core::ptr::{self, NonNull};

use spin::Mutex;
use uefi_raw::protocol::loaded_image::LoadedImageProtocol;
use uefi_raw::protocol::network::pxe::PxeBaseCodeProtocol;
use uefi_raw::table::boot::{self, EventType, MemoryType, Tpl};
use uefi_raw::table::system::SystemTable;
use uefi_raw::{Guid, Handle, Status};

use super::shim_lock::ShimLockProtocol;
use crate::platform::{BootServices, LoadError, LoadedImageRecord, NotifyFn};
use crate::shim::SHIM_LOCK_PROTOCOL_GUID;

/// LocateHandleBuffer() search type
const ALL_HANDLES: u32 = 0;

/// OpenProtocol() attribute EFI_OPEN_PROTOCOL_GET_PROTOCOL
const OPEN_PROTOCOL_GET_PROTOCOL: u32 = 0x0000_0002;

fn check(status: Status) -> Result<(), Status> {
    if status.is_error() {
        Err(status)
    } else {
        Ok(())
    }
}

/// Check the signature of a system table and fetch its boot services
///
/// # Safety
///
/// `st` must be null or point to a readable system table.
unsafe fn boot_services_of(st: *const SystemTable) -> Result<NonNull<boot::BootServices>, Status> {
    if st.is_null() {
        return Err(Status::INVALID_PARAMETER);
    }
    // SAFETY: non-null and readable per the caller's contract
    let st = unsafe { &*st };
    if st.header.signature != SystemTable::SIGNATURE {
        return Err(Status::INVALID_PARAMETER);
    }
    NonNull::new(st.boot_services).ok_or(Status::INVALID_PARAMETER)
}

/// Notification callback and its context, kept alive while the event
/// exists
struct NotifyThunk {
    notify: NotifyFn,
    context: *mut c_void,
}

type ThunkList = Vec<(FirmwareEvent, Box<NotifyThunk>)>;

unsafe extern "efiapi" fn notify_trampoline(_event: *mut c_void, context: *mut c_void) {
    // SAFETY: the thunk is freed only after its event has been closed
    let thunk = unsafe { &*(context as *const NotifyThunk) };
    unsafe { (thunk.notify)(thunk.context) };
}

/// Forget the thunk of `event`, freeing it only if the event is gone
///
/// Returns whether the thunk was freed.
fn release_thunk(thunks: &mut ThunkList, event: FirmwareEvent, closed: Status) -> bool {
    let Some(index) = thunks.iter().position(|(e, _)| *e == event) else {
        return false;
    };
    let (_, thunk) = thunks.swap_remove(index);
    if closed.is_error() {
        // The event may still fire
        log::warn!("CloseEvent failed: {:?}, leaking notify context", closed);
        core::mem::forget(thunk);
        return false;
    }
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareEvent(*mut c_void);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareRegistration(*const c_void);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareShimLock(NonNull<ShimLockProtocol>);

/// Loaded image protocol instance owned by the firmware
pub struct FirmwareLoadedImage {
    loaded: NonNull<LoadedImageProtocol>,
}

impl FirmwareLoadedImage {
    fn get(&self) -> &LoadedImageProtocol {
        // SAFETY: valid while the image remains loaded
        unsafe { self.loaded.as_ref() }
    }

    fn get_mut(&mut self) -> &mut LoadedImageProtocol {
        // SAFETY: valid while the image remains loaded
        unsafe { self.loaded.as_mut() }
    }
}

impl LoadedImageRecord for FirmwareLoadedImage {
    fn parent_handle(&self) -> Handle {
        self.get().parent_handle
    }

    fn device_handle(&self) -> Handle {
        self.get().device_handle
    }

    fn set_device_handle(&mut self, device: Handle) {
        self.get_mut().device_handle = device;
    }

    fn load_options_size(&self) -> u32 {
        self.get().load_options_size
    }

    fn has_load_options(&self) -> bool {
        !self.get().load_options.is_null()
    }

    fn image_code_type(&self) -> MemoryType {
        self.get().image_code_type
    }

    unsafe fn set_load_options(&mut self, options: *const u16, size: u32) {
        let loaded = self.get_mut();
        loaded.load_options = options.cast();
        loaded.load_options_size = size;
    }
}

/// [`BootServices`] implementation calling straight into firmware
pub struct FirmwareServices {
    image_handle: Handle,
    boot_services: NonNull<boot::BootServices>,
    thunks: Mutex<ThunkList>,
}

impl FirmwareServices {
    /// Wrap the boot services of `system_table`
    ///
    /// # Safety
    ///
    /// `image_handle` and `system_table` must be the values passed to the
    /// running image's entry point, and boot services must not have been
    /// exited.
    pub unsafe fn new(image_handle: Handle, system_table: *const SystemTable) -> Result<Self, Status> {
        // SAFETY: per the caller's contract
        let boot_services = unsafe { boot_services_of(system_table)? };

        Ok(Self {
            image_handle,
            boot_services,
            thunks: Mutex::new(Vec::new()),
        })
    }

    fn bs(&self) -> &boot::BootServices {
        // SAFETY: valid until ExitBootServices()
        unsafe { self.boot_services.as_ref() }
    }

    fn open_protocol(&self, handle: Handle, protocol: &Guid) -> Result<NonNull<c_void>, Status> {
        let mut interface = ptr::null_mut();
        check(unsafe {
            (self.bs().open_protocol)(
                handle,
                protocol,
                &mut interface,
                self.image_handle,
                ptr::null_mut(),
                OPEN_PROTOCOL_GET_PROTOCOL,
            )
        })?;
        NonNull::new(interface).ok_or(Status::NOT_FOUND)
    }

    fn close_protocol(&self, handle: Handle, protocol: &Guid) {
        let status = unsafe {
            (self.bs().close_protocol)(handle, protocol, self.image_handle, ptr::null_mut())
        };
        if status.is_error() {
            log::warn!("CloseProtocol failed: {:?}", status);
        }
    }
}

impl BootServices for FirmwareServices {
    type LoadedImage = FirmwareLoadedImage;
    type Event = FirmwareEvent;
    type Registration = FirmwareRegistration;
    type ShimLock = FirmwareShimLock;

    fn image_handle(&self) -> Handle {
        self.image_handle
    }

    fn load_image(&self, parent: Handle, path: &[u8], data: &[u8]) -> Result<Handle, LoadError> {
        let mut handle = ptr::null_mut();
        let status = unsafe {
            (self.bs().load_image)(
                false.into(),
                parent,
                path.as_ptr().cast(),
                data.as_ptr().cast(),
                data.len(),
                &mut handle,
            )
        };
        match status {
            Status::SECURITY_VIOLATION => Err(LoadError::SecurityViolation(handle)),
            status if status.is_error() => Err(LoadError::Failed(status)),
            _ => Ok(handle),
        }
    }

    fn unload_image(&self, image: Handle) -> Result<(), Status> {
        check(unsafe { (self.bs().unload_image)(image) })
    }

    fn start_image(&self, image: Handle) -> Result<(), Status> {
        check(unsafe { (self.bs().start_image)(image, ptr::null_mut(), ptr::null_mut()) })
    }

    fn open_loaded_image(&self, image: Handle) -> Result<Self::LoadedImage, Status> {
        let loaded = self.open_protocol(image, &LoadedImageProtocol::GUID)?;
        Ok(FirmwareLoadedImage {
            loaded: loaded.cast(),
        })
    }

    fn connect_all_drivers(&self) {
        let mut count = 0;
        let mut handles = ptr::null_mut();
        let status = unsafe {
            (self.bs().locate_handle_buffer)(
                ALL_HANDLES as _,
                ptr::null(),
                ptr::null(),
                &mut count,
                &mut handles,
            )
        };
        if status.is_error() || handles.is_null() {
            log::warn!("Could not enumerate handles: {:?}", status);
            return;
        }

        // SAFETY: the firmware returned `count` handles at `handles`
        let all: &[Handle] = unsafe { core::slice::from_raw_parts(handles, count) };
        for &handle in all {
            // Controllers without a matching driver report NOT_FOUND
            let _ = unsafe {
                (self.bs().connect_controller)(handle, ptr::null_mut(), ptr::null(), true.into())
            };
        }
        log::debug!("Connected drivers to {} handle(s)", count);

        let _ = unsafe { (self.bs().free_pool)(handles.cast()) };
    }

    unsafe fn create_event(
        &self,
        notify: NotifyFn,
        context: *mut c_void,
    ) -> Result<Self::Event, Status> {
        let mut thunks = self.thunks.lock();
        thunks
            .try_reserve(1)
            .map_err(|_| Status::OUT_OF_RESOURCES)?;
        let thunk = Box::new(NotifyThunk { notify, context });

        let mut event = ptr::null_mut();
        check(unsafe {
            (self.bs().create_event)(
                EventType::NOTIFY_SIGNAL,
                Tpl::CALLBACK,
                Some(notify_trampoline),
                &*thunk as *const NotifyThunk as *mut c_void,
                &mut event,
            )
        })?;

        let event = FirmwareEvent(event);
        thunks.push((event, thunk));
        Ok(event)
    }

    fn close_event(&self, event: Self::Event) {
        let status = unsafe { (self.bs().close_event)(event.0) };
        release_thunk(&mut self.thunks.lock(), event, status);
    }

    fn signal_event(&self, event: Self::Event) -> Result<(), Status> {
        check(unsafe { (self.bs().signal_event)(event.0) })
    }

    fn register_protocol_notify(
        &self,
        protocol: &Guid,
        event: Self::Event,
    ) -> Result<Self::Registration, Status> {
        let mut registration = ptr::null();
        check(unsafe { (self.bs().register_protocol_notify)(protocol, event.0, &mut registration) })?;
        Ok(FirmwareRegistration(registration))
    }

    fn locate_shim_lock(&self, registration: Self::Registration) -> Option<Self::ShimLock> {
        let mut interface = ptr::null_mut();
        let status = unsafe {
            (self.bs().locate_protocol)(
                &SHIM_LOCK_PROTOCOL_GUID,
                registration.0.cast_mut(),
                &mut interface,
            )
        };
        if status.is_error() {
            return None;
        }
        NonNull::new(interface.cast()).map(FirmwareShimLock)
    }

    fn shim_lock_verify(&self, lock: Self::ShimLock, buffer: &[u8]) -> Status {
        let len = u32::try_from(buffer.len()).unwrap_or(u32::MAX);
        // SAFETY: located through the shim lock protocol GUID
        unsafe { (lock.0.as_ref().verify)(buffer.as_ptr().cast(), len) }
    }

    fn stop_pxe_base_code(&self, device: Handle) -> Result<(), Status> {
        let pxe: NonNull<PxeBaseCodeProtocol> = self
            .open_protocol(device, &PxeBaseCodeProtocol::GUID)?
            .cast();
        let status = unsafe { (pxe.as_ref().stop)(pxe.as_ptr()) };
        self.close_protocol(device, &PxeBaseCodeProtocol::GUID);
        check(status)
    }
}

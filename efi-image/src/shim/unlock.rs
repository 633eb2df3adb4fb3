//! Shim lock unlocker
//!
//! Shim refuses to let the image it starts call ExitBootServices() unless
//! that image first verified some other binary through the shim lock
//! protocol, i.e. unless a second stage loader such as GRUB is in use.
//! Where no second stage loader is wanted the requirement is spurious, so
//! every shim lock instance is "unlocked" here by calling its Verify()
//! entry point with an empty buffer.
//!
//! A protocol notification is used rather than a one-off lookup: the
//! notification fires for instances installed after the unlocker (shim
//! installs its own instance only once it has started), and signalling
//! it once at install time drains every instance that already exists.

use alloc::boxed::Box;
use core::cell::Cell;
use core::ffi::c_void;
use core::ptr::NonNull;

use uefi_raw::{Guid, guid};

use crate::error::{ExecError, Result};
use crate::platform::BootServices;

/// Shim lock protocol GUID
pub const SHIM_LOCK_PROTOCOL_GUID: Guid = guid!("605dab50-e046-4300-abb6-3dd810dd8b23");

struct UnlockContext<'a, B: BootServices> {
    boot: &'a B,
    registration: Cell<Option<B::Registration>>,
    unlocked: Cell<usize>,
}

/// Installed shim lock notification
///
/// Dropping the unlocker closes the notification event. Instances that
/// were already unlocked stay unlocked.
pub struct ShimUnlocker<'a, B: BootServices> {
    boot: &'a B,
    event: B::Event,
    context: NonNull<UnlockContext<'a, B>>,
}

unsafe fn unlock_notify<B: BootServices>(context: *mut c_void) {
    // SAFETY: the context outlives the event it was registered with
    let context = unsafe { &*(context as *const UnlockContext<'_, B>) };
    let Some(registration) = context.registration.get() else {
        return;
    };

    while let Some(lock) = context.boot.locate_shim_lock(registration) {
        let status = context.boot.shim_lock_verify(lock, &[]);
        context.unlocked.set(context.unlocked.get() + 1);
        log::trace!("Shim lock instance unlocked ({:?})", status);
    }
}

impl<'a, B: BootServices> ShimUnlocker<'a, B> {
    /// Register the notification and unlock all existing instances
    pub fn install(boot: &'a B) -> Result<Self> {
        let context = NonNull::from(Box::leak(Box::new(UnlockContext {
            boot,
            registration: Cell::new(None),
            unlocked: Cell::new(0),
        })));

        // SAFETY: the context is freed only after the event is closed
        let event = match unsafe { boot.create_event(unlock_notify::<B>, context.as_ptr().cast()) } {
            Ok(event) => event,
            Err(status) => {
                log::debug!("Could not create shim unlock event: {:?}", status);
                // SAFETY: no event refers to the context
                drop(unsafe { Box::from_raw(context.as_ptr()) });
                return Err(ExecError::Platform(status));
            }
        };

        let unlocker = Self {
            boot,
            event,
            context,
        };

        let registration = boot
            .register_protocol_notify(&SHIM_LOCK_PROTOCOL_GUID, event)
            .map_err(|status| {
                log::debug!("Could not register for shim lock protocol: {:?}", status);
                ExecError::Platform(status)
            })?;
        unlocker.context().registration.set(Some(registration));

        boot.signal_event(event).map_err(|status| {
            log::debug!("Could not signal shim unlock event: {:?}", status);
            ExecError::Platform(status)
        })?;

        log::debug!("Shim unlocker installed");
        Ok(unlocker)
    }

    fn context(&self) -> &UnlockContext<'a, B> {
        // SAFETY: owned by self until drop
        unsafe { self.context.as_ref() }
    }

    /// Number of shim lock instances unlocked so far
    pub fn unlocked(&self) -> usize {
        self.context().unlocked.get()
    }

    /// Close the notification
    pub fn uninstall(self) {
        drop(self);
    }
}

impl<B: BootServices> Drop for ShimUnlocker<'_, B> {
    fn drop(&mut self) {
        self.boot.close_event(self.event);
        log::debug!("Shim unlocker removed after {} unlock(s)", self.unlocked());
        // SAFETY: the event is closed, so the callback can no longer run
        drop(unsafe { Box::from_raw(self.context.as_ptr()) });
    }
}

//! EFI image probing and execution
//!
//! [`EfiImageExec::execute`] loads an image through the platform loader
//! and starts it, substituting the registered shim when Secure Boot
//! refuses the image itself. Every step that has taken effect is undone
//! in reverse order if a later step fails.

pub mod rollback;

use uefi_raw::Handle;
use uefi_raw::table::boot::MemoryType;

use crate::cmdline::{LaunchCmdline, build_cmdline};
use crate::config::{self, ExecConfig};
use crate::error::{ExecError, Result};
use crate::image::{Image, ImageFlags, ImageFormat, ImageRef, ImageStore};
use crate::path::{END_DEVICE_PATH, build_device_path};
use crate::pe::probe_pe;
use crate::platform::{
    AuxServices, BootServices, LoadError, LoadedImageRecord, SecondStage, SnpDevice, SnpDevices,
};
use crate::shim::{SHIM_REGISTRY, ShimRegistry, ShimUnlocker};

use rollback::{Rollback, Undo};

/// Unload an image, ignoring failures
///
/// There is no way to tell whether a failed StartImage() means the image
/// never ran or that it ran and returned an error, so unloading may
/// legitimately fail.
fn unload_best_effort<B: BootServices>(boot: &B, handle: Handle) {
    if handle.is_null() {
        return;
    }
    if let Err(status) = boot.unload_image(handle) {
        log::warn!("Ignoring UnloadImage failure: {:?}", status);
    }
}

/// Check whether the platform loader accepts `image`
///
/// The image is loaded with an empty device path and unloaded again
/// straight away.
pub fn probe<B: BootServices>(boot: &B, image: &Image) -> Result<()> {
    probe_pe(image.name(), image.data())?;

    match boot.load_image(boot.image_handle(), &END_DEVICE_PATH, image.data()) {
        Ok(handle) => {
            unload_best_effort(boot, handle);
            Ok(())
        }
        Err(LoadError::SecurityViolation(handle)) => {
            log::debug!("EFI image {} prohibited by security policy", image.name());
            unload_best_effort(boot, handle);
            Err(ExecError::SecurityViolation)
        }
        Err(LoadError::Failed(status)) => {
            log::debug!("EFI image {} could not load: {:?}", image.name(), status);
            Err(ExecError::LoadFailed(status))
        }
    }
}

/// Detect and record the format of `image`
pub fn detect_format<B: BootServices>(boot: &B, image: &Image) -> Result<ImageFormat> {
    for format in ImageFormat::ALL {
        let probed = match format {
            ImageFormat::Efi => probe(boot, image),
            ImageFormat::EfiPe => probe_pe(image.name(), image.data()),
        };
        if probed.is_ok() {
            log::debug!("EFI image {} is {}", image.name(), format.name());
            image.set_format(Some(format));
            return Ok(format);
        }
    }
    image.set_format(None);
    Err(ExecError::UnsupportedFormat)
}

/// Image executor bound to one set of platform services
pub struct EfiImageExec<'a, B: BootServices> {
    boot: &'a B,
    snp: &'a dyn SnpDevices,
    aux: &'a dyn AuxServices,
    images: &'a dyn ImageStore,
    shims: &'a ShimRegistry,
    config: ExecConfig,
}

impl<'a, B: BootServices> EfiImageExec<'a, B> {
    /// Executor using the process-wide shim registry and configuration
    pub fn new(
        boot: &'a B,
        snp: &'a dyn SnpDevices,
        aux: &'a dyn AuxServices,
        images: &'a dyn ImageStore,
    ) -> Self {
        Self {
            boot,
            snp,
            aux,
            images,
            shims: &SHIM_REGISTRY,
            config: config::exec_config(),
        }
    }

    pub fn with_registry(mut self, shims: &'a ShimRegistry) -> Self {
        self.shims = shims;
        self
    }

    pub fn with_config(mut self, config: ExecConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    /// Probe `image` against this executor's loader
    pub fn probe(&self, image: &Image) -> Result<()> {
        probe(self.boot, image)
    }

    /// Detect and record the format of `image`
    pub fn detect_format(&self, image: &Image) -> Result<ImageFormat> {
        detect_format(self.boot, image)
    }

    /// Execute `image`, via the registered shim if it cannot be loaded
    /// directly
    ///
    /// On success the image stays registered and hidden and the
    /// auxiliary protocols stay installed on the SNP device.
    pub fn execute(&self, image: &ImageRef) -> Result<()> {
        // Reject anything that is not a PE image for this machine before
        // touching any state
        probe_pe(image.name(), image.data())?;

        let device = self.snp.last_opened().ok_or_else(|| {
            log::debug!("EFI image {} could not identify SNP device", image.name());
            ExecError::NoDevice
        })?;

        let format = match image.format() {
            Some(format) => format,
            None => self.detect_format(image)?,
        };

        // Use shim instead of directly executing the image if applicable
        let shim = match format {
            ImageFormat::Efi => None,
            ImageFormat::EfiPe => match self.shims.shim() {
                Some(shim) => {
                    log::debug!("EFI image {} executing via {}", image.name(), shim.name());
                    Some(shim)
                }
                None => {
                    log::debug!("EFI image {} not loadable and no shim registered", image.name());
                    return Err(ExecError::NoFallback);
                }
            },
        };
        let exec = shim.as_ref().unwrap_or(image);

        let mut rollback = Rollback::new(image, self.images, self.aux)?;

        // Re-register as a hidden image to allow for access via file I/O
        let toggle = !image.flags() & ImageFlags::HIDDEN;
        image.insert_flags(ImageFlags::HIDDEN);
        rollback.push(Undo::Hidden(toggle));
        self.images.register(image)?;
        rollback.push(Undo::Registered);

        self.install_services(image, shim.as_ref(), &device, &mut rollback)?;

        let path = build_device_path(exec.name(), device.path).inspect_err(|_| {
            log::debug!("EFI image {} could not create device path", image.name());
        })?;
        let cmdline = build_cmdline(image, shim.as_deref()).inspect_err(|_| {
            log::debug!("EFI image {} could not create command line", image.name());
        })?;
        log::debug!("EFI image {} command line \"{}\"", image.name(), cmdline.as_str());

        // Closed on return, ahead of the command line and path
        let _unlocker = if shim.is_some() {
            self.prepare_shim(&device)?
        } else {
            None
        };

        let handle =
            match self.boot.load_image(self.boot.image_handle(), path.as_bytes(), exec.data()) {
                Ok(handle) => handle,
                Err(err) => {
                    log::debug!("EFI image {} could not load: {:?}", image.name(), err.status());
                    if let LoadError::SecurityViolation(handle) = err {
                        unload_best_effort(self.boot, handle);
                    }
                    return Err(ExecError::from_load_status(err.status()));
                }
            };

        if let Err(err) = self.start(image, handle, &device, &cmdline) {
            unload_best_effort(self.boot, handle);
            return Err(err);
        }

        // The image has either unloaded itself or intends to stay
        // resident (e.g. a driver), so it is not unloaded here
        rollback.commit();
        Ok(())
    }

    fn install_services(
        &self,
        image: &ImageRef,
        shim: Option<&ImageRef>,
        device: &SnpDevice<'_>,
        rollback: &mut Rollback<'_>,
    ) -> Result<()> {
        // Let shim fetch the original image under its second stage name
        let second_name = shim.and_then(|shim| shim.cmdline());
        let second = second_name
            .as_deref()
            .map(|name| SecondStage { image, name });

        self.aux.install_file(device.handle, second).map_err(|status| {
            log::debug!("EFI image {} could not install file protocol: {:?}", image.name(), status);
            ExecError::Platform(status)
        })?;
        rollback.push(Undo::FileAccess(device.handle));

        // Shim would prefer our PXE base code over the file protocol
        if shim.is_none() {
            self.aux.install_pxe(device.handle).map_err(|status| {
                log::debug!("EFI image {} could not install PXE protocol: {:?}", image.name(), status);
                ExecError::Platform(status)
            })?;
            rollback.push(Undo::Pxe(device.handle));
        }

        self.aux.install_download(device.handle).map_err(|status| {
            log::debug!(
                "EFI image {} could not install download protocol: {:?}",
                image.name(),
                status
            );
            ExecError::Platform(status)
        })?;
        rollback.push(Undo::Download(device.handle));

        Ok(())
    }

    /// Apply the shim special handling policy before loading the shim
    fn prepare_shim(&self, device: &SnpDevice<'_>) -> Result<Option<ShimUnlocker<'a, B>>> {
        let unlocker = if self.config.unlock_shim() {
            Some(ShimUnlocker::install(self.boot)?)
        } else {
            None
        };

        if self.config.inhibit_pxe() {
            self.boot.stop_pxe_base_code(device.handle).map_err(|status| {
                log::debug!("Could not stop PXE base code on {}: {:?}", device.name, status);
                ExecError::Platform(status)
            })?;
            log::debug!("Stopped PXE base code on {}", device.name);
        }

        Ok(unlocker)
    }

    fn start(
        &self,
        image: &Image,
        handle: Handle,
        device: &SnpDevice<'_>,
        cmdline: &LaunchCmdline,
    ) -> Result<()> {
        let code_type = {
            let mut loaded = self
                .boot
                .open_loaded_image(handle)
                .map_err(ExecError::Platform)?;

            // Some EFI 1.10 implementations do not fill in DeviceHandle
            if loaded.device_handle().is_null() {
                log::debug!("EFI image {} filling in missing DeviceHandle", image.name());
                loaded.set_device_handle(device.handle);
            }

            debug_assert_eq!(loaded.parent_handle(), self.boot.image_handle());
            debug_assert_eq!(loaded.device_handle(), device.handle);
            debug_assert!(!loaded.has_load_options());
            debug_assert_eq!(loaded.load_options_size(), 0);

            // SAFETY: the command line outlives StartImage(). It is freed
            // once execute() returns, so a resident driver must not keep
            // LoadOptions
            unsafe {
                loaded.set_load_options(cmdline.as_wide().as_ptr(), cmdline.load_options_size());
            }
            loaded.image_code_type()
        };

        self.snp.release();
        let started = self.boot.start_image(handle);
        self.snp.claim();

        started.map_err(|status| {
            log::debug!(
                "EFI image {} could not start (or returned with error): {:?}",
                image.name(),
                status
            );
            ExecError::StartFailed(status)
        })?;

        // A driver should be connected up to anything available
        if code_type == MemoryType::BOOT_SERVICES_CODE {
            log::debug!("EFI image {} connecting drivers", image.name());
            self.boot.connect_all_drivers();
        }

        Ok(())
    }
}

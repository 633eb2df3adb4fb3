//! UEFI shim support
//!
//! When Secure Boot refuses to load an image directly, the registered
//! shim is executed instead and loads the image itself. The shim and its
//! optional crutch image are held by role tags in a [`ShimRegistry`].

pub mod unlock;

use alloc::string::String;

use crate::config::{self, DEFAULT_BOOT_FILENAME, ExecConfig};
use crate::error::Result;
use crate::image::{ImageRef, ImageTag};

pub use unlock::{SHIM_LOCK_PROTOCOL_GUID, ShimUnlocker};

/// Shim and shim crutch role tags
pub struct ShimRegistry {
    shim: ImageTag,
    crutch: ImageTag,
}

/// Process-wide shim registry
pub static SHIM_REGISTRY: ShimRegistry = ShimRegistry::new();

impl ShimRegistry {
    pub const fn new() -> Self {
        Self {
            shim: ImageTag::new("SHIM"),
            crutch: ImageTag::new("SHIMCRUTCH"),
        }
    }

    /// Acquire the registered shim
    pub fn shim(&self) -> Option<ImageRef> {
        self.shim.get()
    }

    /// Acquire the registered shim crutch
    pub fn crutch(&self) -> Option<ImageRef> {
        self.crutch.get()
    }

    pub fn shim_tag(&self) -> &ImageTag {
        &self.shim
    }

    pub fn crutch_tag(&self) -> &ImageTag {
        &self.crutch
    }

    /// Register (or clear) the shim
    ///
    /// The shim's command line names the second stage it should load:
    /// `alt_name` when given, the default second stage filename otherwise.
    /// The command line is assigned before the registry is touched, so an
    /// allocation failure leaves the previous shim in place.
    pub fn set_shim(
        &self,
        image: Option<&ImageRef>,
        alt_name: Option<&str>,
        config: &ExecConfig,
    ) -> Result<()> {
        if let Some(image) = image {
            match alt_name {
                Some(name) => image.set_cmdline(Some(name))?,
                None => {
                    let name = default_second_stage(config.second_stage_base)?;
                    image.set_cmdline(Some(&name))?;
                }
            }
        }

        drop(self.shim.set(image));

        // Avoid including the shim in constructed initrds
        if let Some(image) = image {
            image.hide();
        }
        Ok(())
    }

    /// Register (or clear) the shim crutch
    pub fn set_crutch(&self, image: Option<&ImageRef>) {
        drop(self.crutch.set(image));
        if let Some(image) = image {
            image.hide();
        }
    }

    /// Register (or clear) the shim and its crutch together
    ///
    /// A command line already assigned to the shim is kept as its second
    /// stage name.
    pub fn set(
        &self,
        image: Option<&ImageRef>,
        crutch: Option<&ImageRef>,
        config: &ExecConfig,
    ) -> Result<()> {
        let alt_name = image.and_then(|image| image.cmdline());
        self.set_shim(image, alt_name.as_deref(), config)?;
        self.set_crutch(crutch);
        Ok(())
    }

    /// Release both slots
    pub fn clear(&self) {
        self.shim.clear();
        self.crutch.clear();
    }
}

impl Default for ShimRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Default second stage filename, e.g. `GRUBX64.EFI` on x86_64
pub fn default_second_stage(base: &str) -> Result<String> {
    let suffix = DEFAULT_BOOT_FILENAME
        .strip_prefix("BOOT")
        .unwrap_or(DEFAULT_BOOT_FILENAME);
    let mut name = String::new();
    name.try_reserve_exact(base.len() + suffix.len())?;
    name.push_str(base);
    name.push_str(suffix);
    Ok(name)
}

/// Register (or clear) the process-wide shim
pub fn set_shim(image: Option<&ImageRef>, alt_name: Option<&str>) -> Result<()> {
    SHIM_REGISTRY.set_shim(image, alt_name, &config::exec_config())
}

/// Register (or clear) the process-wide shim crutch
pub fn set_crutch(image: Option<&ImageRef>) {
    SHIM_REGISTRY.set_crutch(image);
}

/// Register (or clear) the process-wide shim and crutch
pub fn shim(image: Option<&ImageRef>, crutch: Option<&ImageRef>) -> Result<()> {
    SHIM_REGISTRY.set(image, crutch, &config::exec_config())
}

//! Shim management command
//!
//! Acquires the named image and registers it as the shim, or clears the
//! shim when no image is named. The acquired image is unregistered
//! afterwards unless `keep` is set; the shim tag keeps it alive.

use crate::config::ExecConfig;
use crate::error::Result;
use crate::image::{ImageRef, ImageStore};
use crate::shim::ShimRegistry;

/// Image download interface
pub trait ImageAcquirer {
    /// Fetch (or look up) and register the image named by `name_uri`
    fn acquire(&self, name_uri: &str, timeout_ms: u64) -> Result<ImageRef>;
}

/// `shim` command options, as parsed by the command line front end
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShimOptions<'a> {
    /// Keep the original image registered
    pub keep: bool,
    /// Download timeout in milliseconds (0 waits indefinitely)
    pub timeout_ms: u64,
    /// Second stage alternative name
    pub altname: Option<&'a str>,
}

/// Run the `shim` command
pub fn shim_command(
    opts: &ShimOptions<'_>,
    name_uri: Option<&str>,
    acquirer: &dyn ImageAcquirer,
    images: &dyn ImageStore,
    registry: &ShimRegistry,
    config: &ExecConfig,
) -> Result<()> {
    let image = match name_uri {
        Some(name_uri) => Some(acquirer.acquire(name_uri, opts.timeout_ms)?),
        None => None,
    };

    registry.set_shim(image.as_ref(), opts.altname, config)?;

    if let Some(image) = &image {
        if !opts.keep {
            images.unregister(image);
        }
    }

    Ok(())
}

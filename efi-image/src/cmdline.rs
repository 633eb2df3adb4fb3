// Load options (command line) construction for executed images
//
// Layout:
// - "<image> [<image cmdline>]" when the image runs directly
// - "<shim> <shim cmdline>" when the shim has an explicit command line
// - "<shim> <image> [<image cmdline>]" otherwise
// Exactly one space separates present components.

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::Result;
use crate::image::Image;

/// Command line in both display and UCS-2 load options form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCmdline {
    text: String,
    wide: Vec<u16>,
}

impl LaunchCmdline {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// NUL-terminated UCS-2 buffer
    pub fn as_wide(&self) -> &[u16] {
        &self.wide
    }

    /// LoadOptionsSize value: byte length including the terminating NUL
    pub fn load_options_size(&self) -> u32 {
        (self.wide.len() * core::mem::size_of::<u16>()) as u32
    }
}

/// Build the command line for `image`, optionally executed via `shim`
pub fn build_cmdline(image: &Image, shim: Option<&Image>) -> Result<LaunchCmdline> {
    let image_args = image.cmdline();
    let (arg0, arg1, args) = match shim {
        None => (image.name(), None, image_args),
        Some(shim) => match shim.cmdline() {
            Some(shim_args) => (shim.name(), None, Some(shim_args)),
            None => (shim.name(), Some(image.name()), image_args),
        },
    };

    let len = arg0.len()
        + arg1.map_or(0, |a| 1 + a.len())
        + args.as_ref().map_or(0, |a| 1 + a.len());
    let mut text = String::new();
    text.try_reserve_exact(len)?;
    text.push_str(arg0);
    for part in [arg1, args.as_deref()].into_iter().flatten() {
        text.push(' ');
        text.push_str(part);
    }

    let mut wide = Vec::new();
    wide.try_reserve_exact(text.encode_utf16().count() + 1)?;
    wide.extend(text.encode_utf16());
    wide.push(0);

    Ok(LaunchCmdline { text, wide })
}

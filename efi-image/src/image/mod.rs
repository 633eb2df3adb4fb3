//! Executable images
//!
//! An [`Image`] is the downloaded content plus the small amount of mutable
//! state the boot flow attaches to it. Images are shared through
//! [`ImageRef`]: cloning the reference acquires it, dropping it releases
//! it, and the image is freed with the last reference.

mod list;
mod tag;

pub use list::{ImageList, ImageStore};
pub use tag::ImageTag;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use bitflags::bitflags;
use spin::Mutex;

use crate::error::Result;

bitflags! {
    /// Image state flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ImageFlags: u32 {
        /// Image is present in the image list
        const REGISTERED = 1 << 0;
        /// Image is excluded from constructed initrd archives
        const HIDDEN = 1 << 1;
    }
}

/// Recognised EFI image types, in probe order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// Accepted by the platform's LoadImage()
    Efi,
    /// Valid PE headers, but refused (or not tried) by LoadImage()
    EfiPe,
}

impl ImageFormat {
    pub const ALL: [ImageFormat; 2] = [ImageFormat::Efi, ImageFormat::EfiPe];

    pub fn name(&self) -> &'static str {
        match self {
            ImageFormat::Efi => "EFI",
            ImageFormat::EfiPe => "EFIPE",
        }
    }
}

/// Shared image reference
pub type ImageRef = Arc<Image>;

/// Downloaded executable image
pub struct Image {
    name: String,
    data: Vec<u8>,
    cmdline: Mutex<Option<String>>,
    flags: Mutex<ImageFlags>,
    format: Mutex<Option<ImageFormat>>,
}

impl Image {
    pub fn new(name: &str, data: Vec<u8>) -> ImageRef {
        Arc::new(Self {
            name: String::from(name),
            data,
            cmdline: Mutex::new(None),
            flags: Mutex::new(ImageFlags::empty()),
            format: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Copy of the current command line
    pub fn cmdline(&self) -> Option<String> {
        self.cmdline.lock().clone()
    }

    pub fn has_cmdline(&self) -> bool {
        self.cmdline.lock().is_some()
    }

    /// Replace (or clear) the command line
    pub fn set_cmdline(&self, cmdline: Option<&str>) -> Result<()> {
        let copy = match cmdline {
            Some(text) => {
                let mut copy = String::new();
                copy.try_reserve_exact(text.len())?;
                copy.push_str(text);
                Some(copy)
            }
            None => None,
        };
        *self.cmdline.lock() = copy;
        Ok(())
    }

    pub fn flags(&self) -> ImageFlags {
        *self.flags.lock()
    }

    pub fn contains_flags(&self, flags: ImageFlags) -> bool {
        self.flags.lock().contains(flags)
    }

    pub fn insert_flags(&self, flags: ImageFlags) {
        self.flags.lock().insert(flags);
    }

    pub fn remove_flags(&self, flags: ImageFlags) {
        self.flags.lock().remove(flags);
    }

    pub fn toggle_flags(&self, flags: ImageFlags) {
        self.flags.lock().toggle(flags);
    }

    pub fn is_hidden(&self) -> bool {
        self.contains_flags(ImageFlags::HIDDEN)
    }

    /// Exclude the image from constructed initrd archives
    pub fn hide(&self) {
        self.insert_flags(ImageFlags::HIDDEN);
    }

    /// Type recorded by format detection
    pub fn format(&self) -> Option<ImageFormat> {
        *self.format.lock()
    }

    pub fn set_format(&self, format: Option<ImageFormat>) {
        *self.format.lock() = format;
    }
}

impl core::fmt::Debug for Image {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Image")
            .field("name", &self.name)
            .field("len", &self.data.len())
            .field("cmdline", &self.cmdline())
            .field("flags", &self.flags())
            .field("format", &self.format())
            .finish()
    }
}

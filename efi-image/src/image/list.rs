// Registered image list

use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use super::{ImageFlags, ImageRef};
use crate::error::Result;

/// Image registration interface
///
/// Registered images are visible to the rest of the firmware, and in
/// particular to the file protocol handed to executed images.
pub trait ImageStore {
    /// Register an image; registering an already registered image succeeds
    fn register(&self, image: &ImageRef) -> Result<()>;

    /// Unregister an image; unregistering an unknown image is a no-op
    fn unregister(&self, image: &ImageRef);
}

/// In-memory image list
pub struct ImageList {
    images: Mutex<Vec<ImageRef>>,
}

impl ImageList {
    pub const fn new() -> Self {
        Self {
            images: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.images.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.lock().is_empty()
    }

    pub fn contains(&self, image: &ImageRef) -> bool {
        self.images.lock().iter().any(|i| Arc::ptr_eq(i, image))
    }

    /// Find a registered image by name
    pub fn find(&self, name: &str) -> Option<ImageRef> {
        self.images
            .lock()
            .iter()
            .find(|image| image.name() == name)
            .cloned()
    }

    /// Images to be included in a constructed initrd archive
    pub fn archive_images(&self) -> Vec<ImageRef> {
        self.images
            .lock()
            .iter()
            .filter(|image| !image.is_hidden())
            .cloned()
            .collect()
    }
}

impl Default for ImageList {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageStore for ImageList {
    fn register(&self, image: &ImageRef) -> Result<()> {
        let mut images = self.images.lock();
        if !images.iter().any(|i| Arc::ptr_eq(i, image)) {
            images.try_reserve(1)?;
            images.push(Arc::clone(image));
            log::debug!("Registered image {}", image.name());
        }
        image.insert_flags(ImageFlags::REGISTERED);
        Ok(())
    }

    fn unregister(&self, image: &ImageRef) {
        let mut images = self.images.lock();
        if let Some(index) = images.iter().position(|i| Arc::ptr_eq(i, image)) {
            images.remove(index);
            log::debug!("Unregistered image {}", image.name());
        }
        image.remove_flags(ImageFlags::REGISTERED);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Image;
    use alloc::vec;

    #[test]
    fn test_register_is_idempotent() {
        let list = ImageList::new();
        let image = Image::new("ipxe.efi", vec![0; 8]);
        list.register(&image).unwrap();
        list.register(&image).unwrap();
        assert_eq!(list.len(), 1);
        assert!(image.contains_flags(ImageFlags::REGISTERED));
        assert_eq!(Arc::strong_count(&image), 2);

        list.unregister(&image);
        assert!(list.is_empty());
        assert!(!image.contains_flags(ImageFlags::REGISTERED));
        assert_eq!(Arc::strong_count(&image), 1);
    }

    #[test]
    fn test_archive_skips_hidden() {
        let list = ImageList::new();
        let kernel = Image::new("vmlinuz", vec![]);
        let initrd = Image::new("initrd.img", vec![]);
        list.register(&kernel).unwrap();
        list.register(&initrd).unwrap();
        kernel.hide();

        let archive = list.archive_images();
        assert_eq!(archive.len(), 1);
        assert_eq!(archive[0].name(), "initrd.img");
        assert!(list.find("vmlinuz").is_some());
    }
}

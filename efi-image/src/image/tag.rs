// Image role tags

use alloc::sync::Arc;

use spin::Mutex;

use super::ImageRef;

/// Role tag holding at most one image
///
/// The tag owns a reference to its image. Tagging a new image (or
/// clearing the tag) releases the previous one.
pub struct ImageTag {
    name: &'static str,
    image: Mutex<Option<ImageRef>>,
}

impl ImageTag {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            image: Mutex::new(None),
        }
    }

    /// Tag `image` (or clear the tag), returning the previous occupant
    pub fn set(&self, image: Option<&ImageRef>) -> Option<ImageRef> {
        let previous = core::mem::replace(&mut *self.image.lock(), image.cloned());
        if let Some(image) = image {
            log::debug!("Tagged image {} as {}", image.name(), self.name);
        }
        previous
    }

    /// Acquire the tagged image
    pub fn get(&self) -> Option<ImageRef> {
        self.image.lock().clone()
    }

    pub fn is_set(&self) -> bool {
        self.image.lock().is_some()
    }

    /// Check whether `image` currently carries this tag
    pub fn is(&self, image: &ImageRef) -> bool {
        self.image
            .lock()
            .as_ref()
            .is_some_and(|tagged| Arc::ptr_eq(tagged, image))
    }

    /// Release the tagged image
    pub fn clear(&self) {
        drop(self.set(None));
    }
}

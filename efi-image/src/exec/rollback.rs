// Ordered undo stack for an execution attempt
//
// Each side effect that outlives a successful attempt (flag changes,
// registration, protocols installed on the SNP handle) is pushed here
// once it has taken effect. Dropping the stack undoes everything in
// reverse order; `commit` keeps it all.

use alloc::vec::Vec;

use uefi_raw::Handle;

use crate::error::Result;
use crate::image::{ImageFlags, ImageRef, ImageStore};
use crate::platform::AuxServices;

/// Upper bound on entries pushed by a single execution attempt
const MAX_UNDO: usize = 5;

/// Undo action for one completed step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Undo {
    /// Toggle these flags back on the image
    Hidden(ImageFlags),
    /// Unregister the image
    Registered,
    /// Uninstall the file access protocol from the device
    FileAccess(Handle),
    /// Uninstall the PXE base code protocol from the device
    Pxe(Handle),
    /// Uninstall the download protocol from the device
    Download(Handle),
}

pub struct Rollback<'a> {
    image: &'a ImageRef,
    images: &'a dyn ImageStore,
    aux: &'a dyn AuxServices,
    stack: Vec<Undo>,
}

impl<'a> Rollback<'a> {
    /// Create an empty stack for `image`
    ///
    /// Capacity for every entry is reserved up front, so that recording
    /// a completed step can never fail.
    pub fn new(
        image: &'a ImageRef,
        images: &'a dyn ImageStore,
        aux: &'a dyn AuxServices,
    ) -> Result<Self> {
        let mut stack = Vec::new();
        stack.try_reserve_exact(MAX_UNDO)?;
        Ok(Self {
            image,
            images,
            aux,
            stack,
        })
    }

    pub fn push(&mut self, undo: Undo) {
        debug_assert!(self.stack.len() < MAX_UNDO);
        self.stack.push(undo);
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Keep every recorded side effect
    pub fn commit(mut self) {
        log::trace!("Keeping {} step(s) for {}", self.stack.len(), self.image.name());
        self.stack.clear();
    }

    /// Undo every recorded side effect, most recent first
    pub fn unwind(self) {
        drop(self);
    }

    fn undo(&self, undo: Undo) {
        match undo {
            Undo::Hidden(toggle) => self.image.toggle_flags(toggle),
            Undo::Registered => self.images.unregister(self.image),
            Undo::FileAccess(device) => self.aux.uninstall_file(device),
            Undo::Pxe(device) => self.aux.uninstall_pxe(device),
            Undo::Download(device) => self.aux.uninstall_download(device),
        }
    }
}

impl Drop for Rollback<'_> {
    fn drop(&mut self) {
        while let Some(undo) = self.stack.pop() {
            log::trace!("Undoing {:?} for {}", undo, self.image.name());
            self.undo(undo);
        }
    }
}

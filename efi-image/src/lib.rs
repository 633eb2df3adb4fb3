//! NOS EFI Image Execution Layer
//!
//! Loads and starts EFI executables fetched by the network boot firmware.
//! When the platform's Secure Boot policy refuses an image, a registered
//! UEFI shim is executed in its place and the shim lock protocol is
//! unlocked on the shim's behalf.
//!
//! # Architecture
//!
//! - **Image**: Shared image references, role tags and the image list
//! - **Path / Cmdline**: Device path and load options for the executed image
//! - **Platform**: Firmware service contracts (loader, notifications, SNP, auxiliary services)
//! - **Shim**: Shim and crutch registry, shim lock unlocker
//! - **Exec**: Probe and execute state machine with ordered rollback
//! - **Firmware**: Raw boot services backend (`uefi_support`)
//!
//! Every firmware interaction goes through the traits in [`platform`], so
//! the state machine runs unchanged against the real firmware or against
//! test doubles.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod cmdline;
pub mod config;
pub mod error;
pub mod exec;
pub mod image;
pub mod mgmt;
pub mod path;
pub mod pe;
pub mod platform;
pub mod shim;

#[cfg(feature = "uefi_support")]
pub mod firmware;

pub use config::ExecConfig;
pub use error::{ExecError, Result};
pub use exec::{EfiImageExec, detect_format, probe};
pub use image::{Image, ImageFlags, ImageFormat, ImageList, ImageRef, ImageStore, ImageTag};
pub use mgmt::{ImageAcquirer, ShimOptions, shim_command};
pub use shim::{SHIM_REGISTRY, ShimRegistry, set_crutch, set_shim, shim};

//! PE/COFF header checks
//!
//! Secure Boot gives no unambiguous way to tell whether LoadImage()
//! refused a valid EFI executable because of its signature. An image is
//! therefore treated as a candidate for a separate PE loader (such as
//! the UEFI shim) when its headers describe a PE executable for the
//! running machine word size.

use crate::error::{ExecError, Result};

/// "MZ"
pub const DOS_SIGNATURE: u16 = 0x5A4D;
/// "PE\0\0"
pub const NT_SIGNATURE: u32 = 0x0000_4550;
/// Optional header magic for PE32 images
pub const NT_OPTIONAL_HDR32_MAGIC: u16 = 0x010B;
/// Optional header magic for PE32+ images
pub const NT_OPTIONAL_HDR64_MAGIC: u16 = 0x020B;

/// Size of the DOS stub header
pub const DOS_HEADER_SIZE: usize = 64;
/// Offset of `e_lfanew` within the DOS stub header
const DOS_LFANEW_OFFSET: usize = 0x3C;
/// Size of the larger (PE32+) variant of the NT headers
pub const NT_HEADERS_SIZE: usize = 4 + 20 + 240;
/// Offset of the optional header magic within the NT headers
const OPTIONAL_MAGIC_OFFSET: usize = 4 + 20;

/// Optional header magic matching the native word size
pub const fn native_magic() -> u16 {
    if cfg!(target_pointer_width = "32") {
        NT_OPTIONAL_HDR32_MAGIC
    } else {
        NT_OPTIONAL_HDR64_MAGIC
    }
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Check that `data` carries DOS, PE and native optional headers
///
/// `name` is used for diagnostics only.
pub fn probe_pe(name: &str, data: &[u8]) -> Result<()> {
    if data.len() < DOS_HEADER_SIZE {
        log::debug!("image {}: too short for DOS header", name);
        return Err(ExecError::UnsupportedFormat);
    }
    if read_u16(data, 0) != DOS_SIGNATURE {
        log::debug!("image {}: missing MZ signature", name);
        return Err(ExecError::UnsupportedFormat);
    }

    let lfanew = read_u32(data, DOS_LFANEW_OFFSET) as usize;
    if data.len() < lfanew || (data.len() - lfanew) < NT_HEADERS_SIZE {
        log::debug!("image {}: too short for PE header", name);
        return Err(ExecError::UnsupportedFormat);
    }
    let nt = &data[lfanew..];
    if read_u32(nt, 0) != NT_SIGNATURE {
        log::debug!("image {}: missing PE signature", name);
        return Err(ExecError::UnsupportedFormat);
    }

    let magic = read_u16(nt, OPTIONAL_MAGIC_OFFSET);
    if magic != native_magic() {
        log::debug!("image {}: incorrect magic {:04x}", name, magic);
        return Err(ExecError::UnsupportedFormat);
    }

    Ok(())
}

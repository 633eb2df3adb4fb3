//! Device path construction
//!
//! Executed images are given a device path made of the SNP device's own
//! path followed by a file path node naming the image, so that the image
//! (and shim in particular) can locate its siblings through the file
//! protocol installed on the same handle.

use alloc::string::String;
use alloc::vec::Vec;

use uefi_raw::Status;
use uefi_raw::protocol::device_path::{DeviceSubType, DeviceType};

use crate::error::{ExecError, Result};

/// Size of a device path node header
pub const NODE_HEADER_SIZE: usize = 4;

/// End-of-entire-path node; on its own, the empty device path
pub const END_DEVICE_PATH: [u8; NODE_HEADER_SIZE] =
    [DeviceType::END.0, DeviceSubType::END_ENTIRE.0, NODE_HEADER_SIZE as u8, 0];

/// Owned, END-terminated device path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePathBuf {
    bytes: Vec<u8>,
}

impl DevicePathBuf {
    /// Path consisting of the end node only
    pub fn empty() -> Self {
        Self {
            bytes: END_DEVICE_PATH.to_vec(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Total size including the end node
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Name carried by the last file path node
    pub fn file_name(&self) -> Option<String> {
        let mut name = None;
        for (node_type, sub_type, body) in nodes(&self.bytes) {
            if node_type == DeviceType::MEDIA.0 && sub_type == DeviceSubType::MEDIA_FILE_PATH.0 {
                let units = body
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .take_while(|&c| c != 0);
                name = Some(char::decode_utf16(units).map(|c| c.unwrap_or('?')).collect());
            }
        }
        name
    }
}

/// Iterate over the nodes of a device path, stopping at the end node
fn nodes(path: &[u8]) -> impl Iterator<Item = (u8, u8, &[u8])> {
    let mut rest = path;
    core::iter::from_fn(move || {
        if rest.len() < NODE_HEADER_SIZE || rest[0] == DeviceType::END.0 {
            return None;
        }
        let len = u16::from_le_bytes([rest[2], rest[3]]) as usize;
        if len < NODE_HEADER_SIZE || len > rest.len() {
            return None;
        }
        let (node, tail) = rest.split_at(len);
        rest = tail;
        Some((node[0], node[1], &node[NODE_HEADER_SIZE..]))
    })
}

/// Length of a device path, excluding its end node
pub fn device_path_len(path: &[u8]) -> usize {
    nodes(path)
        .map(|(_, _, body)| NODE_HEADER_SIZE + body.len())
        .sum()
}

/// Build `parent` + file path node for `name` + end node
pub fn build_device_path(name: &str, parent: &[u8]) -> Result<DevicePathBuf> {
    let prefix_len = device_path_len(parent);
    let name_units = name.encode_utf16().count() + 1;
    let filepath_len = NODE_HEADER_SIZE + name_units * 2;
    let filepath_len = u16::try_from(filepath_len)
        .map_err(|_| ExecError::Platform(Status::INVALID_PARAMETER))?;
    let len = prefix_len + filepath_len as usize + NODE_HEADER_SIZE;

    let mut bytes = Vec::new();
    bytes.try_reserve_exact(len)?;
    bytes.extend_from_slice(&parent[..prefix_len]);
    bytes.push(DeviceType::MEDIA.0);
    bytes.push(DeviceSubType::MEDIA_FILE_PATH.0);
    bytes.extend_from_slice(&filepath_len.to_le_bytes());
    for unit in name.encode_utf16().chain(Some(0)) {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    bytes.extend_from_slice(&END_DEVICE_PATH);

    Ok(DevicePathBuf { bytes })
}

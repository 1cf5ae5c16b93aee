//! The fixed trailer that makes a built executable self-describing.
//!
//! The last [`FOOTER_LEN`] bytes of every output are a little-endian record
//! ending in [`FOOTER_MAGIC`], so a launcher can find its payload with a
//! single seek from the end of its own image and without any knowledge of
//! the PE layout in front of it.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use serde::Serialize;

use crate::error::BuildError;

/// Total size of the trailer in bytes.
pub const FOOTER_LEN: usize = 32;
/// Magic at the very end of the file. The trailing digits version the
/// container, not the payload record (see [`PAYLOAD_FORMAT_VERSION`]).
pub const FOOTER_MAGIC: &[u8; 8] = b"SFXFRG01";
/// Payload record format understood by this crate.
pub const PAYLOAD_FORMAT_VERSION: u32 = 1;

/// The decoded trailer of a built executable.
///
/// Layout, from `file_len - 32`:
///
/// | offset | size | field            |
/// |--------|------|------------------|
/// | 0      | 8    | `payload_offset` |
/// | 8      | 8    | `payload_size`   |
/// | 16     | 4    | `payload_crc32`  |
/// | 20     | 4    | `format_version` |
/// | 24     | 8    | magic            |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PayloadFooter {
    /// Absolute file offset of the first payload byte.
    pub payload_offset: u64,
    /// Payload length in bytes.
    pub payload_size: u64,
    /// CRC-32 (IEEE) of the payload bytes.
    pub payload_crc32: u32,
    /// Record format tag, currently always [`PAYLOAD_FORMAT_VERSION`].
    pub format_version: u32,
}

impl PayloadFooter {
    pub fn new(payload_offset: u64, payload_size: u64, payload_crc32: u32) -> Self {
        PayloadFooter {
            payload_offset,
            payload_size,
            payload_crc32,
            format_version: PAYLOAD_FORMAT_VERSION,
        }
    }

    pub fn encode(&self) -> [u8; FOOTER_LEN] {
        let mut out = [0u8; FOOTER_LEN];
        out[0..8].copy_from_slice(&self.payload_offset.to_le_bytes());
        out[8..16].copy_from_slice(&self.payload_size.to_le_bytes());
        out[16..20].copy_from_slice(&self.payload_crc32.to_le_bytes());
        out[20..24].copy_from_slice(&self.format_version.to_le_bytes());
        out[24..32].copy_from_slice(FOOTER_MAGIC);
        out
    }

    /// Decodes a trailer slice of exactly [`FOOTER_LEN`] bytes.
    pub fn decode(tail: &[u8]) -> Result<Self, BuildError> {
        if tail.len() != FOOTER_LEN {
            return Err(BuildError::BadFooter {
                reason: format!("trailer is {} bytes, expected {}", tail.len(), FOOTER_LEN),
            });
        }
        if &tail[24..32] != FOOTER_MAGIC {
            return Err(BuildError::BadFooter { reason: "magic bytes missing at end of file".to_string() });
        }
        let footer = PayloadFooter {
            payload_offset: u64::from_le_bytes(tail[0..8].try_into().unwrap()),
            payload_size: u64::from_le_bytes(tail[8..16].try_into().unwrap()),
            payload_crc32: u32::from_le_bytes(tail[16..20].try_into().unwrap()),
            format_version: u32::from_le_bytes(tail[20..24].try_into().unwrap()),
        };
        if footer.format_version != PAYLOAD_FORMAT_VERSION {
            return Err(BuildError::BadFooter {
                reason: format!(
                    "payload record format {} is not supported (this build reads format {})",
                    footer.format_version, PAYLOAD_FORMAT_VERSION
                ),
            });
        }
        Ok(footer)
    }

    /// Decodes and bounds-checks the trailer of a complete in-memory image.
    pub fn from_image(image: &[u8]) -> Result<Self, BuildError> {
        if image.len() < FOOTER_LEN {
            return Err(BuildError::BadFooter {
                reason: format!("file is {} bytes, too small to carry a trailer", image.len()),
            });
        }
        let footer = Self::decode(&image[image.len() - FOOTER_LEN..])?;
        footer.check_bounds(image.len() as u64)?;
        Ok(footer)
    }

    /// Reads the trailer of an open file by seeking from the end.
    pub fn read_from(file: &mut File, path: &Path) -> Result<Self, BuildError> {
        let io_err = |e: std::io::Error| BuildError::Io { source: e, path: path.to_path_buf() };
        let file_len = file.metadata().map_err(io_err)?.len();
        if file_len < FOOTER_LEN as u64 {
            return Err(BuildError::BadFooter {
                reason: format!("file is {} bytes, too small to carry a trailer", file_len),
            });
        }
        file.seek(SeekFrom::End(-(FOOTER_LEN as i64))).map_err(io_err)?;
        let mut tail = [0u8; FOOTER_LEN];
        file.read_exact(&mut tail).map_err(io_err)?;
        let footer = Self::decode(&tail)?;
        footer.check_bounds(file_len)?;
        Ok(footer)
    }

    /// Checks that the payload region sits exactly between the image and
    /// the trailer. The builder writes these regions back to back, so any
    /// slack means the file was truncated or grown after the fact.
    fn check_bounds(&self, file_len: u64) -> Result<(), BuildError> {
        let end = self
            .payload_offset
            .checked_add(self.payload_size)
            .ok_or_else(|| BuildError::BadFooter { reason: "payload bounds overflow".to_string() })?;
        if end != file_len - FOOTER_LEN as u64 {
            return Err(BuildError::BadFooter {
                reason: format!(
                    "payload claims bytes {}..{} but the trailer starts at {}",
                    self.payload_offset,
                    end,
                    file_len - FOOTER_LEN as u64
                ),
            });
        }
        Ok(())
    }
}

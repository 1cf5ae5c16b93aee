//! `.ico` parsing and conversion to icon resources.
//!
//! An icon file carries a small directory plus one image blob per size.
//! In a PE the blobs become individual `RT_ICON` entries and the
//! directory becomes an `RT_GROUP_ICON` whose entries reference the
//! `RT_ICON` ids instead of file offsets. Image data (BMP or PNG) is
//! carried through untouched.

use std::path::Path;

use crate::error::BuildError;

const ICONDIR_LEN: usize = 6;
const ICONDIRENTRY_LEN: usize = 16;
const GRPICONDIRENTRY_LEN: usize = 14;

/// One image from an icon file: the directory fields that survive into
/// the group resource, plus the raw blob.
#[derive(Debug, Clone)]
pub struct IconImage {
    pub width: u8,
    pub height: u8,
    pub color_count: u8,
    pub planes: u16,
    pub bit_count: u16,
    pub data: Vec<u8>,
}

/// A parsed `.ico` file.
#[derive(Debug, Clone)]
pub struct IconFile {
    images: Vec<IconImage>,
}

impl IconFile {
    pub fn load(path: &Path) -> Result<Self, BuildError> {
        let bytes = std::fs::read(path).map_err(|e| BuildError::ResourceUnreadable {
            source: e,
            path: path.to_path_buf(),
        })?;
        Self::parse(&bytes, path)
    }

    pub fn parse(bytes: &[u8], path: &Path) -> Result<Self, BuildError> {
        let invalid = |reason: String| BuildError::UnsupportedIcon {
            path: path.to_path_buf(),
            reason,
        };
        if bytes.len() < ICONDIR_LEN {
            return Err(invalid("file too small for an icon directory".to_string()));
        }
        let u16_at =
            |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
        if u16_at(0) != 0 {
            return Err(invalid("reserved field is not zero".to_string()));
        }
        if u16_at(2) != 1 {
            return Err(invalid(format!("resource type {} is not an icon", u16_at(2))));
        }
        let count = u16_at(4) as usize;
        if count == 0 {
            return Err(invalid("icon directory is empty".to_string()));
        }
        if bytes.len() < ICONDIR_LEN + count * ICONDIRENTRY_LEN {
            return Err(invalid(format!("directory claims {} images but the file is truncated", count)));
        }
        let mut images = Vec::with_capacity(count);
        for index in 0..count {
            let at = ICONDIR_LEN + index * ICONDIRENTRY_LEN;
            let bytes_in_res = u32::from_le_bytes([bytes[at + 8], bytes[at + 9], bytes[at + 10], bytes[at + 11]]) as usize;
            let offset = u32::from_le_bytes([bytes[at + 12], bytes[at + 13], bytes[at + 14], bytes[at + 15]]) as usize;
            let data = bytes
                .get(offset..offset.saturating_add(bytes_in_res))
                .ok_or_else(|| invalid(format!("image {} extends past end of file", index)))?;
            images.push(IconImage {
                width: bytes[at],
                height: bytes[at + 1],
                color_count: bytes[at + 2],
                planes: u16_at(at + 4),
                bit_count: u16_at(at + 6),
                data: data.to_vec(),
            });
        }
        Ok(IconFile { images })
    }

    pub fn images(&self) -> &[IconImage] {
        &self.images
    }

    /// Builds the `RT_GROUP_ICON` payload. Entry `i` references the
    /// `RT_ICON` resource with id `first_id + i`.
    pub fn group_directory(&self, first_id: u16) -> Vec<u8> {
        let mut out = Vec::with_capacity(ICONDIR_LEN + self.images.len() * GRPICONDIRENTRY_LEN);
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&(self.images.len() as u16).to_le_bytes());
        for (index, image) in self.images.iter().enumerate() {
            out.push(image.width);
            out.push(image.height);
            out.push(image.color_count);
            out.push(0);
            out.extend_from_slice(&image.planes.to_le_bytes());
            out.extend_from_slice(&image.bit_count.to_le_bytes());
            out.extend_from_slice(&(image.data.len() as u32).to_le_bytes());
            out.extend_from_slice(&(first_id + index as u16).to_le_bytes());
        }
        out
    }
}

//! Minimal PE image access for stub patching.
//!
//! The builder never relocates or re-lays-out the stub. It only needs to
//! find the section table, the resource data directory entry and the
//! header checksum field, then patch bytes in place. Parsing is therefore
//! limited to the handful of header fields those patches touch, for both
//! PE32 (`0x10B`) and PE32+ (`0x20B`) images.

pub mod rsrc;

use crate::error::BuildError;

/// Size of one section table entry.
pub const SECTION_HEADER_LEN: usize = 40;
/// Data directory slot of the resource table.
pub const RESOURCE_TABLE_INDEX: usize = 2;

pub(crate) fn truncated(offset: usize) -> BuildError {
    BuildError::StubCorrupt { reason: format!("image truncated at offset {:#x}", offset) }
}

pub(crate) fn read_u16(image: &[u8], offset: usize) -> Result<u16, BuildError> {
    image
        .get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| truncated(offset))
}

pub(crate) fn read_u32(image: &[u8], offset: usize) -> Result<u32, BuildError> {
    image
        .get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| truncated(offset))
}

/// One entry of the section table.
#[derive(Debug, Clone)]
pub struct SectionHeader {
    pub name: [u8; 8],
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
    pub characteristics: u32,
}

impl SectionHeader {
    /// Section name with trailing NUL padding stripped.
    pub fn name_str(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(8);
        std::str::from_utf8(&self.name[..end]).unwrap_or("")
    }

    /// File range backing this section.
    pub fn raw_range(&self) -> std::ops::Range<usize> {
        let start = self.pointer_to_raw_data as usize;
        start..start + self.size_of_raw_data as usize
    }

    /// Bytes that may be rewritten without moving anything else: the
    /// smaller of the on-disk and in-memory extents.
    pub fn capacity(&self) -> usize {
        self.size_of_raw_data.min(self.virtual_size) as usize
    }

    pub fn contains_rva(&self, rva: u32) -> bool {
        let span = self.virtual_size.max(self.size_of_raw_data);
        rva >= self.virtual_address && rva - self.virtual_address < span
    }
}

/// Parsed header geometry of a stub image.
#[derive(Debug, Clone)]
pub struct PeLayout {
    pub is_64: bool,
    pub machine: u16,
    pub subsystem: u16,
    /// File offset of the `CheckSum` field in the optional header.
    pub checksum_offset: usize,
    /// File offset of data directory entry 0.
    pub data_dir_offset: usize,
    pub num_data_dirs: u32,
    pub sections: Vec<SectionHeader>,
}

impl PeLayout {
    pub fn parse(image: &[u8]) -> Result<Self, BuildError> {
        let corrupt = |reason: String| BuildError::StubCorrupt { reason };
        if image.len() < 0x40 {
            return Err(corrupt("too small for a DOS header".to_string()));
        }
        if &image[0..2] != b"MZ" {
            return Err(corrupt("no MZ signature".to_string()));
        }
        let pe_offset = read_u32(image, 0x3C)? as usize;
        if pe_offset % 4 != 0 {
            return Err(corrupt(format!("PE header offset {:#x} is not 4-byte aligned", pe_offset)));
        }
        if image.get(pe_offset..pe_offset + 4) != Some(b"PE\0\0") {
            return Err(corrupt("no PE signature".to_string()));
        }
        let coff = pe_offset + 4;
        let machine = read_u16(image, coff)?;
        let number_of_sections = read_u16(image, coff + 2)? as usize;
        let size_of_optional = read_u16(image, coff + 16)? as usize;
        let opt = coff + 20;
        let magic = read_u16(image, opt)?;
        let is_64 = match magic {
            0x10B => false,
            0x20B => true,
            other => return Err(corrupt(format!("unknown optional header magic {:#x}", other))),
        };
        let (dirs_count_at, dirs_at) = if is_64 { (108, 112) } else { (92, 96) };
        if size_of_optional < dirs_at {
            return Err(corrupt(format!("optional header is only {} bytes", size_of_optional)));
        }
        let checksum_offset = opt + 64;
        let subsystem = read_u16(image, opt + 68)?;
        let num_data_dirs = read_u32(image, opt + dirs_count_at)?;
        let data_dir_offset = opt + dirs_at;

        let mut sections = Vec::with_capacity(number_of_sections);
        let table = opt + size_of_optional;
        for i in 0..number_of_sections {
            let at = table + i * SECTION_HEADER_LEN;
            let mut name = [0u8; 8];
            name.copy_from_slice(
                image.get(at..at + 8).ok_or_else(|| truncated(at))?,
            );
            let header = SectionHeader {
                name,
                virtual_size: read_u32(image, at + 8)?,
                virtual_address: read_u32(image, at + 12)?,
                size_of_raw_data: read_u32(image, at + 16)?,
                pointer_to_raw_data: read_u32(image, at + 20)?,
                characteristics: read_u32(image, at + 36)?,
            };
            if header.size_of_raw_data > 0 {
                let end = header.pointer_to_raw_data as u64 + header.size_of_raw_data as u64;
                if end > image.len() as u64 {
                    return Err(corrupt(format!(
                        "section '{}' extends past end of image",
                        header.name_str()
                    )));
                }
            }
            sections.push(header);
        }
        Ok(PeLayout {
            is_64,
            machine,
            subsystem,
            checksum_offset,
            data_dir_offset,
            num_data_dirs,
            sections,
        })
    }

    pub fn section(&self, name: &str) -> Option<&SectionHeader> {
        self.sections.iter().find(|s| s.name_str() == name)
    }

    /// File offset of data directory entry `index`, if the header carries
    /// that many entries.
    pub fn data_dir_entry_offset(&self, index: usize) -> Option<usize> {
        if (index as u32) < self.num_data_dirs {
            Some(self.data_dir_offset + index * 8)
        } else {
            None
        }
    }
}

/// Rewrites one data directory entry in place.
pub fn set_data_directory(
    image: &mut [u8],
    layout: &PeLayout,
    index: usize,
    rva: u32,
    size: u32,
) -> Result<(), BuildError> {
    let at = layout.data_dir_entry_offset(index).ok_or_else(|| BuildError::StubCorrupt {
        reason: format!("image has {} data directories, cannot set entry {}", layout.num_data_dirs, index),
    })?;
    if at + 8 > image.len() {
        return Err(truncated(at));
    }
    image[at..at + 4].copy_from_slice(&rva.to_le_bytes());
    image[at + 4..at + 8].copy_from_slice(&size.to_le_bytes());
    Ok(())
}

/// Computes the PE header checksum of `image`, treating the 4 bytes at
/// `checksum_offset` as zero.
///
/// This is the documented `CheckSumMappedFile` algorithm: dword sum with
/// carry folding, folded to 16 bits, plus the file length.
pub fn compute_checksum(image: &[u8], checksum_offset: usize) -> u32 {
    let mut sum: u64 = 0;
    let mut i = 0;
    while i < image.len() {
        let mut word = [0u8; 4];
        let n = (image.len() - i).min(4);
        word[..n].copy_from_slice(&image[i..i + n]);
        if i == checksum_offset {
            word = [0u8; 4];
        }
        sum += u32::from_le_bytes(word) as u64;
        sum = (sum & 0xFFFF_FFFF) + (sum >> 32);
        i += 4;
    }
    let mut folded = (sum & 0xFFFF) + (sum >> 16);
    folded += folded >> 16;
    folded &= 0xFFFF;
    folded as u32 + image.len() as u32
}

/// Recomputes and stores the header checksum.
pub fn write_checksum(image: &mut [u8], layout: &PeLayout) {
    let value = compute_checksum(image, layout.checksum_offset);
    let at = layout.checksum_offset;
    image[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

//! `VS_VERSIONINFO` serialization.
//!
//! The version resource is a tree of length-prefixed nodes, each holding a
//! UTF-16 key, an optional value and child nodes, everything padded to
//! 32-bit boundaries. The builder always writes a fixed file info block,
//! one string table and one `Translation` entry for the neutral language
//! with the Unicode code page, which is the table launchers query as
//! `\StringFileInfo\000004b0\...`.

use crate::error::BuildError;
use crate::request::{BuildRequest, ProductVersion};

pub const VS_SIGNATURE: u32 = 0xFEEF_04BD;
const VS_STRUC_VERSION: u32 = 0x0001_0000;
const VOS_NT_WINDOWS32: u32 = 0x0004_0004;
const VFT_APP: u32 = 0x0000_0001;
const FILE_FLAGS_MASK: u32 = 0x3F;
const FIXED_INFO_LEN: usize = 52;

/// Language and code page of the single translation the builder stamps:
/// neutral language, Unicode code page.
pub const TRANSLATION_LANG: u16 = 0x0000;
pub const TRANSLATION_CODEPAGE: u16 = 0x04B0;

/// Key of the string table matching the translation entry.
pub fn string_table_key() -> String {
    format!("{:04x}{:04x}", TRANSLATION_LANG, TRANSLATION_CODEPAGE)
}

/// The content of one version resource: binary versions plus the string
/// table entries, in stamp order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub file_version: ProductVersion,
    pub product_version: ProductVersion,
    pub strings: Vec<(String, String)>,
}

impl VersionInfo {
    /// Assembles the version info a request asks for. `FileDescription`
    /// falls back to the product name, the way installers usually ship.
    pub fn for_request(request: &BuildRequest) -> Self {
        let version = request.product_version();
        let extra = request.version_strings();
        let mut strings = Vec::new();
        if let Some(company) = &extra.company_name {
            strings.push(("CompanyName".to_string(), company.clone()));
        }
        let description = extra
            .file_description
            .clone()
            .unwrap_or_else(|| request.product_name().to_string());
        strings.push(("FileDescription".to_string(), description));
        strings.push(("FileVersion".to_string(), version.to_string()));
        if let Some(copyright) = &extra.legal_copyright {
            strings.push(("LegalCopyright".to_string(), copyright.clone()));
        }
        strings.push(("ProductName".to_string(), request.product_name().to_string()));
        strings.push(("ProductVersion".to_string(), version.to_string()));
        VersionInfo {
            file_version: version,
            product_version: version,
            strings,
        }
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        self.strings
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Serializes the whole `VS_VERSIONINFO` tree.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(512);

        let root = begin_node(&mut out, FIXED_INFO_LEN as u16, 0, "VS_VERSION_INFO");
        self.push_fixed_info(&mut out);
        pad4(&mut out);

        let sfi = begin_node(&mut out, 0, 1, "StringFileInfo");
        let table = begin_node(&mut out, 0, 1, &string_table_key());
        for (key, value) in &self.strings {
            pad4(&mut out);
            let units: Vec<u16> = value.encode_utf16().collect();
            let node = begin_node(&mut out, units.len() as u16 + 1, 1, key);
            for unit in &units {
                out.extend_from_slice(&unit.to_le_bytes());
            }
            out.extend_from_slice(&0u16.to_le_bytes());
            end_node(&mut out, node);
        }
        end_node(&mut out, table);
        end_node(&mut out, sfi);

        pad4(&mut out);
        let vfi = begin_node(&mut out, 0, 1, "VarFileInfo");
        let translation = begin_node(&mut out, 4, 0, "Translation");
        out.extend_from_slice(&TRANSLATION_LANG.to_le_bytes());
        out.extend_from_slice(&TRANSLATION_CODEPAGE.to_le_bytes());
        end_node(&mut out, translation);
        end_node(&mut out, vfi);

        end_node(&mut out, root);
        out
    }

    fn push_fixed_info(&self, out: &mut Vec<u8>) {
        for value in [
            VS_SIGNATURE,
            VS_STRUC_VERSION,
            self.file_version.ms(),
            self.file_version.ls(),
            self.product_version.ms(),
            self.product_version.ls(),
            FILE_FLAGS_MASK,
            0, // file flags
            VOS_NT_WINDOWS32,
            VFT_APP,
            0, // file subtype
            0, // date hi
            0, // date lo
        ] {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }

    /// Decodes a serialized version resource back into versions and
    /// string table entries.
    pub fn parse(data: &[u8]) -> Result<Self, BuildError> {
        let root = NodeHead::read(data, 0)?;
        if root.key != "VS_VERSION_INFO" {
            return Err(bad(format!("root key is '{}'", root.key)));
        }
        if root.value_len(0) < FIXED_INFO_LEN {
            return Err(bad("fixed file info block missing".to_string()));
        }
        let fixed_at = root.value_at;
        let word = |index: usize| -> Result<u32, BuildError> {
            let at = fixed_at + index * 4;
            data.get(at..at + 4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .ok_or_else(|| bad("fixed file info truncated".to_string()))
        };
        if word(0)? != VS_SIGNATURE {
            return Err(bad(format!("fixed info signature is {:#010x}", word(0)?)));
        }
        let file_version = ProductVersion::from_ms_ls(word(2)?, word(3)?);
        let product_version = ProductVersion::from_ms_ls(word(4)?, word(5)?);

        let mut strings = Vec::new();
        let mut pos = align4(fixed_at + FIXED_INFO_LEN);
        while pos + 6 <= root.end {
            let child = NodeHead::read(data, pos)?;
            if child.key == "StringFileInfo" {
                let mut table_pos = child.value_at;
                while table_pos + 6 <= child.end {
                    let table = NodeHead::read(data, table_pos)?;
                    let mut entry_pos = table.value_at;
                    while entry_pos + 6 <= table.end {
                        let entry = NodeHead::read(data, entry_pos)?;
                        let value_bytes = entry.value_len(1);
                        let raw = data
                            .get(entry.value_at..entry.value_at + value_bytes)
                            .ok_or_else(|| bad(format!("string value for '{}' truncated", entry.key)))?;
                        let mut units: Vec<u16> = raw
                            .chunks_exact(2)
                            .map(|b| u16::from_le_bytes([b[0], b[1]]))
                            .collect();
                        while units.last() == Some(&0) {
                            units.pop();
                        }
                        strings.push((entry.key, String::from_utf16_lossy(&units)));
                        entry_pos = align4(entry.end);
                    }
                    table_pos = align4(table.end);
                }
            }
            pos = align4(child.end);
        }
        Ok(VersionInfo { file_version, product_version, strings })
    }
}

struct NodeHead {
    end: usize,
    value_length: usize,
    wtype: u16,
    key: String,
    value_at: usize,
}

impl NodeHead {
    fn read(data: &[u8], at: usize) -> Result<Self, BuildError> {
        let u16_at = |off: usize| -> Result<u16, BuildError> {
            data.get(off..off + 2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]))
                .ok_or_else(|| bad(format!("node header truncated at {:#x}", at)))
        };
        let length = u16_at(at)? as usize;
        let value_length = u16_at(at + 2)? as usize;
        let wtype = u16_at(at + 4)?;
        if length < 6 || at + length > data.len() {
            return Err(bad(format!("node at {:#x} claims {} bytes", at, length)));
        }
        let mut units = Vec::new();
        let mut pos = at + 6;
        loop {
            let unit = u16_at(pos)?;
            pos += 2;
            if unit == 0 {
                break;
            }
            units.push(unit);
            if pos >= at + length {
                return Err(bad(format!("unterminated key in node at {:#x}", at)));
            }
        }
        Ok(NodeHead {
            end: at + length,
            value_length,
            wtype,
            key: String::from_utf16_lossy(&units),
            value_at: align4(pos),
        })
    }

    /// Value size in bytes; `wValueLength` counts words for text nodes.
    fn value_len(&self, expect_type: u16) -> usize {
        if self.wtype == 1 || expect_type == 1 {
            self.value_length * 2
        } else {
            self.value_length
        }
    }
}

fn bad(reason: String) -> BuildError {
    BuildError::StubCorrupt { reason: format!("version resource: {}", reason) }
}

fn align4(value: usize) -> usize {
    (value + 3) & !3
}

fn pad4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

/// Writes a node header and key, returning the patch position for
/// [`end_node`]. The value and children follow at the returned cursor.
fn begin_node(out: &mut Vec<u8>, value_length: u16, wtype: u16, key: &str) -> usize {
    let start = out.len();
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&value_length.to_le_bytes());
    out.extend_from_slice(&wtype.to_le_bytes());
    for unit in key.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out.extend_from_slice(&0u16.to_le_bytes());
    pad4(out);
    start
}

fn end_node(out: &mut Vec<u8>, start: usize) {
    let length = (out.len() - start) as u16;
    out[start..start + 2].copy_from_slice(&length.to_le_bytes());
}

//! Resource section parse and rebuild.
//!
//! The stub's `.rsrc` section is decoded into a flat table keyed by
//! `(type, name, language)` and rebuilt from scratch after patching. The
//! rebuilt tree always lands at the section's existing RVA, so only the
//! resource data directory size ever changes in the headers.
//!
//! Layout follows the PE/COFF spec: a three-level directory tree (types,
//! then names, then languages) in breadth-first order, with named entries
//! before numeric ones, name strings after the directories, and data
//! blobs aligned to 4 bytes.

use std::collections::BTreeMap;

use crate::error::BuildError;

use super::{read_u16, read_u32};

pub const RT_ICON: u32 = 3;
pub const RT_GROUP_ICON: u32 = 14;
pub const RT_VERSION: u32 = 16;
pub const RT_MANIFEST: u32 = 24;

/// Language id stamped on everything this builder writes.
pub const LANG_NEUTRAL: u16 = 0;

const SUBDIR_FLAG: u32 = 0x8000_0000;
const DIR_HEADER_LEN: usize = 16;
const DIR_ENTRY_LEN: usize = 8;
const DATA_ENTRY_LEN: usize = 16;

/// A resource type or name: either a numeric id or a string.
///
/// The derived ordering sorts names before ids, matching the order the
/// loader expects inside a directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceId {
    Name(String),
    Id(u32),
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceId::Name(s) => write!(f, "{}", s),
            ResourceId::Id(v) => write!(f, "#{}", v),
        }
    }
}

/// Full address of one resource: type, name and language.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey {
    pub type_id: ResourceId,
    pub name: ResourceId,
    pub lang: u16,
}

impl ResourceKey {
    /// Key with numeric type and name, the common case for the standard
    /// version / icon / manifest resources.
    pub fn ids(type_id: u32, name: u32, lang: u16) -> Self {
        ResourceKey {
            type_id: ResourceId::Id(type_id),
            name: ResourceId::Id(name),
            lang,
        }
    }
}

/// One resource payload plus its code page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceData {
    pub bytes: Vec<u8>,
    pub codepage: u32,
}

impl ResourceData {
    pub fn new(bytes: Vec<u8>) -> Self {
        ResourceData { bytes, codepage: 0 }
    }
}

/// A flat, ordered view of a resource section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceTable {
    entries: BTreeMap<ResourceKey, ResourceData>,
}

fn malformed(reason: String) -> BuildError {
    BuildError::StubCorrupt { reason }
}

fn align4(value: usize) -> usize {
    (value + 3) & !3
}

impl ResourceTable {
    pub fn new() -> Self {
        ResourceTable::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, key: ResourceKey, data: ResourceData) {
        self.entries.insert(key, data);
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&ResourceData> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourceKey, &ResourceData)> {
        self.entries.iter()
    }

    /// Drops every entry of the given numeric type. Returns how many were
    /// removed.
    pub fn remove_type(&mut self, type_id: u32) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.type_id != ResourceId::Id(type_id));
        before - self.entries.len()
    }

    pub fn count_of_type(&self, type_id: u32) -> usize {
        self.entries
            .keys()
            .filter(|key| key.type_id == ResourceId::Id(type_id))
            .count()
    }

    /// First entry of a numeric type in table order, if any.
    pub fn first_of_type(&self, type_id: u32) -> Option<(&ResourceKey, &ResourceData)> {
        self.entries
            .iter()
            .find(|(key, _)| key.type_id == ResourceId::Id(type_id))
    }

    /// Decodes the resource tree found at the start of `section`.
    ///
    /// `section_rva` is the RVA the section is mapped at; data entries
    /// store their payload location as an RVA and are resolved against it.
    pub fn parse(section: &[u8], section_rva: u32) -> Result<Self, BuildError> {
        let mut table = ResourceTable::new();
        parse_directory(section, section_rva, 0, 0, &mut Vec::new(), &mut table)?;
        Ok(table)
    }

    /// Serializes the table into a fresh resource tree based at
    /// `section_rva`. The output is deterministic for a given table.
    pub fn build(&self, section_rva: u32) -> Vec<u8> {
        // Regroup the flat map into the three directory levels. BTreeMap
        // iteration order is exactly the directory order.
        let mut tree: BTreeMap<&ResourceId, BTreeMap<&ResourceId, BTreeMap<u16, &ResourceData>>> =
            BTreeMap::new();
        for (key, data) in &self.entries {
            tree.entry(&key.type_id)
                .or_default()
                .entry(&key.name)
                .or_default()
                .insert(key.lang, data);
        }

        // Pass 1: place directories (breadth-first), name strings, data
        // entries and data blobs.
        let mut cursor = DIR_HEADER_LEN + DIR_ENTRY_LEN * tree.len();
        let mut type_dir_at = Vec::with_capacity(tree.len());
        for names in tree.values() {
            type_dir_at.push(cursor);
            cursor += DIR_HEADER_LEN + DIR_ENTRY_LEN * names.len();
        }
        let mut name_dir_at: Vec<Vec<usize>> = Vec::with_capacity(tree.len());
        for names in tree.values() {
            let mut dirs = Vec::with_capacity(names.len());
            for langs in names.values() {
                dirs.push(cursor);
                cursor += DIR_HEADER_LEN + DIR_ENTRY_LEN * langs.len();
            }
            name_dir_at.push(dirs);
        }
        let mut string_at: BTreeMap<&str, usize> = BTreeMap::new();
        for (type_id, names) in &tree {
            if let ResourceId::Name(s) = type_id {
                string_at.entry(s.as_str()).or_insert(0);
            }
            for name in names.keys() {
                if let ResourceId::Name(s) = name {
                    string_at.entry(s.as_str()).or_insert(0);
                }
            }
        }
        for (s, at) in string_at.iter_mut() {
            *at = cursor;
            cursor += 2 + 2 * s.encode_utf16().count();
        }
        cursor = align4(cursor);
        let data_entries_at = cursor;
        cursor += DATA_ENTRY_LEN * self.entries.len();
        let mut blob_at = Vec::with_capacity(self.entries.len());
        for data in self.entries.values() {
            cursor = align4(cursor);
            blob_at.push(cursor);
            cursor += data.bytes.len();
        }

        // Pass 2: write everything.
        let mut out = vec![0u8; cursor];
        let id_field = |rid: &ResourceId| -> u32 {
            match rid {
                ResourceId::Name(s) => SUBDIR_FLAG | string_at[s.as_str()] as u32,
                ResourceId::Id(v) => *v,
            }
        };

        write_dir_header(&mut out, 0, &tree.keys().cloned().collect::<Vec<_>>());
        let mut entry_at = DIR_HEADER_LEN;
        for (index, type_id) in tree.keys().enumerate() {
            write_u32(&mut out, entry_at, id_field(type_id));
            write_u32(&mut out, entry_at + 4, SUBDIR_FLAG | type_dir_at[index] as u32);
            entry_at += DIR_ENTRY_LEN;
        }

        let mut leaf = 0usize;
        for (t, names) in tree.values().enumerate() {
            let dir_at = type_dir_at[t];
            write_dir_header(&mut out, dir_at, &names.keys().cloned().collect::<Vec<_>>());
            let mut entry_at = dir_at + DIR_HEADER_LEN;
            for (n, name) in names.keys().enumerate() {
                write_u32(&mut out, entry_at, id_field(name));
                write_u32(&mut out, entry_at + 4, SUBDIR_FLAG | name_dir_at[t][n] as u32);
                entry_at += DIR_ENTRY_LEN;
            }
            for (n, langs) in names.values().enumerate() {
                let dir_at = name_dir_at[t][n];
                write_u16(&mut out, dir_at + 14, langs.len() as u16);
                let mut entry_at = dir_at + DIR_HEADER_LEN;
                for (lang, data) in langs {
                    let data_at = data_entries_at + DATA_ENTRY_LEN * leaf;
                    write_u32(&mut out, entry_at, *lang as u32);
                    write_u32(&mut out, entry_at + 4, data_at as u32);
                    write_u32(&mut out, data_at, section_rva + blob_at[leaf] as u32);
                    write_u32(&mut out, data_at + 4, data.bytes.len() as u32);
                    write_u32(&mut out, data_at + 8, data.codepage);
                    out[blob_at[leaf]..blob_at[leaf] + data.bytes.len()].copy_from_slice(&data.bytes);
                    entry_at += DIR_ENTRY_LEN;
                    leaf += 1;
                }
            }
        }

        for (s, at) in &string_at {
            let units: Vec<u16> = s.encode_utf16().collect();
            write_u16(&mut out, *at, units.len() as u16);
            for (i, unit) in units.iter().enumerate() {
                write_u16(&mut out, at + 2 + 2 * i, *unit);
            }
        }

        out
    }
}

fn write_u16(out: &mut [u8], at: usize, value: u16) {
    out[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn write_u32(out: &mut [u8], at: usize, value: u32) {
    out[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn write_dir_header(out: &mut [u8], at: usize, ids: &[&ResourceId]) {
    let named = ids.iter().filter(|rid| matches!(rid, ResourceId::Name(_))).count();
    write_u16(out, at + 12, named as u16);
    write_u16(out, at + 14, (ids.len() - named) as u16);
}

fn read_name(section: &[u8], at: usize) -> Result<String, BuildError> {
    let count = read_u16(section, at)
        .map_err(|_| malformed(format!("resource name string truncated at {:#x}", at)))? as usize;
    let mut units = Vec::with_capacity(count);
    for i in 0..count {
        let unit = read_u16(section, at + 2 + 2 * i)
            .map_err(|_| malformed(format!("resource name string truncated at {:#x}", at)))?;
        units.push(unit);
    }
    Ok(String::from_utf16_lossy(&units))
}

fn parse_directory(
    section: &[u8],
    section_rva: u32,
    dir_at: usize,
    depth: usize,
    path: &mut Vec<ResourceId>,
    table: &mut ResourceTable,
) -> Result<(), BuildError> {
    let named = read_u16(section, dir_at + 12)
        .map_err(|_| malformed(format!("resource directory truncated at {:#x}", dir_at)))?
        as usize;
    let ids = read_u16(section, dir_at + 14)
        .map_err(|_| malformed(format!("resource directory truncated at {:#x}", dir_at)))?
        as usize;
    for index in 0..named + ids {
        let entry_at = dir_at + DIR_HEADER_LEN + DIR_ENTRY_LEN * index;
        let raw_id = read_u32(section, entry_at)
            .map_err(|_| malformed(format!("resource entry truncated at {:#x}", entry_at)))?;
        let raw_offset = read_u32(section, entry_at + 4)
            .map_err(|_| malformed(format!("resource entry truncated at {:#x}", entry_at)))?;
        let rid = if raw_id & SUBDIR_FLAG != 0 {
            ResourceId::Name(read_name(section, (raw_id & !SUBDIR_FLAG) as usize)?)
        } else {
            ResourceId::Id(raw_id)
        };
        let is_subdir = raw_offset & SUBDIR_FLAG != 0;
        let offset = (raw_offset & !SUBDIR_FLAG) as usize;
        if depth < 2 {
            if !is_subdir {
                return Err(malformed(format!(
                    "resource entry '{}' at depth {} is not a directory",
                    rid, depth
                )));
            }
            path.push(rid);
            parse_directory(section, section_rva, offset, depth + 1, path, table)?;
            path.pop();
        } else {
            if is_subdir {
                return Err(malformed(format!("language entry '{}' points to a directory", rid)));
            }
            let lang = match rid {
                ResourceId::Id(v) if v <= u16::MAX as u32 => v as u16,
                other => return Err(malformed(format!("bad language id '{}'", other))),
            };
            let data_rva = read_u32(section, offset)
                .map_err(|_| malformed(format!("resource data entry truncated at {:#x}", offset)))?;
            let size = read_u32(section, offset + 4)
                .map_err(|_| malformed(format!("resource data entry truncated at {:#x}", offset)))?
                as usize;
            let codepage = read_u32(section, offset + 8)
                .map_err(|_| malformed(format!("resource data entry truncated at {:#x}", offset)))?;
            if data_rva < section_rva {
                return Err(malformed(format!(
                    "resource data RVA {:#x} lies before the resource section",
                    data_rva
                )));
            }
            let data_at = (data_rva - section_rva) as usize;
            let bytes = section
                .get(data_at..data_at + size)
                .ok_or_else(|| malformed(format!("resource data at {:#x} extends past section end", data_at)))?
                .to_vec();
            table.insert(
                ResourceKey {
                    type_id: path[0].clone(),
                    name: path[1].clone(),
                    lang,
                },
                ResourceData { bytes, codepage },
            );
        }
    }
    Ok(())
}

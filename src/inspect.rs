//! Read-back of built executables.
//!
//! [`inspect`] maps a finished output and reports everything the build
//! stamped into it: footer geometry, the configuration record, version
//! strings, execution level and icon count. [`extract_payload`] writes
//! the embedded archive back out as a standalone file, which is the
//! fastest way to diff a payload against its source.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::assemble::Overwrite;
use crate::error::BuildError;
use crate::footer::{PayloadFooter, FOOTER_LEN};
use crate::pe::rsrc::{ResourceTable, RT_GROUP_ICON, RT_ICON, RT_MANIFEST, RT_VERSION};
use crate::pe::PeLayout;
use crate::resource::manifest;
use crate::resource::version_info::VersionInfo;
use crate::stub::{ConfigRecord, CONFIG_SECTION, RESOURCE_SECTION};

/// Everything [`inspect`] can read back from a built executable.
#[derive(Debug, Serialize)]
pub struct InspectReport {
    pub path: PathBuf,
    pub file_size: u64,
    pub machine: u16,
    pub subsystem: u16,
    pub footer: PayloadFooter,
    pub payload_crc_ok: bool,
    /// Entry count of the embedded archive, when it parses as ZIP.
    pub archive_entries: Option<usize>,
    pub command_line: String,
    pub working_dir: String,
    pub run_as_admin: bool,
    pub command_capacity: u32,
    pub workdir_capacity: u32,
    pub product_name: Option<String>,
    pub product_version: Option<String>,
    pub file_version: Option<String>,
    pub version_strings: BTreeMap<String, String>,
    pub execution_level: Option<String>,
    pub icon_images: usize,
    pub has_group_icon: bool,
    pub resource_count: usize,
}

fn map_file(path: &Path) -> Result<Mmap, BuildError> {
    let io_err = |e: std::io::Error| BuildError::Io { source: e, path: path.to_path_buf() };
    let file = File::open(path).map_err(io_err)?;
    let len = file.metadata().map_err(io_err)?.len();
    if len < FOOTER_LEN as u64 {
        return Err(BuildError::BadFooter {
            reason: format!("file is {} bytes, too small to carry a trailer", len),
        });
    }
    unsafe { Mmap::map(&file) }.map_err(io_err)
}

pub fn inspect(path: &Path) -> Result<InspectReport, BuildError> {
    let map = map_file(path)?;
    let footer = PayloadFooter::from_image(&map)?;
    let image = &map[..footer.payload_offset as usize];
    let payload = &map[footer.payload_offset as usize..(footer.payload_offset + footer.payload_size) as usize];
    let payload_crc_ok = crc32fast::hash(payload) == footer.payload_crc32;
    let archive_entries = zip::ZipArchive::new(Cursor::new(payload)).ok().map(|z| z.len());

    let layout = PeLayout::parse(image)?;
    let cfg = layout.section(CONFIG_SECTION).ok_or_else(|| BuildError::StubCorrupt {
        reason: format!("no {} section in image", CONFIG_SECTION),
    })?;
    let cfg_start = cfg.pointer_to_raw_data as usize;
    let cfg_bytes = image
        .get(cfg_start..cfg_start + cfg.capacity())
        .ok_or_else(|| BuildError::StubCorrupt {
            reason: format!("{} section lies outside the image", CONFIG_SECTION),
        })?;
    let (descriptor, config) = ConfigRecord::decode(cfg_bytes)?;

    let rsrc = layout.section(RESOURCE_SECTION).ok_or_else(|| BuildError::StubCorrupt {
        reason: format!("no {} section in image", RESOURCE_SECTION),
    })?;
    let rsrc_bytes = image
        .get(rsrc.raw_range())
        .ok_or_else(|| BuildError::StubCorrupt {
            reason: format!("{} section lies outside the image", RESOURCE_SECTION),
        })?;
    let table = ResourceTable::parse(rsrc_bytes, rsrc.virtual_address)?;
    let version = table
        .first_of_type(RT_VERSION)
        .map(|(_, data)| VersionInfo::parse(&data.bytes))
        .transpose()?;
    let execution_level = table
        .first_of_type(RT_MANIFEST)
        .and_then(|(_, data)| manifest::execution_level(&data.bytes));
    let version_strings: BTreeMap<String, String> = version
        .as_ref()
        .map(|info| info.strings.iter().cloned().collect())
        .unwrap_or_default();

    debug!(path = %path.display(), resources = table.len(), "inspection complete");
    Ok(InspectReport {
        path: path.to_path_buf(),
        file_size: map.len() as u64,
        machine: layout.machine,
        subsystem: layout.subsystem,
        footer,
        payload_crc_ok,
        archive_entries,
        command_line: config.command_line,
        working_dir: config.working_dir,
        run_as_admin: config.run_as_admin,
        command_capacity: descriptor.command_capacity,
        workdir_capacity: descriptor.workdir_capacity,
        product_name: version_strings.get("ProductName").cloned(),
        product_version: version.as_ref().map(|info| info.product_version.to_string()),
        file_version: version.as_ref().map(|info| info.file_version.to_string()),
        version_strings,
        execution_level,
        icon_images: table.count_of_type(RT_ICON),
        has_group_icon: table.count_of_type(RT_GROUP_ICON) > 0,
        resource_count: table.len(),
    })
}

/// Writes the embedded payload back out as a standalone archive file.
///
/// The stored CRC is verified first; a corrupted payload is reported
/// instead of copied. Returns the number of bytes written.
pub fn extract_payload(exe: &Path, output: &Path, overwrite: Overwrite) -> Result<u64, BuildError> {
    let out_err = |e: std::io::Error| BuildError::Io { source: e, path: output.to_path_buf() };

    let map = map_file(exe)?;
    let footer = PayloadFooter::from_image(&map)?;
    let payload = &map[footer.payload_offset as usize..(footer.payload_offset + footer.payload_size) as usize];
    let actual = crc32fast::hash(payload);
    if actual != footer.payload_crc32 {
        return Err(BuildError::ChecksumMismatch { expected: footer.payload_crc32, actual });
    }
    if overwrite == Overwrite::Deny && output.exists() {
        return Err(BuildError::DestinationExists { path: output.to_path_buf() });
    }

    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(out_err)?;
    tmp.write_all(payload).map_err(out_err)?;
    tmp.flush().map_err(out_err)?;
    match overwrite {
        Overwrite::Replace => {
            tmp.persist(output)
                .map_err(|e| BuildError::Io { source: e.error, path: output.to_path_buf() })?;
        }
        Overwrite::Deny => {
            tmp.persist_noclobber(output).map_err(|e| {
                if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                    BuildError::DestinationExists { path: output.to_path_buf() }
                } else {
                    BuildError::Io { source: e.error, path: output.to_path_buf() }
                }
            })?;
        }
    }
    Ok(footer.payload_size)
}

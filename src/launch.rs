//! The contract between the builder and the launcher stub.
//!
//! At run time a stub maps its own file, finds the payload through the
//! trailing footer, verifies it, unpacks it into a scratch directory and
//! launches the configured command with the two placeholders resolved:
//! [`DIR_PATH_PLACEHOLDER`] becomes the extraction directory,
//! [`CURRENT_APP_PATH_PLACEHOLDER`] the stub's own path. This module
//! implements that sequence over any byte image, which is how the test
//! suite and the `unpack` subcommand exercise outputs without running
//! them.

use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::{debug, warn};

use crate::error::BuildError;
use crate::footer::PayloadFooter;
use crate::pe::PeLayout;
use crate::stub::{ConfigRecord, CONFIG_SECTION};

/// Replaced by the extraction directory in the command line and the
/// working directory.
pub const DIR_PATH_PLACEHOLDER: &str = "<dir_path>";
/// Replaced by the executable's own path in the command line.
pub const CURRENT_APP_PATH_PLACEHOLDER: &str = "<current_app_path>";

/// Where the payload sits inside an image, per its footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadLocation {
    pub offset: u64,
    pub size: u64,
    pub crc32: u32,
}

/// Reads the footer of a complete image and returns the payload bounds.
pub fn locate_payload(image: &[u8]) -> Result<PayloadLocation, BuildError> {
    let footer = PayloadFooter::from_image(image)?;
    Ok(PayloadLocation {
        offset: footer.payload_offset,
        size: footer.payload_size,
        crc32: footer.payload_crc32,
    })
}

/// Verifies the payload bytes against the CRC the footer recorded.
pub fn verify_payload(image: &[u8], location: &PayloadLocation) -> Result<(), BuildError> {
    let end = location
        .offset
        .checked_add(location.size)
        .ok_or_else(|| BuildError::BadFooter { reason: "payload bounds overflow".to_string() })?;
    let payload = image
        .get(location.offset as usize..end as usize)
        .ok_or_else(|| BuildError::BadFooter { reason: "payload bounds exceed the image".to_string() })?;
    let actual = crc32fast::hash(payload);
    if actual != location.crc32 {
        return Err(BuildError::ChecksumMismatch { expected: location.crc32, actual });
    }
    Ok(())
}

/// Reads the configuration record out of a built image.
pub fn read_config(image: &[u8]) -> Result<ConfigRecord, BuildError> {
    let layout = PeLayout::parse(image)?;
    let cfg = layout.section(CONFIG_SECTION).ok_or_else(|| BuildError::StubCorrupt {
        reason: format!("no {} section in image", CONFIG_SECTION),
    })?;
    let start = cfg.pointer_to_raw_data as usize;
    let cfg_bytes = image
        .get(start..start + cfg.capacity())
        .ok_or_else(|| BuildError::StubCorrupt {
            reason: format!("{} section lies outside the image", CONFIG_SECTION),
        })?;
    ConfigRecord::decode(cfg_bytes).map(|(_, config)| config)
}

/// Unpacks the payload archive of a built executable into `dest_dir`,
/// verifying the CRC first. Returns the number of entries written.
pub fn unpack_payload(exe: &Path, dest_dir: &Path) -> Result<usize, BuildError> {
    let io_err = |e: std::io::Error| BuildError::Io { source: e, path: exe.to_path_buf() };
    let file = File::open(exe).map_err(io_err)?;
    let map = unsafe { Mmap::map(&file) }.map_err(io_err)?;
    let location = locate_payload(&map)?;
    verify_payload(&map, &location)?;
    let payload = &map[location.offset as usize..(location.offset + location.size) as usize];

    let zip_err = |e: zip::result::ZipError| BuildError::Zip { source: e, path: exe.to_path_buf() };
    let mut archive = zip::ZipArchive::new(Cursor::new(payload)).map_err(zip_err)?;
    let mut written = 0usize;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(zip_err)?;
        let relative = match entry.enclosed_name() {
            Some(path) => path.to_path_buf(),
            None => {
                warn!(name = entry.name(), "skipping entry with an unsafe path");
                continue;
            }
        };
        let target = dest_dir.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&target)
                .map_err(|e| BuildError::Io { source: e, path: target.clone() })?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| BuildError::Io { source: e, path: parent.to_path_buf() })?;
            }
            let mut out = File::create(&target)
                .map_err(|e| BuildError::Io { source: e, path: target.clone() })?;
            std::io::copy(&mut entry, &mut out)
                .map_err(|e| BuildError::Io { source: e, path: target.clone() })?;
            written += 1;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode))
                    .map_err(|e| BuildError::Io { source: e, path: target.clone() })?;
            }
        }
    }
    debug!(entries = written, dest = %dest_dir.display(), "payload unpacked");
    Ok(written)
}

/// A fully resolved launch: what to run, where, and whether elevated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub command_line: String,
    pub working_dir: PathBuf,
    pub elevate: bool,
}

/// Resolves the stored configuration against a concrete extraction
/// directory and the executable's own path.
///
/// An empty working directory means the extraction directory; a relative
/// one is taken relative to it.
pub fn resolve_launch_plan(config: &ConfigRecord, extract_dir: &Path, own_path: &Path) -> LaunchPlan {
    let dir = extract_dir.to_string_lossy();
    let own = own_path.to_string_lossy();
    let command_line = config
        .command_line
        .replace(DIR_PATH_PLACEHOLDER, &dir)
        .replace(CURRENT_APP_PATH_PLACEHOLDER, &own);
    let working_dir = if config.working_dir.is_empty() {
        extract_dir.to_path_buf()
    } else {
        let substituted = config.working_dir.replace(DIR_PATH_PLACEHOLDER, &dir);
        let path = PathBuf::from(substituted);
        if path.is_relative() {
            extract_dir.join(path)
        } else {
            path
        }
    };
    LaunchPlan {
        command_line,
        working_dir,
        elevate: config.run_as_admin,
    }
}

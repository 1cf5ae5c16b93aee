//! Build orchestration.
//!
//! [`build_executable`] runs the whole pipeline: open and validate both
//! inputs, compile resources, patch the stub image in memory, then write
//! image + payload + footer to a temporary file in the destination
//! directory and persist it with a rename. A failed build never leaves a
//! partial output behind.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::archive::ArchiveSource;
use crate::error::BuildError;
use crate::footer::{PayloadFooter, FOOTER_LEN};
use crate::request::BuildRequest;
use crate::resource;
use crate::stub::{ConfigRecord, StubTemplate};

/// What to do when the output path already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overwrite {
    Deny,
    Replace,
}

/// Sizes and checksums of a finished build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub output_path: PathBuf,
    pub stub_size: u64,
    pub payload_offset: u64,
    pub payload_size: u64,
    pub payload_crc32: u32,
    pub total_size: u64,
}

/// Builds one self-extracting executable.
///
/// The payload archive stays open only for the duration of this call and
/// is never held across builds. Errors before the write phase leave the
/// filesystem untouched.
pub fn build_executable(
    request: &BuildRequest,
    stub_path: &Path,
    output_path: &Path,
    overwrite: Overwrite,
) -> Result<BuildReport, BuildError> {
    let out_err = |e: std::io::Error| BuildError::Io { source: e, path: output_path.to_path_buf() };

    // Both inputs must open and validate before anything is created.
    let mut archive = ArchiveSource::open(request.archive_path())?;
    let stub = StubTemplate::load(stub_path)?;
    stub.check_config_capacity(request)?;
    if overwrite == Overwrite::Deny && output_path.exists() {
        return Err(BuildError::DestinationExists { path: output_path.to_path_buf() });
    }
    debug!(
        stub = %stub_path.display(),
        archive = %request.archive_path().display(),
        archive_size = archive.size(),
        "inputs validated"
    );

    let stub_size = stub.size();
    let table = resource::compile(request, stub.resources())?;
    let config = ConfigRecord::from_request(request);
    let image = stub.into_patched(&table, &config)?;
    let payload_offset = image.len() as u64;

    let dir = match output_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(out_err)?;
    tmp.write_all(&image).map_err(out_err)?;
    let (payload_size, payload_crc32) = archive.stream_to(&mut tmp, output_path)?;
    let footer = PayloadFooter::new(payload_offset, payload_size, payload_crc32);
    tmp.write_all(&footer.encode()).map_err(out_err)?;
    tmp.flush().map_err(out_err)?;
    tmp.as_file().sync_all().map_err(out_err)?;

    match overwrite {
        Overwrite::Replace => {
            tmp.persist(output_path)
                .map_err(|e| BuildError::Io { source: e.error, path: output_path.to_path_buf() })?;
        }
        Overwrite::Deny => {
            tmp.persist_noclobber(output_path).map_err(|e| {
                if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                    BuildError::DestinationExists { path: output_path.to_path_buf() }
                } else {
                    BuildError::Io { source: e.error, path: output_path.to_path_buf() }
                }
            })?;
        }
    }

    let total_size = payload_offset + payload_size + FOOTER_LEN as u64;
    info!(
        output = %output_path.display(),
        stub_size,
        payload_size,
        total_size,
        "self-extracting executable assembled"
    );
    Ok(BuildReport {
        output_path: output_path.to_path_buf(),
        stub_size,
        payload_offset,
        payload_size,
        payload_crc32,
        total_size,
    })
}

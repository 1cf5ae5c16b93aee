//! Read-only access to the payload archive.
//!
//! The builder never decompresses the payload; it validates that the file
//! looks like a ZIP archive, can enumerate its entries for reporting, and
//! streams the raw bytes into the output while hashing them. The handle is
//! held only for the duration of one build call.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::BuildError;

/// Read granularity for streaming the archive into the output.
pub const CHUNK_SIZE: usize = 1 << 20;

// Signatures a ZIP file may legally start with: a local file header, the
// end-of-central-directory of an empty archive, or a data descriptor on
// spanned archives.
const ZIP_MAGICS: [[u8; 4]; 3] = [
    [0x50, 0x4B, 0x03, 0x04],
    [0x50, 0x4B, 0x05, 0x06],
    [0x50, 0x4B, 0x07, 0x08],
];

/// Metadata of one entry inside the payload archive.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub name: String,
    pub size: u64,
    pub compressed_size: u64,
    pub is_dir: bool,
}

/// An open payload archive, validated on open.
#[derive(Debug)]
pub struct ArchiveSource {
    path: PathBuf,
    file: File,
    size: u64,
}

impl ArchiveSource {
    /// Opens the archive and checks the leading ZIP signature.
    ///
    /// A missing file surfaces as [`BuildError::Io`] before any output is
    /// created; a present file without ZIP structure as
    /// [`BuildError::CorruptArchive`].
    pub fn open(path: &Path) -> Result<Self, BuildError> {
        let io_err = |e: std::io::Error| BuildError::Io { source: e, path: path.to_path_buf() };
        let mut file = File::open(path).map_err(io_err)?;
        let size = file.metadata().map_err(io_err)?.len();
        if size < 4 {
            return Err(BuildError::CorruptArchive {
                path: path.to_path_buf(),
                reason: format!("file is {} bytes, too small to be a ZIP archive", size),
            });
        }
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic).map_err(io_err)?;
        if !ZIP_MAGICS.contains(&magic) {
            return Err(BuildError::CorruptArchive {
                path: path.to_path_buf(),
                reason: "no ZIP signature at start of file".to_string(),
            });
        }
        file.seek(SeekFrom::Start(0)).map_err(io_err)?;
        Ok(ArchiveSource { path: path.to_path_buf(), file, size })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Archive size in bytes. This is exactly the payload size the footer
    /// will record.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Enumerates the central directory without decompressing anything.
    pub fn entries(&mut self) -> Result<Vec<ArchiveEntry>, BuildError> {
        let path = self.path.clone();
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| BuildError::Io { source: e, path: path.clone() })?;
        let mut zip = zip::ZipArchive::new(&mut self.file)
            .map_err(|e| BuildError::Zip { source: e, path: path.clone() })?;
        let mut entries = Vec::with_capacity(zip.len());
        for index in 0..zip.len() {
            let entry = zip
                .by_index_raw(index)
                .map_err(|e| BuildError::Zip { source: e, path: path.clone() })?;
            entries.push(ArchiveEntry {
                name: entry.name().to_string(),
                size: entry.size(),
                compressed_size: entry.compressed_size(),
                is_dir: entry.is_dir(),
            });
        }
        Ok(entries)
    }

    /// Streams the whole archive into `writer` in [`CHUNK_SIZE`] reads and
    /// returns `(bytes_streamed, crc32)`.
    ///
    /// Rewinds first, so a failed attempt can be retried on the same
    /// handle. `dest` is only used to attribute write errors.
    pub fn stream_to(&mut self, writer: &mut impl Write, dest: &Path) -> Result<(u64, u32), BuildError> {
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| BuildError::Io { source: e, path: self.path.clone() })?;
        let mut hasher = crc32fast::Hasher::new();
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut total: u64 = 0;
        loop {
            let n = self
                .file
                .read(&mut buffer)
                .map_err(|e| BuildError::Io { source: e, path: self.path.clone() })?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
            writer
                .write_all(&buffer[..n])
                .map_err(|e| BuildError::Io { source: e, path: dest.to_path_buf() })?;
            total += n as u64;
        }
        Ok((total, hasher.finalize()))
    }
}

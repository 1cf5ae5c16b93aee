use std::path::PathBuf;

/// The primary error type for all operations in the `sfxforge` crate.
#[derive(Debug)]
pub enum BuildError {
    /// A required request field was empty or absent.
    MissingField(&'static str),

    /// The product version string could not be parsed as one to four
    /// dot-separated numeric components.
    InvalidVersion { value: String },

    /// A configuration string exceeds the capacity reserved for it in the
    /// stub's configuration section.
    ConfigTooLong {
        field: &'static str,
        len: usize,
        capacity: usize,
    },

    /// A `TYPE:NAME:VALUE` resource argument did not have three parts.
    InvalidResourceSpec { spec: String },

    /// The icon file exists but is not a valid `.ico` image.
    UnsupportedIcon { path: PathBuf, reason: String },

    /// An auxiliary resource input (icon or custom resource file) could not
    /// be read from disk.
    ResourceUnreadable { source: std::io::Error, path: PathBuf },

    /// The compiled resource tree does not fit in the space the stub
    /// reserves for its resource section.
    ResourceOverflow { needed: usize, capacity: usize },

    /// An I/O error occurred, typically while reading or writing a file.
    /// Includes the path where the error happened.
    Io { source: std::io::Error, path: PathBuf },

    /// The output path already exists and overwriting was not requested.
    DestinationExists { path: PathBuf },

    /// The payload file is missing ZIP structure or is otherwise unusable.
    CorruptArchive { path: PathBuf, reason: String },

    /// An error from the underlying `zip` crate while enumerating or
    /// unpacking archive entries.
    Zip { source: zip::result::ZipError, path: PathBuf },

    /// The stub template is not a usable launcher image (bad PE headers,
    /// missing sections, damaged descriptor).
    StubCorrupt { reason: String },

    /// The stub declares a configuration layout this builder does not know.
    UnsupportedStubVersion { found: u32, supported: u32 },

    /// The trailing payload footer is absent, truncated or inconsistent.
    BadFooter { reason: String },

    /// The stored payload CRC-32 does not match the bytes on disk.
    ChecksumMismatch { expected: u32, actual: u32 },

    /// An error during serialization of an inspection report.
    Json(serde_json::Error),
}

/// Coarse classification of [`BuildError`] used for reporting.
///
/// Every variant falls into exactly one category so callers can branch on
/// the kind of failure without matching each variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The request itself is unusable (missing fields, bad version syntax,
    /// strings over capacity).
    Configuration,
    /// An auxiliary resource input was unreadable or invalid.
    Resource,
    /// Reading inputs or writing the output failed.
    Io,
    /// A binary structure (stub, footer, resource tree) was malformed.
    Format,
}

impl BuildError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            BuildError::MissingField(_)
            | BuildError::InvalidVersion { .. }
            | BuildError::ConfigTooLong { .. }
            | BuildError::InvalidResourceSpec { .. } => ErrorCategory::Configuration,
            BuildError::UnsupportedIcon { .. }
            | BuildError::ResourceUnreadable { .. }
            | BuildError::ResourceOverflow { .. } => ErrorCategory::Resource,
            BuildError::Io { .. }
            | BuildError::DestinationExists { .. }
            | BuildError::CorruptArchive { .. }
            | BuildError::Zip { .. }
            | BuildError::Json(_) => ErrorCategory::Io,
            BuildError::StubCorrupt { .. }
            | BuildError::UnsupportedStubVersion { .. }
            | BuildError::BadFooter { .. }
            | BuildError::ChecksumMismatch { .. } => ErrorCategory::Format,
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Resource => write!(f, "resource"),
            ErrorCategory::Io => write!(f, "io"),
            ErrorCategory::Format => write!(f, "format"),
        }
    }
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::MissingField(field) => write!(f, "Required field '{}' is missing or empty", field),
            BuildError::InvalidVersion { value } => write!(f, "Invalid product version '{}': expected 1 to 4 dot-separated numbers in 0..=65535", value),
            BuildError::ConfigTooLong { field, len, capacity } => write!(f, "Value for '{}' is {} bytes but the stub reserves only {} bytes", field, len, capacity),
            BuildError::InvalidResourceSpec { spec } => write!(f, "Invalid resource argument '{}': expected TYPE:NAME:VALUE", spec),
            BuildError::UnsupportedIcon { path, reason } => write!(f, "Icon file '{}' is not usable: {}", path.display(), reason),
            BuildError::ResourceUnreadable { source, path } => write!(f, "Could not read resource file '{}': {}", path.display(), source),
            BuildError::ResourceOverflow { needed, capacity } => write!(f, "Compiled resources need {} bytes but the stub reserves only {} bytes", needed, capacity),
            BuildError::Io { source, path } => write!(f, "I/O error on path '{}': {}", path.display(), source),
            BuildError::DestinationExists { path } => write!(f, "Output path '{}' already exists (use overwrite to replace it)", path.display()),
            BuildError::CorruptArchive { path, reason } => write!(f, "Archive '{}' is not usable: {}", path.display(), reason),
            BuildError::Zip { source, path } => write!(f, "ZIP error in '{}': {}", path.display(), source),
            BuildError::StubCorrupt { reason } => write!(f, "Stub template is not usable: {}", reason),
            BuildError::UnsupportedStubVersion { found, supported } => write!(f, "Stub declares configuration format {} but this builder supports up to {}", found, supported),
            BuildError::BadFooter { reason } => write!(f, "Payload footer is not usable: {}", reason),
            BuildError::ChecksumMismatch { expected, actual } => write!(f, "Payload checksum mismatch: footer says {:#010x}, data hashes to {:#010x}", expected, actual),
            BuildError::Json(e) => write!(f, "Serialization error: {}", e),
        }
    }
}

impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BuildError::Io { source, .. } => Some(source),
            BuildError::ResourceUnreadable { source, .. } => Some(source),
            BuildError::Zip { source, .. } => Some(source),
            BuildError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for BuildError {
    fn from(err: serde_json::Error) -> Self {
        BuildError::Json(err)
    }
}

// Generic IO error conversion that doesn't require a path
impl From<std::io::Error> for BuildError {
    fn from(err: std::io::Error) -> Self {
        BuildError::Io { source: err, path: PathBuf::new() }
    }
}

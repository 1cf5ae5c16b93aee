//! Build request validation.
//!
//! A [`BuildRequest`] is the immutable description of one build: product
//! identity, launch configuration and the payload archive to embed. All
//! field validation happens in [`BuildRequest::new`] so that later stages
//! can assume the request is internally consistent.

use std::path::{Path, PathBuf};

use crate::error::BuildError;
use crate::resource::RawResource;
use crate::stub::{V1_COMMAND_CAPACITY, V1_WORKDIR_CAPACITY};

/// A product version of up to four numeric components, as stamped into the
/// fixed part of a version resource.
///
/// Missing components are zero, so `"1.0"` and `"1.0.0.0"` are the same
/// version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProductVersion([u16; 4]);

impl ProductVersion {
    /// Parses a dotted version string with one to four components, each in
    /// `0..=65535`.
    pub fn parse(value: &str) -> Result<Self, BuildError> {
        let invalid = || BuildError::InvalidVersion { value: value.to_string() };
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(invalid());
        }
        let mut parts = [0u16; 4];
        let mut count = 0;
        for piece in trimmed.split('.') {
            if count == 4 {
                return Err(invalid());
            }
            parts[count] = piece.parse::<u16>().map_err(|_| invalid())?;
            count += 1;
        }
        Ok(ProductVersion(parts))
    }

    pub fn parts(&self) -> [u16; 4] {
        self.0
    }

    /// Rebuilds a version from the two 32-bit halves stored in a fixed
    /// file info block.
    pub fn from_ms_ls(ms: u32, ls: u32) -> Self {
        ProductVersion([
            (ms >> 16) as u16,
            (ms & 0xFFFF) as u16,
            (ls >> 16) as u16,
            (ls & 0xFFFF) as u16,
        ])
    }

    /// High 32 bits of the 64-bit binary version (major.minor).
    pub fn ms(&self) -> u32 {
        ((self.0[0] as u32) << 16) | self.0[1] as u32
    }

    /// Low 32 bits of the 64-bit binary version (patch.build).
    pub fn ls(&self) -> u32 {
        ((self.0[2] as u32) << 16) | self.0[3] as u32
    }
}

impl std::str::FromStr for ProductVersion {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProductVersion::parse(s)
    }
}

impl std::fmt::Display for ProductVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}.{}", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

/// Optional string table entries beyond the product name and version.
#[derive(Debug, Clone, Default)]
pub struct VersionStrings {
    pub company_name: Option<String>,
    pub file_description: Option<String>,
    pub legal_copyright: Option<String>,
}

impl VersionStrings {
    pub fn is_empty(&self) -> bool {
        self.company_name.is_none() && self.file_description.is_none() && self.legal_copyright.is_none()
    }
}

/// An immutable, validated description of one build.
///
/// Construction rejects empty required fields, malformed versions and
/// configuration strings that can never fit a format-1 stub. Capacity is
/// re-checked against the actual stub descriptor at build time, since a
/// stub may reserve less than the format-1 defaults.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    product_name: String,
    product_version: ProductVersion,
    file_icon: Option<PathBuf>,
    command_line: String,
    working_dir: String,
    run_as_admin: bool,
    archive_path: PathBuf,
    version_strings: VersionStrings,
    custom_resources: Vec<RawResource>,
}

impl BuildRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        product_name: &str,
        product_version: &str,
        file_icon: Option<PathBuf>,
        command_line: &str,
        working_dir: &str,
        run_as_admin: bool,
        archive_path: PathBuf,
    ) -> Result<Self, BuildError> {
        if product_name.trim().is_empty() {
            return Err(BuildError::MissingField("product_name"));
        }
        if product_version.trim().is_empty() {
            return Err(BuildError::MissingField("product_version"));
        }
        if command_line.is_empty() {
            return Err(BuildError::MissingField("command_line"));
        }
        if archive_path.as_os_str().is_empty() {
            return Err(BuildError::MissingField("archive_path"));
        }
        let product_version = ProductVersion::parse(product_version)?;
        check_capacity("command_line", command_line, V1_COMMAND_CAPACITY as usize)?;
        check_capacity("working_dir", working_dir, V1_WORKDIR_CAPACITY as usize)?;
        Ok(BuildRequest {
            product_name: product_name.to_string(),
            product_version,
            file_icon,
            command_line: command_line.to_string(),
            working_dir: working_dir.to_string(),
            run_as_admin,
            archive_path,
            version_strings: VersionStrings::default(),
            custom_resources: Vec::new(),
        })
    }

    /// Attaches optional company / description / copyright strings.
    pub fn with_version_strings(mut self, strings: VersionStrings) -> Self {
        self.version_strings = strings;
        self
    }

    /// Attaches extra raw resources to stamp alongside the standard ones.
    pub fn with_custom_resources(mut self, resources: Vec<RawResource>) -> Self {
        self.custom_resources = resources;
        self
    }

    pub fn product_name(&self) -> &str {
        &self.product_name
    }

    pub fn product_version(&self) -> ProductVersion {
        self.product_version
    }

    pub fn file_icon(&self) -> Option<&Path> {
        self.file_icon.as_deref()
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn working_dir(&self) -> &str {
        &self.working_dir
    }

    pub fn run_as_admin(&self) -> bool {
        self.run_as_admin
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    pub fn version_strings(&self) -> &VersionStrings {
        &self.version_strings
    }

    pub fn custom_resources(&self) -> &[RawResource] {
        &self.custom_resources
    }
}

fn check_capacity(field: &'static str, value: &str, capacity: usize) -> Result<(), BuildError> {
    let len = value.len();
    if len > capacity {
        return Err(BuildError::ConfigTooLong { field, len, capacity });
    }
    Ok(())
}

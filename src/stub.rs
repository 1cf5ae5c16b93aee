//! The launcher stub template and its configuration section.
//!
//! A usable stub is a PE image with two reserved writable spots: a
//! `.rsrc` section big enough for the compiled resources, and a
//! `.sfxcfg` section whose leading descriptor declares how much room the
//! stub linked in for the command line and working directory. The
//! builder patches both in place; nothing in the image ever moves.
//!
//! `.sfxcfg` layout (all little-endian):
//!
//! | offset      | size | field                                 |
//! |-------------|------|---------------------------------------|
//! | 0           | 8    | magic `"SFXSTUB\0"`                   |
//! | 8           | 4    | format version                        |
//! | 12          | 4    | command capacity in bytes             |
//! | 16          | 4    | working dir capacity in bytes         |
//! | 20          | 4    | flags (bit 0 = run as admin)          |
//! | 24          | cc   | UTF-8 command line, NUL padded        |
//! | 24 + cc     | wc   | UTF-8 working directory, NUL padded   |

use std::path::Path;

use tracing::debug;

use crate::error::BuildError;
use crate::pe::rsrc::ResourceTable;
use crate::pe::{self, PeLayout, SectionHeader, RESOURCE_TABLE_INDEX};
use crate::request::BuildRequest;

pub const STUB_MAGIC: &[u8; 8] = b"SFXSTUB\0";
/// Configuration layout this builder writes and the only one it accepts.
pub const STUB_FORMAT_VERSION: u32 = 1;
pub const CONFIG_SECTION: &str = ".sfxcfg";
pub const RESOURCE_SECTION: &str = ".rsrc";
pub const CONFIG_HEADER_LEN: usize = 24;
pub const FLAG_RUN_AS_ADMIN: u32 = 1 << 0;

/// Capacities a format-1 stub reserves. Requests are pre-validated
/// against these so oversized strings fail before any file is touched.
pub const V1_COMMAND_CAPACITY: u32 = 2048;
pub const V1_WORKDIR_CAPACITY: u32 = 512;

/// The fixed header of the `.sfxcfg` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StubDescriptor {
    pub format_version: u32,
    pub command_capacity: u32,
    pub workdir_capacity: u32,
    pub flags: u32,
}

impl Default for StubDescriptor {
    fn default() -> Self {
        StubDescriptor {
            format_version: STUB_FORMAT_VERSION,
            command_capacity: V1_COMMAND_CAPACITY,
            workdir_capacity: V1_WORKDIR_CAPACITY,
            flags: 0,
        }
    }
}

impl StubDescriptor {
    pub fn parse(section: &[u8]) -> Result<Self, BuildError> {
        if section.len() < CONFIG_HEADER_LEN {
            return Err(BuildError::StubCorrupt {
                reason: format!("configuration section is only {} bytes", section.len()),
            });
        }
        if &section[0..8] != STUB_MAGIC {
            return Err(BuildError::StubCorrupt {
                reason: "configuration section magic missing".to_string(),
            });
        }
        let word = |at: usize| u32::from_le_bytes([section[at], section[at + 1], section[at + 2], section[at + 3]]);
        let descriptor = StubDescriptor {
            format_version: word(8),
            command_capacity: word(12),
            workdir_capacity: word(16),
            flags: word(20),
        };
        if descriptor.format_version != STUB_FORMAT_VERSION {
            return Err(BuildError::UnsupportedStubVersion {
                found: descriptor.format_version,
                supported: STUB_FORMAT_VERSION,
            });
        }
        if descriptor.required_len() > section.len() {
            return Err(BuildError::StubCorrupt {
                reason: format!(
                    "descriptor declares {} bytes of configuration but the section holds {}",
                    descriptor.required_len(),
                    section.len()
                ),
            });
        }
        Ok(descriptor)
    }

    /// Encodes just the 24-byte header.
    pub fn encode(&self) -> [u8; CONFIG_HEADER_LEN] {
        let mut out = [0u8; CONFIG_HEADER_LEN];
        out[0..8].copy_from_slice(STUB_MAGIC);
        out[8..12].copy_from_slice(&self.format_version.to_le_bytes());
        out[12..16].copy_from_slice(&self.command_capacity.to_le_bytes());
        out[16..20].copy_from_slice(&self.workdir_capacity.to_le_bytes());
        out[20..24].copy_from_slice(&self.flags.to_le_bytes());
        out
    }

    /// Header plus both string areas.
    pub fn required_len(&self) -> usize {
        CONFIG_HEADER_LEN + self.command_capacity as usize + self.workdir_capacity as usize
    }

    pub fn run_as_admin(&self) -> bool {
        self.flags & FLAG_RUN_AS_ADMIN != 0
    }
}

/// The launch configuration stored behind the descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigRecord {
    pub command_line: String,
    pub working_dir: String,
    pub run_as_admin: bool,
}

impl ConfigRecord {
    pub fn from_request(request: &BuildRequest) -> Self {
        ConfigRecord {
            command_line: request.command_line().to_string(),
            working_dir: request.working_dir().to_string(),
            run_as_admin: request.run_as_admin(),
        }
    }

    /// Decodes descriptor and record from a `.sfxcfg` section.
    pub fn decode(section: &[u8]) -> Result<(StubDescriptor, ConfigRecord), BuildError> {
        let descriptor = StubDescriptor::parse(section)?;
        let command_at = CONFIG_HEADER_LEN;
        let workdir_at = command_at + descriptor.command_capacity as usize;
        let command_line = read_padded(
            &section[command_at..workdir_at],
            "command line",
        )?;
        let working_dir = read_padded(
            &section[workdir_at..workdir_at + descriptor.workdir_capacity as usize],
            "working directory",
        )?;
        Ok((
            descriptor,
            ConfigRecord {
                command_line,
                working_dir,
                run_as_admin: descriptor.run_as_admin(),
            },
        ))
    }
}

fn read_padded(area: &[u8], what: &str) -> Result<String, BuildError> {
    let end = area.iter().position(|&b| b == 0).unwrap_or(area.len());
    std::str::from_utf8(&area[..end])
        .map(str::to_string)
        .map_err(|_| BuildError::StubCorrupt { reason: format!("stored {} is not valid UTF-8", what) })
}

/// Writes descriptor and record into a `.sfxcfg` section slice.
///
/// A string of exactly the reserved capacity is stored without a NUL;
/// the capacity bound itself marks its end.
pub(crate) fn write_config_record(
    section: &mut [u8],
    descriptor: &StubDescriptor,
    config: &ConfigRecord,
) -> Result<(), BuildError> {
    let command_capacity = descriptor.command_capacity as usize;
    let workdir_capacity = descriptor.workdir_capacity as usize;
    if config.command_line.len() > command_capacity {
        return Err(BuildError::ConfigTooLong {
            field: "command_line",
            len: config.command_line.len(),
            capacity: command_capacity,
        });
    }
    if config.working_dir.len() > workdir_capacity {
        return Err(BuildError::ConfigTooLong {
            field: "working_dir",
            len: config.working_dir.len(),
            capacity: workdir_capacity,
        });
    }
    let stamped = StubDescriptor {
        flags: if config.run_as_admin { FLAG_RUN_AS_ADMIN } else { 0 },
        ..*descriptor
    };
    section[0..CONFIG_HEADER_LEN].copy_from_slice(&stamped.encode());
    let command_at = CONFIG_HEADER_LEN;
    let workdir_at = command_at + command_capacity;
    section[command_at..workdir_at].fill(0);
    section[command_at..command_at + config.command_line.len()]
        .copy_from_slice(config.command_line.as_bytes());
    section[workdir_at..workdir_at + workdir_capacity].fill(0);
    section[workdir_at..workdir_at + config.working_dir.len()]
        .copy_from_slice(config.working_dir.as_bytes());
    Ok(())
}

/// A loaded, validated stub template.
///
/// Holds the whole image in memory; stubs are small launcher binaries,
/// not full applications.
pub struct StubTemplate {
    image: Vec<u8>,
    layout: PeLayout,
    descriptor: StubDescriptor,
    resources: ResourceTable,
    rsrc_section: SectionHeader,
    cfg_section: SectionHeader,
}

impl StubTemplate {
    pub fn load(path: &Path) -> Result<Self, BuildError> {
        let image = std::fs::read(path).map_err(|e| BuildError::Io {
            source: e,
            path: path.to_path_buf(),
        })?;
        Self::from_image(image)
    }

    pub fn from_image(image: Vec<u8>) -> Result<Self, BuildError> {
        let layout = PeLayout::parse(&image)?;
        let cfg_section = layout
            .section(CONFIG_SECTION)
            .cloned()
            .ok_or_else(|| BuildError::StubCorrupt {
                reason: format!("no {} section in template", CONFIG_SECTION),
            })?;
        let rsrc_section = layout
            .section(RESOURCE_SECTION)
            .cloned()
            .ok_or_else(|| BuildError::StubCorrupt {
                reason: format!("no {} section in template", RESOURCE_SECTION),
            })?;
        if layout.data_dir_entry_offset(RESOURCE_TABLE_INDEX).is_none() {
            return Err(BuildError::StubCorrupt {
                reason: "image has no resource data directory entry".to_string(),
            });
        }
        let cfg_start = cfg_section.pointer_to_raw_data as usize;
        let cfg_bytes = image
            .get(cfg_start..cfg_start + cfg_section.capacity())
            .ok_or_else(|| BuildError::StubCorrupt {
                reason: format!("{} section lies outside the image", CONFIG_SECTION),
            })?;
        let descriptor = StubDescriptor::parse(cfg_bytes)?;
        let rsrc_bytes = image
            .get(rsrc_section.raw_range())
            .ok_or_else(|| BuildError::StubCorrupt {
                reason: format!("{} section lies outside the image", RESOURCE_SECTION),
            })?;
        let resources = ResourceTable::parse(rsrc_bytes, rsrc_section.virtual_address)?;
        debug!(
            sections = layout.sections.len(),
            resources = resources.len(),
            command_capacity = descriptor.command_capacity,
            workdir_capacity = descriptor.workdir_capacity,
            "stub template loaded"
        );
        Ok(StubTemplate {
            image,
            layout,
            descriptor,
            resources,
            rsrc_section,
            cfg_section,
        })
    }

    pub fn size(&self) -> u64 {
        self.image.len() as u64
    }

    pub fn descriptor(&self) -> &StubDescriptor {
        &self.descriptor
    }

    pub fn resources(&self) -> &ResourceTable {
        &self.resources
    }

    /// Space the compiled resource tree may occupy.
    pub fn resource_capacity(&self) -> usize {
        self.rsrc_section.capacity()
    }

    /// Re-checks request strings against the capacities this particular
    /// stub declares, which may be tighter than the format-1 defaults.
    pub fn check_config_capacity(&self, request: &BuildRequest) -> Result<(), BuildError> {
        if request.command_line().len() > self.descriptor.command_capacity as usize {
            return Err(BuildError::ConfigTooLong {
                field: "command_line",
                len: request.command_line().len(),
                capacity: self.descriptor.command_capacity as usize,
            });
        }
        if request.working_dir().len() > self.descriptor.workdir_capacity as usize {
            return Err(BuildError::ConfigTooLong {
                field: "working_dir",
                len: request.working_dir().len(),
                capacity: self.descriptor.workdir_capacity as usize,
            });
        }
        Ok(())
    }

    /// Consumes the template and returns the patched image: new resource
    /// tree, new configuration record, refreshed header checksum.
    pub fn into_patched(
        mut self,
        resources: &ResourceTable,
        config: &ConfigRecord,
    ) -> Result<Vec<u8>, BuildError> {
        let tree = resources.build(self.rsrc_section.virtual_address);
        let capacity = self.rsrc_section.capacity();
        if tree.len() > capacity {
            return Err(BuildError::ResourceOverflow { needed: tree.len(), capacity });
        }
        let range = self.rsrc_section.raw_range();
        self.image[range.start..range.start + tree.len()].copy_from_slice(&tree);
        // Stale directory bytes behind the new tree must not survive.
        self.image[range.start + tree.len()..range.end].fill(0);
        pe::set_data_directory(
            &mut self.image,
            &self.layout,
            RESOURCE_TABLE_INDEX,
            self.rsrc_section.virtual_address,
            tree.len() as u32,
        )?;

        let cfg_start = self.cfg_section.pointer_to_raw_data as usize;
        let cfg_end = cfg_start + self.cfg_section.capacity();
        write_config_record(&mut self.image[cfg_start..cfg_end], &self.descriptor, config)?;

        pe::write_checksum(&mut self.image, &self.layout);
        debug!(resource_bytes = tree.len(), capacity, "stub image patched");
        Ok(self.image)
    }
}

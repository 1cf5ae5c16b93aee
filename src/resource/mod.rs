//! Resource compilation.
//!
//! [`compile`] takes the stub's existing resource table and produces the
//! table the output executable will carry: the stub's entries, minus
//! anything the build replaces (version info, icon set, manifest), plus
//! any custom resources from the request. The caller serializes the
//! result back into the stub's `.rsrc` section.

pub mod icon;
pub mod manifest;
pub mod version_info;

use std::path::PathBuf;

use crate::error::BuildError;
use crate::pe::rsrc::{
    ResourceData, ResourceId, ResourceKey, ResourceTable, LANG_NEUTRAL, RT_GROUP_ICON, RT_ICON,
    RT_MANIFEST, RT_VERSION,
};
use crate::request::BuildRequest;

/// Resource name id used for the version info, group icon and manifest.
pub const PRIMARY_RESOURCE_ID: u32 = 1;

/// Value of a caller-supplied resource.
#[derive(Debug, Clone)]
pub enum RawValue {
    /// Stored as the UTF-16LE encoding of the text.
    Text(String),
    /// Stored as the raw bytes of this file, read at compile time.
    File(PathBuf),
}

/// A caller-supplied resource beyond the standard set, addressed as
/// `TYPE:NAME` with a value.
#[derive(Debug, Clone)]
pub struct RawResource {
    pub type_id: ResourceId,
    pub name: ResourceId,
    pub value: RawValue,
}

impl RawResource {
    /// Parses a `TYPE:NAME:TEXT` argument.
    pub fn text(spec: &str) -> Result<Self, BuildError> {
        let (type_id, name, value) = split_spec(spec)?;
        Ok(RawResource { type_id, name, value: RawValue::Text(value) })
    }

    /// Parses a `TYPE:NAME:PATH` argument. The path may contain colons,
    /// only the first two split the argument.
    pub fn file(spec: &str) -> Result<Self, BuildError> {
        let (type_id, name, value) = split_spec(spec)?;
        Ok(RawResource { type_id, name, value: RawValue::File(PathBuf::from(value)) })
    }
}

fn split_spec(spec: &str) -> Result<(ResourceId, ResourceId, String), BuildError> {
    let mut parts = spec.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(type_part), Some(name_part), Some(value)) if !type_part.is_empty() && !name_part.is_empty() => {
            Ok((parse_id(type_part), parse_id(name_part), value.to_string()))
        }
        _ => Err(BuildError::InvalidResourceSpec { spec: spec.to_string() }),
    }
}

// Numeric parts address resources by id; everything else is a name.
// Names are canonicalized to upper case, which is how lookups address
// them at run time.
fn parse_id(text: &str) -> ResourceId {
    match text.parse::<u32>() {
        Ok(value) => ResourceId::Id(value),
        Err(_) => ResourceId::Name(text.to_ascii_uppercase()),
    }
}

fn utf16_bytes(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() * 2);
    for unit in text.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

/// Merges the request into the stub's resource table.
pub fn compile(request: &BuildRequest, stub_resources: &ResourceTable) -> Result<ResourceTable, BuildError> {
    let mut table = stub_resources.clone();

    // The version resource is always rebuilt from the request.
    table.remove_type(RT_VERSION);
    let info = version_info::VersionInfo::for_request(request);
    table.insert(
        ResourceKey::ids(RT_VERSION, PRIMARY_RESOURCE_ID, LANG_NEUTRAL),
        ResourceData::new(info.serialize()),
    );

    // The manifest keeps its key when the stub already has one, so an
    // entry stamped at a specific language stays where the loader found it.
    let existing = table
        .first_of_type(RT_MANIFEST)
        .map(|(key, data)| (key.clone(), data.bytes.clone()));
    let (manifest_key, base) = match existing {
        Some((key, bytes)) => (key, Some(bytes)),
        None => (ResourceKey::ids(RT_MANIFEST, PRIMARY_RESOURCE_ID, LANG_NEUTRAL), None),
    };
    let patched = manifest::with_execution_level(base.as_deref(), request.run_as_admin());
    table.insert(manifest_key, ResourceData::new(patched));

    // A requested icon replaces the stub's whole icon set, so no stale
    // image can survive under the new group directory.
    if let Some(path) = request.file_icon() {
        let icon = icon::IconFile::load(path)?;
        table.remove_type(RT_ICON);
        table.remove_type(RT_GROUP_ICON);
        for (index, image) in icon.images().iter().enumerate() {
            table.insert(
                ResourceKey::ids(RT_ICON, PRIMARY_RESOURCE_ID + index as u32, LANG_NEUTRAL),
                ResourceData::new(image.data.clone()),
            );
        }
        table.insert(
            ResourceKey::ids(RT_GROUP_ICON, PRIMARY_RESOURCE_ID, LANG_NEUTRAL),
            ResourceData::new(icon.group_directory(PRIMARY_RESOURCE_ID as u16)),
        );
    }

    for raw in request.custom_resources() {
        let bytes = match &raw.value {
            RawValue::Text(text) => utf16_bytes(text),
            RawValue::File(path) => std::fs::read(path).map_err(|e| BuildError::ResourceUnreadable {
                source: e,
                path: path.clone(),
            })?,
        };
        table.insert(
            ResourceKey {
                type_id: raw.type_id.clone(),
                name: raw.name.clone(),
                lang: LANG_NEUTRAL,
            },
            ResourceData::new(bytes),
        );
    }

    Ok(table)
}

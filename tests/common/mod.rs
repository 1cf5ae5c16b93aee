#![allow(dead_code)]

//! Shared fixtures: a synthetic stub image with the sections a real
//! launcher template carries, plus small ZIP and ICO builders.

use std::io::Write;
use std::path::{Path, PathBuf};

use sfxforge::pe::rsrc::{
    ResourceData, ResourceKey, ResourceTable, LANG_NEUTRAL, RT_GROUP_ICON, RT_ICON, RT_MANIFEST,
    RT_VERSION,
};
use sfxforge::stub::{StubDescriptor, CONFIG_HEADER_LEN};
use zip::write::FileOptions;

/// RVA the synthetic stub maps its resource section at.
pub const STUB_RSRC_RVA: u32 = 0x2000;
/// On-disk size of the synthetic stub.
pub const STUB_SIZE: usize = 0x2000;
/// Space the synthetic stub reserves for the resource tree.
pub const STUB_RSRC_CAPACITY: usize = 0x1000;

/// The manifest the synthetic stub ships with. The `supportedOS` block
/// marks content a build must carry through unchanged.
pub const STUB_MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<assembly xmlns="urn:schemas-microsoft-com:asm.v1" manifestVersion="1.0">
  <compatibility xmlns="urn:schemas-microsoft-com:compatibility.v1">
    <application>
      <supportedOS Id="{8e0f7a12-bfb3-4fe8-b9a5-48fd50a15a9a}"/>
    </application>
  </compatibility>
  <trustInfo xmlns="urn:schemas-microsoft-com:asm.v3">
    <security>
      <requestedPrivileges>
        <requestedExecutionLevel level="asInvoker" uiAccess="false"/>
      </requestedPrivileges>
    </security>
  </trustInfo>
</assembly>
"#;

/// A stub with the format-1 default capacities.
pub fn stub_image() -> Vec<u8> {
    stub_image_with(StubDescriptor::default())
}

/// A PE32+ stub with `.text`, `.rsrc` and `.sfxcfg` sections, an initial
/// resource tree (stale version info, asInvoker manifest, one 16x16 icon
/// under id 5) and the given configuration descriptor.
pub fn stub_image_with(descriptor: StubDescriptor) -> Vec<u8> {
    let pe_offset = 0x80usize;
    let coff = pe_offset + 4;
    let opt = coff + 20;
    let opt_size = 112 + 16 * 8;
    let table = opt + opt_size;

    let mut image = vec![0u8; STUB_SIZE];
    image[0] = b'M';
    image[1] = b'Z';
    image[0x3C..0x40].copy_from_slice(&(pe_offset as u32).to_le_bytes());
    image[pe_offset..pe_offset + 4].copy_from_slice(b"PE\0\0");
    image[coff..coff + 2].copy_from_slice(&0x8664u16.to_le_bytes()); // x86-64
    image[coff + 2..coff + 4].copy_from_slice(&3u16.to_le_bytes());
    image[coff + 16..coff + 18].copy_from_slice(&(opt_size as u16).to_le_bytes());
    image[opt..opt + 2].copy_from_slice(&0x20Bu16.to_le_bytes()); // PE32+
    image[opt + 68..opt + 70].copy_from_slice(&2u16.to_le_bytes()); // GUI subsystem
    image[opt + 108..opt + 112].copy_from_slice(&16u32.to_le_bytes());

    write_section(&mut image, table, 0, b".text", 0x200, 0x1000, 0x200, 0x200, 0x6000_0020);
    write_section(&mut image, table, 1, b".rsrc", 0x1000, STUB_RSRC_RVA, 0x1000, 0x400, 0x4000_0040);
    write_section(&mut image, table, 2, b".sfxcfg", 0xC00, 0x3000, 0xC00, 0x1400, 0xC000_0040);

    // Non-zero filler so the code section looks like a real one.
    for (i, byte) in image[0x200..0x400].iter_mut().enumerate() {
        *byte = (i % 251) as u8;
    }

    let tree = stub_resources().build(STUB_RSRC_RVA);
    assert!(tree.len() <= STUB_RSRC_CAPACITY);
    image[0x400..0x400 + tree.len()].copy_from_slice(&tree);
    let dir2 = opt + 112 + 2 * 8;
    image[dir2..dir2 + 4].copy_from_slice(&STUB_RSRC_RVA.to_le_bytes());
    image[dir2 + 4..dir2 + 8].copy_from_slice(&(tree.len() as u32).to_le_bytes());

    image[0x1400..0x1400 + CONFIG_HEADER_LEN].copy_from_slice(&descriptor.encode());
    image
}

fn write_section(
    image: &mut [u8],
    table: usize,
    index: usize,
    name: &[u8],
    virtual_size: u32,
    rva: u32,
    raw_size: u32,
    raw_ptr: u32,
    characteristics: u32,
) {
    let at = table + index * 40;
    image[at..at + name.len()].copy_from_slice(name);
    image[at + 8..at + 12].copy_from_slice(&virtual_size.to_le_bytes());
    image[at + 12..at + 16].copy_from_slice(&rva.to_le_bytes());
    image[at + 16..at + 20].copy_from_slice(&raw_size.to_le_bytes());
    image[at + 20..at + 24].copy_from_slice(&raw_ptr.to_le_bytes());
    image[at + 36..at + 40].copy_from_slice(&characteristics.to_le_bytes());
}

fn stub_resources() -> ResourceTable {
    let mut table = ResourceTable::new();
    table.insert(
        ResourceKey::ids(RT_MANIFEST, 1, 1033),
        ResourceData::new(STUB_MANIFEST.as_bytes().to_vec()),
    );
    // Deliberately not a parseable version tree; every build replaces it.
    table.insert(ResourceKey::ids(RT_VERSION, 1, 1033), ResourceData::new(b"stale".to_vec()));
    table.insert(ResourceKey::ids(RT_ICON, 5, LANG_NEUTRAL), ResourceData::new(vec![0x11; 16]));
    table.insert(
        ResourceKey::ids(RT_GROUP_ICON, 1, LANG_NEUTRAL),
        ResourceData::new(stub_group_icon()),
    );
    table
}

// Group directory with a single 16x16 entry referencing RT_ICON id 5.
fn stub_group_icon() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&[16, 16, 0, 0]);
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&32u16.to_le_bytes());
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&5u16.to_le_bytes());
    out
}

pub fn write_stub(dir: &Path) -> PathBuf {
    let path = dir.join("stub.exe");
    std::fs::write(&path, stub_image()).unwrap();
    path
}

pub fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, data) in files {
        writer.start_file(*name, FileOptions::default()).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn write_zip(dir: &Path, files: &[(&str, &[u8])]) -> PathBuf {
    let path = dir.join("payload.zip");
    std::fs::write(&path, zip_bytes(files)).unwrap();
    path
}

pub fn ico_bytes(images: &[(u8, u8, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&(images.len() as u16).to_le_bytes());
    let mut offset = 6 + images.len() * 16;
    for (width, height, data) in images {
        out.push(*width);
        out.push(*height);
        out.push(0);
        out.push(0);
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&32u16.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(offset as u32).to_le_bytes());
        offset += data.len();
    }
    for (_, _, data) in images {
        out.extend_from_slice(data);
    }
    out
}

pub fn write_ico(dir: &Path, images: &[(u8, u8, &[u8])]) -> PathBuf {
    let path = dir.join("app.ico");
    std::fs::write(&path, ico_bytes(images)).unwrap();
    path
}

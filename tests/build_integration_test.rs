mod common;

use std::path::Path;

use sfxforge::assemble::{build_executable, Overwrite};
use sfxforge::error::BuildError;
use sfxforge::footer::{PayloadFooter, FOOTER_LEN};
use sfxforge::inspect;
use sfxforge::launch;
use sfxforge::pe::rsrc::{ResourceKey, ResourceTable, LANG_NEUTRAL, RT_GROUP_ICON, RT_ICON, RT_MANIFEST};
use sfxforge::pe::PeLayout;
use sfxforge::request::{BuildRequest, VersionStrings};
use sfxforge::resource::RawResource;
use sfxforge::stub::{StubDescriptor, RESOURCE_SECTION, V1_COMMAND_CAPACITY, V1_WORKDIR_CAPACITY};
use tempfile::tempdir;

fn basic_request(archive: &Path) -> BuildRequest {
    BuildRequest::new(
        "Demo App",
        "1.2",
        None,
        "<dir_path>\\run.exe --install",
        "",
        false,
        archive.to_path_buf(),
    )
    .unwrap()
}

fn output_resources(bytes: &[u8]) -> ResourceTable {
    let footer = PayloadFooter::from_image(bytes).unwrap();
    let image = &bytes[..footer.payload_offset as usize];
    let layout = PeLayout::parse(image).unwrap();
    let section = layout.section(RESOURCE_SECTION).unwrap();
    ResourceTable::parse(&image[section.raw_range()], section.virtual_address).unwrap()
}

#[test]
fn build_writes_image_then_payload_then_trailer() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let stub = common::write_stub(dir.path());
    let zip = common::write_zip(dir.path(), &[("app/run.exe", b"MZ fake"), ("app/readme.txt", b"hi")]);
    let zip_raw = std::fs::read(&zip)?;
    let out = dir.path().join("demo.exe");

    let report = build_executable(&basic_request(&zip), &stub, &out, Overwrite::Deny)?;
    assert_eq!(report.stub_size, common::STUB_SIZE as u64);
    assert_eq!(report.payload_offset, common::STUB_SIZE as u64);
    assert_eq!(report.payload_size, zip_raw.len() as u64);
    assert_eq!(report.total_size, (common::STUB_SIZE + zip_raw.len() + FOOTER_LEN) as u64);

    let bytes = std::fs::read(&out)?;
    assert_eq!(bytes.len() as u64, report.total_size);
    // The payload region is the archive, byte for byte.
    assert_eq!(&bytes[common::STUB_SIZE..common::STUB_SIZE + zip_raw.len()], &zip_raw[..]);
    let footer = PayloadFooter::from_image(&bytes)?;
    assert_eq!(footer.payload_offset, common::STUB_SIZE as u64);
    assert_eq!(footer.payload_size, zip_raw.len() as u64);
    assert_eq!(footer.payload_crc32, crc32fast::hash(&zip_raw));
    Ok(())
}

#[test]
fn inspect_round_trips_the_build_request() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let stub = common::write_stub(dir.path());
    let zip = common::write_zip(dir.path(), &[("widget.exe", b"MZ"), ("widget.dat", b"data")]);
    let icon = common::write_ico(dir.path(), &[(16, 16, &[0xAA; 32]), (32, 32, &[0xBB; 64])]);
    let out = dir.path().join("widget-setup.exe");

    let request = BuildRequest::new(
        "Widget Setup",
        "2.5",
        Some(icon),
        "<dir_path>\\widget.exe --quiet",
        "app",
        true,
        zip,
    )?
    .with_version_strings(VersionStrings {
        company_name: Some("Widget Corp".to_string()),
        file_description: Some("Widget installer".to_string()),
        legal_copyright: Some("(c) 2025 Widget Corp".to_string()),
    });
    build_executable(&request, &stub, &out, Overwrite::Deny)?;

    let report = inspect::inspect(&out)?;
    assert_eq!(report.machine, 0x8664);
    assert_eq!(report.subsystem, 2);
    assert!(report.payload_crc_ok);
    assert_eq!(report.archive_entries, Some(2));
    assert_eq!(report.command_line, "<dir_path>\\widget.exe --quiet");
    assert_eq!(report.working_dir, "app");
    assert!(report.run_as_admin);
    assert_eq!(report.command_capacity, V1_COMMAND_CAPACITY);
    assert_eq!(report.workdir_capacity, V1_WORKDIR_CAPACITY);
    assert_eq!(report.product_name.as_deref(), Some("Widget Setup"));
    assert_eq!(report.product_version.as_deref(), Some("2.5.0.0"));
    assert_eq!(report.file_version.as_deref(), Some("2.5.0.0"));
    assert_eq!(
        report.version_strings.get("CompanyName").map(String::as_str),
        Some("Widget Corp")
    );
    assert_eq!(
        report.version_strings.get("LegalCopyright").map(String::as_str),
        Some("(c) 2025 Widget Corp")
    );
    assert_eq!(report.execution_level.as_deref(), Some("requireAdministrator"));
    assert_eq!(report.icon_images, 2);
    assert!(report.has_group_icon);
    Ok(())
}

#[test]
fn rebuilds_are_byte_identical() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let stub = common::write_stub(dir.path());
    let zip = common::write_zip(dir.path(), &[("a.bin", &[7u8; 300])]);
    let first = dir.path().join("first.exe");
    let second = dir.path().join("second.exe");

    build_executable(&basic_request(&zip), &stub, &first, Overwrite::Deny)?;
    build_executable(&basic_request(&zip), &stub, &second, Overwrite::Deny)?;
    assert_eq!(std::fs::read(&first)?, std::fs::read(&second)?);
    Ok(())
}

#[test]
fn stub_manifest_blocks_survive_the_level_patch() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let stub = common::write_stub(dir.path());
    let zip = common::write_zip(dir.path(), &[("x", b"x")]);
    let out = dir.path().join("admin.exe");

    let request = BuildRequest::new(
        "Admin Tool",
        "1.0",
        None,
        "<dir_path>\\tool.exe",
        "",
        true,
        zip,
    )?;
    build_executable(&request, &stub, &out, Overwrite::Deny)?;

    let bytes = std::fs::read(&out)?;
    let table = output_resources(&bytes);
    // The manifest stayed under the stub's original key.
    let manifest = table.get(&ResourceKey::ids(RT_MANIFEST, 1, 1033)).unwrap();
    let text = std::str::from_utf8(&manifest.bytes)?;
    assert!(text.contains("{8e0f7a12-bfb3-4fe8-b9a5-48fd50a15a9a}"));
    assert!(text.contains(r#"level="requireAdministrator""#));
    assert!(!text.contains("asInvoker"));
    Ok(())
}

#[test]
fn default_build_keeps_the_stub_icon() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let stub = common::write_stub(dir.path());
    let zip = common::write_zip(dir.path(), &[("x", b"x")]);
    let out = dir.path().join("plain.exe");
    build_executable(&basic_request(&zip), &stub, &out, Overwrite::Deny)?;

    let table = output_resources(&std::fs::read(&out)?);
    assert!(table.get(&ResourceKey::ids(RT_ICON, 5, LANG_NEUTRAL)).is_some());
    assert_eq!(table.count_of_type(RT_GROUP_ICON), 1);
    Ok(())
}

#[test]
fn requested_icon_replaces_the_stub_icon_set() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let stub = common::write_stub(dir.path());
    let zip = common::write_zip(dir.path(), &[("x", b"x")]);
    let icon = common::write_ico(dir.path(), &[(16, 16, &[1u8; 20]), (48, 48, &[2u8; 40])]);
    let out = dir.path().join("branded.exe");

    let request = BuildRequest::new(
        "Branded",
        "1.0",
        Some(icon),
        "<dir_path>\\b.exe",
        "",
        false,
        zip,
    )?;
    build_executable(&request, &stub, &out, Overwrite::Deny)?;

    let table = output_resources(&std::fs::read(&out)?);
    assert_eq!(table.count_of_type(RT_ICON), 2);
    assert!(table.get(&ResourceKey::ids(RT_ICON, 5, LANG_NEUTRAL)).is_none());
    assert_eq!(
        table.get(&ResourceKey::ids(RT_ICON, 1, LANG_NEUTRAL)).unwrap().bytes,
        vec![1u8; 20]
    );
    assert_eq!(
        table.get(&ResourceKey::ids(RT_ICON, 2, LANG_NEUTRAL)).unwrap().bytes,
        vec![2u8; 40]
    );
    // The new group directory references id 1 in its first entry.
    let group = table.get(&ResourceKey::ids(RT_GROUP_ICON, 1, LANG_NEUTRAL)).unwrap();
    assert_eq!(u16::from_le_bytes([group.bytes[18], group.bytes[19]]), 1);
    Ok(())
}

#[test]
fn custom_resources_land_in_the_output() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let stub = common::write_stub(dir.path());
    let zip = common::write_zip(dir.path(), &[("x", b"x")]);
    let out = dir.path().join("custom.exe");

    let request = basic_request(&zip)
        .with_custom_resources(vec![RawResource::text("CONFIG:CHANNEL:stable")?]);
    build_executable(&request, &stub, &out, Overwrite::Deny)?;

    let table = output_resources(&std::fs::read(&out)?);
    let key = ResourceKey {
        type_id: sfxforge::pe::rsrc::ResourceId::Name("CONFIG".to_string()),
        name: sfxforge::pe::rsrc::ResourceId::Name("CHANNEL".to_string()),
        lang: LANG_NEUTRAL,
    };
    let expected: Vec<u8> = "stable".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
    assert_eq!(table.get(&key).unwrap().bytes, expected);
    Ok(())
}

#[test]
fn capacities_follow_the_stub_descriptor_not_the_defaults() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let descriptor = StubDescriptor {
        command_capacity: 32,
        workdir_capacity: 16,
        ..Default::default()
    };
    let stub = dir.path().join("tight-stub.exe");
    std::fs::write(&stub, common::stub_image_with(descriptor))?;
    let zip = common::write_zip(dir.path(), &[("x", b"x")]);
    let out = dir.path().join("out.exe");

    // 40 bytes pass the format-1 pre-check but not this stub.
    let request = BuildRequest::new(
        "Demo App",
        "1.0",
        None,
        &"x".repeat(40),
        "",
        false,
        zip,
    )?;
    let err = build_executable(&request, &stub, &out, Overwrite::Deny).unwrap_err();
    match err {
        BuildError::ConfigTooLong { field, len, capacity } => {
            assert_eq!(field, "command_line");
            assert_eq!(len, 40);
            assert_eq!(capacity, 32);
        }
        other => panic!("expected ConfigTooLong, got {:?}", other),
    }
    assert!(!out.exists());
    Ok(())
}

#[test]
fn existing_outputs_are_protected_unless_forced() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let stub = common::write_stub(dir.path());
    let zip = common::write_zip(dir.path(), &[("x", b"x")]);
    let out = dir.path().join("out.exe");

    build_executable(&basic_request(&zip), &stub, &out, Overwrite::Deny)?;
    let before = std::fs::read(&out)?;

    let err = build_executable(&basic_request(&zip), &stub, &out, Overwrite::Deny).unwrap_err();
    assert!(matches!(err, BuildError::DestinationExists { .. }));
    assert_eq!(std::fs::read(&out)?, before);

    build_executable(&basic_request(&zip), &stub, &out, Overwrite::Replace)?;
    Ok(())
}

#[test]
fn extracted_payload_matches_the_source_archive() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let stub = common::write_stub(dir.path());
    let zip = common::write_zip(dir.path(), &[("keep/this.txt", b"payload body")]);
    let zip_raw = std::fs::read(&zip)?;
    let out = dir.path().join("out.exe");
    build_executable(&basic_request(&zip), &stub, &out, Overwrite::Deny)?;

    let recovered = dir.path().join("recovered.zip");
    let written = inspect::extract_payload(&out, &recovered, Overwrite::Deny)?;
    assert_eq!(written, zip_raw.len() as u64);
    assert_eq!(std::fs::read(&recovered)?, zip_raw);
    Ok(())
}

#[test]
fn unpack_and_launch_plan_follow_the_config() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let stub = common::write_stub(dir.path());
    let zip = common::write_zip(
        dir.path(),
        &[("run.exe", b"MZ fake"), ("data/setup.ini", b"[install]")],
    );
    let out = dir.path().join("out.exe");

    let request = BuildRequest::new(
        "Demo App",
        "1.0",
        None,
        "<dir_path>/run.exe --from <current_app_path>",
        "data",
        false,
        zip,
    )?;
    build_executable(&request, &stub, &out, Overwrite::Deny)?;

    let dest = dir.path().join("unpacked");
    assert_eq!(launch::unpack_payload(&out, &dest)?, 2);
    assert_eq!(std::fs::read(dest.join("run.exe"))?, b"MZ fake");
    assert_eq!(std::fs::read(dest.join("data/setup.ini"))?, b"[install]");

    let bytes = std::fs::read(&out)?;
    let location = launch::locate_payload(&bytes)?;
    launch::verify_payload(&bytes, &location)?;
    let config = launch::read_config(&bytes)?;
    let plan = launch::resolve_launch_plan(&config, &dest, &out);
    assert_eq!(
        plan.command_line,
        format!("{}/run.exe --from {}", dest.display(), out.display())
    );
    assert_eq!(plan.working_dir, dest.join("data"));
    assert!(!plan.elevate);
    Ok(())
}

#[test]
fn oversized_resource_trees_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let stub = common::write_stub(dir.path());
    let zip = common::write_zip(dir.path(), &[("x", b"x")]);
    let blob = dir.path().join("blob.bin");
    std::fs::write(&blob, vec![0x5A; common::STUB_RSRC_CAPACITY + 1024])?;
    let out = dir.path().join("out.exe");

    let request = basic_request(&zip).with_custom_resources(vec![RawResource::file(&format!(
        "DATA:BLOB:{}",
        blob.display()
    ))?]);
    let err = build_executable(&request, &stub, &out, Overwrite::Deny).unwrap_err();
    match err {
        BuildError::ResourceOverflow { needed, capacity } => {
            assert!(needed > capacity);
            assert_eq!(capacity, common::STUB_RSRC_CAPACITY);
        }
        other => panic!("expected ResourceOverflow, got {:?}", other),
    }
    assert!(!out.exists());
    Ok(())
}

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

mod common;

fn build_args(cmd: &mut Command, stub: &Path, archive: &Path, out: &Path) {
    cmd.arg("build")
        .arg("--stub")
        .arg(stub)
        .arg(archive)
        .arg("-o")
        .arg(out)
        .arg("--product-name")
        .arg("Demo App")
        .arg("--product-version")
        .arg("1.2")
        .arg("--command-line")
        .arg("<dir_path>/app/run.exe");
}

#[test]
fn test_cli_build_inspect_extract_unpack_cycle() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Setup: a stub template and a payload archive
    let work = tempdir()?;
    let stub_path = common::write_stub(work.path());
    let archive_path =
        common::write_zip(work.path(), &[("app/run.exe", b"MZ fake"), ("app/cfg.ini", b"k=v")]);
    let out_path = work.path().join("installer.exe");

    // 2. Build the self-extracting executable
    let mut cmd = Command::cargo_bin("sfxforge")?;
    build_args(&mut cmd, &stub_path, &archive_path, &out_path);
    cmd.arg("--company-name").arg("Demo Corp");
    cmd.assert().success().stdout(predicate::str::contains("Built"));
    assert!(out_path.exists());

    // 3. Inspect it, human readable
    let mut cmd = Command::cargo_bin("sfxforge")?;
    cmd.arg("inspect").arg(&out_path);
    cmd.assert().success().stdout(
        predicate::str::contains("Demo App")
            .and(predicate::str::contains("1.2.0.0"))
            .and(predicate::str::contains("asInvoker")),
    );

    // 4. Inspect it as JSON
    let mut cmd = Command::cargo_bin("sfxforge")?;
    cmd.arg("inspect").arg(&out_path).arg("--json");
    let assert = cmd.assert().success();
    let report: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout)?;
    assert_eq!(report["product_name"], "Demo App");
    assert_eq!(report["version_strings"]["CompanyName"], "Demo Corp");
    assert_eq!(report["run_as_admin"], false);
    assert_eq!(report["archive_entries"], 2);
    assert_eq!(report["payload_crc_ok"], true);
    assert_eq!(report["footer"]["format_version"], 1);

    // 5. Extract the payload back out and compare with the source
    let recovered = work.path().join("recovered.zip");
    let mut cmd = Command::cargo_bin("sfxforge")?;
    cmd.arg("extract").arg(&out_path).arg("-o").arg(&recovered);
    cmd.assert().success().stdout(predicate::str::contains("Extracted"));
    assert_eq!(std::fs::read(&recovered)?, std::fs::read(&archive_path)?);

    // 6. Unpack the payload contents
    let dest = work.path().join("unpacked");
    let mut cmd = Command::cargo_bin("sfxforge")?;
    cmd.arg("unpack").arg(&out_path).arg("-o").arg(&dest);
    cmd.assert().success().stdout(predicate::str::contains("Unpacked 2 files"));
    assert_eq!(std::fs::read(dest.join("app/run.exe"))?, b"MZ fake");
    assert_eq!(std::fs::read(dest.join("app/cfg.ini"))?, b"k=v");

    Ok(())
}

#[test]
fn test_cli_refuses_to_overwrite_without_force() -> Result<(), Box<dyn std::error::Error>> {
    let work = tempdir()?;
    let stub_path = common::write_stub(work.path());
    let archive_path = common::write_zip(work.path(), &[("a.txt", b"a")]);
    let out_path = work.path().join("out.exe");

    let mut cmd = Command::cargo_bin("sfxforge")?;
    build_args(&mut cmd, &stub_path, &archive_path, &out_path);
    cmd.assert().success();

    let mut cmd = Command::cargo_bin("sfxforge")?;
    build_args(&mut cmd, &stub_path, &archive_path, &out_path);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    let mut cmd = Command::cargo_bin("sfxforge")?;
    build_args(&mut cmd, &stub_path, &archive_path, &out_path);
    cmd.arg("--force");
    cmd.assert().success();
    Ok(())
}

#[test]
fn test_cli_reports_configuration_errors_with_a_category() -> Result<(), Box<dyn std::error::Error>> {
    let work = tempdir()?;
    let stub_path = common::write_stub(work.path());
    let archive_path = common::write_zip(work.path(), &[("a.txt", b"a")]);
    let out_path = work.path().join("out.exe");

    let mut cmd = Command::cargo_bin("sfxforge")?;
    cmd.arg("build")
        .arg("--stub")
        .arg(&stub_path)
        .arg(&archive_path)
        .arg("-o")
        .arg(&out_path)
        .arg("--product-name")
        .arg("Demo App")
        .arg("--product-version")
        .arg("not.a.version")
        .arg("--command-line")
        .arg("run.exe");
    cmd.assert().failure().stderr(
        predicate::str::contains("configuration").and(predicate::str::contains("Invalid product version")),
    );
    assert!(!out_path.exists());
    Ok(())
}

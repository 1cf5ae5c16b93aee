//! Main entry point for the sfxforge CLI app

use sfxforge::assemble::{self, Overwrite};
use sfxforge::cli::{self, Commands};
use sfxforge::error::BuildError;
use sfxforge::footer::FOOTER_LEN;
use sfxforge::inspect::{self, InspectReport};
use sfxforge::launch;
use sfxforge::request::{BuildRequest, VersionStrings};
use sfxforge::resource::RawResource;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn main() -> std::process::ExitCode {
    init_logging();
    if let Err(e) = run_app() {
        if e.downcast_ref::<clap::Error>().is_none() {
            match e.downcast_ref::<BuildError>() {
                Some(err) => eprintln!("Error ({}): {}", err.category(), err),
                None => eprintln!("Error: {}", e),
            }
        }
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

/// Logging goes to stderr so that report output on stdout stays parseable.
/// `RUST_LOG` overrides the default `warn` level.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_app() -> Result<(), Box<dyn std::error::Error>> {
    let command = cli::run()?;

    match &command {
        Commands::Build {
            stub,
            archive,
            output,
            product_name,
            product_version,
            icon,
            command_line,
            working_dir,
            run_as_admin,
            company_name,
            description,
            copyright,
            string_resources,
            file_resources,
            force,
        } => {
            let mut extra = Vec::new();
            for spec in string_resources {
                extra.push(RawResource::text(spec)?);
            }
            for spec in file_resources {
                extra.push(RawResource::file(spec)?);
            }
            let request = BuildRequest::new(
                product_name,
                product_version,
                icon.clone(),
                command_line,
                working_dir,
                *run_as_admin,
                archive.clone(),
            )?
            .with_version_strings(VersionStrings {
                company_name: company_name.clone(),
                file_description: description.clone(),
                legal_copyright: copyright.clone(),
            })
            .with_custom_resources(extra);

            let overwrite = if *force { Overwrite::Replace } else { Overwrite::Deny };
            let report = assemble::build_executable(&request, stub, output, overwrite)?;
            println!(
                "Built {} ({} bytes: {} stub + {} payload + {} trailer)",
                report.output_path.display(),
                report.total_size,
                report.stub_size,
                report.payload_size,
                FOOTER_LEN
            );
        }
        Commands::Inspect { exe, json } => {
            let report = inspect::inspect(exe)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
        Commands::Extract { exe, output, force } => {
            let overwrite = if *force { Overwrite::Replace } else { Overwrite::Deny };
            let written = inspect::extract_payload(exe, output, overwrite)?;
            println!("Extracted {} bytes to {}", written, output.display());
        }
        Commands::Unpack { exe, output } => {
            let dest = output.clone().unwrap_or_else(|| PathBuf::from("."));
            let files = launch::unpack_payload(exe, &dest)?;
            println!("Unpacked {} files to {}", files, dest.display());
        }
    }

    Ok(())
}

fn print_report(report: &InspectReport) {
    println!("file:            {} ({} bytes)", report.path.display(), report.file_size);
    println!("machine:         0x{:04x}", report.machine);
    println!("subsystem:       {}", report.subsystem);
    println!(
        "payload:         {} bytes at offset {}, crc32 {:08x} ({})",
        report.footer.payload_size,
        report.footer.payload_offset,
        report.footer.payload_crc32,
        if report.payload_crc_ok { "ok" } else { "MISMATCH" }
    );
    match report.archive_entries {
        Some(count) => println!("archive entries: {}", count),
        None => println!("archive entries: unreadable"),
    }
    println!("command line:    {}", report.command_line);
    let workdir = if report.working_dir.is_empty() {
        "(extraction directory)"
    } else {
        &report.working_dir
    };
    println!("working dir:     {}", workdir);
    println!("run as admin:    {}", report.run_as_admin);
    println!(
        "capacities:      command {} bytes, workdir {} bytes",
        report.command_capacity, report.workdir_capacity
    );
    if let Some(name) = &report.product_name {
        println!("product name:    {}", name);
    }
    if let Some(version) = &report.product_version {
        println!("product version: {}", version);
    }
    if let Some(version) = &report.file_version {
        println!("file version:    {}", version);
    }
    for (key, value) in &report.version_strings {
        println!("  {}: {}", key, value);
    }
    if let Some(level) = &report.execution_level {
        println!("execution level: {}", level);
    }
    println!(
        "icon:            {} image(s), group {}",
        report.icon_images,
        if report.has_group_icon { "present" } else { "absent" }
    );
    println!("resources:       {} entries", report.resource_count);
}

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Build a self-extracting executable from a stub and a payload archive.
    #[command(alias = "b")]
    Build {
        /// The stub executable that will carry the payload and launch configuration.
        #[arg(long)]
        stub: PathBuf,

        /// The ZIP archive to embed as the payload.
        #[arg(required = true)]
        archive: PathBuf,

        /// The path for the output executable (e.g., installer.exe).
        #[arg(short, long)]
        output: PathBuf,

        /// Product name for the version resource. Also the default FileDescription.
        #[arg(long)]
        product_name: String,

        /// Product version with up to four dot-separated parts (e.g., 1.2 or 1.2.3.4). Missing parts default to zero.
        #[arg(long)]
        product_version: String,

        /// A .ico file whose images replace the stub's application icon. If not provided, the stub icon is kept.
        #[arg(long)]
        icon: Option<PathBuf>,

        /// The command the stub runs after unpacking. <dir_path> and <current_app_path> expand at launch time.
        #[arg(long)]
        command_line: String,

        /// Working directory for the launched command. Relative paths resolve against the extraction directory. [default: the extraction directory]
        #[arg(long, default_value = "")]
        working_dir: String,

        /// Request elevation: the embedded manifest asks for requireAdministrator instead of asInvoker.
        #[arg(long)]
        run_as_admin: bool,

        /// CompanyName string for the version resource.
        #[arg(long)]
        company_name: Option<String>,

        /// FileDescription string for the version resource. [default: the product name]
        #[arg(long)]
        description: Option<String>,

        /// LegalCopyright string for the version resource.
        #[arg(long)]
        copyright: Option<String>,

        /// Extra text resource as TYPE:NAME:VALUE (e.g., CONFIG:SETTINGS:mode=full). May be repeated.
        #[arg(long = "string-resource")]
        string_resources: Vec<String>,

        /// Extra file resource as TYPE:NAME:PATH. The file contents become the resource data. May be repeated.
        #[arg(long = "file-resource")]
        file_resources: Vec<String>,

        /// Overwrite the output file if it already exists.
        #[arg(short, long)]
        force: bool,
    },

    /// Inspect a built executable: trailer, launch config, version strings and resources.
    #[command(alias = "i")]
    Inspect {
        /// The built self-extracting executable to inspect.
        #[arg(required = true)]
        exe: PathBuf,

        /// Print the report as JSON instead of human-readable text.
        #[arg(long)]
        json: bool,
    },

    /// Extract the embedded payload archive from a built executable.
    #[command(alias = "x")]
    Extract {
        /// The built self-extracting executable.
        #[arg(required = true)]
        exe: PathBuf,

        /// The path for the recovered ZIP archive.
        #[arg(short, long)]
        output: PathBuf,

        /// Overwrite the output file if it already exists.
        #[arg(short, long)]
        force: bool,
    },

    /// Unpack the payload contents to a directory, the way the stub does at run time.
    #[command(alias = "u")]
    Unpack {
        /// The built self-extracting executable.
        #[arg(required = true)]
        exe: PathBuf,

        /// The directory where payload files will be written. Defaults to the current directory.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Parses command-line arguments using `clap` and returns the command to execute.
///
/// This is the main entry point for the CLI logic.
/// It handles parsing and returns a `Commands` enum variant, or an error if parsing fails.
pub fn run() -> Result<Commands, Box<dyn std::error::Error>> {
    let args = Args::parse();
    Ok(args.command)
}

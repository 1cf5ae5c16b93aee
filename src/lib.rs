//! # sfxforge Core Library
//!
//! This crate provides the core functionality for the `sfxforge` builder.
//!
//! It is designed to be used by the `sfxforge` command-line application, but its public API
//! can also be used to programmatically build, inspect, and unpack self-extracting executables.
//!
//! ## Key Modules
//!
//! - [`assemble`]: Drives a full build, from validated inputs to the finished executable.
//! - [`stub`]: Parses stub templates and patches their configuration section.
//! - [`pe`]: Reads and rewrites the Portable Executable structures the stub is made of.
//! - [`resource`]: Compiles version info, icons, manifests and custom resources.
//! - [`archive`]: Validates and streams the ZIP payload.
//! - [`inspect`]: Reports on built executables and recovers their payload.
//! - [`launch`]: Run-time side of the contract, unpacking and launch-plan resolution.
//!
//! ## Examples
//!
//! ```no_run
//! use sfxforge::assemble::{build_executable, Overwrite};
//! use sfxforge::request::BuildRequest;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let request = BuildRequest::new(
//!     "Demo App",
//!     "1.2.3",
//!     None,
//!     "<dir_path>\\setup.exe",
//!     "",
//!     false,
//!     "payload.zip".into(),
//! )?;
//! build_executable(&request, Path::new("stub.exe"), Path::new("demo.exe"), Overwrite::Deny)?;
//! # Ok(())
//! # }
//! ```

// This file declares all the modules in the library.

pub mod archive;
pub mod assemble;
pub mod cli;
pub mod footer;
pub mod inspect;
pub mod launch;
pub mod pe;
pub mod request;
pub mod resource;
pub mod stub;

pub mod error;
pub use error::BuildError;

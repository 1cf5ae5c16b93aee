//! Application manifest patching.
//!
//! Elevation is controlled by the `level` attribute of
//! `requestedExecutionLevel` in the embedded manifest. The builder edits
//! the stub's own manifest when it has one, so activation contexts and
//! compatibility entries survive, and falls back to a minimal manifest
//! when the stub ships without one or with one that never mentions an
//! execution level.

use regex::Regex;

pub const LEVEL_REQUIRE_ADMIN: &str = "requireAdministrator";
pub const LEVEL_AS_INVOKER: &str = "asInvoker";

const LEVEL_ATTR: &str = r#"level\s*=\s*"([^"]*)""#;

const DEFAULT_MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<assembly xmlns="urn:schemas-microsoft-com:asm.v1" manifestVersion="1.0">
  <trustInfo xmlns="urn:schemas-microsoft-com:asm.v3">
    <security>
      <requestedPrivileges>
        <requestedExecutionLevel level="asInvoker" uiAccess="false"/>
      </requestedPrivileges>
    </security>
  </trustInfo>
</assembly>
"#;

/// Returns manifest bytes carrying the requested execution level.
///
/// Only the first `level` attribute is rewritten; `uiAccess` and
/// everything else stay as the stub shipped them.
pub fn with_execution_level(existing: Option<&[u8]>, run_as_admin: bool) -> Vec<u8> {
    let level = if run_as_admin { LEVEL_REQUIRE_ADMIN } else { LEVEL_AS_INVOKER };
    let re = Regex::new(LEVEL_ATTR).unwrap();
    let text = existing
        .and_then(|bytes| std::str::from_utf8(bytes).ok())
        .filter(|text| re.is_match(text))
        .unwrap_or(DEFAULT_MANIFEST);
    re.replace(text, format!(r#"level="{}""#, level).as_str())
        .into_owned()
        .into_bytes()
}

/// Reads the execution level back out of manifest bytes.
pub fn execution_level(manifest: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(manifest).ok()?;
    Regex::new(LEVEL_ATTR)
        .unwrap()
        .captures(text)
        .map(|captures| captures[1].to_string())
}

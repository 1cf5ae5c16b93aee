fn main() {
    // --- Windows resource embedding (version info) ---
    // Only for the main binary, otherwise linking test harnesses
    // produces duplicate VERSION resources.
    #[cfg(target_os = "windows")]
    if std::env::var("CARGO_BIN_NAME").is_ok() {
        let mut res = winres::WindowsResource::new();
        res.set("FileDescription", "sfxforge SFX builder");
        res.set("ProductName", "sfxforge");
        res.set("FileVersion", env!("CARGO_PKG_VERSION"));
        res.set("ProductVersion", env!("CARGO_PKG_VERSION"));
        res.compile().expect("failed to compile Windows resources");
    }
}

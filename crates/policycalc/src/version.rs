//! Version information.

/// Get the version string.
#[must_use]
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Version plus the default compute API, shown in verbose logs.
#[must_use]
pub fn full_version() -> String {
    format!(
        "policycalc {} (api {})",
        version(),
        policycalc_core::constants::DEFAULT_API_URL
    )
}

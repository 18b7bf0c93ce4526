//! policycalc library: application wiring for the `policycalc` binary.

pub mod app;
pub mod config;
pub mod errors;
pub mod version;

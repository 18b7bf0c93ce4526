//! Workspace-level integration tests for policycalc.
//!
//! The test suites live under `tests/`; this library target is empty.

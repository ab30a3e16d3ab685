//! xdl Library
//!
//! Runs the packager, the public tunnel and the local manifest server for a
//! mobile app project, headless, with NDJSON event output.

pub mod headless;

pub use headless::runner::run_headless;

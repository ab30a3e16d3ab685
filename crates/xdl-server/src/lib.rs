//! # xdl-server - Local HTTP Front Door
//!
//! The server phones talk to: it proxies bundle and source map requests to the
//! packager and serves the (optionally signed) app manifest.
//!
//! ## Public API
//!
//! - [`LocalServer`] - Listener lifecycle (start, restart, graceful stop)
//! - [`ManifestCache`] - Single-slot memo of the last signed manifest
//! - [`router()`] - The axum routes, for embedding or testing
//! - [`rewrite_path()`] - Bundle/source map path rewriting

pub mod cache;
pub mod manifest;
pub mod proxy;
pub mod server;

pub use cache::ManifestCache;
pub use manifest::{build_manifest, ACCEPT_SIGNATURE_HEADER, MANIFEST_ERROR_STATUS};
pub use proxy::{rewrite_path, Artifact, PLATFORM_HEADER};
pub use server::{router, LocalServer, ServerContext, ServerState};

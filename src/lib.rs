//! reposerve - Sandboxed manifest generation
//!
//! Turns an application source in a repository checkout into a list of
//! deployable manifests. Every file reference is contained to the checkout,
//! the rendering backend is detected from the source, results and failures
//! are cached per request fingerprint, and concurrent generations are
//! bounded.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod limiter;
pub mod render;
pub mod repo;
pub mod sandbox;
pub mod service;
pub mod source;

pub use error::{RepoServeError, RepoServeResult};
pub use service::ManifestService;

//! Filesystem containment for untrusted repository content
//!
//! Every file a backend will read is resolved here before anything executes.
//! Nothing else in the crate decides whether a path is inside a repository.
//!
//! # Security Model
//!
//! - Absolute references are re-rooted at the repository root, never the host
//! - Every symlink component is resolved, not just the final segment
//! - `.` and `..` are applied after link resolution, walking left to right
//! - Remote references pass through only for explicitly allowed URL schemes
//! - Rejections name the offending reference and never the file contents
//!
//! # Reference Outcomes
//!
//! | Candidate | Outcome |
//! |-----------|---------|
//! | `values.yaml` | joined to the referencing directory, checked |
//! | `/values.yaml` | joined to the repository root, checked |
//! | `https://host/values.yaml` | passed through if `https` is allowed |
//! | `file:///etc/passwd` | rejected unless `file` is allowed |
//!
//! # Blocking IO
//!
//! Resolving one reference costs a handful of `lstat`/`readlink` calls, so
//! [`Sandbox`] is synchronous and callable from async code. Directory walks
//! through [`find_manifest_files`] touch the whole tree and run on the
//! blocking pool.

pub mod resolve;
pub mod scan;

pub use resolve::{resolve, Rejection, ResolvedRef, Sandbox, SandboxDecision};
pub use scan::{find_manifest_files, ManifestFile, ScanOptions};

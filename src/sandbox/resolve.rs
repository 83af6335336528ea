//! Reference resolution against a repository root

use std::collections::VecDeque;
use std::ffi::OsString;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use url::Url;

/// Upper bound on symlinks followed while resolving one reference
const MAX_LINK_HOPS: usize = 40;

/// A reference that passed containment checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedRef {
    /// Canonical absolute path inside the repository root
    Local(PathBuf),

    /// Remote URL with an allowed scheme, fetched by the backend
    Remote(String),
}

impl ResolvedRef {
    /// The local path, if this reference is local
    pub fn local(&self) -> Option<&Path> {
        match self {
            Self::Local(path) => Some(path),
            Self::Remote(_) => None,
        }
    }
}

/// Why a reference was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// URL scheme is not in the allowed set
    SchemeNotAllowed { scheme: String },

    /// Canonical path is not a descendant of the root
    OutsideRoot,

    /// Too many symlinks followed
    LinkLoop,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SchemeNotAllowed { scheme } => {
                write!(f, "uses URL scheme '{}' which is not allowed", scheme)
            }
            Self::OutsideRoot => write!(f, "resolved to outside repository root"),
            Self::LinkLoop => write!(f, "has too many levels of symbolic links"),
        }
    }
}

/// Outcome of a containment check
pub type SandboxDecision = Result<ResolvedRef, Rejection>;

/// Containment checker bound to one repository root
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
    allowed_schemes: Vec<String>,
}

impl Sandbox {
    /// Create a sandbox for `root`
    ///
    /// The root itself is canonicalized so comparisons happen between fully
    /// resolved paths. A root that cannot be canonicalized is cleaned lexically.
    pub fn new(root: &Path, allowed_schemes: &[String]) -> Self {
        let root = std::fs::canonicalize(root).unwrap_or_else(|e| {
            debug!("Cannot canonicalize root {}: {}", root.display(), e);
            lexical_clean(&absolutize(root))
        });

        let mut allowed_schemes: Vec<String> = allowed_schemes
            .iter()
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        allowed_schemes.sort();
        allowed_schemes.dedup();

        Self {
            root,
            allowed_schemes,
        }
    }

    /// Canonical repository root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a reference relative to the repository root
    pub fn resolve(&self, candidate: &str) -> SandboxDecision {
        self.resolve_from(&self.root, candidate)
    }

    /// Resolve a reference relative to `base_dir`, the directory of the
    /// referencing source
    pub fn resolve_from(&self, base_dir: &Path, candidate: &str) -> SandboxDecision {
        if let Some(scheme) = url_scheme(candidate) {
            if self.allowed_schemes.iter().any(|s| *s == scheme) {
                return Ok(ResolvedRef::Remote(candidate.to_string()));
            }
            warn!(reference = %candidate, scheme = %scheme, "Rejected reference with disallowed scheme");
            return Err(Rejection::SchemeNotAllowed { scheme });
        }

        let candidate_path = Path::new(candidate);
        let joined = if candidate_path.has_root() {
            // Absolute references are rooted at the repository, not the host
            let relative: PathBuf = candidate_path
                .components()
                .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
                .collect();
            self.root.join(relative)
        } else if base_dir.is_absolute() {
            base_dir.join(candidate_path)
        } else {
            self.root.join(base_dir).join(candidate_path)
        };

        self.contain(&joined).map(ResolvedRef::Local).inspect_err(|rejection| {
            warn!(reference = %candidate, reason = %rejection, "Rejected reference");
        })
    }

    /// Canonicalize an absolute path and require it to stay inside the root
    pub fn contain(&self, path: &Path) -> Result<PathBuf, Rejection> {
        let canonical = eval_symlinks(&absolutize(path))?;
        if canonical.starts_with(&self.root) {
            Ok(canonical)
        } else {
            Err(Rejection::OutsideRoot)
        }
    }

    /// Path of `path` relative to the root, with `/` separators
    pub fn relative(&self, path: &Path) -> String {
        relative_display(path.strip_prefix(&self.root).unwrap_or(path))
    }
}

/// Resolve `candidate` against `root` with no referencing directory.
pub fn resolve(root: &Path, candidate: &str, allowed_schemes: &[String]) -> SandboxDecision {
    Sandbox::new(root, allowed_schemes).resolve(candidate)
}

/// Render a relative path with `/` separators, `.` for empty
pub(crate) fn relative_display(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            Component::ParentDir => Some("..".to_string()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// Extract a URL scheme, ignoring plain paths
fn url_scheme(candidate: &str) -> Option<String> {
    match Url::parse(candidate) {
        // Single-letter schemes are drive letters, not URLs
        Ok(url) if url.scheme().len() > 1 => Some(url.scheme().to_ascii_lowercase()),
        _ => None,
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| Path::new("/").join(path))
    }
}

enum Part {
    Parent,
    Name(OsString),
}

fn parts(path: &Path) -> VecDeque<Part> {
    path.components()
        .filter_map(|c| match c {
            Component::ParentDir => Some(Part::Parent),
            Component::Normal(name) => Some(Part::Name(name.to_os_string())),
            _ => None,
        })
        .collect()
}

/// Lexically apply `.` and `..` without touching the filesystem
fn lexical_clean(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::from("/");
    for part in parts(path) {
        match part {
            Part::Parent => {
                cleaned.pop();
            }
            Part::Name(name) => cleaned.push(name),
        }
    }
    cleaned
}

/// Resolve every symlink component of an absolute path.
///
/// Components are consumed left to right. A symlink is replaced by its target
/// spliced in front of the remaining components, so a later `..` applies to the
/// link target rather than the link's parent. Components that do not exist are
/// kept lexically, so missing files still get a containment verdict.
fn eval_symlinks(path: &Path) -> Result<PathBuf, Rejection> {
    let mut resolved = PathBuf::from("/");
    let mut pending = parts(path);
    let mut hops = 0;

    while let Some(part) = pending.pop_front() {
        match part {
            Part::Parent => {
                resolved.pop();
            }
            Part::Name(name) => {
                resolved.push(&name);

                let is_link = std::fs::symlink_metadata(&resolved)
                    .map(|m| m.file_type().is_symlink())
                    .unwrap_or(false);
                if !is_link {
                    continue;
                }

                hops += 1;
                if hops > MAX_LINK_HOPS {
                    return Err(Rejection::LinkLoop);
                }

                let target = std::fs::read_link(&resolved).map_err(|_| Rejection::LinkLoop)?;
                resolved.pop();
                if target.has_root() {
                    resolved = PathBuf::from("/");
                }

                let mut spliced = parts(&target);
                spliced.append(&mut pending);
                pending = spliced;
            }
        }
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn https() -> Vec<String> {
        vec!["https".to_string()]
    }

    fn repo() -> (TempDir, Sandbox) {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("apps/redis")).unwrap();
        fs::write(temp.path().join("apps/redis/values.yaml"), "a: 1").unwrap();
        fs::write(temp.path().join("shared.yaml"), "b: 2").unwrap();
        let sandbox = Sandbox::new(temp.path(), &https());
        (temp, sandbox)
    }

    fn canonical(path: &Path) -> PathBuf {
        fs::canonicalize(path).unwrap()
    }

    #[test]
    fn relative_reference_inside_root() {
        let (temp, sandbox) = repo();
        let base = sandbox.root().join("apps/redis");

        let resolved = sandbox.resolve_from(&base, "values.yaml").unwrap();
        assert_eq!(
            resolved,
            ResolvedRef::Local(canonical(&temp.path().join("apps/redis/values.yaml")))
        );
    }

    #[test]
    fn parent_traversal_inside_root_allowed() {
        let (temp, sandbox) = repo();
        let base = sandbox.root().join("apps/redis");

        let resolved = sandbox.resolve_from(&base, "../../shared.yaml").unwrap();
        assert_eq!(
            resolved,
            ResolvedRef::Local(canonical(&temp.path().join("shared.yaml")))
        );
    }

    #[test]
    fn parent_traversal_outside_root_rejected() {
        let (_temp, sandbox) = repo();
        let base = sandbox.root().join("apps/redis");

        let result = sandbox.resolve_from(&base, "../../../../../etc/passwd");
        assert_eq!(result, Err(Rejection::OutsideRoot));
    }

    #[test]
    fn absolute_reference_rooted_at_repository() {
        let (temp, sandbox) = repo();
        let base = sandbox.root().join("apps/redis");

        let resolved = sandbox.resolve_from(&base, "/shared.yaml").unwrap();
        assert_eq!(
            resolved,
            ResolvedRef::Local(canonical(&temp.path().join("shared.yaml")))
        );
    }

    #[test]
    fn absolute_reference_with_back_references_rejected() {
        let (_temp, sandbox) = repo();
        assert_eq!(
            sandbox.resolve("/../../../shared.yaml"),
            Err(Rejection::OutsideRoot)
        );
    }

    #[test]
    fn missing_file_inside_root_still_resolves() {
        let (temp, sandbox) = repo();
        let resolved = sandbox.resolve("apps/redis/missing.yaml").unwrap();
        assert_eq!(
            resolved,
            ResolvedRef::Local(canonical(temp.path()).join("apps/redis/missing.yaml"))
        );
    }

    #[test]
    fn allowed_scheme_passes_through() {
        let (_temp, sandbox) = repo();
        let url = "https://raw.example.com/values.yaml";
        assert_eq!(sandbox.resolve(url), Ok(ResolvedRef::Remote(url.to_string())));
    }

    #[test]
    fn file_scheme_rejected_unless_allowed() {
        let (_temp, sandbox) = repo();
        let result = sandbox.resolve("file://../../../../values.yaml");
        assert_eq!(
            result,
            Err(Rejection::SchemeNotAllowed {
                scheme: "file".to_string()
            })
        );
        assert!(result.unwrap_err().to_string().contains("is not allowed"));
    }

    #[test]
    fn custom_scheme_allowed() {
        let temp = TempDir::new().unwrap();
        let schemes = vec!["S3".to_string()];
        let decision = resolve(temp.path(), "s3://bucket/values.yaml", &schemes);
        assert!(matches!(decision, Ok(ResolvedRef::Remote(_))));

        let decision = resolve(temp.path(), "https://host/values.yaml", &schemes);
        assert!(matches!(decision, Err(Rejection::SchemeNotAllowed { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_inside_root_allowed() {
        let (temp, sandbox) = repo();
        std::os::unix::fs::symlink(
            temp.path().join("apps/redis/values.yaml"),
            temp.path().join("link.yaml"),
        )
        .unwrap();

        let resolved = sandbox.resolve("link.yaml").unwrap();
        assert_eq!(
            resolved,
            ResolvedRef::Local(canonical(&temp.path().join("apps/redis/values.yaml")))
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlink_outside_root_rejected() {
        let (temp, sandbox) = repo();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret.yaml"), "password: hunter2").unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("secret.yaml"),
            temp.path().join("secret-link.yaml"),
        )
        .unwrap();

        let rejection = sandbox.resolve("secret-link.yaml").unwrap_err();
        assert_eq!(rejection, Rejection::OutsideRoot);
        assert!(!rejection.to_string().contains("hunter2"));
    }

    #[cfg(unix)]
    #[test]
    fn intermediate_symlinked_directory_resolved() {
        let (temp, sandbox) = repo();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("values.yaml"), "x: 1").unwrap();
        std::os::unix::fs::symlink(outside.path(), temp.path().join("escape")).unwrap();

        assert_eq!(
            sandbox.resolve("escape/values.yaml"),
            Err(Rejection::OutsideRoot)
        );
    }

    #[cfg(unix)]
    #[test]
    fn parent_applies_to_link_target() {
        let (temp, sandbox) = repo();
        // deep -> apps/redis, so deep/../values.yaml is apps/values.yaml physically
        std::os::unix::fs::symlink(temp.path().join("apps/redis"), temp.path().join("deep"))
            .unwrap();

        let resolved = sandbox.resolve("deep/../redis/values.yaml").unwrap();
        assert_eq!(
            resolved,
            ResolvedRef::Local(canonical(&temp.path().join("apps/redis/values.yaml")))
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlink_loop_rejected() {
        let (temp, sandbox) = repo();
        std::os::unix::fs::symlink(temp.path().join("b"), temp.path().join("a")).unwrap();
        std::os::unix::fs::symlink(temp.path().join("a"), temp.path().join("b")).unwrap();

        assert_eq!(sandbox.resolve("a/values.yaml"), Err(Rejection::LinkLoop));
    }

    #[test]
    fn relative_display_uses_forward_slashes() {
        assert_eq!(relative_display(Path::new("a/b/c.yaml")), "a/b/c.yaml");
        assert_eq!(relative_display(Path::new("")), ".");
    }
}

//! Manifest file discovery under an application directory

use super::resolve::{relative_display, Sandbox};
use crate::error::{RepoServeError, RepoServeResult};
use glob::Pattern;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// File extensions considered manifest sources
const MANIFEST_EXTENSIONS: &[&str] = &["yaml", "yml", "json", "jsonnet"];

/// Directory scan options
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Descend into subdirectories
    pub recurse: bool,

    /// Glob that relative paths must match (empty = everything)
    pub include: String,

    /// Glob whose matches are dropped (empty = nothing)
    pub exclude: String,
}

/// A discovered manifest file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestFile {
    /// Canonical path inside the repository root
    pub path: PathBuf,

    /// Path relative to the application directory, `/` separated
    pub relative: String,
}

impl ManifestFile {
    /// Lower-cased file extension
    pub fn extension(&self) -> String {
        self.path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default()
    }
}

/// Find manifest files below `app_dir`, in file-name order.
///
/// Every file is checked against the sandbox before include and exclude
/// patterns are applied, so an escaping file fails the scan even if it would
/// have been filtered out. Dangling symlinks are skipped.
pub fn find_manifest_files(
    sandbox: &Sandbox,
    app_dir: &Path,
    options: &ScanOptions,
) -> RepoServeResult<Vec<ManifestFile>> {
    let include = compile_patterns(&options.include)?;
    let exclude = compile_patterns(&options.exclude)?;

    let mut walker = WalkDir::new(app_dir)
        .follow_links(true)
        .sort_by_file_name();
    if !options.recurse {
        walker = walker.max_depth(1);
    }

    let mut files = Vec::new();
    let entries = walker
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || e.file_name() != ".git");

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_default();
                let relative = relative_display(path.strip_prefix(app_dir).unwrap_or(&path));

                if err.loop_ancestor().is_some() {
                    return Err(RepoServeError::path_escape(
                        format!("illegal filepath '{}'", relative),
                        "has too many levels of symbolic links",
                    ));
                }
                if is_dangling_symlink(&path) {
                    debug!("Skipping dangling symlink {}", relative);
                    continue;
                }
                return Err(RepoServeError::io(
                    format!("scanning {}", relative),
                    err.into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
                ));
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let extension = entry
            .path()
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if !MANIFEST_EXTENSIONS.contains(&extension.as_str()) {
            continue;
        }

        let relative = relative_display(entry.path().strip_prefix(app_dir).unwrap_or(entry.path()));
        let path = sandbox.contain(entry.path()).map_err(|rejection| {
            RepoServeError::path_escape(format!("illegal filepath '{}'", relative), rejection)
        })?;

        if !include.is_empty() && !matches_any(&include, &relative) {
            continue;
        }
        if matches_any(&exclude, &relative) {
            continue;
        }

        files.push(ManifestFile { path, relative });
    }

    debug!("Found {} manifest files in {}", files.len(), app_dir.display());
    Ok(files)
}

fn is_dangling_symlink(path: &Path) -> bool {
    let is_link = std::fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false);
    is_link && std::fs::metadata(path).is_err()
}

fn matches_any(patterns: &[Pattern], relative: &str) -> bool {
    patterns.iter().any(|p| p.matches(relative))
}

fn compile_patterns(pattern: &str) -> RepoServeResult<Vec<Pattern>> {
    if pattern.trim().is_empty() {
        return Ok(Vec::new());
    }
    expand_braces(pattern.trim())
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| {
                RepoServeError::User(format!("invalid glob pattern '{}': {}", pattern, e))
            })
        })
        .collect()
}

/// Expand `{a,b}` alternatives into separate patterns
fn expand_braces(pattern: &str) -> Vec<String> {
    let Some(open) = pattern.find('{') else {
        return vec![pattern.to_string()];
    };
    let Some(close) = pattern[open..].find('}').map(|i| open + i) else {
        return vec![pattern.to_string()];
    };

    let prefix = &pattern[..open];
    let suffix = &pattern[close + 1..];
    pattern[open + 1..close]
        .split(',')
        .flat_map(|alt| expand_braces(&format!("{}{}{}", prefix, alt, suffix)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Sandbox, PathBuf) {
        let temp = TempDir::new().unwrap();
        let app = temp.path().join("app");
        fs::create_dir_all(app.join("nested")).unwrap();
        fs::create_dir_all(app.join(".git")).unwrap();
        fs::write(app.join("deployment.yaml"), "kind: Deployment").unwrap();
        fs::write(app.join("service.yml"), "kind: Service").unwrap();
        fs::write(app.join("config.json"), "{}").unwrap();
        fs::write(app.join("README.md"), "# docs").unwrap();
        fs::write(app.join("nested/pod.yaml"), "kind: Pod").unwrap();
        fs::write(app.join(".git/HEAD.yaml"), "ref: x").unwrap();
        let sandbox = Sandbox::new(temp.path(), &[]);
        let app = sandbox.root().join("app");
        (temp, sandbox, app)
    }

    fn relatives(files: &[ManifestFile]) -> Vec<&str> {
        files.iter().map(|f| f.relative.as_str()).collect()
    }

    #[test]
    fn flat_scan() {
        let (_temp, sandbox, app) = setup();
        let files = find_manifest_files(&sandbox, &app, &ScanOptions::default()).unwrap();
        assert_eq!(
            relatives(&files),
            vec!["config.json", "deployment.yaml", "service.yml"]
        );
    }

    #[test]
    fn recursive_scan_skips_git() {
        let (_temp, sandbox, app) = setup();
        let options = ScanOptions {
            recurse: true,
            ..Default::default()
        };
        let files = find_manifest_files(&sandbox, &app, &options).unwrap();
        assert!(relatives(&files).contains(&"nested/pod.yaml"));
        assert!(!files.iter().any(|f| f.relative.starts_with(".git")));
    }

    #[test]
    fn include_and_exclude() {
        let (_temp, sandbox, app) = setup();
        let options = ScanOptions {
            recurse: true,
            include: "*.{yaml,yml}".to_string(),
            exclude: "nested/*".to_string(),
        };
        let files = find_manifest_files(&sandbox, &app, &options).unwrap();
        assert_eq!(relatives(&files), vec!["deployment.yaml", "service.yml"]);
    }

    #[test]
    fn brace_expansion() {
        assert_eq!(expand_braces("*.{yaml,json}"), vec!["*.yaml", "*.json"]);
        assert_eq!(expand_braces("plain/*.yaml"), vec!["plain/*.yaml"]);
        assert_eq!(
            expand_braces("{a,b}/{c,d}"),
            vec!["a/c", "a/d", "b/c", "b/d"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn dangling_symlink_skipped() {
        let (temp, sandbox, app) = setup();
        std::os::unix::fs::symlink(temp.path().join("gone.yaml"), app.join("broken.yaml"))
            .unwrap();

        let files = find_manifest_files(&sandbox, &app, &ScanOptions::default()).unwrap();
        assert!(!relatives(&files).contains(&"broken.yaml"));
    }

    #[cfg(unix)]
    #[test]
    fn escaping_symlink_is_illegal_filepath() {
        let (_temp, sandbox, app) = setup();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret.json"), r#"{"password":"hunter2"}"#).unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret.json"), app.join("secret.json"))
            .unwrap();

        let err = find_manifest_files(&sandbox, &app, &ScanOptions::default()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("illegal filepath"));
        assert!(message.contains("secret.json"));
        assert!(!message.contains("hunter2"));
    }

    #[cfg(unix)]
    #[test]
    fn escaping_symlinked_directory_detected_when_recursing() {
        let (_temp, sandbox, app) = setup();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("leak.yaml"), "password: hunter2").unwrap();
        std::os::unix::fs::symlink(outside.path(), app.join("linked")).unwrap();

        let options = ScanOptions {
            recurse: true,
            ..Default::default()
        };
        let err = find_manifest_files(&sandbox, &app, &options).unwrap_err();
        assert!(err.to_string().contains("illegal filepath 'linked/leak.yaml'"));
        assert!(!err.to_string().contains("hunter2"));
    }

    #[cfg(unix)]
    #[test]
    fn escape_checked_before_exclude() {
        let (_temp, sandbox, app) = setup();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("x.yaml"), "a: b").unwrap();
        std::os::unix::fs::symlink(outside.path().join("x.yaml"), app.join("x.yaml")).unwrap();

        let options = ScanOptions {
            exclude: "x.yaml".to_string(),
            ..Default::default()
        };
        assert!(find_manifest_files(&sandbox, &app, &options).is_err());
    }
}

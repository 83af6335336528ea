//! Manifest text decoding and document splitting
//!
//! Error messages carry locations only. File contents never appear in them.

use super::Manifest;
use crate::error::{RepoServeError, RepoServeResult};
use serde_json::Value;

const SOURCE_COMMENT: &str = "# Source: ";

/// How non-resource documents are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Tool output: every non-empty document must be a resource
    Strict,

    /// Repository files: a file whose first document is not a resource is
    /// unrelated YAML and yields nothing
    Lenient,
}

/// A YAML document with the line it starts on
#[derive(Debug, Clone, PartialEq, Eq)]
struct Document<'a> {
    text: &'a str,
    line: usize,
}

/// Decode file bytes, honoring UTF-16 and UTF-8 byte order marks
pub fn decode_text(bytes: &[u8], source_path: &str) -> RepoServeResult<String> {
    let utf16 = |data: &[u8], little_endian: bool| {
        if data.len() % 2 != 0 {
            return Err(RepoServeError::malformed(source_path, "truncated UTF-16 text"));
        }
        let units: Vec<u16> = data
            .chunks_exact(2)
            .map(|pair| {
                if little_endian {
                    u16::from_le_bytes([pair[0], pair[1]])
                } else {
                    u16::from_be_bytes([pair[0], pair[1]])
                }
            })
            .collect();
        String::from_utf16(&units)
            .map_err(|_| RepoServeError::malformed(source_path, "invalid UTF-16 text"))
    };

    match bytes {
        [0xFF, 0xFE, rest @ ..] => utf16(rest, true),
        [0xFE, 0xFF, rest @ ..] => utf16(rest, false),
        [0xEF, 0xBB, 0xBF, rest @ ..] => String::from_utf8(rest.to_vec())
            .map_err(|_| RepoServeError::malformed(source_path, "invalid UTF-8 text")),
        _ => String::from_utf8(bytes.to_vec())
            .map_err(|_| RepoServeError::malformed(source_path, "invalid UTF-8 text")),
    }
}

/// Split a YAML stream on `---` separator lines
fn split_documents(text: &str) -> Vec<Document<'_>> {
    let mut documents = Vec::new();
    let mut start = 0;
    let mut start_line = 1;
    let mut offset = 0;

    for (index, line) in text.split_inclusive('\n').enumerate() {
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed.starts_with("--- #") {
            documents.push(Document {
                text: &text[start..offset],
                line: start_line,
            });
            start = offset + line.len();
            start_line = index + 2;
        }
        offset += line.len();
    }
    documents.push(Document {
        text: &text[start..],
        line: start_line,
    });

    documents
}

/// Template path from a `# Source:` comment, if present
fn source_comment(document: &str) -> Option<&str> {
    document
        .lines()
        .find_map(|line| line.trim_start().strip_prefix(SOURCE_COMMENT))
        .map(str::trim)
        .filter(|path| !path.is_empty())
}

/// Parse a YAML stream into manifests.
///
/// `# Source:` comments override `default_path` for the documents they
/// annotate. `List` documents expand to their items and null documents or
/// items are dropped.
pub fn parse_yaml_stream(
    text: &str,
    default_path: &str,
    mode: ParseMode,
) -> RepoServeResult<Vec<Manifest>> {
    let mut manifests = Vec::new();
    let mut seen_resource = false;

    for document in split_documents(text) {
        let source_path = source_comment(document.text).unwrap_or(default_path);

        let parsed: Result<serde_yaml::Value, String> = serde_yaml::from_str(document.text)
            .map_err(|e| describe_yaml_error(&e, document.line));
        let resources = parsed.and_then(|value| {
            let value = serde_json::to_value(value)
                .map_err(|_| format!("document at line {} has non-string keys", document.line))?;
            expand(value, document.line)
        });

        match resources {
            Ok(objects) => {
                seen_resource |= !objects.is_empty();
                for object in objects {
                    manifests.push(Manifest {
                        content: serde_json::to_string(&object)?,
                        source_path: source_path.to_string(),
                        source_line: document.line,
                    });
                }
            }
            Err(reason) => {
                if mode == ParseMode::Lenient && !seen_resource && !looks_like_resource(text) {
                    return Ok(Vec::new());
                }
                return Err(RepoServeError::malformed(source_path, reason));
            }
        }
    }

    Ok(manifests)
}

/// Parse a JSON file holding one object, a `List`, or an array of objects
pub fn parse_json(text: &str, source_path: &str) -> RepoServeResult<Vec<Manifest>> {
    let value: Value = serde_json::from_str(text).map_err(|e| {
        RepoServeError::malformed(
            source_path,
            format!("invalid JSON at line {}, column {}", e.line(), e.column()),
        )
    })?;

    let values = match value {
        Value::Array(items) => items,
        other => vec![other],
    };

    let mut manifests = Vec::new();
    for value in values {
        let objects =
            expand(value, 1).map_err(|reason| RepoServeError::malformed(source_path, reason))?;
        for object in objects {
            manifests.push(Manifest {
                content: serde_json::to_string(&object)?,
                source_path: source_path.to_string(),
                source_line: 1,
            });
        }
    }
    Ok(manifests)
}

/// Expand a parsed document into resource objects
fn expand(value: Value, line: usize) -> Result<Vec<Value>, String> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Object(mut map) => {
            let is_list = map
                .get("kind")
                .and_then(Value::as_str)
                .is_some_and(|kind| kind.ends_with("List"))
                && matches!(map.get("items"), Some(Value::Array(_)) | Some(Value::Null));
            if is_list {
                let items = match map.remove("items") {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                };
                let mut expanded = Vec::new();
                for item in items {
                    expanded.extend(expand(item, line)?);
                }
                return Ok(expanded);
            }

            let has_string = |key: &str| {
                map.get(key)
                    .and_then(Value::as_str)
                    .is_some_and(|s| !s.is_empty())
            };
            if has_string("apiVersion") && has_string("kind") {
                Ok(vec![Value::Object(map)])
            } else {
                Err(format!(
                    "document at line {} is missing apiVersion or kind",
                    line
                ))
            }
        }
        _ => Err(format!("document at line {} is not an object", line)),
    }
}

/// Heuristic for files that were meant to be resources but failed to parse
fn looks_like_resource(text: &str) -> bool {
    text.contains("apiVersion:") && text.contains("kind:") && text.contains("metadata:")
}

fn describe_yaml_error(error: &serde_yaml::Error, first_line: usize) -> String {
    match error.location() {
        Some(location) => format!(
            "invalid YAML at line {}, column {}",
            first_line + location.line().saturating_sub(1),
            location.column()
        ),
        None => format!("invalid YAML in document at line {}", first_line),
    }
}

//! Plugin process environment

use crate::source::ManifestRequest;

/// Build the environment for a plugin invocation.
///
/// The standard `APP_*` variables come first. Descriptor entries follow, with
/// `$VAR` and `${VAR}` expanded against the standard set. Unknown variables
/// expand to the empty string. Repository credentials are never included.
pub fn plugin_env(request: &ManifestRequest, revision: &str) -> Vec<(String, String)> {
    let source = &request.source;
    let mut env: Vec<(String, String)> = vec![
        ("APP_NAME".to_string(), request.app_name.clone()),
        ("APP_NAMESPACE".to_string(), request.namespace.clone()),
        ("APP_REVISION".to_string(), revision.to_string()),
        ("APP_SOURCE_REPO_URL".to_string(), request.repo_url().to_string()),
        ("APP_SOURCE_PATH".to_string(), source.path.clone()),
        (
            "APP_SOURCE_TARGET_REVISION".to_string(),
            source.target_revision.clone(),
        ),
    ];

    let standard = env.clone();
    if let Some(plugin) = &source.plugin {
        for entry in &plugin.env {
            env.push((entry.name.clone(), expand(&entry.value, &standard)));
        }
    }

    env
}

/// Expand `$VAR` and `${VAR}` references against `vars`
pub fn expand(value: &str, vars: &[(String, String)]) -> String {
    let lookup = |name: &str| {
        vars.iter()
            .find(|(key, _)| key == name)
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    };

    let mut out = String::with_capacity(value.len());
    let mut chars = value.char_indices().peekable();

    while let Some((index, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        match chars.peek().copied() {
            Some((_, '{')) => {
                let rest = &value[index + 2..];
                match rest.find('}') {
                    Some(end) => {
                        out.push_str(lookup(&rest[..end]));
                        // Skip `{`, the name and `}`
                        for _ in 0..rest[..end].chars().count() + 2 {
                            chars.next();
                        }
                    }
                    None => out.push(c),
                }
            }
            Some((start, next)) if next == '_' || next.is_ascii_alphabetic() => {
                let mut end = start;
                while let Some(&(i, ch)) = chars.peek() {
                    if ch == '_' || ch.is_ascii_alphanumeric() {
                        end = i + ch.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(lookup(&value[start..end]));
            }
            _ => out.push(c),
        }
    }

    out
}

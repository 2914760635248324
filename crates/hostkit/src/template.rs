//! Strict `{key}` template rendering.
//!
//! Templates use `{key}` placeholders and `{{` / `}}` for literal braces.
//! Rendering is a pure function: the same template and context always
//! produce the same bytes. A placeholder with no value in the context is
//! an error, never an empty string.

use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// Values available to a template, keyed by placeholder name.
pub type Context = BTreeMap<String, String>;

/// Render `template` with values from `context`.
///
/// `name` only identifies the template in error messages.
pub fn render(name: &str, template: &str, context: &Context) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    let mut literal_start = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'{' if bytes.get(i + 1) == Some(&b'{') => {
                out.push_str(&template[literal_start..i]);
                out.push('{');
                i += 2;
                literal_start = i;
            }
            b'}' if bytes.get(i + 1) == Some(&b'}') => {
                out.push_str(&template[literal_start..i]);
                out.push('}');
                i += 2;
                literal_start = i;
            }
            b'{' => {
                out.push_str(&template[literal_start..i]);
                let Some(len) = template[i + 1..].find('}') else {
                    return Err(invalid(name, i, "unterminated placeholder"));
                };
                let key = &template[i + 1..i + 1 + len];
                if !is_valid_key(key) {
                    return Err(invalid(name, i, &format!("invalid placeholder '{key}'")));
                }
                let value = context.get(key).ok_or_else(|| Error::MissingTemplateKey {
                    template: name.to_string(),
                    key: key.to_string(),
                })?;
                out.push_str(value);
                i += len + 2;
                literal_start = i;
            }
            b'}' => return Err(invalid(name, i, "unmatched '}'")),
            _ => i += 1,
        }
    }

    out.push_str(&template[literal_start..]);
    Ok(out)
}

/// Placeholder names a template references, in order of first use.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        if after.starts_with('{') {
            rest = &after[1..];
            continue;
        }
        let Some(end) = after.find('}') else { break };
        let key = &after[..end];
        if is_valid_key(key) && !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
        rest = &after[end + 1..];
    }
    keys
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn invalid(name: &str, offset: usize, message: &str) -> Error {
    Error::InvalidTemplate {
        template: name.to_string(),
        offset,
        message: message.to_string(),
    }
}

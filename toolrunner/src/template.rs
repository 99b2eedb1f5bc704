//! Component D: render a CLI argv from a template string and named values.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::RuntimeError;

struct Group {
    literal: Option<String>,
    placeholder: Option<(String, bool)>, // (name, required)
}

fn parse_placeholder(token: &str) -> Option<(String, bool)> {
    let inner = token.strip_prefix('{')?.strip_suffix('}')?;
    if let Some(name) = inner.strip_suffix('!') {
        (!name.is_empty()).then(|| (name.to_string(), true))
    } else {
        (!inner.is_empty()).then(|| (inner.to_string(), false))
    }
}

fn parse_groups(template: &str) -> Vec<Group> {
    let tokens: Vec<&str> = template.split_whitespace().collect();
    let mut groups = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let tok = tokens[i];
        if let Some(placeholder) = parse_placeholder(tok) {
            groups.push(Group {
                literal: None,
                placeholder: Some(placeholder),
            });
            i += 1;
            continue;
        }

        if let Some(placeholder) = tokens.get(i + 1).and_then(|next| parse_placeholder(next)) {
            groups.push(Group {
                literal: Some(tok.to_string()),
                placeholder: Some(placeholder),
            });
            i += 2;
            continue;
        }

        groups.push(Group {
            literal: Some(tok.to_string()),
            placeholder: None,
        });
        i += 1;
    }
    groups
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn coerce_value(value: &Value) -> Vec<String> {
    match value {
        Value::Null => vec![],
        Value::String(s) => s.split_whitespace().map(|s| s.to_string()).collect(),
        Value::Array(items) => items.iter().map(scalar_to_string).collect(),
        other => vec![scalar_to_string(other)],
    }
}

/// Render `template` against `values`, producing an argv vector.
///
/// An empty template passes through `values["_args"]` (expected to be a
/// sequence) verbatim, or an empty argv when absent.
pub fn render(template: &str, values: &HashMap<String, Value>) -> Result<Vec<String>, RuntimeError> {
    if template.trim().is_empty() {
        return Ok(values.get("_args").map(coerce_value).unwrap_or_default());
    }

    let mut argv = Vec::new();
    for group in parse_groups(template) {
        match group.placeholder {
            None => {
                if let Some(lit) = group.literal {
                    argv.push(lit);
                }
            }
            Some((name, required)) => match values.get(&name) {
                None => {
                    if required {
                        return Err(RuntimeError::RequiredKeyMissing(name));
                    }
                    // Optional and missing: drop the entire group, literal included.
                }
                Some(value) => {
                    if let Some(lit) = group.literal {
                        argv.push(lit);
                    }
                    argv.extend(coerce_value(value));
                }
            },
        }
    }
    Ok(argv)
}

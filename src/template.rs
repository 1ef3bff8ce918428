//! Template substitution over a JSON variable context.
//!
//! Templates contain `{{path}}` tokens where the path walks the context with
//! dotted fields and `[n]` indexing, e.g. `{{topic}}`, `{{queries.primary}}`,
//! `{{tasks[0]}}`. A filter can follow the path: `{{angles | shortlist:3}}`
//! slices a sequence to its first 3 elements, comma-joined.
//!
//! Rendering is a pure function of (template, context). A token that fails to
//! resolve is left in the output verbatim and a warning is pushed to the
//! caller's sink; rendering never fails.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

// Pattern: {{ path }} or {{ path | filter:arg }}
// ([^}|]+)  - the variable path, up to a pipe or closing brace
// ([a-z_]+) - filter name
// (\d+)     - optional integer filter argument
static TEMPLATE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([^}|\s][^}|]*?)\s*(?:\|\s*([a-z_]+)\s*(?::\s*(\d+))?\s*)?\}\}")
        .expect("invalid template regex")
});

/// Render `template` against `context`, pushing a warning per unresolved
/// token into `warnings`.
pub fn render(template: &str, context: &Value, warnings: &mut Vec<String>) -> String {
    let mut result = template.to_string();

    for cap in TEMPLATE_REGEX.captures_iter(template) {
        let token = &cap[0];
        let path = cap[1].trim();

        let Some(value) = resolve_path(context, path) else {
            warnings.push(format!("template: unresolved path '{path}'"));
            continue;
        };

        let rendered = match cap.get(2) {
            Some(filter) => match apply_filter(&value, filter.as_str(), cap.get(3)) {
                Some(filtered) => filtered,
                None => {
                    warnings.push(format!(
                        "template: filter '{}' does not apply to '{path}'",
                        filter.as_str()
                    ));
                    coerce(&value)
                }
            },
            None => coerce(&value),
        };

        result = result.replace(token, &rendered);
    }

    result
}

/// Resolve a dotted/indexed path against a JSON value.
///
/// Grammar: `identifier(.identifier|[integer])*`.
pub fn resolve_path(context: &Value, path: &str) -> Option<Value> {
    let mut current = context;
    for segment in parse_segments(path)? {
        current = match segment {
            Segment::Field(name) => current.as_object()?.get(name)?,
            Segment::Index(idx) => current.as_array()?.get(idx)?,
        };
    }
    Some(current.clone())
}

enum Segment<'a> {
    Field(&'a str),
    Index(usize),
}

fn parse_segments(path: &str) -> Option<Vec<Segment<'_>>> {
    let mut segments = Vec::new();
    for part in path.split('.') {
        if part.is_empty() {
            return None;
        }
        // Split "name[0][1]" into a field plus indices.
        let field_end = part.find('[').unwrap_or(part.len());
        let field = &part[..field_end];
        if !field.is_empty() {
            segments.push(Segment::Field(field));
        }
        let mut rest = &part[field_end..];
        while let Some(close) = rest.find(']') {
            if !rest.starts_with('[') {
                return None;
            }
            let idx: usize = rest[1..close].parse().ok()?;
            segments.push(Segment::Index(idx));
            rest = &rest[close + 1..];
        }
        if !rest.is_empty() {
            return None;
        }
    }
    if segments.is_empty() { None } else { Some(segments) }
}

/// String coercion for substitution: strings drop their quotes, scalars use
/// their display form, composites fall back to compact JSON.
fn coerce(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn apply_filter(value: &Value, name: &str, arg: Option<regex::Match<'_>>) -> Option<String> {
    match name {
        "shortlist" => {
            let items = value.as_array()?;
            let n: usize = arg?.as_str().parse().ok()?;
            Some(
                items
                    .iter()
                    .take(n)
                    .map(coerce)
                    .collect::<Vec<_>>()
                    .join(", "),
            )
        }
        _ => None,
    }
}

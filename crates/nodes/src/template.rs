//! Minimal `{{path}}` template substitution.
//!
//! Deliberately hand-rolled and tiny: it must never evaluate code, only
//! interpolate values already present in one of the three rooted
//! namespaces (`data`, `input`, `context`). Shared between the `llm` /
//! `output` / `http_request` node kinds here and `engine::resolver`'s
//! config-override rendering, so the substitution rules can never drift
//! between the two call sites.

use serde_json::Value;

/// The three namespaces a `{{path}}` expression can resolve against.
#[derive(Clone, Copy)]
pub struct Namespaces<'a> {
    pub data: &'a Value,
    pub input: &'a Value,
    pub context: &'a Value,
}

/// Render every `{{path}}` occurrence in `template` against `ns`.
///
/// Resolution order for an unprefixed path (`foo.bar`) is `data`, then
/// `input`, then `context`. A path explicitly prefixed with `data.`,
/// `input.`, or `context.` is resolved only in that namespace. Missing
/// paths render as the empty string. Non-string resolved values are
/// JSON-serialized. Idempotent on strings containing no `{{`.
pub fn render(template: &str, ns: Namespaces<'_>) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        match after_open.find("}}") {
            Some(end) => {
                let path = after_open[..end].trim();
                out.push_str(&resolve_and_stringify(path, ns));
                rest = &after_open[end + 2..];
            }
            None => {
                // Unterminated `{{` — emit the rest verbatim, matching the
                // "no silent corruption" rule for malformed templates.
                out.push_str(&rest[start..]);
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

fn resolve_and_stringify(path: &str, ns: Namespaces<'_>) -> String {
    match resolve(path, ns) {
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Resolve a dotted, `[i]`-indexable path against the three namespaces.
///
/// A path prefixed with `data.`, `input.`, or `context.` is rooted in just
/// that namespace. Otherwise `data`, `input`, then `context` are searched
/// in order and the first hit wins.
pub fn resolve<'a>(path: &str, ns: Namespaces<'a>) -> Option<&'a Value> {
    if let Some(rest) = path.strip_prefix("data.") {
        return walk(ns.data, rest);
    }
    if let Some(rest) = path.strip_prefix("input.") {
        return walk(ns.input, rest);
    }
    if let Some(rest) = path.strip_prefix("context.") {
        return walk(ns.context, rest);
    }
    if path == "data" {
        return Some(ns.data);
    }
    if path == "input" {
        return Some(ns.input);
    }
    if path == "context" {
        return Some(ns.context);
    }

    walk(ns.data, path)
        .or_else(|| walk(ns.input, path))
        .or_else(|| walk(ns.context, path))
}

/// Walk a dotted/indexed path (`foo.bar[0].baz`, normalized so `[i]`
/// becomes a plain `.i` segment) against a single JSON value.
fn walk<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }

    let normalized = normalize_indices(path);
    let mut current = root;
    for segment in normalized.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(arr) => {
                let idx: usize = segment.parse().ok()?;
                arr.get(idx)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Rewrite `foo[0].bar[1]` into `foo.0.bar.1` so the walker only ever has
/// to split on `.`.
fn normalize_indices(path: &str) -> String {
    path.replace('[', ".").replace(']', "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ns<'a>(data: &'a Value, input: &'a Value, context: &'a Value) -> Namespaces<'a> {
        Namespaces { data, input, context }
    }

    #[test]
    fn renders_simple_dotted_path() {
        let data = json!({"content": "pong"});
        let (input, context) = (Value::Null, Value::Null);
        assert_eq!(render("{{content}}", ns(&data, &input, &context)), "pong");
    }

    #[test]
    fn renders_explicit_namespace_prefix() {
        let data = json!({"a": 1});
        let input = json!({"a": "from-input"});
        let context = Value::Null;
        assert_eq!(
            render("{{input.a}}", ns(&data, &input, &context)),
            "from-input"
        );
    }

    #[test]
    fn indexes_arrays_with_bracket_syntax() {
        let data = json!({"documents": ["first", "second"]});
        let (input, context) = (Value::Null, Value::Null);
        assert_eq!(
            render("{{documents[1]}}", ns(&data, &input, &context)),
            "second"
        );
    }

    #[test]
    fn missing_path_renders_empty_string() {
        let data = json!({});
        let (input, context) = (Value::Null, Value::Null);
        assert_eq!(render("{{nope.nested}}", ns(&data, &input, &context)), "");
    }

    #[test]
    fn idempotent_on_plain_strings() {
        let data = Value::Null;
        let (input, context) = (Value::Null, Value::Null);
        let plain = "just a regular sentence.";
        assert_eq!(render(plain, ns(&data, &input, &context)), plain);
    }

    #[test]
    fn non_string_values_are_json_serialized() {
        let data = json!({"count": 3, "nested": {"x": true}});
        let (input, context) = (Value::Null, Value::Null);
        assert_eq!(render("{{count}}", ns(&data, &input, &context)), "3");
        assert_eq!(
            render("{{nested}}", ns(&data, &input, &context)),
            r#"{"x":true}"#
        );
    }
}

//! Deterministic frontmatter codec.
//!
//! Emission is stable: keys appear in insertion order, arrays render as
//! block lists, nested maps indent one level. The parser is the exact
//! inverse for maps of strings, numbers, bools, and lists of strings, so
//! `parse(format(f)) == f` holds for everything the hub writes.

use serde_json::{Map, Number, Value};

/// Insertion-ordered frontmatter map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frontmatter {
    entries: Vec<(String, Value)>,
}

impl Frontmatter {
    /// Create an empty frontmatter map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a key, preserving first-insertion order.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.set(key, value);
        self
    }

    /// Look up a key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Whether no keys are present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Convert to a JSON object (insertion order is lost).
    pub fn to_json(&self) -> Map<String, Value> {
        self.entries.iter().cloned().collect()
    }
}

impl FromIterator<(String, Value)> for Frontmatter {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut fm = Frontmatter::new();
        for (k, v) in iter {
            fm.set(k, v);
        }
        fm
    }
}

/// Render a frontmatter block including the `---` fences and trailing newline.
pub fn format(fm: &Frontmatter) -> String {
    let mut out = String::from("---\n");
    for (key, value) in fm.iter() {
        emit_entry(&mut out, key, value, 0);
    }
    out.push_str("---\n");
    out
}

fn emit_entry(out: &mut String, key: &str, value: &Value, indent: usize) {
    let pad = "  ".repeat(indent);
    match value {
        Value::Array(items) => {
            out.push_str(&format_args_line(&pad, key, ""));
            for item in items {
                out.push_str(&pad);
                out.push_str("  - ");
                out.push_str(&scalar_text(item));
                out.push('\n');
            }
        }
        Value::Object(map) => {
            out.push_str(&format_args_line(&pad, key, ""));
            for (k, v) in map {
                emit_entry(out, k, v, indent + 1);
            }
        }
        scalar => {
            out.push_str(&format_args_line(&pad, key, &scalar_text(scalar)));
        }
    }
}

fn format_args_line(pad: &str, key: &str, value: &str) -> String {
    if value.is_empty() {
        format!("{}{}:\n", pad, key)
    } else {
        format!("{}{}: {}\n", pad, key, value)
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => {
            if needs_quoting(s) {
                format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
            } else {
                s.clone()
            }
        }
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Strings that would parse back as a different type must be quoted.
fn needs_quoting(s: &str) -> bool {
    s.is_empty()
        || s != s.trim()
        || s.parse::<i64>().is_ok()
        || s.parse::<f64>().is_ok()
        || matches!(s, "true" | "false" | "null")
        || s.starts_with('"')
        || s.contains('\n')
        || s.starts_with('-')
        || s.contains(": ")
        || s.ends_with(':')
}

/// Split a document into its frontmatter and body.
///
/// A document without a leading `---` fence yields an empty frontmatter and
/// the whole text as body.
pub fn split_document(text: &str) -> (Frontmatter, String) {
    let Some(rest) = text.strip_prefix("---\n") else {
        return (Frontmatter::new(), text.to_string());
    };
    let Some(end) = rest.find("\n---\n").map(|i| i + 1).or_else(|| {
        // frontmatter closed at EOF without trailing newline
        rest.strip_suffix("\n---")
            .map(|head| head.len() + 1)
            .filter(|_| !rest.contains("\n---\n"))
    }) else {
        return (Frontmatter::new(), text.to_string());
    };

    let block = &rest[..end - 1];
    let body_start = (end + 4).min(rest.len());
    let body = rest[body_start..].trim_start_matches('\n').to_string();
    (parse_block(block), body)
}

/// Parse the inside of a frontmatter block (no fences).
pub fn parse_block(block: &str) -> Frontmatter {
    let mut fm = Frontmatter::new();
    let lines: Vec<&str> = block.lines().collect();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if line.trim().is_empty() || leading_spaces(line) > 0 {
            i += 1;
            continue;
        }
        let Some((key, rest)) = split_key(line) else {
            i += 1;
            continue;
        };

        if rest.is_empty() {
            // block list or nested map follows
            let (value, consumed) = parse_nested(&lines[i + 1..], 1);
            fm.set(key, value);
            i += 1 + consumed;
        } else {
            fm.set(key, parse_scalar(rest));
            i += 1;
        }
    }
    fm
}

fn parse_nested(lines: &[&str], depth: usize) -> (Value, usize) {
    let pad = depth * 2;
    let mut consumed = 0;

    // list?
    if lines
        .first()
        .map(|l| l.trim_start().starts_with("- ") && leading_spaces(l) >= pad)
        .unwrap_or(false)
    {
        let mut items = Vec::new();
        while consumed < lines.len() {
            let line = lines[consumed];
            let trimmed = line.trim_start();
            if trimmed.starts_with("- ") && leading_spaces(line) >= pad {
                items.push(parse_scalar(&trimmed[2..]));
                consumed += 1;
            } else {
                break;
            }
        }
        return (Value::Array(items), consumed);
    }

    // nested map
    let mut map = Map::new();
    while consumed < lines.len() {
        let line = lines[consumed];
        if line.trim().is_empty() || leading_spaces(line) < pad {
            break;
        }
        if let Some((key, rest)) = split_key(line.trim_start()) {
            if rest.is_empty() {
                let (value, inner) = parse_nested(&lines[consumed + 1..], depth + 1);
                map.insert(key, value);
                consumed += 1 + inner;
            } else {
                map.insert(key, parse_scalar(rest));
                consumed += 1;
            }
        } else {
            consumed += 1;
        }
    }
    (Value::Object(map), consumed)
}

fn split_key(line: &str) -> Option<(String, &str)> {
    let idx = line.find(':')?;
    let key = line[..idx].trim().to_string();
    if key.is_empty() {
        return None;
    }
    Some((key, line[idx + 1..].trim()))
}

fn leading_spaces(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

fn parse_scalar(text: &str) -> Value {
    let text = text.trim();
    if let Some(inner) = text.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
        return Value::String(inner.replace("\\\"", "\"").replace("\\\\", "\\"));
    }
    match text {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }
    if let Ok(i) = text.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Ok(f) = text.parse::<f64>() {
        if let Some(n) = Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_preserves_insertion_order() {
        let fm = Frontmatter::new()
            .with("title", json!("Chain export"))
            .with("chain_id", json!("abc-123"))
            .with("status", json!("completed"));

        let text = format(&fm);
        let title_pos = text.find("title:").unwrap();
        let chain_pos = text.find("chain_id:").unwrap();
        let status_pos = text.find("status:").unwrap();
        assert!(title_pos < chain_pos && chain_pos < status_pos);
    }

    #[test]
    fn test_format_block_list() {
        let fm = Frontmatter::new().with("tags", json!(["alpha", "beta"]));
        let text = format(&fm);
        assert!(text.contains("tags:\n  - alpha\n  - beta\n"));
    }

    #[test]
    fn test_format_nested_map() {
        let fm = Frontmatter::new().with("meta", json!({"cli": "all-clients"}));
        let text = format(&fm);
        assert!(text.contains("meta:\n  cli: all-clients\n"));
    }

    #[test]
    fn test_round_trip_strings_numbers_lists() {
        let fm = Frontmatter::new()
            .with("title", json!("Reasoning export"))
            .with("confidence", json!(0.85))
            .with("steps", json!(4))
            .with("done", json!(true))
            .with("tags", json!(["branch", "analysis"]));

        let (parsed, body) = split_document(&(format(&fm) + "body text\n"));
        assert_eq!(parsed, fm);
        assert_eq!(body, "body text\n");
    }

    #[test]
    fn test_round_trip_numeric_looking_string() {
        let fm = Frontmatter::new().with("version", json!("2.0"));
        let (parsed, _) = split_document(&format(&fm));
        assert_eq!(parsed.get("version"), Some(&json!("2.0")));
    }

    #[test]
    fn test_round_trip_empty_and_padded_strings() {
        let fm = Frontmatter::new()
            .with("empty", json!(""))
            .with("padded", json!(" spaced "));
        let (parsed, _) = split_document(&format(&fm));
        assert_eq!(parsed, fm);
    }

    #[test]
    fn test_split_document_without_frontmatter() {
        let (fm, body) = split_document("just a note\n");
        assert!(fm.is_empty());
        assert_eq!(body, "just a note\n");
    }

    #[test]
    fn test_split_document_unterminated_fence() {
        let text = "---\ntitle: broken\nno closing fence\n";
        let (fm, body) = split_document(text);
        assert!(fm.is_empty());
        assert_eq!(body, text);
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut fm = Frontmatter::new();
        fm.set("status", json!("in_progress"));
        fm.set("created", json!("2026-08-02"));
        fm.set("status", json!("completed"));

        let order: Vec<&str> = fm.iter().map(|(k, _)| k).collect();
        assert_eq!(order, vec!["status", "created"]);
        assert_eq!(fm.get("status"), Some(&json!("completed")));
    }

    #[test]
    fn test_parse_nested_map_round_trip() {
        let fm = Frontmatter::new().with(
            "dependencies",
            json!({"graph": "healthy", "model": "unhealthy"}),
        );
        let (parsed, _) = split_document(&format(&fm));
        assert_eq!(
            parsed.get("dependencies").unwrap()["graph"],
            json!("healthy")
        );
    }
}

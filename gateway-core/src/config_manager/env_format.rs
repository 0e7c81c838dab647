//! Line-oriented `KEY=VALUE` env file serialization (§4.10).
//!
//! Keys are written in a fixed order — [`super::REQUIRED_KEYS`], then
//! [`super::FLAG_KEYS`], then anything else sorted alphabetically — so two
//! writes of the same logical mapping produce byte-identical files and a
//! diff between backups is meaningful.

use std::collections::BTreeSet;

use crate::registry::ConfigMap;

use super::{FLAG_KEYS, REQUIRED_KEYS};

/// Serialize `map` into a deterministic `KEY=VALUE` file.
pub fn format_env_file(map: &ConfigMap) -> String {
    let mut written: BTreeSet<&str> = BTreeSet::new();
    let mut out = String::new();

    for key in REQUIRED_KEYS.iter().chain(FLAG_KEYS.iter()) {
        if let Some(value) = map.get(*key) {
            push_line(&mut out, key, value);
            written.insert(key);
        }
    }

    let mut extras: Vec<&String> = map.keys().filter(|k| !written.contains(k.as_str())).collect();
    extras.sort();
    for key in extras {
        push_line(&mut out, key, &map[key]);
    }

    out
}

fn push_line(out: &mut String, key: &str, value: &str) {
    out.push_str(key);
    out.push('=');
    out.push_str(&quote_if_needed(value));
    out.push('\n');
}

fn quote_if_needed(value: &str) -> String {
    let needs_quoting = value.is_empty()
        || value.chars().any(|c| c.is_whitespace() || c == '#' || c == '"');
    if !needs_quoting {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Parse a `KEY=VALUE` file, skipping blank lines and `#`-prefixed comments.
///
/// Returns `Err` with a human-readable line description on malformed input
/// (a non-comment line without an `=`).
pub fn parse_env_file(contents: &str) -> Result<ConfigMap, String> {
    let mut map = ConfigMap::new();
    for (lineno, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| format!("line {}: missing '=' in '{}'", lineno + 1, raw))?;
        map.insert(key.trim().to_string(), unquote(value.trim()));
    }
    Ok(map)
}

fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value[1..value.len() - 1].replace("\\\"", "\"").replace("\\\\", "\\")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_keys_come_first_in_order() {
        let mut map = ConfigMap::new();
        map.insert("ZZZ_EXTRA".to_string(), "1".to_string());
        map.insert("KEK_BASE64".to_string(), "abc".to_string());
        map.insert("PORT".to_string(), "8080".to_string());
        map.insert("UPSTREAM_MODE".to_string(), "mock".to_string());

        let rendered = format_env_file(&map);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "PORT=8080");
        assert!(lines.iter().position(|l| l.starts_with("KEK_BASE64")).unwrap()
            < lines.iter().position(|l| l.starts_with("UPSTREAM_MODE")).unwrap());
        assert_eq!(lines.last().unwrap(), &"ZZZ_EXTRA=1");
    }

    #[test]
    fn roundtrip_preserves_values_with_whitespace() {
        let mut map = ConfigMap::new();
        map.insert("GREETING".to_string(), "hello world".to_string());
        let rendered = format_env_file(&map);
        let parsed = parse_env_file(&rendered).unwrap();
        assert_eq!(parsed.get("GREETING"), Some(&"hello world".to_string()));
    }

    #[test]
    fn parse_skips_comments_and_blank_lines() {
        let contents = "# a comment\n\nPORT=8080\n";
        let parsed = parse_env_file(contents).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed.get("PORT"), Some(&"8080".to_string()));
    }

    #[test]
    fn parse_rejects_line_without_equals() {
        let err = parse_env_file("not_valid_at_all").unwrap_err();
        assert!(err.contains("line 1"));
    }

    #[test]
    fn empty_value_round_trips_as_empty_string() {
        let mut map = ConfigMap::new();
        map.insert("EMPTY".to_string(), String::new());
        let rendered = format_env_file(&map);
        let parsed = parse_env_file(&rendered).unwrap();
        assert_eq!(parsed.get("EMPTY"), Some(&String::new()));
    }
}

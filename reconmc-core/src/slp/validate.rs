//! Post-decode validation, coercion, and sanitization of untrusted SLP
//! status JSON.
//!
//! Two passes: a cheap pre-parse byte scan that rejects oversize/deep
//! bodies before `serde_json` ever touches them, then a post-parse pass
//! that coerces fields into bounded ranges and HTML-escapes/NUL-strips
//! every string leaf so the result is safe for a PostgreSQL `jsonb` column
//! (which rejects ` ` outright).

use once_regex::STANDARD_UUID_RE;
use serde_json::Value;

use crate::error::ScanError;

pub const MAX_JSON_DEPTH: usize = 32;
pub const MAX_SAMPLE_LEN: usize = 1000;
pub const MAX_SAMPLE_NAME_LEN: usize = 100;
pub const MAX_FAVICON_BYTES: usize = 1024 * 1024;

/// Walk raw JSON bytes counting brace/bracket nesting, ignoring characters
/// inside string literals. Returns `None` if depth ever exceeds
/// [`MAX_JSON_DEPTH`] — callers must reject before attempting to parse.
pub fn check_depth(bytes: &[u8]) -> Option<usize> {
    let mut depth: usize = 0;
    let mut max_depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;

    for &b in bytes {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => {
                depth += 1;
                max_depth = max_depth.max(depth);
                if max_depth > MAX_JSON_DEPTH {
                    return None;
                }
            }
            b'}' | b']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    Some(max_depth)
}

#[derive(Debug, Clone)]
pub struct PlayerSample {
    pub name: String,
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct ValidatedStatus {
    pub protocol: i64,
    pub players_online: i64,
    pub players_max: i64,
    pub sample: Vec<PlayerSample>,
    pub favicon: Option<String>,
    /// Opaque Minecraft text-component tree, sanitized but otherwise passed
    /// through verbatim.
    pub description: Value,
    /// Full sanitized body, stored as `latestResult`/history payload.
    pub raw: Value,
}

pub fn validate_status_json(bytes: &[u8]) -> Result<ValidatedStatus, ScanError> {
    if bytes.len() > super::decode::MAX_STATUS_JSON_BYTES {
        return Err(ScanError::Protocol("status JSON exceeds size cap".into()));
    }
    if check_depth(bytes).is_none() {
        return Err(ScanError::Protocol("status JSON exceeds depth cap".into()));
    }

    let mut value: Value = serde_json::from_slice(bytes)
        .map_err(|e| ScanError::Protocol(format!("invalid status JSON: {e}")))?;

    let Value::Object(_) = &value else {
        return Err(ScanError::Protocol("status JSON is not an object".into()));
    };

    sanitize_strings(&mut value);

    let protocol = value
        .pointer("/version/protocol")
        .and_then(Value::as_i64)
        .unwrap_or(0)
        .clamp(0, 9999);

    let players_online = value
        .pointer("/players/online")
        .and_then(Value::as_i64)
        .unwrap_or(0)
        .clamp(0, 1_000_000);
    let players_max = value
        .pointer("/players/max")
        .and_then(Value::as_i64)
        .unwrap_or(0)
        .clamp(0, 1_000_000);

    let mut sample = Vec::new();
    if let Some(Value::Array(entries)) = value.pointer("/players/sample") {
        for entry in entries.iter().take(MAX_SAMPLE_LEN) {
            let Some(name) = entry.get("name").and_then(Value::as_str) else {
                continue;
            };
            let Some(id) = entry.get("id").and_then(Value::as_str) else {
                continue;
            };
            if name.chars().count() > MAX_SAMPLE_NAME_LEN {
                continue;
            }
            if !STANDARD_UUID_RE.is_match(id) {
                // Malformed-but-present ids (e.g. `00000000-...`) are kept —
                // server-mode classification needs to see them.
                if !is_uuid_shaped(id) {
                    continue;
                }
            }
            sample.push(PlayerSample {
                name: name.to_string(),
                id: id.to_string(),
            });
        }
    }

    let favicon = value
        .pointer("/favicon")
        .and_then(Value::as_str)
        .filter(|f| f.len() <= MAX_FAVICON_BYTES)
        .map(|f| f.to_string());

    let description = value.get("description").cloned().unwrap_or(Value::Null);

    Ok(ValidatedStatus {
        protocol,
        players_online,
        players_max,
        sample,
        favicon,
        description,
        raw: value,
    })
}

/// Looser shape check used to keep malformed-but-UUID-length ids (the
/// cracked-mode synthetic ids are preserved as-is) instead of dropping
/// them outright. Matches 32 hex digits with optional dashes in the
/// standard 8-4-4-4-12 grouping.
fn is_uuid_shaped(s: &str) -> bool {
    let stripped: String = s.chars().filter(|c| *c != '-').collect();
    stripped.len() == 32 && stripped.chars().all(|c| c.is_ascii_hexdigit())
}

/// HTML-escape and NUL-strip every string leaf in place.
fn sanitize_strings(value: &mut Value) {
    match value {
        Value::String(s) => {
            *s = html_escape_and_strip_nul(s);
        }
        Value::Array(items) => items.iter_mut().for_each(sanitize_strings),
        Value::Object(map) => map.values_mut().for_each(sanitize_strings),
        _ => {}
    }
}

/// Small hand-rolled escaper: five characters is not worth a dedicated
/// HTML-escaping dependency.
pub fn html_escape_and_strip_nul(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if c == '\0' {
            continue;
        }
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

mod once_regex {
    use regex::Regex;
    use std::sync::OnceLock;

    pub struct LazyRegex(OnceLock<Regex>, &'static str);

    impl LazyRegex {
        pub const fn new(pattern: &'static str) -> Self {
            Self(OnceLock::new(), pattern)
        }
        pub fn is_match(&self, s: &str) -> bool {
            self.0.get_or_init(|| Regex::new(self.1).unwrap()).is_match(s)
        }
    }

    pub static STANDARD_UUID_RE: LazyRegex = LazyRegex::new(
        r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_within_cap_is_accepted() {
        let mut s = String::new();
        for _ in 0..MAX_JSON_DEPTH {
            s.push('[');
        }
        s.push('1');
        for _ in 0..MAX_JSON_DEPTH {
            s.push(']');
        }
        assert_eq!(check_depth(s.as_bytes()), Some(MAX_JSON_DEPTH));
    }

    #[test]
    fn depth_over_cap_is_rejected() {
        let mut s = String::new();
        for _ in 0..MAX_JSON_DEPTH + 1 {
            s.push('[');
        }
        s.push('1');
        for _ in 0..MAX_JSON_DEPTH + 1 {
            s.push(']');
        }
        assert_eq!(check_depth(s.as_bytes()), None);
    }

    #[test]
    fn braces_inside_strings_do_not_count_toward_depth() {
        let s = r#"{"description":"{{{{{{{{{{{{{{{{{{{{{{{{{{{{{{{{{{{{"}"#;
        assert_eq!(check_depth(s.as_bytes()), Some(1));
    }

    #[test]
    fn rejects_non_object_top_level() {
        assert!(validate_status_json(b"[1,2,3]").is_err());
    }

    #[test]
    fn coerces_out_of_range_players() {
        let body = br#"{"version":{"protocol":999999},"players":{"online":-5,"max":50000000}}"#;
        let v = validate_status_json(body).unwrap();
        assert_eq!(v.protocol, 9999);
        assert_eq!(v.players_online, 0);
        assert_eq!(v.players_max, 1_000_000);
    }

    #[test]
    fn strips_nul_and_escapes_html_in_description() {
        let body = "{\"description\":{\"text\":\"<b>hi\\u0000</b>\"}}";
        let v = validate_status_json(body.as_bytes()).unwrap();
        let text = v.description.get("text").unwrap().as_str().unwrap();
        assert_eq!(text, "&lt;b&gt;hi&lt;/b&gt;");
    }

    #[test]
    fn keeps_malformed_cracked_style_ids() {
        let body = br#"{"players":{"sample":[{"name":"Steve","id":"00000000-0000-0000-0000-000000000001"}]}}"#;
        let v = validate_status_json(body).unwrap();
        assert_eq!(v.sample.len(), 1);
        assert_eq!(v.sample[0].id, "00000000-0000-0000-0000-000000000001");
    }

    #[test]
    fn rejects_oversize_favicon() {
        let huge = "A".repeat(MAX_FAVICON_BYTES + 10);
        let body = format!(r#"{{"favicon":"{huge}"}}"#);
        let v = validate_status_json(body.as_bytes()).unwrap();
        assert!(v.favicon.is_none());
    }
}

//! YAML front-matter parsing and formatting for block files.
//!
//! On-disk shape: `---\n<yaml>\n---\n\n<body>`. The reader is permissive:
//! missing or invalid front-matter yields an empty mapping and the entire
//! content as body.

use serde_yaml::{Mapping, Value};

/// Split markdown content into (front-matter mapping, body).
pub fn parse_front_matter(content: &str) -> (Mapping, String) {
    let Some(rest) = content.strip_prefix("---\n") else {
        return (Mapping::new(), content.to_string());
    };

    let Some(end) = rest.find("\n---\n") else {
        return (Mapping::new(), content.to_string());
    };

    let yaml_str = &rest[..end];
    let body = rest[end + "\n---\n".len()..].trim_start_matches('\n');

    match serde_yaml::from_str::<Mapping>(yaml_str) {
        Ok(map) => (map, body.to_string()),
        Err(_) => (Mapping::new(), content.to_string()),
    }
}

/// Render a front-matter mapping and body back into file content.
pub fn format_front_matter(metadata: &Mapping, body: &str) -> String {
    let yaml = serde_yaml::to_string(metadata).unwrap_or_default();
    format!("---\n{yaml}---\n\n{body}")
}

/// Fetch a string-valued key from a front-matter mapping.
pub fn get_str(metadata: &Mapping, key: &str) -> Option<String> {
    metadata
        .get(Value::String(key.to_string()))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Default display title for a label: underscores to spaces, title-cased.
pub fn default_title(label: &str) -> String {
    label
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

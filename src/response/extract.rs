//! Ordered search for the image field in JSON responses of unknown shape

use serde_json::Value;

/// Extractor returning the image payload string if its path matches
pub type Extractor = fn(&Value) -> Option<String>;

/// Follow `path`, entering arrays at their first element
fn string_at(value: &Value, path: &[&str]) -> Option<String> {
    let mut current = value;
    for key in path {
        current = first_if_array(current).get(*key)?;
    }
    match first_if_array(current) {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn first_if_array(value: &Value) -> &Value {
    match value {
        Value::Array(items) => items.first().unwrap_or(value),
        other => other,
    }
}

fn data_image_data(v: &Value) -> Option<String> {
    string_at(v, &["data", "imageData"])
}

fn data_image(v: &Value) -> Option<String> {
    string_at(v, &["data", "image"])
}

fn data_url(v: &Value) -> Option<String> {
    string_at(v, &["data", "url"])
}

fn data_generated_image(v: &Value) -> Option<String> {
    string_at(v, &["data", "generatedImage"])
}

fn generated_image(v: &Value) -> Option<String> {
    string_at(v, &["generatedImage"])
}

fn image(v: &Value) -> Option<String> {
    string_at(v, &["image"])
}

fn url(v: &Value) -> Option<String> {
    string_at(v, &["url"])
}

fn bare_data(v: &Value) -> Option<String> {
    string_at(v, &["data"])
}

fn data_b64_json(v: &Value) -> Option<String> {
    string_at(v, &["data", "b64_json"])
}

fn b64_json(v: &Value) -> Option<String> {
    string_at(v, &["b64_json"])
}

/// Extractors in priority order
pub const EXTRACTORS: &[Extractor] = &[
    data_image_data,
    data_image,
    data_url,
    data_generated_image,
    generated_image,
    image,
    url,
    bare_data,
    data_b64_json,
    b64_json,
];

/// First non-empty image payload found by the ordered extractors
pub fn find_image_payload(value: &Value) -> Option<String> {
    EXTRACTORS.iter().find_map(|extract| extract(value))
}

//! Style segment construction

use crate::models::StyleSelection;

/// Collapse runs of whitespace and cap the field at `max_chars` characters
pub fn normalize_field(value: &str, max_chars: usize) -> String {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => collapsed[..byte_idx].trim_end().to_string(),
        None => collapsed,
    }
}

/// Bare `", {name} style"` segment, empty when no style was chosen
pub fn name_segment(style: &StyleSelection, max_chars: usize) -> String {
    let name = normalize_field(&style.name, max_chars);
    if name.is_empty() {
        String::new()
    } else {
        format!(", {} style", name)
    }
}

/// Name segment followed by the style's metadata fields
pub fn full_segment(style: &StyleSelection, max_chars: usize) -> String {
    let mut segment = name_segment(style, max_chars);
    let Some(metadata) = &style.metadata else {
        return segment;
    };

    let fields = [
        &metadata.description,
        &metadata.keywords,
        &metadata.inspiration,
        &metadata.characteristics,
    ];
    for field in fields.into_iter().flatten() {
        let value = normalize_field(field, max_chars);
        if !value.is_empty() {
            segment.push_str(", ");
            segment.push_str(&value);
        }
    }
    segment
}

/// Whether the style carries any non-empty metadata field
pub fn has_metadata(style: &StyleSelection) -> bool {
    style.metadata.as_ref().is_some_and(|m| {
        [&m.description, &m.keywords, &m.inspiration, &m.characteristics]
            .into_iter()
            .flatten()
            .any(|field| !field.trim().is_empty())
    })
}

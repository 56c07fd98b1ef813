//! Extended-attribute blob structure.
//!
//! A value with the xattr datatype bit starts with the xattr section:
//!
//! ```text
//! | u32 BE: total xattr length | entries ... | document body |
//! ```
//!
//! Each entry is `u32 BE length || key NUL value NUL`, where the length
//! covers the key, value and both terminators.

/// Returns the document body after the xattr section.
///
/// Falls back to the whole payload when the section is truncated.
pub fn get_body(payload: &[u8]) -> &[u8] {
    match section_len(payload) {
        Some(len) if len <= payload.len() => &payload[len..],
        _ => payload,
    }
}

fn section_len(payload: &[u8]) -> Option<usize> {
    if payload.len() < 4 {
        return None;
    }
    let total = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
    Some(4 + total)
}

/// Structurally validates the xattr section of a payload.
pub fn validate_xattr_blob(payload: &[u8]) -> bool {
    let Some(total) = section_len(payload) else {
        return false;
    };
    if total > payload.len() {
        return false;
    }
    let mut cursor = 4;
    while cursor < total {
        if total - cursor < 4 {
            return false;
        }
        let entry_len = u32::from_be_bytes([
            payload[cursor],
            payload[cursor + 1],
            payload[cursor + 2],
            payload[cursor + 3],
        ]) as usize;
        cursor += 4;
        if entry_len == 0 || cursor + entry_len > total {
            return false;
        }
        let entry = &payload[cursor..cursor + entry_len];
        // key NUL value NUL
        let Some(key_end) = entry.iter().position(|&b| b == 0) else {
            return false;
        };
        if key_end == 0 || entry.last() != Some(&0) || key_end + 1 >= entry.len() {
            return false;
        }
        cursor += entry_len;
    }
    cursor == total
}

/// Builds an xattr section from key/value pairs (test helper).
pub fn build_xattr_section(pairs: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut entries = Vec::new();
    for (key, value) in pairs {
        let entry_len = key.len() + value.len() + 2;
        entries.extend_from_slice(&(entry_len as u32).to_be_bytes());
        entries.extend_from_slice(key.as_bytes());
        entries.push(0);
        entries.extend_from_slice(value.as_bytes());
        entries.push(0);
    }
    let mut out = Vec::with_capacity(4 + entries.len() + body.len());
    out.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    out.extend_from_slice(&entries);
    out.extend_from_slice(body);
    out
}

//! Response-shape probing
//!
//! The backend's JSON shapes are not contractually fixed: an upload response
//! may carry its reference string under half a dozen field names, at up to
//! two levels of nesting, and listing responses bury their arrays in equally
//! many places. Rather than inline conditionals, each probe is a declared
//! priority table of pure extractor paths applied in order with
//! first-match-wins semantics. Table order is load-bearing.

use serde_json::Value;

/// Nesting prefixes searched in order: top level, one level, two levels.
const NESTING: [&[&str]; 3] = [&[], &["data"], &["data", "data"]];

/// Direct-URL field names, in preference order.
const URL_FIELDS: [&str; 8] = [
    "url",
    "fileUrl",
    "fileURL",
    "location",
    "Location",
    "publicUrl",
    "signedUrl",
    "signedURL",
];

/// Key-style field names, probed after URL fields at each nesting level.
const KEY_FIELDS: [&str; 2] = ["key", "Key"];

/// Dotted paths at which a listing response may carry its entry array.
const LIST_PATHS: [&str; 20] = [
    "data.data",
    "data",
    "items",
    "data.items",
    "files",
    "data.files",
    "data.data.files",
    "fileList",
    "data.fileList",
    "data.data.fileList",
    "keys",
    "data.keys",
    "data.data.keys",
    "contents",
    "data.contents",
    "data.data.contents",
    "Contents",
    "data.Contents",
    "data.data.Contents",
    "data.data.data",
];

/// Wrapper paths whose `items`/`files`/`data` member may hold the array.
const NESTED_LIST_PATHS: [&str; 7] = [
    "data",
    "data.data",
    "data.result",
    "data.data.result",
    "result",
    "payload",
    "data.payload",
];

/// Walk a dotted path into a JSON value.
fn descend<'a>(body: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(body);
    }
    path.split('.').try_fold(body, |value, segment| value.get(segment))
}

/// Scrub a candidate reference string; `None` if empty after scrubbing.
fn scrub(raw: &str) -> Option<String> {
    let cleaned = raw.replace('`', "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// First non-empty string found under any of `fields` at any nesting level.
///
/// Search is depth-major: every field at the top level is tried before
/// descending, preserving the preference for shallow responses.
fn probe_fields(body: &Value, fields: &[&str]) -> Option<String> {
    for prefix in NESTING {
        let Some(scope) = prefix.iter().try_fold(body, |v, seg| v.get(seg)) else {
            continue;
        };
        for field in fields {
            if let Some(found) = scope.get(field).and_then(Value::as_str).and_then(scrub) {
                return Some(found);
            }
        }
    }
    None
}

/// Extract an upload reference string: direct-URL fields first, then
/// key-style fields, at each nesting level in turn.
pub fn reference_string(body: &Value) -> Option<String> {
    let mut fields = Vec::with_capacity(URL_FIELDS.len() + KEY_FIELDS.len());
    fields.extend_from_slice(&URL_FIELDS);
    fields.extend_from_slice(&KEY_FIELDS);
    probe_fields(body, &fields)
}

/// Extract a direct URL string only; key-style fields are ignored.
///
/// Used on resolution-probe responses, where a key would send the resolver
/// around in a circle.
pub fn url_string(body: &Value) -> Option<String> {
    probe_fields(body, &URL_FIELDS)
}

/// Extract a listing entry array from whichever location the backend chose.
pub fn listing_entries(body: &Value) -> Vec<Value> {
    if let Some(array) = body.as_array() {
        return array.clone();
    }

    for path in LIST_PATHS {
        if let Some(array) = descend(body, path).and_then(Value::as_array) {
            return array.clone();
        }
    }

    for path in NESTED_LIST_PATHS {
        let Some(wrapper) = descend(body, path) else {
            continue;
        };
        if let Some(array) = wrapper.as_array() {
            return array.clone();
        }
        for member in ["items", "files", "data"] {
            if let Some(array) = wrapper.get(member).and_then(Value::as_array) {
                return array.clone();
            }
        }
    }

    Vec::new()
}

/// Extract a reference string from a single listing entry.
///
/// Entries are either bare strings or objects probed flat (no nesting):
/// URL-style fields first, then key-style.
pub fn entry_reference(entry: &Value) -> Option<String> {
    if let Some(s) = entry.as_str() {
        return scrub(s);
    }

    for field in URL_FIELDS.iter().chain(KEY_FIELDS.iter()) {
        if let Some(found) = entry.get(field).and_then(Value::as_str).and_then(scrub) {
            return Some(found);
        }
    }
    None
}

/// First non-empty string among `fields` on a flat object.
pub fn first_string(entry: &Value, fields: &[&str]) -> Option<String> {
    for field in fields {
        if let Some(found) = entry.get(field).and_then(Value::as_str).and_then(scrub) {
            return Some(found);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn reference_prefers_shallow_url() {
        let body = json!({
            "url": "https://cdn/a.mp4",
            "data": { "url": "https://cdn/b.mp4" }
        });
        assert_eq!(reference_string(&body).unwrap(), "https://cdn/a.mp4");
    }

    #[test]
    fn reference_prefers_url_over_key_at_same_level() {
        let body = json!({ "key": "uploads/a.mp4", "publicUrl": "https://cdn/a.mp4" });
        assert_eq!(reference_string(&body).unwrap(), "https://cdn/a.mp4");
    }

    #[test]
    fn reference_falls_through_to_nested_key() {
        let body = json!({ "data": { "data": { "key": "uploads/deep.mp4" } } });
        assert_eq!(reference_string(&body).unwrap(), "uploads/deep.mp4");
    }

    #[test]
    fn reference_scrubs_backticks() {
        let body = json!({ "fileUrl": " `https://cdn/q.mp4` " });
        assert_eq!(reference_string(&body).unwrap(), "https://cdn/q.mp4");
    }

    #[test]
    fn reference_ignores_empty_strings() {
        let body = json!({ "url": "", "data": { "key": "k1" } });
        assert_eq!(reference_string(&body).unwrap(), "k1");
    }

    #[test]
    fn url_probe_never_returns_keys() {
        let body = json!({ "key": "uploads/a.mp4" });
        assert!(url_string(&body).is_none());
    }

    #[test]
    fn no_reference_anywhere() {
        let body = json!({ "status": 200, "message": "ok" });
        assert!(reference_string(&body).is_none());
    }

    #[test]
    fn listing_from_bare_array() {
        let body = json!(["a.mp4", "b.mp4"]);
        assert_eq!(listing_entries(&body).len(), 2);
    }

    #[test]
    fn listing_from_nested_locations() {
        let body = json!({ "data": { "data": [ {"key": "a.mp4"} ] } });
        assert_eq!(listing_entries(&body).len(), 1);

        let body = json!({ "data": { "Contents": [ {"Key": "a.mp4"}, {"Key": "b.mp4"} ] } });
        assert_eq!(listing_entries(&body).len(), 2);

        let body = json!({ "result": { "items": [ {"url": "https://cdn/a.mp4"} ] } });
        assert_eq!(listing_entries(&body).len(), 1);

        let body = json!({ "data": { "data": { "items": [ {"key": "deep.mp4"} ] } } });
        assert_eq!(listing_entries(&body).len(), 1);

        let body = json!({ "data": { "data": { "fileList": [ "a.mp4" ] } } });
        assert_eq!(listing_entries(&body).len(), 1);

        let body = json!({ "data": { "data": { "keys": [ "k/a.mp4" ] } } });
        assert_eq!(listing_entries(&body).len(), 1);

        let body = json!({ "data": { "data": { "contents": [ {"key": "c.mp4"} ] } } });
        assert_eq!(listing_entries(&body).len(), 1);
    }

    #[test]
    fn listing_missing_is_empty() {
        let body = json!({ "message": "nothing here" });
        assert!(listing_entries(&body).is_empty());
    }

    #[test]
    fn entry_reference_from_string_and_object() {
        assert_eq!(entry_reference(&json!("uploads/a.mp4")).unwrap(), "uploads/a.mp4");
        assert_eq!(
            entry_reference(&json!({"Key": "uploads/b.mp4"})).unwrap(),
            "uploads/b.mp4"
        );
        assert_eq!(
            entry_reference(&json!({"Location": "x", "url": "https://cdn/c.mp4"})).unwrap(),
            "https://cdn/c.mp4"
        );
        assert!(entry_reference(&json!({"size": 10})).is_none());
    }
}

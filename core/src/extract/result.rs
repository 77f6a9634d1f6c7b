use serde_json::{Map, Value};

pub const RESULT_OUTPUT_BEGIN: &str = "=== RESULT_OUTPUT ===";
pub const RESULT_OUTPUT_END: &str = "=== END_RESULT_OUTPUT ===";
pub const RESULT_METADATA_BEGIN: &str = "=== RESULT_METADATA ===";
pub const RESULT_METADATA_END: &str = "=== END_RESULT_METADATA ===";
pub const STRUCTURED_RESULT_BEGIN: &str = "=== STRUCTURED_RESULT ===";
pub const STRUCTURED_RESULT_END: &str = "=== END_STRUCTURED_RESULT ===";

/// Extract a structured result from free-form output.
///
/// The section format is preferred: the RESULT_OUTPUT block becomes the
/// `result` field, and a RESULT_METADATA block, when present and
/// well-formed, is merged over it (metadata fields win). The legacy
/// STRUCTURED_RESULT block is parsed as a complete JSON object. Malformed
/// payloads never fail the caller: they are logged and yield no result.
pub fn extract_structured_result(output: &str) -> Option<Value> {
    if let Some(result_text) = between(output, RESULT_OUTPUT_BEGIN, RESULT_OUTPUT_END) {
        let mut object = Map::new();
        object.insert(
            "result".to_string(),
            Value::String(result_text.trim().to_string()),
        );

        if let Some(meta_text) = between(output, RESULT_METADATA_BEGIN, RESULT_METADATA_END) {
            match serde_json::from_str::<Value>(meta_text.trim()) {
                Ok(Value::Object(meta)) => {
                    for (key, value) in meta {
                        object.insert(key, value);
                    }
                }
                Ok(other) => {
                    tracing::warn!("result metadata is not an object, ignoring: {other}");
                }
                Err(e) => {
                    tracing::warn!("malformed result metadata, ignoring: {e}");
                }
            }
        }
        return Some(Value::Object(object));
    }

    if let Some(legacy_text) = between(output, STRUCTURED_RESULT_BEGIN, STRUCTURED_RESULT_END) {
        match serde_json::from_str::<Value>(legacy_text.trim()) {
            Ok(value) => return Some(value),
            Err(e) => {
                tracing::warn!("malformed legacy structured result, ignoring: {e}");
                return None;
            }
        }
    }

    None
}

/// Strip exactly one occurrence of each recognized marker region for
/// display, collapsing the removed span without disturbing surrounding
/// text.
pub fn clean_output_from_markers(output: &str) -> String {
    let mut out = output.to_string();
    for (begin, end) in [
        (RESULT_OUTPUT_BEGIN, RESULT_OUTPUT_END),
        (RESULT_METADATA_BEGIN, RESULT_METADATA_END),
        (STRUCTURED_RESULT_BEGIN, STRUCTURED_RESULT_END),
    ] {
        if let Some(begin_idx) = out.find(begin) {
            if let Some(end_rel) = out[begin_idx..].find(end) {
                let end_idx = begin_idx + end_rel + end.len();
                out.replace_range(begin_idx..end_idx, "");
            }
        }
    }
    out
}

fn between<'a>(text: &'a str, begin: &str, end: &str) -> Option<&'a str> {
    let begin_idx = text.find(begin)? + begin.len();
    let end_rel = text[begin_idx..].find(end)?;
    Some(&text[begin_idx..begin_idx + end_rel])
}

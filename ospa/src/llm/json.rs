//! Normalization of dynamic LLM JSON output.
//!
//! Models emit JSON that is sometimes wrapped (`{"chapters": [...]}`),
//! sometimes bare (`[...]`), sometimes a scalar, and sometimes missing its
//! enclosing brackets. [`normalize_to_list`] funnels all of those shapes
//! into a single list; [`fix_json`] repairs the bracket cases before the
//! more expensive LLM repair round-trip is attempted.

use serde_json::Value;

/// Normalize any LLM response value into a list.
///
/// Rules, applied in order:
/// 1. string → parse as JSON, then recurse; unparsable strings become a
///    one-element list,
/// 2. list → kept as is,
/// 3. map → the `chapters` key when it holds a list, else the sole
///    list-valued entry, else the first list-valued entry, else the whole
///    map wrapped,
/// 4. null → empty list,
/// 5. any other scalar → wrapped.
#[must_use]
pub fn normalize_to_list(value: Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(parsed) => normalize_to_list(parsed),
            Err(_) => vec![Value::String(s)],
        },
        Value::Array(items) => items,
        Value::Object(map) => {
            if let Some(Value::Array(chapters)) = map.get("chapters") {
                return chapters.clone();
            }
            if map.len() == 1
                && let Some(Value::Array(items)) = map.values().next()
            {
                return items.clone();
            }
            for v in map.values() {
                if let Value::Array(items) = v {
                    return items.clone();
                }
            }
            vec![Value::Object(map)]
        }
        scalar => vec![scalar],
    }
}

/// Parse a JSON string, repairing a missing list opening or closing
/// bracket when plain parsing fails.
pub fn fix_json(input: &str) -> Result<Value, serde_json::Error> {
    let s = input.trim();
    match serde_json::from_str(s) {
        Ok(value) => Ok(value),
        Err(original) => {
            let mut fixed = s.to_owned();
            if !fixed.starts_with('[') {
                if fixed.starts_with('{') {
                    fixed.insert(0, '[');
                } else {
                    fixed.insert_str(0, "[{");
                }
            }
            if !fixed.ends_with(']') {
                if let Some(stripped) = fixed.strip_suffix("},") {
                    fixed = format!("{stripped}}}]");
                } else {
                    fixed.push(']');
                }
            }
            serde_json::from_str(&fixed).map_err(|_| original)
        }
    }
}

/// Extract the outermost JSON array or object from free text.
///
/// LLM replies often wrap JSON in prose or a code fence; this finds the
/// first `[`/`{` and the matching last `]`/`}` and returns that slice.
#[must_use]
pub fn extract_json_block(text: &str) -> Option<&str> {
    let array = text
        .find('[')
        .and_then(|start| text.rfind(']').filter(|end| *end > start).map(|end| (start, end)));
    let object = text
        .find('{')
        .and_then(|start| text.rfind('}').filter(|end| *end > start).map(|end| (start, end)));

    let (start, end) = match (array, object) {
        (Some(a), Some(o)) => {
            if a.0 < o.0 {
                a
            } else {
                o
            }
        }
        (Some(a), None) => a,
        (None, Some(o)) => o,
        (None, None) => return None,
    };
    Some(&text[start..=end])
}

/// Parse an LLM reply into a JSON value, trying the raw text, then the
/// extracted JSON block, then bracket repair.
#[must_use]
pub fn parse_loose(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str(text.trim()) {
        return Some(value);
    }
    if let Some(block) = extract_json_block(text)
        && let Ok(value) = serde_json::from_str(block)
    {
        return Some(value);
    }
    fix_json(text).ok()
}

/// Extract the first integer from a string, `0` when none is present.
///
/// Tolerates LLM-emitted index fields arriving as `"2"`, `"index: 2"`, or
/// `"1-3"` (returns the first number).
#[must_use]
pub fn safe_to_int(text: &str) -> i64 {
    let mut chars = text.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        if c.is_ascii_digit() || (c == '-' && chars.peek().is_some_and(|(_, n)| n.is_ascii_digit()))
        {
            let rest = &text[start..];
            let end = rest
                .char_indices()
                .skip(1)
                .find(|(_, c)| !c.is_ascii_digit())
                .map_or(rest.len(), |(i, _)| i);
            return rest[..end].parse().unwrap_or(0);
        }
    }
    0
}

//! HTML-safe embedding of JSON data.

/// Escape JSON text for embedding inside an HTML `<script>` element.
///
/// Replaces `&`, `<`, `>`, U+2028 and U+2029 with `\uXXXX` escapes, which
/// keeps the JSON equivalent while making `</script>` impossible.
pub fn json_escape(json: &str) -> String {
    let mut escaped = String::with_capacity(json.len());
    for ch in json.chars() {
        match ch {
            '&' => escaped.push_str("\\u0026"),
            '<' => escaped.push_str("\\u003c"),
            '>' => escaped.push_str("\\u003e"),
            '\u{2028}' => escaped.push_str("\\u2028"),
            '\u{2029}' => escaped.push_str("\\u2029"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Escape an attribute value.
pub fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// `<script type="application/json" {attribute}="{value}">{json}</script>`
pub fn json_script_tag(attribute: &str, value: &str, json: &str) -> String {
    format!(
        r#"<script type="application/json" {attribute}="{}">{}</script>"#,
        escape_attribute(value),
        json_escape(json)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_escape() {
        assert_eq!(
            json_escape(r#"{"a":"</script><b>&"}"#),
            r#"{"a":"\u003c/script\u003e\u003cb\u003e\u0026"}"#
        );
        assert_eq!(json_escape("\u{2028}\u{2029}"), r"\u2028\u2029");
    }

    #[test]
    fn test_json_escape_round_trips_as_json() {
        let original = serde_json::json!({ "html": "<div>&</div>" });
        let escaped = json_escape(&original.to_string());
        let parsed: serde_json::Value = serde_json::from_str(&escaped).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_json_script_tag() {
        let tag = json_script_tag("id", "ctx\"x", "{}");
        assert_eq!(
            tag,
            r#"<script type="application/json" id="ctx&quot;x">{}</script>"#
        );
    }
}

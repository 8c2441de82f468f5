//! Textual wire format for tool-use requests and tool-result replies.
//!
//! The model is asked to emit tool calls as plain text blocks rather than a
//! structured field, and the process speaks the same format back when it
//! reports results:
//!
//! ```text
//! <tool_use id="<opaque id>" name="<tool name>">
//! {"arg": "value"}
//! </tool_use>
//! ```
//!
//! ```text
//! <tool_result tool_use_id="<opaque id>" name="<tool name>">
//! result text, possibly multi-line
//! </tool_result>
//! ```
//!
//! Attribute order is not significant and unrecognized attributes are
//! ignored, so a provider that echoes extra metadata back doesn't break
//! parsing.

use serde_json::Value;

/// A tool-use request parsed out of (or about to be serialized into) model
/// output text.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolUseBlock {
    /// Opaque id correlating this call with its eventual result.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Parsed argument map.
    pub input: Value,
}

/// A tool-result reply to be serialized into (or parsed out of) a
/// user-role message sent back to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResultBlock {
    /// Id of the `ToolUseBlock` this replies to.
    pub tool_use_id: String,
    /// Tool name, echoed for readability.
    pub name: String,
    /// Result text. May span multiple lines.
    pub content: String,
    /// Whether this result represents a tool execution error.
    pub is_error: bool,
}

/// Serialize a tool-use block to its textual wire form.
pub fn write_tool_use(block: &ToolUseBlock) -> String {
    let input_json = serde_json::to_string(&block.input).unwrap_or_else(|_| "{}".to_string());
    format!(
        "<tool_use id=\"{}\" name=\"{}\">\n{}\n</tool_use>",
        escape_attr(&block.id),
        escape_attr(&block.name),
        input_json
    )
}

/// Serialize a tool-result block to its textual wire form.
pub fn write_tool_result(block: &ToolResultBlock) -> String {
    format!(
        "<tool_result tool_use_id=\"{}\" name=\"{}\">\n{}\n</tool_result>",
        escape_attr(&block.tool_use_id),
        escape_attr(&block.name),
        block.content
    )
}

fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;").replace('"', "&quot;")
}

fn unescape_attr(s: &str) -> String {
    s.replace("&quot;", "\"").replace("&amp;", "&")
}

/// Parse every `<tool_use>` block out of a text blob, in order of
/// appearance. Malformed blocks are skipped rather than aborting the
/// whole parse, since a model occasionally emits a truncated tag.
pub fn parse_tool_uses(text: &str) -> Vec<ToolUseBlock> {
    parse_blocks(text, "tool_use", |attrs, body| {
        let id = attrs.get("id")?.clone();
        let name = attrs.get("name")?.clone();
        let input: Value = serde_json::from_str(body.trim()).ok()?;
        Some(ToolUseBlock { id, name, input })
    })
}

/// Parse every `<tool_result>` block out of a text blob, in order of
/// appearance.
pub fn parse_tool_results(text: &str) -> Vec<ToolResultBlock> {
    parse_blocks(text, "tool_result", |attrs, body| {
        let tool_use_id = attrs.get("tool_use_id")?.clone();
        let name = attrs.get("name").cloned().unwrap_or_default();
        let is_error = attrs
            .get("is_error")
            .map(|v| v == "true")
            .unwrap_or(false);
        Some(ToolResultBlock {
            tool_use_id,
            name,
            content: body.trim().to_string(),
            is_error,
        })
    })
}

/// Scan `text` for `<tag ...>...</tag>` blocks and hand each one's
/// attribute map and inner body to `build`. Attribute order within the
/// opening tag doesn't matter; unrecognized attributes are collected but
/// simply unused by `build`.
fn parse_blocks<T>(
    text: &str,
    tag: &str,
    build: impl Fn(&std::collections::HashMap<String, String>, &str) -> Option<T>,
) -> Vec<T> {
    let open_prefix = format!("<{tag}");
    let close_tag = format!("</{tag}>");
    let mut out = Vec::new();
    let mut cursor = 0;

    while let Some(rel_start) = text[cursor..].find(&open_prefix) {
        let start = cursor + rel_start;
        let Some(rel_tag_close) = text[start..].find('>') else {
            break;
        };
        let tag_end = start + rel_tag_close;
        let attrs_str = &text[start + open_prefix.len()..tag_end];
        let Some(rel_body_end) = text[tag_end..].find(&close_tag) else {
            cursor = tag_end + 1;
            continue;
        };
        let body_start = tag_end + 1;
        let body_end = tag_end + rel_body_end;
        let body = &text[body_start..body_end];
        let attrs = parse_attrs(attrs_str);
        if let Some(item) = build(&attrs, body) {
            out.push(item);
        }
        cursor = body_end + close_tag.len();
    }

    out
}

fn parse_attrs(s: &str) -> std::collections::HashMap<String, String> {
    let mut attrs = std::collections::HashMap::new();
    let mut rest = s.trim();
    while let Some(eq) = rest.find('=') {
        let key = rest[..eq].trim().to_string();
        rest = rest[eq + 1..].trim_start();
        if !rest.starts_with('"') {
            break;
        }
        rest = &rest[1..];
        let Some(end_quote) = rest.find('"') else {
            break;
        };
        let value = unescape_attr(&rest[..end_quote]);
        if !key.is_empty() {
            attrs.insert(key, value);
        }
        rest = rest[end_quote + 1..].trim_start();
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_use_round_trips() {
        let block = ToolUseBlock {
            id: "call_1".into(),
            name: "search".into(),
            input: json!({"query": "rust async"}),
        };
        let wire = write_tool_use(&block);
        let parsed = parse_tool_uses(&wire);
        assert_eq!(parsed, vec![block]);
    }

    #[test]
    fn tool_result_round_trips_multiline() {
        let block = ToolResultBlock {
            tool_use_id: "call_1".into(),
            name: "search".into(),
            content: "line one\nline two".into(),
            is_error: false,
        };
        let wire = write_tool_result(&block);
        let parsed = parse_tool_results(&wire);
        assert_eq!(parsed, vec![block]);
    }

    #[test]
    fn attribute_order_does_not_matter() {
        let text = r#"<tool_use name="echo" id="x1">
{"a": 1}
</tool_use>"#;
        let parsed = parse_tool_uses(text);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].id, "x1");
        assert_eq!(parsed[0].name, "echo");
    }

    #[test]
    fn unrecognized_attributes_are_ignored() {
        let text = r#"<tool_use id="x1" name="echo" cache_control="ephemeral">
{}
</tool_use>"#;
        let parsed = parse_tool_uses(text);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].id, "x1");
    }

    #[test]
    fn multiple_blocks_parsed_in_order() {
        let text = r#"preamble
<tool_use id="1" name="a">
{}
</tool_use>
middle text
<tool_use id="2" name="b">
{}
</tool_use>"#;
        let parsed = parse_tool_uses(text);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].id, "1");
        assert_eq!(parsed[1].id, "2");
    }

    #[test]
    fn malformed_block_is_skipped_not_fatal() {
        let text = r#"<tool_use id="1" name="a">
not json
</tool_use>
<tool_use id="2" name="b">
{}
</tool_use>"#;
        let parsed = parse_tool_uses(text);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].id, "2");
    }

    #[test]
    fn tool_result_is_error_flag() {
        let text = r#"<tool_result tool_use_id="1" name="a" is_error="true">
boom
</tool_result>"#;
        let parsed = parse_tool_results(text);
        assert_eq!(parsed.len(), 1);
        assert!(parsed[0].is_error);
    }
}

//! The synthetic `recall_memory` tool.

use animus_llm::ToolDefinition;

pub const RECALL_TOOL_NAME: &str = "recall_memory";

const TOP_K_DEFAULT: u32 = 5;
const TOP_K_MAX: u32 = 10;

/// Tool definition offered alongside terminal skills whenever the
/// semantic memory is ready.
pub fn recall_tool_definition() -> ToolDefinition {
    ToolDefinition {
        name: RECALL_TOOL_NAME.to_string(),
        description: "检索与当前用户和灵魂相关的长期记忆。只在需要更早的历史信息时调用。"
            .to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "要检索的内容"
                },
                "top_k": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": TOP_K_MAX,
                    "default": TOP_K_DEFAULT
                }
            },
            "required": ["query"]
        }),
    }
}

/// Parse recall arguments strictly. A missing or blank `query` falls
/// back to the latest user text; when that is empty too the call is
/// invalid and the error goes back into the history as the tool output.
pub fn parse_recall_args(
    arguments: &serde_json::Value,
    fallback_query: &str,
) -> Result<(String, u32), String> {
    let query = arguments
        .get("query")
        .and_then(|q| q.as_str())
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .unwrap_or(fallback_query.trim());
    if query.is_empty() {
        return Err("invalid".to_string());
    }

    let top_k = arguments
        .get("top_k")
        .and_then(|k| k.as_u64())
        .map(|k| (k as u32).clamp(1, TOP_K_MAX))
        .unwrap_or(TOP_K_DEFAULT);

    Ok((query.to_string(), top_k))
}

/// Render recall hits into the tool output recorded in history.
pub fn format_recall_output(snippets: &[String]) -> String {
    if snippets.is_empty() {
        return "（没有找到相关记忆）".to_string();
    }
    snippets
        .iter()
        .map(|s| format!("- {s}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_query_and_top_k_are_used() {
        let args = serde_json::json!({"query": "earlier preferences", "top_k": 3});
        let (query, top_k) = parse_recall_args(&args, "fallback").unwrap();
        assert_eq!(query, "earlier preferences");
        assert_eq!(top_k, 3);
    }

    #[test]
    fn missing_query_falls_back_to_user_text() {
        let args = serde_json::json!({});
        let (query, top_k) = parse_recall_args(&args, "昨天聊了什么").unwrap();
        assert_eq!(query, "昨天聊了什么");
        assert_eq!(top_k, TOP_K_DEFAULT);
    }

    #[test]
    fn empty_query_without_fallback_is_invalid() {
        let args = serde_json::json!({"query": "  "});
        let err = parse_recall_args(&args, "").unwrap_err();
        assert_eq!(err, "invalid");
    }

    #[test]
    fn top_k_is_clamped_into_range() {
        let args = serde_json::json!({"query": "q", "top_k": 99});
        assert_eq!(parse_recall_args(&args, "").unwrap().1, TOP_K_MAX);
        let args = serde_json::json!({"query": "q", "top_k": 0});
        assert_eq!(parse_recall_args(&args, "").unwrap().1, 1);
    }

    #[test]
    fn output_formatting() {
        assert!(format_recall_output(&[]).contains("没有找到"));
        let out = format_recall_output(&["喜欢茉莉花茶".to_string(), "住在上海".to_string()]);
        assert_eq!(out, "- 喜欢茉莉花茶\n- 住在上海");
    }
}

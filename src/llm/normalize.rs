//! Tool result normalization.
//!
//! Most tools return text the model can read directly. A few return a
//! structured payload that is turned into a short user-facing sentence
//! before it goes back into the conversation.

use serde_json::Value;

/// The Kling text-to-image tool.
pub const IMAGE_GENERATION_TOOL: &str = "文生图-可灵版-MCP";

/// Returned when the image payload carries no URL or is not JSON.
pub const IMAGE_GENERATION_FAILED: &str = "图片生成失败";

const IMAGE_GENERATION_OK: &str = "图片生成成功，地址为：";

/// Turn a raw tool result into display text. Never fails.
pub fn normalize(tool_name: &str, raw_result: &str) -> String {
    match tool_name {
        IMAGE_GENERATION_TOOL => image_result(raw_result),
        _ => raw_result.to_string(),
    }
}

fn image_result(raw_result: &str) -> String {
    serde_json::from_str::<Value>(raw_result)
        .ok()
        .as_ref()
        .and_then(|v| v.pointer("/data/image_url"))
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
        .map_or_else(
            || IMAGE_GENERATION_FAILED.to_string(),
            |url| format!("{IMAGE_GENERATION_OK}{url}"),
        )
}

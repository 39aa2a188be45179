//! 会话过程事件：用于 NDJSON 流式展示回合、工具调用、工具结果与最终状态

use serde::Serialize;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// 会话已创建，工具池已获取
    SessionStarted { session_id: String, tools: Vec<String> },
    /// 开始第 turn 次模型调用
    TurnStarted { turn: usize, max_turns: usize },
    /// 模型回复的一小段（流式输出）
    MessageChunk { text: String },
    /// 一条 assistant 消息结束
    MessageDone,
    /// 调用工具
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    ToolResult {
        id: String,
        name: String,
        is_error: bool,
        preview: String,
    },
    /// 会话正常结束
    Done { turns: usize },
    /// 会话失败
    Error { kind: String, status: u16, text: String },
}

/// 截断到 max_chars 个字符，超出时追加 "..."
pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_is_tagged() {
        let ev = SessionEvent::ToolResult {
            id: "1".into(),
            name: "list_files".into(),
            is_error: false,
            preview: "a.txt".into(),
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "tool_result");
        assert_eq!(v["name"], "list_files");
        let done = serde_json::to_value(SessionEvent::MessageDone).unwrap();
        assert_eq!(done, serde_json::json!({"type": "message_done"}));
    }

    #[test]
    fn test_preview_truncates_on_chars() {
        assert_eq!(preview("你好世界", 2), "你好...");
        assert_eq!(preview("ok", 10), "ok");
    }
}

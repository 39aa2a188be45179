//! 会话记录（Transcript）：消息、角色、工具调用请求
//!
//! 单次会话内的有序消息序列，只由编排循环追加；角色创建后不可变，
//! 流式 assistant 消息的 content 只追加不改写。

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::core::InputError;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// 单次工具调用请求：id 在同一 assistant 回合内唯一，用于匹配 ToolResult
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    #[serde(default = "empty_arguments")]
    pub arguments: serde_json::Value,
}

fn empty_arguments() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// 由模型给出的参数文本构造：空文本视为 {}，非法 JSON 原样保留为字符串，由执行器生成错误 ToolResult
    pub fn from_raw(id: impl Into<String>, name: impl Into<String>, raw: &str) -> Self {
        let arguments = if raw.trim().is_empty() {
            empty_arguments()
        } else {
            serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
        };
        Self::new(id, name, arguments)
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    role: Role,
    #[serde(default)]
    pub content: String,
    /// 仅 assistant 消息携带
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// 仅 tool 消息携带：所回答的 ToolCallRequest id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl Message {
    fn with_role(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            is_error: false,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content.into())
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content.into())
    }

    /// 带工具调用的 assistant 消息
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        let mut msg = Self::with_role(Role::Assistant, content.into());
        msg.tool_calls = tool_calls;
        msg
    }

    /// 成功的 ToolResult
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::with_role(Role::Tool, content.into());
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    /// 失败的 ToolResult：错误文本作为内容交给模型
    pub fn tool_error(tool_call_id: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        let mut msg = Self::with_role(Role::Tool, format!("tool failed: {}", reason));
        msg.tool_call_id = Some(tool_call_id.into());
        msg.is_error = true;
        msg
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// 流式追加内容
    pub fn append_content(&mut self, delta: &str) {
        self.content.push_str(delta);
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// 同一回合内 tool call id 必须唯一；返回第一个重复的 id
    pub fn duplicate_tool_call_id(&self) -> Option<&str> {
        let mut seen = HashSet::new();
        self.tool_calls
            .iter()
            .find(|c| !seen.insert(c.id.as_str()))
            .map(|c| c.id.as_str())
    }
}

/// 会话记录：有序、只追加
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// 最后一条 assistant 消息的文本（最终回复）
    pub fn final_reply(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role() == Role::Assistant)
            .map(|m| m.content.as_str())
    }

    /// 记录中没有任何 system 消息时，在开头插入 system prompt
    pub fn ensure_system_prompt(&mut self, prompt: &str) {
        let has_system = self.messages.iter().any(|m| m.role() == Role::System);
        if !has_system && !prompt.trim().is_empty() {
            self.messages.insert(0, Message::system(prompt));
        }
    }

    /// 会话创建前的输入校验
    pub fn validate(&self) -> Result<(), InputError> {
        if self.messages.is_empty() {
            return Err(InputError::EmptyTranscript);
        }
        let mut issued: HashSet<&str> = HashSet::new();
        for msg in &self.messages {
            match msg.role() {
                Role::Assistant => {
                    if let Some(id) = msg.duplicate_tool_call_id() {
                        return Err(InputError::DuplicateToolCallId(id.to_string()));
                    }
                    issued.extend(msg.tool_calls.iter().map(|c| c.id.as_str()));
                }
                Role::Tool => {
                    let id = msg.tool_call_id.as_deref().unwrap_or_default();
                    if !issued.contains(id) {
                        return Err(InputError::OrphanToolResult(id.to_string()));
                    }
                }
                Role::System | Role::User => {
                    if msg.has_tool_calls() {
                        return Err(InputError::UnexpectedToolCalls);
                    }
                }
            }
        }
        Ok(())
    }
}

impl From<Vec<Message>> for Transcript {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

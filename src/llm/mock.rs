//! Mock 与脚本化 LLM 客户端（无需 API）
//!
//! - MockLlmClient：声明了 echo 工具时先请求一次 echo，再用工具输出作答；否则直接回显用户输入，
//!   便于本地跑通完整编排流程。
//! - ScriptedLlmClient：按脚本依次返回回复 / 片段序列 / 错误，并记录每次调用看到的会话与工具。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::{FragmentStream, LlmClient, LlmError};
use crate::memory::{Message, Role, ToolCallRequest};
use crate::stream::{StreamFragment, StreamMerger};
use crate::tools::ToolSpec;

/// Mock 客户端
#[derive(Debug, Default)]
pub struct MockLlmClient;

impl MockLlmClient {
    fn reply(messages: &[Message], tools: &[ToolSpec]) -> Message {
        let last = messages.last();
        if let Some(result) = last.filter(|m| m.role() == Role::Tool) {
            return Message::assistant(format!("Echo from Mock: {}", result.content));
        }
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role() == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        if tools.iter().any(|t| t.name == "echo") {
            let turn = messages.iter().filter(|m| m.role() == Role::Assistant).count();
            return Message::assistant_with_tools(
                "",
                vec![ToolCallRequest::new(
                    format!("mock_call_{}", turn + 1),
                    "echo",
                    serde_json::json!({ "text": last_user }),
                )],
            );
        }
        Message::assistant(format!("Echo from Mock: {}", last_user))
    }
}

/// 把完整消息拆成流式片段：文本按空白切分，tool call 参数分两段
pub fn message_to_fragments(message: &Message) -> Vec<StreamFragment> {
    let mut fragments: Vec<StreamFragment> = message
        .content
        .split_inclusive(' ')
        .map(StreamFragment::text)
        .collect();
    for call in &message.tool_calls {
        let args = call.arguments.to_string();
        let mid = args.char_indices().nth(args.chars().count() / 2).map_or(0, |(i, _)| i);
        fragments.push(StreamFragment::tool_call(&call.id, Some(&call.name), &args[..mid]));
        fragments.push(StreamFragment::tool_call(&call.id, None, &args[mid..]));
    }
    fragments
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<Message, LlmError> {
        Ok(Self::reply(messages, tools))
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<FragmentStream, LlmError> {
        let fragments = message_to_fragments(&Self::reply(messages, tools));
        Ok(Box::pin(stream::iter(fragments.into_iter().map(Ok))))
    }
}

/// 脚本中的一次模型回复
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// 完整消息；流式调用时自动拆成片段
    Message(Message),
    /// 原样回放的片段序列（可在中途插入错误）
    Fragments(Vec<Result<StreamFragment, LlmError>>),
    /// 调用直接失败
    Error(LlmError),
    /// 永不返回（用于超时与取消）
    Hang,
}

/// 一次调用看到的输入
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub tools: Vec<String>,
}

/// 脚本化客户端：每次调用消费一条回复，脚本耗尽时报错
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<ScriptedReply>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedLlmClient {
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn next(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<ScriptedReply, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                messages: messages.to_vec(),
                tools: tools.iter().map(|t| t.name.clone()).collect(),
            });
        }
        self.replies
            .lock()
            .ok()
            .and_then(|mut r| r.pop_front())
            .ok_or_else(|| LlmError::InvalidReply("script exhausted".into()))
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<Message, LlmError> {
        match self.next(messages, tools)? {
            ScriptedReply::Message(msg) => Ok(msg),
            ScriptedReply::Fragments(items) => {
                let mut merger = StreamMerger::new();
                for item in items {
                    merger.push(item?);
                }
                Ok(merger.finish())
            }
            ScriptedReply::Error(e) => Err(e),
            ScriptedReply::Hang => futures_util::future::pending().await,
        }
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<FragmentStream, LlmError> {
        match self.next(messages, tools)? {
            ScriptedReply::Message(msg) => {
                let fragments = message_to_fragments(&msg);
                Ok(Box::pin(stream::iter(fragments.into_iter().map(Ok))))
            }
            ScriptedReply::Fragments(items) => Ok(Box::pin(stream::iter(items))),
            ScriptedReply::Error(e) => Err(e),
            ScriptedReply::Hang => Ok(Box::pin(stream::pending::<Result<StreamFragment, LlmError>>())),
        }
    }
}

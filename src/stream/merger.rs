//! 流式片段合并
//!
//! 把 Model Invoker 产出的 StreamFragment 序列按到达顺序累积为一条 assistant 消息，
//! 同时把每个片段的可读增量立即转发给调用方 sink（每片段至多一次，不额外缓冲）。
//! tool call 按 id 合并：新 id 追加调用，重复 id 拼接参数文本；参数只在序列结束时解析一次。

use std::collections::HashMap;

use futures_util::StreamExt;

use crate::core::HiveError;
use crate::llm::FragmentStream;
use crate::memory::{Message, ToolCallRequest};
use crate::stream::OutputSink;

/// 单个 tool call 的增量
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallDelta {
    pub id: String,
    /// 通常只在首个片段出现
    pub name: Option<String>,
    /// 参数 JSON 文本的一段
    pub arguments: String,
}

/// assistant 输出的一个增量单元
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamFragment {
    pub delta_text: Option<String>,
    pub delta_tool_calls: Vec<ToolCallDelta>,
}

impl StreamFragment {
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            delta_text: Some(delta.into()),
            delta_tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(id: impl Into<String>, name: Option<&str>, arguments: impl Into<String>) -> Self {
        Self {
            delta_text: None,
            delta_tool_calls: vec![ToolCallDelta {
                id: id.into(),
                name: name.map(String::from),
                arguments: arguments.into(),
            }],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.delta_text.as_deref().map_or(true, str::is_empty) && self.delta_tool_calls.is_empty()
    }
}

#[derive(Debug)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// 片段累加器
#[derive(Debug)]
pub struct StreamMerger {
    message: Message,
    calls: Vec<PartialToolCall>,
    by_id: HashMap<String, usize>,
}

impl Default for StreamMerger {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamMerger {
    pub fn new() -> Self {
        Self {
            message: Message::assistant(""),
            calls: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    /// 累积一个片段，返回需要转发给调用方的可读增量
    pub fn push(&mut self, fragment: StreamFragment) -> Option<String> {
        for delta in fragment.delta_tool_calls {
            match self.by_id.get(&delta.id) {
                Some(&idx) => {
                    let call = &mut self.calls[idx];
                    if call.name.is_empty() {
                        if let Some(name) = delta.name {
                            call.name = name;
                        }
                    }
                    call.arguments.push_str(&delta.arguments);
                }
                None => {
                    self.by_id.insert(delta.id.clone(), self.calls.len());
                    self.calls.push(PartialToolCall {
                        id: delta.id,
                        name: delta.name.unwrap_or_default(),
                        arguments: delta.arguments,
                    });
                }
            }
        }

        match fragment.delta_text {
            Some(text) if !text.is_empty() => {
                self.message.append_content(&text);
                Some(text)
            }
            _ => None,
        }
    }

    /// 序列结束：解析各调用的参数，得到最终消息
    pub fn finish(self) -> Message {
        let mut message = self.message;
        message.tool_calls = self
            .calls
            .into_iter()
            .map(|c| ToolCallRequest::from_raw(c.id, c.name, &c.arguments))
            .collect();
        message
    }

    /// 消费片段流并写入 sink；流中途出错时丢弃已累积的消息（已转发的文本不撤回）
    pub async fn drain(
        mut self,
        mut stream: FragmentStream,
        sink: &mut dyn OutputSink,
    ) -> Result<Message, HiveError> {
        while let Some(item) = stream.next().await {
            let fragment = item?;
            if let Some(delta) = self.push(fragment) {
                sink.write_chunk(&delta).await?;
            }
        }
        Ok(self.finish())
    }
}

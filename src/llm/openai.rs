//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 DeepSeek、OpenAI、自建代理等。
//! 请求用 async_openai 的 builder 构造，响应与流式 chunk 直接读类型化字段，原生支持 tool calls。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionMessageToolCall, ChatCompletionMessageToolCalls,
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionStreamOptions, ChatCompletionTool,
    ChatCompletionTools, CompletionUsage, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    CreateChatCompletionStreamResponse, FunctionCall, FunctionObjectArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;

use crate::llm::{FragmentStream, LlmClient, LlmError, StatusHint};
use crate::memory::{Message, Role, ToolCallRequest};
use crate::stream::{StreamFragment, ToolCallDelta};
use crate::tools::ToolSpec;

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }

    fn record(&self, usage: &CompletionUsage) {
        self.add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
    }
}

/// OpenAI 兼容客户端：持有 Client 与 model 名
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            usage: TokenUsage::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        stream: bool,
    ) -> Result<CreateChatCompletionRequest, LlmError> {
        build_request(&self.model, messages, tools, stream).map_err(|e| LlmError::InvalidRequest(e.to_string()))
    }
}

/// chat completions 请求；tools 为空时不声明，流式时要求末尾 chunk 带 usage
fn build_request(
    model: &str,
    messages: &[Message],
    tools: &[ToolSpec],
    stream: bool,
) -> Result<CreateChatCompletionRequest, OpenAIError> {
    let messages = messages
        .iter()
        .map(to_openai_message)
        .collect::<Result<Vec<_>, _>>()?;
    let mut args = CreateChatCompletionRequestArgs::default();
    args.model(model).messages(messages);
    if !tools.is_empty() {
        let tools = tools
            .iter()
            .map(to_openai_tool)
            .collect::<Result<Vec<_>, _>>()?;
        args.tools(tools);
    }
    if stream {
        args.stream_options(ChatCompletionStreamOptions {
            include_usage: Some(true),
            include_obfuscation: None,
        });
    }
    args.build()
}

fn to_openai_message(m: &Message) -> Result<ChatCompletionRequestMessage, OpenAIError> {
    let message = match m.role() {
        Role::System => ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(m.content.clone())
                .build()?,
        ),
        Role::User => ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(m.content.clone())
                .build()?,
        ),
        Role::Assistant => {
            let mut args = ChatCompletionRequestAssistantMessageArgs::default();
            // 带 tool_calls 时 content 可省略
            if !m.content.is_empty() || !m.has_tool_calls() {
                args.content(m.content.clone());
            }
            if m.has_tool_calls() {
                args.tool_calls(m.tool_calls.iter().map(to_openai_tool_call).collect::<Vec<_>>());
            }
            ChatCompletionRequestMessage::Assistant(args.build()?)
        }
        Role::Tool => ChatCompletionRequestMessage::Tool(
            ChatCompletionRequestToolMessageArgs::default()
                .content(m.content.clone())
                .tool_call_id(m.tool_call_id.clone().unwrap_or_default())
                .build()?,
        ),
    };
    Ok(message)
}

fn to_openai_tool_call(call: &ToolCallRequest) -> ChatCompletionMessageToolCalls {
    // 参数在 API 中是 JSON 文本；非法参数保持原文
    let arguments = match &call.arguments {
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    };
    ChatCompletionMessageToolCalls::Function(ChatCompletionMessageToolCall {
        id: call.id.clone(),
        function: FunctionCall {
            name: call.name.clone(),
            arguments,
        },
    })
}

fn to_openai_tool(spec: &ToolSpec) -> Result<ChatCompletionTools, OpenAIError> {
    let function = FunctionObjectArgs::default()
        .name(spec.name.clone())
        .description(spec.description.clone())
        .parameters(spec.parameters.clone())
        .build()?;
    Ok(ChatCompletionTools::Function(ChatCompletionTool { function }))
}

/// 首个 choice 转为 assistant 消息
fn parse_reply(response: CreateChatCompletionResponse) -> Result<Message, LlmError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidReply("response has no choices".into()))?;
    let calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| match call {
            ChatCompletionMessageToolCalls::Function(call) => Ok(ToolCallRequest::from_raw(
                call.id,
                call.function.name,
                &call.function.arguments,
            )),
            ChatCompletionMessageToolCalls::Custom(call) => Err(LlmError::InvalidReply(format!(
                "custom tool call `{}` was never declared",
                call.id
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Message::assistant_with_tools(
        choice.message.content.unwrap_or_default(),
        calls,
    ))
}

/// async_openai 错误转为 LlmError；状态优先取错误对象的 code / type，其次 HTTP 状态，最后才看文本
fn map_openai_error(err: OpenAIError) -> LlmError {
    match err {
        OpenAIError::ApiError(api) => {
            let status = StatusHint::from_api_error(api.code.as_deref(), api.r#type.as_deref())
                .unwrap_or_else(|| StatusHint::classify(&api.message));
            LlmError::Provider {
                status,
                message: api.to_string(),
            }
        }
        OpenAIError::Reqwest(e) => {
            let status = if let Some(code) = e.status() {
                StatusHint::from_http(code.as_u16())
            } else if e.is_timeout() {
                StatusHint::Timeout
            } else if e.is_connect() {
                StatusHint::Unavailable
            } else {
                StatusHint::classify(&e.to_string())
            };
            LlmError::Provider {
                status,
                message: e.to_string(),
            }
        }
        OpenAIError::StreamError(e) => LlmError::Stream(e.to_string()),
        OpenAIError::JSONDeserialize(e, _) => LlmError::InvalidReply(e.to_string()),
        OpenAIError::InvalidArgument(msg) => LlmError::InvalidRequest(msg),
        other => LlmError::provider(other.to_string()),
    }
}

/// 流式 chunk 中 tool call 以 index 标识，id 只在首个增量出现；这里统一换成 id
#[derive(Default)]
struct ChunkDecoder {
    ids: HashMap<u32, String>,
}

impl ChunkDecoder {
    fn decode(&mut self, chunk: &CreateChatCompletionStreamResponse) -> StreamFragment {
        let Some(choice) = chunk.choices.first() else {
            return StreamFragment::default();
        };
        let delta = &choice.delta;
        let delta_text = delta.content.clone().filter(|s| !s.is_empty());
        let mut delta_tool_calls = Vec::new();
        for item in delta.tool_calls.iter().flatten() {
            let index = item.index;
            let id = self
                .ids
                .entry(index)
                .or_insert_with(|| match item.id.as_deref().filter(|s| !s.is_empty()) {
                    Some(id) => id.to_string(),
                    None => format!("call_{index}"),
                })
                .clone();
            let function = item.function.as_ref();
            delta_tool_calls.push(ToolCallDelta {
                id,
                name: function
                    .and_then(|f| f.name.clone())
                    .filter(|s| !s.is_empty()),
                arguments: function
                    .and_then(|f| f.arguments.clone())
                    .unwrap_or_default(),
            });
        }
        StreamFragment {
            delta_text,
            delta_tool_calls,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<Message, LlmError> {
        let request = self.build_request(messages, tools, false)?;
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(map_openai_error)?;
        if let Some(usage) = &response.usage {
            self.usage.record(usage);
        }
        parse_reply(response)
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<FragmentStream, LlmError> {
        let request = self.build_request(messages, tools, true)?;
        let stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(map_openai_error)?;
        let usage = self.usage.clone();
        let mut decoder = ChunkDecoder::default();
        let fragments = stream
            .map(move |item| -> Result<StreamFragment, LlmError> {
                let chunk = item.map_err(map_openai_error)?;
                if let Some(u) = &chunk.usage {
                    usage.record(u);
                }
                Ok(decoder.decode(&chunk))
            })
            .filter(|item| {
                let keep = !matches!(item, Ok(f) if f.is_empty());
                async move { keep }
            });
        Ok(Box::pin(fragments))
    }
}

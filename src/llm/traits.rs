//! LLM 客户端抽象（Model Invoker）
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient：complete（非流式，返回完整 assistant 消息）、
//! complete_stream（流式，返回有限且不可重启的 StreamFragment 序列）。

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;
use serde::Serialize;
use thiserror::Error;

use crate::memory::Message;
use crate::stream::StreamFragment;
use crate::tools::ToolSpec;

/// 流式输出：按到达顺序产出片段，出错即终止
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<StreamFragment, LlmError>> + Send>>;

/// provider 错误的 HTTP 风格状态提示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusHint {
    BadRequest,
    Unauthorized,
    NotFound,
    RateLimited,
    Timeout,
    Unavailable,
    Internal,
}

impl StatusHint {
    pub fn as_u16(self) -> u16 {
        match self {
            StatusHint::BadRequest => 400,
            StatusHint::Unauthorized => 401,
            StatusHint::NotFound => 404,
            StatusHint::RateLimited => 429,
            StatusHint::Internal => 500,
            StatusHint::Unavailable => 503,
            StatusHint::Timeout => 504,
        }
    }

    /// 由 HTTP 状态码映射
    pub fn from_http(code: u16) -> Self {
        match code {
            400 | 409 | 413 | 422 => StatusHint::BadRequest,
            401 | 403 => StatusHint::Unauthorized,
            404 => StatusHint::NotFound,
            429 => StatusHint::RateLimited,
            408 | 504 => StatusHint::Timeout,
            502 | 503 => StatusHint::Unavailable,
            _ => StatusHint::Internal,
        }
    }

    /// 由 OpenAI 风格错误对象的 code / type 字段映射；code 优先，二者都不认识时返回 None
    pub fn from_api_error(code: Option<&str>, kind: Option<&str>) -> Option<Self> {
        let by_code = code.and_then(|c| match c {
            "model_not_found" | "not_found" => Some(StatusHint::NotFound),
            "rate_limit_exceeded" | "insufficient_quota" => Some(StatusHint::RateLimited),
            "invalid_api_key" | "invalid_authentication" | "unauthorized" => Some(StatusHint::Unauthorized),
            "context_length_exceeded" | "invalid_value" | "invalid_request" => Some(StatusHint::BadRequest),
            "server_error" | "overloaded" | "service_unavailable" => Some(StatusHint::Unavailable),
            "timeout" => Some(StatusHint::Timeout),
            _ => None,
        });
        by_code.or_else(|| {
            kind.and_then(|k| match k {
                "invalid_request_error" => Some(StatusHint::BadRequest),
                "authentication_error" | "permission_error" => Some(StatusHint::Unauthorized),
                "not_found_error" => Some(StatusHint::NotFound),
                "rate_limit_error" | "insufficient_quota" => Some(StatusHint::RateLimited),
                "server_error" | "overloaded_error" | "service_unavailable_error" => Some(StatusHint::Unavailable),
                _ => None,
            })
        })
    }

    /// 只有错误文本可用时的兜底推断：按单词匹配，数字须是完整的状态码
    pub fn classify(message: &str) -> Self {
        let m = message.to_lowercase();
        let words: Vec<&str> = m
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .filter(|w| !w.is_empty())
            .collect();
        if let Some(code) = words.iter().find_map(|w| match *w {
            "400" | "401" | "403" | "404" | "408" | "429" | "500" | "502" | "503" | "504" => w.parse().ok(),
            _ => None,
        }) {
            return Self::from_http(code);
        }
        if let Some(hint) = words
            .iter()
            .find_map(|w| Self::from_api_error(Some(w), Some(w)))
        {
            return hint;
        }
        if m.contains("rate limit") {
            StatusHint::RateLimited
        } else if m.contains("not found") || m.contains("does not exist") {
            StatusHint::NotFound
        } else if m.contains("api key") || words.contains(&"unauthorized") {
            StatusHint::Unauthorized
        } else if m.contains("timed out") || words.contains(&"timeout") {
            StatusHint::Timeout
        } else if words.contains(&"overloaded") || m.contains("connection refused") {
            StatusHint::Unavailable
        } else {
            StatusHint::Internal
        }
    }
}

impl std::fmt::Display for StatusHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// 模型调用失败
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("provider error ({status}): {message}")]
    Provider { status: StatusHint, message: String },

    #[error("model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("stream interrupted: {0}")]
    Stream(String),

    #[error("invalid model reply: {0}")]
    InvalidReply(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl LlmError {
    /// 只有错误文本时构造，状态码按文本兜底推断
    pub fn provider(message: impl Into<String>) -> Self {
        let message = message.into();
        LlmError::Provider {
            status: StatusHint::classify(&message),
            message,
        }
    }

    pub fn status(&self) -> StatusHint {
        match self {
            LlmError::Provider { status, .. } => *status,
            LlmError::Timeout(_) => StatusHint::Timeout,
            LlmError::InvalidRequest(_) => StatusHint::BadRequest,
            LlmError::Stream(_) | LlmError::InvalidReply(_) => StatusHint::Internal,
        }
    }
}

/// LLM 客户端 trait：非流式完成与流式完成
///
/// `tools` 为空表示本会话未启用工具，请求中不声明 tool schema。
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成：返回完整 assistant 消息（可能带 tool_calls）
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<Message, LlmError>;

    /// 流式完成，返回片段流
    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<FragmentStream, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

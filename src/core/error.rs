//! 会话错误分类
//!
//! - 输入错误：会话创建前拒绝，不重试
//! - 模型错误：终止循环（Failed），携带 provider 的状态码提示
//! - 工具错误：不在此处出现，由执行器编码进 ToolResult
//! - 生命周期错误：工具池获取失败在循环开始前中止；释放失败只记录日志
//! - 传输错误：写调用方 sink 失败，立即中止

use thiserror::Error;

use crate::llm::LlmError;
use crate::stream::SinkError;
use crate::tools::ToolError;

/// 请求本身不合法（空会话、孤立的 ToolResult 等）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("transcript is empty")]
    EmptyTranscript,

    #[error("tool result answers unknown tool call id `{0}`")]
    OrphanToolResult(String),

    #[error("duplicate tool call id `{0}` within one assistant turn")]
    DuplicateToolCallId(String),

    #[error("only assistant messages may carry tool calls")]
    UnexpectedToolCalls,

    #[error("unknown tool group `{0}`")]
    UnknownToolGroup(String),
}

/// 一次会话运行可能出现的致命错误
#[derive(Error, Debug)]
pub enum HiveError {
    #[error("invalid request: {0}")]
    Input(#[from] InputError),

    #[error("model invocation failed: {0}")]
    Model(#[from] LlmError),

    #[error("tool pool unavailable: {0}")]
    Lifecycle(#[source] ToolError),

    #[error("output stream failed: {0}")]
    Transport(#[from] SinkError),

    #[error("turn limit of {0} model calls reached")]
    TurnLimitExceeded(usize),

    #[error("session cancelled")]
    Cancelled,
}

impl HiveError {
    /// HTTP 风格状态码（供 Dispatcher 映射响应）
    pub fn status_code(&self) -> u16 {
        match self {
            HiveError::Input(_) => 400,
            HiveError::Model(e) => e.status().as_u16(),
            HiveError::Lifecycle(_) => 503,
            HiveError::Transport(_) | HiveError::TurnLimitExceeded(_) => 500,
            // 客户端主动断开（nginx 约定）
            HiveError::Cancelled => 499,
        }
    }

    /// 错误类别名（写入事件流与日志）
    pub fn kind(&self) -> &'static str {
        match self {
            HiveError::Input(_) => "input",
            HiveError::Model(_) => "model",
            HiveError::Lifecycle(_) => "lifecycle",
            HiveError::Transport(_) => "transport",
            HiveError::TurnLimitExceeded(_) => "turn_limit",
            HiveError::Cancelled => "cancelled",
        }
    }
}

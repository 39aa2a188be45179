//! Hive - 对话编排引擎
//!
//! 在语言模型与可插拔的外部工具之间交替推进一次对话，边生成边把文本流式写给调用方，
//! 并逐回合判断对话是否结束。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、编排状态机、会话生命周期、编排循环、关闭信号
//! - **dispatch**: 请求分发（校验、会话创建、JSON / 流式回复）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 会话记录（消息、角色、工具调用）
//! - **observability**: 日志初始化
//! - **stream**: 流式片段合并、调用方 sink、会话事件
//! - **tools**: 工具组、工具池与执行器
//! - **server**: HTTP 接口（feature = "web"）

pub mod config;
pub mod core;
pub mod dispatch;
pub mod llm;
pub mod memory;
pub mod observability;
#[cfg(feature = "web")]
pub mod server;
pub mod stream;
pub mod tools;

pub use crate::core::{run_session, HiveError, Session, SessionConfig, SessionReport};
pub use crate::dispatch::{ChatReply, ChatRequest, Dispatcher};

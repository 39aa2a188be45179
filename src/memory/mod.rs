//! 记忆层：单次会话内的短期记忆（Transcript），不做跨会话持久化

pub mod conversation;

pub use conversation::{Message, Role, ToolCallRequest, Transcript};

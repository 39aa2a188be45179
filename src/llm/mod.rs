//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock / 脚本化）

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod provider;
pub mod traits;

pub use deepseek::{create_deepseek_client, DEEPSEEK_BASE_URL, DEEPSEEK_CHAT};
pub use mock::{message_to_fragments, MockLlmClient, RecordedCall, ScriptedLlmClient, ScriptedReply};
pub use openai::{OpenAiClient, TokenUsage};
pub use provider::{create_provider, Provider};
pub use traits::{FragmentStream, LlmClient, LlmError, StatusHint};

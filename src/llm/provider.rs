//! 后端选择：启动时按配置选定一次，之后以枚举分派
//!
//! provider = "deepseek" | "openai" | "mock"；其余值视为配置错误。

use async_trait::async_trait;

use crate::config::LlmSection;
use crate::llm::{
    create_deepseek_client, FragmentStream, LlmClient, LlmError, MockLlmClient, OpenAiClient,
};
use crate::memory::Message;
use crate::tools::ToolSpec;

pub enum Provider {
    OpenAi(OpenAiClient),
    Mock(MockLlmClient),
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAi(_) => "openai",
            Provider::Mock(_) => "mock",
        }
    }
}

/// 按 [llm] 段创建后端；API Key 从 api_key_env 指定的环境变量读取
pub fn create_provider(cfg: &LlmSection) -> Result<Provider, LlmError> {
    let api_key = cfg
        .api_key_env
        .as_deref()
        .and_then(|name| std::env::var(name).ok());
    match cfg.provider.to_lowercase().as_str() {
        "deepseek" => Ok(Provider::OpenAi(create_deepseek_client(
            cfg.base_url.as_deref(),
            Some(&cfg.model),
            api_key.as_deref(),
        ))),
        "openai" => Ok(Provider::OpenAi(OpenAiClient::new(
            cfg.base_url.as_deref(),
            &cfg.model,
            api_key.as_deref(),
        ))),
        "mock" => Ok(Provider::Mock(MockLlmClient)),
        other => Err(LlmError::InvalidRequest(format!("unknown llm provider `{other}`"))),
    }
}

#[async_trait]
impl LlmClient for Provider {
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<Message, LlmError> {
        match self {
            Provider::OpenAi(c) => c.complete(messages, tools).await,
            Provider::Mock(c) => c.complete(messages, tools).await,
        }
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<FragmentStream, LlmError> {
        match self {
            Provider::OpenAi(c) => c.complete_stream(messages, tools).await,
            Provider::Mock(c) => c.complete_stream(messages, tools).await,
        }
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        match self {
            Provider::OpenAi(c) => c.token_usage(),
            Provider::Mock(c) => c.token_usage(),
        }
    }
}

//! 会话生命周期
//!
//! 创建时先校验会话记录，再按启用的工具组获取工具池并缓存工具列表；
//! 工具池在 Done / Failed / 取消时恰好释放一次，释放失败只记日志。
//! 未显式释放就被丢弃的会话（如所在任务被 abort）由 Drop 在当前运行时上补做释放。

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::core::HiveError;
use crate::memory::Transcript;
use crate::tools::{ToolError, ToolPool, ToolPoolFactory, ToolSpec};

/// 单次会话的运行参数
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// 模型调用次数上限
    pub max_turns: usize,
    /// 非流式模型调用超时
    pub model_timeout: Duration,
    /// 流式模型调用（含读完全部片段）超时
    pub stream_timeout: Duration,
    /// 单次工具调用超时
    pub tool_timeout: Duration,
    pub streaming: bool,
    pub parallel_tool_calls: bool,
    /// 启用的工具组
    pub groups: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_app(&AppConfig::default())
    }
}

impl SessionConfig {
    pub fn from_app(cfg: &AppConfig) -> Self {
        Self {
            max_turns: cfg.session.max_turns.max(1),
            model_timeout: Duration::from_secs(cfg.llm.timeouts.request),
            stream_timeout: Duration::from_secs(cfg.llm.timeouts.stream),
            tool_timeout: cfg.tools.tool_timeout(),
            streaming: cfg.session.streaming,
            parallel_tool_calls: cfg.session.parallel_tool_calls,
            groups: cfg.session.default_groups.clone(),
        }
    }
}

/// 一次会话：会话记录 + 独占的工具池 + 取消令牌
pub struct Session {
    id: String,
    transcript: Transcript,
    pool: Option<Box<dyn ToolPool>>,
    tools: Vec<ToolSpec>,
    config: SessionConfig,
    cancel: CancellationToken,
}

impl Session {
    /// 校验输入并获取工具池；任何失败都发生在会话循环开始之前
    pub async fn open(
        factory: &dyn ToolPoolFactory,
        transcript: Transcript,
        config: SessionConfig,
        cancel: CancellationToken,
    ) -> Result<Self, HiveError> {
        transcript.validate()?;

        let pool = factory
            .acquire(&config.groups)
            .await
            .map_err(HiveError::Lifecycle)?;
        let tools = match pool.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                if let Err(close_err) = pool.close().await {
                    warn!(error = %close_err, "failed to close tool pool after listing failed");
                }
                return Err(HiveError::Lifecycle(e));
            }
        };

        let id = uuid::Uuid::new_v4().to_string();
        info!(session_id = %id, groups = ?config.groups, tools = tools.len(), "session opened");
        Ok(Self {
            id,
            transcript,
            pool: Some(pool),
            tools,
            config,
            cancel,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub(crate) fn transcript_mut(&mut self) -> &mut Transcript {
        &mut self.transcript
    }

    pub(crate) fn take_transcript(&mut self) -> Transcript {
        std::mem::take(&mut self.transcript)
    }

    /// 声明给模型的工具
    pub fn tools(&self) -> &[ToolSpec] {
        &self.tools
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn pool(&self) -> Result<&dyn ToolPool, ToolError> {
        self.pool.as_deref().ok_or(ToolError::Closed)
    }

    #[cfg(test)]
    fn is_released(&self) -> bool {
        self.pool.is_none()
    }

    /// 释放工具池；幂等，失败只记日志
    pub async fn release(&mut self) {
        if let Some(pool) = self.pool.take() {
            match pool.close().await {
                Ok(()) => info!(session_id = %self.id, "session released"),
                Err(e) => warn!(session_id = %self.id, error = %e, "failed to release tool pool"),
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let Some(pool) = self.pool.take() else { return };
        let id = std::mem::take(&mut self.id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = pool.close().await {
                        warn!(session_id = %id, error = %e, "failed to release tool pool on drop");
                    }
                });
            }
            Err(_) => warn!(session_id = %id, "session dropped outside a runtime, tool pool not closed"),
        }
    }
}

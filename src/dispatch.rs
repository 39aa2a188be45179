//! 请求分发：把调用方请求变成一次会话
//!
//! 校验输入（会话记录、工具组名）→ 按配置与请求覆盖项得到 SessionConfig → 打开会话 → 运行编排循环；
//! 非流式返回单个 JSON 回复，流式把文本与过程事件写入调用方 sink。
//! 错误统一为 HiveError，由上层按 status_code 映射为响应状态。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{run_session, HiveError, InputError, Session, SessionConfig, SessionReport};
use crate::llm::{create_provider, LlmClient, LlmError};
use crate::memory::{Message, Transcript};
use crate::stream::{NullSink, OutputSink};
use crate::tools::{ConfiguredPools, ToolPoolFactory, ToolSpec};

/// 一次对话请求
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    /// 启用的工具组；缺省为配置的 session.default_groups
    #[serde(default)]
    pub tool_groups: Option<Vec<String>>,
    /// 是否以流式调用模型；缺省为配置的 session.streaming
    #[serde(default)]
    pub stream: Option<bool>,
    /// 模型调用次数上限，不能超过配置值
    #[serde(default)]
    pub max_turns: Option<usize>,
    #[serde(default)]
    pub parallel_tool_calls: Option<bool>,
}

impl ChatRequest {
    /// 单条用户消息的请求
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(text)],
            ..Self::default()
        }
    }
}

/// 非流式回复
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub session_id: String,
    pub reply: String,
    /// 完整会话记录（含工具调用与结果）
    pub messages: Vec<Message>,
    pub turns: usize,
}

impl TryFrom<SessionReport> for ChatReply {
    type Error = HiveError;

    fn try_from(report: SessionReport) -> Result<Self, HiveError> {
        let session_id = report.session_id.clone();
        let turns = report.turns;
        let transcript = report.into_result()?;
        Ok(Self {
            session_id,
            reply: transcript.final_reply().unwrap_or_default().to_string(),
            messages: transcript.into_messages(),
            turns,
        })
    }
}

pub struct Dispatcher {
    config: AppConfig,
    llm: Arc<dyn LlmClient>,
    pools: Arc<dyn ToolPoolFactory>,
}

impl Dispatcher {
    pub fn new(config: AppConfig, llm: Arc<dyn LlmClient>, pools: Arc<dyn ToolPoolFactory>) -> Self {
        Self { config, llm, pools }
    }

    /// 按配置选择模型后端并创建工具组工厂
    pub fn from_config(config: AppConfig) -> Result<Self, LlmError> {
        let provider = create_provider(&config.llm)?;
        tracing::info!(provider = provider.name(), model = %config.llm.model, "llm provider selected");
        let pools = ConfiguredPools::new(&config.tools);
        Ok(Self::new(config, Arc::new(provider), Arc::new(pools)))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.llm
    }

    /// 校验请求并得到会话记录与运行参数；此处失败的请求不会创建会话
    pub fn prepare(&self, req: ChatRequest) -> Result<(Transcript, SessionConfig), HiveError> {
        let mut config = SessionConfig::from_app(&self.config);
        if let Some(groups) = req.tool_groups {
            config.groups = groups;
        }
        self.check_groups(&config.groups)?;
        if let Some(streaming) = req.stream {
            config.streaming = streaming;
        }
        if let Some(parallel) = req.parallel_tool_calls {
            config.parallel_tool_calls = parallel;
        }
        if let Some(max_turns) = req.max_turns {
            config.max_turns = max_turns.clamp(1, config.max_turns);
        }

        let mut transcript = Transcript::from(req.messages);
        transcript.validate()?;
        if let Some(prompt) = &self.config.session.system_prompt {
            transcript.ensure_system_prompt(prompt);
        }
        Ok((transcript, config))
    }

    fn check_groups(&self, groups: &[String]) -> Result<(), InputError> {
        let known = self.pools.group_names();
        match groups.iter().find(|g| !known.contains(g)) {
            Some(unknown) => Err(InputError::UnknownToolGroup(unknown.clone())),
            None => Ok(()),
        }
    }

    /// 校验并打开会话（获取工具池）
    pub async fn open(&self, req: ChatRequest, cancel: CancellationToken) -> Result<Session, HiveError> {
        let (transcript, config) = self.prepare(req)?;
        Session::open(self.pools.as_ref(), transcript, config, cancel).await
    }

    /// 运行已打开的会话
    pub async fn run(&self, session: Session, sink: &mut dyn OutputSink) -> SessionReport {
        run_session(self.llm.as_ref(), session, sink).await
    }

    /// 非流式：跑完整个会话后返回最终回复
    pub async fn chat(&self, req: ChatRequest, cancel: CancellationToken) -> Result<ChatReply, HiveError> {
        let session = self.open(req, cancel).await?;
        ChatReply::try_from(self.run(session, &mut NullSink).await)
    }

    /// 流式：文本片段与过程事件写入 sink；会话创建前的错误直接返回，不写 sink
    pub async fn chat_stream(
        &self,
        req: ChatRequest,
        sink: &mut dyn OutputSink,
        cancel: CancellationToken,
    ) -> Result<SessionReport, HiveError> {
        let session = self.open(req, cancel).await?;
        Ok(self.run(session, sink).await)
    }

    /// 列出若干工具组合并后的工具（临时获取工具池，列完即释放）
    pub async fn list_tools(&self, groups: &[String]) -> Result<Vec<ToolSpec>, HiveError> {
        self.check_groups(groups)?;
        let pool = self.pools.acquire(groups).await.map_err(HiveError::Lifecycle)?;
        let tools = pool.list_tools().await;
        if let Err(e) = pool.close().await {
            tracing::warn!(error = %e, "failed to close tool pool after listing");
        }
        tools.map_err(HiveError::Lifecycle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::{FakeTool, RecordingFactory};
    use crate::llm::{ScriptedLlmClient, ScriptedReply};
    use crate::memory::{Role, ToolCallRequest};
    use crate::stream::{BufferSink, SessionEvent};
    use std::sync::atomic::Ordering;

    fn dispatcher(llm: ScriptedLlmClient, factory: RecordingFactory) -> (Dispatcher, Arc<ScriptedLlmClient>, Arc<RecordingFactory>) {
        let mut config = AppConfig::default();
        config.session.system_prompt = Some("You are hive.".into());
        let llm = Arc::new(llm);
        let factory = Arc::new(factory);
        (Dispatcher::new(config, llm.clone(), factory.clone()), llm, factory)
    }

    #[tokio::test]
    async fn test_chat_returns_final_reply() {
        let (d, llm, factory) = dispatcher(
            ScriptedLlmClient::new(vec![
                ScriptedReply::Message(Message::assistant_with_tools(
                    "",
                    vec![ToolCallRequest::new("c1", "echo", serde_json::json!({"text": "x"}))],
                )),
                ScriptedReply::Message(Message::assistant("done")),
            ]),
            RecordingFactory::new(vec![("echo", FakeTool::Reply("x".into()))]),
        );
        let req = ChatRequest {
            tool_groups: Some(vec!["fake".into()]),
            ..ChatRequest::user("say x")
        };
        let reply = d.chat(req, CancellationToken::new()).await.unwrap();
        assert_eq!(reply.reply, "done");
        assert_eq!(reply.turns, 2);
        assert_eq!(reply.messages[0].role(), Role::System);
        assert_eq!(reply.messages.len(), 5);
        assert_eq!(llm.calls()[0].tools, vec!["echo".to_string()]);
        assert_eq!(factory.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_group_is_input_error() {
        let (d, llm, factory) = dispatcher(ScriptedLlmClient::new(vec![]), RecordingFactory::new(vec![]));
        let req = ChatRequest {
            tool_groups: Some(vec!["nope".into()]),
            ..ChatRequest::user("hi")
        };
        let err = d.chat(req, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, HiveError::Input(InputError::UnknownToolGroup(ref g)) if g == "nope"));
        assert_eq!(err.status_code(), 400);
        assert_eq!(llm.call_count(), 0);
        assert_eq!(factory.acquires.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_messages_rejected() {
        let (d, _, _) = dispatcher(ScriptedLlmClient::new(vec![]), RecordingFactory::new(vec![]));
        let err = d.chat(ChatRequest::default(), CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, HiveError::Input(InputError::EmptyTranscript)));
    }

    #[test]
    fn test_prepare_applies_overrides() {
        let (d, _, _) = dispatcher(ScriptedLlmClient::new(vec![]), RecordingFactory::new(vec![]));
        let req = ChatRequest {
            stream: Some(false),
            max_turns: Some(500),
            parallel_tool_calls: Some(true),
            ..ChatRequest::user("hi")
        };
        let (transcript, config) = d.prepare(req).unwrap();
        assert!(!config.streaming);
        assert!(config.parallel_tool_calls);
        assert_eq!(config.max_turns, 20);
        assert_eq!(transcript.len(), 2);
    }

    #[tokio::test]
    async fn test_chat_stream_writes_events() {
        let (d, _, _) = dispatcher(
            ScriptedLlmClient::new(vec![ScriptedReply::Message(Message::assistant("He llo"))]),
            RecordingFactory::new(vec![]),
        );
        let mut sink = BufferSink::default();
        let report = d
            .chat_stream(ChatRequest::user("hi"), &mut sink, CancellationToken::new())
            .await
            .unwrap();
        assert!(report.outcome.is_ok());
        assert_eq!(sink.chunks, vec!["He ".to_string(), "llo".to_string()]);
        assert!(matches!(sink.events.first(), Some(SessionEvent::SessionStarted { .. })));
    }

    #[tokio::test]
    async fn test_model_failure_maps_status() {
        let (d, _, _) = dispatcher(
            ScriptedLlmClient::new(vec![ScriptedReply::Error(LlmError::provider("429 rate limit exceeded"))]),
            RecordingFactory::new(vec![]),
        );
        let err = d.chat(ChatRequest::user("hi"), CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.status_code(), 429);
    }

    #[tokio::test]
    async fn test_list_tools_releases_pool() {
        let (d, _, factory) = dispatcher(
            ScriptedLlmClient::new(vec![]),
            RecordingFactory::new(vec![("echo", FakeTool::Reply("x".into()))]),
        );
        let tools = d.list_tools(&["fake".to_string()]).await.unwrap();
        assert_eq!(tools[0].name, "echo");
        assert_eq!(factory.closes.load(Ordering::SeqCst), 1);
    }
}

//! 编排集成测试：脚本化模型 + 记录调用的工具池，只经由公开 API

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hive::core::{LoopState, SessionConfig};
use hive::llm::{LlmError, ScriptedLlmClient, ScriptedReply, StatusHint};
use hive::memory::{Message, Role, ToolCallRequest, Transcript};
use hive::stream::{BufferSink, SessionEvent, StreamFragment};
use hive::tools::{ToolError, ToolPool, ToolPoolFactory, ToolSpec};
use hive::{run_session, ChatRequest, Dispatcher, HiveError, Session};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

/// list_files 返回固定文本，broken 总是失败
#[derive(Default)]
struct FilesPool {
    invoked: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl ToolPool for FilesPool {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError> {
        Ok(vec![
            ToolSpec::new("list_files", "List files", json!({"type": "object"})),
            ToolSpec::new("broken", "Always fails", json!({"type": "object"})),
        ])
    }

    async fn invoke(&self, name: &str, _arguments: Value) -> Result<String, ToolError> {
        self.invoked.lock().unwrap().push(name.to_string());
        match name {
            "list_files" => Ok("a.txt, b.txt".to_string()),
            "broken" => Err(ToolError::Execution("disk unavailable".into())),
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    async fn close(&self) -> Result<(), ToolError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct FilesFactory {
    invoked: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl ToolPoolFactory for FilesFactory {
    fn group_names(&self) -> Vec<String> {
        vec!["files".to_string()]
    }

    async fn acquire(&self, _groups: &[String]) -> Result<Box<dyn ToolPool>, ToolError> {
        Ok(Box::new(FilesPool {
            invoked: self.invoked.clone(),
            closed: self.closed.clone(),
        }))
    }
}

fn call(id: &str, name: &str) -> ToolCallRequest {
    ToolCallRequest::new(id, name, json!({}))
}

async fn open(factory: &FilesFactory, config: SessionConfig) -> Session {
    Session::open(
        factory,
        Transcript::from(vec![Message::user("what files do I have?")]),
        config,
        CancellationToken::new(),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_scenario_plain_question() {
    let factory = FilesFactory::default();
    let llm = ScriptedLlmClient::new(vec![ScriptedReply::Message(Message::assistant("Hello!"))]);
    let mut sink = BufferSink::default();
    let report = run_session(&llm, open(&factory, SessionConfig::default()).await, &mut sink).await;

    assert_eq!(report.state, LoopState::Done);
    assert_eq!(llm.call_count(), 1);
    assert_eq!(report.transcript.final_reply(), Some("Hello!"));
    assert_eq!(factory.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_scenario_single_tool_round() {
    let factory = FilesFactory::default();
    let llm = ScriptedLlmClient::new(vec![
        ScriptedReply::Message(Message::assistant_with_tools("", vec![call("c1", "list_files")])),
        ScriptedReply::Message(Message::assistant("You have a.txt and b.txt.")),
    ]);
    let report = run_session(&llm, open(&factory, SessionConfig::default()).await, &mut BufferSink::default()).await;

    assert_eq!(report.state, LoopState::Done);
    let roles: Vec<Role> = report.transcript.messages().iter().map(|m| m.role()).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
    assert_eq!(report.transcript.messages()[2].content, "a.txt, b.txt");
    assert_eq!(*factory.invoked.lock().unwrap(), vec!["list_files".to_string()]);
}

#[tokio::test]
async fn test_scenario_streamed_fragments() {
    let factory = FilesFactory::default();
    let llm = ScriptedLlmClient::new(vec![ScriptedReply::Fragments(vec![
        Ok(StreamFragment::text("He")),
        Ok(StreamFragment::text("llo")),
    ])]);
    let mut sink = BufferSink::default();
    let report = run_session(&llm, open(&factory, SessionConfig::default()).await, &mut sink).await;

    assert_eq!(sink.chunks, vec!["He".to_string(), "llo".to_string()]);
    assert_eq!(report.transcript.final_reply(), Some("Hello"));
    assert!(sink.ended);
}

#[tokio::test]
async fn test_scenario_model_not_found() {
    let factory = FilesFactory::default();
    let llm = ScriptedLlmClient::new(vec![ScriptedReply::Error(LlmError::Provider {
        status: StatusHint::NotFound,
        message: "model does not exist".into(),
    })]);
    let report = run_session(&llm, open(&factory, SessionConfig::default()).await, &mut BufferSink::default()).await;

    assert_eq!(report.state, LoopState::Failed);
    assert_eq!(report.outcome.as_ref().unwrap_err().status_code(), 404);
    assert_eq!(factory.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_tool_is_reported_to_model() {
    let factory = FilesFactory::default();
    let llm = ScriptedLlmClient::new(vec![
        ScriptedReply::Message(Message::assistant_with_tools(
            "",
            vec![call("c1", "broken"), call("c2", "list_files")],
        )),
        ScriptedReply::Message(Message::assistant("One tool failed.")),
    ]);
    let report = run_session(&llm, open(&factory, SessionConfig::default()).await, &mut BufferSink::default()).await;

    assert_eq!(report.state, LoopState::Done);
    let seen = &llm.calls()[1].messages;
    assert_eq!(seen.len(), 4);
    assert!(seen[2].is_error);
    assert_eq!(seen[2].tool_call_id.as_deref(), Some("c1"));
    assert!(!seen[3].is_error);
}

#[tokio::test]
async fn test_streamed_tool_call_with_split_arguments() {
    let factory = FilesFactory::default();
    let llm = ScriptedLlmClient::new(vec![
        ScriptedReply::Fragments(vec![
            Ok(StreamFragment::text("Let me look. ")),
            Ok(StreamFragment::tool_call("c1", Some("list_files"), "{\"pa")),
            Ok(StreamFragment::tool_call("c1", None, "th\":\".\"}")),
        ]),
        ScriptedReply::Message(Message::assistant("Two files.")),
    ]);
    let mut sink = BufferSink::default();
    let report = run_session(&llm, open(&factory, SessionConfig::default()).await, &mut sink).await;

    let assistant = &report.transcript.messages()[1];
    assert_eq!(assistant.tool_calls[0].arguments, json!({"path": "."}));
    assert_eq!(sink.text(), "Let me look. Two files.");
    let kinds: Vec<&SessionEvent> = sink
        .events
        .iter()
        .filter(|e| matches!(e, SessionEvent::ToolCall { .. } | SessionEvent::ToolResult { .. }))
        .collect();
    assert_eq!(kinds.len(), 2);
}

#[tokio::test]
async fn test_dispatcher_end_to_end() {
    let factory = Arc::new(FilesFactory::default());
    let llm = Arc::new(ScriptedLlmClient::new(vec![
        ScriptedReply::Message(Message::assistant_with_tools("", vec![call("c1", "list_files")])),
        ScriptedReply::Message(Message::assistant("a.txt and b.txt")),
    ]));
    let dispatcher = Dispatcher::new(Default::default(), llm.clone(), factory.clone());
    let req = ChatRequest {
        tool_groups: Some(vec!["files".into()]),
        ..ChatRequest::user("list")
    };
    let reply = dispatcher.chat(req, CancellationToken::new()).await.unwrap();
    assert_eq!(reply.reply, "a.txt and b.txt");
    assert_eq!(llm.calls()[0].tools, vec!["list_files".to_string(), "broken".to_string()]);

    let orphan = ChatRequest {
        messages: vec![Message::user("hi"), Message::tool_result("zzz", "late")],
        ..ChatRequest::default()
    };
    let err = dispatcher.chat(orphan, CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, HiveError::Input(_)));
    assert_eq!(factory.closed.load(Ordering::SeqCst), 1);
}

//! 编排循环：在模型与工具之间交替，直到模型不再请求工具
//!
//! 每回合：调用模型（流式时经 StreamMerger 边收边转发）→ 追加 assistant 消息 →
//! 若有 tool calls，按请求顺序逐个（或并发后按序）执行并追加 ToolResult → 下一回合。
//! 每次模型调用与每次工具调用各自带超时；取消令牌触发后立即停止推进并释放工具池。

use futures_util::future::join_all;
use tokio::time::timeout;
use tracing::{info, warn, Instrument};

use crate::core::state::{transition, LoopEvent, LoopState};
use crate::core::{HiveError, Session};
use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, ToolCallRequest, Transcript};
use crate::stream::events::preview;
use crate::stream::{OutputSink, SessionEvent, StreamMerger};
use crate::tools::{ToolExecutor, ToolPool};

const RESULT_PREVIEW_CHARS: usize = 200;

/// 一次会话运行的结果
#[derive(Debug)]
pub struct SessionReport {
    pub session_id: String,
    pub transcript: Transcript,
    /// 实际调用模型的次数
    pub turns: usize,
    pub state: LoopState,
    pub outcome: Result<(), HiveError>,
}

impl SessionReport {
    pub fn into_result(self) -> Result<Transcript, HiveError> {
        self.outcome.map(|()| self.transcript)
    }
}

/// 运行会话直到终态；无论成功、失败还是取消，返回前都会释放工具池并结束 sink
pub async fn run_session(llm: &dyn LlmClient, mut session: Session, sink: &mut dyn OutputSink) -> SessionReport {
    let span = tracing::info_span!("session", id = %session.id());
    async move {
        let mut state = LoopState::AwaitingModel;
        let mut turns = 0;

        let mut outcome = drive(llm, &mut session, sink, &mut state, &mut turns).await;

        match &outcome {
            Ok(()) => {
                info!(turns, "session done");
                if let Err(e) = sink.emit(&SessionEvent::Done { turns }).await {
                    outcome = Err(e.into());
                }
            }
            Err(e) => {
                warn!(kind = e.kind(), error = %e, turns, "session failed");
                if !matches!(e, HiveError::Transport(_)) {
                    let event = SessionEvent::Error {
                        kind: e.kind().to_string(),
                        status: e.status_code(),
                        text: e.to_string(),
                    };
                    let _ = sink.emit(&event).await;
                }
            }
        }

        session.release().await;

        if let Err(e) = sink.end().await {
            if outcome.is_ok() {
                outcome = Err(e.into());
            }
        }
        if outcome.is_err() {
            state = transition(state, LoopEvent::Fatal);
        }

        SessionReport {
            session_id: session.id().to_string(),
            transcript: session.take_transcript(),
            turns,
            state,
            outcome,
        }
    }
    .instrument(span)
    .await
}

async fn drive(
    llm: &dyn LlmClient,
    session: &mut Session,
    sink: &mut dyn OutputSink,
    state: &mut LoopState,
    turns: &mut usize,
) -> Result<(), HiveError> {
    let cancel = session.cancel_token();
    let max_turns = session.config().max_turns;
    let executor = ToolExecutor::new(session.config().tool_timeout);

    sink.emit(&SessionEvent::SessionStarted {
        session_id: session.id().to_string(),
        tools: session.tools().iter().map(|t| t.name.clone()).collect(),
    })
    .await?;

    loop {
        if !state.is_terminal() && cancel.is_cancelled() {
            return Err(HiveError::Cancelled);
        }
        match *state {
            LoopState::AwaitingModel => {
                if *turns >= max_turns {
                    return Err(HiveError::TurnLimitExceeded(max_turns));
                }
                *turns += 1;
                sink.emit(&SessionEvent::TurnStarted {
                    turn: *turns,
                    max_turns,
                })
                .await?;

                let reply = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(HiveError::Cancelled),
                    reply = invoke_model(llm, session, sink) => reply?,
                };
                if let Some(id) = reply.duplicate_tool_call_id() {
                    return Err(LlmError::InvalidReply(format!("duplicate tool call id `{id}`")).into());
                }
                sink.emit(&SessionEvent::MessageDone).await?;

                let has_tool_calls = reply.has_tool_calls();
                session.transcript_mut().push(reply);
                *state = transition(*state, LoopEvent::ModelReplied { has_tool_calls });
            }
            LoopState::AwaitingTools => {
                let calls = session
                    .transcript()
                    .last()
                    .map(|m| m.tool_calls.clone())
                    .unwrap_or_default();
                let pool = session.pool().map_err(HiveError::Lifecycle)?;
                let parallel = session.config().parallel_tool_calls;

                let results = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(HiveError::Cancelled),
                    results = run_tools(&executor, pool, &calls, parallel, sink) => results?,
                };
                for result in results {
                    session.transcript_mut().push(result);
                }
                *state = transition(*state, LoopEvent::ToolsCompleted);
            }
            LoopState::Done | LoopState::Failed => return Ok(()),
        }
    }
}

/// 调用模型一次；流式时片段文本边到边写入 sink，非流式时完整内容作为一段写入
async fn invoke_model(llm: &dyn LlmClient, session: &Session, sink: &mut dyn OutputSink) -> Result<Message, HiveError> {
    let config = session.config();
    if config.streaming {
        timeout(config.stream_timeout, stream_reply(llm, session, sink))
            .await
            .map_err(|_| LlmError::Timeout(config.stream_timeout))?
    } else {
        let reply = timeout(
            config.model_timeout,
            llm.complete(session.transcript().messages(), session.tools()),
        )
        .await
        .map_err(|_| LlmError::Timeout(config.model_timeout))??;
        if !reply.content.is_empty() {
            sink.write_chunk(&reply.content).await?;
        }
        Ok(reply)
    }
}

async fn stream_reply(llm: &dyn LlmClient, session: &Session, sink: &mut dyn OutputSink) -> Result<Message, HiveError> {
    let stream = llm
        .complete_stream(session.transcript().messages(), session.tools())
        .await?;
    StreamMerger::new().drain(stream, sink).await
}

/// 执行本回合全部 tool call，结果按请求顺序返回（每个调用恰好一个 ToolResult）
async fn run_tools(
    executor: &ToolExecutor,
    pool: &dyn ToolPool,
    calls: &[ToolCallRequest],
    parallel: bool,
    sink: &mut dyn OutputSink,
) -> Result<Vec<Message>, HiveError> {
    let mut results = Vec::with_capacity(calls.len());
    if parallel {
        for call in calls {
            sink.emit(&tool_call_event(call)).await?;
        }
        results = join_all(calls.iter().map(|call| executor.execute(pool, call))).await;
        for (call, result) in calls.iter().zip(&results) {
            sink.emit(&tool_result_event(call, result)).await?;
        }
    } else {
        for call in calls {
            sink.emit(&tool_call_event(call)).await?;
            let result = executor.execute(pool, call).await;
            sink.emit(&tool_result_event(call, &result)).await?;
            results.push(result);
        }
    }
    Ok(results)
}

fn tool_call_event(call: &ToolCallRequest) -> SessionEvent {
    SessionEvent::ToolCall {
        id: call.id.clone(),
        name: call.name.clone(),
        arguments: call.arguments.clone(),
    }
}

fn tool_result_event(call: &ToolCallRequest, result: &Message) -> SessionEvent {
    SessionEvent::ToolResult {
        id: call.id.clone(),
        name: call.name.clone(),
        is_error: result.is_error,
        preview: preview(&result.content, RESULT_PREVIEW_CHARS),
    }
}

//! 调用方 sink：只追加、有序的文本通道
//!
//! 支持 write_chunk / emit / end；任何写失败对会话都是致命的（不重试）。

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::stream::SessionEvent;

/// 写调用方通道失败
#[derive(Error, Debug, Clone)]
pub enum SinkError {
    #[error("output channel closed by caller")]
    Closed,

    #[error("output write failed: {0}")]
    Io(String),

    #[error("output encode failed: {0}")]
    Encode(String),
}

/// 调用方 sink
#[async_trait]
pub trait OutputSink: Send {
    /// 写一段模型文本
    async fn write_chunk(&mut self, chunk: &str) -> Result<(), SinkError>;

    /// 推送过程事件；纯文本 sink 可忽略
    async fn emit(&mut self, _event: &SessionEvent) -> Result<(), SinkError> {
        Ok(())
    }

    /// 输出结束
    async fn end(&mut self) -> Result<(), SinkError>;
}

/// 丢弃一切输出（非流式 JSON 回复使用）
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl OutputSink for NullSink {
    async fn write_chunk(&mut self, _chunk: &str) -> Result<(), SinkError> {
        Ok(())
    }

    async fn end(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// 内存缓冲：记录文本片段与事件
#[derive(Debug, Default)]
pub struct BufferSink {
    pub chunks: Vec<String>,
    pub events: Vec<SessionEvent>,
    pub ended: bool,
}

impl BufferSink {
    pub fn text(&self) -> String {
        self.chunks.concat()
    }
}

#[async_trait]
impl OutputSink for BufferSink {
    async fn write_chunk(&mut self, chunk: &str) -> Result<(), SinkError> {
        self.chunks.push(chunk.to_string());
        Ok(())
    }

    async fn emit(&mut self, event: &SessionEvent) -> Result<(), SinkError> {
        self.events.push(event.clone());
        Ok(())
    }

    async fn end(&mut self) -> Result<(), SinkError> {
        self.ended = true;
        Ok(())
    }
}

/// NDJSON 行通道：文本片段编码为 message_chunk 事件，每个事件一行
///
/// 接收端被丢弃（客户端断开）时写入返回 SinkError::Closed。
#[derive(Debug, Clone)]
pub struct NdjsonSink {
    tx: mpsc::Sender<String>,
}

impl NdjsonSink {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }

    async fn send_event(&self, event: &SessionEvent) -> Result<(), SinkError> {
        let mut line = serde_json::to_string(event).map_err(|e| SinkError::Encode(e.to_string()))?;
        line.push('\n');
        self.tx.send(line).await.map_err(|_| SinkError::Closed)
    }
}

#[async_trait]
impl OutputSink for NdjsonSink {
    async fn write_chunk(&mut self, chunk: &str) -> Result<(), SinkError> {
        self.send_event(&SessionEvent::MessageChunk {
            text: chunk.to_string(),
        })
        .await
    }

    async fn emit(&mut self, event: &SessionEvent) -> Result<(), SinkError> {
        self.send_event(event).await
    }

    async fn end(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// 写入任意 AsyncWrite（CLI 使用 stdout），只输出文本
pub struct WriterSink<W> {
    writer: W,
}

impl<W> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W> OutputSink for WriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_chunk(&mut self, chunk: &str) -> Result<(), SinkError> {
        self.writer
            .write_all(chunk.as_bytes())
            .await
            .map_err(|e| SinkError::Io(e.to_string()))?;
        self.writer.flush().await.map_err(|e| SinkError::Io(e.to_string()))
    }

    async fn end(&mut self) -> Result<(), SinkError> {
        self.writer
            .write_all(b"\n")
            .await
            .map_err(|e| SinkError::Io(e.to_string()))?;
        self.writer.flush().await.map_err(|e| SinkError::Io(e.to_string()))
    }
}

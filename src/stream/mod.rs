//! 流式输出：片段合并（StreamMerger）、调用方 sink、会话事件

pub mod events;
pub mod merger;
pub mod sink;

pub use events::SessionEvent;
pub use merger::{StreamFragment, StreamMerger, ToolCallDelta};
pub use sink::{BufferSink, NdjsonSink, NullSink, OutputSink, SinkError, WriterSink};

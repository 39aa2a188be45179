//! 核心编排层：错误分类、状态机、会话生命周期、编排循环、关闭信号

pub mod error;
pub mod orchestrator;
pub mod session;
pub mod shutdown;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{HiveError, InputError};
pub use orchestrator::{run_session, SessionReport};
pub use session::{Session, SessionConfig};
pub use shutdown::ShutdownManager;
pub use state::{transition, LoopEvent, LoopState};

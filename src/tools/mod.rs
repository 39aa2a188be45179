//! 工具层：工具组（进程内 / 命令模板 / stdio JSON-RPC）、会话工具池与执行器

pub mod echo;
pub mod executor;
pub mod plugin;
pub mod pool;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod stdio;

pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use plugin::PluginTool;
pub use pool::{
    ConfiguredPools, GroupPool, ToolError, ToolPool, ToolPoolFactory, ToolServer, ToolSpec,
};
pub use registry::{LocalToolServer, Tool, ToolRegistry};
pub use schema::parameters_schema;
pub use stdio::StdioToolServer;

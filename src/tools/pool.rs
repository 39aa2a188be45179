//! 工具执行池（Tool Executor Pool）
//!
//! 每个工具组是一个 ToolServer（进程内注册表 / 命令模板 / stdio JSON-RPC 服务器）；
//! GroupPool 把会话启用的若干组合并为一个 ToolPool，按工具名路由调用。
//! 池由单个会话独占，close 幂等。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{ToolGroupConfig, ToolGroupKind, ToolsSection};
use crate::tools::{EchoTool, LocalToolServer, PluginTool, StdioToolServer, ToolRegistry};

/// 声明给模型的工具：名称、描述、参数 JSON Schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_parameters")]
    pub parameters: Value,
}

fn default_parameters() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// 工具调用或工具池生命周期错误
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Execution(String),

    #[error("tool `{name}` timed out after {after:?}")]
    Timeout { name: String, after: Duration },

    #[error("server spawn failed: {0}")]
    Spawn(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("tool pool already closed")]
    Closed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// 一个工具组的服务端
#[async_trait]
pub trait ToolServer: Send + Sync {
    /// 组名（日志用）
    fn name(&self) -> &str;

    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError>;

    /// 调用工具，返回文本结果
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, ToolError>;

    /// 释放底层资源（子进程等），需幂等
    async fn shutdown(&self) -> Result<(), ToolError>;
}

/// 会话独占的工具池
#[async_trait]
pub trait ToolPool: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError>;

    async fn invoke(&self, name: &str, arguments: Value) -> Result<String, ToolError>;

    /// 幂等：释放全部底层连接
    async fn close(&self) -> Result<(), ToolError>;
}

/// 按会话启用的工具组获取工具池
#[async_trait]
pub trait ToolPoolFactory: Send + Sync {
    /// 已配置的工具组名
    fn group_names(&self) -> Vec<String>;

    async fn acquire(&self, groups: &[String]) -> Result<Box<dyn ToolPool>, ToolError>;
}

/// 多个工具组合并而成的池
pub struct GroupPool {
    servers: Vec<Arc<dyn ToolServer>>,
    specs: Vec<ToolSpec>,
    routes: HashMap<String, usize>,
    closed: AtomicBool,
}

impl GroupPool {
    /// 列出每个 server 的工具并建立路由；同名工具以先出现的组为准
    pub async fn connect(servers: Vec<Arc<dyn ToolServer>>) -> Result<Self, ToolError> {
        let mut specs = Vec::new();
        let mut routes = HashMap::new();
        for (idx, server) in servers.iter().enumerate() {
            for spec in server.list_tools().await? {
                if routes.contains_key(&spec.name) {
                    warn!(group = %server.name(), tool = %spec.name, "duplicate tool name, keeping first");
                    continue;
                }
                routes.insert(spec.name.clone(), idx);
                specs.push(spec);
            }
        }
        Ok(Self {
            servers,
            specs,
            routes,
            closed: AtomicBool::new(false),
        })
    }

    #[cfg(test)]
    fn tool_names(&self) -> Vec<String> {
        self.specs.iter().map(|s| s.name.clone()).collect()
    }
}

#[async_trait]
impl ToolPool for GroupPool {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ToolError::Closed);
        }
        Ok(self.specs.clone())
    }

    async fn invoke(&self, name: &str, arguments: Value) -> Result<String, ToolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ToolError::Closed);
        }
        let idx = *self
            .routes
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        self.servers[idx].call_tool(name, arguments).await
    }

    async fn close(&self) -> Result<(), ToolError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        shutdown_all(&self.servers).await
    }
}

/// 依次关闭全部 server；返回第一个错误，但不跳过后续 server
async fn shutdown_all(servers: &[Arc<dyn ToolServer>]) -> Result<(), ToolError> {
    let mut first_err = None;
    for server in servers {
        if let Err(e) = server.shutdown().await {
            warn!(group = %server.name(), error = %e, "failed to shut down tool server");
            first_err.get_or_insert(e);
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// 从 [tools] 配置启动工具组
pub struct ConfiguredPools {
    groups: Vec<ToolGroupConfig>,
    tool_timeout: Duration,
    startup_timeout: Duration,
}

impl ConfiguredPools {
    pub fn new(tools: &ToolsSection) -> Self {
        Self {
            groups: tools.groups.clone(),
            tool_timeout: tools.tool_timeout(),
            startup_timeout: tools.startup_timeout(),
        }
    }

    async fn start_group(&self, group: &ToolGroupConfig) -> Result<Arc<dyn ToolServer>, ToolError> {
        let server: Arc<dyn ToolServer> = match group.kind {
            ToolGroupKind::Builtin => {
                let mut registry = ToolRegistry::new();
                registry.register(EchoTool);
                Arc::new(LocalToolServer::new(&group.name, registry))
            }
            ToolGroupKind::Command => {
                let workdir = match &group.workdir {
                    Some(dir) => dir.clone(),
                    None => std::env::current_dir()?,
                };
                let mut registry = ToolRegistry::new();
                for entry in &group.plugins {
                    registry.register(PluginTool::new(entry, &workdir, self.tool_timeout)?);
                }
                Arc::new(LocalToolServer::new(&group.name, registry))
            }
            ToolGroupKind::Stdio => Arc::new(
                StdioToolServer::spawn(&group.name, &group.command, &group.env_vars(), self.startup_timeout)
                    .await?,
            ),
        };
        info!(group = %group.name, kind = ?group.kind, "tool group started");
        Ok(server)
    }
}

#[async_trait]
impl ToolPoolFactory for ConfiguredPools {
    fn group_names(&self) -> Vec<String> {
        self.groups.iter().map(|g| g.name.clone()).collect()
    }

    async fn acquire(&self, groups: &[String]) -> Result<Box<dyn ToolPool>, ToolError> {
        let mut servers: Vec<Arc<dyn ToolServer>> = Vec::with_capacity(groups.len());
        for name in groups {
            let started = match self.groups.iter().find(|g| &g.name == name) {
                Some(group) => self.start_group(group).await,
                None => Err(ToolError::Spawn(format!("tool group `{name}` is not configured"))),
            };
            match started {
                Ok(server) => servers.push(server),
                Err(e) => {
                    // 已启动的组需回滚，避免泄漏子进程
                    let _ = shutdown_all(&servers).await;
                    return Err(e);
                }
            }
        }
        match GroupPool::connect(servers.clone()).await {
            Ok(pool) => Ok(Box::new(pool)),
            Err(e) => {
                let _ = shutdown_all(&servers).await;
                Err(e)
            }
        }
    }
}

//! 进程内工具注册表
//!
//! 所有进程内工具实现 Tool trait（name / description / parameters_schema / execute），由 ToolRegistry 按名注册与查找；
//! LocalToolServer 把一个注册表包装成工具组（ToolServer）。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{ToolError, ToolServer, ToolSpec};

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（模型 tool call 中的 name）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认返回空对象，表示无参数或参数格式不限
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具
    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 工具注册表：按名称有序存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub async fn execute(&self, name: &str, args: Value) -> Result<String, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        tool.execute(args).await.map_err(ToolError::Execution)
    }

    #[cfg(test)]
    fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// 声明给模型的工具列表
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .values()
            .map(|tool| ToolSpec::new(tool.name(), tool.description(), tool.parameters_schema()))
            .collect()
    }
}

/// 进程内工具组
pub struct LocalToolServer {
    name: String,
    registry: ToolRegistry,
}

impl LocalToolServer {
    pub fn new(name: impl Into<String>, registry: ToolRegistry) -> Self {
        Self {
            name: name.into(),
            registry,
        }
    }
}

#[async_trait]
impl ToolServer for LocalToolServer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError> {
        Ok(self.registry.specs())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, ToolError> {
        self.registry.execute(name, arguments).await
    }

    async fn shutdown(&self) -> Result<(), ToolError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::EchoTool;

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "fail"
        }

        fn description(&self) -> &str {
            "always fails"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            Err("disk on fire".to_string())
        }
    }

    #[tokio::test]
    async fn test_registry_execute() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register(FailingTool);
        assert_eq!(registry.tool_names(), vec!["echo".to_string(), "fail".to_string()]);

        let ok = registry.execute("echo", serde_json::json!({"text": "hi"})).await.unwrap();
        assert_eq!(ok, "hi");

        let err = registry.execute("fail", Value::Null).await.unwrap_err();
        assert_eq!(err.to_string(), "disk on fire");

        assert!(matches!(
            registry.execute("nope", Value::Null).await,
            Err(ToolError::UnknownTool(_))
        ));
    }

    #[tokio::test]
    async fn test_local_server_lists_specs() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let server = LocalToolServer::new("basic", registry);
        let specs = server.list_tools().await.unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "echo");
        assert_eq!(specs[0].parameters["type"], "object");
    }
}

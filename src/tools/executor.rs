//! 工具执行器
//!
//! 对每个 tool call 施加超时并调用会话的 ToolPool；任何失败都转成 is_error 的工具结果消息，
//! 让模型在下一回合看到错误，而不是终止会话。每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::memory::{Message, ToolCallRequest};
use crate::tools::{ToolError, ToolPool};

pub struct ToolExecutor {
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// 执行一次 tool call，返回与 call.id 对应的工具结果消息
    pub async fn execute(&self, pool: &dyn ToolPool, call: &ToolCallRequest) -> Message {
        let start = Instant::now();
        let result = if call.arguments.is_object() {
            match timeout(self.timeout, pool.invoke(&call.name, call.arguments.clone())).await {
                Ok(r) => r,
                Err(_) => Err(ToolError::Timeout {
                    name: call.name.clone(),
                    after: self.timeout,
                }),
            }
        } else {
            Err(ToolError::InvalidArguments(format!(
                "expected a JSON object, got {}",
                args_preview(&call.arguments)
            )))
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(ToolError::Timeout { .. }) => "timeout",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.name,
            "call_id": call.id,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&call.arguments),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(content) => Message::tool_result(&call.id, content),
            Err(e) => Message::tool_error(&call.id, e.to_string()),
        }
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{EchoTool, GroupPool, LocalToolServer, Tool, ToolRegistry, ToolServer};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Arc;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "sleeps"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".into())
        }
    }

    async fn pool() -> GroupPool {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register(SlowTool);
        let server: Arc<dyn ToolServer> = Arc::new(LocalToolServer::new("basic", registry));
        GroupPool::connect(vec![server]).await.unwrap()
    }

    fn call(name: &str, arguments: Value) -> ToolCallRequest {
        ToolCallRequest {
            id: "call_1".into(),
            name: name.into(),
            arguments,
        }
    }

    #[tokio::test]
    async fn test_execute_success() {
        let pool = pool().await;
        let executor = ToolExecutor::new(Duration::from_secs(1));
        let msg = executor.execute(&pool, &call("echo", serde_json::json!({"text": "hi"}))).await;
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.content, "hi");
        assert!(!msg.is_error);
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_error_result() {
        let pool = pool().await;
        let executor = ToolExecutor::new(Duration::from_secs(1));
        let msg = executor.execute(&pool, &call("nope", serde_json::json!({}))).await;
        assert!(msg.is_error);
        assert!(msg.content.contains("unknown tool: nope"));
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let pool = pool().await;
        let executor = ToolExecutor::new(Duration::from_secs(1));
        let msg = executor
            .execute(&pool, &call("echo", Value::String("{not json".into())))
            .await;
        assert!(msg.is_error);
        assert!(msg.content.contains("invalid arguments"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let pool = pool().await;
        let executor = ToolExecutor::new(Duration::from_millis(50));
        let msg = executor.execute(&pool, &call("slow", serde_json::json!({}))).await;
        assert!(msg.is_error);
        assert_eq!(msg.content, "tool failed: tool `slow` timed out after 50ms");
    }
}

//! stdio 工具服务器：子进程通过 stdin/stdout 收发行分隔 JSON-RPC
//!
//! 子进程环境先清空，只透传 PATH/HOME/USER/LANG/TERM 与组配置的变量。
//! 一次请求/响应持有同一把锁，并发调用不会读到彼此的响应。

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::tools::protocol::{
    InitializeParams, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ToolCallParams,
    ToolCallResult, ToolDefinition,
};
use crate::tools::{ToolError, ToolServer, ToolSpec};

const PASSTHROUGH_ENV: [&str; 5] = ["PATH", "HOME", "USER", "LANG", "TERM"];

struct Channel {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

pub struct StdioToolServer {
    name: String,
    next_id: AtomicU64,
    channel: Mutex<Channel>,
    child: Mutex<Option<Child>>,
}

impl StdioToolServer {
    /// 启动子进程并在 startup_timeout 内完成握手
    pub async fn spawn(
        name: &str,
        command: &[String],
        env: &HashMap<String, String>,
        startup_timeout: Duration,
    ) -> Result<Self, ToolError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| ToolError::Spawn(format!("tool group `{name}` has an empty command")))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd.env_clear();
        for key in PASSTHROUGH_ENV {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }
        cmd.envs(env);

        let mut child = cmd
            .spawn()
            .map_err(|e| ToolError::Spawn(format!("failed to spawn `{program}`: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolError::Spawn("failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolError::Spawn("failed to capture stdout".into()))?;

        let server = Self {
            name: name.to_string(),
            next_id: AtomicU64::new(1),
            channel: Mutex::new(Channel {
                stdin,
                stdout: BufReader::new(stdout),
            }),
            child: Mutex::new(Some(child)),
        };

        match tokio::time::timeout(startup_timeout, server.initialize()).await {
            Ok(Ok(())) => Ok(server),
            Ok(Err(e)) => {
                let _ = server.shutdown().await;
                Err(ToolError::Spawn(format!("handshake with `{name}` failed: {e}")))
            }
            Err(_) => {
                let _ = server.shutdown().await;
                Err(ToolError::Spawn(format!(
                    "handshake with `{name}` timed out after {startup_timeout:?}"
                )))
            }
        }
    }

    async fn initialize(&self) -> Result<(), ToolError> {
        let params = serde_json::to_value(InitializeParams::default())?;
        let response = self.request("initialize", Some(params)).await?;
        debug!(group = %self.name, response = %response, "tool server initialized");
        self.notify("notifications/initialized").await
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ToolError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut line = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        line.push('\n');

        let mut channel = self.channel.lock().await;
        write_line(&mut channel.stdin, &line).await?;
        read_response(&self.name, &mut channel.stdout, id)
            .await?
            .into_result()
    }

    async fn notify(&self, method: &str) -> Result<(), ToolError> {
        let mut line = serde_json::to_string(&JsonRpcNotification::new(method))?;
        line.push('\n');
        let mut channel = self.channel.lock().await;
        write_line(&mut channel.stdin, &line).await
    }
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> Result<(), ToolError> {
    stdin
        .write_all(line.as_bytes())
        .await
        .map_err(|e| ToolError::Transport(format!("write to tool server failed: {e}")))?;
    stdin
        .flush()
        .await
        .map_err(|e| ToolError::Transport(format!("flush to tool server failed: {e}")))
}

/// 读取直到遇到 id 匹配的响应；跳过通知与非 JSON 行
async fn read_response(
    group: &str,
    stdout: &mut BufReader<ChildStdout>,
    expected_id: u64,
) -> Result<JsonRpcResponse, ToolError> {
    let mut buf = String::new();
    loop {
        buf.clear();
        let n = stdout
            .read_line(&mut buf)
            .await
            .map_err(|e| ToolError::Transport(format!("read from tool server failed: {e}")))?;
        if n == 0 {
            return Err(ToolError::Transport("tool server closed stdout".into()));
        }
        let trimmed = buf.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<JsonRpcResponse>(trimmed) {
            Ok(resp) if resp.id == Some(expected_id) => return Ok(resp),
            Ok(resp) => debug!(group, id = ?resp.id, "skipping non-matching JSON-RPC message"),
            Err(_) => debug!(group, line = trimmed, "ignoring non-JSON-RPC line"),
        }
    }
}

#[async_trait]
impl ToolServer for StdioToolServer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError> {
        let result = self.request("tools/list", None).await?;
        let tools = result.get("tools").cloned().unwrap_or_else(|| Value::Array(vec![]));
        let defs: Vec<ToolDefinition> = serde_json::from_value(tools)
            .map_err(|e| ToolError::Protocol(format!("failed to parse tools list: {e}")))?;
        Ok(defs.into_iter().map(ToolSpec::from).collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, ToolError> {
        let params = serde_json::to_value(ToolCallParams {
            name: name.to_string(),
            arguments,
        })?;
        let result = self.request("tools/call", Some(params)).await?;
        let call: ToolCallResult = serde_json::from_value(result)
            .map_err(|e| ToolError::Protocol(format!("malformed tools/call result: {e}")))?;
        if call.is_error {
            return Err(ToolError::Execution(call.text()));
        }
        Ok(call.text())
    }

    async fn shutdown(&self) -> Result<(), ToolError> {
        let mut guard = self.child.lock().await;
        match guard.take() {
            Some(mut child) => stopped(&self.name, child.kill().await),
            None => Ok(()),
        }
    }
}

/// 子进程停止结果：失败时记录并上报
fn stopped(group: &str, result: std::io::Result<()>) -> Result<(), ToolError> {
    match result {
        Ok(()) => {
            debug!(group = %group, "tool server stopped");
            Ok(())
        }
        Err(e) => {
            warn!(group = %group, error = %e, "failed to kill tool server");
            Err(ToolError::Io(e))
        }
    }
}

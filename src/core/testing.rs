//! 单元测试用的工具池替身：记录调用、关闭与获取次数

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{ToolError, ToolPool, ToolPoolFactory, ToolSpec};

#[derive(Clone)]
pub enum FakeTool {
    Reply(String),
    Fail(String),
    /// 睡眠后返回
    Slow(Duration, String),
}

#[derive(Clone)]
struct Shared {
    tools: Vec<(String, FakeTool)>,
    invocations: Arc<Mutex<Vec<(String, Value)>>>,
    closes: Arc<AtomicUsize>,
}

pub struct RecordingPool {
    shared: Shared,
}

#[async_trait]
impl ToolPool for RecordingPool {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError> {
        Ok(self
            .shared
            .tools
            .iter()
            .map(|(name, _)| ToolSpec::new(name.as_str(), "fake", serde_json::json!({"type": "object"})))
            .collect())
    }

    async fn invoke(&self, name: &str, arguments: Value) -> Result<String, ToolError> {
        self.shared
            .invocations
            .lock()
            .unwrap()
            .push((name.to_string(), arguments));
        let tool = self
            .shared
            .tools
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t.clone())
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        match tool {
            FakeTool::Reply(text) => Ok(text),
            FakeTool::Fail(reason) => Err(ToolError::Execution(reason)),
            FakeTool::Slow(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
        }
    }

    async fn close(&self) -> Result<(), ToolError> {
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct RecordingFactory {
    shared: Shared,
    fail_acquire: bool,
    pub acquires: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
    pub invocations: Arc<Mutex<Vec<(String, Value)>>>,
}

impl RecordingFactory {
    pub fn new(tools: Vec<(&str, FakeTool)>) -> Self {
        let shared = Shared {
            tools: tools.into_iter().map(|(n, t)| (n.to_string(), t)).collect(),
            invocations: Arc::new(Mutex::new(Vec::new())),
            closes: Arc::new(AtomicUsize::new(0)),
        };
        Self {
            acquires: Arc::new(AtomicUsize::new(0)),
            closes: shared.closes.clone(),
            invocations: shared.invocations.clone(),
            shared,
            fail_acquire: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_acquire: true,
            ..Self::new(vec![])
        }
    }

    pub fn invoked_names(&self) -> Vec<String> {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .map(|(n, _)| n.clone())
            .collect()
    }
}

#[async_trait]
impl ToolPoolFactory for RecordingFactory {
    fn group_names(&self) -> Vec<String> {
        vec!["fake".to_string()]
    }

    async fn acquire(&self, _groups: &[String]) -> Result<Box<dyn ToolPool>, ToolError> {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        if self.fail_acquire {
            return Err(ToolError::Spawn("fake group refused to start".into()));
        }
        Ok(Box::new(RecordingPool {
            shared: self.shared.clone(),
        }))
    }
}

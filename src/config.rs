//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__LLM__PROVIDER=openai`）。
//! 配置只在启动时读取一次并显式传入 Dispatcher / Session，核心不持有全局可变状态。

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub session: SessionSection,
    pub tools: ToolsSection,
    pub server: ServerSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 读取 API Key 的环境变量名；未设置时按 provider 取 DEEPSEEK_API_KEY / OPENAI_API_KEY
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key_env: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

/// [llm.timeouts] 段（秒）
#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
    #[serde(default = "default_stream_timeout")]
    pub stream: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
            stream: default_stream_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

fn default_stream_timeout() -> u64 {
    120
}

/// [session] 段：单次编排运行的默认参数
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    /// 单次会话最多调用模型的次数，防止工具调用死循环
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default = "default_streaming")]
    pub streaming: bool,
    /// 同一回合内多个 tool call 是否并发执行（结果仍按请求顺序写回）
    #[serde(default)]
    pub parallel_tool_calls: bool,
    pub system_prompt: Option<String>,
    /// 请求未指定 tool_groups 时启用的工具组
    #[serde(default)]
    pub default_groups: Vec<String>,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            streaming: default_streaming(),
            parallel_tool_calls: false,
            system_prompt: None,
            default_groups: Vec::new(),
        }
    }
}

fn default_max_turns() -> usize {
    20
}

fn default_streaming() -> bool {
    true
}

/// [tools] 段：工具超时与工具组
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// stdio 工具服务器启动与握手超时（秒）
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
    #[serde(default)]
    pub groups: Vec<ToolGroupConfig>,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            startup_timeout_secs: default_startup_timeout_secs(),
            groups: Vec::new(),
        }
    }
}

impl ToolsSection {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    #[cfg(test)]
    fn group(&self, name: &str) -> Option<&ToolGroupConfig> {
        self.groups.iter().find(|g| g.name == name)
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_startup_timeout_secs() -> u64 {
    30
}

/// 工具组类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolGroupKind {
    /// 进程内内置工具（echo）
    Builtin,
    /// 「程序 + 参数模板」命令工具
    Command,
    /// stdin/stdout JSON-RPC 工具服务器
    Stdio,
}

/// [[tools.groups]]：调用方可按名启用的一组工具
#[derive(Debug, Clone, Deserialize)]
pub struct ToolGroupConfig {
    pub name: String,
    pub kind: ToolGroupKind,
    #[serde(default)]
    pub description: String,
    /// stdio：程序及参数
    #[serde(default)]
    pub command: Vec<String>,
    /// stdio：额外注入的环境变量，形如 "KEY=VALUE"（config 会把表键转成小写，故不用表）
    #[serde(default)]
    pub env: Vec<String>,
    /// command：命令工具列表
    #[serde(default)]
    pub plugins: Vec<PluginEntry>,
    /// command：工作目录，未设置时用当前目录
    pub workdir: Option<PathBuf>,
}

impl ToolGroupConfig {
    /// 解析 env 列表；缺少 '=' 的条目被忽略
    pub fn env_vars(&self) -> HashMap<String, String> {
        self.env
            .iter()
            .filter_map(|kv| kv.split_once('='))
            .map(|(k, v)| (k.trim().to_string(), v.to_string()))
            .collect()
    }
}

/// [[tools.groups.plugins]]：程序 + 参数模板，{{key}} 从模型传入的参数中取值
#[derive(Debug, Clone, Deserialize)]
pub struct PluginEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// [server] 段
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

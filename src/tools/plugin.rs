//! 命令模板工具：由配置 [[tools.groups.plugins]] 注册，运行「程序 + 参数模板」
//!
//! 参数模板中 {{workdir}} 替换为工作目录，{{key}} 从模型传入的 args 中取 key；
//! 执行时无 shell，直接 exec program + substituted args，带超时与审计日志。
//! 参数 schema 由模板中出现的占位符推导（均为必填字符串）。

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tokio::process::Command;

use crate::config::PluginEntry;
use crate::tools::{Tool, ToolError};

const WORKDIR_PLACEHOLDER: &str = "workdir";

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

/// {{key}}，花括号内允许空白
fn placeholder_regex() -> Result<&'static Regex, ToolError> {
    if let Some(re) = PLACEHOLDER_RE.get() {
        return Ok(re);
    }
    let re = Regex::new(r"\{\{\s*(\w+)\s*\}\}")
        .map_err(|e| ToolError::Spawn(format!("placeholder pattern: {}", e)))?;
    Ok(PLACEHOLDER_RE.get_or_init(|| re))
}

/// 参数模板片段
#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Key(String),
}

/// 把一个参数模板切成文本与占位符片段
fn parse_template(re: &Regex, tpl: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut last = 0;
    for caps in re.captures_iter(tpl) {
        let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if whole.start() > last {
            segments.push(Segment::Text(tpl[last..whole.start()].to_string()));
        }
        segments.push(Segment::Key(key.as_str().to_string()));
        last = whole.end();
    }
    if last < tpl.len() {
        segments.push(Segment::Text(tpl[last..].to_string()));
    }
    segments
}

/// 从配置项构建的命令工具
pub struct PluginTool {
    name: String,
    description: String,
    program: String,
    args_template: Vec<Vec<Segment>>,
    workdir: PathBuf,
    timeout: Duration,
}

impl PluginTool {
    /// 从配置条目与工作目录、超时创建；参数模板在此一次解析
    pub fn new(entry: &PluginEntry, workdir: &Path, timeout: Duration) -> Result<Self, ToolError> {
        let re = placeholder_regex()?;
        Ok(Self {
            name: entry.name.clone(),
            description: entry.description.clone(),
            program: entry.program.clone(),
            args_template: entry.args.iter().map(|tpl| parse_template(re, tpl)).collect(),
            workdir: workdir.to_path_buf(),
            timeout,
        })
    }

    /// 模板中出现的参数名（按首次出现顺序，不含 workdir）
    fn placeholders(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        for segment in self.args_template.iter().flatten() {
            if let Segment::Key(key) = segment {
                if key != WORKDIR_PLACEHOLDER && !keys.contains(key) {
                    keys.push(key.clone());
                }
            }
        }
        keys
    }

    /// 单趟替换占位符，替换进来的值不再被展开；缺少必填参数时报错
    fn substitute(&self, args: &Value) -> Result<Vec<String>, String> {
        let empty = serde_json::Map::new();
        let obj = match args {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => return Err("arguments must be a JSON object".to_string()),
        };
        let workdir = self.workdir.to_string_lossy();
        self.args_template
            .iter()
            .map(|segments| {
                let mut arg = String::new();
                for segment in segments {
                    match segment {
                        Segment::Text(text) => arg.push_str(text),
                        Segment::Key(key) if key == WORKDIR_PLACEHOLDER => arg.push_str(&workdir),
                        Segment::Key(key) => match obj.get(key) {
                            Some(Value::String(v)) => arg.push_str(v),
                            Some(v) => arg.push_str(&v.to_string()),
                            None => return Err(format!("missing argument `{}`", key)),
                        },
                    }
                }
                Ok(arg)
            })
            .collect()
    }
}

#[async_trait]
impl Tool for PluginTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        let keys = self.placeholders();
        let properties: serde_json::Map<String, Value> = keys
            .iter()
            .map(|k| (k.clone(), serde_json::json!({ "type": "string" })))
            .collect();
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": keys,
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args_vec = self.substitute(&args)?;
        tracing::info!(tool = %self.name, program = %self.program, "plugin tool invoke");
        let child = Command::new(&self.program)
            .args(&args_vec)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("plugin spawn failed: {}", e))?;
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| format!("plugin timeout after {:?}", self.timeout))?
            .map_err(|e| format!("plugin wait failed: {}", e))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(format!(
                "exit {:?}: stderr {}",
                output.status.code(),
                stderr.trim()
            ));
        }
        Ok(stdout.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(program: &str, args: &[&str]) -> PluginTool {
        let entry = PluginEntry {
            name: "t".into(),
            description: "test".into(),
            program: program.into(),
            args: args.iter().map(|s| s.to_string()).collect(),
        };
        PluginTool::new(&entry, Path::new("/tmp"), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_placeholders_and_schema() {
        let t = tool("grep", &["-n", "{{pattern}}", "{{workdir}}/{{file}}", "{{pattern}}"]);
        assert_eq!(t.placeholders(), vec!["pattern".to_string(), "file".to_string()]);
        let schema = t.parameters_schema();
        assert_eq!(schema["required"], serde_json::json!(["pattern", "file"]));
        assert_eq!(schema["properties"]["file"]["type"], "string");
    }

    #[test]
    fn test_substitute() {
        let t = tool("cat", &["{{workdir}}/{{file}}", "-n{{count}}"]);
        let args = t
            .substitute(&serde_json::json!({"file": "a.txt", "count": 3}))
            .unwrap();
        assert_eq!(args, vec!["/tmp/a.txt".to_string(), "-n3".to_string()]);
    }

    #[test]
    fn test_substitute_missing_argument() {
        let t = tool("cat", &["{{file}}"]);
        let err = t.substitute(&serde_json::json!({})).unwrap_err();
        assert!(err.contains("missing argument `file`"));
        assert!(t.substitute(&serde_json::json!("a.txt")).is_err());
    }

    #[test]
    fn test_placeholder_with_spaces_is_substituted() {
        let t = tool("echo", &["{{ name }}", "--dir={{  workdir }}"]);
        assert_eq!(t.placeholders(), vec!["name".to_string()]);
        let args = t.substitute(&serde_json::json!({"name": "hive"})).unwrap();
        assert_eq!(args, vec!["hive".to_string(), "--dir=/tmp".to_string()]);
    }

    #[test]
    fn test_substituted_values_are_not_expanded_again() {
        let t = tool("echo", &["{{first}}-{{second}}"]);
        let args = t
            .substitute(&serde_json::json!({"first": "{{second}}", "second": "x"}))
            .unwrap();
        assert_eq!(args, vec!["{{second}}-x".to_string()]);
    }

    #[test]
    fn test_parse_template_segments() {
        let re = placeholder_regex().unwrap();
        assert_eq!(
            parse_template(re, "a{{ k }}b{{}}"),
            vec![
                Segment::Text("a".into()),
                Segment::Key("k".into()),
                Segment::Text("b{{}}".into())
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_echo_program() {
        let t = tool("echo", &["hello", "{{name}}"]);
        let out = t.execute(serde_json::json!({"name": "hive"})).await.unwrap();
        assert_eq!(out, "hello hive");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_nonzero_exit() {
        let t = tool("false", &[]);
        let err = t.execute(Value::Null).await.unwrap_err();
        assert!(err.starts_with("exit"));
    }
}

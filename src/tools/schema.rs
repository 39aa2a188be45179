//! 工具参数 JSON Schema 生成（schemars）
//!
//! 进程内工具用参数结构体派生 JsonSchema，生成声明给模型的 parameters。

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// 由参数类型生成 parameters schema；去掉模型端不需要的 $schema / title
pub fn parameters_schema<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| Value::Object(Default::default()));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    #[derive(JsonSchema)]
    struct ReadArgs {
        /// 文件路径
        path: String,
        limit: Option<u32>,
    }

    #[test]
    fn test_parameters_schema_shape() {
        let schema = parameters_schema::<ReadArgs>();
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"]["path"].is_object());
        assert_eq!(schema["required"], serde_json::json!(["path"]));
        assert!(schema.get("$schema").is_none());
        assert!(schema.get("title").is_none());
    }
}

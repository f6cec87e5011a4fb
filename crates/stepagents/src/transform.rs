use async_trait::async_trait;
use serde_json::Value;
use stepcore::{Agent, StepContext, StepError, StepOutput};

/// JSON conversions and literal context assignment
///
/// * `json_parse`: parses the `json` string parameter into `parsed`
/// * `json_stringify`: renders the `value` parameter into `json`
/// * `set`: merges the `values` object into the execution context
pub struct TransformAgent;

const FUNCTIONS: [&str; 3] = ["json_parse", "json_stringify", "set"];

impl TransformAgent {
    fn json_parse(ctx: &StepContext) -> Result<StepOutput, StepError> {
        let input = ctx
            .require_param("json")?
            .as_str()
            .ok_or_else(|| StepError::InvalidParameter {
                field: "json".to_string(),
                expected: "string".to_string(),
            })?;

        let parsed: Value =
            serde_json::from_str(input).map_err(|e| StepError::failed(format!("JSON parse error: {}", e)))?;

        Ok(StepOutput::new().with("parsed", parsed))
    }

    fn json_stringify(ctx: &StepContext) -> Result<StepOutput, StepError> {
        let value = ctx.require_param("value")?;

        let json_str = serde_json::to_string_pretty(value)
            .map_err(|e| StepError::failed(format!("JSON stringify error: {}", e)))?;

        Ok(StepOutput::new().with("json", json_str))
    }

    fn set(ctx: &StepContext) -> Result<StepOutput, StepError> {
        match ctx.require_param("values")? {
            Value::Object(values) => Ok(StepOutput::from(values.clone())),
            _ => Err(StepError::InvalidParameter {
                field: "values".to_string(),
                expected: "object".to_string(),
            }),
        }
    }
}

#[async_trait]
impl Agent for TransformAgent {
    fn functions(&self) -> Vec<String> {
        FUNCTIONS.iter().map(|f| f.to_string()).collect()
    }

    async fn call(&self, function: &str, ctx: StepContext) -> Result<StepOutput, StepError> {
        match function {
            "json_parse" => Self::json_parse(&ctx),
            "json_stringify" => Self::json_stringify(&ctx),
            "set" => Self::set(&ctx),
            other => Err(StepError::failed(format!("TransformAgent has no function '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stepcore::EventBus;

    fn ctx(params: Value) -> StepContext {
        let bus = EventBus::new(16);
        let mut ctx = StepContext::new("exec", "transform", bus.create_emitter("exec", "transform"));
        ctx.params = params.as_object().cloned().unwrap_or_default();
        ctx
    }

    #[tokio::test]
    async fn parses_json_strings() {
        let out = TransformAgent
            .call("json_parse", ctx(json!({"json": "{\"a\": [1, 2]}"})))
            .await
            .unwrap();
        assert_eq!(out.data["parsed"], json!({"a": [1, 2]}));
    }

    #[tokio::test]
    async fn rejects_non_string_input() {
        let err = TransformAgent
            .call("json_parse", ctx(json!({"json": 42})))
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::InvalidParameter { ref field, .. } if field == "json"));

        let err = TransformAgent.call("json_parse", ctx(json!({}))).await.unwrap_err();
        assert_eq!(err, StepError::MissingParameter("json".to_string()));
    }

    #[tokio::test]
    async fn set_merges_values() {
        let out = TransformAgent
            .call("set", ctx(json!({"values": {"score": 90, "tier": "gold"}})))
            .await
            .unwrap();
        assert_eq!(out.data.len(), 2);
        assert_eq!(out.data["score"], 90);
    }
}

use serde_json::{Map, Value};

/// Build the keyword arguments for one step call.
///
/// Static step parameters have their `{{name}}` placeholders resolved
/// against the execution parameters, then every execution parameter is
/// overlaid on top.
pub fn resolve_parameters(step_params: &Map<String, Value>, execution_params: &Map<String, Value>) -> Map<String, Value> {
    let mut resolved: Map<String, Value> = step_params
        .iter()
        .map(|(k, v)| (k.clone(), resolve_value(v, execution_params)))
        .collect();
    resolved.extend(execution_params.iter().map(|(k, v)| (k.clone(), v.clone())));
    resolved
}

fn resolve_value(value: &Value, vars: &Map<String, Value>) -> Value {
    match value {
        Value::String(s) => resolve_string(s, vars),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, vars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// A string that is exactly one placeholder takes the variable's JSON value;
/// placeholders embedded in longer text are rendered as text. Unknown
/// variables are left as written.
fn resolve_string(s: &str, vars: &Map<String, Value>) -> Value {
    let trimmed = s.trim();
    if let Some(inner) = trimmed.strip_prefix("{{").and_then(|t| t.strip_suffix("}}")) {
        if !inner.contains("{{") && !inner.contains("}}") {
            return vars
                .get(inner.trim())
                .cloned()
                .unwrap_or_else(|| Value::String(s.to_string()));
        }
    }

    if !s.contains("{{") {
        return Value::String(s.to_string());
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(open) = rest.find("{{") {
        let Some(close) = rest[open + 2..].find("}}") else {
            break;
        };
        let close = open + 2 + close;
        out.push_str(&rest[..open]);
        let name = rest[open + 2..close].trim();
        match vars.get(name) {
            Some(Value::String(text)) => out.push_str(text),
            Some(other) => out.push_str(&other.to_string()),
            None => out.push_str(&rest[open..close + 2]),
        }
        rest = &rest[close + 2..];
    }
    out.push_str(rest);
    Value::String(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn whole_placeholder_keeps_json_type() {
        let resolved = resolve_parameters(&map(json!({"limit": "{{scan_limit}}"})), &map(json!({"scan_limit": 25})));
        assert_eq!(resolved["limit"], json!(25));
        assert_eq!(resolved["scan_limit"], json!(25));
    }

    #[test]
    fn embedded_placeholders_render_as_text() {
        let resolved = resolve_parameters(
            &map(json!({"subject": "Hello {{name}}, {{count}} new leads", "nested": ["{{name}}"]})),
            &map(json!({"name": "Ada", "count": 3})),
        );
        assert_eq!(resolved["subject"], json!("Hello Ada, 3 new leads"));
        assert_eq!(resolved["nested"], json!(["Ada"]));
    }

    #[test]
    fn unknown_placeholder_is_left_alone() {
        let resolved = resolve_parameters(&map(json!({"a": "{{missing}}", "b": "x {{missing}} y"})), &Map::new());
        assert_eq!(resolved["a"], json!("{{missing}}"));
        assert_eq!(resolved["b"], json!("x {{missing}} y"));
    }

    #[test]
    fn execution_parameters_override_static_ones() {
        let resolved = resolve_parameters(&map(json!({"mode": "ai"})), &map(json!({"mode": "template"})));
        assert_eq!(resolved["mode"], json!("template"));
    }
}

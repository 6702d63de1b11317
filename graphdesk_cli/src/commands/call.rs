use crate::cli::Cli;
use crate::commands::{run_tool, CommandError, Result};
use graphdesk_core::connector::tool_catalog;
use graphdesk_core::{JsonObject, Tool};
use serde_json::{json, Value};

pub async fn run(cli: &Cli, tool: &str, args_json: Option<&str>, params: &[String]) -> Result<()> {
    let catalog = tool_catalog();
    let def = catalog
        .iter()
        .find(|t| t.name == tool)
        .ok_or_else(|| CommandError::ToolNotFound(tool.to_string()))?;
    let arguments = build_arguments(def, args_json, params)?;
    run_tool(cli, tool, arguments).await
}

/// Parameter names in positional order: required first, then the rest.
fn param_names(tool: &Tool) -> Vec<String> {
    let schema = &tool.input_schema;
    let mut names: Vec<String> = schema
        .get("required")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default();
    if let Some(properties) = schema.get("properties").and_then(|v| v.as_object()) {
        for key in properties.keys() {
            if !names.contains(key) {
                names.push(key.clone());
            }
        }
    }
    names
}

/// Types a raw value by the declared schema type of the property.
fn typed_value(tool: &Tool, name: &str, raw: &str) -> Result<Value> {
    let declared = tool
        .input_schema
        .get("properties")
        .and_then(|p| p.get(name))
        .and_then(|p| p.get("type"))
        .and_then(|t| t.as_str())
        .unwrap_or("string");
    match declared {
        "integer" => raw
            .parse::<i64>()
            .map(|n| json!(n))
            .map_err(|_| CommandError::InvalidArgs(format!("'{}' expects an integer, got '{}'", name, raw))),
        "boolean" => raw
            .parse::<bool>()
            .map(|b| json!(b))
            .map_err(|_| CommandError::InvalidArgs(format!("'{}' expects true or false, got '{}'", name, raw))),
        _ => Ok(json!(raw)),
    }
}

/// Builds the argument object for a tool from `--args` JSON plus command
/// line parameters. Accepts `--name value`, `--name=value`, bare `--flag`,
/// `-n value` (first parameter starting with `n`) and positionals; `--`
/// forces the rest to be positional. Parameters override `--args`.
pub fn build_arguments(tool: &Tool, args_json: Option<&str>, params: &[String]) -> Result<JsonObject> {
    let mut args = JsonObject::new();
    if let Some(s) = args_json.filter(|s| !s.trim().is_empty()) {
        match serde_json::from_str::<Value>(s)? {
            Value::Object(m) => args = m,
            _ => return Err(CommandError::InvalidArgs("--args must be a JSON object".to_string())),
        }
    }

    let names = param_names(tool);
    let mut positional: Vec<&str> = Vec::new();
    let mut named: Vec<(String, String)> = Vec::new();
    let mut force_positional = false;
    let mut i = 0;

    while i < params.len() {
        let param = params[i].as_str();
        if param == "--" {
            force_positional = true;
            i += 1;
            continue;
        }
        if !force_positional {
            if let Some(flag) = param.strip_prefix("--") {
                if let Some((name, value)) = flag.split_once('=') {
                    named.push((name.replace('-', "_"), value.to_string()));
                    i += 1;
                } else if i + 1 < params.len() && !params[i + 1].starts_with('-') {
                    named.push((flag.replace('-', "_"), params[i + 1].clone()));
                    i += 2;
                } else {
                    named.push((flag.replace('-', "_"), "true".to_string()));
                    i += 1;
                }
                continue;
            }
            if param.len() == 2 && param.starts_with('-') && i + 1 < params.len() {
                let short = &param[1..];
                let name = names
                    .iter()
                    .find(|n| n.starts_with(short))
                    .cloned()
                    .unwrap_or_else(|| short.to_string());
                named.push((name, params[i + 1].clone()));
                i += 2;
                continue;
            }
        }
        positional.push(param);
        i += 1;
    }

    if positional.len() > names.len() {
        return Err(CommandError::InvalidArgs(format!(
            "tool '{}' accepts at most {} positional arguments ({}), got {}",
            tool.name,
            names.len(),
            names.join(", "),
            positional.len()
        )));
    }

    for (name, raw) in names.iter().zip(positional) {
        args.insert(name.clone(), typed_value(tool, name, raw)?);
    }
    for (name, raw) in named {
        let value = typed_value(tool, &name, &raw)?;
        args.insert(name, value);
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_tool(name: &str) -> Tool {
        tool_catalog().into_iter().find(|t| t.name == name).unwrap()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn positionals_fill_required_parameters_first() {
        let tool = catalog_tool("mail_by_sender");
        let args = build_arguments(&tool, None, &strings(&["megan", "--limit", "5"])).unwrap();
        assert_eq!(args["sender"], "megan");
        assert_eq!(args["limit"], 5);
    }

    #[test]
    fn values_follow_the_schema_type() {
        let tool = catalog_tool("mail_get");
        let args = build_arguments(&tool, None, &strings(&["12345", "--include-body"])).unwrap();
        assert_eq!(args["message_id"], "12345");
        assert_eq!(args["include_body"], true);

        let err = build_arguments(&catalog_tool("mail_by_date"), None, &strings(&["--limit=lots"]));
        assert!(matches!(err, Err(CommandError::InvalidArgs(_))));
    }

    #[test]
    fn params_override_json_and_separator_forces_positionals() {
        let tool = catalog_tool("mail_by_subject");
        let args = build_arguments(
            &tool,
            Some(r#"{"subject": "old", "scan": 100}"#),
            &strings(&["--", "--weird subject"]),
        )
        .unwrap();
        assert_eq!(args["subject"], "--weird subject");
        assert_eq!(args["scan"], 100);

        let err = build_arguments(&catalog_tool("meeting_get"), None, &strings(&["o1", "o2"]));
        assert!(matches!(err, Err(CommandError::InvalidArgs(_))));
    }

    #[test]
    fn short_flags_expand_to_parameter_names() {
        let tool = catalog_tool("drive_list");
        let args = build_arguments(&tool, None, &strings(&["-l", "3", "--path", "Reports"])).unwrap();
        assert_eq!(args["limit"], 3);
        assert_eq!(args["path"], "Reports");
    }
}

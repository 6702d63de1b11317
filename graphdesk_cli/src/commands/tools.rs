use crate::cli::Cli;
use crate::commands::Result;
use crate::output::{format_output, OutputData};
use graphdesk_core::connector::tool_catalog;
use serde_json::{json, Value};

/// Catalog entries with their parameter names; required ones are marked `*`.
pub fn catalog_json() -> Value {
    let tools: Vec<Value> = tool_catalog()
        .iter()
        .map(|tool| {
            let required: Vec<&str> = tool
                .input_schema
                .get("required")
                .and_then(|r| r.as_array())
                .map(|r| r.iter().filter_map(|v| v.as_str()).collect())
                .unwrap_or_default();
            let params: Vec<String> = tool
                .input_schema
                .get("properties")
                .and_then(|p| p.as_object())
                .map(|p| {
                    p.keys()
                        .map(|k| {
                            if required.contains(&k.as_str()) {
                                format!("{}*", k)
                            } else {
                                k.clone()
                            }
                        })
                        .collect()
                })
                .unwrap_or_default();
            json!({
                "name": tool.name,
                "description": tool.description.as_deref().unwrap_or_default(),
                "params": params.join(", "),
            })
        })
        .collect();
    Value::Array(tools)
}

pub async fn run(cli: &Cli) -> Result<()> {
    format_output(&OutputData::ToolsList(catalog_json()), &cli.output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_params_are_marked() {
        let tools = catalog_json();
        let sender = tools
            .as_array()
            .unwrap()
            .iter()
            .find(|t| t["name"] == "mail_by_sender")
            .unwrap();
        assert!(sender["params"].as_str().unwrap().contains("sender*"));
    }
}

use crate::cli::{Cli, ConfigAction};
use crate::commands::{connector, CommandError, Result};
use crate::output::{format_output, OutputData};
use graphdesk_core::auth_store::{AuthStore, FileAuthStore};
use graphdesk_core::connector::PROVIDER;
use graphdesk_core::{Connector, ConnectorConfigSchema};
use owo_colors::OwoColorize;
use serde_json::{json, Map, Value};
use std::io::{self, Write};

pub async fn run(cli: &Cli, action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => show_config(cli),
        ConfigAction::Set { field, value } => set_config(cli, field, value.as_deref()),
        ConfigAction::Remove { field } => remove_config(cli, field.as_deref()),
        ConfigAction::Test => test_config(cli).await,
    }
}

/// Stored fields with secrets masked, in the shape printed by `config show`.
pub fn config_json(schema: &ConnectorConfigSchema, store: &FileAuthStore) -> Value {
    let stored = store.load(PROVIDER).unwrap_or_default();
    let fields: Map<String, Value> = schema
        .redact(&stored)
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();
    json!({
        "config_path": store.config_path(),
        "provider": PROVIDER,
        "fields": fields,
    })
}

fn show_config(cli: &Cli) -> Result<()> {
    let store = FileAuthStore::new_default();
    let schema = connector(cli).config_schema();
    let info = config_json(&schema, &store);

    if info["fields"].as_object().map(|f| f.is_empty()).unwrap_or(true)
        && cli.output == crate::cli::OutputFormat::Pretty
    {
        println!("{}", "Nothing configured yet.".yellow());
        println!();
        println!("Config file: {}", store.config_path().dimmed());
        println!(
            "Run {} then {}.",
            "graphdesk config set client_id <id>".cyan(),
            "graphdesk login".cyan()
        );
        return Ok(());
    }
    format_output(&OutputData::ConfigInfo(info), &cli.output)
}

fn set_config(cli: &Cli, field: &str, value: Option<&str>) -> Result<()> {
    let schema = connector(cli).config_schema();
    let spec = schema
        .field(field)
        .ok_or_else(|| CommandError::InvalidConfig(format!("unknown field '{}'", field)))?;

    let value = match value {
        Some(v) => v.trim().to_string(),
        None => {
            print!("{}: ", spec.label);
            io::stdout().flush()?;
            if spec.is_secret() {
                read_secret()?
            } else {
                read_line()?
            }
        }
    };
    if value.is_empty() {
        return Err(CommandError::InvalidConfig(format!("no value given for '{}'", field)));
    }
    schema.validate(field, &value).map_err(CommandError::InvalidConfig)?;

    let store = FileAuthStore::new_default();
    let mut auth = store.load(PROVIDER).unwrap_or_default();
    auth.insert(field.to_string(), value);
    store
        .save(PROVIDER, &auth)
        .map_err(|e| CommandError::InvalidConfig(format!("failed to save: {}", e)))?;

    format_output(&OutputData::Message(format!("Saved {}.", field)), &cli.output)
}

fn remove_config(cli: &Cli, field: Option<&str>) -> Result<()> {
    let store = FileAuthStore::new_default();
    let message = match field {
        Some(field) => {
            let mut auth = store.load(PROVIDER).unwrap_or_default();
            if auth.remove(field).is_none() {
                format!("'{}' was not set.", field)
            } else {
                store
                    .save(PROVIDER, &auth)
                    .map_err(|e| CommandError::InvalidConfig(format!("failed to save: {}", e)))?;
                format!("Removed {}.", field)
            }
        }
        None => {
            let existed = store
                .remove(PROVIDER)
                .map_err(|e| CommandError::InvalidConfig(format!("failed to remove: {}", e)))?;
            if existed {
                "Removed all stored credentials.".to_string()
            } else {
                "No stored credentials.".to_string()
            }
        }
    };
    format_output(&OutputData::Message(message), &cli.output)
}

async fn test_config(cli: &Cli) -> Result<()> {
    connector(cli).test_auth().await?;
    let message = if cli.output == crate::cli::OutputFormat::Pretty {
        format!("{} Credentials work against Microsoft Graph.", "OK".green().bold())
    } else {
        "ok".to_string()
    };
    format_output(&OutputData::Message(message), &cli.output)
}

fn read_secret() -> Result<String> {
    match rpassword::read_password() {
        Ok(password) => Ok(password.trim().to_string()),
        // Not a TTY
        Err(_) => read_line(),
    }
}

fn read_line() -> Result<String> {
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphdesk_core::auth_store::MemoryAuthStore;
    use graphdesk_core::GraphConnector;
    use std::sync::Arc;

    #[test]
    fn show_masks_secrets_from_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileAuthStore::at(dir.path().join("auth.json"));
        let mut auth = graphdesk_core::auth::AuthDetails::new();
        auth.insert("client_id".to_string(), "app-123".to_string());
        auth.insert("client_secret".to_string(), "super-secret-value".to_string());
        store.save(PROVIDER, &auth).unwrap();

        let schema = GraphConnector::with_store(Default::default(), Arc::new(MemoryAuthStore::new())).config_schema();
        let info = config_json(&schema, &store);
        assert_eq!(info["fields"]["client_id"], "app-123");
        assert_eq!(info["fields"]["client_secret"], "****alue");
        assert_eq!(info["provider"], PROVIDER);
    }
}

use serde::{Deserialize, Serialize};

use crate::auth::AuthDetails;

/// Describes the auth fields a connector accepts, for `config set/show`.
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct ConnectorConfigSchema {
    pub fields: Vec<Field>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Field {
    pub name: String,
    pub label: String,
    pub field_type: FieldType,
    pub required: bool,
    pub description: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum FieldType {
    Text,
    /// Masked when displayed.
    Secret,
    Select { options: Vec<String> },
}

impl Field {
    pub fn text(name: &str, label: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            field_type: FieldType::Text,
            required: false,
            description: Some(description.to_string()),
        }
    }

    pub fn secret(name: &str, label: &str, description: &str) -> Self {
        Self {
            field_type: FieldType::Secret,
            ..Self::text(name, label, description)
        }
    }

    pub fn select(name: &str, label: &str, description: &str, options: &[&str]) -> Self {
        Self {
            field_type: FieldType::Select {
                options: options.iter().map(|o| o.to_string()).collect(),
            },
            ..Self::text(name, label, description)
        }
    }

    pub fn is_secret(&self) -> bool {
        self.field_type == FieldType::Secret
    }
}

impl ConnectorConfigSchema {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Checks a `config set` value against the field definition.
    pub fn validate(&self, name: &str, value: &str) -> Result<(), String> {
        let field = self
            .field(name)
            .ok_or_else(|| format!("unknown field '{}'", name))?;
        if let FieldType::Select { options } = &field.field_type {
            if !options.iter().any(|o| o == value) {
                return Err(format!(
                    "'{}' must be one of: {}",
                    name,
                    options.join(", ")
                ));
            }
        }
        Ok(())
    }

    /// Stored values for display, secrets reduced to their last four chars.
    /// Keys outside the schema (tokens, expiry) are masked too.
    pub fn redact(&self, auth: &AuthDetails) -> Vec<(String, String)> {
        let mut rows: Vec<(String, String)> = auth
            .iter()
            .map(|(k, v)| {
                let secret = self.field(k).map(Field::is_secret).unwrap_or(true);
                let shown = if secret { mask(v) } else { v.clone() };
                (k.clone(), shown)
            })
            .collect();
        rows.sort();
        rows
    }
}

fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}

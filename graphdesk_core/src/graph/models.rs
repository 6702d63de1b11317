//! Graph resource shapes shared by several tools.

use serde::{Deserialize, Deserializer, Serialize};

/// Graph sends `null` for some collections; treat it as empty.
pub fn nullable_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailAddress {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

impl EmailAddress {
    pub fn address_lower(&self) -> Option<String> {
        self.address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_lowercase)
    }

    /// `Name <address>`, or whichever half is present.
    pub fn display(&self) -> String {
        let name = self.name.as_deref().unwrap_or("").trim();
        let addr = self.address.as_deref().unwrap_or("").trim();
        match (name.is_empty(), addr.is_empty()) {
            (false, false) if !name.eq_ignore_ascii_case(addr) => format!("{} <{}>", name, addr),
            (false, _) => name.to_string(),
            (true, false) => addr.to_string(),
            (true, true) => String::new(),
        }
    }

    pub fn matches(&self, needle: &str) -> bool {
        crate::filters::contains_ci(self.name.as_deref().unwrap_or(""), needle)
            || crate::filters::contains_ci(self.address.as_deref().unwrap_or(""), needle)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    #[serde(default)]
    pub email_address: EmailAddress,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemBody {
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

impl ItemBody {
    /// Body as plain text, converting HTML bodies.
    pub fn text(&self) -> String {
        let content = self.content.as_deref().unwrap_or("");
        match self.content_type.as_deref() {
            Some(t) if t.eq_ignore_ascii_case("html") => crate::utils::html_to_text(content),
            _ => content.trim().to_string(),
        }
    }
}

/// `{ "dateTime": "...", "timeZone": "UTC" }` as used by calendar events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateTimeTimeZone {
    #[serde(default)]
    pub date_time: Option<String>,
    #[serde(default)]
    pub time_zone: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn display_prefers_name_and_address() {
        let full: EmailAddress =
            serde_json::from_value(json!({"name": "Adele Vance", "address": "adele@contoso.com"}))
                .unwrap();
        assert_eq!(full.display(), "Adele Vance <adele@contoso.com>");
        let same: EmailAddress =
            serde_json::from_value(json!({"name": "a@b.c", "address": "a@b.c"})).unwrap();
        assert_eq!(same.display(), "a@b.c");
        assert!(full.matches("VANCE"));
    }

    #[test]
    fn null_collections_are_empty() {
        #[derive(Deserialize)]
        struct Holder {
            #[serde(default, deserialize_with = "nullable_vec")]
            items: Vec<Recipient>,
        }
        let h: Holder = serde_json::from_value(json!({"items": null})).unwrap();
        assert!(h.items.is_empty());
    }
}

// src/lib.rs
pub mod analytics;
pub mod auth;
pub mod auth_store;
pub mod calendar;
pub mod capabilities;
pub mod connector;
pub mod drive;
pub mod error;
pub mod filters;
pub mod graph;
pub mod id_cache;
pub mod mail;
pub mod meetings;
pub mod oauth;
pub mod router;
pub mod thread;
pub mod utils;
pub mod vtt;

// Re-export the rmcp types that appear in the public API.
pub use rmcp::model::{
    CallToolRequestParam, CallToolResult, JsonObject, ListToolsResult, PaginatedRequestParam, Tool,
};

use async_trait::async_trait;

use crate::auth::AuthDetails;
pub use crate::capabilities::ConnectorConfigSchema;
pub use crate::connector::GraphConnector;
use crate::error::ConnectorError;

#[async_trait]
pub trait Connector: Send + Sync {
    /// Unique connector name, also the auth store key.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    async fn list_tools(
        &self,
        request: Option<PaginatedRequestParam>,
    ) -> Result<ListToolsResult, ConnectorError>;
    async fn call_tool(
        &self,
        request: CallToolRequestParam,
    ) -> Result<CallToolResult, ConnectorError>;

    async fn get_auth_details(&self) -> Result<AuthDetails, ConnectorError>;
    async fn set_auth_details(&mut self, details: AuthDetails) -> Result<(), ConnectorError>;
    async fn test_auth(&self) -> Result<(), ConnectorError>;
    fn config_schema(&self) -> ConnectorConfigSchema;
}

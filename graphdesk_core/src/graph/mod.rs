//! Thin Microsoft Graph transport: URL building, authenticated requests and
//! `@odata.nextLink` paging. Only the calls the tools need are covered.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::ConnectorError;
use crate::id_cache::IdCache;
use crate::oauth::TokenProvider;

pub mod models;
mod pager;
pub use pager::{collect_pages, collect_pages_raw, next_link, page_values, DEFAULT_MAX_REQUESTS};

#[async_trait]
pub trait GraphTransport: Send + Sync {
    fn base_url(&self) -> &str;

    async fn get_json(&self, url: &str) -> Result<Value, ConnectorError>;

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, ConnectorError>;

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, ConnectorError>;

    /// Authenticated PUT of raw content (small OneDrive uploads).
    async fn put_bytes(
        &self,
        url: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<Value, ConnectorError>;

    /// Unauthenticated PUT of one upload-session chunk. Upload URLs are
    /// pre-authorized and reject a bearer header.
    async fn put_chunk(
        &self,
        upload_url: &str,
        body: Vec<u8>,
        content_range: &str,
    ) -> Result<Value, ConnectorError>;
}

/// reqwest-backed transport using a shared [`TokenProvider`].
pub struct HttpGraph {
    client: reqwest::Client,
    tokens: Arc<TokenProvider>,
    base_url: String,
}

impl HttpGraph {
    pub fn new(tokens: Arc<TokenProvider>) -> Result<Self, ConnectorError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("graphdesk/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| ConnectorError::Other(e.to_string()))?;
        let base_url = tokens.settings().base_url.clone();
        Ok(Self {
            client,
            tokens,
            base_url,
        })
    }

    async fn finish(resp: reqwest::Response) -> Result<Value, ConnectorError> {
        let status = resp.status();
        let body = resp.text().await.map_err(ConnectorError::HttpRequest)?;
        if !status.is_success() {
            return Err(ConnectorError::from_graph_response(status.as_u16(), &body));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl GraphTransport for HttpGraph {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json(&self, url: &str) -> Result<Value, ConnectorError> {
        debug!(%url, "graph GET");
        let token = self.tokens.access_token().await?;
        let resp = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(ConnectorError::HttpRequest)?;
        Self::finish(resp).await
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, ConnectorError> {
        debug!(%url, "graph GET (bytes)");
        let token = self.tokens.access_token().await?;
        let resp = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(ConnectorError::HttpRequest)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ConnectorError::from_graph_response(status.as_u16(), &body));
        }
        let bytes = resp.bytes().await.map_err(ConnectorError::HttpRequest)?;
        Ok(bytes.to_vec())
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, ConnectorError> {
        debug!(%url, "graph POST");
        let token = self.tokens.access_token().await?;
        let resp = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(ConnectorError::HttpRequest)?;
        Self::finish(resp).await
    }

    async fn put_bytes(
        &self,
        url: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<Value, ConnectorError> {
        debug!(%url, len = body.len(), "graph PUT");
        let token = self.tokens.access_token().await?;
        let resp = self
            .client
            .put(url)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .map_err(ConnectorError::HttpRequest)?;
        Self::finish(resp).await
    }

    async fn put_chunk(
        &self,
        upload_url: &str,
        body: Vec<u8>,
        content_range: &str,
    ) -> Result<Value, ConnectorError> {
        debug!(range = %content_range, "graph upload chunk");
        let resp = self
            .client
            .put(upload_url)
            .header(reqwest::header::CONTENT_RANGE, content_range)
            .header(reqwest::header::CONTENT_LENGTH, body.len())
            .body(body)
            .send()
            .await
            .map_err(ConnectorError::HttpRequest)?;
        Self::finish(resp).await
    }
}

/// Whose mailbox/drive/calendar the calls address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mailbox {
    /// The signed-in user (delegated tokens).
    Me,
    /// A user id or UPN (required for app-only tokens).
    User(String),
}

impl Mailbox {
    pub fn from_option(mailbox: Option<&str>) -> Self {
        match mailbox.map(str::trim) {
            Some(m) if !m.is_empty() && m != "me" => Mailbox::User(m.to_string()),
            _ => Mailbox::Me,
        }
    }

    pub fn segments(&self) -> Vec<String> {
        match self {
            Mailbox::Me => vec!["me".to_string()],
            Mailbox::User(u) => vec!["users".to_string(), u.clone()],
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Mailbox::Me => "me",
            Mailbox::User(u) => u,
        }
    }
}

/// Percent-encodes a single path segment (Graph ids may contain `/`, `+`, `=`).
pub fn encode_segment(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

/// OData string literal with embedded quotes doubled.
pub fn odata_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Builder for Graph request URLs.
#[derive(Debug, Clone)]
pub struct GraphUrl {
    base: String,
    path: Vec<String>,
    raw_tail: Option<String>,
    params: Vec<(String, String)>,
}

impl GraphUrl {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            path: Vec::new(),
            raw_tail: None,
            params: Vec::new(),
        }
    }

    pub fn mailbox(base: &str, mailbox: &Mailbox) -> Self {
        let mut url = Self::new(base);
        url.path.extend(mailbox.segments());
        url
    }

    pub fn segment(mut self, segment: impl AsRef<str>) -> Self {
        self.path.push(segment.as_ref().to_string());
        self
    }

    /// Appends an already-shaped tail such as `root:/Docs/a b.txt:/content`;
    /// each `/`-separated piece of the item path is encoded.
    pub fn drive_path(mut self, item_path: &str, suffix: &str) -> Self {
        let cleaned = item_path.trim_matches('/');
        let encoded: Vec<String> = cleaned.split('/').map(encode_segment).collect();
        self.raw_tail = Some(format!("root:/{}:{}", encoded.join("/"), suffix));
        self
    }

    pub fn param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.push((key.to_string(), value.into()));
        self
    }

    pub fn filter(self, filter: impl Into<String>) -> Self {
        self.param("$filter", filter)
    }

    pub fn search(self, search: impl Into<String>) -> Self {
        self.param("$search", search)
    }

    pub fn orderby(self, orderby: impl Into<String>) -> Self {
        self.param("$orderby", orderby)
    }

    pub fn top(self, top: usize) -> Self {
        self.param("$top", top.to_string())
    }

    pub fn select(self, fields: &[&str]) -> Self {
        self.param("$select", fields.join(","))
    }

    pub fn build(&self) -> String {
        let mut url = self.base.clone();
        for seg in &self.path {
            url.push('/');
            url.push_str(&encode_segment(seg));
        }
        if let Some(tail) = &self.raw_tail {
            url.push('/');
            url.push_str(tail);
        }
        if !self.params.is_empty() {
            let query: Vec<String> = self
                .params
                .iter()
                .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
                .collect();
            url.push('?');
            url.push_str(&query.join("&"));
        }
        url
    }
}

/// Everything a tool needs to talk to Graph for one mailbox.
#[derive(Clone)]
pub struct GraphContext {
    pub transport: Arc<dyn GraphTransport>,
    pub mailbox: Mailbox,
    pub ids: Arc<IdCache>,
}

impl GraphContext {
    pub fn new(transport: Arc<dyn GraphTransport>, mailbox: Mailbox, ids: Arc<IdCache>) -> Self {
        Self {
            transport,
            mailbox,
            ids,
        }
    }

    /// URL rooted at the mailbox, e.g. `.../users/adele@contoso.com`.
    pub fn url(&self) -> GraphUrl {
        GraphUrl::mailbox(self.transport.base_url(), &self.mailbox)
    }

    pub async fn get(&self, url: &GraphUrl) -> Result<Value, ConnectorError> {
        self.transport.get_json(&url.build()).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted transport for unit tests: responses are matched by URL
    //! substring in registration order, and every request is recorded.
    use super::*;
    use std::sync::Mutex;

    pub enum Reply {
        Json(Value),
        Bytes(Vec<u8>),
        Fail(u16, String),
    }

    pub struct FakeGraph {
        routes: Mutex<Vec<(String, Reply)>>,
        pub requests: Mutex<Vec<String>>,
        pub uploads: Mutex<Vec<(String, usize, String)>>,
    }

    impl FakeGraph {
        pub fn new() -> Self {
            Self {
                routes: Mutex::new(Vec::new()),
                requests: Mutex::new(Vec::new()),
                uploads: Mutex::new(Vec::new()),
            }
        }

        pub fn on(self, needle: &str, reply: Reply) -> Self {
            self.routes
                .lock()
                .unwrap()
                .push((needle.to_string(), reply));
            self
        }

        pub fn json(self, needle: &str, body: Value) -> Self {
            self.on(needle, Reply::Json(body))
        }

        pub fn fail(self, needle: &str, status: u16, code: &str) -> Self {
            let body = serde_json::json!({"error": {"code": code, "message": "scripted"}});
            self.on(needle, Reply::Fail(status, body.to_string()))
        }

        pub fn requested(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }

        fn reply(&self, url: &str) -> Result<Reply, ConnectorError> {
            self.requests.lock().unwrap().push(url.to_string());
            let decoded = urlencoding::decode(url)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| url.to_string());
            let routes = self.routes.lock().unwrap();
            for (needle, reply) in routes.iter() {
                if decoded.contains(needle.as_str()) || url.contains(needle.as_str()) {
                    return Ok(match reply {
                        Reply::Json(v) => Reply::Json(v.clone()),
                        Reply::Bytes(b) => Reply::Bytes(b.clone()),
                        Reply::Fail(s, b) => Reply::Fail(*s, b.clone()),
                    });
                }
            }
            Err(ConnectorError::from_graph_response(
                404,
                r#"{"error":{"code":"ItemNotFound","message":"no route"}}"#,
            ))
        }
    }

    #[async_trait]
    impl GraphTransport for FakeGraph {
        fn base_url(&self) -> &str {
            "https://graph.test/v1.0"
        }

        async fn get_json(&self, url: &str) -> Result<Value, ConnectorError> {
            match self.reply(url)? {
                Reply::Json(v) => Ok(v),
                Reply::Bytes(b) => Ok(serde_json::from_slice(&b)?),
                Reply::Fail(s, b) => Err(ConnectorError::from_graph_response(s, &b)),
            }
        }

        async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, ConnectorError> {
            match self.reply(url)? {
                Reply::Bytes(b) => Ok(b),
                Reply::Json(v) => Ok(v.to_string().into_bytes()),
                Reply::Fail(s, b) => Err(ConnectorError::from_graph_response(s, &b)),
            }
        }

        async fn post_json(&self, url: &str, _body: &Value) -> Result<Value, ConnectorError> {
            self.get_json(url).await
        }

        async fn put_bytes(
            &self,
            url: &str,
            body: Vec<u8>,
            _content_type: &str,
        ) -> Result<Value, ConnectorError> {
            self.uploads
                .lock()
                .unwrap()
                .push((url.to_string(), body.len(), String::new()));
            self.get_json(url).await
        }

        async fn put_chunk(
            &self,
            upload_url: &str,
            body: Vec<u8>,
            content_range: &str,
        ) -> Result<Value, ConnectorError> {
            self.uploads.lock().unwrap().push((
                upload_url.to_string(),
                body.len(),
                content_range.to_string(),
            ));
            // Last chunk returns the drive item; earlier ones the next range.
            let total_done = content_range
                .rsplit('/')
                .next()
                .and_then(|t| t.parse::<u64>().ok())
                .zip(
                    content_range
                        .trim_start_matches("bytes ")
                        .split('-')
                        .nth(1)
                        .and_then(|s| s.split('/').next())
                        .and_then(|e| e.parse::<u64>().ok()),
                )
                .map(|(total, end)| end + 1 == total)
                .unwrap_or(false);
            if total_done {
                Ok(serde_json::json!({"id": "uploaded-item", "name": "big.bin"}))
            } else {
                Ok(serde_json::json!({"nextExpectedRanges": []}))
            }
        }
    }

    pub fn context(fake: FakeGraph) -> (GraphContext, Arc<FakeGraph>) {
        let fake = Arc::new(fake);
        let ctx = GraphContext::new(
            fake.clone(),
            Mailbox::User("adele@contoso.com".to_string()),
            Arc::new(IdCache::default()),
        );
        (ctx, fake)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_encoded_urls() {
        let url = GraphUrl::mailbox(
            "https://graph.microsoft.com/v1.0/",
            &Mailbox::User("adele@contoso.com".into()),
        )
        .segment("messages")
        .filter(format!("conversationId eq {}", odata_quote("AAQ'x")))
        .top(50)
        .build();
        assert_eq!(
            url,
            "https://graph.microsoft.com/v1.0/users/adele%40contoso.com/messages?$filter=conversationId%20eq%20%27AAQ%27%27x%27&$top=50"
        );
    }

    #[test]
    fn drive_paths_keep_separators() {
        let url = GraphUrl::new("https://g/v1.0")
            .segment("me")
            .segment("drive")
            .drive_path("/Reports/Q1 plan.xlsx", "/content")
            .build();
        assert_eq!(
            url,
            "https://g/v1.0/me/drive/root:/Reports/Q1%20plan.xlsx:/content"
        );
    }

    #[test]
    fn mailbox_from_option() {
        assert_eq!(Mailbox::from_option(None), Mailbox::Me);
        assert_eq!(Mailbox::from_option(Some(" me ")), Mailbox::Me);
        assert_eq!(
            Mailbox::from_option(Some("a@b.c")),
            Mailbox::User("a@b.c".into())
        );
    }
}

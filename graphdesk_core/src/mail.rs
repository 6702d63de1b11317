//! Outlook mail tools: by date, sender, subject and id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ConnectorError;
use crate::filters::{contains_ci, parse_graph_datetime, DateRange};
use crate::graph::models::{nullable_vec, ItemBody, Recipient};
use crate::graph::{collect_pages, GraphContext};
use crate::id_cache::{HandleKind, IdCache};
use crate::utils::truncate_chars;

pub const DEFAULT_LIMIT: usize = 25;
pub const MAX_LIMIT: usize = 200;
pub const DEFAULT_SCAN: usize = 250;
pub const PAGE_SIZE: usize = 50;

/// Fields requested for listings; `body` is only fetched for single messages.
pub const MESSAGE_FIELDS: &[&str] = &[
    "id",
    "conversationId",
    "subject",
    "from",
    "toRecipients",
    "ccRecipients",
    "sentDateTime",
    "receivedDateTime",
    "bodyPreview",
    "webLink",
    "hasAttachments",
    "isRead",
    "parentFolderId",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailMessage {
    pub id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub from: Option<Recipient>,
    #[serde(default, deserialize_with = "nullable_vec")]
    pub to_recipients: Vec<Recipient>,
    #[serde(default, deserialize_with = "nullable_vec")]
    pub cc_recipients: Vec<Recipient>,
    #[serde(default)]
    pub sent_date_time: Option<String>,
    #[serde(default)]
    pub received_date_time: Option<String>,
    #[serde(default)]
    pub body_preview: Option<String>,
    #[serde(default)]
    pub body: Option<ItemBody>,
    #[serde(default)]
    pub web_link: Option<String>,
    #[serde(default)]
    pub has_attachments: Option<bool>,
    #[serde(default)]
    pub is_read: Option<bool>,
    #[serde(default)]
    pub parent_folder_id: Option<String>,
}

impl MailMessage {
    pub fn from_value(value: Value) -> Option<Self> {
        match serde_json::from_value::<MailMessage>(value) {
            Ok(m) if !m.id.is_empty() => Some(m),
            Ok(_) => None,
            Err(e) => {
                debug!("skipping unparseable message: {}", e);
                None
            }
        }
    }

    /// Sent time, falling back to received time.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.sent_date_time
            .as_deref()
            .and_then(parse_graph_datetime)
            .or_else(|| {
                self.received_date_time
                    .as_deref()
                    .and_then(parse_graph_datetime)
            })
    }

    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        self.received_date_time
            .as_deref()
            .and_then(parse_graph_datetime)
            .or_else(|| self.timestamp())
    }

    pub fn sender_display(&self) -> String {
        self.from
            .as_ref()
            .map(|r| r.email_address.display())
            .unwrap_or_default()
    }

    pub fn sender_matches(&self, needle: &str) -> bool {
        self.from
            .as_ref()
            .map(|r| r.email_address.matches(needle))
            .unwrap_or(false)
    }

    pub fn subject_str(&self) -> &str {
        self.subject.as_deref().unwrap_or("")
    }

    pub fn summary(&self, ids: &IdCache, include_body: bool) -> MailSummary {
        MailSummary {
            handle: ids.remember(HandleKind::Mail, &self.id),
            id: self.id.clone(),
            conversation_id: self.conversation_id.clone(),
            subject: self.subject_str().to_string(),
            from: self.sender_display(),
            to: self
                .to_recipients
                .iter()
                .chain(self.cc_recipients.iter())
                .map(|r| r.email_address.display())
                .filter(|s| !s.is_empty())
                .collect(),
            received: self.received_date_time.clone(),
            sent: self.sent_date_time.clone(),
            preview: truncate_chars(self.body_preview.as_deref().unwrap_or("").trim(), 240),
            body: if include_body {
                self.body.as_ref().map(ItemBody::text)
            } else {
                None
            },
            web_link: self.web_link.clone(),
            has_attachments: self.has_attachments.unwrap_or(false),
            is_read: self.is_read,
        }
    }
}

/// What the tools hand back per message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailSummary {
    pub handle: String,
    pub id: String,
    pub conversation_id: Option<String>,
    pub subject: String,
    pub from: String,
    pub to: Vec<String>,
    pub received: Option<String>,
    pub sent: Option<String>,
    pub preview: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub web_link: Option<String>,
    pub has_attachments: bool,
    pub is_read: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MailList {
    pub query: String,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scanned: Option<usize>,
    pub messages: Vec<MailSummary>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MailByDateInput {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default)]
    pub until: Option<String>,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MailBySenderInput {
    pub sender: String,
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default)]
    pub until: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub scan: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MailBySubjectInput {
    pub subject: String,
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default)]
    pub until: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub scan: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MailGetInput {
    pub message_id: String,
    #[serde(default)]
    pub include_body: bool,
}

pub(crate) fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

pub(crate) fn clamp_scan(scan: Option<usize>) -> usize {
    scan.unwrap_or(DEFAULT_SCAN).clamp(PAGE_SIZE, 1000)
}

/// Optional range from `since`/`until` arguments.
pub(crate) fn optional_range(
    since: Option<&str>,
    until: Option<&str>,
) -> Result<Option<DateRange>, ConnectorError> {
    let has = |v: Option<&str>| v.map(|s| !s.trim().is_empty()).unwrap_or(false);
    if !has(since) && !has(until) {
        return Ok(None);
    }
    if !has(since) {
        return Err(ConnectorError::InvalidParams(
            "'until' needs a 'since'".to_string(),
        ));
    }
    DateRange::from_args(None, since, until, Utc::now()).map(Some)
}

/// Most recent messages (newest first), optionally restricted to a received
/// window server-side. Returns the parsed messages and how many were scanned.
pub async fn scan_recent(
    ctx: &GraphContext,
    folder: Option<&str>,
    range: Option<&DateRange>,
    cap: usize,
) -> Result<Vec<MailMessage>, ConnectorError> {
    let mut url = ctx.url();
    if let Some(f) = folder.map(str::trim).filter(|f| !f.is_empty()) {
        url = url.segment("mailFolders").segment(f);
    }
    url = url.segment("messages");
    if let Some(r) = range {
        url = url.filter(r.odata_filter("receivedDateTime"));
    }
    let url = url
        .orderby("receivedDateTime desc")
        .top(PAGE_SIZE.min(cap.max(1)))
        .select(MESSAGE_FIELDS)
        .build();
    let pages = cap.div_ceil(PAGE_SIZE) + 1;
    let collected = collect_pages(ctx.transport.as_ref(), &url, cap, pages).await?;
    debug!(
        scanned = collected.items.len(),
        requests = collected.requests,
        "scanned recent mail"
    );
    Ok(collected
        .items
        .into_iter()
        .filter_map(MailMessage::from_value)
        .collect())
}

pub async fn by_date(ctx: &GraphContext, input: MailByDateInput) -> Result<MailList, ConnectorError> {
    let range = DateRange::from_args(
        input.date.as_deref(),
        input.since.as_deref(),
        input.until.as_deref(),
        Utc::now(),
    )?;
    let limit = clamp_limit(input.limit);
    let messages = scan_recent(ctx, input.folder.as_deref(), Some(&range), limit).await?;
    let summaries: Vec<MailSummary> = messages
        .iter()
        .filter(|m| m.received_at().map(|at| range.contains(&at)).unwrap_or(false))
        .map(|m| m.summary(&ctx.ids, false))
        .collect();
    Ok(MailList {
        query: describe_range(&range),
        count: summaries.len(),
        scanned: None,
        messages: summaries,
    })
}

pub async fn by_sender(
    ctx: &GraphContext,
    input: MailBySenderInput,
) -> Result<MailList, ConnectorError> {
    let sender = input.sender.trim().to_string();
    if sender.is_empty() {
        return Err(ConnectorError::InvalidParams("sender is required".to_string()));
    }
    let range = optional_range(input.since.as_deref(), input.until.as_deref())?;
    filtered_scan(
        ctx,
        sender.clone(),
        range,
        input.limit,
        input.scan,
        |m| m.sender_matches(&sender),
    )
    .await
}

pub async fn by_subject(
    ctx: &GraphContext,
    input: MailBySubjectInput,
) -> Result<MailList, ConnectorError> {
    let subject = input.subject.trim().to_string();
    if subject.is_empty() {
        return Err(ConnectorError::InvalidParams("subject is required".to_string()));
    }
    let range = optional_range(input.since.as_deref(), input.until.as_deref())?;
    filtered_scan(
        ctx,
        subject.clone(),
        range,
        input.limit,
        input.scan,
        |m| contains_ci(m.subject_str(), &subject),
    )
    .await
}

async fn filtered_scan<F>(
    ctx: &GraphContext,
    query: String,
    range: Option<DateRange>,
    limit: Option<usize>,
    scan: Option<usize>,
    keep: F,
) -> Result<MailList, ConnectorError>
where
    F: Fn(&MailMessage) -> bool,
{
    let limit = clamp_limit(limit);
    let cap = clamp_scan(scan);
    let scanned = scan_recent(ctx, None, range.as_ref(), cap).await?;
    let total = scanned.len();
    let summaries: Vec<MailSummary> = scanned
        .iter()
        .filter(|m| keep(m))
        .take(limit)
        .map(|m| m.summary(&ctx.ids, false))
        .collect();
    Ok(MailList {
        query,
        count: summaries.len(),
        scanned: Some(total),
        messages: summaries,
    })
}

pub async fn fetch_message(
    ctx: &GraphContext,
    message_id: &str,
    include_body: bool,
) -> Result<MailMessage, ConnectorError> {
    let id = ctx.ids.resolve(message_id);
    if id.is_empty() {
        return Err(ConnectorError::InvalidParams(
            "message_id is required".to_string(),
        ));
    }
    let mut fields: Vec<&str> = MESSAGE_FIELDS.to_vec();
    if include_body {
        fields.push("body");
    }
    let url = ctx
        .url()
        .segment("messages")
        .segment(&id)
        .select(&fields);
    let value = ctx.get(&url).await?;
    MailMessage::from_value(value)
        .ok_or_else(|| ConnectorError::Other(format!("message {} could not be parsed", id)))
}

#[derive(Debug, Clone, Serialize)]
pub struct MailDetail {
    pub message: MailSummary,
}

pub async fn get(ctx: &GraphContext, input: MailGetInput) -> Result<MailDetail, ConnectorError> {
    let message = fetch_message(ctx, &input.message_id, input.include_body).await?;
    Ok(MailDetail {
        message: message.summary(&ctx.ids, input.include_body),
    })
}

pub(crate) fn describe_range(range: &DateRange) -> String {
    format!(
        "{} .. {}",
        crate::filters::to_graph_datetime(&range.start),
        crate::filters::to_graph_datetime(&range.end)
    )
}

#[cfg(test)]
pub(crate) fn message_json(id: &str, conversation: &str, from: &str, subject: &str, sent: &str) -> Value {
    serde_json::json!({
        "id": id,
        "conversationId": conversation,
        "subject": subject,
        "from": {"emailAddress": {"name": from, "address": format!("{}@contoso.com", from.to_lowercase())}},
        "toRecipients": [{"emailAddress": {"name": "Adele Vance", "address": "adele@contoso.com"}}],
        "ccRecipients": null,
        "sentDateTime": sent,
        "receivedDateTime": sent,
        "bodyPreview": format!("preview of {}", subject),
        "parentFolderId": "inbox-folder-id"
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::testing::{context, FakeGraph};
    use serde_json::json;

    #[tokio::test]
    async fn sender_scan_matches_name_or_address() {
        let fake = FakeGraph::new().json(
            "/messages",
            json!({"value": [
                message_json("m-1", "c1", "Megan", "Budget", "2024-05-01T10:00:00Z"),
                message_json("m-2", "c2", "Alex", "Lunch", "2024-05-01T09:00:00Z"),
                message_json("m-3", "c3", "Megan", "Re: Budget", "2024-04-30T09:00:00Z"),
            ]}),
        );
        let (ctx, fake) = context(fake);
        let list = by_sender(
            &ctx,
            MailBySenderInput {
                sender: "megan@".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(list.count, 2);
        assert_eq!(list.scanned, Some(3));
        assert_eq!(list.messages[0].handle, "m1");
        assert_eq!(list.messages[0].from, "Megan <megan@contoso.com>");
        let url = &fake.requested()[0];
        assert!(url.contains("$orderby=receivedDateTime%20desc"));
        assert!(url.starts_with("https://graph.test/v1.0/users/adele%40contoso.com/messages?"));
    }

    #[tokio::test]
    async fn date_listing_filters_server_and_client_side() {
        let fake = FakeGraph::new().json(
            "/messages",
            json!({"value": [
                message_json("in", "c1", "Megan", "Inside", "2024-05-01T10:00:00.0000000Z"),
                message_json("out", "c2", "Alex", "Outside", "2024-05-03T10:00:00Z"),
            ]}),
        );
        let (ctx, fake) = context(fake);
        let list = by_date(
            &ctx,
            MailByDateInput {
                date: Some("2024-05-01".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(list.count, 1);
        assert_eq!(list.messages[0].id, "in");
        let decoded = urlencoding::decode(&fake.requested()[0]).unwrap().into_owned();
        assert!(decoded.contains(
            "$filter=receivedDateTime ge 2024-05-01T00:00:00Z and receivedDateTime le 2024-05-01T23:59:59.9999999Z"
        ));
    }

    #[tokio::test]
    async fn get_resolves_handles_and_converts_html() {
        let mut msg = message_json("AAMk-long", "c1", "Megan", "Hello", "2024-05-01T10:00:00Z");
        msg["body"] = json!({"contentType": "html", "content": "<p>Hi&nbsp;there</p>"});
        let fake = FakeGraph::new().json("messages/AAMk-long", msg);
        let (ctx, _fake) = context(fake);
        let handle = ctx.ids.remember(HandleKind::Mail, "AAMk-long");
        let detail = get(
            &ctx,
            MailGetInput {
                message_id: handle,
                include_body: true,
            },
        )
        .await
        .unwrap();
        assert_eq!(detail.message.body.as_deref(), Some("Hi there"));
        assert_eq!(detail.message.to, vec!["Adele Vance <adele@contoso.com>"]);
    }

    #[test]
    fn until_without_since_is_rejected() {
        assert!(optional_range(None, Some("2024-05-01")).is_err());
        assert!(optional_range(None, None).unwrap().is_none());
    }
}

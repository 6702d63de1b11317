//! Conversation-thread reconstruction.
//!
//! Graph has no single reliable "give me this conversation" call: `$search`
//! is not available on every mailbox, `conversationId` filters are rejected
//! on some folders as too complex, and messages may live outside the folder
//! being queried. [`ConversationResolver`] therefore walks a fixed chain of
//! progressively broader strategies and stops at the first one that yields
//! messages:
//!
//! 1. `$search="conversationId:<id>"` over the mailbox,
//! 2. `$filter=conversationId eq '<id>'` in one folder, ordered by sent time,
//! 3. the same filter in the inbox,
//! 4. a bounded scan of the most recent messages, matched client-side.
//!
//! A failing strategy is logged and the next one is tried; results of
//! different strategies are never merged. Messages are keyed by lower-cased
//! id, a later copy replacing an earlier one, and returned oldest first.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ConnectorError;
use crate::graph::{collect_pages_raw, odata_quote, GraphContext};
use crate::mail::{fetch_message, MailMessage, MailSummary, MESSAGE_FIELDS};

pub const DEFAULT_SCAN_CAP: usize = 250;
pub const MIN_SCAN_CAP: usize = 100;
pub const MAX_SCAN_CAP: usize = 1000;
pub const DEFAULT_FOLDER: &str = "sentitems";
const MAX_THREAD_MESSAGES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Search,
    FolderFilter,
    InboxFilter,
    RecentScan,
}

impl Strategy {
    pub const CHAIN: [Strategy; 4] = [
        Strategy::Search,
        Strategy::FolderFilter,
        Strategy::InboxFilter,
        Strategy::RecentScan,
    ];
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Strategy::Search => "search",
            Strategy::FolderFilter => "folder_filter",
            Strategy::InboxFilter => "inbox_filter",
            Strategy::RecentScan => "recent_scan",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Found { count: usize },
    Empty,
    Skipped { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attempt {
    pub strategy: Strategy,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone)]
pub struct ResolverOptions {
    /// Folder for the folder-scoped filter (well-known name or folder id).
    pub folder: Option<String>,
    /// Messages examined by the recent scan; clamped to 100..=1000.
    pub scan_cap: usize,
    pub page_size: usize,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            folder: None,
            scan_cap: DEFAULT_SCAN_CAP,
            page_size: 50,
        }
    }
}

impl ResolverOptions {
    pub fn scan_cap(&self) -> usize {
        self.scan_cap.clamp(MIN_SCAN_CAP, MAX_SCAN_CAP)
    }

    fn folder(&self) -> &str {
        self.folder
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .unwrap_or(DEFAULT_FOLDER)
    }
}

#[derive(Debug, Clone)]
pub struct ConversationThread {
    pub conversation_id: String,
    /// Strategy whose results make up the thread, if any produced messages.
    pub strategy: Option<Strategy>,
    pub attempts: Vec<Attempt>,
    pub messages: Vec<MailMessage>,
}

pub struct ConversationResolver<'a> {
    ctx: &'a GraphContext,
    options: ResolverOptions,
}

impl<'a> ConversationResolver<'a> {
    pub fn new(ctx: &'a GraphContext, options: ResolverOptions) -> Self {
        Self { ctx, options }
    }

    pub async fn resolve(&self, conversation_id: &str) -> ConversationThread {
        self.resolve_seeded(conversation_id, Vec::new()).await
    }

    /// Runs the strategy chain. `seed` messages enter the dedupe map first,
    /// so copies returned by a strategy replace them.
    pub async fn resolve_seeded(
        &self,
        conversation_id: &str,
        seed: Vec<MailMessage>,
    ) -> ConversationThread {
        let mut attempts = Vec::new();
        let mut winner = None;
        let mut found = Vec::new();

        let folder_is_inbox = self.options.folder().eq_ignore_ascii_case("inbox");
        for strategy in Strategy::CHAIN {
            if strategy == Strategy::InboxFilter && folder_is_inbox {
                attempts.push(Attempt {
                    strategy,
                    outcome: Outcome::Skipped {
                        reason: "folder filter already targeted the inbox".to_string(),
                    },
                });
                continue;
            }

            match self.run(strategy, conversation_id).await {
                Ok(messages) if !messages.is_empty() => {
                    info!(%strategy, count = messages.len(), "conversation resolved");
                    attempts.push(Attempt {
                        strategy,
                        outcome: Outcome::Found {
                            count: messages.len(),
                        },
                    });
                    winner = Some(strategy);
                    found = messages;
                    break;
                }
                Ok(_) => {
                    debug!(%strategy, "conversation strategy returned nothing");
                    attempts.push(Attempt {
                        strategy,
                        outcome: Outcome::Empty,
                    });
                }
                Err(e) => {
                    warn!(%strategy, error = %e, "conversation strategy failed");
                    attempts.push(Attempt {
                        strategy,
                        outcome: Outcome::Failed {
                            error: e.to_string(),
                        },
                    });
                }
            }
        }

        ConversationThread {
            conversation_id: conversation_id.to_string(),
            strategy: winner,
            attempts,
            messages: merge_and_sort(seed, found),
        }
    }

    async fn run(
        &self,
        strategy: Strategy,
        conversation_id: &str,
    ) -> Result<Vec<MailMessage>, ConnectorError> {
        let page = self.options.page_size.clamp(1, 100);
        let (url, cap) = match strategy {
            Strategy::Search => (
                self.ctx
                    .url()
                    .segment("messages")
                    .search(format!("\"conversationId:{}\"", conversation_id))
                    .top(page)
                    .select(MESSAGE_FIELDS),
                MAX_THREAD_MESSAGES,
            ),
            Strategy::FolderFilter | Strategy::InboxFilter => {
                let folder = if strategy == Strategy::InboxFilter {
                    "inbox"
                } else {
                    self.options.folder()
                };
                (
                    self.ctx
                        .url()
                        .segment("mailFolders")
                        .segment(folder)
                        .segment("messages")
                        .filter(format!(
                            "conversationId eq {}",
                            odata_quote(conversation_id)
                        ))
                        .orderby("sentDateTime asc")
                        .top(page)
                        .select(MESSAGE_FIELDS),
                    MAX_THREAD_MESSAGES,
                )
            }
            Strategy::RecentScan => (
                self.ctx
                    .url()
                    .segment("messages")
                    .orderby("receivedDateTime desc")
                    .top(page)
                    .select(MESSAGE_FIELDS),
                self.options.scan_cap(),
            ),
        };

        let max_requests = cap.div_ceil(page) + 1;
        let collected =
            collect_pages_raw(self.ctx.transport.as_ref(), &url.build(), cap, max_requests).await?;
        debug!(
            %strategy,
            fetched = collected.items.len(),
            requests = collected.requests,
            "conversation strategy page walk"
        );

        // Search is full-text and may return neighbours; every strategy is
        // held to exact conversationId equality.
        Ok(collected
            .items
            .into_iter()
            .filter_map(MailMessage::from_value)
            .filter(|m| m.conversation_id.as_deref() == Some(conversation_id))
            .collect())
    }
}

/// Dedupes by lower-cased id (later entries win) and orders by sent time,
/// falling back to received time, ties broken by id.
pub fn merge_and_sort(seed: Vec<MailMessage>, found: Vec<MailMessage>) -> Vec<MailMessage> {
    let mut by_id: HashMap<String, MailMessage> = HashMap::new();
    for message in seed.into_iter().chain(found) {
        by_id.insert(message.id.to_lowercase(), message);
    }
    let mut messages: Vec<(String, MailMessage)> = by_id.into_iter().collect();
    messages.sort_by(|(ka, a), (kb, b)| {
        let (ta, tb) = (a.timestamp(), b.timestamp());
        ta.is_none()
            .cmp(&tb.is_none())
            .then(ta.cmp(&tb))
            .then_with(|| ka.cmp(kb))
    });
    messages.into_iter().map(|(_, m)| m).collect()
}

/// Fetches `message_id`, then resolves its conversation. The fetched message
/// seeds the thread; the folder strategy defaults to the message's own folder.
pub async fn thread_for_message(
    ctx: &GraphContext,
    message_id: &str,
    mut options: ResolverOptions,
) -> Result<ConversationThread, ConnectorError> {
    let message = fetch_message(ctx, message_id, false).await?;
    let conversation_id = message
        .conversation_id
        .clone()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| {
            ConnectorError::Other(format!("message {} has no conversationId", message.id))
        })?;
    if options.folder.is_none() {
        options.folder = message.parent_folder_id.clone();
    }
    let resolver = ConversationResolver::new(ctx, options);
    Ok(resolver
        .resolve_seeded(&conversation_id, vec![message])
        .await)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MailThreadInput {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub scan_cap: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreadView {
    pub conversation_id: String,
    pub strategy: Option<Strategy>,
    pub attempts: Vec<Attempt>,
    pub count: usize,
    pub messages: Vec<MailSummary>,
}

/// `mail_thread` tool: thread by message id (or handle) or by conversation id.
pub async fn thread(ctx: &GraphContext, input: MailThreadInput) -> Result<ThreadView, ConnectorError> {
    let options = ResolverOptions {
        folder: input.folder.clone(),
        scan_cap: input.scan_cap.unwrap_or(DEFAULT_SCAN_CAP),
        ..Default::default()
    };
    let nonempty = |v: &Option<String>| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
    let thread = match (nonempty(&input.message_id), nonempty(&input.conversation_id)) {
        (Some(message_id), _) => thread_for_message(ctx, &message_id, options).await?,
        (None, Some(conversation_id)) => {
            ConversationResolver::new(ctx, options)
                .resolve(&conversation_id)
                .await
        }
        (None, None) => {
            return Err(ConnectorError::InvalidParams(
                "provide message_id or conversation_id".to_string(),
            ))
        }
    };
    let messages: Vec<MailSummary> = thread
        .messages
        .iter()
        .map(|m| m.summary(&ctx.ids, false))
        .collect();
    Ok(ThreadView {
        conversation_id: thread.conversation_id,
        strategy: thread.strategy,
        attempts: thread.attempts,
        count: messages.len(),
        messages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::testing::{context, FakeGraph};
    use crate::mail::message_json;
    use serde_json::{json, Value};

    const CONV: &str = "AAQkADAwATM0MDAAMS1iNTcwLWI2NTEtMDACLTAwCgAQAO'x=";

    fn ids(thread: &ConversationThread) -> Vec<&str> {
        thread.messages.iter().map(|m| m.id.as_str()).collect()
    }

    #[tokio::test]
    async fn search_hit_stops_the_chain() {
        let fake = FakeGraph::new().json(
            "$search=",
            json!({"value": [
                message_json("B", CONV, "Megan", "Re: plan", "2024-05-02T09:00:00Z"),
                message_json("a", CONV, "Alex", "plan", "2024-05-01T09:00:00Z"),
                message_json("other", "different", "Alex", "plan v2", "2024-05-01T08:00:00Z"),
            ]}),
        );
        let (ctx, fake) = context(fake);
        let thread = ConversationResolver::new(&ctx, ResolverOptions::default())
            .resolve(CONV)
            .await;
        assert_eq!(thread.strategy, Some(Strategy::Search));
        assert_eq!(ids(&thread), vec!["a", "B"]);
        assert_eq!(thread.attempts.len(), 1);
        let requested = fake.requested();
        assert_eq!(requested.len(), 1);
        let decoded = urlencoding::decode(&requested[0]).unwrap().into_owned();
        assert!(decoded.contains(&format!("$search=\"conversationId:{}\"", CONV)));
    }

    #[tokio::test]
    async fn falls_through_failures_and_empties_to_inbox() {
        let fake = FakeGraph::new()
            .fail("$search=", 400, "SearchNotSupported")
            .json("mailFolders/sentitems/messages", json!({"value": []}))
            .json(
                "mailFolders/inbox/messages",
                json!({"value": [message_json("i1", CONV, "Megan", "Re: plan", "2024-05-02T09:00:00Z")]}),
            )
            .json("$orderby=receivedDateTime desc", json!({"value": [
                message_json("never", CONV, "Megan", "x", "2024-05-02T09:00:00Z")
            ]}));
        let (ctx, fake) = context(fake);
        let thread = ConversationResolver::new(&ctx, ResolverOptions::default())
            .resolve(CONV)
            .await;
        assert_eq!(thread.strategy, Some(Strategy::InboxFilter));
        assert_eq!(ids(&thread), vec!["i1"]);
        assert!(matches!(thread.attempts[0].outcome, Outcome::Failed { .. }));
        assert_eq!(thread.attempts[1].outcome, Outcome::Empty);
        assert_eq!(thread.attempts[2].outcome, Outcome::Found { count: 1 });
        assert_eq!(fake.requested().len(), 3);

        let folder_url = urlencoding::decode(&fake.requested()[1]).unwrap().into_owned();
        assert!(folder_url.contains("$filter=conversationId eq 'AAQkADAwATM0MDAAMS1iNTcwLWI2NTEtMDACLTAwCgAQAO''x='"));
        assert!(folder_url.contains("$orderby=sentDateTime asc"));
    }

    #[tokio::test]
    async fn recent_scan_matches_exactly_and_sorts() {
        let fake = FakeGraph::new()
            .fail("$search=", 400, "SearchNotSupported")
            .fail("mailFolders/", 400, "InefficientFilter")
            .json(
                "$orderby=receivedDateTime desc",
                json!({"value": [
                    message_json("late", CONV, "Megan", "Re: plan", "2024-05-03T09:00:00Z"),
                    message_json("noise", "other-conv", "Megan", "lunch", "2024-05-02T09:00:00Z"),
                    message_json("early", CONV, "Alex", "plan", "2024-05-01T09:00:00Z"),
                ]}),
            );
        let (ctx, fake) = context(fake);
        let options = ResolverOptions {
            scan_cap: 5,
            ..Default::default()
        };
        assert_eq!(options.scan_cap(), MIN_SCAN_CAP);
        let thread = ConversationResolver::new(&ctx, options).resolve(CONV).await;
        assert_eq!(thread.strategy, Some(Strategy::RecentScan));
        assert_eq!(ids(&thread), vec!["early", "late"]);
        assert_eq!(thread.attempts.len(), 4);
        assert_eq!(fake.requested().len(), 4);
    }

    fn scan_page(page: usize, size: usize) -> Value {
        let value: Vec<Value> = (0..size)
            .map(|i| message_json(&format!("p{}-{}", page, i), CONV, "Megan", "Re: plan", "2024-05-01T09:00:00Z"))
            .collect();
        json!({
            "value": value,
            "@odata.nextLink": format!("https://graph.test/v1.0/me/messages?$skiptoken=page{}", page + 1),
        })
    }

    #[tokio::test]
    async fn recent_scan_stops_at_the_cap_across_pages() {
        let mut fake = FakeGraph::new()
            .fail("$search=", 400, "SearchNotSupported")
            .fail("mailFolders/", 400, "InefficientFilter");
        for page in 1..6 {
            fake = fake.json(&format!("$skiptoken=page{}", page), scan_page(page, 40));
        }
        let fake = fake.json("$orderby=receivedDateTime desc", scan_page(0, 40));
        let (ctx, fake) = context(fake);
        let options = ResolverOptions {
            scan_cap: 100,
            page_size: 40,
            ..Default::default()
        };
        let thread = ConversationResolver::new(&ctx, options).resolve(CONV).await;

        assert_eq!(thread.strategy, Some(Strategy::RecentScan));
        assert_eq!(thread.messages.len(), 100);
        assert_eq!(thread.attempts[3].outcome, Outcome::Found { count: 100 });
        // search, two folder filters, then three scan pages (40 + 40 + 20).
        let requested = fake.requested();
        assert_eq!(requested.len(), 6);
        assert!(requested[5].contains("page2"));
        assert!(!requested.iter().any(|u| u.contains("page3")));
    }

    #[test]
    fn scan_cap_is_clamped() {
        let cap = |scan_cap| ResolverOptions { scan_cap, ..Default::default() }.scan_cap();
        assert_eq!(cap(5), MIN_SCAN_CAP);
        assert_eq!(cap(DEFAULT_SCAN_CAP), 250);
        assert_eq!(cap(5000), MAX_SCAN_CAP);
        assert_eq!(cap(5000), 1000);
    }

    #[tokio::test]
    async fn exhausted_chain_yields_empty_thread() {
        let fake = FakeGraph::new()
            .json("$search=", json!({"value": []}))
            .json("mailFolders/", json!({"value": []}))
            .json("$orderby=receivedDateTime desc", json!({"value": []}));
        let (ctx, _fake) = context(fake);
        let thread = ConversationResolver::new(&ctx, ResolverOptions::default())
            .resolve(CONV)
            .await;
        assert!(thread.messages.is_empty());
        assert_eq!(thread.strategy, None);
        assert_eq!(
            thread
                .attempts
                .iter()
                .map(|a| a.strategy)
                .collect::<Vec<_>>(),
            Strategy::CHAIN.to_vec()
        );
    }

    #[tokio::test]
    async fn inbox_strategy_is_skipped_when_folder_is_inbox() {
        let fake = FakeGraph::new()
            .json("$search=", json!({"value": []}))
            .json("mailFolders/", json!({"value": []}))
            .json("$orderby=receivedDateTime desc", json!({"value": []}));
        let (ctx, fake) = context(fake);
        let options = ResolverOptions {
            folder: Some("Inbox".into()),
            ..Default::default()
        };
        let thread = ConversationResolver::new(&ctx, options).resolve(CONV).await;
        assert!(matches!(thread.attempts[2].outcome, Outcome::Skipped { .. }));
        assert_eq!(fake.requested().len(), 3);
    }

    #[tokio::test]
    async fn thread_copy_replaces_the_seed_message() {
        let mut seed = message_json("MSG1", CONV, "Megan", "Re: plan", "2024-05-02T09:00:00Z");
        seed["parentFolderId"] = json!("FOLDERX");
        let mut newer = message_json("msg1", CONV, "Megan", "Re: plan (edited)", "2024-05-02T09:00:00Z");
        newer["isRead"] = json!(true);
        let fake = FakeGraph::new()
            .json("messages/MSG1", seed)
            .json("$search=", json!({"value": []}))
            .json(
                "mailFolders/FOLDERX/messages",
                json!({"value": [
                    newer,
                    message_json("first", CONV, "Alex", "plan", "2024-05-01T09:00:00Z"),
                ]}),
            );
        let (ctx, _fake) = context(fake);
        let thread = thread_for_message(&ctx, "MSG1", ResolverOptions::default())
            .await
            .unwrap();
        assert_eq!(thread.strategy, Some(Strategy::FolderFilter));
        assert_eq!(ids(&thread), vec!["first", "msg1"]);
        assert_eq!(thread.messages[1].subject_str(), "Re: plan (edited)");
    }

    #[test]
    fn later_duplicates_win_and_missing_times_sort_last() {
        let mut a1: MailMessage = serde_json::from_value(message_json(
            "X", CONV, "A", "first copy", "2024-05-01T09:00:00Z",
        ))
        .unwrap();
        let a2 = MailMessage {
            subject: Some("second copy".into()),
            ..a1.clone()
        };
        a1.id = "x".into();
        let undated = MailMessage {
            id: "undated".into(),
            ..Default::default()
        };
        let merged = merge_and_sort(vec![a1, undated], vec![a2]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].subject_str(), "second copy");
        assert_eq!(merged[1].id, "undated");
    }
}

//! Word-frequency themes and sender/organizer counts.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::calendar::{events_in, window_or_default, CalendarEvent};
use crate::error::ConnectorError;
use crate::graph::models::EmailAddress;
use crate::graph::GraphContext;
use crate::mail::{clamp_scan, describe_range, optional_range, scan_recent, MailMessage};

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}][\p{L}'\-]*").expect("word regex"));

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "has", "have", "him", "his", "how", "its", "may", "new", "now", "see",
    "two", "who", "did", "get", "let", "say", "she", "too", "use", "that", "with", "this",
    "from", "your", "will", "would", "there", "their", "what", "about", "which", "when", "make",
    "like", "time", "just", "know", "take", "into", "year", "them", "some", "could", "than",
    "then", "look", "only", "come", "over", "also", "back", "after", "work", "first", "well",
    "even", "want", "because", "these", "give", "most", "been", "were", "they", "here", "more",
    "please", "thanks", "thank", "regards", "hi", "hello", "dear", "best", "sent", "re", "fw",
    "fwd", "via", "per", "let's", "i'm", "we're", "it's", "don't", "should", "other", "such",
    "very", "much", "many", "each", "does", "being", "where", "while", "why", "those", "through",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeCount {
    pub word: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyCount {
    pub name: String,
    pub address: String,
    pub count: usize,
}

/// Most frequent words (three or more letters, stopwords removed) across
/// `texts`, by count descending then word ascending.
pub fn top_themes<'a, I>(texts: I, n: usize) -> Vec<ThemeCount>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: HashMap<String, usize> = HashMap::new();
    for text in texts {
        for m in WORD_RE.find_iter(text) {
            let word = m.as_str().trim_matches(|c| c == '\'' || c == '-').to_lowercase();
            if word.chars().filter(|c| c.is_alphabetic()).count() < 3 {
                continue;
            }
            if STOPWORDS.contains(&word.as_str()) {
                continue;
            }
            *counts.entry(word).or_insert(0) += 1;
        }
    }
    let mut themes: Vec<ThemeCount> = counts
        .into_iter()
        .map(|(word, count)| ThemeCount { word, count })
        .collect();
    themes.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.word.cmp(&b.word)));
    themes.truncate(n);
    themes
}

fn count_parties<'a, I>(parties: I) -> Vec<PartyCount>
where
    I: IntoIterator<Item = &'a EmailAddress>,
{
    let mut counts: HashMap<String, PartyCount> = HashMap::new();
    for party in parties {
        let Some(key) = party.address_lower() else {
            continue;
        };
        let entry = counts.entry(key.clone()).or_insert_with(|| PartyCount {
            name: String::new(),
            address: key,
            count: 0,
        });
        entry.count += 1;
        if entry.name.is_empty() {
            if let Some(name) = party.name.as_deref().filter(|n| !n.trim().is_empty()) {
                entry.name = name.trim().to_string();
            }
        }
    }
    let mut out: Vec<PartyCount> = counts.into_values().collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.address.cmp(&b.address)));
    out
}

/// Messages per sender, keyed by lower-cased address.
pub fn sender_counts(messages: &[MailMessage]) -> Vec<PartyCount> {
    count_parties(
        messages
            .iter()
            .filter_map(|m| m.from.as_ref().map(|r| &r.email_address)),
    )
}

/// Events per organizer, keyed by lower-cased address.
pub fn organizer_counts(events: &[CalendarEvent]) -> Vec<PartyCount> {
    count_parties(events.iter().filter_map(|e| e.organizer_address()))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalyticsInput {
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default)]
    pub until: Option<String>,
    /// How many entries to return.
    #[serde(default)]
    pub top: Option<usize>,
    /// Messages to examine (mail tools only).
    #[serde(default)]
    pub scan: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThemesView {
    pub window: Option<String>,
    pub scanned: usize,
    pub themes: Vec<ThemeCount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendersView {
    pub window: Option<String>,
    pub scanned: usize,
    pub senders: Vec<PartyCount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrganizersView {
    pub window: String,
    pub scanned: usize,
    pub organizers: Vec<PartyCount>,
}

fn top_n(top: Option<usize>) -> usize {
    top.unwrap_or(10).clamp(1, 100)
}

pub async fn mail_themes(ctx: &GraphContext, input: AnalyticsInput) -> Result<ThemesView, ConnectorError> {
    let range = optional_range(input.since.as_deref(), input.until.as_deref())?;
    let messages = scan_recent(ctx, None, range.as_ref(), clamp_scan(input.scan)).await?;
    let texts: Vec<String> = messages
        .iter()
        .map(|m| format!("{} {}", m.subject_str(), m.body_preview.as_deref().unwrap_or("")))
        .collect();
    Ok(ThemesView {
        window: range.as_ref().map(describe_range),
        scanned: messages.len(),
        themes: top_themes(texts.iter().map(String::as_str), top_n(input.top)),
    })
}

pub async fn mail_top_senders(
    ctx: &GraphContext,
    input: AnalyticsInput,
) -> Result<SendersView, ConnectorError> {
    let range = optional_range(input.since.as_deref(), input.until.as_deref())?;
    let messages = scan_recent(ctx, None, range.as_ref(), clamp_scan(input.scan)).await?;
    let mut senders = sender_counts(&messages);
    senders.truncate(top_n(input.top));
    Ok(SendersView {
        window: range.as_ref().map(describe_range),
        scanned: messages.len(),
        senders,
    })
}

pub async fn calendar_top_organizers(
    ctx: &GraphContext,
    input: AnalyticsInput,
) -> Result<OrganizersView, ConnectorError> {
    let range = window_or_default(input.since.as_deref(), input.until.as_deref())?;
    let events = events_in(ctx, &range, 1000).await?;
    let mut organizers = organizer_counts(&events);
    organizers.truncate(top_n(input.top));
    Ok(OrganizersView {
        window: describe_range(&range),
        scanned: events.len(),
        organizers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::event_json;
    use crate::mail::message_json;

    #[test]
    fn themes_skip_short_words_and_stopwords() {
        let texts = [
            "Budget review for the Q3 budget",
            "Re: budget timeline and hiring",
            "Hiring plan: timeline",
        ];
        let themes = top_themes(texts.iter().copied(), 3);
        assert_eq!(
            themes,
            vec![
                ThemeCount { word: "budget".into(), count: 3 },
                ThemeCount { word: "hiring".into(), count: 2 },
                ThemeCount { word: "timeline".into(), count: 2 },
            ]
        );
    }

    #[test]
    fn senders_group_by_lowercased_address() {
        let mut shouty = message_json("3", "c", "Megan", "x", "2024-05-01T00:00:00Z");
        shouty["from"]["emailAddress"]["address"] = "MEGAN@CONTOSO.COM".into();
        let messages: Vec<MailMessage> = vec![
            message_json("1", "c", "Megan", "x", "2024-05-01T00:00:00Z"),
            message_json("2", "c", "Alex", "x", "2024-05-01T00:00:00Z"),
            shouty,
        ]
        .into_iter()
        .filter_map(MailMessage::from_value)
        .collect();
        let counts = sender_counts(&messages);
        assert_eq!(counts[0].address, "megan@contoso.com");
        assert_eq!(counts[0].count, 2);
        assert_eq!(counts[0].name, "Megan");
        assert_eq!(counts[1].count, 1);
    }

    #[test]
    fn organizers_are_counted() {
        let events: Vec<CalendarEvent> = vec![
            event_json("1", "a", "Alex", "2024-05-01T00:00:00", None),
            event_json("2", "b", "Megan", "2024-05-01T00:00:00", None),
            event_json("3", "c", "Megan", "2024-05-01T00:00:00", None),
        ]
        .into_iter()
        .filter_map(CalendarEvent::from_value)
        .collect();
        let counts = organizer_counts(&events);
        assert_eq!(counts[0].name, "Megan");
        assert_eq!(counts[0].count, 2);
    }
}

//! Calendar tools over `calendarView`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ConnectorError;
use crate::filters::{contains_ci, to_graph_datetime, DateRange};
use crate::graph::models::{nullable_vec, DateTimeTimeZone, EmailAddress, Recipient};
use crate::graph::{collect_pages, GraphContext};
use crate::id_cache::{HandleKind, IdCache};
use crate::mail::{clamp_limit, describe_range, optional_range};
use crate::utils::truncate_chars;

pub const WINDOW_DAYS: i64 = 30;
const PAGE_SIZE: usize = 50;
const MAX_EVENTS: usize = 500;

pub const EVENT_FIELDS: &[&str] = &[
    "id",
    "subject",
    "organizer",
    "start",
    "end",
    "location",
    "attendees",
    "isOnlineMeeting",
    "onlineMeeting",
    "bodyPreview",
    "webLink",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseStatus {
    #[serde(default)]
    pub response: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attendee {
    #[serde(default)]
    pub email_address: EmailAddress,
    /// `required`, `optional` or `resource`.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub status: Option<ResponseStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineMeetingInfo {
    #[serde(default)]
    pub join_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub organizer: Option<Recipient>,
    #[serde(default)]
    pub start: Option<DateTimeTimeZone>,
    #[serde(default)]
    pub end: Option<DateTimeTimeZone>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default, deserialize_with = "nullable_vec")]
    pub attendees: Vec<Attendee>,
    #[serde(default)]
    pub is_online_meeting: Option<bool>,
    #[serde(default)]
    pub online_meeting: Option<OnlineMeetingInfo>,
    #[serde(default)]
    pub body_preview: Option<String>,
    #[serde(default)]
    pub web_link: Option<String>,
}

impl CalendarEvent {
    pub fn from_value(value: Value) -> Option<Self> {
        match serde_json::from_value::<CalendarEvent>(value) {
            Ok(e) if !e.id.is_empty() => Some(e),
            Ok(_) => None,
            Err(e) => {
                debug!("skipping unparseable event: {}", e);
                None
            }
        }
    }

    pub fn subject_str(&self) -> &str {
        self.subject.as_deref().unwrap_or("")
    }

    pub fn organizer_address(&self) -> Option<&EmailAddress> {
        self.organizer.as_ref().map(|o| &o.email_address)
    }

    pub fn organizer_matches(&self, needle: &str) -> bool {
        self.organizer_address()
            .map(|a| a.matches(needle))
            .unwrap_or(false)
    }

    pub fn join_url(&self) -> Option<&str> {
        self.online_meeting
            .as_ref()
            .and_then(|m| m.join_url.as_deref())
            .filter(|u| !u.is_empty())
    }

    pub fn is_online(&self) -> bool {
        self.is_online_meeting.unwrap_or(false) || self.join_url().is_some()
    }

    pub fn summary(&self, ids: &IdCache) -> EventSummary {
        EventSummary {
            handle: ids.remember(HandleKind::Event, &self.id),
            id: self.id.clone(),
            subject: self.subject_str().to_string(),
            organizer: self
                .organizer_address()
                .map(EmailAddress::display)
                .unwrap_or_default(),
            start: self.start.as_ref().and_then(|s| s.date_time.clone()),
            end: self.end.as_ref().and_then(|s| s.date_time.clone()),
            location: self
                .location
                .as_ref()
                .and_then(|l| l.display_name.clone())
                .filter(|l| !l.is_empty()),
            attendees: self.attendees.len(),
            online: self.is_online(),
            join_url: self.join_url().map(str::to_string),
            preview: truncate_chars(self.body_preview.as_deref().unwrap_or("").trim(), 200),
            web_link: self.web_link.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSummary {
    pub handle: String,
    pub id: String,
    pub subject: String,
    pub organizer: String,
    pub start: Option<String>,
    pub end: Option<String>,
    pub location: Option<String>,
    pub attendees: usize,
    pub online: bool,
    pub join_url: Option<String>,
    pub preview: String,
    pub web_link: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventList {
    pub query: String,
    pub window: String,
    pub count: usize,
    pub events: Vec<EventSummary>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CalendarByDateInput {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default)]
    pub until: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CalendarByOrganizerInput {
    pub organizer: String,
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default)]
    pub until: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CalendarBySubjectInput {
    pub subject: String,
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default)]
    pub until: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// `WINDOW_DAYS` back to `WINDOW_DAYS` ahead of `now`.
pub fn default_window(now: DateTime<Utc>) -> DateRange {
    DateRange {
        start: now - Duration::days(WINDOW_DAYS),
        end: now + Duration::days(WINDOW_DAYS),
    }
}

/// Explicit `since`/`until`, or the default window.
pub fn window_or_default(
    since: Option<&str>,
    until: Option<&str>,
) -> Result<DateRange, ConnectorError> {
    Ok(optional_range(since, until)?.unwrap_or_else(|| default_window(Utc::now())))
}

/// Events overlapping `range`, expanded from recurrences, oldest first.
pub async fn events_in(
    ctx: &GraphContext,
    range: &DateRange,
    cap: usize,
) -> Result<Vec<CalendarEvent>, ConnectorError> {
    let url = ctx
        .url()
        .segment("calendarView")
        .param("startDateTime", to_graph_datetime(&range.start))
        .param("endDateTime", to_graph_datetime(&range.end))
        .orderby("start/dateTime")
        .top(PAGE_SIZE.min(cap.max(1)))
        .select(EVENT_FIELDS)
        .build();
    let collected = collect_pages(
        ctx.transport.as_ref(),
        &url,
        cap,
        cap.div_ceil(PAGE_SIZE) + 1,
    )
    .await?;
    Ok(collected
        .items
        .into_iter()
        .filter_map(CalendarEvent::from_value)
        .collect())
}

fn list(ctx: &GraphContext, query: String, range: &DateRange, events: Vec<&CalendarEvent>) -> EventList {
    let events: Vec<EventSummary> = events.into_iter().map(|e| e.summary(&ctx.ids)).collect();
    EventList {
        query,
        window: describe_range(range),
        count: events.len(),
        events,
    }
}

pub async fn by_date(
    ctx: &GraphContext,
    input: CalendarByDateInput,
) -> Result<EventList, ConnectorError> {
    let range = DateRange::from_args(
        input.date.as_deref(),
        input.since.as_deref(),
        input.until.as_deref(),
        Utc::now(),
    )?;
    let limit = clamp_limit(input.limit);
    let events = events_in(ctx, &range, limit).await?;
    Ok(list(ctx, describe_range(&range), &range, events.iter().collect()))
}

pub async fn by_organizer(
    ctx: &GraphContext,
    input: CalendarByOrganizerInput,
) -> Result<EventList, ConnectorError> {
    let organizer = input.organizer.trim().to_string();
    if organizer.is_empty() {
        return Err(ConnectorError::InvalidParams(
            "organizer is required".to_string(),
        ));
    }
    let range = window_or_default(input.since.as_deref(), input.until.as_deref())?;
    let events = events_in(ctx, &range, MAX_EVENTS).await?;
    let matched: Vec<&CalendarEvent> = events
        .iter()
        .filter(|e| e.organizer_matches(&organizer))
        .take(clamp_limit(input.limit))
        .collect();
    Ok(list(ctx, organizer, &range, matched))
}

pub async fn by_subject(
    ctx: &GraphContext,
    input: CalendarBySubjectInput,
) -> Result<EventList, ConnectorError> {
    let subject = input.subject.trim().to_string();
    if subject.is_empty() {
        return Err(ConnectorError::InvalidParams("subject is required".to_string()));
    }
    let range = window_or_default(input.since.as_deref(), input.until.as_deref())?;
    let events = events_in(ctx, &range, MAX_EVENTS).await?;
    let matched: Vec<&CalendarEvent> = events
        .iter()
        .filter(|e| contains_ci(e.subject_str(), &subject))
        .take(clamp_limit(input.limit))
        .collect();
    Ok(list(ctx, subject, &range, matched))
}

pub async fn fetch_event(ctx: &GraphContext, event_id: &str) -> Result<CalendarEvent, ConnectorError> {
    let id = ctx.ids.resolve(event_id);
    let url = ctx.url().segment("events").segment(&id).select(EVENT_FIELDS);
    let value = ctx.get(&url).await?;
    CalendarEvent::from_value(value)
        .ok_or_else(|| ConnectorError::Other(format!("event {} could not be parsed", id)))
}

#[cfg(test)]
pub(crate) fn event_json(id: &str, subject: &str, organizer: &str, start: &str, join: Option<&str>) -> Value {
    serde_json::json!({
        "id": id,
        "subject": subject,
        "organizer": {"emailAddress": {"name": organizer, "address": format!("{}@contoso.com", organizer.to_lowercase())}},
        "start": {"dateTime": start, "timeZone": "UTC"},
        "end": {"dateTime": start, "timeZone": "UTC"},
        "location": {"displayName": "Room 1"},
        "attendees": [
            {"type": "required", "status": {"response": "accepted"}, "emailAddress": {"name": "Adele Vance", "address": "adele@contoso.com"}}
        ],
        "isOnlineMeeting": join.is_some(),
        "onlineMeeting": join.map(|u| serde_json::json!({"joinUrl": u})),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::testing::{context, FakeGraph};
    use serde_json::json;

    #[tokio::test]
    async fn date_listing_uses_calendar_view_bounds() {
        let fake = FakeGraph::new().json(
            "calendarView",
            json!({"value": [event_json("e-1", "Standup", "Megan", "2024-05-01T09:00:00.0000000", None)]}),
        );
        let (ctx, fake) = context(fake);
        let list = by_date(
            &ctx,
            CalendarByDateInput {
                date: Some("2024-05-01".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(list.count, 1);
        assert_eq!(list.events[0].handle, "e1");
        assert_eq!(list.events[0].location.as_deref(), Some("Room 1"));
        let url = urlencoding::decode(&fake.requested()[0]).unwrap().into_owned();
        assert!(url.contains("calendarView?startDateTime=2024-05-01T00:00:00Z&endDateTime=2024-05-01T23:59:59.9999999Z"));
    }

    #[tokio::test]
    async fn organizer_and_subject_filters_are_client_side() {
        let fake = FakeGraph::new().json(
            "calendarView",
            json!({"value": [
                event_json("e-1", "Budget review", "Megan", "2024-05-01T09:00:00", None),
                event_json("e-2", "Team lunch", "Alex", "2024-05-02T12:00:00", None),
                event_json("e-3", "Budget sync", "Alex", "2024-05-03T09:00:00", None),
            ]}),
        );
        let (ctx, _fake) = context(fake);
        let by_org = by_organizer(
            &ctx,
            CalendarByOrganizerInput {
                organizer: "alex".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(by_org.count, 2);

        let by_subj = by_subject(
            &ctx,
            CalendarBySubjectInput {
                subject: "BUDGET".into(),
                limit: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(by_subj.count, 1);
        assert_eq!(by_subj.events[0].id, "e-1");
    }

    #[test]
    fn default_window_spans_both_directions() {
        let now = Utc::now();
        let w = default_window(now);
        assert_eq!(w.end - w.start, Duration::days(2 * WINDOW_DAYS));
        assert!(w.contains(&now));
    }
}

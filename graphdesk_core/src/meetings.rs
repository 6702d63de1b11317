//! Teams online meetings: lookup, transcripts, audience and attendance.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::calendar::{events_in, fetch_event, window_or_default, EventSummary};
use crate::error::ConnectorError;
use crate::filters::contains_ci;
use crate::graph::models::nullable_vec;
use crate::graph::{collect_pages, odata_quote, page_values, GraphContext, GraphUrl};
use crate::id_cache::{HandleKind, IdCache};
use crate::mail::clamp_limit;
use crate::vtt::{merge_turns, parse_vtt, speakers, Turn};

const MAX_EVENTS: usize = 500;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentitySet {
    #[serde(default)]
    pub user: Option<Identity>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeetingParticipant {
    #[serde(default)]
    pub upn: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub identity: Option<IdentitySet>,
}

impl MeetingParticipant {
    pub fn display_name(&self) -> Option<&str> {
        self.identity
            .as_ref()
            .and_then(|i| i.user.as_ref())
            .and_then(|u| u.display_name.as_deref())
            .filter(|n| !n.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Participants {
    #[serde(default)]
    pub organizer: Option<MeetingParticipant>,
    #[serde(default, deserialize_with = "nullable_vec")]
    pub attendees: Vec<MeetingParticipant>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineMeeting {
    pub id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub start_date_time: Option<String>,
    #[serde(default)]
    pub end_date_time: Option<String>,
    #[serde(default)]
    pub join_web_url: Option<String>,
    #[serde(default)]
    pub participants: Option<Participants>,
}

impl OnlineMeeting {
    pub fn summary(&self, ids: &IdCache) -> MeetingSummary {
        let participants = self.participants.clone().unwrap_or_default();
        let organizer = participants
            .organizer
            .as_ref()
            .and_then(|o| o.display_name().map(str::to_string).or_else(|| o.upn.clone()))
            .unwrap_or_default();
        MeetingSummary {
            handle: ids.remember(HandleKind::OnlineMeeting, &self.id),
            id: self.id.clone(),
            subject: self.subject.clone().unwrap_or_default(),
            start: self.start_date_time.clone(),
            end: self.end_date_time.clone(),
            join_url: self.join_web_url.clone(),
            organizer,
            participants: participants.attendees.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingSummary {
    pub handle: String,
    pub id: String,
    pub subject: String,
    pub start: Option<String>,
    pub end: Option<String>,
    pub join_url: Option<String>,
    pub organizer: String,
    pub participants: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MeetingIdInput {
    pub meeting_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MeetingByTitleInput {
    pub title: String,
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default)]
    pub until: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptInput {
    pub meeting_id: String,
    #[serde(default)]
    pub transcript_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AudienceInput {
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub meeting_id: Option<String>,
}

fn meetings_url(ctx: &GraphContext) -> GraphUrl {
    ctx.url().segment("onlineMeetings")
}

fn required(value: &str, name: &str) -> Result<(), ConnectorError> {
    if value.trim().is_empty() {
        return Err(ConnectorError::InvalidParams(format!("{} is required", name)));
    }
    Ok(())
}

pub async fn fetch_meeting(ctx: &GraphContext, meeting_id: &str) -> Result<OnlineMeeting, ConnectorError> {
    required(meeting_id, "meeting_id")?;
    let id = ctx.ids.resolve(meeting_id);
    let value = ctx.get(&meetings_url(ctx).segment(&id)).await?;
    Ok(serde_json::from_value(value)?)
}

/// Online meeting behind a calendar event's join URL, if Graph knows it.
pub async fn find_by_join_url(
    ctx: &GraphContext,
    join_url: &str,
) -> Result<Option<OnlineMeeting>, ConnectorError> {
    let url = meetings_url(ctx).filter(format!("JoinWebUrl eq {}", odata_quote(join_url)));
    let body = ctx.get(&url).await?;
    Ok(page_values(&body)
        .into_iter()
        .next()
        .map(serde_json::from_value)
        .transpose()?)
}

#[derive(Debug, Clone, Serialize)]
pub struct MeetingDetail {
    pub meeting: MeetingSummary,
}

pub async fn get(ctx: &GraphContext, input: MeetingIdInput) -> Result<MeetingDetail, ConnectorError> {
    let meeting = fetch_meeting(ctx, &input.meeting_id).await?;
    Ok(MeetingDetail {
        meeting: meeting.summary(&ctx.ids),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct MeetingMatch {
    pub event: EventSummary,
    pub meeting: Option<MeetingSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MeetingList {
    pub title: String,
    pub count: usize,
    pub meetings: Vec<MeetingMatch>,
}

/// Online-meeting events whose subject contains `title`, each resolved to its
/// online meeting when the join URL lookup succeeds.
pub async fn by_title(
    ctx: &GraphContext,
    input: MeetingByTitleInput,
) -> Result<MeetingList, ConnectorError> {
    required(&input.title, "title")?;
    let title = input.title.trim().to_string();
    let range = window_or_default(input.since.as_deref(), input.until.as_deref())?;
    let events = events_in(ctx, &range, MAX_EVENTS).await?;

    let matches: Vec<_> = events
        .iter()
        .filter(|e| e.is_online() && contains_ci(e.subject_str(), &title))
        .take(clamp_limit(input.limit))
        .collect();
    let lookups = matches.iter().map(|event| async move {
        let join = event.join_url()?;
        match find_by_join_url(ctx, join).await {
            Ok(m) => m.map(|m| m.summary(&ctx.ids)),
            Err(e) => {
                warn!(event = %event.id, error = %e, "join url lookup failed");
                None
            }
        }
    });
    let resolved = futures::future::join_all(lookups).await;
    let meetings: Vec<MeetingMatch> = matches
        .iter()
        .zip(resolved)
        .map(|(event, meeting)| MeetingMatch {
            event: event.summary(&ctx.ids),
            meeting,
        })
        .collect();
    Ok(MeetingList {
        title,
        count: meetings.len(),
        meetings,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptView {
    pub meeting_id: String,
    pub transcript_id: Option<String>,
    pub handle: Option<String>,
    pub created: Option<String>,
    pub speakers: Vec<String>,
    pub transcript: Vec<Turn>,
}

/// Latest (or the named) transcript of a meeting as speaker turns.
pub async fn transcript(
    ctx: &GraphContext,
    input: TranscriptInput,
) -> Result<TranscriptView, ConnectorError> {
    required(&input.meeting_id, "meeting_id")?;
    let meeting_id = ctx.ids.resolve(&input.meeting_id);
    let base = meetings_url(ctx).segment(&meeting_id).segment("transcripts");

    let (transcript_id, created) = match input.transcript_id.as_deref().filter(|t| !t.trim().is_empty()) {
        Some(t) => (ctx.ids.resolve(t), None),
        None => {
            let listed = collect_pages(ctx.transport.as_ref(), &base.build(), 100, 5).await?;
            let latest = listed.items.iter().max_by(|a, b| {
                let ca = a.get("createdDateTime").and_then(Value::as_str).unwrap_or("");
                let cb = b.get("createdDateTime").and_then(Value::as_str).unwrap_or("");
                ca.cmp(cb)
            });
            match latest {
                Some(t) => (
                    t.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
                    t.get("createdDateTime").and_then(Value::as_str).map(str::to_string),
                ),
                None => {
                    debug!(meeting = %meeting_id, "meeting has no transcripts");
                    return Ok(TranscriptView {
                        meeting_id,
                        transcript_id: None,
                        handle: None,
                        created: None,
                        speakers: Vec::new(),
                        transcript: Vec::new(),
                    });
                }
            }
        }
    };

    let content_url = base
        .segment(&transcript_id)
        .segment("content")
        .param("$format", "text/vtt")
        .build();
    let bytes = ctx.transport.get_bytes(&content_url).await?;
    let turns = merge_turns(parse_vtt(&String::from_utf8_lossy(&bytes)));
    Ok(TranscriptView {
        handle: Some(ctx.ids.remember(HandleKind::Transcript, &transcript_id)),
        meeting_id,
        transcript_id: Some(transcript_id),
        created,
        speakers: speakers(&turns),
        transcript: turns,
    })
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AudienceMember {
    pub name: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub response: Option<String>,
    /// `invited` (event attendee) and/or `participant` (online meeting roster).
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AudienceView {
    pub subject: String,
    pub count: usize,
    pub attendees: Vec<AudienceMember>,
}

#[derive(Default)]
struct Roster {
    order: Vec<String>,
    members: HashMap<String, AudienceMember>,
}

impl Roster {
    fn add(&mut self, member: AudienceMember) {
        let key = member
            .email
            .as_deref()
            .map(str::to_lowercase)
            .unwrap_or_else(|| member.name.to_lowercase());
        match self.members.get_mut(&key) {
            Some(existing) => {
                for s in member.sources {
                    if !existing.sources.contains(&s) {
                        existing.sources.push(s);
                    }
                }
                if existing.role.is_none() {
                    existing.role = member.role;
                }
                if existing.name.is_empty() {
                    existing.name = member.name;
                }
            }
            None => {
                self.order.push(key.clone());
                self.members.insert(key, member);
            }
        }
    }

    fn add_participant(&mut self, p: &MeetingParticipant, fallback_role: &str) {
        let email = p.upn.clone().filter(|u| !u.is_empty());
        let name = p
            .display_name()
            .map(str::to_string)
            .or_else(|| email.clone())
            .unwrap_or_default();
        if name.is_empty() && email.is_none() {
            return;
        }
        self.add(AudienceMember {
            name,
            email,
            role: p.role.clone().or_else(|| Some(fallback_role.to_string())),
            response: None,
            sources: vec!["participant".to_string()],
        });
    }

    fn into_members(mut self) -> Vec<AudienceMember> {
        self.order
            .iter()
            .filter_map(|k| self.members.remove(k))
            .collect()
    }
}

/// Invited attendees of an event plus the roster of its online meeting, or
/// just the roster when only a meeting id is given.
pub async fn audience(ctx: &GraphContext, input: AudienceInput) -> Result<AudienceView, ConnectorError> {
    let event_id = input.event_id.filter(|s| !s.trim().is_empty());
    let meeting_id = input.meeting_id.filter(|s| !s.trim().is_empty());
    let mut roster = Roster::default();

    let (subject, meeting) = match (event_id, meeting_id) {
        (Some(event_id), _) => {
            let event = fetch_event(ctx, &event_id).await?;
            for a in &event.attendees {
                roster.add(AudienceMember {
                    name: a.email_address.name.clone().unwrap_or_default(),
                    email: a.email_address.address.clone(),
                    role: a.kind.clone(),
                    response: a.status.as_ref().and_then(|s| s.response.clone()),
                    sources: vec!["invited".to_string()],
                });
            }
            let meeting = match event.join_url() {
                Some(join) => find_by_join_url(ctx, join).await.unwrap_or_else(|e| {
                    warn!(error = %e, "could not resolve online meeting for event");
                    None
                }),
                None => None,
            };
            (event.subject_str().to_string(), meeting)
        }
        (None, Some(meeting_id)) => {
            let meeting = fetch_meeting(ctx, &meeting_id).await?;
            (meeting.subject.clone().unwrap_or_default(), Some(meeting))
        }
        (None, None) => {
            return Err(ConnectorError::InvalidParams(
                "provide event_id or meeting_id".to_string(),
            ))
        }
    };

    if let Some(participants) = meeting.and_then(|m| m.participants) {
        if let Some(org) = &participants.organizer {
            roster.add_participant(org, "organizer");
        }
        for p in &participants.attendees {
            roster.add_participant(p, "attendee");
        }
    }

    let attendees = roster.into_members();
    Ok(AudienceView {
        subject,
        count: attendees.len(),
        attendees,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct AttendanceReport {
    pub id: String,
    pub start: Option<String>,
    pub end: Option<String>,
    pub participants: Option<u64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AttendanceRecord {
    pub report_id: String,
    pub name: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub total_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttendanceView {
    pub meeting_id: String,
    pub reports: Vec<AttendanceReport>,
    pub count: usize,
    pub records: Vec<AttendanceRecord>,
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Attendance records across all reports, longest attendance first.
pub async fn attendance(
    ctx: &GraphContext,
    input: MeetingIdInput,
) -> Result<AttendanceView, ConnectorError> {
    required(&input.meeting_id, "meeting_id")?;
    let meeting_id = ctx.ids.resolve(&input.meeting_id);
    let reports_url = meetings_url(ctx)
        .segment(&meeting_id)
        .segment("attendanceReports");
    let listed = collect_pages(ctx.transport.as_ref(), &reports_url.build(), 50, 5).await?;

    let mut reports = Vec::new();
    let mut records = Vec::new();
    for report in &listed.items {
        let Some(report_id) = str_field(report, "id") else {
            continue;
        };
        reports.push(AttendanceReport {
            id: report_id.clone(),
            start: str_field(report, "meetingStartDateTime"),
            end: str_field(report, "meetingEndDateTime"),
            participants: report.get("totalParticipantCount").and_then(Value::as_u64),
        });
        let records_url = reports_url
            .clone()
            .segment(&report_id)
            .segment("attendanceRecords")
            .build();
        let rows = collect_pages(ctx.transport.as_ref(), &records_url, 1000, 20).await?;
        for row in &rows.items {
            let email = str_field(row, "emailAddress");
            let name = row
                .get("identity")
                .and_then(|i| str_field(i, "displayName"))
                .or_else(|| email.clone())
                .unwrap_or_default();
            records.push(AttendanceRecord {
                report_id: report_id.clone(),
                name,
                email,
                role: str_field(row, "role"),
                total_seconds: row
                    .get("totalAttendanceInSeconds")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
            });
        }
    }
    records.sort_by(|a, b| {
        b.total_seconds
            .cmp(&a.total_seconds)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
    Ok(AttendanceView {
        meeting_id,
        reports,
        count: records.len(),
        records,
    })
}

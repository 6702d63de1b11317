use crate::cli::{Cli, MeetingAction};
use crate::commands::{run_tool, Args, Result};

pub async fn run(cli: &Cli, action: &MeetingAction) -> Result<()> {
    let (tool, args) = match action {
        MeetingAction::Get { meeting_id } => {
            ("meeting_get", Args::new().set("meeting_id", meeting_id.as_str()))
        }
        MeetingAction::Find {
            title,
            window,
            limit,
        } => (
            "meeting_by_title",
            Args::new()
                .set("title", title.as_str())
                .window(window)
                .opt("limit", *limit),
        ),
        MeetingAction::Transcript {
            meeting_id,
            transcript_id,
        } => (
            "meeting_transcript",
            Args::new()
                .set("meeting_id", meeting_id.as_str())
                .opt("transcript_id", transcript_id.clone()),
        ),
        MeetingAction::Audience {
            event_id,
            meeting_id,
        } => (
            "meeting_audience",
            Args::new()
                .opt("event_id", event_id.clone())
                .opt("meeting_id", meeting_id.clone()),
        ),
        MeetingAction::Attendance { meeting_id } => (
            "meeting_attendance",
            Args::new().set("meeting_id", meeting_id.as_str()),
        ),
    };
    run_tool(cli, tool, args.build()).await
}

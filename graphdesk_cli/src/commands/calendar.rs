use crate::cli::{CalendarAction, Cli};
use crate::commands::{run_tool, Args, Result};

pub async fn run(cli: &Cli, action: &CalendarAction) -> Result<()> {
    let (tool, args) = match action {
        CalendarAction::Date {
            date,
            window,
            limit,
        } => (
            "calendar_by_date",
            Args::new()
                .opt("date", date.clone())
                .window(window)
                .opt("limit", *limit),
        ),
        CalendarAction::Organizer {
            organizer,
            window,
            limit,
        } => (
            "calendar_by_organizer",
            Args::new()
                .set("organizer", organizer.as_str())
                .window(window)
                .opt("limit", *limit),
        ),
        CalendarAction::Subject {
            subject,
            window,
            limit,
        } => (
            "calendar_by_subject",
            Args::new()
                .set("subject", subject.as_str())
                .window(window)
                .opt("limit", *limit),
        ),
        CalendarAction::Organizers { window, top } => (
            "calendar_top_organizers",
            Args::new().window(window).opt("top", *top),
        ),
    };
    run_tool(cli, tool, args.build()).await
}

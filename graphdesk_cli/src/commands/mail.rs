use crate::cli::{Cli, MailAction};
use crate::commands::{run_tool, Args, Result};

pub async fn run(cli: &Cli, action: &MailAction) -> Result<()> {
    let (tool, args) = match action {
        MailAction::Date {
            date,
            window,
            folder,
            limit,
        } => (
            "mail_by_date",
            Args::new()
                .opt("date", date.clone())
                .window(window)
                .opt("folder", folder.clone())
                .opt("limit", *limit),
        ),
        MailAction::Sender {
            sender,
            window,
            limit,
            scan,
        } => (
            "mail_by_sender",
            Args::new()
                .set("sender", sender.as_str())
                .window(window)
                .opt("limit", *limit)
                .opt("scan", *scan),
        ),
        MailAction::Subject {
            subject,
            window,
            limit,
            scan,
        } => (
            "mail_by_subject",
            Args::new()
                .set("subject", subject.as_str())
                .window(window)
                .opt("limit", *limit)
                .opt("scan", *scan),
        ),
        MailAction::Get { message_id, body } => (
            "mail_get",
            Args::new()
                .set("message_id", message_id.as_str())
                .set("include_body", *body),
        ),
        MailAction::Thread {
            message_id,
            conversation_id,
            folder,
            scan_cap,
        } => (
            "mail_thread",
            Args::new()
                .opt("message_id", message_id.clone())
                .opt("conversation_id", conversation_id.clone())
                .opt("folder", folder.clone())
                .opt("scan_cap", *scan_cap),
        ),
        MailAction::Themes { window, top, scan } => (
            "mail_themes",
            Args::new().window(window).opt("top", *top).opt("scan", *scan),
        ),
        MailAction::Senders { window, top, scan } => (
            "mail_top_senders",
            Args::new().window(window).opt("top", *top).opt("scan", *scan),
        ),
    };
    run_tool(cli, tool, args.build()).await
}

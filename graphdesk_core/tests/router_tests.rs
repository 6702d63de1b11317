use chrono::{DateTime, TimeZone, Utc};
use graphdesk_core::router::QueryRouter;

// A Wednesday.
fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 15, 13, 0, 0).unwrap()
}

#[test]
fn test_mail_patterns() {
    let router = QueryRouter::new();

    let call = router.route("show the conversation for m12").unwrap();
    assert_eq!(call.tool, "mail_thread");
    assert_eq!(call.arguments.get("message_id").unwrap(), "m12");

    let call = router.route("open email m4").unwrap();
    assert_eq!(call.tool, "mail_get");
    assert_eq!(call.arguments.get("message_id").unwrap(), "m4");

    let call = router
        .route_at("emails about Q3 budget last week", now())
        .unwrap();
    assert_eq!(call.tool, "mail_by_subject");
    assert_eq!(call.arguments.get("subject").unwrap(), "Q3 budget");
    assert_eq!(call.arguments.get("since").unwrap(), "2024-05-06T00:00:00Z");
    assert_eq!(call.arguments.get("until").unwrap(), "2024-05-12T23:59:59.9999999Z");

    let call = router.route("messages from alex@contoso.com").unwrap();
    assert_eq!(call.tool, "mail_by_sender");
    assert_eq!(call.arguments.get("sender").unwrap(), "alex@contoso.com");
    assert!(call.arguments.get("since").is_none());
}

#[test]
fn test_calendar_patterns() {
    let router = QueryRouter::new();

    let call = router
        .route_at("meetings organized by Megan Bowen this week", now())
        .unwrap();
    assert_eq!(call.tool, "calendar_by_organizer");
    assert_eq!(call.arguments.get("organizer").unwrap(), "Megan Bowen");
    assert_eq!(call.arguments.get("since").unwrap(), "2024-05-13T00:00:00Z");

    let call = router.route("events about hiring").unwrap();
    assert_eq!(call.tool, "calendar_by_subject");
    assert_eq!(call.arguments.get("subject").unwrap(), "hiring");

    let call = router.route("who organizes the most meetings").unwrap();
    assert_eq!(call.tool, "calendar_top_organizers");
}

#[test]
fn test_meeting_patterns() {
    let router = QueryRouter::new();

    let call = router.route("get the transcript for o3").unwrap();
    assert_eq!(call.tool, "meeting_transcript");
    assert_eq!(call.arguments.get("meeting_id").unwrap(), "o3");

    let call = router.route("who joined o7?").unwrap();
    assert_eq!(call.tool, "meeting_attendance");
    assert_eq!(call.arguments.get("meeting_id").unwrap(), "o7");

    let call = router.route("who was invited to e5").unwrap();
    assert_eq!(call.tool, "meeting_audience");
    assert_eq!(call.arguments.get("event_id").unwrap(), "e5");
    assert!(call.arguments.get("meeting_id").is_none());

    let call = router.route("meetings titled Sprint Review").unwrap();
    assert_eq!(call.tool, "meeting_by_title");
    assert_eq!(call.arguments.get("title").unwrap(), "Sprint Review");
}

#[test]
fn test_drive_patterns() {
    let router = QueryRouter::new();

    let call = router.route("upload ./notes.txt").unwrap();
    assert_eq!(call.tool, "drive_upload");
    assert_eq!(call.arguments.get("local_path").unwrap(), "./notes.txt");
    assert!(call.arguments.get("remote_path").is_none());

    let call = router.route("show my files in Reports/2024").unwrap();
    assert_eq!(call.tool, "drive_list");
    assert_eq!(call.arguments.get("path").unwrap(), "Reports/2024");
}

#[test]
fn test_keyword_fallback() {
    let router = QueryRouter::new();

    let call = router.route("any emails?").unwrap();
    assert_eq!(call.tool, "mail_by_date");
    assert!(call.confidence < 0.9);

    assert!(router.route("how's the weather").is_none());
    assert!(router.route("   ").is_none());
}

#[test]
fn test_candidates_are_priority_ordered() {
    let router = QueryRouter::new();
    let tools: Vec<String> = router
        .candidates("meetings organized by Alex on 2024-05-01")
        .into_iter()
        .map(|c| c.tool)
        .collect();
    assert_eq!(tools, vec!["calendar_by_organizer", "calendar_by_date"]);
}

#[test]
fn test_list_patterns() {
    let router = QueryRouter::new();
    let patterns = router.list_patterns();
    assert!(patterns.len() >= 15);
    assert!(patterns.iter().all(|p| !p.example.is_empty()));
    assert!(patterns.iter().any(|p| p.tool == "mail_thread"));
}

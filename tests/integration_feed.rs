use chrono::{TimeZone, Utc, Weekday};
use feedsync::hasher::hash_event;
use feedsync::recurrence::{Frequency, RecurrenceEnd, WeekdayRule};
use feedsync::{parse_feed, reconcile, DiagnosticKind, EventTime, RecurrenceRule, StateSnapshot, SyncError, SyncWindow};

const OUTLOOK_EXPORT: &str = "BEGIN:VCALENDAR\r
PRODID:-//Microsoft Corporation//Outlook 16.0 MIMEDIR//EN\r
VERSION:2.0\r
X-WR-CALNAME:Projects\r
BEGIN:VTIMEZONE\r
TZID:W. Europe Standard Time\r
BEGIN:STANDARD\r
DTSTART:16011028T030000\r
RRULE:FREQ=YEARLY;BYDAY=-1SU;BYMONTH=10\r
TZOFFSETFROM:+0200\r
TZOFFSETTO:+0100\r
END:STANDARD\r
BEGIN:DAYLIGHT\r
DTSTART:16010325T020000\r
RRULE:FREQ=YEARLY;BYDAY=-1SU;BYMONTH=3\r
TZOFFSETFROM:+0100\r
TZOFFSETTO:+0200\r
END:DAYLIGHT\r
END:VTIMEZONE\r
BEGIN:VTIMEZONE\r
TZID:Custom Office Zone\r
BEGIN:STANDARD\r
DTSTART:19700101T000000\r
TZOFFSETFROM:+0530\r
TZOFFSETTO:+0530\r
END:STANDARD\r
END:VTIMEZONE\r
BEGIN:VEVENT\r
UID:sprint-review\r
SUMMARY:Sprint review\r
DTSTART;TZID=W. Europe Standard Time:20240703T140000\r
DTEND;TZID=W. Europe Standard Time:20240703T150000\r
RRULE:FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,WE,FR\r
EXDATE;TZID=W. Europe Standard Time:20240717T140000\r
END:VEVENT\r
BEGIN:VEVENT\r
UID:sprint-review\r
RECURRENCE-ID;TZID=W. Europe Standard Time:20240705T140000\r
SUMMARY:Sprint review (moved)\r
DTSTART;TZID=W. Europe Standard Time:20240705T160000\r
DTEND;TZID=W. Europe Standard Time:20240705T170000\r
END:VEVENT\r
BEGIN:VEVENT\r
UID:retro\r
SUMMARY:Retro\r
DTSTART;TZID=Custom Office Zone:20240726T100000\r
DURATION:PT45M\r
RRULE:FREQ=MONTHLY;BYDAY=-1FR\r
END:VEVENT\r
BEGIN:VEVENT\r
UID:offsite\r
SUMMARY:Offsite\r
DTSTART;VALUE=DATE:20240812\r
END:VEVENT\r
END:VCALENDAR\r
";

#[test]
fn test_outlook_export_parses() {
    let parsed = parse_feed(OUTLOOK_EXPORT).unwrap();
    assert_eq!(parsed.calendar_name.as_deref(), Some("Projects"));
    assert_eq!(parsed.events.len(), 4);
    assert!(parsed.diagnostics.is_empty(), "{:?}", parsed.diagnostics);

    let review = &parsed.events[0];
    // Berlin is UTC+2 in July
    assert_eq!(review.start.instant(), Utc.with_ymd_and_hms(2024, 7, 3, 12, 0, 0).unwrap());
    assert_eq!(review.exception_dates.len(), 1);

    let retro = parsed.events.iter().find(|e| e.uid == "retro").unwrap();
    assert_eq!(retro.start.instant(), Utc.with_ymd_and_hms(2024, 7, 26, 4, 30, 0).unwrap());
    assert_eq!(retro.end.instant(), Utc.with_ymd_and_hms(2024, 7, 26, 5, 15, 0).unwrap());

    let offsite = parsed.events.iter().find(|e| e.uid == "offsite").unwrap();
    assert!(offsite.all_day);
    assert!(matches!(offsite.start, EventTime::Date(_)));
}

#[test]
fn test_weekly_rule_scenario() {
    let parsed = parse_feed(OUTLOOK_EXPORT).unwrap();
    let rule = parsed.events[0].recurrence.as_ref().unwrap();
    assert_eq!(rule.frequency, Frequency::Weekly);
    assert_eq!(rule.interval, 2);
    assert_eq!(
        rule.by_day,
        vec![
            WeekdayRule::every(Weekday::Mon),
            WeekdayRule::every(Weekday::Wed),
            WeekdayRule::every(Weekday::Fri),
        ]
    );
}

#[test]
fn test_monthly_last_friday_scenario() {
    let rule: RecurrenceRule = "FREQ=MONTHLY;BYDAY=-1FR".parse().unwrap();
    assert_eq!(rule.frequency, Frequency::Monthly);
    assert_eq!(rule.by_day, vec![WeekdayRule::nth(Weekday::Fri, -1)]);
    assert_eq!(rule.end, RecurrenceEnd::Never);
}

#[test]
fn test_rules_survive_a_serialize_round_trip() {
    for text in [
        "FREQ=DAILY",
        "FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,WE,FR",
        "FREQ=MONTHLY;BYDAY=-1FR;COUNT=12",
        "FREQ=YEARLY;BYMONTH=3;BYDAY=-1SU;UNTIL=20301231T235959Z",
        "FREQ=MONTHLY;BYMONTHDAY=1,15;WKST=SU",
        "FREQ=WEEKLY;BYDAY=TU;X-EXTRA=1",
    ] {
        let parsed = RecurrenceRule::parse(text, None).unwrap();
        let again = RecurrenceRule::parse(&parsed.serialize(), None).unwrap();
        assert_eq!(parsed, again, "round trip of {}", text);
    }
}

#[test]
fn test_overrides_fold_into_their_series() {
    let parsed = parse_feed(OUTLOOK_EXPORT).unwrap();
    let now = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();

    let plan = reconcile(parsed.events, &StateSnapshot::new(), SyncWindow::default(), false, now);
    assert_eq!(plan.creates.len(), 3);
    let review = plan.creates.iter().find(|c| c.event.uid == "sprint-review").unwrap();
    assert_eq!(review.event.overrides.len(), 1);
    assert_eq!(review.event.overrides[0].title, "Sprint review (moved)");
    assert_eq!(review.content_hash, hash_event(&review.event));
}

#[test]
fn test_hash_ignores_revision_metadata() {
    let first = parse_feed(OUTLOOK_EXPORT).unwrap();
    let revised_text = OUTLOOK_EXPORT.replace(
        "UID:offsite\r\n",
        "UID:offsite\r\nSEQUENCE:7\r\nLAST-MODIFIED:20240801T080000Z\r\nDTSTAMP:20240801T080000Z\r\n",
    );
    let revised = parse_feed(&revised_text).unwrap();

    let before = first.events.iter().find(|e| e.uid == "offsite").unwrap();
    let after = revised.events.iter().find(|e| e.uid == "offsite").unwrap();
    assert_eq!(after.sequence, 7);
    assert_eq!(hash_event(before), hash_event(after));

    let renamed = parse_feed(&OUTLOOK_EXPORT.replace("SUMMARY:Offsite", "SUMMARY:Offsite 2024")).unwrap();
    let renamed = renamed.events.iter().find(|e| e.uid == "offsite").unwrap();
    assert_ne!(hash_event(before), hash_event(renamed));
}

#[test]
fn test_bad_blocks_become_diagnostics() {
    let text = OUTLOOK_EXPORT.replace("RRULE:FREQ=MONTHLY;BYDAY=-1FR", "RRULE:FREQ=FORTNIGHTLY").replace(
        "BEGIN:VEVENT\r\nUID:offsite\r\n",
        "BEGIN:VEVENT\r\nUID:broken\r\nDTSTART:not-a-date\r\nEND:VEVENT\r\nBEGIN:VEVENT\r\nUID:offsite\r\n",
    );
    let parsed = parse_feed(&text).unwrap();

    let kinds: Vec<DiagnosticKind> = parsed.diagnostics.iter().map(|d| d.kind).collect();
    assert!(kinds.contains(&DiagnosticKind::InvalidRecurrenceRule));
    assert!(kinds.contains(&DiagnosticKind::InvalidEventBlock));
    assert_eq!(parsed.events.len(), 4);
    let retro = parsed.events.iter().find(|e| e.uid == "retro").unwrap();
    assert!(retro.recurrence.is_none());
}

#[test]
fn test_unix_line_endings_and_truncation() {
    let unix = OUTLOOK_EXPORT.replace("\r\n", "\n");
    assert_eq!(parse_feed(&unix).unwrap().events.len(), 4);

    let cut = &OUTLOOK_EXPORT[..OUTLOOK_EXPORT.find("BEGIN:VEVENT\r\nUID:offsite").unwrap()];
    let err = parse_feed(cut).unwrap_err();
    assert!(matches!(err, SyncError::MalformedFeed { .. }));
    assert!(!err.to_safe_string().contains("Sprint review"));
}

#[test]
fn test_oversized_set_position_in_zone_rule_does_not_abort() {
    let text = "BEGIN:VCALENDAR\r
VERSION:2.0\r
BEGIN:VTIMEZONE\r
TZID:Branch Office\r
BEGIN:STANDARD\r
DTSTART:19701025T030000\r
RRULE:FREQ=YEARLY;BYMONTH=10;BYDAY=SU;BYSETPOS=128\r
TZOFFSETFROM:+0200\r
TZOFFSETTO:+0100\r
END:STANDARD\r
END:VTIMEZONE\r
BEGIN:VEVENT\r
UID:branch-meeting\r
DTSTART;TZID=Branch Office:20241110T090000\r
END:VEVENT\r
END:VCALENDAR\r
";
    let parsed = parse_feed(text).unwrap();
    assert_eq!(parsed.events.len(), 1);
    // no usable transition, so the observance's prior offset applies
    assert_eq!(parsed.events[0].start.instant(), Utc.with_ymd_and_hms(2024, 11, 10, 7, 0, 0).unwrap());
}

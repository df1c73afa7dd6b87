use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Canonical vocabulary of session log events.
///
/// The wire format is one JSON object per line. Anything carrying an event
/// name outside this set is treated as a malformed line and skipped by the
/// scanner, never matched by substring.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStart,
    SessionTerminated,
    CaptchaDetected,
    CaptchaFilled,
    CaptchaLoopDetected,
    CaptchaOcrRaw,
    CaptchaOcrSuccess,
    CaptchaOcrInvalid,
    CaptchaOcrException,
    CaptchaAccepted,
    CaptchaManualRequired,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SessionStart => "session_start",
            EventKind::SessionTerminated => "session_terminated",
            EventKind::CaptchaDetected => "captcha_detected",
            EventKind::CaptchaFilled => "captcha_filled",
            EventKind::CaptchaLoopDetected => "captcha_loop_detected",
            EventKind::CaptchaOcrRaw => "captcha_ocr_raw",
            EventKind::CaptchaOcrSuccess => "captcha_ocr_success",
            EventKind::CaptchaOcrInvalid => "captcha_ocr_invalid",
            EventKind::CaptchaOcrException => "captcha_ocr_exception",
            EventKind::CaptchaAccepted => "captcha_accepted",
            EventKind::CaptchaManualRequired => "captcha_manual_required",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "session_start" => Some(EventKind::SessionStart),
            "session_terminated" => Some(EventKind::SessionTerminated),
            "captcha_detected" => Some(EventKind::CaptchaDetected),
            "captcha_filled" => Some(EventKind::CaptchaFilled),
            "captcha_loop_detected" => Some(EventKind::CaptchaLoopDetected),
            "captcha_ocr_raw" => Some(EventKind::CaptchaOcrRaw),
            "captcha_ocr_success" => Some(EventKind::CaptchaOcrSuccess),
            "captcha_ocr_invalid" => Some(EventKind::CaptchaOcrInvalid),
            "captcha_ocr_exception" => Some(EventKind::CaptchaOcrException),
            "captcha_accepted" => Some(EventKind::CaptchaAccepted),
            "captcha_manual_required" => Some(EventKind::CaptchaManualRequired),
            _ => None,
        }
    }
}

/// One parsed line of the session event log.
///
/// Timestamps are kept naive: the emitting side writes RFC 3339, but logs
/// from older runs carry bare `datetime.isoformat()`-style stamps, so both
/// are accepted and an unparseable stamp degrades to `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub timestamp: Option<NaiveDateTime>,
    pub kind: EventKind,
    pub origin: Option<String>,
    pub profile: Option<String>,
    pub reason: Option<String>,
    pub message: Option<String>,
}

/// Field spellings as they appear on disk. `event` wins over `event_type`,
/// `ip` over `ip_address`.
#[derive(Debug, Deserialize)]
struct RawRecord {
    timestamp: Option<String>,
    event: Option<String>,
    event_type: Option<String>,
    reason: Option<String>,
    message: Option<String>,
    ip: Option<String>,
    ip_address: Option<String>,
    profile_type: Option<String>,
}

/// Parse one log line into an [`EventRecord`].
///
/// Returns `None` for blank lines, non-JSON lines, records without a
/// recognized event name — the scanner skips these without aborting.
pub fn parse_line(line: &str) -> Option<EventRecord> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let raw: RawRecord = serde_json::from_str(line).ok()?;
    let kind = raw
        .event
        .as_deref()
        .or(raw.event_type.as_deref())
        .and_then(EventKind::parse)?;

    Some(EventRecord {
        timestamp: raw.timestamp.as_deref().and_then(parse_timestamp),
        kind,
        origin: raw.ip.or(raw.ip_address),
        profile: raw.profile_type,
        reason: raw.reason,
        message: raw.message,
    })
}

/// Accepts naive ISO-8601 (`2024-05-01T09:30:00.125`) and RFC 3339 with an
/// offset; the latter is normalized to naive UTC so durations stay comparable.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive);
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.naive_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_KINDS: [EventKind; 11] = [
        EventKind::SessionStart,
        EventKind::SessionTerminated,
        EventKind::CaptchaDetected,
        EventKind::CaptchaFilled,
        EventKind::CaptchaLoopDetected,
        EventKind::CaptchaOcrRaw,
        EventKind::CaptchaOcrSuccess,
        EventKind::CaptchaOcrInvalid,
        EventKind::CaptchaOcrException,
        EventKind::CaptchaAccepted,
        EventKind::CaptchaManualRequired,
    ];

    #[test]
    fn kind_strings_round_trip() {
        for kind in ALL_KINDS {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
            // serde and as_str must agree, the sink writes via serde
            let serialized = serde_json::to_string(&kind).unwrap();
            assert_eq!(serialized, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert_eq!(EventKind::parse("captcha"), None);
        assert!(parse_line(r#"{"event": "browser_crashed"}"#).is_none());
    }

    #[test]
    fn event_field_wins_over_event_type() {
        let record = parse_line(
            r#"{"event": "session_start", "event_type": "captcha_filled"}"#,
        )
        .unwrap();
        assert_eq!(record.kind, EventKind::SessionStart);
    }

    #[test]
    fn event_type_spelling_is_accepted() {
        let record = parse_line(r#"{"event_type": "captcha_filled"}"#).unwrap();
        assert_eq!(record.kind, EventKind::CaptchaFilled);
    }

    #[test]
    fn ip_wins_over_ip_address() {
        let record = parse_line(
            r#"{"event": "session_start", "ip": "10.0.0.1", "ip_address": "10.0.0.2"}"#,
        )
        .unwrap();
        assert_eq!(record.origin.as_deref(), Some("10.0.0.1"));

        let record =
            parse_line(r#"{"event": "session_start", "ip_address": "10.0.0.2"}"#).unwrap();
        assert_eq!(record.origin.as_deref(), Some("10.0.0.2"));
    }

    #[test]
    fn garbage_lines_are_skipped() {
        assert!(parse_line("").is_none());
        assert!(parse_line("   ").is_none());
        assert!(parse_line("not json at all").is_none());
        assert!(parse_line(r#"{"timestamp": "2024-05-01T09:30:00"}"#).is_none());
    }

    #[test]
    fn naive_and_rfc3339_timestamps_both_parse() {
        let naive = parse_timestamp("2024-05-01T09:30:00.125").unwrap();
        assert_eq!(naive.format("%H:%M:%S%.3f").to_string(), "09:30:00.125");

        let aware = parse_timestamp("2024-05-01T09:30:00+05:30").unwrap();
        assert_eq!(aware.format("%H:%M:%S").to_string(), "04:00:00");

        assert_eq!(parse_timestamp("yesterday-ish"), None);
    }

    #[test]
    fn unparseable_timestamp_degrades_to_none() {
        let record = parse_line(
            r#"{"timestamp": "05/01/2024", "event": "session_start", "ip": "1.2.3.4"}"#,
        )
        .unwrap();
        assert!(record.timestamp.is_none());
        assert_eq!(record.origin.as_deref(), Some("1.2.3.4"));
    }
}

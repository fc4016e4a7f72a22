use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gmail::{MessagePayload, RawMessage, TRASH_LABEL, UNREAD_LABEL};
use crate::sanitize;

const SUBJECT_FALLBACK: &str = "(no subject)";
const SENDER_FALLBACK: &str = "(unknown)";

/// The provider-independent representation of one fetched newsletter.
/// Ephemeral per request; nothing here is persisted server-side.
///
/// `is_read` and `is_in_trash` are derived from `labels` at normalization
/// time and never settable independently. For trashed mail `raw_html` is
/// empty and `sanitized_html` is capped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Newsletter {
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    pub date: DateTime<Utc>,
    pub raw_html: String,
    pub sanitized_html: String,
    pub labels: Vec<String>,
    pub is_read: bool,
    pub is_in_trash: bool,
}

/// Converts one raw provider message into a [`Newsletter`].
///
/// Returns `None` when the message carries no extractable HTML body —
/// text-only mail is outside scope and silently excluded, never an error.
pub fn normalize_message(message: &RawMessage) -> Option<Newsletter> {
    let html = extract_html(&message.payload)?;

    let labels = message.label_ids.clone().unwrap_or_default();
    // Trash membership gates body retention, so derive it before
    // assembling the record.
    let is_in_trash = labels.iter().any(|label| label == TRASH_LABEL);
    let is_read = !labels.iter().any(|label| label == UNREAD_LABEL);

    let cleaned = sanitize::clean_html(&html);
    let sanitized_html = if is_in_trash {
        sanitize::cap_archived(&cleaned)
    } else {
        cleaned
    };
    // The full body of trashed mail is never returned to the caller.
    let raw_html = if is_in_trash { String::new() } else { html };

    Some(Newsletter {
        message_id: message.id.clone(),
        subject: header_value(&message.payload, "Subject")
            .unwrap_or_else(|| SUBJECT_FALLBACK.to_string()),
        sender: header_value(&message.payload, "From")
            .unwrap_or_else(|| SENDER_FALLBACK.to_string()),
        date: parse_date(header_value(&message.payload, "Date").as_deref()),
        raw_html,
        sanitized_html,
        labels,
        is_read,
        is_in_trash,
    })
}

/// Locates and decodes the HTML body. Multi-part messages take the first
/// top-level `text/html` part with non-empty data; single-part messages
/// must be `text/html` at the top level. Anything else yields `None`.
fn extract_html(payload: &MessagePayload) -> Option<String> {
    if let Some(parts) = &payload.parts {
        let part = parts.iter().find(|part| {
            part.mime_type.as_deref() == Some("text/html")
                && part
                    .body
                    .as_ref()
                    .and_then(|body| body.data.as_deref())
                    .is_some_and(|data| !data.is_empty())
        })?;
        return decode_body_data(part.body.as_ref()?.data.as_deref()?);
    }

    if payload.mime_type.as_deref() == Some("text/html") {
        let data = payload
            .body
            .as_ref()
            .and_then(|body| body.data.as_deref())
            .filter(|data| !data.is_empty())?;
        return decode_body_data(data);
    }

    None
}

/// Gmail body data is URL-safe base64. Padding is trimmed first since
/// some payloads arrive padded.
fn decode_body_data(data: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok()?;
    String::from_utf8(bytes).ok()
}

/// Headers are matched by exact, case-sensitive name against the fixed
/// set the normalizer extracts.
fn header_value(payload: &MessagePayload, name: &str) -> Option<String> {
    payload
        .headers
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|header| header.name == name)
        .map(|header| header.value.clone())
}

fn parse_date(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|value| DateTime::parse_from_rfc2822(value).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::normalize_message;
    use crate::gmail::RawMessage;
    use crate::sanitize::ARCHIVED_CONTENT_CAP;

    fn encoded(html: &str) -> String {
        URL_SAFE_NO_PAD.encode(html)
    }

    fn multipart_message(
        id: &str,
        labels: &[&str],
        html: &str,
        headers: serde_json::Value,
    ) -> RawMessage {
        serde_json::from_value(json!({
            "id": id,
            "labelIds": labels,
            "payload": {
                "mimeType": "multipart/alternative",
                "headers": headers,
                "parts": [
                    {
                        "mimeType": "text/plain",
                        "body": { "size": 4, "data": encoded("text") }
                    },
                    {
                        "mimeType": "text/html",
                        "body": { "size": html.len(), "data": encoded(html) }
                    }
                ]
            }
        }))
        .expect("build raw message")
    }

    #[test]
    fn multipart_message_takes_the_first_html_part() {
        let message = multipart_message(
            "msg-1",
            &["INBOX"],
            "<p>Digest</p>",
            json!([
                { "name": "Subject", "value": "Weekly Digest" },
                { "name": "From", "value": "news@example.com" },
                { "name": "Date", "value": "Tue, 10 Jun 2025 08:00:00 +0000" }
            ]),
        );

        let newsletter = normalize_message(&message).expect("html message normalizes");
        assert_eq!(newsletter.message_id, "msg-1");
        assert_eq!(newsletter.subject, "Weekly Digest");
        assert_eq!(newsletter.sender, "news@example.com");
        assert_eq!(newsletter.raw_html, "<p>Digest</p>");
        assert_eq!(newsletter.sanitized_html, "<p>Digest</p>");
        assert_eq!(
            newsletter.date,
            Utc.with_ymd_and_hms(2025, 6, 10, 8, 0, 0).single().expect("valid date")
        );
    }

    #[test]
    fn single_part_html_message_normalizes() {
        let message: RawMessage = serde_json::from_value(json!({
            "id": "msg-2",
            "labelIds": ["INBOX", "UNREAD"],
            "payload": {
                "mimeType": "text/html",
                "headers": [],
                "body": { "data": encoded("<b>Hi</b>") }
            }
        }))
        .expect("build raw message");

        let newsletter = normalize_message(&message).expect("normalizes");
        assert_eq!(newsletter.raw_html, "<b>Hi</b>");
        assert!(!newsletter.is_read);
        assert_eq!(newsletter.subject, "(no subject)");
        assert_eq!(newsletter.sender, "(unknown)");
    }

    #[test]
    fn message_without_html_part_is_dropped() {
        let message: RawMessage = serde_json::from_value(json!({
            "id": "msg-3",
            "payload": {
                "mimeType": "text/plain",
                "headers": [],
                "body": { "data": encoded("plain text only") }
            }
        }))
        .expect("build raw message");

        assert!(normalize_message(&message).is_none());
    }

    #[test]
    fn read_and_trash_flags_derive_from_labels() {
        let unread = multipart_message("msg-4", &["INBOX", "UNREAD"], "<p>x</p>", json!([]));
        let newsletter = normalize_message(&unread).expect("normalizes");
        assert!(!newsletter.is_read);
        assert!(!newsletter.is_in_trash);

        let trashed = multipart_message("msg-5", &["TRASH"], "<p>x</p>", json!([]));
        let newsletter = normalize_message(&trashed).expect("normalizes");
        assert!(newsletter.is_read);
        assert!(newsletter.is_in_trash);
    }

    #[test]
    fn trashed_message_keeps_no_raw_html_and_caps_sanitized_content() {
        let long_body = format!("<div>{}</div>", "a".repeat(15_000));
        let message = multipart_message("msg-6", &["TRASH"], &long_body, json!([]));

        let newsletter = normalize_message(&message).expect("normalizes");
        assert_eq!(newsletter.raw_html, "");
        assert_eq!(
            newsletter.sanitized_html.chars().count(),
            ARCHIVED_CONTENT_CAP
        );
    }

    #[test]
    fn header_match_is_case_sensitive() {
        let message = multipart_message(
            "msg-7",
            &[],
            "<p>x</p>",
            json!([
                { "name": "subject", "value": "lowercased name" },
                { "name": "FROM", "value": "shouty@example.com" }
            ]),
        );

        let newsletter = normalize_message(&message).expect("normalizes");
        assert_eq!(newsletter.subject, "(no subject)");
        assert_eq!(newsletter.sender, "(unknown)");
    }

    #[test]
    fn unparseable_date_falls_back_to_now() {
        let message = multipart_message(
            "msg-8",
            &[],
            "<p>x</p>",
            json!([{ "name": "Date", "value": "not a date" }]),
        );

        let before = Utc::now();
        let newsletter = normalize_message(&message).expect("normalizes");
        assert!(newsletter.date >= before);
    }

    #[test]
    fn undecodable_body_data_drops_the_message() {
        let message: RawMessage = serde_json::from_value(json!({
            "id": "msg-9",
            "payload": {
                "mimeType": "text/html",
                "headers": [],
                "body": { "data": "!!! not base64 !!!" }
            }
        }))
        .expect("build raw message");

        assert!(normalize_message(&message).is_none());
    }
}

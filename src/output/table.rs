use chrono::{DateTime, Utc};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::aggregate::NewsletterBatch;
use crate::normalize::Newsletter;
use crate::service::ActionOutcome;

const ID_WIDTH: usize = 16;
const SENDER_WIDTH: usize = 24;
const SUBJECT_WIDTH: usize = 48;
const DATE_WIDTH: usize = 12;
const STATUS_WIDTH: usize = 6;
const BODY_RENDER_WIDTH: usize = 100;

pub fn format_batch(batch: &NewsletterBatch) -> String {
    let mut out = String::new();
    out.push_str(&batch.summary.headline());
    out.push('\n');

    if batch.newsletters.is_empty() {
        return out;
    }

    out.push('\n');
    out.push_str(&format!(
        "{:<id$}  {:<sender$}  {:<subject$}  {:<date$}  {:<status$}\n",
        "ID",
        "From",
        "Subject",
        "Date",
        "Status",
        id = ID_WIDTH,
        sender = SENDER_WIDTH,
        subject = SUBJECT_WIDTH,
        date = DATE_WIDTH,
        status = STATUS_WIDTH
    ));
    out.push_str(&format!(
        "{}  {}  {}  {}  {}\n",
        "-".repeat(ID_WIDTH),
        "-".repeat(SENDER_WIDTH),
        "-".repeat(SUBJECT_WIDTH),
        "-".repeat(DATE_WIDTH),
        "-".repeat(STATUS_WIDTH)
    ));

    for newsletter in &batch.newsletters {
        out.push_str(&format!(
            "{:<id$}  {:<sender$}  {:<subject$}  {:<date$}  {:<status$}\n",
            truncate_for_width(&newsletter.message_id, ID_WIDTH),
            truncate_for_width(&newsletter.sender, SENDER_WIDTH),
            truncate_for_width(&newsletter.subject, SUBJECT_WIDTH),
            truncate_for_width(&relative_date(&newsletter.date), DATE_WIDTH),
            status_label(newsletter),
            id = ID_WIDTH,
            sender = SENDER_WIDTH,
            subject = SUBJECT_WIDTH,
            date = DATE_WIDTH,
            status = STATUS_WIDTH
        ));
    }

    out
}

pub fn format_newsletter(newsletter: &Newsletter) -> String {
    let mut out = String::new();
    out.push_str(&format!("ID: {}\n", newsletter.message_id));
    out.push_str(&format!("Subject: {}\n", newsletter.subject));
    out.push_str(&format!("From: {}\n", newsletter.sender));
    out.push_str(&format!(
        "Date: {} ({})\n",
        newsletter.date.to_rfc3339(),
        relative_date(&newsletter.date)
    ));
    out.push_str(&format!(
        "Status: {}\n",
        colorize_status(status_label(newsletter))
    ));
    if !newsletter.labels.is_empty() {
        out.push_str(&format!("Labels: {}\n", newsletter.labels.join(", ")));
    }

    out.push('\n');
    out.push_str("Body\n");
    out.push_str("----\n");
    out.push_str(&render_body(&newsletter.sanitized_html));
    out.push('\n');
    out
}

pub fn format_outcome(outcome: &ActionOutcome) -> String {
    if outcome.success {
        "ok".to_string()
    } else {
        format!(
            "failed: {}",
            outcome.error.as_deref().unwrap_or("(no detail)")
        )
    }
}

fn status_label(newsletter: &Newsletter) -> &'static str {
    if newsletter.is_in_trash {
        "trash"
    } else if !newsletter.is_read {
        "unread"
    } else {
        "read"
    }
}

fn colorize_status(label: &str) -> String {
    match label {
        "trash" => format!("\u{1b}[31m{label}\u{1b}[0m"),
        "unread" => format!("\u{1b}[33m{label}\u{1b}[0m"),
        _ => format!("\u{1b}[32m{label}\u{1b}[0m"),
    }
}

/// Terminal rendering of the sanitized HTML body. html2text can panic on
/// pathological markup, so the conversion runs under catch_unwind.
fn render_body(sanitized_html: &str) -> String {
    if sanitized_html.trim().is_empty() {
        return "(empty)".to_string();
    }

    std::panic::catch_unwind(|| {
        html2text::from_read(sanitized_html.as_bytes(), BODY_RENDER_WIDTH)
            .lines()
            .map(str::trim_end)
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    })
    .ok()
    .filter(|text| !text.is_empty())
    .unwrap_or_else(|| "(body could not be rendered)".to_string())
}

fn relative_date(date: &DateTime<Utc>) -> String {
    let now = Utc::now();
    let delta = now.signed_duration_since(*date);
    if delta.num_seconds() < 0 {
        return "in future".to_string();
    }
    if delta.num_minutes() < 1 {
        return "just now".to_string();
    }
    if delta.num_hours() < 1 {
        return format!("{}m ago", delta.num_minutes());
    }
    if delta.num_hours() < 24 {
        return format!("{}h ago", delta.num_hours());
    }
    if delta.num_days() == 1 {
        return "yesterday".to_string();
    }
    if delta.num_days() < 7 {
        return format!("{}d ago", delta.num_days());
    }
    date.format("%Y-%m-%d").to_string()
}

fn truncate_for_width(value: &str, max_width: usize) -> String {
    if UnicodeWidthStr::width(value) <= max_width {
        return value.to_string();
    }

    if max_width <= 1 {
        return "…".to_string();
    }

    let mut out = String::new();
    let mut width = 0usize;
    for c in value.chars() {
        let cw = UnicodeWidthChar::width(c).unwrap_or(0);
        if width + cw + 1 > max_width {
            break;
        }
        out.push(c);
        width += cw;
    }
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::aggregate::aggregate;
    use crate::normalize::Newsletter;
    use crate::service::ActionOutcome;

    use super::{format_batch, format_newsletter, format_outcome, truncate_for_width};

    fn sample_newsletter(in_trash: bool) -> Newsletter {
        Newsletter {
            message_id: "msg-1".to_string(),
            subject: "A very long subject line that should be truncated in table output because it exceeds the column width".to_string(),
            sender: "Newsletter Weekly <news@example.com>".to_string(),
            date: Utc::now() - Duration::hours(2),
            raw_html: if in_trash { String::new() } else { "<p>Hi</p>".to_string() },
            sanitized_html: "<p>Hi</p>".to_string(),
            labels: vec!["INBOX".to_string(), "UNREAD".to_string()],
            is_read: false,
            is_in_trash: in_trash,
        }
    }

    #[test]
    fn batch_output_has_headline_and_columns() {
        let rendered = format_batch(&aggregate(vec![sample_newsletter(false)]));
        assert!(rendered.starts_with("1 newsletters found (1 active, 0 in trash)"));
        assert!(rendered.contains("Subject"));
        assert!(rendered.contains("unread"));
    }

    #[test]
    fn empty_batch_renders_only_the_headline() {
        let rendered = format_batch(&aggregate(Vec::new()));
        assert_eq!(
            rendered.trim(),
            "0 newsletters found (0 active, 0 in trash)"
        );
    }

    #[test]
    fn single_newsletter_output_renders_the_body_as_text() {
        let rendered = format_newsletter(&sample_newsletter(false));
        assert!(rendered.contains("Subject:"));
        assert!(rendered.contains("Body"));
        assert!(rendered.contains("Hi"));
        assert!(!rendered.contains("<p>"));
    }

    #[test]
    fn outcome_formatting_covers_both_arms() {
        assert_eq!(
            format_outcome(&ActionOutcome {
                success: true,
                error: None,
            }),
            "ok"
        );
        assert_eq!(
            format_outcome(&ActionOutcome {
                success: false,
                error: Some("quota exceeded".to_string()),
            }),
            "failed: quota exceeded"
        );
    }

    #[test]
    fn truncation_respects_display_width() {
        assert_eq!(truncate_for_width("short", 10), "short");
        let truncated = truncate_for_width("a very long header value", 10);
        assert!(truncated.ends_with('…'));
        assert!(unicode_width::UnicodeWidthStr::width(truncated.as_str()) <= 10);
    }
}

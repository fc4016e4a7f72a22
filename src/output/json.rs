use anyhow::Result;

use crate::aggregate::NewsletterBatch;
use crate::normalize::Newsletter;
use crate::service::ActionOutcome;

pub fn format_batch(batch: &NewsletterBatch) -> Result<String> {
    Ok(serde_json::to_string_pretty(batch)?)
}

pub fn format_newsletter(newsletter: &Newsletter) -> Result<String> {
    Ok(serde_json::to_string_pretty(newsletter)?)
}

pub fn format_outcome(outcome: &ActionOutcome) -> Result<String> {
    Ok(serde_json::to_string_pretty(outcome)?)
}

pub mod json;
pub mod table;

use anyhow::Result;

use crate::aggregate::NewsletterBatch;
use crate::normalize::Newsletter;
use crate::service::ActionOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl OutputFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            Self::Json
        } else {
            Self::Table
        }
    }
}

pub fn format_batch(format: OutputFormat, batch: &NewsletterBatch) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_batch(batch)),
        OutputFormat::Json => json::format_batch(batch),
    }
}

pub fn format_newsletter(format: OutputFormat, newsletter: &Newsletter) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_newsletter(newsletter)),
        OutputFormat::Json => json::format_newsletter(newsletter),
    }
}

pub fn format_outcome(format: OutputFormat, outcome: &ActionOutcome) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_outcome(outcome)),
        OutputFormat::Json => json::format_outcome(outcome),
    }
}

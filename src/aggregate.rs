use std::cmp::Reverse;

use serde::{Deserialize, Serialize};

use crate::normalize::Newsletter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchSummary {
    pub total: usize,
    pub active: usize,
    pub trashed: usize,
}

impl FetchSummary {
    /// Human-readable summary line for the whole fetch.
    pub fn headline(&self) -> String {
        format!(
            "{} newsletters found ({} active, {} in trash)",
            self.total, self.active, self.trashed
        )
    }
}

/// The final response of a fetch: ordered newsletters plus counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsletterBatch {
    pub summary: FetchSummary,
    pub newsletters: Vec<Newsletter>,
}

/// Merges the active and trash partitions into one ordered batch.
///
/// Total order: everything not in trash sorts before everything in
/// trash; within each partition, most recent first. The sort is stable,
/// so equal-date items keep their fetch order.
pub fn aggregate(mut newsletters: Vec<Newsletter>) -> NewsletterBatch {
    newsletters.sort_by_key(|newsletter| (newsletter.is_in_trash, Reverse(newsletter.date)));

    let trashed = newsletters
        .iter()
        .filter(|newsletter| newsletter.is_in_trash)
        .count();
    let summary = FetchSummary {
        total: newsletters.len(),
        active: newsletters.len() - trashed,
        trashed,
    };

    NewsletterBatch {
        summary,
        newsletters,
    }
}

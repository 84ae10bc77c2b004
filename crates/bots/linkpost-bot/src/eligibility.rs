//! Decides which fetched articles may be posted.
//!
//! An article is eligible when its link was never recorded in the ledger
//! and it was published at or after the cutoff. The cutoff keeps a fresh
//! deployment from working through the whole back catalogue; it is a fixed
//! date, not a sliding window.

use std::collections::BTreeSet;

use time::format_description::well_known::{Iso8601, Rfc3339};
use time::macros::{datetime, format_description};
use time::{Date, OffsetDateTime, PrimitiveDateTime};
use tracing::debug;

use crate::source::CandidateArticle;

const LOG_TARGET: &str = "linkpost::eligibility";

/// Articles published before this are never posted.
pub const DEFAULT_MIN_PUBLISH_DATE: OffsetDateTime = datetime!(2025-12-11 00:00:00 UTC);

/// Parse an article's publication time.
///
/// Accepts RFC 3339 (`Z` or a numeric offset). Timestamps without an offset
/// are taken as UTC, and bare dates as midnight UTC.
pub fn parse_publish_date(raw: &str) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(dt);
    }
    if let Ok(dt) = OffsetDateTime::parse(raw, &Iso8601::DEFAULT) {
        return Some(dt);
    }
    if let Ok(dt) = PrimitiveDateTime::parse(raw, &Iso8601::DEFAULT) {
        return Some(dt.assume_utc());
    }
    Date::parse(raw, format_description!("[year]-[month]-[day]"))
        .ok()
        .map(|date| date.midnight().assume_utc())
}

/// Why a candidate was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Eligible,
    NoLink,
    AlreadyPublished,
    UnparseableDate,
    BeforeCutoff,
}

pub fn judge(
    candidate: &CandidateArticle,
    known_urls: &BTreeSet<String>,
    cutoff: OffsetDateTime,
) -> Verdict {
    if candidate.link.is_empty() {
        return Verdict::NoLink;
    }
    if known_urls.contains(&candidate.link) {
        return Verdict::AlreadyPublished;
    }
    match candidate.published_at.as_deref().and_then(parse_publish_date) {
        None => Verdict::UnparseableDate,
        Some(published_at) if published_at < cutoff => Verdict::BeforeCutoff,
        Some(_) => Verdict::Eligible,
    }
}

/// Keep the candidates that are new and recent enough, in source order.
pub fn select_eligible(
    candidates: Vec<CandidateArticle>,
    known_urls: &BTreeSet<String>,
    cutoff: OffsetDateTime,
) -> Vec<CandidateArticle> {
    candidates
        .into_iter()
        .filter(|candidate| {
            let verdict = judge(candidate, known_urls, cutoff);
            if verdict != Verdict::Eligible {
                debug!(
                    target: LOG_TARGET,
                    link = %candidate.link,
                    ?verdict,
                    "Skipping article"
                );
            }
            verdict == Verdict::Eligible
        })
        .collect()
}

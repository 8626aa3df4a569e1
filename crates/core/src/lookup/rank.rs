//! Ordering of identify results when picking a cover.

use std::cmp::Ordering;

use crate::isbn::check_isbn;
use crate::lookup::matching::{strip_accents, swap_name_order};
use crate::lookup::{MetadataRecord, Query};

#[derive(Debug, Clone, Copy, PartialEq)]
struct RankKey {
    identifier_match: bool,
    similarity: f64,
    relevance: usize,
}

fn similarity(a: &str, b: &str) -> f64 {
    strsim::jaro_winkler(&strip_accents(a), &strip_accents(b))
}

fn rank_key(record: &MetadataRecord, query: &Query) -> RankKey {
    let site_match = query.site_id() == Some(record.site_id.as_str());
    let isbn_match = match (query.isbn().and_then(check_isbn), record.isbn.as_deref().and_then(check_isbn)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    };

    let title_sim = match query.title.as_deref() {
        Some(t) if !t.trim().is_empty() => similarity(t, &record.title),
        _ => 0.0,
    };
    let author_sim = match query.authors.first() {
        Some(wanted) if !wanted.trim().is_empty() => {
            let swapped = swap_name_order(wanted);
            record
                .authors
                .iter()
                .map(|a| similarity(wanted, a).max(similarity(&swapped, a)))
                .fold(0.0, f64::max)
        }
        _ => 0.0,
    };

    RankKey {
        identifier_match: site_match || isbn_match,
        similarity: title_sim + author_sim,
        relevance: record.relevance,
    }
}

fn compare(a: &RankKey, b: &RankKey) -> Ordering {
    b.identifier_match
        .cmp(&a.identifier_match)
        .then(b.similarity.partial_cmp(&a.similarity).unwrap_or(Ordering::Equal))
        .then(a.relevance.cmp(&b.relevance))
}

/// Best match first: identifier hits, then title/author similarity, then the
/// search rank. Equal keys keep their arrival order.
pub fn sort_by_relevance(records: Vec<MetadataRecord>, query: &Query) -> Vec<MetadataRecord> {
    let mut keyed: Vec<(RankKey, MetadataRecord)> = records
        .into_iter()
        .map(|r| (rank_key(&r, query), r))
        .collect();
    keyed.sort_by(|(a, _), (b, _)| compare(a, b));
    keyed.into_iter().map(|(_, r)| r).collect()
}

//! Search-result filtering: decides which result rows plausibly match the
//! title/author being looked up.
//!
//! Comparison is loose: a case-insensitive substring test, done
//! both on the raw text and on an accent-stripped form, and for authors on
//! both "Given Family" and "Family Given" orderings.

use scraper::{Html, Selector};

const ACCENTED: &str = "öÖüÜóÓőŐúÚéÉáÁűŰíÍ";
const PLAIN: &str = "oOuUoOoOuUeEaAuUiI";

/// One `a.book_selector` row from the search page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRow {
    /// Combined "Author: Title" text with inline markup removed.
    pub text: String,
    pub hrefs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub url: String,
    pub title: String,
    pub author: String,
    pub relevance: usize,
}

/// Map the Hungarian accented vowels to their bare form, then lowercase.
pub fn strip_accents(s: &str) -> String {
    s.chars()
        .map(|c| match ACCENTED.chars().position(|a| a == c) {
            Some(i) => PLAIN.chars().nth(i).unwrap_or(c),
            None => c,
        })
        .collect::<String>()
        .to_lowercase()
}

/// The first two space-separated tokens, swapped ("Jules Verne" -> "Verne Jules").
/// Tokens after the second are dropped; a single token is returned unchanged.
pub fn swap_name_order(name: &str) -> String {
    let parts: Vec<&str> = name.split(' ').collect();
    match parts.as_slice() {
        [first, second, ..] => format!("{} {}", second, first),
        _ => name.to_string(),
    }
}

/// `needle` occurs in `haystack`, ignoring case, or ignoring case and accents.
pub fn loosely_contains(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
        || strip_accents(haystack).contains(&strip_accents(needle))
}

pub fn parse_search_rows(document: &Html) -> Vec<SearchRow> {
    let Ok(selector) = Selector::parse("a.book_selector") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .map(|el| SearchRow {
            text: el.text().collect::<String>(),
            hrefs: el.value().attr("href").map(String::from).into_iter().collect(),
        })
        .collect()
}

fn split_author_title(text: &str) -> (String, String) {
    const WS: &[char] = &[' ', '\r', '\n', '\t'];
    match text.split_once(':') {
        Some((author, title)) => (author.trim_matches(WS).to_string(), title.trim_matches(WS).to_string()),
        None => (String::new(), text.trim_matches(WS).to_string()),
    }
}

fn author_matches(scraped: &str, wanted: &str) -> bool {
    loosely_contains(scraped, wanted) || loosely_contains(scraped, &swap_name_order(wanted))
}

/// Keep the rows that match the original query, in page order, and turn their
/// links into absolute URLs. Stops as soon as `max_results` distinct URLs are
/// collected.
pub fn filter_candidates(
    rows: &[SearchRow],
    orig_title: Option<&str>,
    orig_authors: &[String],
    max_results: usize,
    base_url: &str,
) -> Vec<Candidate> {
    let mut out: Vec<Candidate> = Vec::new();
    if max_results == 0 {
        return out;
    }
    let orig_title = orig_title.filter(|t| !t.is_empty());
    let first_author = orig_authors.first().filter(|a| !a.is_empty());

    for row in rows {
        let (author, title) = split_author_title(&row.text);
        tracing::debug!(
            "Orig: {:?}, target: {}",
            orig_title.map(strip_accents),
            strip_accents(&title)
        );

        if let Some(wanted) = orig_title {
            if !loosely_contains(&title, wanted) {
                continue;
            }
        }
        if let Some(wanted) = first_author {
            if !author_matches(&author, wanted) {
                continue;
            }
        }

        for href in &row.hrefs {
            let url = format!("{}{}", base_url, href);
            if out.iter().any(|c| c.url == url) {
                continue;
            }
            let relevance = out.len();
            out.push(Candidate {
                url,
                title: title.clone(),
                author: author.clone(),
                relevance,
            });
            if out.len() >= max_results {
                return out;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn row(text: &str, hrefs: &[&str]) -> SearchRow {
        SearchRow {
            text: text.to_string(),
            hrefs: hrefs.iter().map(|h| h.to_string()).collect(),
        }
    }

    fn urls(c: &[Candidate]) -> Vec<&str> {
        c.iter().map(|c| c.url.as_str()).collect()
    }

    #[test]
    fn strip_accents_table() {
        assert_eq!(strip_accents("ÖöÜüÓóŐőÚúÉéÁáŰűÍí"), "oouuoooouueeaauuii");
        assert_eq!(strip_accents("Bölcsek Köve"), "bolcsek kove");
    }

    #[test]
    fn swap_name_order_two_tokens() {
        assert_eq!(swap_name_order("Jules Verne"), "Verne Jules");
        assert_eq!(swap_name_order("Homérosz"), "Homérosz");
        assert_eq!(swap_name_order("Gabriel García Márquez"), "García Gabriel");
    }

    #[test]
    fn three_token_author_matches_on_swapped_pair() {
        let rows = [row("García Gabriel: Száz év magány", &["/konyvek/szaz-ev-maganya"])];
        let authors = vec!["Gabriel García Márquez".to_string()];
        let got = filter_candidates(&rows, Some("Száz év magány"), &authors, 3, "");
        assert_eq!(urls(&got), vec!["/konyvek/szaz-ev-maganya"]);
    }

    #[test]
    fn title_matches_case_insensitively() {
        let rows = [row("J. K. Rowling: Harry Potter és a Bölcsek Köve", &["/konyvek/hp1"])];
        let got = filter_candidates(&rows, Some("Harry Potter és a bölcsek köve"), &[], 3, "https://moly.hu");
        assert_eq!(urls(&got), vec!["https://moly.hu/konyvek/hp1"]);
        assert_eq!(got[0].author, "J. K. Rowling");
        assert_eq!(got[0].title, "Harry Potter és a Bölcsek Köve");
    }

    #[test]
    fn title_matches_without_accents() {
        let rows = [row("Jókai Mór: Az arany ember", &["/konyvek/arany"])];
        let got = filter_candidates(&rows, Some("Az ARANY ember"), &[], 3, "");
        assert_eq!(got.len(), 1);
        let got = filter_candidates(&rows, Some("Az aràny ember"), &[], 3, "");
        assert!(got.is_empty());
        let rows = [row("Jókai Mór: Az áránY ember", &["/konyvek/arany"])];
        let got = filter_candidates(&rows, Some("az arany"), &[], 3, "");
        assert_eq!(got.len(), 1);
    }

    #[test]
    fn author_name_order_swap() {
        let rows = [row("Verne Jules: Nemo kapitány", &["/konyvek/nemo"])];
        let authors = vec!["Jules Verne".to_string()];
        let got = filter_candidates(&rows, Some("Nemo kapitány"), &authors, 3, "");
        assert_eq!(urls(&got), vec!["/konyvek/nemo"]);
    }

    #[test]
    fn wrong_author_rejected() {
        let rows = [row("Verne Gyula: Nemo kapitány", &["/konyvek/nemo"])];
        let authors = vec!["Karl May".to_string()];
        assert!(filter_candidates(&rows, Some("Nemo"), &authors, 3, "").is_empty());
    }

    #[test]
    fn empty_query_accepts_everything_up_to_cap() {
        let rows = [
            row("A: B", &["/konyvek/1"]),
            row("C: D", &["/konyvek/2", "/konyvek/3"]),
            row("E: F", &["/konyvek/4"]),
        ];
        let got = filter_candidates(&rows, None, &[], 3, "");
        assert_eq!(urls(&got), vec!["/konyvek/1", "/konyvek/2", "/konyvek/3"]);
        assert_eq!(got.iter().map(|c| c.relevance).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn duplicate_links_are_skipped() {
        let rows = [
            row("A: Cím", &["/konyvek/1", "/konyvek/1"]),
            row("A: Cím", &["/konyvek/1"]),
            row("A: Cím", &["/konyvek/2"]),
        ];
        let got = filter_candidates(&rows, Some("cím"), &[], 5, "");
        assert_eq!(urls(&got), vec!["/konyvek/1", "/konyvek/2"]);
    }

    #[test]
    fn row_without_colon_is_title_only() {
        let rows = [row("Magányos cím", &["/konyvek/m"])];
        assert_eq!(filter_candidates(&rows, Some("magányos"), &[], 3, "").len(), 1);
        let authors = vec!["Valaki".to_string()];
        assert!(filter_candidates(&rows, Some("magányos"), &authors, 3, "").is_empty());
    }

    #[test]
    fn parse_rows_strips_inline_markup() {
        let html = Html::parse_document(
            r#"<html><body><div id="search">
            <a class="book_selector" href="/konyvek/jules-verne-nemo-kapitany"><strong>Jules Verne</strong>: Nemo kapitány</a>
            <a class="other" href="/x">ignored</a>
            </div></body></html>"#,
        );
        let rows = parse_search_rows(&html);
        assert_eq!(
            rows,
            vec![row("Jules Verne: Nemo kapitány", &["/konyvek/jules-verne-nemo-kapitany"])]
        );
    }

    proptest! {
        #[test]
        fn strip_accents_is_idempotent(s in "[a-zA-Z öÖüÜóÓőŐúÚéÉáÁűŰíÍ]{0,40}") {
            let once = strip_accents(&s);
            prop_assert_eq!(strip_accents(&once), once);
        }

        #[test]
        fn filter_is_bounded_and_unique(
            hrefs in proptest::collection::vec(proptest::collection::vec("/konyvek/[a-c]{1,2}", 0..4), 0..30),
            max in 0usize..6,
        ) {
            let rows: Vec<SearchRow> = hrefs
                .into_iter()
                .map(|h| SearchRow { text: "Szerző: Cím".to_string(), hrefs: h })
                .collect();
            let got = filter_candidates(&rows, Some("cím"), &[], max, "");
            prop_assert!(got.len() <= max);
            let mut seen = std::collections::HashSet::new();
            for c in &got {
                prop_assert!(seen.insert(c.url.clone()));
            }
        }
    }
}

//! Field extraction from a moly.hu book page.
//!
//! Required fields (title, authors, site id) have their own functions. The
//! optional ones are listed in [`OPTIONAL_RULES`] and applied one by one: a
//! rule that fails leaves its field unset and never affects the others.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::error::LookupError;
use crate::lookup::{MetadataRecord, Series};

/// Language tags as they appear on the site, lowercased.
const LANGUAGE_TAGS: &[(&str, &str)] = &[
    ("angol nyelvű", "en"),
    ("német nyelvű", "de"),
    ("francia nyelvű", "fr"),
    ("olasz nyelvű", "it"),
    ("spanyol nyelvű", "es"),
    ("orosz nyelvű", "ru"),
    ("török nyelvű", "tr"),
    ("görög nyelvű", "gr"),
    ("kínai nyelvű", "cn"),
    ("japán nyelvű", "jp"),
];

/// Used when no tag names a language.
pub const DEFAULT_LANGUAGE: &str = "hu";

const BOOK_PATH: &str = "/konyvek/";

/// Per-page settings the rules need besides the document.
#[derive(Debug, Clone)]
pub struct ExtractContext<'a> {
    pub base_url: &'a str,
    pub max_covers: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Isbn(String),
    Series(Series),
    Comments(String),
    Publisher(String),
    Pubdate(DateTime<Utc>),
    Tags(Vec<String>),
    Languages(Vec<String>),
    Rating(f64),
    CoverUrls(Vec<String>),
}

impl Field {
    pub fn apply(self, record: &mut MetadataRecord) {
        match self {
            Field::Isbn(v) => record.isbn = Some(v),
            Field::Series(v) => record.series = Some(v),
            Field::Comments(v) => record.comments = Some(v),
            Field::Publisher(v) => record.publisher = Some(v),
            Field::Pubdate(v) => record.pubdate = Some(v),
            Field::Tags(v) => record.tags = v,
            Field::Languages(v) => record.languages = v,
            Field::Rating(v) => record.rating = Some(v),
            Field::CoverUrls(v) => record.cover_urls = v,
        }
    }
}

pub type Rule = fn(&Html, &ExtractContext<'_>) -> Result<Option<Field>, LookupError>;

pub const OPTIONAL_RULES: &[(&str, Rule)] = &[
    ("isbn", isbn_rule),
    ("series", series_rule),
    ("comments", comments_rule),
    ("cover", cover_rule),
    ("tags", tags_rule),
    ("languages", languages_rule),
    ("publisher", publisher_rule),
    ("pubdate", pubdate_rule),
    ("rating", rating_rule),
];

fn selector(field: &'static str, css: &str) -> Result<Selector, LookupError> {
    Selector::parse(css).map_err(|e| LookupError::field(field, format!("bad selector {css:?}: {e}")))
}

fn pattern(field: &'static str, re: &str) -> Result<Regex, LookupError> {
    Regex::new(re).map_err(|e| LookupError::field(field, e.to_string()))
}

/// Text nodes that are direct children of `el`.
fn own_text(el: ElementRef<'_>) -> Vec<String> {
    el.children()
        .filter_map(|n| n.value().as_text().map(|t| String::from(&**t)))
        .collect()
}

fn own_text_all(document: &Html, field: &'static str, css: &str) -> Result<Vec<String>, LookupError> {
    let sel = selector(field, css)?;
    Ok(document.select(&sel).flat_map(own_text).collect())
}

fn full_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>()
}

/// The id is whatever follows `/konyvek/` in the page URL.
pub fn parse_site_id(url: &str) -> Option<String> {
    url.find(BOOK_PATH)
        .map(|i| &url[i + BOOK_PATH.len()..])
        .filter(|id| !id.is_empty())
        .map(String::from)
}

pub fn parse_title(document: &Html) -> Result<Option<String>, LookupError> {
    Ok(own_text_all(document, "title", "#content .fn")?
        .iter()
        .map(|t| t.trim())
        .find(|t| !t.is_empty())
        .map(String::from))
}

pub fn parse_authors(document: &Html) -> Result<Vec<String>, LookupError> {
    let sel = selector("authors", "#content div.authors > a")?;
    Ok(document
        .select(&sel)
        .map(full_text)
        .filter(|a| !a.trim().is_empty())
        .collect())
}

fn isbn_rule(document: &Html, _: &ExtractContext<'_>) -> Result<Option<Field>, LookupError> {
    let re = pattern("isbn", r"(\d{13}|\d{10})")?;
    let texts = own_text_all(document, "isbn", "#content .items > div > div:nth-of-type(2)")?;
    Ok(texts
        .iter()
        .find_map(|t| re.captures(t).map(|c| c[1].to_string()))
        .map(Field::Isbn))
}

/// Splits "(Sorozat neve 3.)" into name and index.
pub fn parse_series_label(label: &str) -> Result<Series, LookupError> {
    let label = label.trim().trim_matches(|c| c == '(' || c == ')' || c == '.');
    let (name, index) = label
        .rsplit_once(' ')
        .ok_or_else(|| LookupError::field("series", format!("no index in {label:?}")))?;
    let index: f64 = index
        .trim_end_matches('.')
        .parse()
        .map_err(|_| LookupError::field("series", format!("bad index {index:?}")))?;
    if index.fract() != 0.0 {
        tracing::debug!("Truncating fractional series index {}", index);
    }
    Ok(Series {
        name: name.trim().to_string(),
        index: index.trunc(),
    })
}

fn series_rule(document: &Html, _: &ExtractContext<'_>) -> Result<Option<Field>, LookupError> {
    let sel = selector("series", "#content .fn a")?;
    match document.select(&sel).next() {
        Some(el) => Ok(Some(Field::Series(parse_series_label(&full_text(el))?))),
        None => Ok(None),
    }
}

fn comments_rule(document: &Html, _: &ExtractContext<'_>) -> Result<Option<Field>, LookupError> {
    let mut paragraphs = own_text_all(document, "comments", "#content #full_description.text > p")?;
    if paragraphs.is_empty() {
        paragraphs = own_text_all(document, "comments", "#content .text > p")?;
    }
    let lines: Vec<&str> = paragraphs
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect();
    if lines.is_empty() {
        return Ok(None);
    }
    Ok(Some(Field::Comments(lines.join("\n"))))
}

fn cover_rule(document: &Html, ctx: &ExtractContext<'_>) -> Result<Option<Field>, LookupError> {
    let sel = selector("cover", ".coverbox a")?;
    let urls: Vec<String> = document
        .select(&sel)
        .filter_map(|a| a.value().attr("href"))
        .take(ctx.max_covers)
        .map(|href| format!("{}{}", ctx.base_url, href))
        .collect();
    Ok((!urls.is_empty()).then_some(Field::CoverUrls(urls)))
}

fn scrape_tags(document: &Html) -> Result<Vec<String>, LookupError> {
    let sel = selector("tags", "#tags .hover_link")?;
    Ok(document
        .select(&sel)
        .map(full_text)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect())
}

fn tags_rule(document: &Html, _: &ExtractContext<'_>) -> Result<Option<Field>, LookupError> {
    let tags = scrape_tags(document)?;
    Ok((!tags.is_empty()).then_some(Field::Tags(tags)))
}

pub fn language_code(tag: &str) -> Option<&'static str> {
    let tag = tag.trim().to_lowercase();
    LANGUAGE_TAGS
        .iter()
        .find(|(name, _)| *name == tag)
        .map(|(_, code)| *code)
}

/// Language codes named by `tags`, or the site default when none match.
pub fn languages_from_tags(tags: &[String]) -> Vec<String> {
    let mut langs: Vec<String> = Vec::new();
    for code in tags.iter().filter_map(|t| language_code(t)) {
        if !langs.iter().any(|l| l == code) {
            langs.push(code.to_string());
        }
    }
    if langs.is_empty() {
        langs.push(DEFAULT_LANGUAGE.to_string());
    }
    langs
}

fn languages_rule(document: &Html, _: &ExtractContext<'_>) -> Result<Option<Field>, LookupError> {
    Ok(Some(Field::Languages(languages_from_tags(&scrape_tags(document)?))))
}

fn publisher_rule(document: &Html, _: &ExtractContext<'_>) -> Result<Option<Field>, LookupError> {
    let sel = selector("publisher", "#content .items > div > div:nth-of-type(1) > a")?;
    Ok(document
        .select(&sel)
        .next()
        .map(full_text)
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .map(Field::Publisher))
}

/// Year-only publication date: the given year on today's month and day,
/// midnight UTC. The day is pulled back when the year lacks it (29 Feb).
pub fn pubdate_from_year(year: i32, today: NaiveDate) -> Option<DateTime<Utc>> {
    let date = (0..4).find_map(|back| NaiveDate::from_ymd_opt(year, today.month(), today.day().saturating_sub(back)))?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

fn pubdate_rule(document: &Html, _: &ExtractContext<'_>) -> Result<Option<Field>, LookupError> {
    let re = pattern("pubdate", r"(\d{4})")?;
    let texts = own_text_all(document, "pubdate", "#content .items > div > div:nth-of-type(1)")?;
    let Some(year) = texts.iter().find_map(|t| re.captures(t).map(|c| c[1].to_string())) else {
        return Ok(None);
    };
    let year: i32 = year
        .parse()
        .map_err(|_| LookupError::field("pubdate", format!("bad year {year:?}")))?;
    let date = pubdate_from_year(year, Utc::now().date_naive())
        .ok_or_else(|| LookupError::field("pubdate", format!("year {year} out of range")))?;
    Ok(Some(Field::Pubdate(date)))
}

/// "80%" -> 4.0 on the 0-5 scale.
pub fn parse_rating(raw: &str) -> Result<f64, LookupError> {
    let value: f64 = raw
        .trim()
        .trim_end_matches('%')
        .trim()
        .parse()
        .map_err(|_| LookupError::field("rating", format!("not a percentage: {raw:?}")))?;
    if !value.is_finite() {
        return Err(LookupError::field("rating", format!("not a percentage: {raw:?}")));
    }
    Ok((value * 0.05).round().clamp(0.0, 5.0))
}

fn rating_rule(document: &Html, _: &ExtractContext<'_>) -> Result<Option<Field>, LookupError> {
    let sel = selector("rating", "#content .rating .like_count")?;
    match document.select(&sel).next() {
        Some(el) => Ok(Some(Field::Rating(parse_rating(&full_text(el))?))),
        None => Ok(None),
    }
}

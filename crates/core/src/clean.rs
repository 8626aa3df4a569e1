//! Normalization hook applied to every record before it is published.

use unicode_normalization::UnicodeNormalization;

use crate::lookup::MetadataRecord;

/// Host-supplied cleanup run by each worker on its finished record.
pub trait MetadataCleaner: Send + Sync {
    fn clean(&self, record: &mut MetadataRecord);
}

/// Leaves records untouched.
pub struct NoopCleaner;

impl MetadataCleaner for NoopCleaner {
    fn clean(&self, _record: &mut MetadataRecord) {}
}

/// NFC-normalizes and trims text fields, drops empty and repeated authors/tags.
#[derive(Debug, Default)]
pub struct DefaultCleaner;

fn normalize_str(s: &str) -> String {
    let collapsed = s.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.nfc().collect()
}

fn normalize_list(items: &mut Vec<String>) {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items.drain(..) {
        let item = normalize_str(&item);
        if !item.is_empty() && !out.contains(&item) {
            out.push(item);
        }
    }
    *items = out;
}

fn normalize_opt(field: &mut Option<String>) {
    if let Some(v) = field.take() {
        let v = normalize_str(&v);
        if !v.is_empty() {
            *field = Some(v);
        }
    }
}

impl MetadataCleaner for DefaultCleaner {
    fn clean(&self, record: &mut MetadataRecord) {
        record.title = normalize_str(&record.title);
        normalize_list(&mut record.authors);
        normalize_list(&mut record.tags);
        normalize_opt(&mut record.publisher);
        if let Some(series) = record.series.as_mut() {
            series.name = normalize_str(&series.name);
        }
        // Comments keep their line breaks.
        if let Some(comments) = record.comments.take() {
            let text = comments
                .lines()
                .map(normalize_str)
                .filter(|l| !l.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            if !text.is_empty() {
                record.comments = Some(text);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_cleaner_normalizes() {
        let mut r = MetadataRecord::new(
            "  Nemo\u{a0}kapita\u{301}ny ".into(),
            vec!["Jules Verne".into(), " Jules  Verne".into(), "".into()],
            "nemo".into(),
            0,
        );
        r.tags = vec!["kaland".into(), "kaland ".into()];
        r.publisher = Some("   ".into());
        r.comments = Some(" Egy.\n\n  Ketto. ".into());
        DefaultCleaner.clean(&mut r);
        assert_eq!(r.title, "Nemo kapitány");
        assert_eq!(r.authors, vec!["Jules Verne".to_string()]);
        assert_eq!(r.tags, vec!["kaland".to_string()]);
        assert_eq!(r.publisher, None);
        assert_eq!(r.comments.as_deref(), Some("Egy.\nKetto."));
    }
}

//! ISBN normalization and checksum validation.

/// Strip separators and validate the check digit. Returns the bare ISBN-10
/// or ISBN-13 (uppercase `X` kept for ISBN-10), or `None` when invalid.
pub fn check_isbn(raw: &str) -> Option<String> {
    let isbn: String = raw
        .chars()
        .filter(|c| !matches!(c, '-' | ' ' | '\u{2010}' | '\u{2013}'))
        .map(|c| c.to_ascii_uppercase())
        .collect();
    match isbn.len() {
        10 if valid_isbn10(&isbn) => Some(isbn),
        13 if valid_isbn13(&isbn) => Some(isbn),
        _ => None,
    }
}

fn valid_isbn10(isbn: &str) -> bool {
    let mut sum = 0u32;
    for (i, c) in isbn.chars().enumerate() {
        let digit = match c {
            'X' if i == 9 => 10,
            _ => match c.to_digit(10) {
                Some(d) => d,
                None => return false,
            },
        };
        sum += digit * (10 - i as u32);
    }
    sum % 11 == 0
}

fn valid_isbn13(isbn: &str) -> bool {
    if !(isbn.starts_with("978") || isbn.starts_with("979")) {
        return false;
    }
    let mut sum = 0u32;
    for (i, c) in isbn.chars().enumerate() {
        let Some(d) = c.to_digit(10) else {
            return false;
        };
        sum += if i % 2 == 0 { d } else { d * 3 };
    }
    sum % 10 == 0
}

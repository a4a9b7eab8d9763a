//! Minimal FITS header reader for WCS keywords.
//!
//! A header is a run of 80-byte ASCII cards padded to 2880-byte blocks and
//! terminated by an `END` card. Only `KEY = value / comment` cards are kept.

use std::collections::HashMap;

use crate::error::{Error, Result};

const CARD_LEN: usize = 80;
const KEYWORD_LEN: usize = 8;

/// Keyword → raw value text (comment stripped, quotes removed from strings).
#[derive(Debug, Clone, Default)]
pub struct FitsHeader {
    cards: HashMap<String, String>,
}

impl FitsHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut cards = HashMap::new();
        let mut saw_end = false;

        for raw in bytes.chunks(CARD_LEN) {
            let card = String::from_utf8_lossy(raw);
            let keyword = card.get(..KEYWORD_LEN.min(card.len())).unwrap_or("").trim_end();

            if keyword == "END" {
                saw_end = true;
                break;
            }
            if keyword.is_empty() || card.as_bytes().get(KEYWORD_LEN) != Some(&b'=') {
                continue;
            }
            let value = parse_value(&card[KEYWORD_LEN + 1..]);
            cards.insert(keyword.to_string(), value);
        }

        if !saw_end {
            return Err(Error::InvalidWcs("FITS header has no END card".into()));
        }
        if cards.is_empty() {
            return Err(Error::InvalidWcs("FITS header has no value cards".into()));
        }
        Ok(Self { cards })
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.cards.contains_key(keyword)
    }

    pub fn string(&self, keyword: &str) -> Option<&str> {
        self.cards.get(keyword).map(String::as_str)
    }

    /// Float value; accepts Fortran `D` exponents.
    pub fn float(&self, keyword: &str) -> Option<f64> {
        let raw = self.cards.get(keyword)?;
        raw.replace(['D', 'd'], "E").parse().ok()
    }

    pub fn int(&self, keyword: &str) -> Option<i64> {
        let raw = self.cards.get(keyword)?;
        raw.parse()
            .ok()
            .or_else(|| self.float(keyword).map(|f| f as i64))
    }

    pub fn require_float(&self, keyword: &str) -> Result<f64> {
        self.float(keyword)
            .filter(|v| v.is_finite())
            .ok_or_else(|| Error::InvalidWcs(format!("missing or invalid {keyword}")))
    }
}

/// Strips the trailing `/ comment` and string quotes. A `/` inside a quoted
/// string does not start a comment; `''` is an escaped quote.
fn parse_value(field: &str) -> String {
    let field = field.trim_start();
    if let Some(rest) = field.strip_prefix('\'') {
        let mut out = String::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    out.push('\'');
                    chars.next();
                } else {
                    break;
                }
            } else {
                out.push(c);
            }
        }
        return out.trim_end().to_string();
    }

    match field.find('/') {
        Some(pos) => field[..pos].trim().to_string(),
        None => field.trim().to_string(),
    }
}

#[cfg(test)]
pub(crate) fn build_header(cards: &[(&str, &str)]) -> Vec<u8> {
    let mut text = String::new();
    for (key, value) in cards {
        text.push_str(&format!("{key:<8}= {value:<70}"));
    }
    text.push_str(&format!("{:<80}", "END"));
    while text.len() % 2880 != 0 {
        text.push(' ');
    }
    text.into_bytes()
}

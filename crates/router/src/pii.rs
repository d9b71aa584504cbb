//! Regex screening for personal data that must never leave the process.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

macro_rules! pii_pattern {
    ($name:ident, $regex_str:expr) => {
        static $name: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new($regex_str).ok());
    };
}

pii_pattern!(RE_SSN, r"\b\d{3}-\d{2}-\d{4}\b");

pii_pattern!(
    RE_CREDIT_CARD,
    r"\b(?:4\d{3}|5[1-5]\d{2}|3[47]\d{2}|6(?:011|5\d{2}))[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{3,4}\b"
);

pii_pattern!(
    RE_EMAIL,
    r"[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,}"
);

pii_pattern!(
    RE_PHONE,
    r"(?:^|\s)(?:\+?1[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}(?:\s|$|[.,;])"
);

pii_pattern!(RE_ZIP, r"\b\d{5}(?:-\d{4})?\b");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiKind {
    Ssn,
    CreditCard,
    Email,
    Phone,
    ZipCode,
}

impl PiiKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PiiKind::Ssn => "ssn",
            PiiKind::CreditCard => "credit_card",
            PiiKind::Email => "email",
            PiiKind::Phone => "phone",
            PiiKind::ZipCode => "zip_code",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PiiMatch {
    pub kind: PiiKind,
    pub start: usize,
    pub end: usize,
}

fn patterns() -> [(PiiKind, &'static LazyLock<Option<Regex>>); 5] {
    [
        (PiiKind::Ssn, &RE_SSN),
        (PiiKind::CreditCard, &RE_CREDIT_CARD),
        (PiiKind::Email, &RE_EMAIL),
        (PiiKind::Phone, &RE_PHONE),
        (PiiKind::ZipCode, &RE_ZIP),
    ]
}

/// Stateless detector over a fixed pattern set.
///
/// A pattern that fails to compile is skipped rather than panicking; the
/// remaining patterns still apply.
#[derive(Debug, Clone, Copy, Default)]
pub struct PiiDetector;

impl PiiDetector {
    pub fn new() -> Self {
        Self
    }

    /// All matches in `text`, ordered by start offset.
    pub fn detect(&self, text: &str) -> Vec<PiiMatch> {
        let mut matches = Vec::new();
        for (kind, pattern) in patterns() {
            let Some(re) = pattern.as_ref() else {
                continue;
            };
            for m in re.find_iter(text) {
                matches.push(PiiMatch {
                    kind,
                    start: m.start(),
                    end: m.end(),
                });
            }
        }
        matches.sort_by_key(|m| (m.start, m.end));
        matches
    }

    pub fn contains_pii(&self, text: &str) -> bool {
        patterns()
            .into_iter()
            .filter_map(|(_, pattern)| pattern.as_ref())
            .any(|re| re.is_match(text))
    }

    pub fn any_contains_pii<S: AsRef<str>>(&self, texts: &[S]) -> bool {
        texts.iter().any(|t| self.contains_pii(t.as_ref()))
    }
}

//! # Identifier Schemes
//!
//! The scheme validator consumed by the event loader.
//!
//! The core treats validation as an opaque pass/fail predicate
//! ([`SchemeValidator`]). [`DetectedSchemes`] is the default: it detects the
//! set of schemes a value could belong to and rejects a declared scheme that
//! is not in a non-empty detected set. Values no pattern recognizes are
//! accepted under any scheme.

use crate::ScholinkError;
use regex::Regex;
use std::collections::BTreeSet;

/// Pass/fail predicate over `(value, scheme)`.
///
/// Implementors must be pure; the loader may call them in any order.
pub trait SchemeValidator: Send + Sync {
    /// Whether `value` is acceptable under the (lower-case) `scheme`.
    fn is_valid(&self, value: &str, scheme: &str) -> bool;
}

/// Scheme name → pattern. Order is irrelevant; detection returns a set.
const PATTERNS: &[(&str, &str)] = &[
    (
        "doi",
        r"^(doi:\s*|(?:https?://)?(?:dx\.)?doi\.org/)?(10\.\d+(\.\d+)*/.+)$",
    ),
    (
        "handle",
        r"^(hdl:\s*|(?:https?://)?hdl\.handle\.net/)?([^/.]+(\.[^/.]+)*/.*)$",
    ),
    ("arxiv", r"^(?i:arxiv:)?\d{4}\.\d{4,5}(v\d+)?$"),
    ("arxiv", r"^(?i:arxiv:)?[a-z\-]+(\.[A-Z]{2})?/\d{7}(v\d+)?$"),
    ("url", r"^(?i:https?|ftp)://[^\s/$.?#].[^\s]*$"),
    ("pmid", r"^(?i:pmid:)?\d+$"),
    ("pmcid", r"^(?i:pmc)\d+$"),
    ("ads", r"^(?i:ads:)?\d{4}[A-Za-z]\S{13}[A-Za-z.:]$"),
    ("orcid", r"^(?i:orcid:)?(\d{4}-){3}\d{3}[\dX]$"),
    ("issn", r"^\d{4}-?\d{3}[\dX]$"),
    ("isbn", r"^(?i:isbn:?\s*)?(\d{9}[\dX]|97[89]\d{10})$"),
    ("isbn", r"^(?i:isbn:?\s*)?(97[89]-)?\d{1,5}-\d{1,7}-\d{1,7}-[\dX]$"),
];

/// Default validator: detect, then check membership.
#[derive(Debug, Clone)]
pub struct DetectedSchemes {
    patterns: Vec<(&'static str, Regex)>,
}

impl DetectedSchemes {
    /// Compile the built-in patterns.
    pub fn new() -> Result<Self, ScholinkError> {
        let patterns = PATTERNS
            .iter()
            .map(|&(scheme, pattern)| {
                Regex::new(pattern)
                    .map(|re| (scheme, re))
                    .map_err(|e| ScholinkError::Serialization(format!("{scheme} pattern: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Every scheme whose pattern matches `value`.
    #[must_use]
    pub fn detect(&self, value: &str) -> BTreeSet<&'static str> {
        let value = value.trim();
        self.patterns
            .iter()
            .filter(|(_, re)| re.is_match(value))
            .map(|(scheme, _)| *scheme)
            .collect()
    }
}

impl SchemeValidator for DetectedSchemes {
    fn is_valid(&self, value: &str, scheme: &str) -> bool {
        let detected = self.detect(value);
        detected.is_empty() || detected.contains(scheme)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn schemes() -> DetectedSchemes {
        DetectedSchemes::new().expect("patterns compile")
    }

    #[test]
    fn doi_is_also_a_handle() {
        let detected = schemes().detect("10.1234/zenodo.1234");
        assert!(detected.contains("doi"));
        assert!(detected.contains("handle"));
    }

    #[test]
    fn arxiv_new_and_old_style() {
        let s = schemes();
        assert!(s.detect("1705.01234").contains("arxiv"));
        assert!(s.detect("arXiv:1705.01234v2").contains("arxiv"));
        assert!(s.detect("math.GT/0309136").contains("arxiv"));
    }

    #[test]
    fn declared_scheme_must_match_detection() {
        let s = schemes();
        assert!(s.is_valid("10.1234/a", "doi"));
        assert!(!s.is_valid("10.1234/a", "arxiv"));
        assert!(s.is_valid("https://example.org/x", "url"));
        assert!(!s.is_valid("https://example.org/x", "doi"));
    }

    #[test]
    fn unrecognized_values_pass() {
        let s = schemes();
        assert!(s.detect("A").is_empty());
        assert!(s.is_valid("A", "doi"));
        assert!(s.is_valid("some opaque id", "local"));
    }

    #[test]
    fn numeric_ids_detect_pmid() {
        let s = schemes();
        assert!(s.detect("12345678").contains("pmid"));
        assert!(s.detect("PMC123456").contains("pmcid"));
        assert!(!s.is_valid("12345678", "doi"));
    }

    #[test]
    fn isbn_with_and_without_hyphens() {
        let s = schemes();
        assert!(s.detect("978-3-16-148410-0").contains("isbn"));
        assert!(s.detect("9783161484100").contains("isbn"));
        assert!(s.is_valid("0-306-40615-2", "isbn"));
    }
}

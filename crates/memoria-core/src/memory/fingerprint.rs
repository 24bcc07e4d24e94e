//! Text normalization and dedup fingerprints.
//!
//! Two facts are "identical" when their canonical forms match. The canonical
//! form is hashed by a [`ContentHasher`]; the SHA-256 adapter lives in
//! memoria-infra so this crate stays free of crypto dependencies.

/// Abstraction over content hashing for dedup fingerprints.
pub trait ContentHasher: Send + Sync {
    /// Compute a hex-encoded hash of the given content.
    fn compute_hash(&self, content: &str) -> String;
}

/// Normalized text as stored: trimmed, internal whitespace collapsed.
pub fn normalize_fact_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Form used for exact-duplicate detection.
///
/// Lowercased, whitespace collapsed, trailing sentence punctuation removed.
/// "User likes tea." and "user likes  TEA" share a canonical form.
pub fn canonical_form(text: &str) -> String {
    normalize_fact_text(text)
        .to_lowercase()
        .trim_end_matches(['.', '!', '?', ';', ','])
        .trim_end()
        .to_string()
}

/// Fingerprint of `text` under `hasher`.
pub fn fingerprint(hasher: &dyn ContentHasher, text: &str) -> String {
    hasher.compute_hash(&canonical_form(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::test_support::PlainHasher;

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(
            normalize_fact_text("  User   lives\tin\nBerlin  "),
            "User lives in Berlin"
        );
    }

    #[test]
    fn test_canonical_form() {
        assert_eq!(canonical_form("User likes tea."), "user likes tea");
        assert_eq!(canonical_form("user likes  TEA"), "user likes tea");
        assert_eq!(canonical_form("Really?!"), "really");
        assert_eq!(canonical_form("Budget is $5.5k"), "budget is $5.5k");
    }

    #[test]
    fn test_fingerprint_equal_for_variants() {
        let hasher = PlainHasher;
        assert_eq!(
            fingerprint(&hasher, "My secret PIN is 9876."),
            fingerprint(&hasher, "my secret pin is 9876")
        );
        assert_ne!(
            fingerprint(&hasher, "User's home address is 12 Oak Street"),
            fingerprint(&hasher, "User's work address is 500 Market Street")
        );
    }
}

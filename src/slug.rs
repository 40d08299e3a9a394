//! Heading anchor generation.
//!
//! Anchor generation is pluggable through [`Slugifier`]; the default is the
//! github-style normalization most markdown renderers converge on.

use std::fmt;

/// A normalized heading anchor identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Slug(String);

impl Slug {
    pub fn new(value: impl Into<String>) -> Slug {
        Slug(value.into())
    }

    pub fn value(&self) -> &str {
        &self.0
    }

    pub fn equals(&self, other: &Slug) -> bool {
        self.0 == other.0
    }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub trait Slugifier: Send + Sync {
    fn from_heading(&self, heading_text: &str) -> Slug;
}

/// Lowercase, strip punctuation, collapse whitespace runs to a single `-`.
pub struct GithubSlugifier;

impl Slugifier for GithubSlugifier {
    fn from_heading(&self, heading_text: &str) -> Slug {
        let mut slug = String::with_capacity(heading_text.len());
        let mut pending_dash = false;
        for c in heading_text.trim().to_lowercase().chars() {
            if c.is_whitespace() {
                pending_dash = true;
                continue;
            }
            if c.is_alphanumeric() || c == '_' || c == '-' {
                if pending_dash {
                    slug.push('-');
                    pending_dash = false;
                }
                slug.push(c);
            }
        }
        Slug(slug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test: basic lowercasing and space replacement.
    #[test]
    fn test_basic_heading() {
        let slug = GithubSlugifier.from_heading("Getting Started");
        assert_eq!(slug.value(), "getting-started");
    }

    /// Test: punctuation is stripped, hyphens and underscores survive.
    #[test]
    fn test_punctuation_stripped() {
        let slug = GithubSlugifier.from_heading("What's new in v2.0 (beta)?");
        assert_eq!(slug.value(), "whats-new-in-v20-beta");

        let slug = GithubSlugifier.from_heading("foo_bar-baz");
        assert_eq!(slug.value(), "foo_bar-baz");
    }

    /// Test: whitespace runs collapse to a single dash and edges are trimmed.
    #[test]
    fn test_whitespace_collapsed() {
        let slug = GithubSlugifier.from_heading("  a   b  ");
        assert_eq!(slug.value(), "a-b");
    }

    /// Test: non-ascii letters are kept.
    #[test]
    fn test_unicode_letters_kept() {
        let slug = GithubSlugifier.from_heading("Über uns");
        assert_eq!(slug.value(), "über-uns");
    }
}

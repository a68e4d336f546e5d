//! Organization model
//!
//! The organization lifecycle is owned elsewhere; this service only finds or
//! creates one by name during registration.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use uuid::Uuid;

use super::Timestamps;

/// Organization entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: i64,
    pub uuid: Uuid,
    pub name: String,
    pub slug: String,
    pub user_count: i32,
    #[serde(flatten)]
    pub timestamps: Timestamps,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// New organization creation payload
#[derive(Debug, Clone)]
pub struct NewOrganization {
    pub name: String,
    pub slug: String,
}

impl NewOrganization {
    /// Payload for `name` with a freshly generated unique slug.
    pub fn named(name: &str) -> Self {
        let name = name.trim().to_string();
        let slug = generate_slug(&name);
        Self { name, slug }
    }
}

/// Build a URL slug from an organization name.
///
/// Lower-cases, strips anything but ASCII alphanumerics, whitespace and `-`,
/// collapses whitespace runs to `-`, trims leading/trailing `-` and appends a
/// random 8 hex character suffix.
pub fn generate_slug(name: &str) -> String {
    static DISALLOWED: OnceLock<Regex> = OnceLock::new();
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();

    let disallowed = DISALLOWED
        .get_or_init(|| Regex::new(r"[^a-z0-9\s-]").expect("Failed to compile slug regex"));
    let whitespace =
        WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("Failed to compile whitespace regex"));

    let lowered = name.to_lowercase();
    let stripped = disallowed.replace_all(&lowered, "");
    let hyphenated = whitespace.replace_all(&stripped, "-");
    let base = hyphenated.trim_matches('-');

    let suffix: [u8; 4] = rand::random();
    let suffix: String = suffix.iter().map(|b| format!("{b:02x}")).collect();

    if base.is_empty() {
        suffix
    } else {
        format!("{base}-{suffix}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split_suffix(slug: &str) -> (&str, &str) {
        slug.rsplit_once('-').unwrap()
    }

    #[test]
    fn slug_strips_punctuation_and_hyphenates() {
        let slug = generate_slug("  Acme Corp, Inc.  ");
        let (base, suffix) = split_suffix(&slug);
        assert_eq!(base, "acme-corp-inc");
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn slug_suffix_makes_slugs_unique() {
        assert_ne!(generate_slug("Acme"), generate_slug("Acme"));
    }

    #[test]
    fn slug_of_symbols_only_is_just_suffix() {
        let slug = generate_slug("!!!");
        assert_eq!(slug.len(), 8);
    }

    #[test]
    fn new_organization_trims_name() {
        let org = NewOrganization::named(" Flow Labs ");
        assert_eq!(org.name, "Flow Labs");
        assert!(org.slug.starts_with("flow-labs-"));
    }
}

//! Project identifiers and the forms they were historically written under.
//!
//! Upload code has stored keys under both `abc123` and `proj_abc123`, and a
//! bug in one era produced `proj_proj_abc123`. Normalization produces every
//! form a key may have been written with so discovery and tracker queries
//! can cover all of them.

use serde::Serialize;
use thiserror::Error;

/// Canonical project prefix.
pub const PROJECT_PREFIX: &str = "proj_";

/// Forms shorter than this never take part in substring matching.
pub const MIN_MATCH_LEN: usize = 5;

const MAX_PROJECT_ID_LEN: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProjectIdError {
    #[error("project id is empty")]
    Empty,
    #[error("project id exceeds {MAX_PROJECT_ID_LEN} characters")]
    TooLong,
    #[error("project id `{0}` contains characters outside [A-Za-z0-9_-]")]
    InvalidCharacters(String),
    #[error("project id `{0}` has no content after its prefix")]
    PrefixOnly(String),
}

/// A project id normalized into every form used for key construction and matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectIdentifier {
    /// The trimmed input.
    pub original: String,
    /// `proj_`-prefixed form (the input itself when already prefixed).
    pub with_prefix: String,
    /// The input with a single leading `proj_` removed.
    pub without_prefix: String,
    /// The input with every leading `proj_` removed.
    pub base: String,
    /// Lowercase alphanumerics of `base`; substring matching only.
    pub clean_lower: String,
    /// Whether the input carried the doubled `proj_proj_` prefix.
    pub double_prefixed: bool,
}

/// Which normalized form produced a substring match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormKind {
    WithPrefix,
    WithoutPrefix,
    Base,
    CleanLower,
}

impl FormKind {
    pub fn label(self) -> &'static str {
        match self {
            FormKind::WithPrefix => "contains_with_prefix",
            FormKind::WithoutPrefix => "contains_without_prefix",
            FormKind::Base => "contains_base",
            FormKind::CleanLower => "contains_clean_lower",
        }
    }
}

impl ProjectIdentifier {
    /// Normalize a raw project id.
    pub fn normalize(raw: &str) -> Result<Self, ProjectIdError> {
        let original = raw.trim();
        if original.is_empty() {
            return Err(ProjectIdError::Empty);
        }
        if original.len() > MAX_PROJECT_ID_LEN {
            return Err(ProjectIdError::TooLong);
        }
        if !original
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ProjectIdError::InvalidCharacters(original.to_string()));
        }

        let mut base = original;
        while let Some(rest) = base.strip_prefix(PROJECT_PREFIX) {
            base = rest;
        }
        if base.is_empty() {
            return Err(ProjectIdError::PrefixOnly(original.to_string()));
        }

        let with_prefix = if original.starts_with(PROJECT_PREFIX) {
            original.to_string()
        } else {
            format!("{PROJECT_PREFIX}{original}")
        };
        let without_prefix = original
            .strip_prefix(PROJECT_PREFIX)
            .unwrap_or(original)
            .to_string();
        let clean_lower = base
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();

        Ok(Self {
            original: original.to_string(),
            with_prefix,
            without_prefix,
            base: base.to_string(),
            clean_lower,
            double_prefixed: original.starts_with("proj_proj_"),
        })
    }

    /// Prefixed forms used to render key templates, deduplicated.
    ///
    /// For a doubled id this is both the doubled and the single-prefix form.
    pub fn prefixed_forms(&self) -> Vec<String> {
        let mut forms = vec![self.with_prefix.clone()];
        push_unique(&mut forms, format!("{PROJECT_PREFIX}{}", self.base));
        forms
    }

    /// Unprefixed forms used to render key templates, deduplicated.
    pub fn unprefixed_forms(&self) -> Vec<String> {
        let mut forms = vec![self.without_prefix.clone()];
        push_unique(&mut forms, self.base.clone());
        forms
    }

    /// Every form a tracker row may have been written under.
    pub fn candidate_forms(&self) -> Vec<String> {
        let mut forms = vec![self.original.clone()];
        for form in self.prefixed_forms().into_iter().chain(self.unprefixed_forms()) {
            push_unique(&mut forms, form);
        }
        forms
    }

    /// Forms long enough to be used for substring matching, with their kind.
    pub fn substring_forms(&self) -> Vec<(FormKind, String)> {
        let mut forms: Vec<(FormKind, String)> = Vec::new();
        let all = [
            (FormKind::WithPrefix, &self.with_prefix),
            (FormKind::WithoutPrefix, &self.without_prefix),
            (FormKind::Base, &self.base),
            (FormKind::CleanLower, &self.clean_lower),
        ];
        for (kind, form) in all {
            if form.len() < MIN_MATCH_LEN {
                continue;
            }
            // `clean_lower` is compared against a reduced key, so it only
            // collides with itself.
            let reduced = kind == FormKind::CleanLower;
            if forms
                .iter()
                .any(|(k, existing)| existing == form && (*k == FormKind::CleanLower) == reduced)
            {
                continue;
            }
            forms.push((kind, form.clone()));
        }
        forms
    }

    /// Return the labels of every substring form found in `key`.
    ///
    /// `clean_lower` is compared against the key reduced the same way.
    pub fn substring_matches(&self, key: &str) -> Vec<&'static str> {
        let forms = self.substring_forms();
        if forms.is_empty() {
            return Vec::new();
        }
        let clean_key: String = key
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();

        forms
            .iter()
            .filter(|(kind, form)| match kind {
                FormKind::CleanLower => clean_key.contains(form.as_str()),
                _ => key.contains(form.as_str()),
            })
            .map(|(kind, _)| kind.label())
            .collect()
    }
}

fn push_unique(forms: &mut Vec<String>, form: String) {
    if !forms.contains(&form) {
        forms.push(form);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_is_added_or_kept() {
        let bare = ProjectIdentifier::normalize("abc123").unwrap();
        let prefixed = ProjectIdentifier::normalize("proj_abc123").unwrap();
        assert_eq!(bare.with_prefix, "proj_abc123");
        assert_eq!(prefixed.with_prefix, "proj_abc123");
        assert_eq!(bare.without_prefix, "abc123");
        assert_eq!(prefixed.without_prefix, "abc123");
        assert!(!prefixed.double_prefixed);
    }

    #[test]
    fn doubled_prefix_yields_deduplicated_forms() {
        let id = ProjectIdentifier::normalize("proj_proj_abc123").unwrap();
        assert!(id.double_prefixed);
        assert_eq!(id.base, "abc123");

        let forms = id.candidate_forms();
        assert!(forms.contains(&"proj_abc123".to_string()));
        assert!(forms.contains(&"abc123".to_string()));
        assert!(forms.contains(&"proj_proj_abc123".to_string()));
        assert_eq!(
            id.prefixed_forms(),
            vec!["proj_proj_abc123".to_string(), "proj_abc123".to_string()]
        );
    }

    #[test]
    fn clean_lower_strips_punctuation_and_case() {
        let id = ProjectIdentifier::normalize("proj_AbC-12_3").unwrap();
        assert_eq!(id.clean_lower, "abc123");
    }

    #[test]
    fn rejects_empty_and_malformed_ids() {
        assert_eq!(ProjectIdentifier::normalize("   "), Err(ProjectIdError::Empty));
        assert!(matches!(
            ProjectIdentifier::normalize("abc/../etc"),
            Err(ProjectIdError::InvalidCharacters(_))
        ));
        assert!(matches!(
            ProjectIdentifier::normalize("proj_"),
            Err(ProjectIdError::PrefixOnly(_))
        ));
        assert_eq!(
            ProjectIdentifier::normalize(&"a".repeat(129)),
            Err(ProjectIdError::TooLong)
        );
    }

    #[test]
    fn short_forms_are_excluded_from_substring_matching() {
        let id = ProjectIdentifier::normalize("abcd").unwrap();
        let forms = id.substring_forms();
        assert!(forms.iter().all(|(_, form)| form.len() >= MIN_MATCH_LEN));
        assert!(forms.iter().all(|(_, form)| form != "abcd"));

        assert!(id.substring_matches("audio/abcd_track.mp3").is_empty());
        assert_eq!(
            id.substring_matches("proj_abcd_scene1.png"),
            vec!["contains_with_prefix"]
        );
    }

    #[test]
    fn clean_lower_matches_reformatted_keys() {
        let id = ProjectIdentifier::normalize("proj_Abc-12345").unwrap();
        let labels = id.substring_matches("exports/ABC12345/final.mp4");
        assert_eq!(labels, vec!["contains_clean_lower"]);
    }
}

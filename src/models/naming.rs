//! Historical key naming conventions and the prefix templates built from them.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

use crate::models::project::{MIN_MATCH_LEN, ProjectIdentifier};

const WITH_PREFIX: &str = "{with_prefix}";
const WITHOUT_PREFIX: &str = "{without_prefix}";
/// Matches exactly one path segment; expanded by a delimiter listing.
pub const SEGMENT_WILDCARD: &str = "{*}";

/// A layout object keys have been written under at some point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingConvention {
    /// `proj_abc123_scene1.mp3`
    FlatPrefixed,
    /// `users/{user}/proj_abc123/...` or `projects/proj_abc123/...`
    HierarchicalByUser,
    /// `audio/proj_abc123/...`, `images/proj_abc123/...`
    ContentTypeRooted,
    /// `proj_proj_abc123_...`
    LegacyDoublePrefixed,
}

impl NamingConvention {
    pub fn as_str(self) -> &'static str {
        match self {
            NamingConvention::FlatPrefixed => "flat_prefixed",
            NamingConvention::HierarchicalByUser => "hierarchical_by_user",
            NamingConvention::ContentTypeRooted => "content_type_rooted",
            NamingConvention::LegacyDoublePrefixed => "legacy_double_prefixed",
        }
    }
}

impl fmt::Display for NamingConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("unknown naming convention `{0}`")]
    UnknownConvention(String),
    #[error("pattern `{0}` must be written as <convention>=<template>")]
    Malformed(String),
    #[error("template `{0}` contains no project placeholder")]
    MissingPlaceholder(String),
    #[error("template `{0}` uses `{{*}}` more than once")]
    MultipleWildcards(String),
}

impl FromStr for NamingConvention {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "flat_prefixed" => Ok(NamingConvention::FlatPrefixed),
            "hierarchical_by_user" => Ok(NamingConvention::HierarchicalByUser),
            "content_type_rooted" => Ok(NamingConvention::ContentTypeRooted),
            "legacy_double_prefixed" => Ok(NamingConvention::LegacyDoublePrefixed),
            other => Err(PatternError::UnknownConvention(other.to_string())),
        }
    }
}

/// A key prefix template tagged with the convention it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixPattern {
    pub convention: NamingConvention,
    pub template: String,
}

/// A template rendered for one identifier form.
///
/// When `wildcard_root` is set the prefix still contains `{*}` and must be
/// expanded against the common prefixes found under the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrefix {
    pub convention: NamingConvention,
    pub prefix: String,
    pub wildcard_root: Option<String>,
}

impl RenderedPrefix {
    /// Substitute a concrete segment (e.g. `users/u1/`) for the wildcard part.
    pub fn expand(&self, segment_prefix: &str) -> Option<String> {
        let root = self.wildcard_root.as_deref()?;
        let rest = self.prefix.strip_prefix(root)?;
        let rest = rest.strip_prefix(SEGMENT_WILDCARD)?;
        let rest = rest.strip_prefix('/').unwrap_or(rest);
        let segment = segment_prefix.trim_end_matches('/');
        Some(format!("{segment}/{rest}"))
    }

    /// Provenance label recorded on every object found through this prefix.
    pub fn label(&self, concrete_prefix: &str) -> String {
        format!("{}:{}", self.convention, concrete_prefix)
    }
}

impl PrefixPattern {
    pub fn new(convention: NamingConvention, template: impl Into<String>) -> Result<Self, PatternError> {
        let template = template.into();
        if !template.contains(WITH_PREFIX) && !template.contains(WITHOUT_PREFIX) {
            return Err(PatternError::MissingPlaceholder(template));
        }
        if template.matches(SEGMENT_WILDCARD).count() > 1 {
            return Err(PatternError::MultipleWildcards(template));
        }
        Ok(Self {
            convention,
            template,
        })
    }

    /// Parse `convention=template`.
    pub fn parse(entry: &str) -> Result<Self, PatternError> {
        let (convention, template) = entry
            .split_once('=')
            .ok_or_else(|| PatternError::Malformed(entry.to_string()))?;
        let template = template.trim();
        if template.is_empty() {
            return Err(PatternError::Malformed(entry.to_string()));
        }
        Self::new(convention.parse()?, template)
    }

    /// Parse a `;`-separated list of patterns.
    pub fn parse_list(list: &str) -> Result<Vec<Self>, PatternError> {
        list.split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Self::parse)
            .collect()
    }

    /// Render the template for every identifier variant it applies to.
    pub fn render(&self, project: &ProjectIdentifier) -> Vec<RenderedPrefix> {
        let mut rendered: Vec<RenderedPrefix> = Vec::new();
        let mut push = |prefix: String| {
            if rendered.iter().any(|r| r.prefix == prefix) {
                return;
            }
            let wildcard_root = prefix
                .find(SEGMENT_WILDCARD)
                .map(|idx| prefix[..idx].to_string());
            rendered.push(RenderedPrefix {
                convention: self.convention,
                prefix,
                wildcard_root,
            });
        };

        if self.template.contains(WITHOUT_PREFIX) {
            for bare in project.unprefixed_forms() {
                if bare.len() < MIN_MATCH_LEN {
                    continue;
                }
                for prefixed in project.prefixed_forms() {
                    push(
                        self.template
                            .replace(WITHOUT_PREFIX, &bare)
                            .replace(WITH_PREFIX, &prefixed),
                    );
                }
            }
        } else {
            for prefixed in project.prefixed_forms() {
                push(self.template.replace(WITH_PREFIX, &prefixed));
            }
        }

        rendered
    }
}

impl fmt::Display for PrefixPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.convention, self.template)
    }
}

/// The patterns used when configuration does not override them.
///
/// Identifiers may contain `_`, so the flat `{with_prefix}_` prefix for
/// `abc12345` also lists `proj_abc12345_v2_*` keys owned by `abc12345_v2`.
/// Deployments that mint ids sharing a prefix should override the flat
/// pattern.
pub fn default_patterns() -> Vec<PrefixPattern> {
    [
        (NamingConvention::FlatPrefixed, "{with_prefix}_"),
        (NamingConvention::HierarchicalByUser, "users/{*}/{with_prefix}/"),
        (NamingConvention::HierarchicalByUser, "projects/{with_prefix}/"),
        (NamingConvention::ContentTypeRooted, "audio/{with_prefix}/"),
        (NamingConvention::ContentTypeRooted, "images/{with_prefix}/"),
        (NamingConvention::ContentTypeRooted, "videos/{with_prefix}/"),
        (NamingConvention::LegacyDoublePrefixed, "proj_{with_prefix}_"),
    ]
    .into_iter()
    .map(|(convention, template)| PrefixPattern {
        convention,
        template: template.to_string(),
    })
    .collect()
}

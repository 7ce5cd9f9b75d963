//! Core types shared by sources, caches, and the federation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Page size applied when a caller leaves `per_page` unset.
pub const DEFAULT_PER_PAGE: u32 = 20;

/// Identity of a skill provider.
///
/// An opaque tag used as a map key throughout the federation. Well-known
/// providers have associated constants; anything else can be built with
/// [`SourceType::new`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceType(Cow<'static, str>);

impl SourceType {
    /// The local skill store. Never cached and never rate limited by default.
    pub const LOCAL: SourceType = SourceType(Cow::Borrowed("local"));
    /// GitHub code search.
    pub const GITHUB: SourceType = SourceType(Cow::Borrowed("github"));
    /// GitLab project search.
    pub const GITLAB: SourceType = SourceType(Cow::Borrowed("gitlab"));

    /// Build a source tag from an arbitrary provider name.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// The tag as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the local store, whose results must always be fresh.
    pub fn is_local(&self) -> bool {
        *self == Self::LOCAL
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for SourceType {
    fn from(name: &'static str) -> Self {
        Self::new(name)
    }
}

/// A skill document's metadata and, once fetched, its body.
///
/// `id` is only unique within `source`. Two skills are the same entity iff
/// both `source` and `id` match; see [`ExternalSkill::is_same_entity`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalSkill {
    /// Provider-scoped identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Short description.
    pub description: String,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Document body. Empty until fetched with `get_content`.
    pub content: String,
    /// Provider that owns this skill.
    pub source: SourceType,
    /// Canonical URL of the skill at its source.
    pub source_url: String,
    /// Popularity score, if the provider has one.
    pub stars: Option<u32>,
    /// URL the provider uses to fetch `content` lazily.
    pub content_url: Option<String>,
    /// Version string, if published.
    pub version: Option<String>,
    /// Last modification time reported by the provider.
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for SourceType {
    fn default() -> Self {
        Self::LOCAL
    }
}

impl ExternalSkill {
    /// The `(source, id)` pair identifying this skill across the federation.
    pub fn key(&self) -> (&SourceType, &str) {
        (&self.source, &self.id)
    }

    /// Whether `other` refers to the same skill entity.
    pub fn is_same_entity(&self, other: &ExternalSkill) -> bool {
        self.key() == other.key()
    }

    /// Whether the document body has been populated.
    pub fn has_content(&self) -> bool {
        !self.content.is_empty()
    }
}

/// Parameters for a skill search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    /// Free-text query.
    pub query: String,
    /// Only return skills carrying all of these tags.
    pub tags: Vec<String>,
    /// 1-based page number. `0` means "first page".
    pub page: u32,
    /// Page size. `0` means [`DEFAULT_PER_PAGE`].
    pub per_page: u32,
}

impl SearchOptions {
    /// Options for `query` with default paging.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// Set the page number.
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    /// Set the page size.
    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page;
        self
    }

    /// Set the tag filter.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Copy with unset paging replaced by defaults (page 1, [`DEFAULT_PER_PAGE`]).
    pub fn normalized(&self) -> Self {
        let mut options = self.clone();
        if options.page == 0 {
            options.page = 1;
        }
        if options.per_page == 0 {
            options.per_page = DEFAULT_PER_PAGE;
        }
        options
    }
}

/// One provider's answer to a search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Skills on the requested page.
    pub skills: Vec<ExternalSkill>,
    /// Total matches as reported by the provider. May exceed `skills.len()`.
    pub total: usize,
    /// Page echoed back.
    pub page: u32,
    /// Page size echoed back.
    pub per_page: u32,
    /// Time spent in the provider call.
    pub elapsed: Duration,
    /// Provider that produced this result.
    pub source: SourceType,
}

impl SearchResult {
    /// An empty, zero-total result for `source`.
    ///
    /// Providers return this for soft upstream failures such as rejected
    /// credentials or upstream throttling.
    pub fn empty(source: SourceType, options: &SearchOptions) -> Self {
        Self {
            skills: Vec::new(),
            total: 0,
            page: options.page,
            per_page: options.per_page,
            elapsed: Duration::ZERO,
            source,
        }
    }
}

/// The federation's aggregate answer across several sources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FederatedResult {
    /// Merged skills, local first, then by stars descending, then by name.
    pub skills: Vec<ExternalSkill>,
    /// Sum of every contributing source's self-reported total.
    ///
    /// This counts what is available upstream, not what was returned; use
    /// `skills.len()` for the latter.
    pub total: usize,
    /// Each contributing source's own total.
    pub by_source: HashMap<SourceType, usize>,
    /// Error message for each source that failed. Absent for successes.
    pub errors: HashMap<SourceType, String>,
    /// Time each source took.
    pub source_elapsed: HashMap<SourceType, Duration>,
    /// Wall-clock time for the whole operation.
    pub elapsed: Duration,
}

impl FederatedResult {
    /// Sources that failed, sorted by tag.
    pub fn failed_sources(&self) -> Vec<SourceType> {
        let mut failed: Vec<SourceType> = self.errors.keys().cloned().collect();
        failed.sort();
        failed
    }

    /// Whether at least one source failed.
    pub fn is_partial(&self) -> bool {
        !self.errors.is_empty()
    }
}

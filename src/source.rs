//! Trait definition for pluggable skill providers.
//!
//! The local store adapter and every external search backend implement
//! [`SkillSource`]. The federation holds them as `Arc<dyn SkillSource>`
//! keyed by [`SkillSource::name`].

use async_trait::async_trait;

use crate::context::Context;
use crate::error::Result;
use crate::types::{ExternalSkill, SearchOptions, SearchResult, SourceType};

/// A pluggable skill provider.
///
/// Implementations must follow these rules so one misbehaving provider never
/// poisons a federated answer:
///
/// - Soft upstream failures (rejected credentials, upstream throttling) are
///   absorbed and reported as [`SearchResult::empty`], not as errors.
/// - Transport and decoding failures are returned as errors.
/// - `get_skill` returns `Ok(None)` for unknown or malformed ids. It never panics.
/// - `get_content` is idempotent: a skill whose `content` is already set is
///   returned unchanged without an upstream call.
///
/// All implementations must be `Send + Sync` for concurrent fan-out.
#[async_trait]
pub trait SkillSource: Send + Sync {
    /// The provider's identity. Constant for the lifetime of the instance.
    fn name(&self) -> SourceType;

    /// Whether the provider can currently serve requests.
    ///
    /// May change over time, e.g. `false` while a backing store is missing.
    fn enabled(&self) -> bool {
        true
    }

    /// Search this provider.
    async fn search(&self, ctx: &Context, options: &SearchOptions) -> Result<SearchResult>;

    /// Look up one skill by its provider-scoped id.
    async fn get_skill(&self, ctx: &Context, id: &str) -> Result<Option<ExternalSkill>>;

    /// Fetch the document body for `skill`.
    async fn get_content(&self, ctx: &Context, skill: &ExternalSkill) -> Result<String>;
}

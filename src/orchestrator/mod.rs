//! Federated orchestrator: registration, fan-out search, lookups.
//!
//! [`Federation`] owns the registered sources, one search cache, one skill
//! cache, the per-source rate limiter, and the circuit breaker. Every call
//! to a source goes through the same pipeline:
//!
//! 1. cache lookup (the local source is never stored, so it always misses)
//! 2. circuit check, then rate-limit wait under the caller's [`Context`]
//! 3. provider call under the caller's [`Context`]
//! 4. cache store for non-local sources
//!
//! No lock or permit shared between calls is held across steps 2 and 3, so
//! a slow source never blocks another source's progress.

pub mod merge;
mod search;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::cache::{SearchCache, SkillCache};
use crate::config::FederationConfig;
use crate::context::Context;
use crate::error::{FederationError, Result};
use crate::health::{CircuitState, SourceHealth};
use crate::rate_limit::{RateLimit, RateLimiter};
use crate::source::SkillSource;
use crate::types::{ExternalSkill, FederatedResult, SearchOptions, SearchResult, SourceType};

/// Aggregates skill search across registered sources.
///
/// Cloning is cheap and every clone shares the same sources, caches, and
/// rate budgets.
#[derive(Clone)]
pub struct Federation {
    inner: Arc<Inner>,
}

struct Inner {
    sources: RwLock<HashMap<SourceType, Arc<dyn SkillSource>>>,
    search_cache: SearchCache,
    skill_cache: SkillCache,
    limiter: RateLimiter,
    health: SourceHealth,
    /// Cap on concurrently running units within one fan-out call.
    max_concurrent_sources: usize,
}

impl Federation {
    /// Create a federation from a validated configuration.
    ///
    /// Must be called inside a tokio runtime for the cache sweeps to run.
    ///
    /// # Errors
    ///
    /// Returns [`FederationError::Config`] if `config` is invalid.
    pub fn new(config: FederationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(&config))
    }

    /// Create a federation with [`FederationConfig::default`].
    pub fn with_defaults() -> Self {
        Self::build(&FederationConfig::default())
    }

    fn build(config: &FederationConfig) -> Self {
        let cache = &config.cache;
        let inner = Inner {
            sources: RwLock::new(HashMap::new()),
            search_cache: SearchCache::new(
                cache.search_ttl(),
                cache.sweep_interval(),
                cache.max_entries,
            ),
            skill_cache: SkillCache::new(
                cache.skill_ttl(),
                cache.sweep_interval(),
                cache.max_entries,
            ),
            limiter: RateLimiter::new(config.rate_limits.clone()),
            health: SourceHealth::new(&config.circuit_breaker),
            max_concurrent_sources: config.max_concurrent_sources,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Register `source` under its own name, replacing any previous one.
    pub fn register_source(&self, source: Arc<dyn SkillSource>) {
        let name = source.name();
        let replaced = self
            .inner
            .sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), source)
            .is_some();
        tracing::info!(source = %name, replaced, "skill source registered");
    }

    /// Every registered source, sorted.
    pub fn registered_sources(&self) -> Vec<SourceType> {
        let mut names: Vec<SourceType> = self.snapshot().into_iter().map(|(n, _)| n).collect();
        names.sort();
        names
    }

    /// Registered sources currently reporting `enabled() == true`, sorted.
    pub fn enabled_sources(&self) -> Vec<SourceType> {
        let mut names: Vec<SourceType> = self
            .snapshot()
            .into_iter()
            .filter(|(_, source)| source.enabled())
            .map(|(name, _)| name)
            .collect();
        names.sort();
        names
    }

    /// Search every enabled source.
    ///
    /// Never fails; see [`search_sources`](Self::search_sources).
    pub async fn search(&self, ctx: &Context, options: &SearchOptions) -> FederatedResult {
        self.search_sources(ctx, options, &[]).await
    }

    /// Search exactly one source through the cache and rate limiter.
    ///
    /// Returns an empty result if the source is unregistered or disabled.
    ///
    /// # Errors
    ///
    /// Returns the source's error, [`FederationError::SourceUnavailable`]
    /// while its circuit is open, or the context's cancellation error.
    pub async fn search_source(
        &self,
        ctx: &Context,
        source: &SourceType,
        options: &SearchOptions,
    ) -> Result<SearchResult> {
        let options = options.normalized();
        let Some(provider) = self.active_source(source) else {
            tracing::debug!(source = %source, "search on unavailable source");
            return Ok(SearchResult::empty(source.clone(), &options));
        };
        self.inner
            .search_unit(ctx, provider.as_ref(), &options)
            .await
    }

    /// Look up one skill by its provider-scoped id.
    ///
    /// Returns `Ok(None)` if the source is unregistered, disabled, or does
    /// not know the id. Skills from non-local sources are cached.
    ///
    /// # Errors
    ///
    /// Same as [`search_source`](Self::search_source).
    pub async fn get_skill(
        &self,
        ctx: &Context,
        source: &SourceType,
        id: &str,
    ) -> Result<Option<ExternalSkill>> {
        let Some(provider) = self.active_source(source) else {
            tracing::debug!(source = %source, "skill lookup on unavailable source");
            return Ok(None);
        };
        if let Some(hit) = self.inner.skill_cache.get(source, id).await {
            tracing::debug!(source = %source, "skill cache hit");
            return Ok(Some(hit));
        }

        self.inner.admit(ctx, source).await?;
        let outcome = ctx.run(provider.get_skill(ctx, id)).await.and_then(|r| r);
        let skill = self.inner.settle(source, outcome)?;

        if !source.is_local() {
            if let Some(skill) = &skill {
                self.inner.skill_cache.set(source, id, skill.clone()).await;
            }
        }
        Ok(skill)
    }

    /// Fetch the document body of `skill`.
    ///
    /// Returns the existing content without a provider call when it is
    /// already populated, and an empty string if the skill's source is
    /// unregistered or disabled. `skill` is caller-supplied, so neither it nor
    /// the fetched body is stored in the skill cache.
    ///
    /// # Errors
    ///
    /// Same as [`search_source`](Self::search_source).
    pub async fn get_content(&self, ctx: &Context, skill: &ExternalSkill) -> Result<String> {
        if skill.has_content() {
            return Ok(skill.content.clone());
        }
        let source = &skill.source;
        let Some(provider) = self.active_source(source) else {
            tracing::debug!(source = %source, "content fetch on unavailable source");
            return Ok(String::new());
        };

        self.inner.admit(ctx, source).await?;
        let outcome = ctx
            .run(provider.get_content(ctx, skill))
            .await
            .and_then(|r| r);
        self.inner.settle(source, outcome)
    }

    /// Empty both caches.
    pub fn clear_cache(&self) {
        self.inner.search_cache.clear();
        self.inner.skill_cache.clear();
        tracing::info!("federation caches cleared");
    }

    /// Replace the rate policy for `source`, discarding its current bucket.
    pub fn set_rate_limit(&self, source: SourceType, limit: RateLimit) {
        self.inner.limiter.set_limit(source, limit);
    }

    /// `(source, circuit state, consecutive failures)` for every source that
    /// has been called.
    pub fn health_report(&self) -> Vec<(SourceType, CircuitState, u32)> {
        self.inner.health.report()
    }

    /// Stop the caches' background sweeps. The federation stays usable.
    pub fn shutdown(&self) {
        self.inner.search_cache.shutdown();
        self.inner.skill_cache.shutdown();
    }

    fn snapshot(&self) -> Vec<(SourceType, Arc<dyn SkillSource>)> {
        self.inner
            .sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, source)| (name.clone(), Arc::clone(source)))
            .collect()
    }

    /// The registered source for `name`, if it is currently enabled.
    fn active_source(&self, name: &SourceType) -> Option<Arc<dyn SkillSource>> {
        let source = self
            .inner
            .sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(Arc::clone)?;
        source.enabled().then_some(source)
    }
}

impl std::fmt::Debug for Federation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Federation")
            .field("sources", &self.registered_sources())
            .finish_non_exhaustive()
    }
}

impl Inner {
    /// Circuit check followed by the rate-limit wait.
    async fn admit(&self, ctx: &Context, source: &SourceType) -> Result<()> {
        if !self.health.should_attempt(source) {
            return Err(FederationError::SourceUnavailable(source.clone()));
        }
        if let Err(err) = self.limiter.wait(ctx, source).await {
            tracing::warn!(source = %source, error = %err, "rate limit wait abandoned");
            self.health.record_abandoned(source);
            return Err(err);
        }
        Ok(())
    }

    /// Feed a provider outcome into the circuit breaker and pass it through.
    fn settle<T>(&self, source: &SourceType, outcome: Result<T>) -> Result<T> {
        match &outcome {
            Ok(_) => self.health.record_success(source),
            Err(err) if err.is_cancellation() => self.health.record_abandoned(source),
            Err(_) => self.health.record_failure(source),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct StubSource {
        name: SourceType,
        enabled: AtomicBool,
        lookups: AtomicUsize,
        fetches: AtomicUsize,
    }

    impl StubSource {
        fn new(name: SourceType) -> Arc<Self> {
            Arc::new(Self {
                name,
                enabled: AtomicBool::new(true),
                lookups: AtomicUsize::new(0),
                fetches: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SkillSource for StubSource {
        fn name(&self) -> SourceType {
            self.name.clone()
        }

        fn enabled(&self) -> bool {
            self.enabled.load(Ordering::SeqCst)
        }

        async fn search(&self, _ctx: &Context, options: &SearchOptions) -> Result<SearchResult> {
            Ok(SearchResult::empty(self.name(), options))
        }

        async fn get_skill(&self, _ctx: &Context, id: &str) -> Result<Option<ExternalSkill>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if id == "missing" {
                return Ok(None);
            }
            Ok(Some(ExternalSkill {
                id: id.into(),
                name: id.into(),
                source: self.name(),
                ..Default::default()
            }))
        }

        async fn get_content(&self, _ctx: &Context, skill: &ExternalSkill) -> Result<String> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(format!("body of {}", skill.id))
        }
    }

    #[tokio::test]
    async fn new_rejects_invalid_config() {
        let config = FederationConfig {
            max_concurrent_sources: 0,
            ..Default::default()
        };
        assert!(Federation::new(config).is_err());
    }

    #[tokio::test]
    async fn register_replaces_by_name() {
        let federation = Federation::with_defaults();
        federation.register_source(StubSource::new(SourceType::GITHUB));
        federation.register_source(StubSource::new(SourceType::GITHUB));
        federation.register_source(StubSource::new(SourceType::LOCAL));
        assert_eq!(
            federation.registered_sources(),
            vec![SourceType::GITHUB, SourceType::LOCAL]
        );
    }

    #[tokio::test]
    async fn enabled_sources_tracks_dynamic_availability() {
        let federation = Federation::with_defaults();
        let github = StubSource::new(SourceType::GITHUB);
        federation.register_source(github.clone());
        assert_eq!(federation.enabled_sources(), vec![SourceType::GITHUB]);
        github.enabled.store(false, Ordering::SeqCst);
        assert!(federation.enabled_sources().is_empty());
    }

    #[tokio::test]
    async fn external_skill_lookups_are_cached() {
        let federation = Federation::with_defaults();
        let github = StubSource::new(SourceType::GITHUB);
        federation.register_source(github.clone());
        let ctx = Context::new();

        let first = federation.get_skill(&ctx, &SourceType::GITHUB, "a/b").await.unwrap();
        let second = federation.get_skill(&ctx, &SourceType::GITHUB, "a/b").await.unwrap();
        assert_eq!(first.unwrap().id, "a/b");
        assert_eq!(second.unwrap().id, "a/b");
        assert_eq!(github.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn local_skill_lookups_are_never_cached() {
        let federation = Federation::with_defaults();
        let local = StubSource::new(SourceType::LOCAL);
        federation.register_source(local.clone());
        let ctx = Context::new();

        federation.get_skill(&ctx, &SourceType::LOCAL, "x").await.unwrap();
        federation.get_skill(&ctx, &SourceType::LOCAL, "x").await.unwrap();
        assert_eq!(local.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_skill_is_absent_and_not_cached() {
        let federation = Federation::with_defaults();
        let github = StubSource::new(SourceType::GITHUB);
        federation.register_source(github.clone());
        let ctx = Context::new();

        for _ in 0..2 {
            let found = federation
                .get_skill(&ctx, &SourceType::GITHUB, "missing")
                .await
                .unwrap();
            assert!(found.is_none());
        }
        assert_eq!(github.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unregistered_or_disabled_sources_yield_nothing() {
        let federation = Federation::with_defaults();
        let gitlab = StubSource::new(SourceType::GITLAB);
        gitlab.enabled.store(false, Ordering::SeqCst);
        federation.register_source(gitlab.clone());
        let ctx = Context::new();

        assert!(
            federation
                .get_skill(&ctx, &SourceType::GITHUB, "x")
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            federation
                .get_skill(&ctx, &SourceType::GITLAB, "x")
                .await
                .unwrap()
                .is_none()
        );
        let orphan = ExternalSkill {
            id: "x".into(),
            source: SourceType::GITLAB,
            ..Default::default()
        };
        assert_eq!(federation.get_content(&ctx, &orphan).await.unwrap(), "");
        assert_eq!(gitlab.lookups.load(Ordering::SeqCst), 0);
        assert_eq!(gitlab.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn populated_content_short_circuits() {
        let federation = Federation::with_defaults();
        let github = StubSource::new(SourceType::GITHUB);
        federation.register_source(github.clone());
        let skill = ExternalSkill {
            id: "x".into(),
            content: "already here".into(),
            source: SourceType::GITHUB,
            ..Default::default()
        };
        let content = federation.get_content(&Context::new(), &skill).await.unwrap();
        assert_eq!(content, "already here");
        assert_eq!(github.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn content_fetch_leaves_cached_skill_untouched() {
        let federation = Federation::with_defaults();
        let github = StubSource::new(SourceType::GITHUB);
        federation.register_source(github.clone());
        let ctx = Context::new();

        let skill = federation
            .get_skill(&ctx, &SourceType::GITHUB, "a/b")
            .await
            .unwrap()
            .unwrap();
        let content = federation.get_content(&ctx, &skill).await.unwrap();
        assert_eq!(content, "body of a/b");

        let cached = federation
            .get_skill(&ctx, &SourceType::GITHUB, "a/b")
            .await
            .unwrap()
            .unwrap();
        assert!(cached.content.is_empty());
        assert_eq!(github.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn caller_supplied_skill_never_reaches_skill_cache() {
        let federation = Federation::with_defaults();
        let github = StubSource::new(SourceType::GITHUB);
        federation.register_source(github.clone());
        let ctx = Context::new();

        let forged = ExternalSkill {
            id: "x".into(),
            name: "forged".into(),
            source: SourceType::GITHUB,
            ..Default::default()
        };
        federation.get_content(&ctx, &forged).await.unwrap();

        let found = federation
            .get_skill(&ctx, &SourceType::GITHUB, "x")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.name, "x");
        assert_eq!(github.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn clear_cache_forces_fresh_lookups() {
        let federation = Federation::with_defaults();
        let github = StubSource::new(SourceType::GITHUB);
        federation.register_source(github.clone());
        let ctx = Context::new();

        federation.get_skill(&ctx, &SourceType::GITHUB, "x").await.unwrap();
        federation.clear_cache();
        federation.get_skill(&ctx, &SourceType::GITHUB, "x").await.unwrap();
        assert_eq!(github.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn search_source_on_unknown_source_is_empty() {
        let federation = Federation::with_defaults();
        let result = federation
            .search_source(&Context::new(), &SourceType::GITHUB, &SearchOptions::new("x"))
            .await
            .unwrap();
        assert!(result.skills.is_empty());
        assert_eq!(result.page, 1);
        assert_eq!(result.per_page, 20);
        assert_eq!(result.source, SourceType::GITHUB);
    }

    #[tokio::test]
    async fn debug_lists_sources() {
        let federation = Federation::with_defaults();
        federation.register_source(StubSource::new(SourceType::LOCAL));
        let rendered = format!("{federation:?}");
        assert!(rendered.contains("local"));
    }
}

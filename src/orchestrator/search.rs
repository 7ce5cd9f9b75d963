//! Concurrent fan-out search across sources.
//!
//! One tokio task per target source runs the cache → circuit → rate limit →
//! call → cache pipeline. Every task is joined independently; a failed or
//! cancelled source only loses its own contribution. The concatenated skills
//! are then sorted into presentation order by [`merge::sort_skills`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;

use crate::context::Context;
use crate::error::{FederationError, Result};
use crate::source::SkillSource;
use crate::types::{FederatedResult, SearchOptions, SearchResult, SourceType};

use super::{Federation, Inner, merge};

impl Federation {
    /// Search the enabled sources named in `filter`, or all enabled sources
    /// when `filter` is empty.
    ///
    /// # Pipeline
    ///
    /// 1. Normalize paging (page 1, 20 per page when unset)
    /// 2. Resolve targets: registered ∧ enabled, intersected with `filter`
    /// 3. Spawn one task per target and join them all; at most
    ///    `max_concurrent_sources` of this call's tasks run at once
    /// 4. Sum totals, record per-source counts, timings, and errors
    /// 5. Sort: local first, then stars descending, then name ascending
    ///
    /// Never fails. A source that errors, has an open circuit, or runs out of
    /// time waiting for its rate budget appears in `errors` and contributes
    /// no skills. Dropping the returned future cancels every unit still running.
    pub async fn search_sources(
        &self,
        ctx: &Context,
        options: &SearchOptions,
        filter: &[SourceType],
    ) -> FederatedResult {
        let started = Instant::now();
        let options = options.normalized();
        let targets = self.targets(filter);

        let mut federated = FederatedResult::default();
        if targets.is_empty() {
            tracing::debug!("no enabled sources to search");
            federated.elapsed = started.elapsed();
            return federated;
        }
        tracing::trace!(
            query = %options.query,
            page = options.page,
            sources = targets.len(),
            "federated search"
        );

        let scope = ctx.child();
        let _cancel_on_drop = scope.token().clone().drop_guard();
        let permits = Arc::new(Semaphore::new(self.inner.max_concurrent_sources));

        let (names, handles): (Vec<SourceType>, Vec<_>) = targets
            .into_iter()
            .map(|source| {
                let name = source.name();
                let inner = Arc::clone(&self.inner);
                let ctx = scope.clone();
                let options = options.clone();
                let permits = Arc::clone(&permits);
                let handle = tokio::spawn(async move {
                    let started = Instant::now();
                    let outcome = inner
                        .run_unit(&ctx, &permits, source.as_ref(), &options)
                        .await;
                    (outcome, started.elapsed())
                });
                (name, handle)
            })
            .unzip();

        let joined = futures::future::join_all(handles).await;

        for (name, outcome) in names.into_iter().zip(joined) {
            match outcome {
                Ok((Ok(result), elapsed)) => absorb(&mut federated, name, result, elapsed),
                Ok((Err(err), elapsed)) => {
                    tracing::warn!(source = %name, error = %err, "source search failed");
                    federated.errors.insert(name.clone(), err.to_string());
                    federated.source_elapsed.insert(name, elapsed);
                }
                Err(join_err) => {
                    tracing::error!(source = %name, error = %join_err, "source task did not complete");
                    let err = FederationError::Task(join_err.to_string());
                    federated.errors.insert(name, err.to_string());
                }
            }
        }

        merge::sort_skills(&mut federated.skills);
        federated.elapsed = started.elapsed();
        tracing::debug!(
            count = federated.skills.len(),
            total = federated.total,
            failed = federated.errors.len(),
            elapsed_ms = u64::try_from(federated.elapsed.as_millis()).unwrap_or(u64::MAX),
            "federated search complete"
        );
        federated
    }

    /// Enabled sources selected by `filter`, in name order.
    fn targets(&self, filter: &[SourceType]) -> Vec<Arc<dyn SkillSource>> {
        let mut targets: Vec<(SourceType, Arc<dyn SkillSource>)> = self
            .snapshot()
            .into_iter()
            .filter(|(name, _)| filter.is_empty() || filter.contains(name))
            .filter(|(_, source)| source.enabled())
            .collect();
        targets.sort_by(|a, b| a.0.cmp(&b.0));
        targets.into_iter().map(|(_, source)| source).collect()
    }
}

fn absorb(federated: &mut FederatedResult, name: SourceType, result: SearchResult, elapsed: Duration) {
    tracing::debug!(
        source = %name,
        count = result.skills.len(),
        total = result.total,
        "source returned results"
    );
    federated.total += result.total;
    federated.by_source.insert(name.clone(), result.total);
    federated.source_elapsed.insert(name, elapsed);
    federated.skills.extend(result.skills);
}

impl Inner {
    /// One fan-out unit: take a permit from this call's pool, then run the
    /// pipeline.
    async fn run_unit(
        &self,
        ctx: &Context,
        permits: &Semaphore,
        source: &dyn SkillSource,
        options: &SearchOptions,
    ) -> Result<SearchResult> {
        let _permit = ctx
            .run(permits.acquire())
            .await?
            .map_err(|e| FederationError::Task(e.to_string()))?;
        self.search_unit(ctx, source, options).await
    }

    /// Cache → circuit → rate limit → call → cache for one source.
    ///
    /// `options` must already be normalized.
    pub(super) async fn search_unit(
        &self,
        ctx: &Context,
        source: &dyn SkillSource,
        options: &SearchOptions,
    ) -> Result<SearchResult> {
        let name = source.name();
        if let Some(hit) = self.search_cache.get(&name, options).await {
            tracing::debug!(source = %name, total = hit.total, "search cache hit");
            return Ok(hit);
        }

        self.admit(ctx, &name).await?;
        let started = Instant::now();
        let outcome = ctx.run(source.search(ctx, options)).await.and_then(|r| r);
        let mut result = self.settle(&name, outcome)?;
        result.elapsed = started.elapsed();
        result.source = name.clone();

        if !name.is_local() {
            self.search_cache.set(&name, options, result.clone()).await;
        }
        Ok(result)
    }
}

//! # skill-federation
//!
//! Federated skill search across pluggable providers.
//!
//! A local skill store and any number of external code-hosting or search
//! backends implement [`SkillSource`]. A [`Federation`] queries them
//! concurrently and merges their answers into one deterministic
//! [`FederatedResult`].
//!
//! ## Design
//!
//! - One tokio task per source per search, joined independently
//! - Per-source token-bucket rate budgets ([`rate_limit`])
//! - In-memory TTL caches for search pages and single skills ([`cache`]);
//!   the local source is never cached
//! - Per-source circuit breaker so a failing backend is skipped, not retried
//! - Graceful degradation: a failing source only loses its own contribution
//!
//! Search queries are logged only at trace level.
//!
//! ## Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use skill_federation::{Context, Federation, SearchOptions, SkillSource};
//! # async fn example(github: Arc<dyn SkillSource>, local: Arc<dyn SkillSource>) {
//! let federation = Federation::with_defaults();
//! federation.register_source(local);
//! federation.register_source(github);
//!
//! let ctx = Context::new().with_timeout(std::time::Duration::from_secs(8));
//! let result = federation.search(&ctx, &SearchOptions::new("kubernetes")).await;
//! for skill in &result.skills {
//!     println!("[{}] {} ({} stars)", skill.source, skill.name, skill.stars.unwrap_or(0));
//! }
//! for source in result.failed_sources() {
//!     eprintln!("{source} failed: {}", result.errors[&source]);
//! }
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod health;
pub mod orchestrator;
pub mod rate_limit;
pub mod source;
pub mod types;

pub use config::FederationConfig;
pub use context::Context;
pub use error::{FederationError, Result};
pub use orchestrator::Federation;
pub use rate_limit::RateLimit;
pub use source::SkillSource;
pub use types::{
    DEFAULT_PER_PAGE, ExternalSkill, FederatedResult, SearchOptions, SearchResult, SourceType,
};

//! App Context

use std::sync::Arc;

use tariff_cache::{CacheConfig, MemoryStore, RedisStore, RemoteError, RemoteStore, TieredCache};
use thiserror::Error;

use crate::{
    database::{self, Db},
    domain::{
        policies::{PgPoliciesRepository, PgPoliciesService, PoliciesRepository, PoliciesService},
        pricing::{CachedPricingService, PricingService},
        products::{PgProductsRepository, ProductsRepository},
    },
};

#[derive(Debug, Error)]
pub enum AppInitError {
    #[error("failed to connect to database")]
    Database(#[source] sqlx::Error),

    #[error("failed to configure the distributed cache")]
    Cache(#[source] RemoteError),
}

/// Explicitly wired application services. No global state; callers own
/// the context and hand it to whatever surface they expose.
#[derive(Clone)]
pub struct AppContext {
    pub products: Arc<dyn ProductsRepository>,
    pub policies: Arc<dyn PoliciesService>,
    pub pricing: Arc<dyn PricingService>,
    pub cache: TieredCache,
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// Build the tiered cache. Without a Redis URL the distributed tier is
/// backed by the in-process [`MemoryStore`], so tag-based invalidation
/// keeps working in single-instance deployments.
fn build_cache(redis_url: Option<&str>) -> Result<TieredCache, RemoteError> {
    let store: Arc<dyn RemoteStore> = match redis_url {
        Some(url) => Arc::new(RedisStore::connect(url)?),
        None => Arc::new(MemoryStore::new()),
    };

    Ok(TieredCache::with_remote(CacheConfig::default(), store))
}

impl AppContext {
    /// Build the application context from connection URLs.
    ///
    /// # Errors
    ///
    /// Returns an error when the database connection or the Redis pool
    /// cannot be established.
    pub async fn from_urls(
        database_url: &str,
        redis_url: Option<&str>,
    ) -> Result<Self, AppInitError> {
        let pool = database::connect(database_url)
            .await
            .map_err(AppInitError::Database)?;
        let db = Db::new(pool);

        let cache = build_cache(redis_url).map_err(AppInitError::Cache)?;

        let products: Arc<dyn ProductsRepository> =
            Arc::new(PgProductsRepository::new(db.clone()));
        let policies_repository: Arc<dyn PoliciesRepository> =
            Arc::new(PgPoliciesRepository::new(db));

        Ok(Self {
            pricing: Arc::new(CachedPricingService::new(
                Arc::clone(&products),
                Arc::clone(&policies_repository),
                cache.clone(),
            )),
            policies: Arc::new(PgPoliciesService::new(policies_repository, cache.clone())),
            products,
            cache,
        })
    }
}

#[cfg(test)]
mod tests {
    use tariff_cache::CacheOptions;
    use testresult::TestResult;

    use super::*;

    #[tokio::test]
    async fn redis_less_cache_still_honors_tag_invalidation() -> TestResult {
        let cache = build_cache(None)?;
        let options = CacheOptions {
            tags: vec!["product:w-1".to_owned()],
            ..CacheOptions::default()
        };

        cache.set("pricing", "w-1:retail", &9_000_i64, &options).await?;

        let removed = cache.clear_tags(&["product:w-1".to_owned()]).await;
        assert_eq!(removed, 1);
        assert_eq!(cache.get::<i64>("pricing", "w-1:retail").await, None);

        Ok(())
    }
}

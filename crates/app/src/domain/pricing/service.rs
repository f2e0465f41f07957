//! Pricing Service

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use mockall::automock;
use smallvec::SmallVec;
use tariff::{PricePolicy, PricingContext, PricingResult, resolve};
use tariff_cache::{CacheOptions, TieredCache};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{
    policies::repository::PoliciesRepository,
    pricing::errors::PricingError,
    products::{
        records::{ProductRecord, ProductUuid},
        repository::ProductsRepository,
    },
};

/// Cache namespace resolved prices live in.
pub(crate) const PRICING_NAMESPACE: &str = "pricing";

/// Tag every cached result for a product carries, for group invalidation.
pub(crate) fn product_tag(product: Uuid) -> String {
    format!("product:{product}")
}

/// Cache key of one resolution: every context field that can change the
/// outcome participates.
pub(crate) fn result_key(ctx: &PricingContext) -> String {
    format!(
        "{}:{}:{}:{}:{}:{}:{}",
        ctx.product_id,
        ctx.role.as_str(),
        ctx.user_id.map_or_else(|| "-".to_owned(), |user| user.to_string()),
        ctx.quantity,
        ctx.region.as_deref().unwrap_or("-"),
        ctx.city.as_deref().unwrap_or("-"),
        ctx.order_amount,
    )
}

/// One order line in a bulk resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderLine {
    pub product: ProductUuid,
    pub quantity: u32,
}

#[automock]
#[async_trait]
pub trait PricingService: Send + Sync {
    /// Resolve the final price for one product in the given context.
    ///
    /// Cached results are returned verbatim without re-running the policy
    /// walk; the short TTL bounds how long a stale price can be served
    /// after a policy change slips past invalidation.
    async fn resolve_price(&self, ctx: PricingContext) -> Result<PricingResult, PricingError>;

    /// Resolve every order line against the shared pre-discount order
    /// total, so amount-bounded policies see the whole order.
    async fn resolve_prices(
        &self,
        lines: Vec<OrderLine>,
        ctx: PricingContext,
    ) -> Result<Vec<PricingResult>, PricingError>;
}

/// [`PricingService`] over the product and policy repositories, memoizing
/// results in a [`TieredCache`].
#[derive(Clone)]
pub struct CachedPricingService {
    products: Arc<dyn ProductsRepository>,
    policies: Arc<dyn PoliciesRepository>,
    cache: TieredCache,
    result_ttl: Duration,
}

impl std::fmt::Debug for CachedPricingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedPricingService")
            .field("cache", &self.cache)
            .field("result_ttl", &self.result_ttl)
            .finish_non_exhaustive()
    }
}

impl CachedPricingService {
    #[must_use]
    pub fn new(
        products: Arc<dyn ProductsRepository>,
        policies: Arc<dyn PoliciesRepository>,
        cache: TieredCache,
    ) -> Self {
        Self {
            products,
            policies,
            cache,
            result_ttl: Duration::from_secs(300),
        }
    }

    /// Override the cached-result lifetime.
    #[must_use]
    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl = ttl;
        self
    }

    /// Run the policy walk for a loaded product and cache the outcome.
    async fn resolve_with_product(
        &self,
        product: &ProductRecord,
        mut ctx: PricingContext,
    ) -> Result<PricingResult, PricingError> {
        ctx.categories = SmallVec::from_vec(product.categories.clone());

        let base_price = product.base_price_for(ctx.role);

        let candidates = self.policies.find_applicable(ctx.clone()).await?;
        let policies: Vec<PricePolicy> = candidates
            .into_iter()
            .map(|record| record.policy)
            .collect();

        let result = resolve(base_price, &policies, &ctx)?;

        for applied in &result.applied_policies {
            self.policies.increment_usage(*applied).await?;
        }

        let options = CacheOptions {
            ttl: Some(self.result_ttl),
            tags: vec![product_tag(ctx.product_id)],
            ..CacheOptions::default()
        };
        let key = result_key(&ctx);

        if let Err(error) = self
            .cache
            .set(PRICING_NAMESPACE, &key, &result, &options)
            .await
        {
            warn!(key, error = %error, "failed to cache pricing result");
        }

        info!(
            product_uuid = %ctx.product_id,
            final_price = result.final_price,
            applied = result.applied_policies.len(),
            "resolved price"
        );

        Ok(result)
    }
}

#[async_trait]
impl PricingService for CachedPricingService {
    #[tracing::instrument(
        name = "pricing.service.resolve_price",
        skip(self, ctx),
        fields(
            product_uuid = %ctx.product_id,
            role = %ctx.role,
            quantity = ctx.quantity
        ),
        err
    )]
    async fn resolve_price(&self, ctx: PricingContext) -> Result<PricingResult, PricingError> {
        let key = result_key(&ctx);

        if let Some(cached) = self
            .cache
            .get::<PricingResult>(PRICING_NAMESPACE, &key)
            .await
        {
            return Ok(cached);
        }

        let product = self
            .products
            .get_product(ProductUuid::from_uuid(ctx.product_id))
            .await?;

        self.resolve_with_product(&product, ctx).await
    }

    #[tracing::instrument(
        name = "pricing.service.resolve_prices",
        skip(self, lines, ctx),
        fields(lines = lines.len(), role = %ctx.role),
        err
    )]
    async fn resolve_prices(
        &self,
        lines: Vec<OrderLine>,
        ctx: PricingContext,
    ) -> Result<Vec<PricingResult>, PricingError> {
        let mut products = Vec::with_capacity(lines.len());
        let mut order_total: i64 = 0;

        for line in &lines {
            let product = self.products.get_product(line.product).await?;

            order_total = order_total
                .saturating_add(product.base_price_for(ctx.role).saturating_mul(i64::from(line.quantity)));

            products.push(product);
        }

        let mut results = Vec::with_capacity(lines.len());

        for (line, product) in lines.iter().zip(&products) {
            let mut line_ctx = ctx.clone();
            line_ctx.product_id = line.product.into_uuid();
            line_ctx.quantity = line.quantity;
            line_ctx.order_amount = order_total;

            let key = result_key(&line_ctx);

            if let Some(cached) = self
                .cache
                .get::<PricingResult>(PRICING_NAMESPACE, &key)
                .await
            {
                results.push(cached);
                continue;
            }

            results.push(self.resolve_with_product(product, line_ctx).await?);
        }

        Ok(results)
    }
}

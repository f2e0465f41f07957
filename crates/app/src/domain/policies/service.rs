//! Policies Service

use std::sync::Arc;

use async_trait::async_trait;
use mockall::automock;
use tariff::{PolicyId, PolicyScope};
use tariff_cache::TieredCache;
use tracing::info;

use crate::domain::{
    policies::{
        data::{NewPolicy, PolicyPatch},
        errors::PoliciesServiceError,
        records::PolicyRecord,
        repository::PoliciesRepository,
    },
    pricing::service::{PRICING_NAMESPACE, product_tag},
};

#[automock]
#[async_trait]
pub trait PoliciesService: Send + Sync {
    /// Validate and persist a new policy. Validation failures leave no
    /// partial state behind.
    async fn create_policy(&self, policy: NewPolicy)
    -> Result<PolicyRecord, PoliciesServiceError>;

    /// Load, merge the patch, re-validate, persist.
    async fn update_policy(
        &self,
        policy: PolicyId,
        patch: PolicyPatch,
    ) -> Result<PolicyRecord, PoliciesServiceError>;

    /// Soft-delete a policy.
    async fn deactivate_policy(&self, policy: PolicyId) -> Result<(), PoliciesServiceError>;
}

/// [`PoliciesService`] over the policies repository, invalidating cached
/// pricing results on every mutation.
#[derive(Clone)]
pub struct PgPoliciesService {
    repository: Arc<dyn PoliciesRepository>,
    cache: TieredCache,
}

impl std::fmt::Debug for PgPoliciesService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgPoliciesService")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl PgPoliciesService {
    #[must_use]
    pub fn new(repository: Arc<dyn PoliciesRepository>, cache: TieredCache) -> Self {
        Self { repository, cache }
    }

    /// Drop cached pricing results the scoped products could have produced.
    /// A policy without a product scope can affect any product, so the
    /// whole pricing namespace goes.
    async fn invalidate_pricing(&self, scopes: &[&PolicyScope]) {
        let mut tags = Vec::new();

        for scope in scopes {
            match scope.product_id {
                Some(product) => tags.push(product_tag(product)),
                None => {
                    let dropped = self.cache.clear_namespace(PRICING_NAMESPACE).await;
                    info!(dropped, "cleared pricing cache");
                    return;
                }
            }
        }

        let dropped = self.cache.clear_tags(&tags).await;
        info!(dropped, "cleared tagged pricing cache entries");
    }
}

#[async_trait]
impl PoliciesService for PgPoliciesService {
    #[tracing::instrument(
        name = "policies.service.create_policy",
        skip(self, policy),
        fields(policy_uuid = %policy.policy.id),
        err
    )]
    async fn create_policy(
        &self,
        policy: NewPolicy,
    ) -> Result<PolicyRecord, PoliciesServiceError> {
        policy.policy.validate()?;

        let record = self.repository.create_policy(policy).await?;

        self.invalidate_pricing(&[&record.policy.scope]).await;

        info!(policy_uuid = %record.policy.id, "created policy");

        Ok(record)
    }

    #[tracing::instrument(
        name = "policies.service.update_policy",
        skip(self, patch),
        fields(policy_uuid = %policy),
        err
    )]
    async fn update_policy(
        &self,
        policy: PolicyId,
        patch: PolicyPatch,
    ) -> Result<PolicyRecord, PoliciesServiceError> {
        let mut record = self.repository.find_policy(policy).await?;
        let previous_scope = record.policy.scope.clone();

        patch.apply(&mut record.name, &mut record.policy);
        record.policy.validate()?;

        let updated = self.repository.update_policy(record).await?;

        // Both the old and the new scope may hold stale results.
        self.invalidate_pricing(&[&previous_scope, &updated.policy.scope])
            .await;

        info!(policy_uuid = %updated.policy.id, "updated policy");

        Ok(updated)
    }

    #[tracing::instrument(
        name = "policies.service.deactivate_policy",
        skip(self),
        fields(policy_uuid = %policy),
        err
    )]
    async fn deactivate_policy(&self, policy: PolicyId) -> Result<(), PoliciesServiceError> {
        let record = self.repository.find_policy(policy).await?;

        let rows_affected = self.repository.deactivate_policy(policy).await?;

        if rows_affected == 0 {
            return Err(PoliciesServiceError::NotFound);
        }

        self.invalidate_pricing(&[&record.policy.scope]).await;

        info!(policy_uuid = %policy, "deactivated policy");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use jiff::Timestamp;
    use rust_decimal::Decimal;
    use tariff::{Discount, PolicyValidationError, PricePolicy, PricingResult};
    use tariff_cache::{CacheConfig, CacheOptions, MemoryStore, TieredCache};
    use testresult::TestResult;
    use uuid::Uuid;

    use crate::domain::policies::repository::MockPoliciesRepository;

    use super::*;

    fn shared_cache() -> TieredCache {
        TieredCache::with_remote(CacheConfig::default(), Arc::new(MemoryStore::new()))
    }

    fn record_for(policy: PricePolicy) -> PolicyRecord {
        PolicyRecord {
            name: "Autumn sale".to_owned(),
            policy,
            created_at: Timestamp::now(),
            updated_at: Timestamp::now(),
        }
    }

    async fn seed_pricing_entry(
        cache: &TieredCache,
        product: Uuid,
    ) -> Result<String, tariff_cache::CacheError> {
        let key = format!("{product}:retail:-:1:-:-:0");
        let options = CacheOptions {
            tags: vec![product_tag(product)],
            ..CacheOptions::default()
        };

        cache
            .set(
                PRICING_NAMESPACE,
                &key,
                &PricingResult::unchanged(1_000),
                &options,
            )
            .await?;

        Ok(key)
    }

    #[tokio::test]
    async fn create_rejects_invalid_policies_before_persisting() {
        let mut repository = MockPoliciesRepository::new();
        repository.expect_create_policy().times(0);

        let service = PgPoliciesService::new(Arc::new(repository), shared_cache());

        let policy = PricePolicy::new(
            PolicyId::new(),
            Discount::Percentage(Decimal::from(150)),
            50,
        );
        let result = service
            .create_policy(NewPolicy {
                name: "Broken".to_owned(),
                policy,
            })
            .await;

        assert!(
            matches!(
                result,
                Err(PoliciesServiceError::Validation(
                    PolicyValidationError::PercentageAboveHundred
                ))
            ),
            "expected percentage validation failure, got {result:?}"
        );
    }

    #[tokio::test]
    async fn create_persists_valid_policies() -> TestResult {
        let policy = PricePolicy::new(
            PolicyId::new(),
            Discount::Percentage(Decimal::from(10)),
            50,
        );
        let stored = record_for(policy.clone());

        let mut repository = MockPoliciesRepository::new();
        repository
            .expect_create_policy()
            .times(1)
            .returning(move |_| Ok(stored.clone()));

        let service = PgPoliciesService::new(Arc::new(repository), shared_cache());

        let record = service
            .create_policy(NewPolicy {
                name: "Autumn sale".to_owned(),
                policy,
            })
            .await?;

        assert_eq!(record.name, "Autumn sale");

        Ok(())
    }

    #[tokio::test]
    async fn update_revalidates_the_merged_policy() {
        let policy = PricePolicy::new(
            PolicyId::new(),
            Discount::Percentage(Decimal::from(10)),
            50,
        );
        let id = policy.id;
        let stored = record_for(policy);

        let mut repository = MockPoliciesRepository::new();
        repository
            .expect_find_policy()
            .times(1)
            .returning(move |_| Ok(stored.clone()));
        repository.expect_update_policy().times(0);

        let service = PgPoliciesService::new(Arc::new(repository), shared_cache());

        let result = service
            .update_policy(
                id,
                PolicyPatch {
                    priority: Some(0),
                    ..PolicyPatch::default()
                },
            )
            .await;

        assert!(
            matches!(
                result,
                Err(PoliciesServiceError::Validation(
                    PolicyValidationError::PriorityOutOfRange
                ))
            ),
            "expected priority validation failure, got {result:?}"
        );
    }

    #[tokio::test]
    async fn update_invalidates_cached_results_for_the_scoped_product() -> TestResult {
        let product = Uuid::now_v7();

        let mut policy = PricePolicy::new(
            PolicyId::new(),
            Discount::Percentage(Decimal::from(10)),
            50,
        );
        policy.scope.product_id = Some(product);
        let id = policy.id;
        let stored = record_for(policy);
        let updated = stored.clone();

        let mut repository = MockPoliciesRepository::new();
        repository
            .expect_find_policy()
            .returning(move |_| Ok(stored.clone()));
        repository
            .expect_update_policy()
            .times(1)
            .returning(move |_| Ok(updated.clone()));

        let cache = shared_cache();
        let key = seed_pricing_entry(&cache, product).await?;

        let service = PgPoliciesService::new(Arc::new(repository), cache.clone());

        service
            .update_policy(
                id,
                PolicyPatch {
                    priority: Some(60),
                    ..PolicyPatch::default()
                },
            )
            .await?;

        let cached: Option<PricingResult> = cache.get(PRICING_NAMESPACE, &key).await;
        assert_eq!(cached, None, "cached result should have been invalidated");

        Ok(())
    }

    #[tokio::test]
    async fn deactivating_an_unscoped_policy_clears_the_namespace() -> TestResult {
        let policy = PricePolicy::new(
            PolicyId::new(),
            Discount::Percentage(Decimal::from(10)),
            50,
        );
        let id = policy.id;
        let stored = record_for(policy);

        let mut repository = MockPoliciesRepository::new();
        repository
            .expect_find_policy()
            .returning(move |_| Ok(stored.clone()));
        repository
            .expect_deactivate_policy()
            .times(1)
            .returning(|_| Ok(1));

        let cache = shared_cache();
        let key = seed_pricing_entry(&cache, Uuid::now_v7()).await?;

        let service = PgPoliciesService::new(Arc::new(repository), cache.clone());
        service.deactivate_policy(id).await?;

        let cached: Option<PricingResult> = cache.get(PRICING_NAMESPACE, &key).await;
        assert_eq!(cached, None, "namespace should have been cleared");

        Ok(())
    }

    #[tokio::test]
    async fn deactivating_an_already_inactive_policy_is_not_found() {
        let policy = PricePolicy::new(
            PolicyId::new(),
            Discount::Percentage(Decimal::from(10)),
            50,
        );
        let id = policy.id;
        let stored = record_for(policy);

        let mut repository = MockPoliciesRepository::new();
        repository
            .expect_find_policy()
            .returning(move |_| Ok(stored.clone()));
        repository.expect_deactivate_policy().returning(|_| Ok(0));

        let service = PgPoliciesService::new(Arc::new(repository), shared_cache());

        let result = service.deactivate_policy(id).await;

        assert!(
            matches!(result, Err(PoliciesServiceError::NotFound)),
            "expected NotFound, got {result:?}"
        );
    }
}

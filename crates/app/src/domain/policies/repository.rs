//! Policies Repository

use async_trait::async_trait;
use jiff_sqlx::Timestamp as SqlxTimestamp;
use mockall::automock;
use smallvec::SmallVec;
use sqlx::{FromRow, Postgres, Row, postgres::PgRow, query, query_as};
use tariff::{
    CustomerRole, Discount, DiscountTerms, PolicyBounds, PolicyId, PolicyScope, PolicyWindow,
    PricePolicy, PricingContext, UsageCaps,
};

use crate::{
    database::Db,
    domain::policies::{
        data::NewPolicy,
        errors::PoliciesServiceError,
        records::{self, PolicyColumns, PolicyDecodeError, PolicyRecord},
    },
};

const FIND_APPLICABLE_SQL: &str = include_str!("sql/find_applicable.sql");
const FIND_POLICY_SQL: &str = include_str!("sql/find_policy.sql");
const CREATE_POLICY_SQL: &str = include_str!("sql/create_policy.sql");
const UPDATE_POLICY_SQL: &str = include_str!("sql/update_policy.sql");
const DEACTIVATE_POLICY_SQL: &str = include_str!("sql/deactivate_policy.sql");
const INCREMENT_USAGE_SQL: &str = include_str!("sql/increment_usage.sql");

#[automock]
#[async_trait]
pub trait PoliciesRepository: Send + Sync {
    /// Candidate policies for a pricing context, highest priority first.
    ///
    /// This is a loose pre-filter: rows that clearly cannot apply are
    /// excluded, and the in-memory applicability check stays authoritative
    /// for everything the SQL cannot express (weekday and time-of-day
    /// windows in particular).
    async fn find_applicable(
        &self,
        ctx: PricingContext,
    ) -> Result<Vec<PolicyRecord>, PoliciesServiceError>;

    /// Retrieve a single policy, active or not.
    async fn find_policy(&self, policy: PolicyId) -> Result<PolicyRecord, PoliciesServiceError>;

    /// Persist a new policy.
    async fn create_policy(&self, policy: NewPolicy)
    -> Result<PolicyRecord, PoliciesServiceError>;

    /// Persist a fully-merged policy record.
    async fn update_policy(
        &self,
        record: PolicyRecord,
    ) -> Result<PolicyRecord, PoliciesServiceError>;

    /// Soft-delete a policy by clearing its active flag. Returns the number
    /// of rows affected.
    async fn deactivate_policy(&self, policy: PolicyId) -> Result<u64, PoliciesServiceError>;

    /// Atomically bump the usage counter.
    async fn increment_usage(&self, policy: PolicyId) -> Result<(), PoliciesServiceError>;
}

#[derive(Debug, Clone)]
pub struct PgPoliciesRepository {
    db: Db,
}

impl PgPoliciesRepository {
    #[must_use]
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PoliciesRepository for PgPoliciesRepository {
    async fn find_applicable(
        &self,
        ctx: PricingContext,
    ) -> Result<Vec<PolicyRecord>, PoliciesServiceError> {
        let mut tx = self.db.begin().await?;

        let records = query_as::<Postgres, PolicyRecord>(FIND_APPLICABLE_SQL)
            .bind(ctx.product_id)
            .bind(ctx.categories.to_vec())
            .bind(ctx.role.as_str())
            .bind(ctx.user_id)
            .bind(SqlxTimestamp::from(ctx.evaluated_at))
            .bind(i64::from(ctx.quantity))
            .bind(ctx.order_amount)
            .bind(ctx.region)
            .bind(ctx.city)
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(records)
    }

    async fn find_policy(&self, policy: PolicyId) -> Result<PolicyRecord, PoliciesServiceError> {
        let mut tx = self.db.begin().await?;

        let record = query_as::<Postgres, PolicyRecord>(FIND_POLICY_SQL)
            .bind(policy.into_uuid())
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(record)
    }

    async fn create_policy(
        &self,
        policy: NewPolicy,
    ) -> Result<PolicyRecord, PoliciesServiceError> {
        let columns = PolicyColumns::try_from_policy(&policy.policy)?;

        let mut tx = self.db.begin().await?;

        let record = query_as::<Postgres, PolicyRecord>(CREATE_POLICY_SQL)
            .bind(columns.uuid)
            .bind(&policy.name)
            .bind(columns.product_uuid)
            .bind(&columns.categories)
            .bind(columns.target_role)
            .bind(columns.target_user_uuid)
            .bind(&columns.regions)
            .bind(&columns.cities)
            .bind(columns.starts_at.map(SqlxTimestamp::from))
            .bind(columns.ends_at.map(SqlxTimestamp::from))
            .bind(&columns.weekdays)
            .bind(columns.window_start_minute)
            .bind(columns.window_end_minute)
            .bind(columns.min_quantity)
            .bind(columns.max_quantity)
            .bind(columns.min_order_amount)
            .bind(columns.max_order_amount)
            .bind(columns.discount_kind)
            .bind(columns.discount_percentage)
            .bind(columns.discount_amount)
            .bind(columns.max_discount)
            .bind(columns.min_final_price)
            .bind(columns.priority)
            .bind(columns.active)
            .bind(columns.is_exclusive)
            .bind(columns.max_total_uses)
            .bind(columns.max_uses_per_user)
            .bind(columns.usage_count)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(record)
    }

    async fn update_policy(
        &self,
        record: PolicyRecord,
    ) -> Result<PolicyRecord, PoliciesServiceError> {
        let columns = PolicyColumns::try_from_policy(&record.policy)?;

        let mut tx = self.db.begin().await?;

        let updated = query_as::<Postgres, PolicyRecord>(UPDATE_POLICY_SQL)
            .bind(columns.uuid)
            .bind(&record.name)
            .bind(columns.product_uuid)
            .bind(&columns.categories)
            .bind(columns.target_role)
            .bind(columns.target_user_uuid)
            .bind(&columns.regions)
            .bind(&columns.cities)
            .bind(columns.starts_at.map(SqlxTimestamp::from))
            .bind(columns.ends_at.map(SqlxTimestamp::from))
            .bind(&columns.weekdays)
            .bind(columns.window_start_minute)
            .bind(columns.window_end_minute)
            .bind(columns.min_quantity)
            .bind(columns.max_quantity)
            .bind(columns.min_order_amount)
            .bind(columns.max_order_amount)
            .bind(columns.discount_kind)
            .bind(columns.discount_percentage)
            .bind(columns.discount_amount)
            .bind(columns.max_discount)
            .bind(columns.min_final_price)
            .bind(columns.priority)
            .bind(columns.active)
            .bind(columns.is_exclusive)
            .bind(columns.max_total_uses)
            .bind(columns.max_uses_per_user)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(updated)
    }

    async fn deactivate_policy(&self, policy: PolicyId) -> Result<u64, PoliciesServiceError> {
        let mut tx = self.db.begin().await?;

        let rows_affected = query(DEACTIVATE_POLICY_SQL)
            .bind(policy.into_uuid())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        Ok(rows_affected)
    }

    async fn increment_usage(&self, policy: PolicyId) -> Result<(), PoliciesServiceError> {
        let mut tx = self.db.begin().await?;

        query(INCREMENT_USAGE_SQL)
            .bind(policy.into_uuid())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }
}

fn decode_error(
    index: &str,
    source: impl std::error::Error + Send + Sync + 'static,
) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: index.to_string(),
        source: Box::new(source),
    }
}

fn unsigned_column(index: &str, value: Option<i32>) -> sqlx::Result<Option<u32>> {
    value
        .map(|value| u32::try_from(value).map_err(|err| decode_error(index, err)))
        .transpose()
}

impl<'r> FromRow<'r, PgRow> for PolicyRecord {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        let discount_kind: String = row.try_get("discount_kind")?;

        let discount = match discount_kind.as_str() {
            "percentage" => {
                let percent = row
                    .try_get::<Option<rust_decimal::Decimal>, _>("discount_percentage")?
                    .ok_or_else(|| {
                        decode_error(
                            "discount_percentage",
                            PolicyDecodeError::MissingDiscountValue(discount_kind.clone()),
                        )
                    })?;

                Discount::Percentage(percent)
            }
            "fixed_amount" | "fixed_price" => {
                let amount = row
                    .try_get::<Option<i64>, _>("discount_amount")?
                    .ok_or_else(|| {
                        decode_error(
                            "discount_amount",
                            PolicyDecodeError::MissingDiscountValue(discount_kind.clone()),
                        )
                    })?;

                if discount_kind == "fixed_amount" {
                    Discount::FixedAmount(amount)
                } else {
                    Discount::FixedPrice(amount)
                }
            }
            other => {
                return Err(decode_error(
                    "discount_kind",
                    PolicyDecodeError::UnknownDiscountKind(other.to_string()),
                ));
            }
        };

        let target_role = match row.try_get::<Option<String>, _>("target_role")? {
            Some(role) => Some(CustomerRole::parse(&role).ok_or_else(|| {
                decode_error("target_role", PolicyDecodeError::UnknownRole(role.clone()))
            })?),
            None => None,
        };

        let weekdays = row
            .try_get::<Option<Vec<i16>>, _>("weekdays")?
            .map(|offsets| {
                records::weekdays_from_offsets(&offsets)
                    .map_err(|err| decode_error("weekdays", err))
            })
            .transpose()?;

        let hours = match (
            row.try_get::<Option<i16>, _>("window_start_minute")?,
            row.try_get::<Option<i16>, _>("window_end_minute")?,
        ) {
            (Some(start), Some(end)) => Some((
                records::time_from_minute(start)
                    .map_err(|err| decode_error("window_start_minute", err))?,
                records::time_from_minute(end)
                    .map_err(|err| decode_error("window_end_minute", err))?,
            )),
            (None, None) => None,
            _ => {
                return Err(decode_error(
                    "window_start_minute",
                    PolicyDecodeError::IncompleteHoursWindow,
                ));
            }
        };

        let priority_i16: i16 = row.try_get("priority")?;
        let priority =
            u8::try_from(priority_i16).map_err(|err| decode_error("priority", err))?;

        let used_i32: i32 = row.try_get("usage_count")?;
        let used = u32::try_from(used_i32).map_err(|err| decode_error("usage_count", err))?;

        let policy = PricePolicy {
            id: PolicyId::from_uuid(row.try_get("uuid")?),
            scope: PolicyScope {
                product_id: row.try_get("product_uuid")?,
                categories: SmallVec::from_vec(row.try_get("categories")?),
                target_role,
                target_user_id: row.try_get("target_user_uuid")?,
                regions: SmallVec::from_vec(row.try_get("regions")?),
                cities: SmallVec::from_vec(row.try_get("cities")?),
            },
            window: PolicyWindow {
                starts_at: row
                    .try_get::<Option<SqlxTimestamp>, _>("starts_at")?
                    .map(SqlxTimestamp::to_jiff),
                ends_at: row
                    .try_get::<Option<SqlxTimestamp>, _>("ends_at")?
                    .map(SqlxTimestamp::to_jiff),
                weekdays,
                hours,
            },
            bounds: PolicyBounds {
                min_quantity: unsigned_column("min_quantity", row.try_get("min_quantity")?)?,
                max_quantity: unsigned_column("max_quantity", row.try_get("max_quantity")?)?,
                min_order_amount: row.try_get("min_order_amount")?,
                max_order_amount: row.try_get("max_order_amount")?,
            },
            terms: DiscountTerms {
                discount,
                max_discount: row.try_get("max_discount")?,
                min_final_price: row.try_get("min_final_price")?,
            },
            priority,
            active: row.try_get("active")?,
            exclusive: row.try_get("is_exclusive")?,
            usage: UsageCaps {
                max_total: unsigned_column("max_total_uses", row.try_get("max_total_uses")?)?,
                max_per_user: unsigned_column(
                    "max_uses_per_user",
                    row.try_get("max_uses_per_user")?,
                )?,
                used,
            },
        };

        Ok(Self {
            name: row.try_get("name")?,
            policy,
            created_at: row.try_get::<SqlxTimestamp, _>("created_at")?.to_jiff(),
            updated_at: row.try_get::<SqlxTimestamp, _>("updated_at")?.to_jiff(),
        })
    }
}

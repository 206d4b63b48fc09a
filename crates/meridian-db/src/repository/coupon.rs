//! # Coupon Repository
//!
//! Coupon storage and atomic redemption.
//!
//! Validity and discount math live in `meridian_core::Coupon`; this module
//! owns the one part that cannot be computed on a loaded copy: consuming a
//! redemption slot. `redeem` folds every validity gate into the UPDATE's
//! WHERE clause so two checkouts racing for the last slot of a limited
//! coupon cannot both win.
//!
//! Codes are case-insensitive. The column carries `COLLATE NOCASE`, so
//! equality in SQL already ignores case and "SAVE20" and "save20" collide
//! on the unique index.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use meridian_core::{Coupon, CoreError, DiscountType};

const SELECT_COLUMNS: &str = "id, code, discount_type, discount_value, min_order_amount_cents, \
     max_discount_amount_cents, usage_limit, used_count, usage_per_user, \
     applicable_categories, applicable_products, starts_at, ends_at, \
     is_active, created_at, updated_at";

/// Input for creating a coupon. The repository mints the ID and timestamps;
/// new coupons start active with a zero usage count.
#[derive(Debug, Clone)]
pub struct NewCoupon {
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    pub min_order_amount_cents: i64,
    pub max_discount_amount_cents: Option<i64>,
    pub usage_limit: Option<i64>,
    pub usage_per_user: Option<i64>,
    pub applicable_categories: Vec<String>,
    pub applicable_products: Vec<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

/// Repository for coupon database operations.
#[derive(Debug, Clone)]
pub struct CouponRepository {
    pool: SqlitePool,
}

impl CouponRepository {
    /// Creates a new CouponRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CouponRepository { pool }
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Gets a coupon by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Coupon>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM coupons WHERE id = ?1");
        let coupon = sqlx::query_as::<_, Coupon>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(coupon)
    }

    /// Looks a coupon up by code, ignoring case.
    pub async fn get_by_code(&self, code: &str) -> DbResult<Option<Coupon>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM coupons WHERE code = ?1");
        let coupon = sqlx::query_as::<_, Coupon>(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(coupon)
    }

    /// Coupons a customer could redeem right now: active, inside their
    /// window, with redemptions left.
    pub async fn list_active(&self) -> DbResult<Vec<Coupon>> {
        let now = Utc::now();
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM coupons \
             WHERE is_active = 1 AND starts_at <= ?1 AND ends_at >= ?1 \
               AND (usage_limit IS NULL OR used_count < usage_limit) \
             ORDER BY code"
        );
        let coupons = sqlx::query_as::<_, Coupon>(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
        Ok(coupons)
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Creates a coupon after shape validation.
    ///
    /// ## Errors
    /// `DuplicateEntity` when the code is already taken (any casing),
    /// `Validation` when the shape checks fail.
    pub async fn create(&self, new: NewCoupon) -> DbResult<Coupon> {
        let now = Utc::now();
        let coupon = Coupon {
            id: Uuid::new_v4().to_string(),
            code: new.code,
            discount_type: new.discount_type,
            discount_value: new.discount_value,
            min_order_amount_cents: new.min_order_amount_cents,
            max_discount_amount_cents: new.max_discount_amount_cents,
            usage_limit: new.usage_limit,
            used_count: 0,
            usage_per_user: new.usage_per_user,
            applicable_categories: new.applicable_categories,
            applicable_products: new.applicable_products,
            starts_at: new.starts_at,
            ends_at: new.ends_at,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        coupon.validate().map_err(DbError::Core)?;

        let result = sqlx::query(
            r#"
            INSERT INTO coupons (
                id, code, discount_type, discount_value,
                min_order_amount_cents, max_discount_amount_cents,
                usage_limit, used_count, usage_per_user,
                applicable_categories, applicable_products,
                starts_at, ends_at, is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
        )
        .bind(&coupon.id)
        .bind(&coupon.code)
        .bind(coupon.discount_type)
        .bind(coupon.discount_value)
        .bind(coupon.min_order_amount_cents)
        .bind(coupon.max_discount_amount_cents)
        .bind(coupon.usage_limit)
        .bind(coupon.used_count)
        .bind(coupon.usage_per_user)
        .bind(encode_list(&coupon.applicable_categories)?)
        .bind(encode_list(&coupon.applicable_products)?)
        .bind(coupon.starts_at)
        .bind(coupon.ends_at)
        .bind(coupon.is_active)
        .bind(coupon.created_at)
        .bind(coupon.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(code = %coupon.code, "Coupon created");
                Ok(coupon)
            }
            Err(e) => match DbError::from(e) {
                DbError::UniqueViolation { .. } => Err(DbError::Core(CoreError::DuplicateEntity {
                    entity: "Coupon",
                    key: coupon.code,
                })),
                other => Err(other),
            },
        }
    }

    /// Replaces the editable fields of a coupon. The usage counter is
    /// deliberately not editable here; `redeem` and `release_redemption`
    /// own it.
    pub async fn update(&self, coupon: &Coupon) -> DbResult<()> {
        coupon.validate().map_err(DbError::Core)?;
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE coupons SET
                discount_type = ?2,
                discount_value = ?3,
                min_order_amount_cents = ?4,
                max_discount_amount_cents = ?5,
                usage_limit = ?6,
                usage_per_user = ?7,
                applicable_categories = ?8,
                applicable_products = ?9,
                starts_at = ?10,
                ends_at = ?11,
                is_active = ?12,
                updated_at = ?13
            WHERE id = ?1
            "#,
        )
        .bind(&coupon.id)
        .bind(coupon.discount_type)
        .bind(coupon.discount_value)
        .bind(coupon.min_order_amount_cents)
        .bind(coupon.max_discount_amount_cents)
        .bind(coupon.usage_limit)
        .bind(coupon.usage_per_user)
        .bind(encode_list(&coupon.applicable_categories)?)
        .bind(encode_list(&coupon.applicable_products)?)
        .bind(coupon.starts_at)
        .bind(coupon.ends_at)
        .bind(coupon.is_active)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Coupon", &coupon.id));
        }
        Ok(())
    }

    /// Consumes one redemption slot atomically.
    ///
    /// Every validity gate sits in the WHERE clause, so the counter only
    /// moves for a coupon that is active, inside its window, and under its
    /// limit at the instant of the write. Returns the coupon as redeemed.
    ///
    /// ## Errors
    /// `CouponNotApplicable` naming the failed gate, or `NotFound` when no
    /// such code exists.
    pub async fn redeem(&self, code: &str) -> DbResult<Coupon> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE coupons SET
                used_count = used_count + 1,
                updated_at = ?2
            WHERE code = ?1
              AND is_active = 1
              AND starts_at <= ?2
              AND ends_at >= ?2
              AND (usage_limit IS NULL OR used_count < usage_limit)
            "#,
        )
        .bind(code)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Re-read to name the gate that failed.
            return match self.get_by_code(code).await? {
                Some(coupon) => {
                    coupon.ensure_valid(now).map_err(DbError::Core)?;
                    // Valid on the re-read means the guarded write lost a
                    // race that has since unwound. Tell the caller to retry.
                    Err(DbError::Core(CoreError::coupon_not_applicable(
                        code,
                        "coupon could not be redeemed, retry",
                    )))
                }
                None => Err(DbError::not_found("Coupon", code)),
            };
        }

        debug!(code = %code, "Coupon redeemed");
        self.get_by_code(code)
            .await?
            .ok_or_else(|| DbError::not_found("Coupon", code))
    }

    /// Gives a redemption slot back, clamped at zero. Used when an order
    /// that consumed the coupon is cancelled.
    pub async fn release_redemption(&self, code: &str) -> DbResult<()> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE coupons SET used_count = MAX(0, used_count - 1), updated_at = ?2 \
             WHERE code = ?1",
        )
        .bind(code)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Coupon", code));
        }
        debug!(code = %code, "Coupon redemption released");
        Ok(())
    }

    /// Turns a coupon off. Existing orders keep their discounts; new
    /// redemptions fail the active gate.
    pub async fn deactivate(&self, id: &str) -> DbResult<()> {
        let now = Utc::now();
        let result =
            sqlx::query("UPDATE coupons SET is_active = 0, updated_at = ?2 WHERE id = ?1")
                .bind(id)
                .bind(now)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Coupon", id));
        }
        Ok(())
    }
}

fn encode_list(values: &[String]) -> DbResult<String> {
    serde_json::to_string(values).map_err(|e| DbError::Internal(e.to_string()))
}

// =============================================================================
// Tests
// =============================================================================

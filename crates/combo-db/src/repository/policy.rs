//! # Policy Repository
//!
//! The promotion policy is a single JSON document in `settings` under the
//! `promotion_policy` key. A store with no document yields the default
//! policy (bundles excluded from promotions).

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::DbResult;
use combo_core::PromotionPolicy;

/// Settings key holding the promotion policy document.
pub const PROMOTION_POLICY_KEY: &str = "promotion_policy";

/// Repository for the promotion policy.
#[derive(Debug, Clone)]
pub struct PolicyRepository {
    pool: SqlitePool,
}

impl PolicyRepository {
    /// Creates a new PolicyRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PolicyRepository { pool }
    }

    /// `getPromotionPolicy()`.
    ///
    /// Returns the default policy when none is stored. A stored document
    /// that does not parse is reported as `Corrupt`.
    pub async fn get(&self) -> DbResult<PromotionPolicy> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?1")
            .bind(PROMOTION_POLICY_KEY)
            .fetch_optional(&self.pool)
            .await?;

        match value {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => {
                debug!("No promotion policy stored, using default");
                Ok(PromotionPolicy::default())
            }
        }
    }

    /// Stores (replaces) the promotion policy.
    pub async fn save(&self, policy: &PromotionPolicy) -> DbResult<()> {
        let json = serde_json::to_string(policy)?;

        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(PROMOTION_POLICY_KEY)
        .bind(&json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        info!(
            patterns = policy.exclusion_patterns.len(),
            whitelist = policy.whitelist.len(),
            "Promotion policy saved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::repository::test_support::memory_db;
    use combo_core::guard::{BundleOverride, GlobalPromotionPolicy};

    #[tokio::test]
    async fn test_default_when_absent() {
        let db = memory_db().await;
        let policy = db.policy().get().await.unwrap();
        assert_eq!(policy.default, GlobalPromotionPolicy::Exclude);
        assert!(policy.exclusion_patterns.is_empty());
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let db = memory_db().await;
        let mut policy = PromotionPolicy::default();
        policy.default = GlobalPromotionPolicy::Allow;
        policy.exclusion_patterns.push("^SITEWIDE".to_string());
        policy.whitelist.push("bundle10".to_string());
        policy.bundle_overrides.insert("b-1".to_string(), BundleOverride::No);
        policy.max_cumulative_discount = Some(50.0);

        db.policy().save(&policy).await.unwrap();
        assert_eq!(db.policy().get().await.unwrap(), policy);

        policy.max_cumulative_discount = None;
        db.policy().save(&policy).await.unwrap();
        assert_eq!(db.policy().get().await.unwrap().max_cumulative_discount, None);
    }

    #[tokio::test]
    async fn test_corrupt_document() {
        let db = memory_db().await;
        sqlx::query("INSERT INTO settings (key, value, updated_at) VALUES (?1, 'not json', ?2)")
            .bind(PROMOTION_POLICY_KEY)
            .bind(Utc::now())
            .execute(db.pool())
            .await
            .unwrap();

        assert!(matches!(db.policy().get().await, Err(DbError::Corrupt { .. })));
    }
}

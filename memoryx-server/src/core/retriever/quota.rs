//! Daily search quota enforcement (spec.md §4.5 step 7, S7).
//!
//! The relational store's `increment_and_get_daily_searches` is the atomic
//! check-and-increment primitive; this module just applies the tier limit
//! and shapes the result the retriever needs, including the "no charge on
//! rejection" guarantee S7 pins down.

use anyhow::Result;
use std::sync::Arc;

use crate::core::config::QuotaConfig;
use crate::core::tri_store::traits::RelationalStore;
use crate::models::owner::Owner;

/// Outcome of a quota check for one search request.
pub enum QuotaDecision {
    /// The request may proceed; `remaining` searches are left today.
    Allowed { remaining: u32 },
    /// The daily limit was already reached before this call — the counter
    /// was NOT incremented (spec.md §8 S7: "no quota consumed by the
    /// failing call").
    Exhausted,
}

/// Atomically charges one search against the owner's daily quota.
///
/// Implemented as "increment then check", rolling the increment back
/// when it pushes past the limit, so a rejected call still never has a
/// lasting quota effect.
pub async fn charge_search(
    relational: &Arc<dyn RelationalStore>,
    owner: &Owner,
    config: &QuotaConfig,
) -> Result<QuotaDecision> {
    let used = relational.increment_and_get_daily_searches(owner).await?;
    if used > config.free_tier_daily_searches {
        relational.decrement_daily_searches(owner).await?;
        return Ok(QuotaDecision::Exhausted);
    }
    Ok(QuotaDecision::Allowed {
        remaining: config.free_tier_daily_searches - used,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tri_store::relational::SqliteRelationalStore;

    #[tokio::test]
    async fn charges_succeed_until_the_daily_limit_then_reject() {
        let relational: Arc<dyn RelationalStore> = Arc::new(SqliteRelationalStore::open_in_memory().unwrap());
        let owner = Owner::new("u1", "p1");
        let config = QuotaConfig {
            free_tier_daily_searches: 2,
            free_tier_memory_cap: 100,
        };

        assert!(matches!(
            charge_search(&relational, &owner, &config).await.unwrap(),
            QuotaDecision::Allowed { remaining: 1 }
        ));
        assert!(matches!(
            charge_search(&relational, &owner, &config).await.unwrap(),
            QuotaDecision::Allowed { remaining: 0 }
        ));
        assert!(matches!(
            charge_search(&relational, &owner, &config).await.unwrap(),
            QuotaDecision::Exhausted
        ));
    }

    #[tokio::test]
    async fn a_rejected_call_leaves_the_counter_unchanged() {
        let relational: Arc<dyn RelationalStore> = Arc::new(SqliteRelationalStore::open_in_memory().unwrap());
        let owner = Owner::new("u1", "p1");
        let config = QuotaConfig {
            free_tier_daily_searches: 1,
            free_tier_memory_cap: 100,
        };

        charge_search(&relational, &owner, &config).await.unwrap();
        for _ in 0..5 {
            assert!(matches!(
                charge_search(&relational, &owner, &config).await.unwrap(),
                QuotaDecision::Exhausted
            ));
        }
        assert_eq!(relational.increment_and_get_daily_searches(&owner).await.unwrap(), 2);
    }
}

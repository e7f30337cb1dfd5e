//! # Wealth Aggregation
//!
//! Reduces a user's holdings to one wealth figure plus a per-category breakdown.
//! The breakdown is also what a new record snapshots at creation time.
//!
//! A partial total is never returned: if the holdings source fails, times out,
//! or reports an invalid value, aggregation fails as a whole.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::types::{AssetCategory, NisabError};

/// Current layout version of [`AssetBreakdown`].
pub const BREAKDOWN_SCHEMA_VERSION: u16 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BreakdownItem {
    pub asset_id: Uuid,
    pub name: String,
    pub value: Decimal,
}

/// Category → holdings snapshot. Captured once per record and never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssetBreakdown {
    pub schema_version: u16,
    pub categories: BTreeMap<AssetCategory, Vec<BreakdownItem>>,
}

impl Default for AssetBreakdown {
    fn default() -> Self {
        Self {
            schema_version: BREAKDOWN_SCHEMA_VERSION,
            categories: BTreeMap::new(),
        }
    }
}

impl AssetBreakdown {
    pub fn category_total(&self, category: AssetCategory) -> Decimal {
        self.categories
            .get(&category)
            .map(|items| items.iter().map(|i| i.value).sum())
            .unwrap_or(Decimal::ZERO)
    }

    pub fn total(&self) -> Decimal {
        self.categories.values().flatten().map(|i| i.value).sum()
    }

    pub fn asset_count(&self) -> usize {
        self.categories.values().map(Vec::len).sum()
    }
}

/// Aggregated wealth of one user at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WealthSummary {
    pub user_id: Uuid,
    pub total_wealth: Decimal,
    pub near_term_liabilities: Decimal,
    pub breakdown: AssetBreakdown,
}

#[cfg(feature = "async")]
pub use self::service::WealthAggregator;

#[cfg(feature = "async")]
mod service {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::holdings::{HoldingsSource, UserHoldings};

    pub struct WealthAggregator {
        source: Arc<dyn HoldingsSource>,
        timeout: Duration,
    }

    impl WealthAggregator {
        pub fn new(source: Arc<dyn HoldingsSource>, timeout: Duration) -> Self {
            Self { source, timeout }
        }

        #[tracing::instrument(skip(self))]
        pub async fn aggregate(&self, user_id: Uuid) -> Result<WealthSummary, NisabError> {
            let fetched = tokio::time::timeout(self.timeout, self.source.fetch_holdings(user_id)).await;

            let holdings = match fetched {
                Ok(Ok(holdings)) => holdings,
                Ok(Err(e)) => {
                    tracing::warn!(%user_id, error = %e, "holdings source failed");
                    return Err(NisabError::AggregationFailed {
                        user_id,
                        reason: e.to_string(),
                    });
                }
                Err(_) => {
                    tracing::warn!(%user_id, timeout = ?self.timeout, "holdings source timed out");
                    return Err(NisabError::AggregationFailed {
                        user_id,
                        reason: format!("holdings source did not answer within {:?}", self.timeout),
                    });
                }
            };

            summarize(user_id, holdings)
        }
    }

    fn summarize(user_id: Uuid, holdings: UserHoldings) -> Result<WealthSummary, NisabError> {
        if holdings.near_term_liabilities < Decimal::ZERO {
            return Err(NisabError::AggregationFailed {
                user_id,
                reason: "negative liabilities reported".to_string(),
            });
        }

        let mut breakdown = AssetBreakdown::default();
        let mut total_wealth = Decimal::ZERO;

        for asset in holdings.assets {
            if asset.value < Decimal::ZERO {
                return Err(NisabError::AggregationFailed {
                    user_id,
                    reason: format!("asset {} reported a negative value", asset.id),
                });
            }
            total_wealth = total_wealth.checked_add(asset.value).ok_or_else(|| NisabError::AggregationFailed {
                user_id,
                reason: "wealth total overflowed".to_string(),
            })?;
            breakdown.categories.entry(asset.category).or_default().push(BreakdownItem {
                asset_id: asset.id,
                name: asset.name,
                value: asset.value,
            });
        }

        Ok(WealthSummary {
            user_id,
            total_wealth,
            near_term_liabilities: holdings.near_term_liabilities,
            breakdown,
        })
    }
}

#[cfg(all(test, feature = "async"))]
mod tests {
    use super::*;
    use crate::holdings::{AssetHolding, HoldingsSource, StaticHoldings, UserHoldings};
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::time::Duration;

    struct SlowSource;

    #[async_trait::async_trait]
    impl HoldingsSource for SlowSource {
        async fn fetch_holdings(&self, _user_id: Uuid) -> Result<UserHoldings, NisabError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(UserHoldings::default())
        }
    }

    #[tokio::test]
    async fn test_groups_by_category() {
        let holdings = Arc::new(StaticHoldings::new());
        let user = Uuid::new_v4();
        holdings.add_asset(user, AssetHolding::new("Savings", AssetCategory::Cash, 3000).unwrap());
        holdings.add_asset(user, AssetHolding::new("Wallet", AssetCategory::Cash, 500).unwrap());
        holdings.add_asset(user, AssetHolding::new("Bars", AssetCategory::Gold, 4000).unwrap());
        holdings.set_liabilities(user, 700).unwrap();

        let aggregator = WealthAggregator::new(holdings, Duration::from_secs(5));
        let summary = aggregator.aggregate(user).await.unwrap();

        assert_eq!(summary.total_wealth, dec!(7500));
        assert_eq!(summary.near_term_liabilities, dec!(700));
        assert_eq!(summary.breakdown.category_total(AssetCategory::Cash), dec!(3500));
        assert_eq!(summary.breakdown.category_total(AssetCategory::Gold), dec!(4000));
        assert_eq!(summary.breakdown.asset_count(), 3);
        assert_eq!(summary.breakdown.total(), summary.total_wealth);
    }

    #[tokio::test]
    async fn test_unavailable_source_fails_instead_of_partial() {
        let holdings = Arc::new(StaticHoldings::new());
        let user = Uuid::new_v4();
        holdings.set_cash(user, 9000).unwrap();
        holdings.set_unavailable(user, true);

        let aggregator = WealthAggregator::new(holdings, Duration::from_secs(5));
        let err = aggregator.aggregate(user).await.unwrap_err();
        assert_eq!(err.code(), "AGGREGATION_FAILED");
    }

    #[tokio::test]
    async fn test_negative_value_fails() {
        let holdings = Arc::new(StaticHoldings::new());
        let user = Uuid::new_v4();
        holdings.add_asset(user, AssetHolding::new("Good", AssetCategory::Cash, 100).unwrap());
        holdings.add_asset(user, AssetHolding::new("Bad", AssetCategory::Cash, -5).unwrap());

        let aggregator = WealthAggregator::new(holdings, Duration::from_secs(5));
        assert!(matches!(
            aggregator.aggregate(user).await,
            Err(NisabError::AggregationFailed { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_bounded() {
        let aggregator = WealthAggregator::new(Arc::new(SlowSource), Duration::from_secs(2));
        let err = aggregator.aggregate(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, NisabError::AggregationFailed { .. }));
    }
}

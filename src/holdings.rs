//! Read-only boundary to the asset subsystem.
//!
//! The tracking engine never writes holdings. It only asks for a user's current
//! zakatable assets and near-term liabilities, and for the list of users to sweep.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;
use uuid::Uuid;

use crate::inputs::IntoMoney;
use crate::methodology::Methodology;
use crate::types::{AssetCategory, NisabError};

/// One zakatable asset and its current value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetHolding {
    pub id: Uuid,
    pub name: String,
    pub category: AssetCategory,
    pub value: Decimal,
}

impl AssetHolding {
    pub fn new(name: impl Into<String>, category: AssetCategory, value: impl IntoMoney) -> Result<Self, NisabError> {
        Ok(Self {
            id: Uuid::new_v4(),
            name: name.into(),
            category,
            value: value.into_money()?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserHoldings {
    pub assets: Vec<AssetHolding>,
    /// Debts falling due within the Hawl; deducted only by methodologies that allow it.
    pub near_term_liabilities: Decimal,
}

/// A user enrolled in background detection, with their chosen methodology.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: Uuid,
    pub methodology: Methodology,
}

#[async_trait::async_trait]
pub trait HoldingsSource: Send + Sync {
    /// Lists the user's current zakatable holdings.
    async fn fetch_holdings(&self, user_id: Uuid) -> Result<UserHoldings, NisabError>;
}

#[async_trait::async_trait]
pub trait UserDirectory: Send + Sync {
    async fn list_users(&self) -> Result<Vec<UserProfile>, NisabError>;
}

/// In-memory holdings store for tests and embedded use.
///
/// Implements both collaborator traits. Users can be marked unavailable to
/// simulate an upstream outage for that user only.
#[derive(Debug, Default)]
pub struct StaticHoldings {
    inner: RwLock<StaticHoldingsInner>,
}

#[derive(Debug, Default)]
struct StaticHoldingsInner {
    profiles: BTreeMap<Uuid, UserProfile>,
    holdings: BTreeMap<Uuid, UserHoldings>,
    unavailable: BTreeSet<Uuid>,
}

impl StaticHoldings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_user(&self, user_id: Uuid, methodology: Methodology) {
        if let Ok(mut inner) = self.inner.write() {
            inner.profiles.insert(user_id, UserProfile { user_id, methodology });
            inner.holdings.entry(user_id).or_default();
        }
    }

    pub fn set_holdings(&self, user_id: Uuid, holdings: UserHoldings) {
        if let Ok(mut inner) = self.inner.write() {
            inner.holdings.insert(user_id, holdings);
        }
    }

    pub fn add_asset(&self, user_id: Uuid, asset: AssetHolding) {
        if let Ok(mut inner) = self.inner.write() {
            inner.holdings.entry(user_id).or_default().assets.push(asset);
        }
    }

    /// Replaces every asset of the user with a single cash holding of `value`.
    pub fn set_cash(&self, user_id: Uuid, value: impl IntoMoney) -> Result<(), NisabError> {
        let asset = AssetHolding::new("Cash", AssetCategory::Cash, value)?;
        if let Ok(mut inner) = self.inner.write() {
            inner.holdings.entry(user_id).or_default().assets = vec![asset];
        }
        Ok(())
    }

    pub fn set_liabilities(&self, user_id: Uuid, value: impl IntoMoney) -> Result<(), NisabError> {
        let value = value.into_money()?;
        if let Ok(mut inner) = self.inner.write() {
            inner.holdings.entry(user_id).or_default().near_term_liabilities = value;
        }
        Ok(())
    }

    pub fn set_unavailable(&self, user_id: Uuid, unavailable: bool) {
        if let Ok(mut inner) = self.inner.write() {
            if unavailable {
                inner.unavailable.insert(user_id);
            } else {
                inner.unavailable.remove(&user_id);
            }
        }
    }
}

#[async_trait::async_trait]
impl HoldingsSource for StaticHoldings {
    async fn fetch_holdings(&self, user_id: Uuid) -> Result<UserHoldings, NisabError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| NisabError::storage("holdings lock poisoned"))?;
        if inner.unavailable.contains(&user_id) {
            return Err(NisabError::Network {
                message: "holdings service unavailable".to_string(),
            });
        }
        Ok(inner.holdings.get(&user_id).cloned().unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl UserDirectory for StaticHoldings {
    async fn list_users(&self) -> Result<Vec<UserProfile>, NisabError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| NisabError::storage("holdings lock poisoned"))?;
        Ok(inner.profiles.values().copied().collect())
    }
}

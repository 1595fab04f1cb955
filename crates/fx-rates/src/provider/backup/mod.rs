//! Pinned backup rates.
//!
//! A snapshot of monthly USD tables compiled into the binary. It is consulted
//! only for months whose API call failed outright. When the exact month is not
//! in the snapshot, the closest earlier month is used.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::errors::FxRateError;
use crate::models::{UsdRates, UsdRatesPayload};
use crate::provider::UsdRateProvider;

/// Provider ID constant
const PROVIDER_ID: &str = "BACKUP";

const PINNED_SNAPSHOT: &str = include_str!("../../../data/backup_fx_rates.json");

/// Monthly USD tables keyed by first-of-month date.
#[derive(Debug, Clone, Default)]
pub struct BackupRateTable {
    snapshots: BTreeMap<NaiveDate, UsdRates>,
}

impl BackupRateTable {
    /// Loads the snapshot shipped with the crate.
    pub fn pinned() -> Result<Self, FxRateError> {
        Self::from_json(PINNED_SNAPSHOT)
    }

    /// Parses `{"YYYY-MM-DD": {"usd": {"inr": 82.1, ...}}, ...}`.
    pub fn from_json(json: &str) -> Result<Self, FxRateError> {
        let raw: HashMap<String, UsdRatesPayload> =
            serde_json::from_str(json).map_err(|e| FxRateError::MalformedResponse {
                provider: PROVIDER_ID.to_string(),
                message: e.to_string(),
            })?;

        let mut snapshots = BTreeMap::new();
        for (key, payload) in raw {
            let month = NaiveDate::parse_from_str(&key, "%Y-%m-%d").map_err(|e| {
                FxRateError::MalformedResponse {
                    provider: PROVIDER_ID.to_string(),
                    message: format!("invalid snapshot month '{}': {}", key, e),
                }
            })?;
            snapshots.insert(month, UsdRates::from_payload(month, payload));
        }

        Ok(Self { snapshots })
    }

    pub fn from_snapshots(tables: impl IntoIterator<Item = UsdRates>) -> Self {
        Self {
            snapshots: tables.into_iter().map(|t| (t.date, t)).collect(),
        }
    }

    pub fn months(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.snapshots.keys().copied()
    }

    /// Snapshot for `month`, or the closest one before it.
    pub fn rates_for(&self, month: NaiveDate) -> Result<UsdRates, FxRateError> {
        let (snapshot_month, rates) = self
            .snapshots
            .range(..=month)
            .next_back()
            .ok_or(FxRateError::NoSnapshot(month))?;

        if *snapshot_month != month {
            log::warn!(
                "No backup rates for {}. Using snapshot from {}",
                month,
                snapshot_month
            );
        }
        Ok(rates.clone())
    }
}

#[async_trait]
impl UsdRateProvider for BackupRateTable {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    async fn get_usd_rates(&self, month: NaiveDate) -> Result<UsdRates, FxRateError> {
        self.rates_for(month)
    }
}

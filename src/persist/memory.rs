use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::persist::types::{
    Alert, AlertId, AlertKind, Asset, AssetId, NotificationMethod, PortfolioId, Recipient,
    StoreResult,
};
use crate::persist::AlertStore;

#[derive(Default)]
struct Tables {
    owners: HashMap<PortfolioId, Recipient>,
    assets: BTreeMap<AssetId, Asset>,
    alerts: BTreeMap<AlertId, Alert>,
    next_asset_id: AssetId,
    next_alert_id: AlertId,
}

/// In-process store used when no database is configured, and by tests.
/// Deleting an asset cascades to its alerts, as the relational schema does.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_owner(&self, portfolio_id: PortfolioId, recipient: Recipient) {
        self.tables.write().owners.insert(portfolio_id, recipient);
    }

    pub fn add_asset(&self, portfolio_id: PortfolioId, symbol: &str, quantity: Decimal, purchase_price: Decimal) -> Asset {
        let mut tables = self.tables.write();
        tables.next_asset_id += 1;
        let asset = Asset {
            id: tables.next_asset_id,
            portfolio_id,
            symbol: symbol.to_string(),
            asset_type: "stock".to_string(),
            quantity,
            purchase_price,
            created_at: Utc::now(),
            updated_at: None,
        };
        tables.assets.insert(asset.id, asset.clone());
        asset
    }

    pub fn add_alert(&self, asset_id: AssetId, alert_type: AlertKind, threshold_value: Decimal, method: NotificationMethod) -> Alert {
        let mut tables = self.tables.write();
        tables.next_alert_id += 1;
        let alert = Alert {
            id: tables.next_alert_id,
            asset_id,
            alert_type,
            threshold_value,
            is_active: true,
            notification_method: method,
            created_at: Utc::now(),
            updated_at: None,
        };
        tables.alerts.insert(alert.id, alert.clone());
        alert
    }

    pub fn set_alert_active(&self, alert_id: AlertId, is_active: bool) -> bool {
        let mut tables = self.tables.write();
        match tables.alerts.get_mut(&alert_id) {
            Some(alert) => {
                alert.is_active = is_active;
                alert.updated_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    pub fn remove_asset(&self, asset_id: AssetId) -> bool {
        let mut tables = self.tables.write();
        let removed = tables.assets.remove(&asset_id).is_some();
        if removed {
            tables.alerts.retain(|_, alert| alert.asset_id != asset_id);
        }
        removed
    }
}

#[async_trait::async_trait]
impl AlertStore for MemoryStore {
    async fn assets_by_symbol(&self, symbol: &str) -> StoreResult<Vec<Asset>> {
        let tables = self.tables.read();
        Ok(tables
            .assets
            .values()
            .filter(|asset| asset.symbol == symbol)
            .cloned()
            .collect())
    }

    async fn active_alerts_for_asset(&self, asset_id: AssetId) -> StoreResult<Vec<Alert>> {
        let tables = self.tables.read();
        Ok(tables
            .alerts
            .values()
            .filter(|alert| alert.asset_id == asset_id && alert.is_active)
            .cloned()
            .collect())
    }

    async fn alert_by_id(&self, alert_id: AlertId) -> StoreResult<Option<Alert>> {
        Ok(self.tables.read().alerts.get(&alert_id).cloned())
    }

    async fn recipient_for_portfolio(&self, portfolio_id: PortfolioId) -> StoreResult<Option<Recipient>> {
        Ok(self.tables.read().owners.get(&portfolio_id).cloned())
    }

    async fn tracked_symbols(&self) -> StoreResult<Vec<String>> {
        let tables = self.tables.read();
        let symbols: BTreeSet<String> = tables.assets.values().map(|a| a.symbol.clone()).collect();
        Ok(symbols.into_iter().collect())
    }
}

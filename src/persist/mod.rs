pub mod types;
pub use types::*;
pub mod memory;
pub mod postgres;
use async_trait::async_trait;

/// Read side of the portfolio store used by the alert pipeline.
///
/// Lookups by symbol are deliberately not scoped to a user: alerts belong to
/// assets, and every asset holding the symbol is evaluated for every price.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn assets_by_symbol(&self, symbol: &str) -> StoreResult<Vec<Asset>>;
    async fn active_alerts_for_asset(&self, asset_id: AssetId) -> StoreResult<Vec<Alert>>;
    async fn alert_by_id(&self, alert_id: AlertId) -> StoreResult<Option<Alert>>;
    async fn recipient_for_portfolio(&self, portfolio_id: PortfolioId) -> StoreResult<Option<Recipient>>;
    /// Distinct symbols of all held assets, used to seed tracking at startup.
    async fn tracked_symbols(&self) -> StoreResult<Vec<String>>;
}

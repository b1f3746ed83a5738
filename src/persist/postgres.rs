use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, instrument};

use crate::persist::types::{
    Alert, AlertId, AlertKind, Asset, AssetId, NotificationMethod, PortfolioId, Recipient,
    StoreError, StoreResult,
};
use crate::persist::AlertStore;

/// Postgres-backed store. Schema lives in `migrations/0001_portfolio.sql`;
/// money columns are read as NUMERIC so they decode straight into `Decimal`.
pub struct PostgresStore {
    connection_pool: sqlx::PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { connection_pool: pool })
    }

    /// Apply pending migrations from `migrations/`.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.connection_pool)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

fn asset_from_row(row: &PgRow) -> StoreResult<Asset> {
    Ok(Asset {
        id: row.try_get("id")?,
        portfolio_id: row.try_get("portfolio_id")?,
        symbol: row.try_get("symbol")?,
        asset_type: row.try_get::<Option<String>, _>("asset_type")?.unwrap_or_default(),
        quantity: row.try_get("quantity")?,
        purchase_price: row.try_get("purchase_price")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn alert_from_row(row: &PgRow) -> StoreResult<Alert> {
    let alert_type: String = row.try_get("alert_type")?;
    let method: Option<String> = row.try_get("notification_method")?;
    Ok(Alert {
        id: row.try_get("id")?,
        asset_id: row.try_get("asset_id")?,
        alert_type: AlertKind::parse(&alert_type),
        threshold_value: row.try_get("threshold_value")?,
        is_active: row.try_get("is_active")?,
        notification_method: method
            .as_deref()
            .map(NotificationMethod::from)
            .unwrap_or(NotificationMethod::Dashboard),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait::async_trait]
impl AlertStore for PostgresStore {
    #[instrument(skip(self))]
    async fn assets_by_symbol(&self, symbol: &str) -> StoreResult<Vec<Asset>> {
        let rows = sqlx::query(
            r#"
            SELECT id, portfolio_id, symbol, asset_type,
                   quantity::numeric AS quantity,
                   purchase_price::numeric AS purchase_price,
                   created_at, updated_at
            FROM assets
            WHERE symbol = $1
            "#,
        )
        .bind(symbol)
        .fetch_all(&self.connection_pool)
        .await?;

        debug!(count = rows.len(), "loaded assets");
        rows.iter().map(asset_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn active_alerts_for_asset(&self, asset_id: AssetId) -> StoreResult<Vec<Alert>> {
        let rows = sqlx::query(
            r#"
            SELECT id, asset_id, alert_type,
                   threshold_value::numeric AS threshold_value,
                   is_active, notification_method, created_at, updated_at
            FROM alerts
            WHERE asset_id = $1 AND is_active = TRUE
            "#,
        )
        .bind(asset_id)
        .fetch_all(&self.connection_pool)
        .await?;

        rows.iter().map(alert_from_row).collect()
    }

    async fn alert_by_id(&self, alert_id: AlertId) -> StoreResult<Option<Alert>> {
        let row = sqlx::query(
            r#"
            SELECT id, asset_id, alert_type,
                   threshold_value::numeric AS threshold_value,
                   is_active, notification_method, created_at, updated_at
            FROM alerts
            WHERE id = $1
            "#,
        )
        .bind(alert_id)
        .fetch_optional(&self.connection_pool)
        .await?;

        row.as_ref().map(alert_from_row).transpose()
    }

    async fn recipient_for_portfolio(&self, portfolio_id: PortfolioId) -> StoreResult<Option<Recipient>> {
        let row = sqlx::query(
            r#"
            SELECT u.id AS user_id, u.email AS email
            FROM portfolios p
            JOIN users u ON u.id = p.user_id
            WHERE p.id = $1
            "#,
        )
        .bind(portfolio_id)
        .fetch_optional(&self.connection_pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Recipient {
                user_id: row.try_get("user_id")?,
                email: row.try_get("email")?,
            })),
            None => Ok(None),
        }
    }

    async fn tracked_symbols(&self) -> StoreResult<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT symbol FROM assets WHERE symbol IS NOT NULL ORDER BY symbol")
            .fetch_all(&self.connection_pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("symbol").map_err(Into::into))
            .collect()
    }
}

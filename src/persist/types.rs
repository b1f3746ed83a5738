use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type UserId = i32;
pub type PortfolioId = i32;
pub type AssetId = i32;
pub type AlertId = i32;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("failed to decode {entity} row: {reason}")]
    Decode { entity: &'static str, reason: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::ColumnDecode { index, source } => StoreError::Decode {
                entity: "column",
                reason: format!("{index}: {source}"),
            },
            sqlx::Error::ColumnNotFound(col) => StoreError::Decode {
                entity: "column",
                reason: format!("missing column {col}"),
            },
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Rule an alert is evaluated with. Stored as free text, so anything that is
/// not one of the known rules is kept verbatim in `Other` and never fires.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AlertKind {
    PriceAbove,
    PriceBelow,
    PriceChangePercent,
    Other(String),
}

impl AlertKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "price_above" => AlertKind::PriceAbove,
            "price_below" => AlertKind::PriceBelow,
            "price_change_percent" => AlertKind::PriceChangePercent,
            other => AlertKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            AlertKind::PriceAbove => "price_above",
            AlertKind::PriceBelow => "price_below",
            AlertKind::PriceChangePercent => "price_change_percent",
            AlertKind::Other(raw) => raw,
        }
    }
}

impl From<String> for AlertKind {
    fn from(raw: String) -> Self {
        AlertKind::parse(&raw)
    }
}

impl From<AlertKind> for String {
    fn from(kind: AlertKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery channel for a triggered alert. Unknown stored values fall back to
/// the dashboard, which every user can see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationMethod {
    Email,
    Sms,
    Dashboard,
}

impl NotificationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationMethod::Email => "email",
            NotificationMethod::Sms => "sms",
            NotificationMethod::Dashboard => "dashboard",
        }
    }
}

impl From<&str> for NotificationMethod {
    fn from(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "email" => NotificationMethod::Email,
            "sms" => NotificationMethod::Sms,
            _ => NotificationMethod::Dashboard,
        }
    }
}

impl fmt::Display for NotificationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    pub portfolio_id: PortfolioId,
    pub symbol: String,
    pub asset_type: String,
    pub quantity: Decimal,
    pub purchase_price: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub asset_id: AssetId,
    pub alert_type: AlertKind,
    pub threshold_value: Decimal,
    pub is_active: bool,
    pub notification_method: NotificationMethod,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Owner of the portfolio an alert belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub user_id: UserId,
    pub email: Option<String>,
}

//! Canonical server entities mirrored by clients.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, ValidationError};

/// Entity collections that participate in pull, push and the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Products,
    Orders,
    CashSessions,
    Cuts,
    CoworkingSessions,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Products,
        Collection::Orders,
        Collection::CashSessions,
        Collection::Cuts,
        Collection::CoworkingSessions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Products => "products",
            Collection::Orders => "orders",
            Collection::CashSessions => "cash_sessions",
            Collection::Cuts => "cuts",
            Collection::CoworkingSessions => "coworking_sessions",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Collection::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == value)
            .ok_or_else(|| {
                Error::Validation(ValidationError::invalid(format!(
                    "Unknown collection '{}'",
                    value
                )))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    pub price: Decimal,
    pub stock: i64,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Transfer => "transfer",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "cash" => Ok(PaymentMethod::Cash),
            "card" => Ok(PaymentMethod::Card),
            "transfer" => Ok(PaymentMethod::Transfer),
            other => Err(Error::Validation(ValidationError::invalid(format!(
                "Unknown payment method '{}'",
                other
            )))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub product_id: String,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub cash_session_id: Option<String>,
    pub payment_method: PaymentMethod,
    pub lines: Vec<OrderLine>,
    pub total: Decimal,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CashSessionStatus {
    Open,
    Closed,
}

impl CashSessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CashSessionStatus::Open => "open",
            CashSessionStatus::Closed => "closed",
        }
    }
}

impl FromStr for CashSessionStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "open" => Ok(CashSessionStatus::Open),
            "closed" => Ok(CashSessionStatus::Closed),
            other => Err(Error::unexpected(format!(
                "Unknown cash session status '{}'",
                other
            ))),
        }
    }
}

/// A cash register session, from opening float to close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashSession {
    pub id: String,
    pub status: CashSessionStatus,
    pub opening_float: Decimal,
    pub opened_at: String,
    pub closed_at: Option<String>,
    pub expected_cash: Option<Decimal>,
    pub counted_cash: Option<Decimal>,
    pub difference: Option<Decimal>,
}

/// A mid-session cash count ("cut").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cut {
    pub id: String,
    pub cash_session_id: String,
    pub counted_amount: Decimal,
    pub expected_amount: Decimal,
    pub difference: Decimal,
    pub note: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoworkingStatus {
    Active,
    Ended,
}

impl CoworkingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoworkingStatus::Active => "active",
            CoworkingStatus::Ended => "ended",
        }
    }
}

impl FromStr for CoworkingStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(CoworkingStatus::Active),
            "ended" => Ok(CoworkingStatus::Ended),
            other => Err(Error::unexpected(format!(
                "Unknown coworking status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoworkingSession {
    pub id: String,
    pub customer_name: String,
    pub hourly_rate: Decimal,
    pub status: CoworkingStatus,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub billed_minutes: Option<i64>,
    pub amount: Option<Decimal>,
}

/// Billed minutes are rounded up and never below one. `None` when the
/// amount does not fit a decimal.
pub fn coworking_charge(hourly_rate: Decimal, elapsed_seconds: i64) -> Option<(i64, Decimal)> {
    let minutes = (elapsed_seconds.max(0).saturating_add(59) / 60).max(1);
    let amount = hourly_rate.checked_mul(Decimal::from(minutes))? / Decimal::from(60);
    Some((minutes, amount.round_dp(2)))
}

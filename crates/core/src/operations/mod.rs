//! Closed catalogue of mutating operations.
//!
//! Every state change travels as one [`OperationPayload`] variant, so the
//! server can validate it exhaustively and the client can derive its stream,
//! endpoint and body from the same value.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::entities::PaymentMethod;
use crate::errors::{Error, Result, ValidationError};
use crate::utils::time::parse_rfc3339;

const MAX_ID_LEN: usize = 64;
const MAX_ORDER_LINES: usize = 200;
const MAX_NAME_LEN: usize = 120;
/// Upper bound for any money field, in currency units.
const MAX_MONEY_UNITS: i64 = 1_000_000_000;
const MAX_STOCK: i64 = 1_000_000_000;
const MAX_LINE_QUANTITY: i64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    #[serde(rename = "product.upsert")]
    ProductUpsert,
    #[serde(rename = "order.create")]
    OrderCreate,
    #[serde(rename = "session.open")]
    SessionOpen,
    #[serde(rename = "session.close")]
    SessionClose,
    #[serde(rename = "cut.create")]
    CutCreate,
    #[serde(rename = "coworking.start")]
    CoworkingStart,
    #[serde(rename = "coworking.end")]
    CoworkingEnd,
}

impl OperationType {
    pub const ALL: [OperationType; 7] = [
        OperationType::ProductUpsert,
        OperationType::OrderCreate,
        OperationType::SessionOpen,
        OperationType::SessionClose,
        OperationType::CutCreate,
        OperationType::CoworkingStart,
        OperationType::CoworkingEnd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::ProductUpsert => "product.upsert",
            OperationType::OrderCreate => "order.create",
            OperationType::SessionOpen => "session.open",
            OperationType::SessionClose => "session.close",
            OperationType::CutCreate => "cut.create",
            OperationType::CoworkingStart => "coworking.start",
            OperationType::CoworkingEnd => "coworking.end",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        OperationType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == value)
            .ok_or_else(|| {
                Error::Validation(ValidationError::invalid(format!(
                    "Unknown operation type '{}'",
                    value
                )))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Post,
    Put,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
        }
    }
}

impl FromStr for HttpMethod {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            other => Err(Error::unexpected(format!("Unsupported method '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductUpsertInput {
    pub product_id: String,
    pub name: String,
    pub price: Decimal,
    pub stock: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineInput {
    pub product_id: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreateInput {
    pub order_id: String,
    #[serde(default)]
    pub cash_session_id: Option<String>,
    pub payment_method: PaymentMethod,
    pub lines: Vec<OrderLineInput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOpenInput {
    pub session_id: String,
    pub opening_float: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCloseInput {
    pub session_id: String,
    pub counted_cash: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CutCreateInput {
    pub cut_id: String,
    pub session_id: String,
    pub counted_amount: Decimal,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoworkingStartInput {
    pub coworking_session_id: String,
    pub customer_name: String,
    pub hourly_rate: Decimal,
    pub started_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoworkingEndInput {
    pub coworking_session_id: String,
    pub ended_at: String,
}

/// A typed mutating operation, tagged by its operation type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum OperationPayload {
    #[serde(rename = "product.upsert")]
    ProductUpsert(ProductUpsertInput),
    #[serde(rename = "order.create")]
    OrderCreate(OrderCreateInput),
    #[serde(rename = "session.open")]
    SessionOpen(SessionOpenInput),
    #[serde(rename = "session.close")]
    SessionClose(SessionCloseInput),
    #[serde(rename = "cut.create")]
    CutCreate(CutCreateInput),
    #[serde(rename = "coworking.start")]
    CoworkingStart(CoworkingStartInput),
    #[serde(rename = "coworking.end")]
    CoworkingEnd(CoworkingEndInput),
}

impl OperationPayload {
    pub fn operation_type(&self) -> OperationType {
        match self {
            OperationPayload::ProductUpsert(_) => OperationType::ProductUpsert,
            OperationPayload::OrderCreate(_) => OperationType::OrderCreate,
            OperationPayload::SessionOpen(_) => OperationType::SessionOpen,
            OperationPayload::SessionClose(_) => OperationType::SessionClose,
            OperationPayload::CutCreate(_) => OperationType::CutCreate,
            OperationPayload::CoworkingStart(_) => OperationType::CoworkingStart,
            OperationPayload::CoworkingEnd(_) => OperationType::CoworkingEnd,
        }
    }

    /// Ordering scope: operations sharing a stream key are delivered in
    /// enqueue order.
    pub fn stream_key(&self) -> String {
        match self {
            OperationPayload::ProductUpsert(input) => format!("product:{}", input.product_id),
            OperationPayload::OrderCreate(input) => match &input.cash_session_id {
                Some(session_id) => format!("cash_session:{}", session_id),
                None => format!("order:{}", input.order_id),
            },
            OperationPayload::SessionOpen(input) => format!("cash_session:{}", input.session_id),
            OperationPayload::SessionClose(input) => format!("cash_session:{}", input.session_id),
            OperationPayload::CutCreate(input) => format!("cash_session:{}", input.session_id),
            OperationPayload::CoworkingStart(input) => {
                format!("coworking:{}", input.coworking_session_id)
            }
            OperationPayload::CoworkingEnd(input) => {
                format!("coworking:{}", input.coworking_session_id)
            }
        }
    }

    /// HTTP method and path (relative to the API root) serving this operation.
    pub fn endpoint(&self) -> (HttpMethod, String) {
        match self {
            OperationPayload::ProductUpsert(input) => (
                HttpMethod::Put,
                format!("/api/v1/products/{}", input.product_id),
            ),
            OperationPayload::OrderCreate(_) => (HttpMethod::Post, "/api/v1/orders".to_string()),
            OperationPayload::SessionOpen(_) => {
                (HttpMethod::Post, "/api/v1/cash-sessions".to_string())
            }
            OperationPayload::SessionClose(input) => (
                HttpMethod::Post,
                format!("/api/v1/cash-sessions/{}/close", input.session_id),
            ),
            OperationPayload::CutCreate(input) => (
                HttpMethod::Post,
                format!("/api/v1/cash-sessions/{}/cuts", input.session_id),
            ),
            OperationPayload::CoworkingStart(_) => {
                (HttpMethod::Post, "/api/v1/coworking-sessions".to_string())
            }
            OperationPayload::CoworkingEnd(input) => (
                HttpMethod::Post,
                format!(
                    "/api/v1/coworking-sessions/{}/end",
                    input.coworking_session_id
                ),
            ),
        }
    }

    /// Request body sent to [`Self::endpoint`]: the variant's input alone.
    pub fn body(&self) -> Result<serde_json::Value> {
        let value = match self {
            OperationPayload::ProductUpsert(input) => serde_json::to_value(input)?,
            OperationPayload::OrderCreate(input) => serde_json::to_value(input)?,
            OperationPayload::SessionOpen(input) => serde_json::to_value(input)?,
            OperationPayload::SessionClose(input) => serde_json::to_value(input)?,
            OperationPayload::CutCreate(input) => serde_json::to_value(input)?,
            OperationPayload::CoworkingStart(input) => serde_json::to_value(input)?,
            OperationPayload::CoworkingEnd(input) => serde_json::to_value(input)?,
        };
        Ok(value)
    }

    /// Rebuild a payload from its operation type and request body.
    pub fn from_body(operation_type: OperationType, body: serde_json::Value) -> Result<Self> {
        let payload = match operation_type {
            OperationType::ProductUpsert => {
                OperationPayload::ProductUpsert(serde_json::from_value(body)?)
            }
            OperationType::OrderCreate => OperationPayload::OrderCreate(serde_json::from_value(body)?),
            OperationType::SessionOpen => OperationPayload::SessionOpen(serde_json::from_value(body)?),
            OperationType::SessionClose => {
                OperationPayload::SessionClose(serde_json::from_value(body)?)
            }
            OperationType::CutCreate => OperationPayload::CutCreate(serde_json::from_value(body)?),
            OperationType::CoworkingStart => {
                OperationPayload::CoworkingStart(serde_json::from_value(body)?)
            }
            OperationType::CoworkingEnd => {
                OperationPayload::CoworkingEnd(serde_json::from_value(body)?)
            }
        };
        Ok(payload)
    }

    /// SHA-256 over the canonical serialization; identifies "the same request".
    pub fn fingerprint(&self) -> Result<String> {
        let canonical = serde_json::to_vec(self)?;
        let digest = Sha256::digest(&canonical);
        Ok(format!("sha256:{:x}", digest))
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            OperationPayload::ProductUpsert(input) => {
                validate_id("productId", &input.product_id)?;
                validate_name("name", &input.name)?;
                validate_money("price", input.price)?;
                if input.stock < 0 {
                    return Err(invalid("stock must not be negative"));
                }
                if input.stock > MAX_STOCK {
                    return Err(invalid(format!("stock must not exceed {}", MAX_STOCK)));
                }
            }
            OperationPayload::OrderCreate(input) => {
                validate_id("orderId", &input.order_id)?;
                if let Some(session_id) = &input.cash_session_id {
                    validate_id("cashSessionId", session_id)?;
                }
                if input.lines.is_empty() {
                    return Err(Error::Validation(ValidationError::MissingField(
                        "lines".to_string(),
                    )));
                }
                if input.lines.len() > MAX_ORDER_LINES {
                    return Err(invalid(format!(
                        "an order holds at most {} lines",
                        MAX_ORDER_LINES
                    )));
                }
                for line in &input.lines {
                    validate_id("productId", &line.product_id)?;
                    if line.quantity <= 0 {
                        return Err(invalid(format!(
                            "quantity for product {} must be positive",
                            line.product_id
                        )));
                    }
                    if line.quantity > MAX_LINE_QUANTITY {
                        return Err(invalid(format!(
                            "quantity for product {} must not exceed {}",
                            line.product_id, MAX_LINE_QUANTITY
                        )));
                    }
                }
            }
            OperationPayload::SessionOpen(input) => {
                validate_id("sessionId", &input.session_id)?;
                validate_money("openingFloat", input.opening_float)?;
            }
            OperationPayload::SessionClose(input) => {
                validate_id("sessionId", &input.session_id)?;
                validate_money("countedCash", input.counted_cash)?;
            }
            OperationPayload::CutCreate(input) => {
                validate_id("cutId", &input.cut_id)?;
                validate_id("sessionId", &input.session_id)?;
                validate_money("countedAmount", input.counted_amount)?;
            }
            OperationPayload::CoworkingStart(input) => {
                validate_id("coworkingSessionId", &input.coworking_session_id)?;
                validate_name("customerName", &input.customer_name)?;
                validate_money("hourlyRate", input.hourly_rate)?;
                parse_rfc3339(&input.started_at)?;
            }
            OperationPayload::CoworkingEnd(input) => {
                validate_id("coworkingSessionId", &input.coworking_session_id)?;
                parse_rfc3339(&input.ended_at)?;
            }
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::Validation(ValidationError::invalid(message))
}

fn validate_id(field: &str, value: &str) -> Result<()> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation(ValidationError::MissingField(
            field.to_string(),
        )));
    }
    if trimmed.len() != value.len() || value.len() > MAX_ID_LEN {
        return Err(invalid(format!("{} is not a valid identifier", field)));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(invalid(format!("{} contains unsupported characters", field)));
    }
    Ok(())
}

fn validate_name(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(ValidationError::MissingField(
            field.to_string(),
        )));
    }
    if value.chars().count() > MAX_NAME_LEN {
        return Err(invalid(format!("{} is too long", field)));
    }
    Ok(())
}

fn validate_money(field: &str, value: Decimal) -> Result<()> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(invalid(format!("{} must not be negative", field)));
    }
    if value.scale() > 2 && value != value.round_dp(2) {
        return Err(invalid(format!("{} has more than two decimals", field)));
    }
    if value > Decimal::from(MAX_MONEY_UNITS) {
        return Err(invalid(format!("{} must not exceed {}", field, MAX_MONEY_UNITS)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(session: Option<&str>) -> OperationPayload {
        OperationPayload::OrderCreate(OrderCreateInput {
            order_id: "ord-1".to_string(),
            cash_session_id: session.map(str::to_string),
            payment_method: PaymentMethod::Cash,
            lines: vec![OrderLineInput {
                product_id: "coffee".to_string(),
                quantity: 2,
            }],
        })
    }

    #[test]
    fn payload_tag_matches_operation_type() {
        let json = serde_json::to_value(order(None)).expect("serialize");
        assert_eq!(json["type"], "order.create");
        assert_eq!(json["payload"]["orderId"], "ord-1");

        for op in OperationType::ALL {
            let tag = serde_json::to_string(&op).expect("serialize");
            assert_eq!(tag, format!("\"{}\"", op.as_str()));
            assert_eq!(op.as_str().parse::<OperationType>().expect("parse"), op);
        }
    }

    #[test]
    fn session_operations_share_one_stream() {
        let open = OperationPayload::SessionOpen(SessionOpenInput {
            session_id: "s-1".to_string(),
            opening_float: dec!(100),
        });
        let close = OperationPayload::SessionClose(SessionCloseInput {
            session_id: "s-1".to_string(),
            counted_cash: dec!(140),
        });
        assert_eq!(open.stream_key(), "cash_session:s-1");
        assert_eq!(order(Some("s-1")).stream_key(), open.stream_key());
        assert_eq!(close.stream_key(), open.stream_key());
        assert_eq!(order(None).stream_key(), "order:ord-1");
    }

    #[test]
    fn body_round_trips_through_from_body() {
        let payload = order(Some("s-9"));
        let body = payload.body().expect("body");
        assert!(body.get("type").is_none());
        let rebuilt = OperationPayload::from_body(OperationType::OrderCreate, body).expect("rebuild");
        assert_eq!(rebuilt, payload);
    }

    #[test]
    fn fingerprint_distinguishes_payloads() {
        let a = order(None).fingerprint().expect("fp");
        let b = order(Some("s-1")).fingerprint().expect("fp");
        assert!(a.starts_with("sha256:"));
        assert_eq!(a, order(None).fingerprint().expect("fp"));
        assert_ne!(a, b);
    }

    #[test]
    fn order_without_lines_is_invalid() {
        let payload = OperationPayload::OrderCreate(OrderCreateInput {
            order_id: "ord-2".to_string(),
            cash_session_id: None,
            payment_method: PaymentMethod::Card,
            lines: vec![],
        });
        assert!(matches!(
            payload.validate(),
            Err(Error::Validation(ValidationError::MissingField(_)))
        ));
    }

    #[test]
    fn rejects_zero_quantity_and_negative_money() {
        let mut bad_line = order(None);
        if let OperationPayload::OrderCreate(input) = &mut bad_line {
            input.lines[0].quantity = 0;
        }
        assert!(bad_line.validate().is_err());

        let negative = OperationPayload::SessionOpen(SessionOpenInput {
            session_id: "s-1".to_string(),
            opening_float: dec!(-5),
        });
        assert!(negative.validate().is_err());

        let fractional = OperationPayload::SessionOpen(SessionOpenInput {
            session_id: "s-1".to_string(),
            opening_float: dec!(10.005),
        });
        assert!(fractional.validate().is_err());
    }

    #[test]
    fn rejects_amounts_beyond_ledger_limits() {
        let product = |price, stock| {
            OperationPayload::ProductUpsert(ProductUpsertInput {
                product_id: "p-1".to_string(),
                name: "Coffee".to_string(),
                price,
                stock,
            })
        };
        assert!(product(dec!(1000000000), 1_000_000_000).validate().is_ok());
        assert!(product(dec!(1000000000000), 1).validate().is_err());
        assert!(product(dec!(1), 1_000_000_000_000_000_000).validate().is_err());

        let mut huge_line = order(None);
        if let OperationPayload::OrderCreate(input) = &mut huge_line {
            input.lines[0].quantity = 1_000_000_000_000_000_000;
        }
        assert!(huge_line.validate().is_err());
    }

    #[test]
    fn rejects_ids_that_cannot_appear_in_paths() {
        let payload = OperationPayload::SessionClose(SessionCloseInput {
            session_id: "s/1".to_string(),
            counted_cash: dec!(1),
        });
        assert!(payload.validate().is_err());
    }

    #[test]
    fn endpoints_embed_entity_ids() {
        let cut = OperationPayload::CutCreate(CutCreateInput {
            cut_id: "c-1".to_string(),
            session_id: "s-1".to_string(),
            counted_amount: dec!(50),
            note: None,
        });
        assert_eq!(
            cut.endpoint(),
            (HttpMethod::Post, "/api/v1/cash-sessions/s-1/cuts".to_string())
        );
    }
}

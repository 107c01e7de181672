//! Business effects of each operation, applied on the writer connection.
//!
//! Every function here runs inside the caller's transaction and returns the
//! entity it produced plus the changes to broadcast after commit.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use rust_decimal::Decimal;
use serde_json::Value;

use tillsync_core::entities::{
    coworking_charge, CashSession, CashSessionStatus, Collection, CoworkingSession,
    CoworkingStatus, Cut, Order, OrderLine, PaymentMethod, Product,
};
use tillsync_core::errors::{BusinessRejection, Error, Result, ValidationError};
use tillsync_core::events::{ChangeAction, EntityChange};
use tillsync_core::operations::{
    CoworkingEndInput, CoworkingStartInput, CutCreateInput, OperationPayload, OrderCreateInput,
    ProductUpsertInput, SessionCloseInput, SessionOpenInput,
};
use tillsync_core::utils::time::{parse_rfc3339, to_rfc3339};

use super::model::{
    CashSessionDB, CoworkingSessionDB, CutDB, OrderDB, OrderLineDB, ProductDB,
};
use crate::errors::StorageError;
use crate::schema::{cash_sessions, coworking_sessions, cuts, order_lines, orders, products};
use crate::utils::{decimal_from_db, decimal_to_db};

fn out_of_range(what: &str) -> Error {
    Error::Validation(ValidationError::invalid(format!("{} is out of range", what)))
}

/// Result entity of one operation and the changes it made.
#[derive(Debug, Clone)]
pub struct AppliedOperation {
    pub result: Value,
    pub changes: Vec<EntityChange>,
}

impl AppliedOperation {
    fn new<T: serde::Serialize>(entity: &T, changes: Vec<EntityChange>) -> Result<Self> {
        Ok(Self {
            result: serde_json::to_value(entity)?,
            changes,
        })
    }
}

pub fn apply_operation_tx(
    conn: &mut SqliteConnection,
    payload: &OperationPayload,
    now: DateTime<Utc>,
) -> Result<AppliedOperation> {
    match payload {
        OperationPayload::ProductUpsert(input) => upsert_product(conn, input, now),
        OperationPayload::OrderCreate(input) => create_order(conn, input, now),
        OperationPayload::SessionOpen(input) => open_session(conn, input, now),
        OperationPayload::SessionClose(input) => close_session(conn, input, now),
        OperationPayload::CutCreate(input) => create_cut(conn, input, now),
        OperationPayload::CoworkingStart(input) => start_coworking(conn, input, now),
        OperationPayload::CoworkingEnd(input) => end_coworking(conn, input, now),
    }
}

fn duplicate(collection: Collection, entity_id: &str) -> Error {
    Error::Rejected(BusinessRejection::DuplicateEntity {
        collection: collection.as_str().to_string(),
        entity_id: entity_id.to_string(),
    })
}

fn load_product(conn: &mut SqliteConnection, product_id: &str) -> Result<Option<ProductDB>> {
    Ok(products::table
        .find(product_id)
        .first::<ProductDB>(conn)
        .optional()
        .map_err(StorageError::from)?)
}

fn load_session(conn: &mut SqliteConnection, session_id: &str) -> Result<Option<CashSessionDB>> {
    Ok(cash_sessions::table
        .find(session_id)
        .first::<CashSessionDB>(conn)
        .optional()
        .map_err(StorageError::from)?)
}

/// Load a session that must currently be open.
fn load_open_session(conn: &mut SqliteConnection, session_id: &str) -> Result<CashSession> {
    let session = load_session(conn, session_id)?
        .map(CashSessionDB::into_domain)
        .transpose()?;
    match session {
        Some(session) if session.status == CashSessionStatus::Open => Ok(session),
        _ => Err(Error::Rejected(BusinessRejection::SessionNotOpen {
            session_id: session_id.to_string(),
        })),
    }
}

/// Opening float plus cash taken by orders of the session.
fn expected_cash(conn: &mut SqliteConnection, session: &CashSession) -> Result<Decimal> {
    let totals = orders::table
        .filter(orders::cash_session_id.eq(&session.id))
        .filter(orders::payment_method.eq(PaymentMethod::Cash.as_str()))
        .select(orders::total)
        .load::<String>(conn)
        .map_err(StorageError::from)?;
    totals
        .iter()
        .try_fold(session.opening_float, |acc, total| -> Result<Decimal> {
            acc.checked_add(decimal_from_db(total)?)
                .ok_or_else(|| out_of_range("expected cash"))
        })
}

fn upsert_product(
    conn: &mut SqliteConnection,
    input: &ProductUpsertInput,
    now: DateTime<Utc>,
) -> Result<AppliedOperation> {
    let existed = load_product(conn, &input.product_id)?.is_some();
    let product = Product {
        id: input.product_id.clone(),
        name: input.name.trim().to_string(),
        price: input.price,
        stock: input.stock,
        updated_at: to_rfc3339(now),
    };
    let row = ProductDB::from_domain(&product);
    diesel::insert_into(products::table)
        .values(&row)
        .on_conflict(products::id)
        .do_update()
        .set(&row)
        .execute(conn)
        .map_err(StorageError::from)?;

    let action = if existed {
        ChangeAction::Update
    } else {
        ChangeAction::Create
    };
    let stored = load_product(conn, &product.id)?
        .ok_or_else(|| Error::unexpected("product vanished after upsert"))?
        .into_domain()?;
    AppliedOperation::new(
        &stored,
        vec![EntityChange::new(Collection::Products, action, stored.id.clone())],
    )
}

fn create_order(
    conn: &mut SqliteConnection,
    input: &OrderCreateInput,
    now: DateTime<Utc>,
) -> Result<AppliedOperation> {
    let exists = orders::table
        .find(&input.order_id)
        .select(orders::id)
        .first::<String>(conn)
        .optional()
        .map_err(StorageError::from)?;
    if exists.is_some() {
        return Err(duplicate(Collection::Orders, &input.order_id));
    }

    if let Some(session_id) = &input.cash_session_id {
        load_open_session(conn, session_id)?;
    }

    // Same product on several lines is checked against stock once.
    let mut requested: BTreeMap<&str, i64> = BTreeMap::new();
    for line in &input.lines {
        let entry = requested.entry(line.product_id.as_str()).or_insert(0);
        *entry = entry
            .checked_add(line.quantity)
            .ok_or_else(|| out_of_range("order quantity"))?;
    }

    let mut prices: BTreeMap<&str, Decimal> = BTreeMap::new();
    for (product_id, quantity) in &requested {
        let product = load_product(conn, product_id)?
            .ok_or_else(|| {
                Error::Rejected(BusinessRejection::UnknownProduct {
                    product_id: product_id.to_string(),
                })
            })?
            .into_domain()?;
        if product.stock < *quantity {
            return Err(Error::Rejected(BusinessRejection::InsufficientStock {
                product_id: product.id,
                requested: *quantity,
                available: product.stock,
            }));
        }
        prices.insert(*product_id, product.price);
    }

    let created_at = to_rfc3339(now);
    let mut lines = Vec::with_capacity(input.lines.len());
    let mut total = Decimal::ZERO;
    for line in &input.lines {
        let unit_price = prices
            .get(line.product_id.as_str())
            .copied()
            .ok_or_else(|| Error::unexpected("price missing for checked product"))?;
        let line_total = unit_price
            .checked_mul(Decimal::from(line.quantity))
            .ok_or_else(|| out_of_range("line total"))?
            .round_dp(2);
        total = total
            .checked_add(line_total)
            .ok_or_else(|| out_of_range("order total"))?;
        lines.push(OrderLine {
            product_id: line.product_id.clone(),
            quantity: line.quantity,
            unit_price,
            line_total,
        });
    }

    let order = Order {
        id: input.order_id.clone(),
        cash_session_id: input.cash_session_id.clone(),
        payment_method: input.payment_method,
        lines,
        total,
        created_at: created_at.clone(),
    };

    diesel::insert_into(orders::table)
        .values(&OrderDB {
            id: order.id.clone(),
            cash_session_id: order.cash_session_id.clone(),
            payment_method: order.payment_method.as_str().to_string(),
            total: decimal_to_db(order.total),
            created_at: order.created_at.clone(),
        })
        .execute(conn)
        .map_err(StorageError::from)?;

    let line_rows: Vec<OrderLineDB> = order
        .lines
        .iter()
        .enumerate()
        .map(|(index, line)| OrderLineDB {
            order_id: order.id.clone(),
            line_no: index as i32 + 1,
            product_id: line.product_id.clone(),
            quantity: line.quantity,
            unit_price: decimal_to_db(line.unit_price),
            line_total: decimal_to_db(line.line_total),
        })
        .collect();
    diesel::insert_into(order_lines::table)
        .values(&line_rows)
        .execute(conn)
        .map_err(StorageError::from)?;

    let mut changes = vec![EntityChange::new(
        Collection::Orders,
        ChangeAction::Create,
        order.id.clone(),
    )];
    for (product_id, quantity) in &requested {
        diesel::update(products::table.find(*product_id))
            .set((
                products::stock.eq(products::stock - *quantity),
                products::updated_at.eq(&created_at),
            ))
            .execute(conn)
            .map_err(StorageError::from)?;
        changes.push(EntityChange::new(
            Collection::Products,
            ChangeAction::Update,
            product_id.to_string(),
        ));
    }

    AppliedOperation::new(&order, changes)
}

fn open_session(
    conn: &mut SqliteConnection,
    input: &SessionOpenInput,
    now: DateTime<Utc>,
) -> Result<AppliedOperation> {
    if load_session(conn, &input.session_id)?.is_some() {
        return Err(duplicate(Collection::CashSessions, &input.session_id));
    }
    let opened_at = to_rfc3339(now);
    let session = CashSession {
        id: input.session_id.clone(),
        status: CashSessionStatus::Open,
        opening_float: input.opening_float,
        opened_at: opened_at.clone(),
        closed_at: None,
        expected_cash: None,
        counted_cash: None,
        difference: None,
    };
    diesel::insert_into(cash_sessions::table)
        .values(&CashSessionDB::from_domain(&session, &opened_at))
        .execute(conn)
        .map_err(StorageError::from)?;
    AppliedOperation::new(
        &session,
        vec![EntityChange::new(
            Collection::CashSessions,
            ChangeAction::Create,
            session.id.clone(),
        )],
    )
}

fn close_session(
    conn: &mut SqliteConnection,
    input: &SessionCloseInput,
    now: DateTime<Utc>,
) -> Result<AppliedOperation> {
    let mut session = load_open_session(conn, &input.session_id)?;
    let expected = expected_cash(conn, &session)?;
    let closed_at = to_rfc3339(now);

    session.status = CashSessionStatus::Closed;
    session.closed_at = Some(closed_at.clone());
    session.expected_cash = Some(expected);
    session.counted_cash = Some(input.counted_cash);
    session.difference = Some(
        input
            .counted_cash
            .checked_sub(expected)
            .ok_or_else(|| out_of_range("cash difference"))?,
    );

    diesel::update(cash_sessions::table.find(&session.id))
        .set(&CashSessionDB::from_domain(&session, &closed_at))
        .execute(conn)
        .map_err(StorageError::from)?;
    AppliedOperation::new(
        &session,
        vec![EntityChange::new(
            Collection::CashSessions,
            ChangeAction::Update,
            session.id.clone(),
        )],
    )
}

fn create_cut(
    conn: &mut SqliteConnection,
    input: &CutCreateInput,
    now: DateTime<Utc>,
) -> Result<AppliedOperation> {
    let exists = cuts::table
        .find(&input.cut_id)
        .select(cuts::id)
        .first::<String>(conn)
        .optional()
        .map_err(StorageError::from)?;
    if exists.is_some() {
        return Err(duplicate(Collection::Cuts, &input.cut_id));
    }

    let session = load_open_session(conn, &input.session_id)?;
    let expected = expected_cash(conn, &session)?;
    let difference = input
        .counted_amount
        .checked_sub(expected)
        .ok_or_else(|| out_of_range("cut difference"))?;
    let cut = Cut {
        id: input.cut_id.clone(),
        cash_session_id: session.id,
        counted_amount: input.counted_amount,
        expected_amount: expected,
        difference,
        note: input
            .note
            .as_ref()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty()),
        created_at: to_rfc3339(now),
    };
    diesel::insert_into(cuts::table)
        .values(&CutDB::from_domain(&cut))
        .execute(conn)
        .map_err(StorageError::from)?;
    AppliedOperation::new(
        &cut,
        vec![EntityChange::new(
            Collection::Cuts,
            ChangeAction::Create,
            cut.id.clone(),
        )],
    )
}

fn load_coworking(
    conn: &mut SqliteConnection,
    coworking_session_id: &str,
) -> Result<Option<CoworkingSession>> {
    coworking_sessions::table
        .find(coworking_session_id)
        .first::<CoworkingSessionDB>(conn)
        .optional()
        .map_err(StorageError::from)?
        .map(CoworkingSessionDB::into_domain)
        .transpose()
}

fn start_coworking(
    conn: &mut SqliteConnection,
    input: &CoworkingStartInput,
    now: DateTime<Utc>,
) -> Result<AppliedOperation> {
    if load_coworking(conn, &input.coworking_session_id)?.is_some() {
        return Err(duplicate(
            Collection::CoworkingSessions,
            &input.coworking_session_id,
        ));
    }
    let session = CoworkingSession {
        id: input.coworking_session_id.clone(),
        customer_name: input.customer_name.trim().to_string(),
        hourly_rate: input.hourly_rate,
        status: CoworkingStatus::Active,
        started_at: to_rfc3339(parse_rfc3339(&input.started_at)?),
        ended_at: None,
        billed_minutes: None,
        amount: None,
    };
    diesel::insert_into(coworking_sessions::table)
        .values(&CoworkingSessionDB::from_domain(&session, &to_rfc3339(now)))
        .execute(conn)
        .map_err(StorageError::from)?;
    AppliedOperation::new(
        &session,
        vec![EntityChange::new(
            Collection::CoworkingSessions,
            ChangeAction::Create,
            session.id.clone(),
        )],
    )
}

fn end_coworking(
    conn: &mut SqliteConnection,
    input: &CoworkingEndInput,
    now: DateTime<Utc>,
) -> Result<AppliedOperation> {
    let mut session = match load_coworking(conn, &input.coworking_session_id)? {
        Some(session) if session.status == CoworkingStatus::Active => session,
        _ => {
            return Err(Error::Rejected(BusinessRejection::CoworkingNotActive {
                coworking_session_id: input.coworking_session_id.clone(),
            }))
        }
    };

    let started_at = parse_rfc3339(&session.started_at)?;
    let ended_at = parse_rfc3339(&input.ended_at)?;
    if ended_at < started_at {
        return Err(Error::Validation(ValidationError::invalid(
            "endedAt precedes the session start",
        )));
    }
    let (minutes, amount) =
        coworking_charge(session.hourly_rate, (ended_at - started_at).num_seconds())
            .ok_or_else(|| out_of_range("coworking amount"))?;

    session.status = CoworkingStatus::Ended;
    session.ended_at = Some(to_rfc3339(ended_at));
    session.billed_minutes = Some(minutes);
    session.amount = Some(amount);

    diesel::update(coworking_sessions::table.find(&session.id))
        .set(&CoworkingSessionDB::from_domain(&session, &to_rfc3339(now)))
        .execute(conn)
        .map_err(StorageError::from)?;
    AppliedOperation::new(
        &session,
        vec![EntityChange::new(
            Collection::CoworkingSessions,
            ChangeAction::Update,
            session.id.clone(),
        )],
    )
}

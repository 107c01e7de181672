//! Database models for POS entities.

use diesel::prelude::*;

use tillsync_core::entities::{
    CashSession, CoworkingSession, Cut, Order, OrderLine, Product,
};
use tillsync_core::Result;

use crate::utils::{decimal_from_db, decimal_to_db, optional_decimal_from_db};

#[derive(Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::products)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ProductDB {
    pub id: String,
    pub name: String,
    pub price: String,
    pub stock: i64,
    pub updated_at: String,
}

impl ProductDB {
    pub fn from_domain(product: &Product) -> Self {
        Self {
            id: product.id.clone(),
            name: product.name.clone(),
            price: decimal_to_db(product.price),
            stock: product.stock,
            updated_at: product.updated_at.clone(),
        }
    }

    pub fn into_domain(self) -> Result<Product> {
        Ok(Product {
            price: decimal_from_db(&self.price)?,
            id: self.id,
            name: self.name,
            stock: self.stock,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Queryable, Identifiable, Insertable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::orders)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct OrderDB {
    pub id: String,
    pub cash_session_id: Option<String>,
    pub payment_method: String,
    pub total: String,
    pub created_at: String,
}

#[derive(Queryable, Insertable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::order_lines)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct OrderLineDB {
    pub order_id: String,
    pub line_no: i32,
    pub product_id: String,
    pub quantity: i64,
    pub unit_price: String,
    pub line_total: String,
}

impl OrderLineDB {
    pub fn into_domain(self) -> Result<OrderLine> {
        Ok(OrderLine {
            unit_price: decimal_from_db(&self.unit_price)?,
            line_total: decimal_from_db(&self.line_total)?,
            product_id: self.product_id,
            quantity: self.quantity,
        })
    }
}

pub fn order_from_rows(order: OrderDB, lines: Vec<OrderLineDB>) -> Result<Order> {
    Ok(Order {
        payment_method: order.payment_method.parse()?,
        total: decimal_from_db(&order.total)?,
        lines: lines
            .into_iter()
            .map(OrderLineDB::into_domain)
            .collect::<Result<Vec<_>>>()?,
        id: order.id,
        cash_session_id: order.cash_session_id,
        created_at: order.created_at,
    })
}

#[derive(Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::cash_sessions)]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CashSessionDB {
    pub id: String,
    pub status: String,
    pub opening_float: String,
    pub opened_at: String,
    pub closed_at: Option<String>,
    pub expected_cash: Option<String>,
    pub counted_cash: Option<String>,
    pub difference: Option<String>,
    pub updated_at: String,
}

impl CashSessionDB {
    pub fn from_domain(session: &CashSession, updated_at: &str) -> Self {
        Self {
            id: session.id.clone(),
            status: session.status.as_str().to_string(),
            opening_float: decimal_to_db(session.opening_float),
            opened_at: session.opened_at.clone(),
            closed_at: session.closed_at.clone(),
            expected_cash: session.expected_cash.map(decimal_to_db),
            counted_cash: session.counted_cash.map(decimal_to_db),
            difference: session.difference.map(decimal_to_db),
            updated_at: updated_at.to_string(),
        }
    }

    pub fn into_domain(self) -> Result<CashSession> {
        Ok(CashSession {
            status: self.status.parse()?,
            opening_float: decimal_from_db(&self.opening_float)?,
            expected_cash: optional_decimal_from_db(self.expected_cash.as_deref())?,
            counted_cash: optional_decimal_from_db(self.counted_cash.as_deref())?,
            difference: optional_decimal_from_db(self.difference.as_deref())?,
            id: self.id,
            opened_at: self.opened_at,
            closed_at: self.closed_at,
        })
    }
}

#[derive(Queryable, Identifiable, Insertable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::cuts)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CutDB {
    pub id: String,
    pub cash_session_id: String,
    pub counted_amount: String,
    pub expected_amount: String,
    pub difference: String,
    pub note: Option<String>,
    pub created_at: String,
}

impl CutDB {
    pub fn from_domain(cut: &Cut) -> Self {
        Self {
            id: cut.id.clone(),
            cash_session_id: cut.cash_session_id.clone(),
            counted_amount: decimal_to_db(cut.counted_amount),
            expected_amount: decimal_to_db(cut.expected_amount),
            difference: decimal_to_db(cut.difference),
            note: cut.note.clone(),
            created_at: cut.created_at.clone(),
        }
    }

    pub fn into_domain(self) -> Result<Cut> {
        Ok(Cut {
            counted_amount: decimal_from_db(&self.counted_amount)?,
            expected_amount: decimal_from_db(&self.expected_amount)?,
            difference: decimal_from_db(&self.difference)?,
            id: self.id,
            cash_session_id: self.cash_session_id,
            note: self.note,
            created_at: self.created_at,
        })
    }
}

#[derive(Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::coworking_sessions)]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CoworkingSessionDB {
    pub id: String,
    pub customer_name: String,
    pub hourly_rate: String,
    pub status: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub billed_minutes: Option<i64>,
    pub amount: Option<String>,
    pub updated_at: String,
}

impl CoworkingSessionDB {
    pub fn from_domain(session: &CoworkingSession, updated_at: &str) -> Self {
        Self {
            id: session.id.clone(),
            customer_name: session.customer_name.clone(),
            hourly_rate: decimal_to_db(session.hourly_rate),
            status: session.status.as_str().to_string(),
            started_at: session.started_at.clone(),
            ended_at: session.ended_at.clone(),
            billed_minutes: session.billed_minutes,
            amount: session.amount.map(decimal_to_db),
            updated_at: updated_at.to_string(),
        }
    }

    pub fn into_domain(self) -> Result<CoworkingSession> {
        Ok(CoworkingSession {
            hourly_rate: decimal_from_db(&self.hourly_rate)?,
            status: self.status.parse()?,
            amount: optional_decimal_from_db(self.amount.as_deref())?,
            id: self.id,
            customer_name: self.customer_name,
            started_at: self.started_at,
            ended_at: self.ended_at,
            billed_minutes: self.billed_minutes,
        })
    }
}

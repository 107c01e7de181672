use std::collections::HashMap;
use std::sync::Arc;

use diesel::prelude::*;
use serde_json::Value;

use tillsync_core::entities::{CashSession, Collection, CoworkingSession, Cut, Order, Product};
use tillsync_core::idempotency::EntityQueryTrait;
use tillsync_core::Result;

use super::model::{
    order_from_rows, CashSessionDB, CoworkingSessionDB, CutDB, OrderDB, OrderLineDB, ProductDB,
};
use crate::db::{get_connection, DbConnection, DbPool};
use crate::errors::StorageError;
use crate::schema::{cash_sessions, coworking_sessions, cuts, order_lines, orders, products};

/// Read access to canonical POS entities. Writes go through the
/// transaction executor.
pub struct PosRepository {
    pool: Arc<DbPool>,
}

impl PosRepository {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<DbConnection> {
        get_connection(&self.pool)
    }

    pub fn list_products(&self) -> Result<Vec<Product>> {
        let mut conn = self.conn()?;
        products::table
            .order(products::id.asc())
            .load::<ProductDB>(&mut conn)
            .map_err(StorageError::from)?
            .into_iter()
            .map(ProductDB::into_domain)
            .collect()
    }

    pub fn get_product(&self, product_id: &str) -> Result<Option<Product>> {
        let mut conn = self.conn()?;
        products::table
            .find(product_id)
            .first::<ProductDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?
            .map(ProductDB::into_domain)
            .transpose()
    }

    pub fn list_orders(&self) -> Result<Vec<Order>> {
        let mut conn = self.conn()?;
        let order_rows = orders::table
            .order((orders::created_at.asc(), orders::id.asc()))
            .load::<OrderDB>(&mut conn)
            .map_err(StorageError::from)?;
        let line_rows = order_lines::table
            .order((order_lines::order_id.asc(), order_lines::line_no.asc()))
            .load::<OrderLineDB>(&mut conn)
            .map_err(StorageError::from)?;

        let mut lines_by_order: HashMap<String, Vec<OrderLineDB>> = HashMap::new();
        for line in line_rows {
            lines_by_order
                .entry(line.order_id.clone())
                .or_default()
                .push(line);
        }
        order_rows
            .into_iter()
            .map(|order| {
                let lines = lines_by_order.remove(&order.id).unwrap_or_default();
                order_from_rows(order, lines)
            })
            .collect()
    }

    pub fn get_order(&self, order_id: &str) -> Result<Option<Order>> {
        let mut conn = self.conn()?;
        let Some(order) = orders::table
            .find(order_id)
            .first::<OrderDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?
        else {
            return Ok(None);
        };
        let lines = order_lines::table
            .filter(order_lines::order_id.eq(order_id))
            .order(order_lines::line_no.asc())
            .load::<OrderLineDB>(&mut conn)
            .map_err(StorageError::from)?;
        order_from_rows(order, lines).map(Some)
    }

    pub fn list_cash_sessions(&self) -> Result<Vec<CashSession>> {
        let mut conn = self.conn()?;
        cash_sessions::table
            .order((cash_sessions::opened_at.asc(), cash_sessions::id.asc()))
            .load::<CashSessionDB>(&mut conn)
            .map_err(StorageError::from)?
            .into_iter()
            .map(CashSessionDB::into_domain)
            .collect()
    }

    pub fn get_cash_session(&self, session_id: &str) -> Result<Option<CashSession>> {
        let mut conn = self.conn()?;
        cash_sessions::table
            .find(session_id)
            .first::<CashSessionDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?
            .map(CashSessionDB::into_domain)
            .transpose()
    }

    pub fn list_cuts(&self) -> Result<Vec<Cut>> {
        let mut conn = self.conn()?;
        cuts::table
            .order((cuts::created_at.asc(), cuts::id.asc()))
            .load::<CutDB>(&mut conn)
            .map_err(StorageError::from)?
            .into_iter()
            .map(CutDB::into_domain)
            .collect()
    }

    pub fn get_cut(&self, cut_id: &str) -> Result<Option<Cut>> {
        let mut conn = self.conn()?;
        cuts::table
            .find(cut_id)
            .first::<CutDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?
            .map(CutDB::into_domain)
            .transpose()
    }

    pub fn list_coworking_sessions(&self) -> Result<Vec<CoworkingSession>> {
        let mut conn = self.conn()?;
        coworking_sessions::table
            .order((coworking_sessions::started_at.asc(), coworking_sessions::id.asc()))
            .load::<CoworkingSessionDB>(&mut conn)
            .map_err(StorageError::from)?
            .into_iter()
            .map(CoworkingSessionDB::into_domain)
            .collect()
    }

    pub fn get_coworking_session(&self, id: &str) -> Result<Option<CoworkingSession>> {
        let mut conn = self.conn()?;
        coworking_sessions::table
            .find(id)
            .first::<CoworkingSessionDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?
            .map(CoworkingSessionDB::into_domain)
            .transpose()
    }
}

fn to_values<T: serde::Serialize>(items: Vec<T>) -> Result<Vec<Value>> {
    items
        .iter()
        .map(|item| -> Result<Value> { Ok(serde_json::to_value(item)?) })
        .collect()
}

fn to_value<T: serde::Serialize>(item: Option<T>) -> Result<Option<Value>> {
    item.map(|i| -> Result<Value> { Ok(serde_json::to_value(i)?) })
        .transpose()
}

impl EntityQueryTrait for PosRepository {
    fn list_collection(&self, collection: Collection) -> Result<Vec<Value>> {
        match collection {
            Collection::Products => to_values(self.list_products()?),
            Collection::Orders => to_values(self.list_orders()?),
            Collection::CashSessions => to_values(self.list_cash_sessions()?),
            Collection::Cuts => to_values(self.list_cuts()?),
            Collection::CoworkingSessions => to_values(self.list_coworking_sessions()?),
        }
    }

    fn get_entity(&self, collection: Collection, entity_id: &str) -> Result<Option<Value>> {
        match collection {
            Collection::Products => to_value(self.get_product(entity_id)?),
            Collection::Orders => to_value(self.get_order(entity_id)?),
            Collection::CashSessions => to_value(self.get_cash_session(entity_id)?),
            Collection::Cuts => to_value(self.get_cut(entity_id)?),
            Collection::CoworkingSessions => to_value(self.get_coworking_session(entity_id)?),
        }
    }
}

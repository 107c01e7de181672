//! POS entities: products, orders, cash sessions, cuts, coworking sessions.

mod model;
mod operations;
mod repository;

pub use model::{
    CashSessionDB, CoworkingSessionDB, CutDB, OrderDB, OrderLineDB, ProductDB,
};
pub use operations::{apply_operation_tx, AppliedOperation};
pub use repository::PosRepository;

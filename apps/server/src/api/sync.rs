//! Pull endpoints: current server state of a collection or entity.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::Value;

use tillsync_core::entities::Collection;

use crate::error::{ApiError, ApiResult};
use crate::main_lib::AppState;

async fn list_collection(
    State(state): State<Arc<AppState>>,
    Path(collection): Path<String>,
) -> ApiResult<Json<Vec<Value>>> {
    let collection: Collection = collection.parse()?;
    Ok(Json(state.query.list_collection(collection)?))
}

async fn get_entity(
    State(state): State<Arc<AppState>>,
    Path((collection, entity_id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let collection: Collection = collection.parse()?;
    state
        .query
        .get_entity(collection, &entity_id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("{} {} not found", collection, entity_id)))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sync/{collection}", get(list_collection))
        .route("/sync/{collection}/{id}", get(get_entity))
}

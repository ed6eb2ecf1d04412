use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};

use liblarder::error::LarderError;
use liblarder::store::{ItemPatch, ItemState, NewItem};

use crate::service::{AppState, authorize};

type ApiResult = Result<Json<Value>, (StatusCode, String)>;

#[derive(Deserialize)]
pub struct CreateListRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct RenameListRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct CreateItemRequest {
    pub name: String,
    #[serde(default)]
    pub quantity: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateItemRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub quantity: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub state: Option<ItemState>,
}

/// Unauthenticated liveness/status surface.
pub async fn status(State(state): State<AppState>) -> Json<Value> {
    let lists = state.store.lock().await.list_count();
    Json(json!({
        "connections": state.hub.connection_count(),
        "lists": lists,
    }))
}

pub async fn list_lists(State(state): State<AppState>, headers: HeaderMap) -> ApiResult {
    authorize(&state, &headers).map_err(reject)?;
    let store = state.store.lock().await;
    to_json(&store.list_lists())
}

pub async fn create_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateListRequest>,
) -> ApiResult {
    authorize(&state, &headers).map_err(reject)?;
    let (list, event) = state
        .store
        .lock()
        .await
        .create_list(&req.name)
        .map_err(reject)?;
    // Notification is best-effort; the mutation has already succeeded.
    state.hub.broadcast(&event);
    to_json(&list)
}

pub async fn get_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult {
    authorize(&state, &headers).map_err(reject)?;
    let store = state.store.lock().await;
    let list = store.get_list(&id).map_err(reject)?;
    to_json(list)
}

pub async fn rename_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<RenameListRequest>,
) -> ApiResult {
    authorize(&state, &headers).map_err(reject)?;
    let (list, event) = state
        .store
        .lock()
        .await
        .rename_list(&id, &req.name)
        .map_err(reject)?;
    state.hub.broadcast(&event);
    to_json(&list)
}

pub async fn delete_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult {
    authorize(&state, &headers).map_err(reject)?;
    let event = state.store.lock().await.delete_list(&id).map_err(reject)?;
    state.hub.broadcast(&event);
    Ok(Json(json!({ "deleted": true })))
}

pub async fn add_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<CreateItemRequest>,
) -> ApiResult {
    authorize(&state, &headers).map_err(reject)?;
    let (item, event) = state
        .store
        .lock()
        .await
        .add_item(
            &id,
            NewItem {
                name: req.name,
                quantity: req.quantity,
                category: req.category,
            },
        )
        .map_err(reject)?;
    state.hub.broadcast(&event);
    to_json(&item)
}

pub async fn update_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, item_id)): Path<(String, String)>,
    Json(req): Json<UpdateItemRequest>,
) -> ApiResult {
    authorize(&state, &headers).map_err(reject)?;
    let (item, event) = state
        .store
        .lock()
        .await
        .update_item(
            &id,
            &item_id,
            ItemPatch {
                name: req.name,
                quantity: req.quantity,
                category: req.category,
                state: req.state,
            },
        )
        .map_err(reject)?;
    state.hub.broadcast(&event);
    to_json(&item)
}

pub async fn remove_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, item_id)): Path<(String, String)>,
) -> ApiResult {
    authorize(&state, &headers).map_err(reject)?;
    let event = state
        .store
        .lock()
        .await
        .remove_item(&id, &item_id)
        .map_err(reject)?;
    state.hub.broadcast(&event);
    Ok(Json(json!({ "deleted": true })))
}

fn reject(e: LarderError) -> (StatusCode, String) {
    let status =
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, e.to_string())
}

fn to_json<T: serde::Serialize>(value: &T) -> ApiResult {
    serde_json::to_value(value)
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use invar_domain::{Context, DomainError, Hardware, StateDetails, TaskState};
use invar_patch::{apply_patch, PatchOp};
use invar_schema::{worker_fields_schema, SchemaValidator};
use invar_store::{HardwareUpdate, ListFilters, NewHardware, SortDir};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::ApiError;
use crate::serialize::{hardware_response, window_response, worker_summary};
use crate::state::AppState;

/// Admin-or-owner check for a single hardware item.
fn authorize(context: &Context, hardware: &Hardware) -> Result<(), ApiError> {
    if context.authorized_for(&hardware.project_id) {
        Ok(())
    } else {
        Err(DomainError::PolicyNotAuthorized(format!(
            "not authorized to act on hardware {}",
            hardware.uuid
        ))
        .into())
    }
}

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ── List / export ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub marker: Option<Uuid>,
    pub limit: Option<u32>,
    pub sort_key: Option<String>,
    pub sort_dir: Option<String>,
    #[serde(default)]
    pub all_projects: bool,
    #[serde(default)]
    pub include_deleted: bool,
}

pub async fn list_hardware(
    State(state): State<AppState>,
    Extension(context): Extension<Context>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    if query.all_projects && !context.is_admin() {
        return Err(DomainError::PolicyNotAuthorized(
            "all_projects requires the admin role".to_string(),
        )
        .into());
    }
    let project_id = if query.all_projects {
        None
    } else {
        context.project_id.clone()
    };

    let limit = query.limit.unwrap_or(state.max_limit).min(state.max_limit);
    let sort_dir = query
        .sort_dir
        .as_deref()
        .map(str::parse::<SortDir>)
        .transpose()
        .map_err(ApiError::from)?
        .unwrap_or_default();

    let rows = state
        .store
        .list_hardware(ListFilters {
            limit: Some(limit),
            marker: query.marker,
            sort_key: query.sort_key.clone(),
            sort_dir,
            project_id,
            include_deleted: query.include_deleted,
        })
        .await?;

    let mut links = Vec::new();
    if rows.len() as u32 == limit {
        if let Some(last) = rows.last() {
            links.push(json!({
                "rel": "next",
                "href": format!("/v1/hardware?limit={limit}&marker={}", last.uuid),
            }));
        }
    }

    let hardware: Vec<Value> = rows
        .iter()
        .map(|h| hardware_response(h, &state.registry, context.is_admin()))
        .collect();
    Ok(Json(json!({ "hardware": hardware, "links": links })))
}

/// Unauthenticated read-only listing: private fields omitted, sensitive
/// fields masked.
pub async fn export(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let rows = state.store.list_hardware(ListFilters::default()).await?;
    let hardware: Vec<Value> = rows
        .iter()
        .map(|h| hardware_response(h, &state.registry, false))
        .collect();
    Ok(Json(json!({ "hardware": hardware })))
}

// ── Single hardware ───────────────────────────────────────────────────────────

pub async fn get_hardware(
    State(state): State<AppState>,
    Extension(context): Extension<Context>,
    Path(uuid): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let hardware = state.store.get_hardware_by_uuid(uuid).await?;
    authorize(&context, &hardware)?;
    let tasks = state.store.worker_tasks_for_hardware(uuid).await?;

    let mut doc = hardware_response(&hardware, &state.registry, context.is_admin());
    doc["workers"] = worker_summary(&tasks);
    Ok(Json(doc))
}

// ── Enroll ────────────────────────────────────────────────────────────────────

pub async fn enroll(
    State(state): State<AppState>,
    Extension(context): Extension<Context>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if body.get("project_id").is_some() {
        return Err(ApiError::bad_request(
            "project_id cannot be supplied; it is assigned from the request context",
        ));
    }
    state.enroll_validator.validate(&body)?;

    let project_id = context.project_id.clone().ok_or_else(|| {
        ApiError::bad_request("the authenticated context carries no project_id")
    })?;
    let properties: StateDetails = body["properties"]
        .as_object()
        .cloned()
        .unwrap_or_default();

    let hardware = state
        .store
        .create_hardware(
            NewHardware {
                uuid: None,
                name: body["name"].as_str().unwrap_or_default().to_string(),
                project_id,
                hardware_type: body["hardware_type"].as_str().unwrap_or_default().to_string(),
                properties,
            },
            TaskState::Pending,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(hardware_response(&hardware, &state.registry, context.is_admin())),
    ))
}

// ── Patch ─────────────────────────────────────────────────────────────────────

pub async fn patch_hardware(
    State(state): State<AppState>,
    Extension(context): Extension<Context>,
    Path(uuid): Path<Uuid>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    state.patch_validator.validate(&body)?;
    let ops: Vec<PatchOp> = serde_json::from_value(body)
        .map_err(|e| ApiError::bad_request(format!("malformed patch: {e}")))?;

    let hardware = state.store.get_hardware_by_uuid(uuid).await?;
    authorize(&context, &hardware)?;
    let windows = state.store.list_windows_for_hardware(uuid).await?;

    let outcome = apply_patch(&hardware, &windows, &ops).map_err(ApiError::from)?;

    // Patched properties must still satisfy the composed field schema for
    // this hardware type.
    if let Some(properties) = &outcome.properties {
        let schema = worker_fields_schema(&state.registry.fields_for(&hardware.hardware_type)?);
        SchemaValidator::new("properties", &schema)?
            .validate(&Value::Object(properties.clone()))?;
    }

    let updated = state
        .store
        .apply_patch(
            uuid,
            HardwareUpdate {
                name: outcome.name,
                properties: outcome.properties,
            },
            outcome.windows,
        )
        .await?;

    Ok(Json(hardware_response(
        &updated,
        &state.registry,
        context.is_admin(),
    )))
}

// ── Destroy / sync ────────────────────────────────────────────────────────────

pub async fn destroy_hardware(
    State(state): State<AppState>,
    Extension(context): Extension<Context>,
    Path(uuid): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let hardware = state.store.get_hardware_by_uuid(uuid).await?;
    authorize(&context, &hardware)?;
    state.store.destroy_hardware(uuid).await?;
    Ok(Json(json!({ "deleted": uuid })))
}

/// Force all non-IN_PROGRESS tasks back to PENDING.
pub async fn sync_hardware(
    State(state): State<AppState>,
    Extension(context): Extension<Context>,
    Path(uuid): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let hardware = state.store.get_hardware_by_uuid(uuid).await?;
    authorize(&context, &hardware)?;
    state.store.set_tasks_pending(uuid).await?;
    let tasks = state.store.worker_tasks_for_hardware(uuid).await?;
    Ok(Json(json!({ "synced": uuid, "workers": worker_summary(&tasks) })))
}

// ── Availability windows ──────────────────────────────────────────────────────

pub async fn list_availability(
    State(state): State<AppState>,
    Extension(context): Extension<Context>,
    Path(uuid): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let hardware = state.store.get_hardware_by_uuid(uuid).await?;
    authorize(&context, &hardware)?;
    let windows = state.store.list_windows_for_hardware(uuid).await?;
    Ok(Json(json!({
        "availability": windows.iter().map(window_response).collect::<Vec<_>>(),
    })))
}

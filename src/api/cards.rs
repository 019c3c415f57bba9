use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::api::middleware::{auth::AuthenticatedStaff, state::AppState};
use crate::error::{AppError, Result};
use crate::services::card_lifecycle::{self, parse_card_ids, require_text, DeactivationReason};

const NO_CARDS_SELECTED: &str = "No cards selected";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignCardRequest {
    pub barcode_value: Option<String>,
    pub patient_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeactivateCardRequest {
    pub barcode_value: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchAssignRequest {
    pub card_ids: Option<Vec<String>>,
    pub patient_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDeactivateRequest {
    pub card_ids: Option<Vec<String>>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintCardsRequest {
    pub card_ids: Option<Vec<String>>,
    pub template_id: Option<String>,
}

fn parse_reason(reason: Option<String>) -> Result<DeactivationReason> {
    let reason = require_text(reason, "Barcode value and reason are required")?;
    Ok(reason.parse::<DeactivationReason>()?)
}

/// POST /cards/assign
async fn assign_card(
    State(state): State<AppState>,
    staff: AuthenticatedStaff,
    body: std::result::Result<Json<AssignCardRequest>, JsonRejection>,
) -> Result<Json<JsonValue>> {
    let Json(req) = body?;
    let missing = "Barcode value and patient ID are required";
    let barcode_value = require_text(req.barcode_value, missing)?;
    let patient_id = require_text(req.patient_id, missing)?;

    card_lifecycle::assign_card(
        &state.pool,
        &state.card_key,
        &barcode_value,
        &patient_id,
        &staff.staff_id,
    )
    .await?;

    Ok(Json(json!({ "success": true })))
}

/// POST /cards/deactivate
async fn deactivate_card(
    State(state): State<AppState>,
    staff: AuthenticatedStaff,
    body: std::result::Result<Json<DeactivateCardRequest>, JsonRejection>,
) -> Result<Json<JsonValue>> {
    let Json(req) = body?;
    let barcode_value = require_text(req.barcode_value, "Barcode value and reason are required")?;
    let reason = parse_reason(req.reason)?;

    let replacement = card_lifecycle::deactivate_and_replace(
        &state.pool,
        &state.card_key,
        &barcode_value,
        reason,
        &staff.staff_id,
    )
    .await?;

    Ok(Json(json!({
        "success": true,
        "newCardBarcode": replacement.replacement_barcode,
    })))
}

/// POST /cards/batch/assign
async fn batch_assign(
    State(state): State<AppState>,
    staff: AuthenticatedStaff,
    body: std::result::Result<Json<BatchAssignRequest>, JsonRejection>,
) -> Result<Json<JsonValue>> {
    let Json(req) = body?;
    let card_ids = parse_card_ids(req.card_ids, NO_CARDS_SELECTED)?;
    let patient_id = require_text(req.patient_id, "Patient ID is required")?;

    let assigned = card_lifecycle::batch_assign(
        &state.pool,
        &state.card_key,
        &card_ids,
        &patient_id,
        &staff.staff_id,
    )
    .await?;

    Ok(Json(json!({ "success": true, "cardsAssigned": assigned })))
}

/// POST /cards/batch/deactivate
async fn batch_deactivate(
    State(state): State<AppState>,
    staff: AuthenticatedStaff,
    body: std::result::Result<Json<BatchDeactivateRequest>, JsonRejection>,
) -> Result<Json<JsonValue>> {
    let Json(req) = body?;
    let card_ids = parse_card_ids(req.card_ids, NO_CARDS_SELECTED)?;
    let reason = require_text(req.reason, "Reason is required")?.parse::<DeactivationReason>()?;

    let replacements = card_lifecycle::batch_deactivate(
        &state.pool,
        &state.card_key,
        &card_ids,
        reason,
        &staff.staff_id,
    )
    .await?;

    Ok(Json(json!({ "success": true, "replacements": replacements })))
}

/// POST /cards/print
async fn print_cards(
    State(state): State<AppState>,
    staff: AuthenticatedStaff,
    body: std::result::Result<Json<PrintCardsRequest>, JsonRejection>,
) -> Result<Json<JsonValue>> {
    let Json(req) = body?;
    let card_ids = parse_card_ids(req.card_ids, NO_CARDS_SELECTED)?;
    let template_id = req
        .template_id
        .filter(|id| !id.trim().is_empty())
        .map(|id| Uuid::parse_str(id.trim()))
        .transpose()
        .map_err(|_| AppError::Validation("Invalid template id".to_string()))?;

    let job = card_lifecycle::print_cards(
        &state.pool,
        state.renderer.as_ref(),
        &card_ids,
        template_id,
        &staff.staff_id,
    )
    .await?;

    Ok(Json(json!({
        "success": true,
        "printed": job.cards,
        "document": job.document,
    })))
}

/// GET /cards/printable
async fn printable_cards(
    State(state): State<AppState>,
    _staff: AuthenticatedStaff,
) -> Result<Json<JsonValue>> {
    let cards = card_lifecycle::printable_cards(&state.pool).await?;

    Ok(Json(json!({ "cards": cards })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/cards/assign", post(assign_card))
        .route("/cards/deactivate", post(deactivate_card))
        .route("/cards/batch/assign", post(batch_assign))
        .route("/cards/batch/deactivate", post(batch_deactivate))
        .route("/cards/print", post(print_cards))
        .route("/cards/printable", get(printable_cards))
}

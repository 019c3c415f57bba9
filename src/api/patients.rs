use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::api::middleware::{auth::AuthenticatedStaff, state::AppState};
use crate::error::Result;
use crate::models::patient::Patient;
use crate::services::card_lifecycle::{self, require_text};

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    pub barcode: Option<String>,
}

/// GET /patients/lookup?barcode=...
async fn lookup_patient(
    State(state): State<AppState>,
    staff: AuthenticatedStaff,
    Query(query): Query<LookupQuery>,
) -> Result<Json<Patient>> {
    let barcode = require_text(query.barcode, "Barcode is required")?;

    let patient = card_lifecycle::lookup_patient(
        &state.pool,
        &state.card_key,
        &state.registry,
        &barcode,
        &staff.staff_id,
    )
    .await?;

    Ok(Json(patient))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/patients/lookup", get(lookup_patient))
}

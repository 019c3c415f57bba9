use axum::{
    extract::{rejection::JsonRejection, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::api::middleware::{auth::AuthenticatedStaff, state::AppState};
use crate::error::{AppError, Result};
use crate::models::card_template::CardTemplate;
use crate::services::card_templates;

#[derive(Debug, Deserialize)]
pub struct SaveTemplateRequest {
    pub id: Option<String>,
    pub name: Option<String>,
    pub layout: Option<JsonValue>,
}

/// GET /cards/templates
async fn list_templates(
    State(state): State<AppState>,
    _staff: AuthenticatedStaff,
) -> Result<Json<JsonValue>> {
    let templates = CardTemplate::list_all(&state.pool).await?;

    Ok(Json(json!({ "templates": templates })))
}

/// POST /cards/templates
async fn save_template(
    State(state): State<AppState>,
    staff: AuthenticatedStaff,
    body: std::result::Result<Json<SaveTemplateRequest>, JsonRejection>,
) -> Result<Json<JsonValue>> {
    let Json(req) = body?;

    let id = req
        .id
        .filter(|id| !id.trim().is_empty())
        .map(|id| Uuid::parse_str(id.trim()))
        .transpose()
        .map_err(|_| AppError::Validation("Invalid template id".to_string()))?;
    let layout = card_templates::parse_layout(req.layout)?;
    let name = req.name.unwrap_or_default();

    let template =
        card_templates::save_template(&state.pool, id, &name, &layout, &staff.staff_id).await?;

    Ok(Json(json!({ "template": template })))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/cards/templates", get(list_templates).post(save_template))
}

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value as JsonValue};

use crate::api::middleware::{
    auth::{AuthenticatedStaff, CARD_ADMIN_ROLE},
    state::AppState,
};
use crate::error::{AppError, Result};
use crate::services::card_import;

const MAX_IMPORT_BYTES: usize = 10 * 1024 * 1024;

/// POST /cards/import
///
/// Multipart upload with a `file` part (vendor CSV) and a `vendor` text part.
async fn import_cards(
    State(state): State<AppState>,
    staff: AuthenticatedStaff,
    mut multipart: Multipart,
) -> Result<Json<JsonValue>> {
    staff.require_role(CARD_ADMIN_ROLE)?;

    let mut file = None;
    let mut vendor = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Multipart error: {e}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Multipart error: {e}")))?;
                file = Some(data);
            }
            Some("vendor") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("Multipart error: {e}")))?;
                vendor = Some(text);
            }
            _ => {}
        }
    }

    let file = file
        .filter(|data| !data.is_empty())
        .ok_or_else(|| AppError::Validation("No file provided".to_string()))?;
    let vendor = vendor
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Validation("Vendor is required".to_string()))?;

    let rows = card_import::parse_card_csv(&file)?;
    let summary = card_import::import_cards(&state.pool, &vendor, rows, &staff.staff_id).await?;

    Ok(Json(json!({
        "success": true,
        "batchNumber": summary.batch_number,
        "cardsImported": summary.cards_imported,
    })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/cards/import", post(import_cards))
        .layer(DefaultBodyLimit::max(MAX_IMPORT_BYTES))
}

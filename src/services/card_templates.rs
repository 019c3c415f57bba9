use serde_json::{json, Value as JsonValue};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{
    audit_log::{AuditAction, AuditEntry, AuditLog},
    card_template::{CardTemplate, TemplateLayout},
};
use crate::services::card_lifecycle::LifecycleError;

const INVALID_TEMPLATE: &str = "Invalid template structure";

/// Decodes and checks a submitted layout
pub fn parse_layout(raw: Option<JsonValue>) -> Result<TemplateLayout, LifecycleError> {
    let invalid = || LifecycleError::Validation(INVALID_TEMPLATE.to_string());

    let layout: TemplateLayout =
        serde_json::from_value(raw.ok_or_else(invalid)?).map_err(|_| invalid())?;
    layout.validate().map_err(|e| {
        tracing::debug!(error = %e, "Template layout rejected");
        invalid()
    })?;

    Ok(layout)
}

/// Creates a template, or updates it when `id` is given
#[tracing::instrument(skip(pool, layout))]
pub async fn save_template(
    pool: &PgPool,
    id: Option<Uuid>,
    name: &str,
    layout: &TemplateLayout,
    actor: &str,
) -> Result<CardTemplate, LifecycleError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LifecycleError::Validation(INVALID_TEMPLATE.to_string()));
    }

    let mut tx = pool.begin().await?;

    let (template, action) = match id {
        Some(id) => {
            let template = CardTemplate::update(&mut *tx, id, name, layout, actor)
                .await?
                .ok_or(LifecycleError::TemplateNotFound)?;
            (template, AuditAction::TemplateUpdated)
        }
        None => (
            CardTemplate::create(&mut *tx, name, layout, actor).await?,
            AuditAction::TemplateCreated,
        ),
    };

    AuditLog::record(
        &mut *tx,
        AuditEntry::new(action, template.id, actor, json!({ "name": template.name })),
    )
    .await?;

    tx.commit().await?;

    tracing::info!(template_id = %template.id, action = %action, "Card template saved");

    Ok(template)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_layout_is_invalid() {
        assert!(matches!(
            parse_layout(None),
            Err(LifecycleError::Validation(msg)) if msg == INVALID_TEMPLATE
        ));
    }

    #[test]
    fn malformed_layout_is_invalid() {
        let raw = json!({ "width": "wide", "height": 204 });
        assert!(parse_layout(Some(raw)).is_err());

        let raw = json!({
            "width": 100,
            "height": 100,
            "elements": [{ "type": "sticker", "x": 1, "y": 1 }]
        });
        assert!(parse_layout(Some(raw)).is_err());
    }

    #[test]
    fn out_of_bounds_layout_is_invalid() {
        let raw = json!({
            "width": 100,
            "height": 100,
            "elements": [{ "type": "barcode", "x": 50, "y": 50, "size": 80 }]
        });
        assert!(parse_layout(Some(raw)).is_err());
    }

    #[test]
    fn accepts_layout_without_elements() {
        let layout = parse_layout(Some(json!({ "width": 324, "height": 204 }))).unwrap();
        assert!(layout.elements.is_empty());
    }
}

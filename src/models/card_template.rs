use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow, PgConnection, PgPool};
use uuid::Uuid;

/// Print layout of a single card, in SVG user units (CR80 at 96 dpi by default)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateLayout {
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub elements: Vec<LayoutElement>,
}

/// Text content may reference `{patientName}`, `{patientId}`, `{barcodeValue}`,
/// `{issueDate}` and `{expiryDate}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LayoutElement {
    Text {
        x: f64,
        y: f64,
        #[serde(rename = "fontSize")]
        font_size: f64,
        content: String,
    },
    Barcode {
        x: f64,
        y: f64,
        size: f64,
    },
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum LayoutError {
    #[error("Card dimensions must be positive")]
    InvalidDimensions,

    #[error("Element {0} lies outside the card")]
    OutOfBounds(usize),

    #[error("Element {0} has an invalid size")]
    InvalidElement(usize),
}

impl TemplateLayout {
    pub fn validate(&self) -> Result<(), LayoutError> {
        if !(self.width.is_finite() && self.height.is_finite())
            || self.width <= 0.0
            || self.height <= 0.0
        {
            return Err(LayoutError::InvalidDimensions);
        }

        for (index, element) in self.elements.iter().enumerate() {
            let (x, y, right, bottom) = match element {
                LayoutElement::Text {
                    x,
                    y,
                    font_size,
                    content,
                } => {
                    if *font_size <= 0.0 || content.trim().is_empty() {
                        return Err(LayoutError::InvalidElement(index));
                    }
                    (*x, *y, *x, *y)
                }
                LayoutElement::Barcode { x, y, size } => {
                    if *size <= 0.0 {
                        return Err(LayoutError::InvalidElement(index));
                    }
                    (*x, *y, x + size, y + size)
                }
            };

            let inside = |v: f64, max: f64| v.is_finite() && (0.0..=max).contains(&v);
            if !(inside(x, self.width)
                && inside(y, self.height)
                && inside(right, self.width)
                && inside(bottom, self.height))
            {
                return Err(LayoutError::OutOfBounds(index));
            }
        }

        Ok(())
    }
}

impl Default for TemplateLayout {
    fn default() -> Self {
        Self {
            width: 324.0,
            height: 204.0,
            elements: vec![
                LayoutElement::Text {
                    x: 16.0,
                    y: 32.0,
                    font_size: 16.0,
                    content: "{patientName}".to_string(),
                },
                LayoutElement::Text {
                    x: 16.0,
                    y: 54.0,
                    font_size: 11.0,
                    content: "ID: {patientId}".to_string(),
                },
                LayoutElement::Text {
                    x: 16.0,
                    y: 72.0,
                    font_size: 10.0,
                    content: "Expires {expiryDate}".to_string(),
                },
                LayoutElement::Barcode {
                    x: 214.0,
                    y: 94.0,
                    size: 96.0,
                },
                LayoutElement::Text {
                    x: 16.0,
                    y: 190.0,
                    font_size: 10.0,
                    content: "{barcodeValue}".to_string(),
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CardTemplate {
    pub id: Uuid,
    pub name: String,
    pub layout: Json<TemplateLayout>,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CardTemplate {
    pub async fn list_all(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM card_templates ORDER BY created_at DESC
            "#,
        )
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM card_templates WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn create(
        conn: &mut PgConnection,
        name: &str,
        layout: &TemplateLayout,
        actor: &str,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO card_templates (name, layout, created_by, updated_by)
            VALUES ($1, $2, $3, $3)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(Json(layout))
        .bind(actor)
        .fetch_one(conn)
        .await
    }

    /// Returns `None` when no template has the given id
    pub async fn update(
        conn: &mut PgConnection,
        id: Uuid,
        name: &str,
        layout: &TemplateLayout,
        actor: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE card_templates
            SET name = $2, layout = $3, updated_by = $4, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(Json(layout))
        .bind(actor)
        .fetch_optional(conn)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_layout_is_valid() {
        assert_eq!(TemplateLayout::default().validate(), Ok(()));
    }

    #[test]
    fn layout_decodes_from_wire_format() {
        let layout: TemplateLayout = serde_json::from_value(json!({
            "width": 324,
            "height": 204,
            "elements": [
                { "type": "text", "x": 10, "y": 20, "fontSize": 12, "content": "{patientName}" },
                { "type": "barcode", "x": 200, "y": 80, "size": 100 }
            ]
        }))
        .unwrap();

        assert_eq!(layout.elements.len(), 2);
        assert_eq!(layout.validate(), Ok(()));
    }

    #[test]
    fn barcode_must_fit_inside_the_card() {
        let layout = TemplateLayout {
            width: 324.0,
            height: 204.0,
            elements: vec![LayoutElement::Barcode {
                x: 250.0,
                y: 10.0,
                size: 100.0,
            }],
        };

        assert_eq!(layout.validate(), Err(LayoutError::OutOfBounds(0)));
    }

    #[test]
    fn rejects_degenerate_layouts() {
        let mut layout = TemplateLayout::default();
        layout.width = 0.0;
        assert_eq!(layout.validate(), Err(LayoutError::InvalidDimensions));

        let layout = TemplateLayout {
            width: 100.0,
            height: 100.0,
            elements: vec![LayoutElement::Text {
                x: 1.0,
                y: 1.0,
                font_size: 0.0,
                content: "x".to_string(),
            }],
        };
        assert_eq!(layout.validate(), Err(LayoutError::InvalidElement(0)));
    }
}

use std::fmt::Write as _;

use qrcode::{render::svg, QrCode};
use serde::Serialize;

use crate::models::{
    card::PrintableCard,
    card_template::{LayoutElement, TemplateLayout},
};

const SHEET_COLUMNS: usize = 2;
const SHEET_MARGIN: f64 = 16.0;
const CARD_GAP: f64 = 16.0;

#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("QR code generation failed: {0}")]
    QrCode(#[from] qrcode::types::QrError),

    #[error("Failed to write document")]
    Format(#[from] std::fmt::Error),
}

/// Print-ready output handed back to the client
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedDocument {
    pub content_type: String,
    pub content: String,
}

/// Produces a print-ready document for a set of cards
pub trait CardRenderer: Send + Sync {
    fn render(
        &self,
        cards: &[PrintableCard],
        layout: &TemplateLayout,
    ) -> Result<RenderedDocument, RenderError>;
}

/// Lays cards out on a single SVG sheet, two per row, each with a QR code of
/// its barcode value
#[derive(Debug, Clone, Default)]
pub struct SvgCardSheetRenderer;

impl CardRenderer for SvgCardSheetRenderer {
    fn render(
        &self,
        cards: &[PrintableCard],
        layout: &TemplateLayout,
    ) -> Result<RenderedDocument, RenderError> {
        let rows = cards.len().div_ceil(SHEET_COLUMNS).max(1);
        let columns = cards.len().clamp(1, SHEET_COLUMNS);

        let sheet_width = 2.0 * SHEET_MARGIN
            + columns as f64 * layout.width
            + (columns - 1) as f64 * CARD_GAP;
        let sheet_height =
            2.0 * SHEET_MARGIN + rows as f64 * layout.height + (rows - 1) as f64 * CARD_GAP;

        let mut out = String::new();
        write!(
            out,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{sheet_width}" height="{sheet_height}" viewBox="0 0 {sheet_width} {sheet_height}">"#
        )?;

        for (index, card) in cards.iter().enumerate() {
            let x = SHEET_MARGIN + (index % SHEET_COLUMNS) as f64 * (layout.width + CARD_GAP);
            let y = SHEET_MARGIN + (index / SHEET_COLUMNS) as f64 * (layout.height + CARD_GAP);
            render_card(&mut out, card, layout, x, y)?;
        }

        out.push_str("</svg>");

        Ok(RenderedDocument {
            content_type: "image/svg+xml".to_string(),
            content: out,
        })
    }
}

fn render_card(
    out: &mut String,
    card: &PrintableCard,
    layout: &TemplateLayout,
    x: f64,
    y: f64,
) -> Result<(), RenderError> {
    write!(
        out,
        r##"<g class="card" transform="translate({x} {y})"><rect width="{}" height="{}" rx="8" fill="#ffffff" stroke="#9ca3af"/>"##,
        layout.width, layout.height
    )?;

    for element in &layout.elements {
        match element {
            LayoutElement::Text {
                x,
                y,
                font_size,
                content,
            } => {
                let text = fill_placeholders(content, card);
                write!(
                    out,
                    r#"<text x="{x}" y="{y}" font-family="sans-serif" font-size="{font_size}">{}</text>"#,
                    html_escape::encode_text(&text)
                )?;
            }
            LayoutElement::Barcode { x, y, size } => {
                let code = QrCode::new(card.barcode_value.as_bytes())?;
                let dimension = size.floor().max(1.0) as u32;
                let image = code
                    .render::<svg::Color>()
                    .max_dimensions(dimension, dimension)
                    .build();
                // Drop the XML prolog so the image nests inside the sheet
                let image = image
                    .find("<svg")
                    .map(|start| &image[start..])
                    .unwrap_or(image.as_str());
                write!(out, r#"<g transform="translate({x} {y})">{image}</g>"#)?;
            }
        }
    }

    out.push_str("</g>");
    Ok(())
}

fn fill_placeholders(content: &str, card: &PrintableCard) -> String {
    content
        .replace("{patientName}", &card.patient_name)
        .replace("{patientId}", &card.patient_id)
        .replace("{barcodeValue}", &card.barcode_value)
        .replace("{issueDate}", &card.issue_date.format("%Y-%m-%d").to_string())
        .replace(
            "{expiryDate}",
            &card.expiry_date.format("%Y-%m-%d").to_string(),
        )
}

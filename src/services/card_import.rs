use std::collections::HashSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{
    audit_log::{AuditAction, AuditEntry, AuditLog},
    batch::Batch,
    card::{Card, CardStatus, NewCard},
};
use crate::services::barcode::{self, RandomnessError};

const BARCODE_COLUMN: &str = "barcodeValue";

#[derive(thiserror::Error, Debug)]
pub enum ImportError {
    #[error("Invalid CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("{0}")]
    Validation(String),

    #[error("Barcodes already exist: {}", .0.join(", "))]
    BarcodesInUse(Vec<String>),

    #[error("Secret generation failed: {0}")]
    Randomness(#[from] RandomnessError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// One vendor-supplied card from an import file
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImportRow {
    #[serde(rename = "barcodeValue")]
    pub barcode_value: String,
    #[serde(rename = "uniqueId", default)]
    pub unique_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub batch_number: String,
    pub cards_imported: usize,
}

/// Parses a vendor CSV. Every row needs a non-blank barcode and barcodes must
/// be unique within the file.
pub fn parse_card_csv(data: &[u8]) -> Result<Vec<ImportRow>, ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(data);

    if !reader.headers()?.iter().any(|h| h == BARCODE_COLUMN) {
        return Err(ImportError::Validation(format!(
            "CSV must contain a {BARCODE_COLUMN} column"
        )));
    }

    let mut rows = Vec::new();
    let mut barcodes = HashSet::new();
    let mut secrets = HashSet::new();

    for (index, record) in reader.deserialize::<ImportRow>().enumerate() {
        let mut row = record?;
        // Header is line 1
        let line = index + 2;

        if row.barcode_value.is_empty() {
            return Err(ImportError::Validation(format!(
                "Missing barcode value on line {line}"
            )));
        }
        if !barcodes.insert(row.barcode_value.clone()) {
            return Err(ImportError::Validation(format!(
                "Duplicate barcode value {} on line {line}",
                row.barcode_value
            )));
        }

        row.unique_id = row.unique_id.filter(|id| !id.is_empty());
        if let Some(unique_id) = &row.unique_id {
            if !secrets.insert(unique_id.clone()) {
                return Err(ImportError::Validation(format!(
                    "Duplicate uniqueId on line {line}"
                )));
            }
        }

        rows.push(row);
    }

    if rows.is_empty() {
        return Err(ImportError::Validation(
            "CSV file contains no cards".to_string(),
        ));
    }

    Ok(rows)
}

/// Registers a vendor batch and its cards as in-stock inventory
#[tracing::instrument(skip(pool, rows), fields(count = rows.len()))]
pub async fn import_cards(
    pool: &PgPool,
    vendor: &str,
    rows: Vec<ImportRow>,
    actor: &str,
) -> Result<ImportSummary, ImportError> {
    let vendor = vendor.trim();
    if vendor.is_empty() {
        return Err(ImportError::Validation("Vendor is required".to_string()));
    }
    let quantity = i32::try_from(rows.len())
        .map_err(|_| ImportError::Validation("Too many cards in one import".to_string()))?;

    let mut tx = pool.begin().await?;

    let barcodes: Vec<String> = rows.iter().map(|r| r.barcode_value.clone()).collect();
    let taken = Card::barcodes_in_use(&mut *tx, &barcodes).await?;
    if !taken.is_empty() {
        tracing::warn!(count = taken.len(), "Import rejected, barcodes already registered");
        return Err(ImportError::BarcodesInUse(taken));
    }

    let now = Utc::now();
    let batch = Batch::create(&mut *tx, vendor, quantity, now).await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let unique_id = match row.unique_id {
            Some(unique_id) => unique_id,
            None => barcode::generate_unbound_secret()?,
        };

        let card = Card::insert(
            &mut *tx,
            NewCard {
                id: Uuid::new_v4(),
                barcode_value: row.barcode_value,
                unique_id,
                status: CardStatus::Available,
                patient_id: None,
                batch_number: Some(batch.batch_number.clone()),
                received_date: Some(now),
                assigned_at: None,
                assigned_by: None,
            },
        )
        .await?;

        entries.push(AuditEntry::new(
            AuditAction::CardImported,
            card.id,
            actor,
            json!({
                "batchNumber": batch.batch_number,
                "vendor": vendor,
                "barcodeValue": card.barcode_value,
            }),
        ));
    }
    AuditLog::record_all(&mut *tx, &entries).await?;

    tx.commit().await?;

    tracing::info!(
        batch_number = %batch.batch_number,
        cards = entries.len(),
        "Card batch imported"
    );

    Ok(ImportSummary {
        batch_number: batch.batch_number,
        cards_imported: entries.len(),
    })
}

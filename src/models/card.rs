use std::{fmt, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

/// Validity of a printed card, counted from its issue date.
pub const CARD_VALIDITY_DAYS: i64 = 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardStatus {
    Unassigned,
    Available,
    Assigned,
    Inactive,
}

#[derive(thiserror::Error, Debug)]
#[error("Unknown card status: {0}")]
pub struct UnknownCardStatus(pub String);

impl CardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardStatus::Unassigned => "unassigned",
            CardStatus::Available => "available",
            CardStatus::Assigned => "assigned",
            CardStatus::Inactive => "inactive",
        }
    }

    /// In-stock cards carry no patient binding yet.
    pub fn is_unassigned(&self) -> bool {
        matches!(self, CardStatus::Unassigned | CardStatus::Available)
    }
}

impl fmt::Display for CardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CardStatus {
    type Err = UnknownCardStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unassigned" => Ok(CardStatus::Unassigned),
            "available" => Ok(CardStatus::Available),
            "assigned" => Ok(CardStatus::Assigned),
            "inactive" => Ok(CardStatus::Inactive),
            other => Err(UnknownCardStatus(other.to_string())),
        }
    }
}

impl TryFrom<String> for CardStatus {
    type Error = UnknownCardStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: Uuid,
    pub barcode_value: String,
    #[serde(skip_serializing)]
    pub unique_id: String,
    #[sqlx(try_from = "String")]
    pub status: CardStatus,
    pub is_active: bool,
    pub patient_id: Option<String>,
    pub batch_number: Option<String>,
    pub received_date: Option<DateTime<Utc>>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub assigned_by: Option<String>,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub deactivated_by: Option<String>,
    pub deactivation_reason: Option<String>,
    pub replaced_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Card {
    /// A card can be bound to a patient unless it has been deactivated.
    pub fn can_be_assigned(&self) -> bool {
        self.is_active && self.status != CardStatus::Inactive
    }

    /// Batch assignment additionally requires the card to be in stock.
    pub fn is_available_for_batch(&self) -> bool {
        self.can_be_assigned() && self.status.is_unassigned()
    }

    pub fn is_printable(&self) -> bool {
        self.is_active && self.status == CardStatus::Assigned
    }
}

#[derive(Debug, Clone)]
pub struct NewCard {
    pub id: Uuid,
    pub barcode_value: String,
    pub unique_id: String,
    pub status: CardStatus,
    pub patient_id: Option<String>,
    pub batch_number: Option<String>,
    pub received_date: Option<DateTime<Utc>>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub assigned_by: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Deactivation<'a> {
    pub reason: &'a str,
    pub at: DateTime<Utc>,
    pub by: &'a str,
    pub replaced_by: Uuid,
}

impl Card {
    /// Finds a card by barcode, locking the row for the rest of the transaction
    pub async fn lock_by_barcode(
        conn: &mut PgConnection,
        barcode_value: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM cards WHERE barcode_value = $1 FOR UPDATE
            "#,
        )
        .bind(barcode_value)
        .fetch_optional(conn)
        .await
    }

    /// Locks every listed card that exists; missing ids are simply absent
    pub async fn lock_by_ids(
        conn: &mut PgConnection,
        ids: &[Uuid],
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM cards WHERE id = ANY($1) ORDER BY id FOR UPDATE
            "#,
        )
        .bind(ids)
        .fetch_all(conn)
        .await
    }

    pub async fn find_by_barcode(
        pool: &PgPool,
        barcode_value: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM cards WHERE barcode_value = $1
            "#,
        )
        .bind(barcode_value)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM cards WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn insert(conn: &mut PgConnection, data: NewCard) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO cards (
                id, barcode_value, unique_id, status, is_active, patient_id,
                batch_number, received_date, assigned_at, assigned_by
            )
            VALUES ($1, $2, $3, $4, TRUE, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(data.id)
        .bind(&data.barcode_value)
        .bind(&data.unique_id)
        .bind(data.status.as_str())
        .bind(&data.patient_id)
        .bind(&data.batch_number)
        .bind(data.received_date)
        .bind(data.assigned_at)
        .bind(&data.assigned_by)
        .fetch_one(conn)
        .await
    }

    /// Binds a card to a patient, replacing its secret with the sealed reference
    pub async fn mark_assigned(
        conn: &mut PgConnection,
        id: Uuid,
        patient_id: &str,
        sealed_reference: &str,
        at: DateTime<Utc>,
        by: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE cards
            SET
                status = 'assigned',
                patient_id = $2,
                unique_id = $3,
                assigned_at = $4,
                assigned_by = $5
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(patient_id)
        .bind(sealed_reference)
        .bind(at)
        .bind(by)
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn mark_deactivated(
        conn: &mut PgConnection,
        id: Uuid,
        deactivation: &Deactivation<'_>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE cards
            SET
                is_active = FALSE,
                status = 'inactive',
                deactivated_at = $2,
                deactivated_by = $3,
                deactivation_reason = $4,
                replaced_by = $5
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(deactivation.at)
        .bind(deactivation.by)
        .bind(deactivation.reason)
        .bind(deactivation.replaced_by)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Returns which of the given barcodes already belong to a card
    pub async fn barcodes_in_use(
        conn: &mut PgConnection,
        barcodes: &[String],
    ) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT barcode_value FROM cards WHERE barcode_value = ANY($1) ORDER BY barcode_value
            "#,
        )
        .bind(barcodes)
        .fetch_all(conn)
        .await
    }
}

/// Eligible card joined with its patient, as selected for printing
#[derive(Debug, Clone, FromRow)]
pub struct PrintableCardRow {
    pub id: Uuid,
    pub barcode_value: String,
    pub patient_id: Option<String>,
    pub patient_name: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintableCard {
    pub id: Uuid,
    pub barcode_value: String,
    pub patient_name: String,
    pub patient_id: String,
    pub issue_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
}

pub fn expiry_date(issue_date: DateTime<Utc>) -> DateTime<Utc> {
    issue_date + Duration::days(CARD_VALIDITY_DAYS)
}

impl From<PrintableCardRow> for PrintableCard {
    fn from(row: PrintableCardRow) -> Self {
        let issue_date = row.assigned_at.unwrap_or(row.created_at);

        Self {
            id: row.id,
            barcode_value: row.barcode_value,
            patient_name: row.patient_name.unwrap_or_else(|| "Unknown".to_string()),
            patient_id: row.patient_id.unwrap_or_else(|| "Unknown".to_string()),
            issue_date,
            expiry_date: expiry_date(issue_date),
        }
    }
}

const PRINTABLE_SELECT: &str = r#"
    SELECT c.id, c.barcode_value, c.patient_id, p.name AS patient_name, c.assigned_at, c.created_at
    FROM cards c
    LEFT JOIN patients p ON p.id = c.patient_id
    WHERE c.is_active = TRUE AND c.status = 'assigned'
"#;

impl PrintableCard {
    /// Lists every card currently eligible for printing, most recently issued first
    pub async fn list_all(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "{PRINTABLE_SELECT} ORDER BY c.assigned_at DESC NULLS LAST, c.created_at DESC"
        );

        let rows = sqlx::query_as::<_, PrintableCardRow>(&query)
            .fetch_all(pool)
            .await?;

        Ok(rows.into_iter().map(Self::from).collect())
    }

    /// Selects the eligible subset of `ids`, holding a share lock on each card
    pub async fn lock_eligible(
        conn: &mut PgConnection,
        ids: &[Uuid],
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "{PRINTABLE_SELECT} AND c.id = ANY($1) ORDER BY c.assigned_at DESC NULLS LAST, c.created_at DESC FOR SHARE OF c"
        );

        let rows = sqlx::query_as::<_, PrintableCardRow>(&query)
            .bind(ids)
            .fetch_all(conn)
            .await?;

        Ok(rows.into_iter().map(Self::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn card(status: CardStatus, is_active: bool) -> Card {
        Card {
            id: Uuid::new_v4(),
            barcode_value: "ABC123".to_string(),
            unique_id: "secret".to_string(),
            status,
            is_active,
            patient_id: None,
            batch_number: None,
            received_date: None,
            assigned_at: None,
            assigned_by: None,
            deactivated_at: None,
            deactivated_by: None,
            deactivation_reason: None,
            replaced_by: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn status_parses_contract_literals() {
        for status in [
            CardStatus::Unassigned,
            CardStatus::Available,
            CardStatus::Assigned,
            CardStatus::Inactive,
        ] {
            assert_eq!(status.as_str().parse::<CardStatus>().unwrap(), status);
        }
        assert!("active".parse::<CardStatus>().is_err());
        assert!("Assigned".parse::<CardStatus>().is_err());
    }

    #[test]
    fn inactive_cards_can_never_be_assigned() {
        assert!(!card(CardStatus::Assigned, false).can_be_assigned());
        assert!(!card(CardStatus::Inactive, true).can_be_assigned());
        assert!(!card(CardStatus::Unassigned, false).is_available_for_batch());
        assert!(card(CardStatus::Assigned, true).can_be_assigned());
    }

    #[test]
    fn batch_availability_requires_stock_status() {
        assert!(card(CardStatus::Unassigned, true).is_available_for_batch());
        assert!(card(CardStatus::Available, true).is_available_for_batch());
        assert!(!card(CardStatus::Assigned, true).is_available_for_batch());
    }

    #[test]
    fn only_active_assigned_cards_are_printable() {
        assert!(card(CardStatus::Assigned, true).is_printable());
        assert!(!card(CardStatus::Assigned, false).is_printable());
        assert!(!card(CardStatus::Available, true).is_printable());
        assert!(!card(CardStatus::Inactive, false).is_printable());
    }

    #[test]
    fn printable_card_expires_a_year_after_issue() {
        let issued = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        let printable = PrintableCard::from(PrintableCardRow {
            id: Uuid::new_v4(),
            barcode_value: "ABC123".to_string(),
            patient_id: Some("P1".to_string()),
            patient_name: None,
            assigned_at: Some(issued),
            created_at: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
        });

        assert_eq!(printable.issue_date, issued);
        assert_eq!(
            printable.expiry_date,
            Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap()
        );
        assert_eq!(printable.patient_name, "Unknown");
        assert_eq!(printable.patient_id, "P1");
    }

    #[test]
    fn printable_card_without_assignment_time_uses_creation_time() {
        let created = Utc.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).unwrap();
        let printable = PrintableCard::from(PrintableCardRow {
            id: Uuid::new_v4(),
            barcode_value: "REPL-ABC123".to_string(),
            patient_id: None,
            patient_name: None,
            assigned_at: None,
            created_at: created,
        });

        assert_eq!(printable.issue_date, created);
        assert_eq!(printable.expiry_date, created + Duration::days(365));
    }
}

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub id: Uuid,
    pub batch_number: String,
    pub vendor: String,
    pub quantity: i32,
    pub import_date: DateTime<Utc>,
}

/// Batch numbers are `BATCH-<unix millis>` of the import time
pub fn batch_number_for(import_date: DateTime<Utc>) -> String {
    format!("BATCH-{}", import_date.timestamp_millis())
}

impl Batch {
    /// Inserts a batch numbered from `import_date`. When that number is
    /// already taken the stamp moves forward one millisecond at a time.
    pub async fn create(
        conn: &mut PgConnection,
        vendor: &str,
        quantity: i32,
        import_date: DateTime<Utc>,
    ) -> Result<Self, sqlx::Error> {
        let mut stamp = import_date;

        loop {
            let created = sqlx::query_as::<_, Self>(
                r#"
                INSERT INTO batches (batch_number, vendor, quantity, import_date)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (batch_number) DO NOTHING
                RETURNING *
                "#,
            )
            .bind(batch_number_for(stamp))
            .bind(vendor)
            .bind(quantity)
            .bind(import_date)
            .fetch_optional(&mut *conn)
            .await?;

            match created {
                Some(batch) => return Ok(batch),
                None => {
                    tracing::debug!(
                        batch_number = %batch_number_for(stamp),
                        "Batch number taken, trying the next millisecond"
                    );
                    stamp += Duration::milliseconds(1);
                }
            }
        }
    }
}

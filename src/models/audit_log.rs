use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    CardAssigned,
    CardDeactivated,
    CardCreated,
    CardPrinted,
    CardImported,
    CardLookup,
    TemplateCreated,
    TemplateUpdated,
}

#[derive(thiserror::Error, Debug)]
#[error("Unknown audit action: {0}")]
pub struct UnknownAuditAction(pub String);

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::CardAssigned => "card_assigned",
            AuditAction::CardDeactivated => "card_deactivated",
            AuditAction::CardCreated => "card_created",
            AuditAction::CardPrinted => "card_printed",
            AuditAction::CardImported => "card_imported",
            AuditAction::CardLookup => "card_lookup",
            AuditAction::TemplateCreated => "template_created",
            AuditAction::TemplateUpdated => "template_updated",
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            AuditAction::TemplateCreated | AuditAction::TemplateUpdated => EntityType::Template,
            _ => EntityType::Card,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = UnknownAuditAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "card_assigned" => Ok(AuditAction::CardAssigned),
            "card_deactivated" => Ok(AuditAction::CardDeactivated),
            "card_created" => Ok(AuditAction::CardCreated),
            "card_printed" => Ok(AuditAction::CardPrinted),
            "card_imported" => Ok(AuditAction::CardImported),
            "card_lookup" => Ok(AuditAction::CardLookup),
            "template_created" => Ok(AuditAction::TemplateCreated),
            "template_updated" => Ok(AuditAction::TemplateUpdated),
            other => Err(UnknownAuditAction(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Card,
    Template,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Card => "card",
            EntityType::Template => "template",
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AuditLog {
    pub id: Uuid,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub user_id: String,
    #[serde(rename = "timestamp")]
    pub logged_at: DateTime<Utc>,
    pub details: JsonValue,
}

/// One audit entry to append alongside a state change
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub action: AuditAction,
    pub entity_id: Uuid,
    pub user_id: String,
    pub details: JsonValue,
}

impl AuditEntry {
    pub fn new(action: AuditAction, entity_id: Uuid, user_id: &str, details: JsonValue) -> Self {
        Self {
            action,
            entity_id,
            user_id: user_id.to_string(),
            details,
        }
    }
}

impl AuditLog {
    /// Appends entries on the caller's connection so they commit with the change
    pub async fn record_all(
        conn: &mut PgConnection,
        entries: &[AuditEntry],
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut logs = Vec::with_capacity(entries.len());

        for entry in entries {
            let log = sqlx::query_as::<_, Self>(
                r#"
                INSERT INTO audit_logs (action, entity_type, entity_id, user_id, details)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id, action, entity_type, entity_id, user_id, logged_at, details
                "#,
            )
            .bind(entry.action.as_str())
            .bind(entry.action.entity_type().as_str())
            .bind(entry.entity_id)
            .bind(&entry.user_id)
            .bind(&entry.details)
            .fetch_one(&mut *conn)
            .await?;

            logs.push(log);
        }

        Ok(logs)
    }

    pub async fn record(conn: &mut PgConnection, entry: AuditEntry) -> Result<Self, sqlx::Error> {
        let mut logs = Self::record_all(conn, std::slice::from_ref(&entry)).await?;
        logs.pop().ok_or(sqlx::Error::RowNotFound)
    }
}

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::models::{audit_log::AuditAction, card::CardStatus};

pub const INVENTORY_PAGE_SIZE: i64 = 10;
pub const DEFAULT_AUDIT_PAGE_SIZE: i64 = 10;
pub const MAX_AUDIT_PAGE_SIZE: i64 = 100;

/// 1-based page of a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub per_page: i64,
}

impl PageRequest {
    pub fn new(page: Option<i64>, per_page: i64) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.max(1),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.per_page)
    }
}

pub fn total_pages(total: i64, per_page: i64) -> i64 {
    if total <= 0 {
        return 0;
    }
    (total + per_page - 1) / per_page
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InventoryFilter {
    pub status: Option<CardStatus>,
    pub is_active: Option<bool>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditFilter {
    pub action: Option<AuditAction>,
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub id: Uuid,
    pub barcode_value: String,
    pub status: String,
    pub is_active: bool,
    pub assigned_at: Option<DateTime<Utc>>,
    pub assigned_to: Option<String>,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub deactivation_reason: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
struct AuditLogRow {
    id: Uuid,
    action: String,
    entity_type: String,
    entity_id: Uuid,
    user_id: String,
    logged_at: DateTime<Utc>,
    details: JsonValue,
    card_barcode_value: Option<String>,
    card_status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditCardSummary {
    pub barcode_value: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogListItem {
    pub id: Uuid,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub details: JsonValue,
    pub card: Option<AuditCardSummary>,
}

impl From<AuditLogRow> for AuditLogListItem {
    fn from(row: AuditLogRow) -> Self {
        let card = match (row.card_barcode_value, row.card_status) {
            (Some(barcode_value), Some(status)) => Some(AuditCardSummary {
                barcode_value,
                status,
            }),
            _ => None,
        };

        Self {
            id: row.id,
            action: row.action,
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            user_id: row.user_id,
            timestamp: row.logged_at,
            details: row.details,
            card,
        }
    }
}

/// Escapes LIKE metacharacters so the search term matches literally
fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn push_clause(builder: &mut QueryBuilder<'_, Postgres>, has_clause: &mut bool) {
    if *has_clause {
        builder.push(" AND ");
    } else {
        builder.push(" WHERE ");
        *has_clause = true;
    }
}

const INVENTORY_FROM: &str = " FROM cards c LEFT JOIN patients p ON p.id = c.patient_id";

fn apply_inventory_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &InventoryFilter) {
    let mut has_clause = false;

    if let Some(status) = filter.status {
        push_clause(builder, &mut has_clause);
        builder.push("c.status = ").push_bind(status.as_str());
    }
    if let Some(is_active) = filter.is_active {
        push_clause(builder, &mut has_clause);
        builder.push("c.is_active = ").push_bind(is_active);
    }
    if let Some(search) = filter.search.as_deref() {
        let pattern = like_pattern(search);
        push_clause(builder, &mut has_clause);
        builder
            .push("(c.barcode_value ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR p.name ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

fn inventory_page_query(filter: &InventoryFilter, page: PageRequest) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(
        "SELECT c.id, c.barcode_value, c.status, c.is_active, c.assigned_at, \
         p.name AS assigned_to, c.deactivated_at, c.deactivation_reason",
    );
    builder.push(INVENTORY_FROM);
    apply_inventory_filter(&mut builder, filter);
    builder
        .push(" ORDER BY c.created_at DESC, c.id DESC LIMIT ")
        .push_bind(page.per_page)
        .push(" OFFSET ")
        .push_bind(page.offset());
    builder
}

fn inventory_count_query(filter: &InventoryFilter) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new("SELECT COUNT(*)");
    builder.push(INVENTORY_FROM);
    apply_inventory_filter(&mut builder, filter);
    builder
}

/// Returns one page of cards and the total number of matching cards
pub async fn list_inventory(
    pool: &PgPool,
    filter: &InventoryFilter,
    page: PageRequest,
) -> Result<(Vec<InventoryItem>, i64), sqlx::Error> {
    let mut page_query = inventory_page_query(filter, page);
    let items = page_query
        .build_query_as::<InventoryItem>()
        .fetch_all(pool)
        .await?;

    let mut count_query = inventory_count_query(filter);
    let total = count_query
        .build_query_scalar::<i64>()
        .fetch_one(pool)
        .await?;

    Ok((items, total))
}

fn apply_audit_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &AuditFilter) {
    let mut has_clause = false;

    if let Some(action) = filter.action {
        push_clause(builder, &mut has_clause);
        builder.push("a.action = ").push_bind(action.as_str());
    }
    if let Some(from) = filter.from {
        push_clause(builder, &mut has_clause);
        builder.push("a.logged_at >= ").push_bind(from);
    }
    if let Some(until) = filter.until {
        push_clause(builder, &mut has_clause);
        builder.push("a.logged_at < ").push_bind(until);
    }
}

fn audit_page_query(filter: &AuditFilter, page: PageRequest) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(
        "SELECT a.id, a.action, a.entity_type, a.entity_id, a.user_id, a.logged_at, a.details, \
         c.barcode_value AS card_barcode_value, c.status AS card_status \
         FROM audit_logs a \
         LEFT JOIN cards c ON a.entity_type = 'card' AND c.id = a.entity_id",
    );
    apply_audit_filter(&mut builder, filter);
    builder
        .push(" ORDER BY a.logged_at DESC, a.id DESC LIMIT ")
        .push_bind(page.per_page)
        .push(" OFFSET ")
        .push_bind(page.offset());
    builder
}

fn audit_count_query(filter: &AuditFilter) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new("SELECT COUNT(*) FROM audit_logs a");
    apply_audit_filter(&mut builder, filter);
    builder
}

pub async fn list_audit_logs(
    pool: &PgPool,
    filter: &AuditFilter,
    page: PageRequest,
) -> Result<(Vec<AuditLogListItem>, i64), sqlx::Error> {
    let mut page_query = audit_page_query(filter, page);
    let rows = page_query
        .build_query_as::<AuditLogRow>()
        .fetch_all(pool)
        .await?;

    let mut count_query = audit_count_query(filter);
    let total = count_query
        .build_query_scalar::<i64>()
        .fetch_one(pool)
        .await?;

    Ok((rows.into_iter().map(AuditLogListItem::from).collect(), total))
}

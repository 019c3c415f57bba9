use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use crate::api::middleware::{auth::AuthenticatedStaff, state::AppState};
use crate::error::{AppError, Result};
use crate::models::{
    audit_log::AuditAction,
    card::CardStatus,
    listing::{
        self, total_pages, AuditFilter, InventoryFilter, PageRequest, DEFAULT_AUDIT_PAGE_SIZE,
        INVENTORY_PAGE_SIZE, MAX_AUDIT_PAGE_SIZE,
    },
};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryQuery {
    pub page: Option<String>,
    pub status: Option<String>,
    pub is_active: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub action: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// Blank values and `all` mean "no filter"
fn filter_value(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("all"))
}

fn parse_int(raw: Option<&str>, name: &str) -> Result<Option<i64>> {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| {
            v.parse::<i64>()
                .map_err(|_| AppError::Validation(format!("`{name}` must be an integer")))
        })
        .transpose()
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(AppError::Validation(
            "`isActive` must be true or false".to_string(),
        )),
    }
}

/// Start of a range: a plain date means midnight UTC
fn parse_range_start(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
}

/// Exclusive end of a range: a plain date covers that whole day, an instant
/// is included itself
fn parse_range_end(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return dt
            .with_timezone(&Utc)
            .checked_add_signed(Duration::microseconds(1));
    }
    parse_range_start(value).and_then(|start| start.checked_add_signed(Duration::days(1)))
}

pub fn inventory_filter(query: &InventoryQuery) -> Result<InventoryFilter> {
    let status = filter_value(query.status.as_deref())
        .map(|s| s.parse::<CardStatus>())
        .transpose()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    let is_active = filter_value(query.is_active.as_deref())
        .map(parse_bool)
        .transpose()?;
    let search = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Ok(InventoryFilter {
        status,
        is_active,
        search,
    })
}

pub fn audit_filter(query: &AuditQuery) -> Result<AuditFilter> {
    let action = filter_value(query.action.as_deref())
        .map(|a| a.parse::<AuditAction>())
        .transpose()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let date_error =
        || AppError::Validation("`startDate`/`endDate` must be YYYY-MM-DD or RFC3339".to_string());
    let from = filter_value(query.start_date.as_deref())
        .map(|v| parse_range_start(v).ok_or_else(date_error))
        .transpose()?;
    let until = filter_value(query.end_date.as_deref())
        .map(|v| parse_range_end(v).ok_or_else(date_error))
        .transpose()?;

    if let (Some(from), Some(until)) = (from, until) {
        if from >= until {
            return Err(AppError::Validation(
                "`startDate` must not be after `endDate`".to_string(),
            ));
        }
    }

    Ok(AuditFilter {
        action,
        from,
        until,
    })
}

pub fn audit_page(query: &AuditQuery) -> Result<PageRequest> {
    let page = parse_int(query.page.as_deref(), "page")?;
    let limit = parse_int(query.limit.as_deref(), "limit")?
        .unwrap_or(DEFAULT_AUDIT_PAGE_SIZE)
        .clamp(1, MAX_AUDIT_PAGE_SIZE);

    Ok(PageRequest::new(page, limit))
}

/// GET /cards/inventory
async fn inventory(
    State(state): State<AppState>,
    _staff: AuthenticatedStaff,
    Query(query): Query<InventoryQuery>,
) -> Result<Json<JsonValue>> {
    let filter = inventory_filter(&query)?;
    let page = PageRequest::new(
        parse_int(query.page.as_deref(), "page")?,
        INVENTORY_PAGE_SIZE,
    );

    let (cards, total) = listing::list_inventory(&state.pool, &filter, page).await?;

    Ok(Json(json!({
        "cards": cards,
        "totalPages": total_pages(total, page.per_page),
        "currentPage": page.page,
    })))
}

/// GET /cards/audit
async fn audit_logs(
    State(state): State<AppState>,
    _staff: AuthenticatedStaff,
    Query(query): Query<AuditQuery>,
) -> Result<Json<JsonValue>> {
    let filter = audit_filter(&query)?;
    let page = audit_page(&query)?;

    let (logs, total) = listing::list_audit_logs(&state.pool, &filter, page).await?;

    Ok(Json(json!({
        "logs": logs,
        "totalPages": total_pages(total, page.per_page),
        "currentPage": page.page,
    })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/cards/inventory", get(inventory))
        .route("/cards/audit", get(audit_logs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn all_means_unfiltered() {
        let filter = inventory_filter(&InventoryQuery {
            status: Some("all".to_string()),
            is_active: Some("".to_string()),
            search: Some("   ".to_string()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(filter, InventoryFilter::default());
    }

    #[test]
    fn inventory_filter_parses_known_values() {
        let filter = inventory_filter(&InventoryQuery {
            status: Some("assigned".to_string()),
            is_active: Some("false".to_string()),
            search: Some(" ABC ".to_string()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(filter.status, Some(CardStatus::Assigned));
        assert_eq!(filter.is_active, Some(false));
        assert_eq!(filter.search.as_deref(), Some("ABC"));
    }

    #[test]
    fn unknown_filter_values_are_rejected() {
        assert!(inventory_filter(&InventoryQuery {
            status: Some("active".to_string()),
            ..Default::default()
        })
        .is_err());
        assert!(inventory_filter(&InventoryQuery {
            is_active: Some("yes".to_string()),
            ..Default::default()
        })
        .is_err());
        assert!(audit_filter(&AuditQuery {
            action: Some("assigned".to_string()),
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn end_date_covers_the_whole_day() {
        let filter = audit_filter(&AuditQuery {
            action: Some("card_printed".to_string()),
            start_date: Some("2024-03-01".to_string()),
            end_date: Some("2024-03-31".to_string()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(filter.action, Some(AuditAction::CardPrinted));
        assert_eq!(filter.from, Some(date(2024, 3, 1)));
        assert_eq!(filter.until, Some(date(2024, 4, 1)));
    }

    #[test]
    fn dates_accept_rfc3339() {
        let filter = audit_filter(&AuditQuery {
            start_date: Some("2024-03-01T09:00:00+09:00".to_string()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(
            filter.from,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
        );
        assert!(filter.until.is_none());
    }

    #[test]
    fn bad_or_inverted_dates_are_rejected() {
        assert!(audit_filter(&AuditQuery {
            start_date: Some("03/01/2024".to_string()),
            ..Default::default()
        })
        .is_err());
        assert!(audit_filter(&AuditQuery {
            start_date: Some("2024-04-02".to_string()),
            end_date: Some("2024-04-01".to_string()),
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn end_date_at_the_calendar_limit_is_rejected() {
        let result = audit_filter(&AuditQuery {
            end_date: Some("+262142-12-31".to_string()),
            ..Default::default()
        });
        assert!(matches!(result, Err(AppError::Validation(_))));

        let result = audit_filter(&AuditQuery {
            end_date: Some("+262142-12-31T23:59:59.999999999Z".to_string()),
            ..Default::default()
        });
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn single_day_range_is_allowed() {
        let filter = audit_filter(&AuditQuery {
            start_date: Some("2024-04-01".to_string()),
            end_date: Some("2024-04-01".to_string()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(filter.until, Some(date(2024, 4, 2)));
    }

    #[test]
    fn audit_limit_defaults_and_clamps() {
        assert_eq!(audit_page(&AuditQuery::default()).unwrap().per_page, 10);

        let page = audit_page(&AuditQuery {
            page: Some("3".to_string()),
            limit: Some("500".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(page.per_page, 100);
        assert_eq!(page.offset(), 200);

        let page = audit_page(&AuditQuery {
            page: Some("-4".to_string()),
            limit: Some("0".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(page.per_page, 1);
        assert_eq!(page.page, 1);

        assert!(audit_page(&AuditQuery {
            page: Some("two".to_string()),
            ..Default::default()
        })
        .is_err());
    }
}

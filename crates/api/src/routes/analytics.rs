//! Analytics routes

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use serde::Deserialize;
use time::{format_description::well_known::Rfc3339, macros::format_description, Date};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;
use waveorder_analytics::{AnalyticsReport, CxRange, CxReport};

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

const DEFAULT_REPORT_DAYS: i64 = 30;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreAnalyticsQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CustomerExperienceQuery {
    pub range: Option<String>,
}

/// Accepts `YYYY-MM-DD` (UTC midnight) or RFC 3339
pub fn parse_date(field: &str, value: &str) -> ApiResult<OffsetDateTime> {
    let value = value.trim();
    if let Ok(at) = OffsetDateTime::parse(value, &Rfc3339) {
        return Ok(at);
    }
    Date::parse(value, format_description!("[year]-[month]-[day]"))
        .map(|day| day.midnight().assume_utc())
        .map_err(|_| {
            ApiError::Validation(format!(
                "{} must be YYYY-MM-DD or an RFC 3339 timestamp",
                field
            ))
        })
}

pub async fn store_analytics(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(business_id): Path<Uuid>,
    Query(query): Query<StoreAnalyticsQuery>,
) -> ApiResult<Json<AnalyticsReport>> {
    auth_user.require_business_access(business_id)?;

    let end = match query.end_date.as_deref() {
        Some(value) => parse_date("endDate", value)?,
        None => OffsetDateTime::now_utc(),
    };
    let start = match query.start_date.as_deref() {
        Some(value) => parse_date("startDate", value)?,
        None => end - Duration::days(DEFAULT_REPORT_DAYS),
    };

    let report = state.analytics.report(business_id, start, end).await?;
    Ok(Json(report))
}

pub async fn customer_experience(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<CustomerExperienceQuery>,
) -> ApiResult<Json<CxReport>> {
    auth_user.require_superadmin()?;

    let range = match query.range.as_deref() {
        Some(value) => value.parse::<CxRange>()?,
        None => CxRange::default(),
    };

    let report = state.cx.report(range, OffsetDateTime::now_utc()).await?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_parse_plain_date_as_utc_midnight() {
        assert_eq!(
            parse_date("startDate", "2025-03-01").unwrap(),
            datetime!(2025-03-01 00:00 UTC)
        );
    }

    #[test]
    fn test_parse_rfc3339() {
        assert_eq!(
            parse_date("endDate", "2025-03-31T18:30:00+02:00").unwrap(),
            datetime!(2025-03-31 16:30 UTC)
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_date("endDate", "31/03/2025"),
            Err(ApiError::Validation(_))
        ));
    }
}

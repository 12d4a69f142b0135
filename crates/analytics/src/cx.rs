//! Platform-wide customer-experience scoring
//!
//! Several of these are proxies rather than measurements. CES is derived
//! from onboarding speed, not a survey. First-contact resolution counts
//! resolved tickets with exactly one comment. CLV is tenure times list
//! price. At-risk weights are fixed constants.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::Serialize;
use time::{Date, Duration, Month, OffsetDateTime, UtcOffset};
use uuid::Uuid;
use waveorder_shared::SubscriptionPlan;

use crate::error::AnalyticsError;
use crate::models::{
    BusinessLifecycle, Feedback, OnboardingCompletion, RiskSignals, TicketActivity,
};

/// Months shown in the NPS and churn trends
pub const TREND_MONTHS: u32 = 6;
/// At-risk list length
pub const AT_RISK_LIMIT: usize = 20;

// =============================================================================
// Range
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CxRange {
    Days7,
    #[default]
    Days30,
    Days90,
    Year1,
}

impl CxRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            CxRange::Days7 => "7d",
            CxRange::Days30 => "30d",
            CxRange::Days90 => "90d",
            CxRange::Year1 => "1y",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            CxRange::Days7 => Duration::days(7),
            CxRange::Days30 => Duration::days(30),
            CxRange::Days90 => Duration::days(90),
            CxRange::Year1 => Duration::days(365),
        }
    }
}

impl FromStr for CxRange {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "7d" => Ok(CxRange::Days7),
            "30d" => Ok(CxRange::Days30),
            "90d" => Ok(CxRange::Days90),
            "1y" => Ok(CxRange::Year1),
            other => Err(AnalyticsError::InvalidInput(format!(
                "range must be one of 7d, 30d, 90d, 1y (got '{}')",
                other
            ))),
        }
    }
}

// =============================================================================
// Report types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyNps {
    /// `YYYY-MM`
    pub month: String,
    pub score: Option<i64>,
    pub responses: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NpsSummary {
    pub score: Option<i64>,
    pub promoters: i64,
    pub passives: i64,
    pub detractors: i64,
    pub responses: i64,
    pub trend: Vec<MonthlyNps>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CsatBucket {
    pub score: f64,
    pub responses: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CsatSummary {
    pub score: Option<f64>,
    pub responses: i64,
    pub by_type: BTreeMap<String, CsatBucket>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CesSummary {
    pub score: Option<f64>,
    pub avg_onboarding_hours: Option<f64>,
    pub avg_days_to_first_order: Option<f64>,
    pub completions: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyChurn {
    pub month: String,
    pub rate: f64,
    pub churned: i64,
    pub base: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChurnSummary {
    pub rate: f64,
    pub churned: i64,
    /// Businesses that existed before the window started
    pub base: i64,
    pub trend: Vec<MonthlyChurn>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanClv {
    pub plan: SubscriptionPlan,
    pub businesses: i64,
    pub average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClvSummary {
    /// Currency units, not cents
    pub average: f64,
    pub total: f64,
    pub businesses: i64,
    pub by_plan: Vec<PlanClv>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportSummary {
    pub avg_first_response_hours: Option<f64>,
    pub first_contact_resolution_rate: Option<f64>,
    pub open_tickets: i64,
    pub tickets: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AtRiskBusiness {
    pub business_id: Uuid,
    pub name: String,
    pub risk_score: i64,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CxReport {
    pub range: String,
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
    pub nps: NpsSummary,
    pub csat: CsatSummary,
    pub ces: CesSummary,
    pub churn: ChurnSummary,
    pub clv: ClvSummary,
    pub support: SupportSummary,
    pub at_risk: Vec<AtRiskBusiness>,
}

/// Rows the scorer works from, already fetched
#[derive(Debug, Clone, Default)]
pub struct CxInputs {
    /// Everything since the earlier of the window start and the trend start
    pub feedback: Vec<Feedback>,
    pub businesses: Vec<BusinessLifecycle>,
    pub onboarding: Vec<OnboardingCompletion>,
    pub tickets: Vec<TicketActivity>,
    pub risk: Vec<RiskSignals>,
}

// =============================================================================
// Scoring
// =============================================================================

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn hours(d: Duration) -> f64 {
    d.as_seconds_f64() / 3_600.0
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// First instant of the calendar month `months_back` months before `now`'s month
fn month_start(now: OffsetDateTime, months_back: u32) -> OffsetDateTime {
    let now = now.to_offset(UtcOffset::UTC);
    let total = now.year() * 12 + (now.month() as i32 - 1) - months_back as i32;
    let year = total.div_euclid(12);
    let month = Month::try_from((total.rem_euclid(12) + 1) as u8).unwrap_or(Month::January);
    Date::from_calendar_date(year, month, 1)
        .map(|d| d.midnight().assume_utc())
        .unwrap_or(now)
}

/// Oldest first: `[start, end)` for each of the last `TREND_MONTHS` months
fn trend_months(now: OffsetDateTime) -> Vec<(OffsetDateTime, OffsetDateTime)> {
    (0..TREND_MONTHS)
        .rev()
        .map(|back| {
            let start = month_start(now, back);
            let end = if back == 0 {
                now + Duration::milliseconds(1)
            } else {
                month_start(now, back - 1)
            };
            (start, end)
        })
        .collect()
}

fn month_label(start: OffsetDateTime) -> String {
    format!("{:04}-{:02}", start.year(), start.month() as u8)
}

/// The earliest instant any part of the report reads
pub fn feedback_since(range: CxRange, now: OffsetDateTime) -> OffsetDateTime {
    (now - range.duration()).min(month_start(now, TREND_MONTHS - 1))
}

/// `None` with no responses
pub fn nps_score(ratings: &[i32]) -> Option<i64> {
    if ratings.is_empty() {
        return None;
    }
    let promoters = ratings.iter().filter(|&&r| r >= 9).count() as f64;
    let detractors = ratings.iter().filter(|&&r| r <= 6).count() as f64;
    Some(((promoters - detractors) / ratings.len() as f64 * 100.0).round() as i64)
}

pub fn nps(feedback: &[Feedback], start: OffsetDateTime, now: OffsetDateTime) -> NpsSummary {
    let in_window: Vec<i32> = feedback
        .iter()
        .filter(|f| f.is_nps() && f.created_at >= start && f.created_at <= now)
        .map(|f| f.rating)
        .collect();

    let trend = trend_months(now)
        .into_iter()
        .map(|(from, to)| {
            let ratings: Vec<i32> = feedback
                .iter()
                .filter(|f| f.is_nps() && f.created_at >= from && f.created_at < to)
                .map(|f| f.rating)
                .collect();
            MonthlyNps {
                month: month_label(from),
                score: nps_score(&ratings),
                responses: ratings.len() as i64,
            }
        })
        .collect();

    NpsSummary {
        score: nps_score(&in_window),
        promoters: in_window.iter().filter(|&&r| r >= 9).count() as i64,
        passives: in_window.iter().filter(|&&r| (7..=8).contains(&r)).count() as i64,
        detractors: in_window.iter().filter(|&&r| r <= 6).count() as i64,
        responses: in_window.len() as i64,
        trend,
    }
}

/// Mean rating of non-NPS feedback, overall and per type
pub fn csat(feedback: &[Feedback], start: OffsetDateTime, now: OffsetDateTime) -> CsatSummary {
    let mut by_type: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    let mut all = Vec::new();
    for f in feedback
        .iter()
        .filter(|f| !f.is_nps() && f.created_at >= start && f.created_at <= now)
    {
        all.push(f.rating as f64);
        by_type
            .entry(f.feedback_type.to_ascii_uppercase())
            .or_default()
            .push(f.rating as f64);
    }

    CsatSummary {
        score: mean(&all).map(round1),
        responses: all.len() as i64,
        by_type: by_type
            .into_iter()
            .filter_map(|(kind, ratings)| {
                mean(&ratings).map(|avg| {
                    (
                        kind,
                        CsatBucket {
                            score: round1(avg),
                            responses: ratings.len() as i64,
                        },
                    )
                })
            })
            .collect(),
    }
}

/// `5 - 0.5*(hours/24) - 0.5*(days/7)` clamped to `[1, 5]`
pub fn ces_score(onboarding_hours: f64, first_order_days: f64) -> f64 {
    round1((5.0 - 0.5 * (onboarding_hours / 24.0) - 0.5 * (first_order_days / 7.0)).clamp(1.0, 5.0))
}

pub fn ces(completions: &[OnboardingCompletion]) -> CesSummary {
    let onboarding_hours: Vec<f64> = completions
        .iter()
        .map(|c| hours(c.onboarding_completed_at - c.created_at).max(0.0))
        .collect();
    let first_order_days: Vec<f64> = completions
        .iter()
        .filter_map(|c| {
            c.first_order_at
                .map(|first| hours(first - c.onboarding_completed_at).max(0.0) / 24.0)
        })
        .collect();

    let avg_hours = mean(&onboarding_hours);
    let avg_days = mean(&first_order_days);

    CesSummary {
        score: avg_hours.map(|h| ces_score(h, avg_days.unwrap_or(0.0))),
        avg_onboarding_hours: avg_hours.map(round1),
        avg_days_to_first_order: avg_days.map(round1),
        completions: completions.len() as i64,
    }
}

fn churn_between(
    businesses: &[BusinessLifecycle],
    from: OffsetDateTime,
    to: OffsetDateTime,
) -> (i64, i64, f64) {
    let base = businesses.iter().filter(|b| b.created_at < from).count() as i64;
    let churned = businesses
        .iter()
        .filter(|b| b.deactivated_at.is_some_and(|at| at >= from && at < to))
        .count() as i64;
    let rate = if base == 0 {
        0.0
    } else {
        round1(churned as f64 / base as f64 * 100.0)
    };
    (churned, base, rate)
}

pub fn churn(businesses: &[BusinessLifecycle], start: OffsetDateTime, now: OffsetDateTime) -> ChurnSummary {
    let (churned, base, rate) = churn_between(businesses, start, now + Duration::milliseconds(1));
    let trend = trend_months(now)
        .into_iter()
        .map(|(from, to)| {
            let (churned, base, rate) = churn_between(businesses, from, to);
            MonthlyChurn {
                month: month_label(from),
                rate,
                churned,
                base,
            }
        })
        .collect();

    ChurnSummary {
        rate,
        churned,
        base,
        trend,
    }
}

/// Whole calendar months from `from` to `to`, at least 1
pub fn tenure_months(from: OffsetDateTime, to: OffsetDateTime) -> i64 {
    let from = from.to_offset(UtcOffset::UTC);
    let to = to.to_offset(UtcOffset::UTC);
    let mut months = (to.year() as i64 - from.year() as i64) * 12
        + (to.month() as i64 - from.month() as i64);
    if to.day() < from.day() {
        months -= 1;
    }
    months.max(1)
}

pub fn clv(businesses: &[BusinessLifecycle], now: OffsetDateTime) -> ClvSummary {
    let mut per_plan: BTreeMap<&'static str, (SubscriptionPlan, Vec<f64>)> = SubscriptionPlan::ALL
        .iter()
        .map(|plan| (plan.as_str(), (*plan, Vec::new())))
        .collect();
    let mut all = Vec::new();

    for business in businesses
        .iter()
        .filter(|b| b.is_active && b.subscription_status.is_active())
    {
        let Some(plan) = business.plan else {
            continue;
        };
        let cents = plan.monthly_price_cents(business.billing_type)
            * tenure_months(business.created_at, now);
        let value = cents as f64 / 100.0;
        all.push(value);
        if let Some((_, values)) = per_plan.get_mut(plan.as_str()) {
            values.push(value);
        }
    }

    ClvSummary {
        average: mean(&all).map(round2).unwrap_or(0.0),
        total: round2(all.iter().sum()),
        businesses: all.len() as i64,
        by_plan: SubscriptionPlan::ALL
            .iter()
            .filter_map(|plan| per_plan.get(plan.as_str()))
            .map(|(plan, values)| PlanClv {
                plan: *plan,
                businesses: values.len() as i64,
                average: mean(values).map(round2).unwrap_or(0.0),
            })
            .collect(),
    }
}

pub fn support(tickets: &[TicketActivity]) -> SupportSummary {
    let first_response: Vec<f64> = tickets
        .iter()
        .filter_map(|t| {
            t.comment_times
                .iter()
                .min()
                .map(|first| hours(*first - t.created_at).max(0.0))
        })
        .collect();

    let resolved: Vec<&TicketActivity> = tickets.iter().filter(|t| t.is_resolved()).collect();
    let first_contact = resolved
        .iter()
        .filter(|t| t.comment_times.len() == 1)
        .count();
    let fcr = if resolved.is_empty() {
        None
    } else {
        Some(round1(first_contact as f64 / resolved.len() as f64 * 100.0))
    };

    SupportSummary {
        avg_first_response_hours: mean(&first_response).map(round1),
        first_contact_resolution_rate: fcr,
        open_tickets: tickets.iter().filter(|t| t.is_open()).count() as i64,
        tickets: tickets.len() as i64,
    }
}

/// Additive heuristic score with the reasons that contributed
pub fn risk_score(signals: &RiskSignals, now: OffsetDateTime) -> (i64, Vec<String>) {
    let mut score = 0;
    let mut reasons = Vec::new();

    match signals.orders_last_30d {
        0 => {
            score += 30;
            reasons.push("No orders in the last 30 days".to_string());
        }
        n @ 1..=2 => {
            score += 15;
            reasons.push(format!("Only {} order(s) in the last 30 days", n));
        }
        _ => {}
    }

    match signals.tickets_last_30d {
        n if n >= 3 => {
            score += 25;
            reasons.push(format!("{} support tickets in the last 30 days", n));
        }
        2 => {
            score += 10;
            reasons.push("2 support tickets in the last 30 days".to_string());
        }
        _ => {}
    }

    match signals.latest_feedback_rating {
        Some(rating) if rating <= 2 => {
            score += 35;
            reasons.push(format!("Latest feedback rating {}", rating));
        }
        Some(rating) if rating <= 3 => {
            score += 15;
            reasons.push(format!("Latest feedback rating {}", rating));
        }
        _ => {}
    }

    if let Some(last_order) = signals.last_order_at {
        let idle = now - last_order;
        if idle > Duration::days(14) {
            score += 20;
            reasons.push(format!("Last order {} days ago", idle.whole_days()));
        }
    }

    (score, reasons)
}

pub fn at_risk(signals: &[RiskSignals], now: OffsetDateTime) -> Vec<AtRiskBusiness> {
    let mut ranked: Vec<AtRiskBusiness> = signals
        .iter()
        .filter_map(|s| {
            let (risk_score, reasons) = risk_score(s, now);
            (risk_score > 0).then(|| AtRiskBusiness {
                business_id: s.business_id,
                name: s.name.clone(),
                risk_score,
                reasons,
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.risk_score
            .cmp(&a.risk_score)
            .then_with(|| a.name.cmp(&b.name))
    });
    ranked.truncate(AT_RISK_LIMIT);
    ranked
}

/// Score everything for the window ending at `now`
pub fn score(range: CxRange, now: OffsetDateTime, inputs: &CxInputs) -> CxReport {
    let start = now - range.duration();
    CxReport {
        range: range.as_str().to_string(),
        start,
        end: now,
        nps: nps(&inputs.feedback, start, now),
        csat: csat(&inputs.feedback, start, now),
        ces: ces(&inputs.onboarding),
        churn: churn(&inputs.businesses, start, now),
        clv: clv(&inputs.businesses, now),
        support: support(&inputs.tickets),
        at_risk: at_risk(&inputs.risk, now),
    }
}

//! Per-business analytics report
//!
//! Blends two generations of traffic data with order data. Legacy rows are
//! daily visitor totals with no per-visitor identity; sessions are one row
//! per visit keyed by IP. The blend is an approximation:
//!
//! - views add legacy daily totals to the session count
//! - unique visitors add legacy daily totals to distinct session IPs
//! - bounce rate uses sessions only
//!
//! Attribution is estimated. Sessions are not linked to the orders they
//! produced, so each dimension key gets a share of all orders proportional
//! to its share of sessions.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use time::macros::time;
use time::{Date, Duration, OffsetDateTime, UtcOffset, Weekday};
use uuid::Uuid;

use crate::error::{AnalyticsError, AnalyticsResult};
use crate::models::{Order, VisitorSession, WindowData};

const TOP_PRODUCTS: usize = 10;

// =============================================================================
// Window
// =============================================================================

/// Inclusive reporting window, whole UTC days
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportWindow {
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
}

impl ReportWindow {
    /// Normalize `start` to the first and `end` to the last millisecond of
    /// their UTC days.
    pub fn new(start: OffsetDateTime, end: OffsetDateTime) -> AnalyticsResult<Self> {
        let start_day = start.to_offset(UtcOffset::UTC).date();
        let end_day = end.to_offset(UtcOffset::UTC).date();
        if start_day > end_day {
            return Err(AnalyticsError::InvalidRange(format!(
                "start date {} is after end date {}",
                start_day, end_day
            )));
        }
        Ok(Self::from_days(start_day, end_day))
    }

    pub fn from_days(start_day: Date, end_day: Date) -> Self {
        Self {
            start: start_day.midnight().assume_utc(),
            end: end_day.with_time(time!(23:59:59.999)).assume_utc(),
        }
    }

    pub fn length(&self) -> Duration {
        self.end - self.start
    }

    /// Window of equal length ending just before this one starts
    pub fn previous(&self) -> Self {
        let end = self.start - Duration::milliseconds(1);
        Self {
            start: end - self.length(),
            end,
        }
    }

    pub fn contains(&self, at: OffsetDateTime) -> bool {
        at >= self.start && at <= self.end
    }

    /// Calendar days covered, oldest first
    pub fn days(&self) -> Vec<Date> {
        let mut days = Vec::new();
        let mut day = self.start.date();
        let last = self.end.date();
        while day <= last {
            days.push(day);
            match day.next_day() {
                Some(next) => day = next,
                None => break,
            }
        }
        days
    }
}

// =============================================================================
// Report types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub views: i64,
    pub unique_visitors: i64,
    pub total_orders: i64,
    pub completed_orders: i64,
    pub revenue: f64,
    pub average_order_value: f64,
    pub conversion_rate: f64,
    pub bounce_rate: f64,
    pub views_growth: f64,
    pub revenue_growth: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyTraffic {
    /// `YYYY-MM-DD`
    pub date: String,
    pub views: i64,
    pub orders: i64,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductStats {
    pub product_id: Uuid,
    pub name: String,
    pub quantity: i64,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HourBucket {
    pub hour: u8,
    pub orders: i64,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekdayBucket {
    pub day: String,
    pub orders: i64,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerStats {
    pub total_customers: i64,
    pub repeat_customers: i64,
    pub repeat_rate: f64,
}

/// Traffic and estimated orders for one dimension value
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DimensionStats {
    pub visitor_count: i64,
    pub estimated_order_count: i64,
    pub conversion_rate: f64,
}

/// Dimension value to stats. Absent keys read as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DimensionBreakdown(BTreeMap<String, DimensionStats>);

impl DimensionBreakdown {
    fn from_counts(counts: HashMap<String, i64>, total_orders: i64, total_visits: i64) -> Self {
        let entries = counts
            .into_iter()
            .map(|(key, visitor_count)| {
                let estimated_order_count = if total_visits > 0 {
                    (total_orders as f64 * visitor_count as f64 / total_visits as f64).round()
                        as i64
                } else {
                    0
                };
                let conversion_rate =
                    percentage(estimated_order_count as f64, visitor_count as f64);
                (
                    key,
                    DimensionStats {
                        visitor_count,
                        estimated_order_count,
                        conversion_rate,
                    },
                )
            })
            .collect();
        Self(entries)
    }

    pub fn get(&self, key: &str) -> DimensionStats {
        self.0.get(key).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DimensionStats)> {
        self.0.iter()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribution {
    pub sources: DimensionBreakdown,
    pub mediums: DimensionBreakdown,
    pub campaigns: DimensionBreakdown,
    pub placements: DimensionBreakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPeriod {
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsReport {
    pub business_id: Uuid,
    pub period: ReportPeriod,
    pub overview: Overview,
    pub traffic_trend: Vec<DailyTraffic>,
    pub top_products: Vec<ProductStats>,
    pub orders_by_hour: Vec<HourBucket>,
    pub orders_by_weekday: Vec<WeekdayBucket>,
    pub customers: CustomerStats,
    pub attribution: Attribution,
}

// =============================================================================
// Aggregation
// =============================================================================

/// `part / whole * 100` to two decimals, 0 when `whole` is 0
pub fn percentage(part: f64, whole: f64) -> f64 {
    if whole == 0.0 {
        return 0.0;
    }
    round2(part / whole * 100.0)
}

/// Change from `prior` to `current` in percent; 0 when there is no prior value
pub fn growth(current: f64, prior: f64) -> f64 {
    if prior == 0.0 {
        return 0.0;
    }
    round2((current - prior) / prior * 100.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn views(data: &WindowData) -> i64 {
    data.legacy.iter().map(|l| l.visitors).sum::<i64>() + data.sessions.len() as i64
}

fn revenue<'a>(orders: impl IntoIterator<Item = &'a Order>) -> f64 {
    orders
        .into_iter()
        .filter(|o| o.is_completed())
        .map(|o| o.total)
        .sum()
}

/// Build the report for `current`, using `prior` only for growth
pub fn build_report(
    business_id: Uuid,
    window: ReportWindow,
    current: &WindowData,
    prior: &WindowData,
) -> AnalyticsReport {
    AnalyticsReport {
        business_id,
        period: ReportPeriod {
            start: window.start,
            end: window.end,
        },
        overview: overview(current, prior),
        traffic_trend: traffic_trend(&window, current),
        top_products: top_products(&current.orders),
        orders_by_hour: orders_by_hour(&current.orders),
        orders_by_weekday: orders_by_weekday(&current.orders),
        customers: customer_stats(&current.orders),
        attribution: attribution(&current.sessions, current.orders.len() as i64),
    }
}

pub fn overview(current: &WindowData, prior: &WindowData) -> Overview {
    let views_now = views(current);
    let legacy_visitors: i64 = current.legacy.iter().map(|l| l.visitors).sum();

    let mut sessions_per_ip: HashMap<&str, i64> = HashMap::new();
    for session in &current.sessions {
        *sessions_per_ip.entry(session.ip_address.as_str()).or_default() += 1;
    }
    let distinct_ips = sessions_per_ip.len() as i64;
    let bounced = sessions_per_ip.values().filter(|&&n| n == 1).count() as i64;
    let unique_visitors = distinct_ips + legacy_visitors;

    let total_orders = current.orders.len() as i64;
    let completed_orders = current.orders.iter().filter(|o| o.is_completed()).count() as i64;
    let revenue_now = revenue(&current.orders);
    let average_order_value = if completed_orders > 0 {
        round2(revenue_now / completed_orders as f64)
    } else {
        0.0
    };

    Overview {
        views: views_now,
        unique_visitors,
        total_orders,
        completed_orders,
        revenue: round2(revenue_now),
        average_order_value,
        conversion_rate: percentage(total_orders as f64, unique_visitors as f64),
        bounce_rate: percentage(bounced as f64, distinct_ips as f64),
        views_growth: growth(views_now as f64, views(prior) as f64),
        revenue_growth: growth(revenue_now, revenue(&prior.orders)),
    }
}

pub fn traffic_trend(window: &ReportWindow, data: &WindowData) -> Vec<DailyTraffic> {
    let mut by_day: BTreeMap<Date, (i64, i64, f64)> = window
        .days()
        .into_iter()
        .map(|day| (day, (0, 0, 0.0)))
        .collect();

    for legacy in &data.legacy {
        if let Some(entry) = by_day.get_mut(&legacy.date) {
            entry.0 += legacy.visitors;
        }
    }
    for session in &data.sessions {
        if let Some(entry) = by_day.get_mut(&utc_date(session.visited_at)) {
            entry.0 += 1;
        }
    }
    for order in &data.orders {
        if let Some(entry) = by_day.get_mut(&utc_date(order.created_at)) {
            entry.1 += 1;
            if order.is_completed() {
                entry.2 += order.total;
            }
        }
    }

    by_day
        .into_iter()
        .map(|(day, (views, orders, revenue))| DailyTraffic {
            date: day.to_string(),
            views,
            orders,
            revenue: round2(revenue),
        })
        .collect()
}

pub fn top_products(orders: &[Order]) -> Vec<ProductStats> {
    let mut products: HashMap<Uuid, ProductStats> = HashMap::new();
    for item in orders
        .iter()
        .filter(|o| o.is_completed())
        .flat_map(|o| o.items.iter())
    {
        let entry = products
            .entry(item.product_id)
            .or_insert_with(|| ProductStats {
                product_id: item.product_id,
                name: item.product_name.clone(),
                quantity: 0,
                revenue: 0.0,
            });
        entry.quantity += item.quantity;
        entry.revenue += item.price * item.quantity as f64;
    }

    let mut ranked: Vec<ProductStats> = products.into_values().collect();
    ranked.sort_by(|a, b| {
        b.quantity
            .cmp(&a.quantity)
            .then_with(|| b.revenue.total_cmp(&a.revenue))
            .then_with(|| a.name.cmp(&b.name))
    });
    ranked.truncate(TOP_PRODUCTS);
    for product in &mut ranked {
        product.revenue = round2(product.revenue);
    }
    ranked
}

pub fn orders_by_hour(orders: &[Order]) -> Vec<HourBucket> {
    let mut buckets: Vec<HourBucket> = (0..24)
        .map(|hour| HourBucket {
            hour,
            orders: 0,
            revenue: 0.0,
        })
        .collect();

    for order in orders {
        let hour = order.created_at.to_offset(UtcOffset::UTC).hour() as usize;
        if let Some(bucket) = buckets.get_mut(hour) {
            bucket.orders += 1;
            if order.is_completed() {
                bucket.revenue += order.total;
            }
        }
    }
    for bucket in &mut buckets {
        bucket.revenue = round2(bucket.revenue);
    }
    buckets
}

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Monday,
    Weekday::Tuesday,
    Weekday::Wednesday,
    Weekday::Thursday,
    Weekday::Friday,
    Weekday::Saturday,
    Weekday::Sunday,
];

pub fn orders_by_weekday(orders: &[Order]) -> Vec<WeekdayBucket> {
    let mut counts = [(0i64, 0.0f64); 7];
    for order in orders {
        let index = order
            .created_at
            .to_offset(UtcOffset::UTC)
            .weekday()
            .number_days_from_monday() as usize;
        if let Some(slot) = counts.get_mut(index) {
            slot.0 += 1;
            if order.is_completed() {
                slot.1 += order.total;
            }
        }
    }

    WEEKDAYS
        .iter()
        .zip(counts)
        .map(|(day, (orders, revenue))| WeekdayBucket {
            day: day.to_string(),
            orders,
            revenue: round2(revenue),
        })
        .collect()
}

pub fn customer_stats(orders: &[Order]) -> CustomerStats {
    let mut per_customer: HashMap<Uuid, i64> = HashMap::new();
    for customer_id in orders.iter().filter_map(|o| o.customer_id) {
        *per_customer.entry(customer_id).or_default() += 1;
    }
    let total_customers = per_customer.len() as i64;
    let repeat_customers = per_customer.values().filter(|&&n| n >= 2).count() as i64;

    CustomerStats {
        total_customers,
        repeat_customers,
        repeat_rate: percentage(repeat_customers as f64, total_customers as f64),
    }
}

pub fn attribution(sessions: &[VisitorSession], total_orders: i64) -> Attribution {
    let total_visits = sessions.len() as i64;
    let mut sources: HashMap<String, i64> = HashMap::new();
    let mut mediums: HashMap<String, i64> = HashMap::new();
    let mut campaigns: HashMap<String, i64> = HashMap::new();
    let mut placements: HashMap<String, i64> = HashMap::new();

    for session in sessions {
        let source = non_empty(session.source.as_deref()).unwrap_or("direct");
        *sources.entry(source.to_string()).or_default() += 1;

        let medium = non_empty(session.medium.as_deref()).unwrap_or("none");
        *mediums.entry(medium.to_string()).or_default() += 1;

        if let Some(campaign) = non_empty(session.campaign.as_deref()) {
            *campaigns.entry(campaign.to_string()).or_default() += 1;
        }
        if let Some(placement) = non_empty(session.placement.as_deref()) {
            *placements.entry(placement.to_string()).or_default() += 1;
        }
    }

    Attribution {
        sources: DimensionBreakdown::from_counts(sources, total_orders, total_visits),
        mediums: DimensionBreakdown::from_counts(mediums, total_orders, total_visits),
        campaigns: DimensionBreakdown::from_counts(campaigns, total_orders, total_visits),
        placements: DimensionBreakdown::from_counts(placements, total_orders, total_visits),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn utc_date(at: OffsetDateTime) -> Date {
    at.to_offset(UtcOffset::UTC).date()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LegacyDailyVisitors, OrderItem};
    use time::macros::{date, datetime};

    fn session(ip: &str, source: Option<&str>, at: OffsetDateTime) -> VisitorSession {
        VisitorSession {
            ip_address: ip.to_string(),
            source: source.map(str::to_string),
            medium: None,
            campaign: None,
            placement: None,
            visited_at: at,
        }
    }

    fn order(status: &str, total: f64, at: OffsetDateTime) -> Order {
        Order {
            id: Uuid::new_v4(),
            customer_id: None,
            order_type: "DELIVERY".into(),
            status: status.into(),
            payment_status: "PAID".into(),
            total,
            created_at: at,
            items: Vec::new(),
        }
    }

    #[test]
    fn test_window_normalizes_to_whole_days() {
        let window = ReportWindow::new(
            datetime!(2025-03-01 15:30 UTC),
            datetime!(2025-03-07 08:00 UTC),
        )
        .unwrap();
        assert_eq!(window.start, datetime!(2025-03-01 00:00 UTC));
        assert_eq!(window.end, datetime!(2025-03-07 23:59:59.999 UTC));
        assert_eq!(window.days().len(), 7);
    }

    #[test]
    fn test_window_rejects_reversed_range() {
        let err = ReportWindow::new(
            datetime!(2025-03-08 00:00 UTC),
            datetime!(2025-03-07 00:00 UTC),
        )
        .unwrap_err();
        assert!(matches!(err, AnalyticsError::InvalidRange(_)));
    }

    #[test]
    fn test_previous_window_is_adjacent_and_equal_length() {
        let window = ReportWindow::from_days(date!(2025-03-01), date!(2025-03-30));
        let prior = window.previous();
        assert_eq!(prior.end, datetime!(2025-02-28 23:59:59.999 UTC));
        assert_eq!(prior.start, datetime!(2025-01-30 00:00 UTC));
        assert_eq!(prior.length(), window.length());
    }

    #[test]
    fn test_views_growth_is_zero_without_prior_views() {
        let current = WindowData {
            legacy: vec![LegacyDailyVisitors {
                date: date!(2025-03-02),
                visitors: 50,
            }],
            ..Default::default()
        };
        let overview = overview(&current, &WindowData::default());
        assert_eq!(overview.views, 50);
        assert_eq!(overview.views_growth, 0.0);
        assert!(overview.views_growth.is_finite());
    }

    #[test]
    fn test_growth_against_prior() {
        assert_eq!(growth(150.0, 100.0), 50.0);
        assert_eq!(growth(50.0, 100.0), -50.0);
        assert_eq!(growth(10.0, 0.0), 0.0);
    }

    #[test]
    fn test_overview_blends_legacy_and_sessions() {
        let at = datetime!(2025-03-02 10:00 UTC);
        let current = WindowData {
            legacy: vec![LegacyDailyVisitors {
                date: date!(2025-03-01),
                visitors: 6,
            }],
            sessions: vec![
                session("1.1.1.1", None, at),
                session("1.1.1.1", None, at),
                session("2.2.2.2", None, at),
                session("3.3.3.3", None, at),
            ],
            orders: vec![
                order("DELIVERED", 40.0, at),
                order("OUT_FOR_DELIVERY", 25.0, at),
                order("CANCELLED", 99.0, at),
            ],
        };
        let overview = overview(&current, &WindowData::default());

        assert_eq!(overview.views, 10);
        assert_eq!(overview.unique_visitors, 9);
        assert_eq!(overview.total_orders, 3);
        assert_eq!(overview.completed_orders, 1);
        assert_eq!(overview.revenue, 40.0);
        assert_eq!(overview.average_order_value, 40.0);
        assert_eq!(overview.conversion_rate, 33.33);
        // 2 of 3 session IPs visited once
        assert_eq!(overview.bounce_rate, 66.67);
    }

    #[test]
    fn test_trend_has_one_entry_per_day() {
        let window = ReportWindow::from_days(date!(2025-03-01), date!(2025-03-03));
        let data = WindowData {
            legacy: vec![LegacyDailyVisitors {
                date: date!(2025-03-01),
                visitors: 4,
            }],
            sessions: vec![session("1.1.1.1", None, datetime!(2025-03-03 23:00 UTC))],
            orders: vec![order("DELIVERED", 12.5, datetime!(2025-03-03 09:00 UTC))],
        };
        let trend = traffic_trend(&window, &data);

        assert_eq!(trend.len(), 3);
        assert_eq!(trend[0].date, "2025-03-01");
        assert_eq!(trend[0].views, 4);
        assert_eq!(trend[1].views, 0);
        assert_eq!(trend[2].views, 1);
        assert_eq!(trend[2].orders, 1);
        assert_eq!(trend[2].revenue, 12.5);
    }

    #[test]
    fn test_top_products_rank_by_quantity_then_revenue() {
        let at = datetime!(2025-03-02 10:00 UTC);
        let (burger, fries, soda) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let item = |id, name: &str, quantity, price| OrderItem {
            product_id: id,
            product_name: name.to_string(),
            quantity,
            price,
        };
        let mut completed = order("DELIVERED", 50.0, at);
        completed.items = vec![
            item(burger, "Burger", 2, 10.0),
            item(fries, "Fries", 2, 4.0),
            item(soda, "Soda", 1, 2.0),
        ];
        let mut pending = order("PREPARING", 80.0, at);
        pending.items = vec![item(soda, "Soda", 40, 2.0)];

        let ranked = top_products(&[completed, pending]);
        let names: Vec<&str> = ranked.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Burger", "Fries", "Soda"]);
        assert_eq!(ranked[0].revenue, 20.0);
        assert_eq!(ranked[2].quantity, 1);
    }

    #[test]
    fn test_hour_and_weekday_buckets() {
        // 2025-03-03 is a Monday
        let orders = vec![
            order("DELIVERED", 10.0, datetime!(2025-03-03 18:15 UTC)),
            order("PREPARING", 10.0, datetime!(2025-03-03 18:45 UTC)),
            order("DELIVERED", 5.0, datetime!(2025-03-09 08:00 UTC)),
        ];
        let hours = orders_by_hour(&orders);
        assert_eq!(hours.len(), 24);
        assert_eq!(hours[18].orders, 2);
        assert_eq!(hours[18].revenue, 10.0);

        let days = orders_by_weekday(&orders);
        assert_eq!(days.len(), 7);
        assert_eq!(days[0].day, "Monday");
        assert_eq!(days[0].orders, 2);
        assert_eq!(days[6].day, "Sunday");
        assert_eq!(days[6].revenue, 5.0);
    }

    #[test]
    fn test_repeat_customers() {
        let at = datetime!(2025-03-02 10:00 UTC);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut orders = vec![
            order("DELIVERED", 1.0, at),
            order("DELIVERED", 1.0, at),
            order("DELIVERED", 1.0, at),
            order("DELIVERED", 1.0, at),
        ];
        orders[0].customer_id = Some(a);
        orders[1].customer_id = Some(a);
        orders[2].customer_id = Some(b);

        let stats = customer_stats(&orders);
        assert_eq!(stats.total_customers, 2);
        assert_eq!(stats.repeat_customers, 1);
        assert_eq!(stats.repeat_rate, 50.0);
    }

    #[test]
    fn test_attribution_estimates_are_proportional_and_rounded() {
        let at = datetime!(2025-03-02 10:00 UTC);
        let mut sessions = vec![
            session("1", Some("instagram"), at),
            session("2", Some("instagram"), at),
            session("3", Some("google"), at),
            session("4", None, at),
            session("5", Some(""), at),
            session("6", Some("instagram"), at),
        ];
        sessions[0].campaign = Some("spring".to_string());

        let attribution = attribution(&sessions, 5);

        let instagram = attribution.sources.get("instagram");
        assert_eq!(instagram.visitor_count, 3);
        // 5 * 3 / 6 = 2.5 rounds away from zero
        assert_eq!(instagram.estimated_order_count, 3);
        assert_eq!(instagram.conversion_rate, 100.0);

        let direct = attribution.sources.get("direct");
        assert_eq!(direct.visitor_count, 2);
        assert_eq!(direct.estimated_order_count, 2);

        assert_eq!(attribution.mediums.get("none").visitor_count, 6);
        assert_eq!(attribution.campaigns.len(), 1);
        assert_eq!(attribution.campaigns.get("spring").estimated_order_count, 1);
        assert!(attribution.placements.is_empty());
        assert_eq!(attribution.sources.get("tiktok"), DimensionStats::default());
    }

    #[test]
    fn test_attribution_without_sessions_is_empty() {
        let attribution = attribution(&[], 12);
        assert!(attribution.sources.is_empty());
        assert_eq!(attribution.sources.get("direct").estimated_order_count, 0);
    }
}

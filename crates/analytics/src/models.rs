//! Rows read by the aggregator and scorer

use time::{Date, OffsetDateTime};
use uuid::Uuid;
use waveorder_shared::{BillingType, SubscriptionPlan, TenantSubscriptionStatus};

// =============================================================================
// Orders
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderType {
    Delivery,
    Pickup,
    DineIn,
    Other(String),
}

impl From<&str> for OrderType {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "DELIVERY" => OrderType::Delivery,
            "PICKUP" => OrderType::Pickup,
            "DINE_IN" => OrderType::DineIn,
            _ => OrderType::Other(value.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Preparing,
    Ready,
    OutForDelivery,
    Delivered,
    PickedUp,
    Cancelled,
    Refunded,
    Other(String),
}

impl From<&str> for OrderStatus {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => OrderStatus::Pending,
            "CONFIRMED" => OrderStatus::Confirmed,
            "PREPARING" => OrderStatus::Preparing,
            "READY" => OrderStatus::Ready,
            "OUT_FOR_DELIVERY" => OrderStatus::OutForDelivery,
            "DELIVERED" => OrderStatus::Delivered,
            "PICKED_UP" => OrderStatus::PickedUp,
            "CANCELLED" | "CANCELED" => OrderStatus::Cancelled,
            "REFUNDED" => OrderStatus::Refunded,
            _ => OrderStatus::Other(value.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
    Other(String),
}

impl From<&str> for PaymentStatus {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => PaymentStatus::Pending,
            "PAID" => PaymentStatus::Paid,
            "FAILED" => PaymentStatus::Failed,
            "REFUNDED" => PaymentStatus::Refunded,
            _ => PaymentStatus::Other(value.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i64,
    /// Unit price
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub customer_id: Option<Uuid>,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub total: f64,
    pub created_at: OffsetDateTime,
    pub items: Vec<OrderItem>,
}

impl Order {
    /// Paid and fulfilled the way its type requires.
    ///
    /// Only completed orders contribute revenue or product rankings; every
    /// order still counts as demand.
    pub fn is_completed(&self) -> bool {
        if self.payment_status != PaymentStatus::Paid {
            return false;
        }
        if matches!(self.status, OrderStatus::Cancelled | OrderStatus::Refunded) {
            return false;
        }
        match self.order_type {
            OrderType::Delivery => self.status == OrderStatus::Delivered,
            OrderType::Pickup | OrderType::DineIn => self.status == OrderStatus::PickedUp,
            OrderType::Other(_) => true,
        }
    }
}

// =============================================================================
// Traffic
// =============================================================================

/// One tracked visit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitorSession {
    pub ip_address: String,
    pub source: Option<String>,
    pub medium: Option<String>,
    pub campaign: Option<String>,
    pub placement: Option<String>,
    pub visited_at: OffsetDateTime,
}

/// Pre-aggregated daily visitor count from the old tracking model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyDailyVisitors {
    pub date: Date,
    pub visitors: i64,
}

/// Everything the aggregator reads for one window
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowData {
    pub legacy: Vec<LegacyDailyVisitors>,
    pub sessions: Vec<VisitorSession>,
    pub orders: Vec<Order>,
}

// =============================================================================
// Customer experience
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feedback {
    pub business_id: Uuid,
    pub feedback_type: String,
    pub rating: i32,
    pub created_at: OffsetDateTime,
}

impl Feedback {
    pub fn is_nps(&self) -> bool {
        self.feedback_type.eq_ignore_ascii_case("NPS")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessLifecycle {
    pub id: Uuid,
    pub name: String,
    /// `None` when the stored plan could not be decoded
    pub plan: Option<SubscriptionPlan>,
    pub billing_type: BillingType,
    pub subscription_status: TenantSubscriptionStatus,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
    pub deactivated_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnboardingCompletion {
    pub business_id: Uuid,
    pub created_at: OffsetDateTime,
    pub onboarding_completed_at: OffsetDateTime,
    pub first_order_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketActivity {
    pub id: Uuid,
    pub status: String,
    pub created_at: OffsetDateTime,
    /// Sorted ascending
    pub comment_times: Vec<OffsetDateTime>,
}

impl TicketActivity {
    pub fn is_resolved(&self) -> bool {
        matches!(
            self.status.to_ascii_uppercase().as_str(),
            "RESOLVED" | "CLOSED"
        )
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self.status.to_ascii_uppercase().as_str(),
            "OPEN" | "IN_PROGRESS"
        )
    }
}

/// Per-business inputs to the at-risk heuristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskSignals {
    pub business_id: Uuid,
    pub name: String,
    pub orders_last_30d: i64,
    pub tickets_last_30d: i64,
    /// Most recent rating in the last 90 days
    pub latest_feedback_rating: Option<i32>,
    pub last_order_at: Option<OffsetDateTime>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn order(order_type: &str, status: &str, payment: &str) -> Order {
        Order {
            id: Uuid::new_v4(),
            customer_id: None,
            order_type: order_type.into(),
            status: status.into(),
            payment_status: payment.into(),
            total: 25.0,
            created_at: datetime!(2025-03-01 12:00 UTC),
            items: Vec::new(),
        }
    }

    #[test]
    fn test_delivery_completes_only_when_delivered() {
        assert!(order("DELIVERY", "DELIVERED", "PAID").is_completed());
        assert!(!order("DELIVERY", "OUT_FOR_DELIVERY", "PAID").is_completed());
        assert!(!order("DELIVERY", "PICKED_UP", "PAID").is_completed());
    }

    #[test]
    fn test_pickup_and_dine_in_complete_when_picked_up() {
        assert!(order("PICKUP", "PICKED_UP", "PAID").is_completed());
        assert!(order("DINE_IN", "PICKED_UP", "PAID").is_completed());
        assert!(!order("DINE_IN", "READY", "PAID").is_completed());
    }

    #[test]
    fn test_unpaid_or_cancelled_never_completes() {
        assert!(!order("DELIVERY", "DELIVERED", "PENDING").is_completed());
        assert!(!order("DELIVERY", "CANCELLED", "PAID").is_completed());
        assert!(!order("PICKUP", "REFUNDED", "PAID").is_completed());
    }

    #[test]
    fn test_ticket_status_buckets() {
        let ticket = |status: &str| TicketActivity {
            id: Uuid::new_v4(),
            status: status.to_string(),
            created_at: datetime!(2025-03-01 12:00 UTC),
            comment_times: Vec::new(),
        };
        assert!(ticket("closed").is_resolved());
        assert!(ticket("IN_PROGRESS").is_open());
        assert!(!ticket("WAITING").is_open());
    }
}

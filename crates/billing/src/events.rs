//! Superadmin audit events for billing operations

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    StripeSyncFix,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::StripeSyncFix => "STRIPE_SYNC_FIX",
        }
    }
}

/// One row in `superadmin_audit_logs`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub business_id: Uuid,
    pub action: AuditAction,
    /// Admin that triggered the action; `None` for system runs
    pub actor_id: Option<Uuid>,
    pub details: serde_json::Value,
    pub created_at: OffsetDateTime,
}

pub struct AuditEventBuilder {
    business_id: Uuid,
    action: AuditAction,
    actor_id: Option<Uuid>,
    details: serde_json::Value,
}

impl AuditEventBuilder {
    pub fn new(business_id: Uuid, action: AuditAction) -> Self {
        Self {
            business_id,
            action,
            actor_id: None,
            details: serde_json::Value::Null,
        }
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn actor_opt(mut self, actor_id: Option<Uuid>) -> Self {
        self.actor_id = actor_id;
        self
    }

    pub fn build(self) -> AuditEvent {
        AuditEvent {
            id: Uuid::new_v4(),
            business_id: self.business_id,
            action: self.action,
            actor_id: self.actor_id,
            details: self.details,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults_to_system_actor() {
        let business_id = Uuid::new_v4();
        let event = AuditEventBuilder::new(business_id, AuditAction::StripeSyncFix)
            .details(serde_json::json!({ "fixes": 2 }))
            .build();

        assert_eq!(event.business_id, business_id);
        assert_eq!(event.actor_id, None);
        assert_eq!(event.details["fixes"], 2);
        assert_eq!(event.action.as_str(), "STRIPE_SYNC_FIX");
    }
}

//! CloudEvents 1.0 envelope: the wire format every outbox row is
//! serialized into before it is handed to the broker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::events::DomainEvent;
use crate::tenant::TenantId;

const SOURCE: &str = "fluxpay-engine";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudEvent {
    pub specversion: &'static str,
    pub id: Uuid,
    pub source: &'static str,
    #[serde(rename = "type")]
    pub event_type: String,
    pub datacontenttype: &'static str,
    pub time: DateTime<Utc>,
    pub tenantid: String,
    pub data: Value,
}

impl CloudEvent {
    /// `type` is rendered as `com.fluxpay.<eventType>` (e.g.
    /// `com.fluxpay.payment.approved`).
    pub fn from_domain_event<E: DomainEvent>(
        event_id: Uuid,
        tenant: &TenantId,
        event: &E,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            specversion: "1.0",
            id: event_id,
            source: SOURCE,
            event_type: format!("com.fluxpay.{}", event.event_type()),
            datacontenttype: "application/json",
            time: Utc::now(),
            tenantid: tenant.as_str().to_string(),
            data: serde_json::to_value(event)?,
        })
    }
}

/// Topic naming: `fluxpay.<aggregateType-lowercase>.events`.
pub fn topic_for(aggregate_type: &str) -> String {
    format!("fluxpay.{}.events", aggregate_type.to_lowercase())
}

/// Partition key: `<tenantId>:<aggregateId>`, guaranteeing
/// per-aggregate ordering regardless of how many publisher instances race.
pub fn partition_key(tenant: &TenantId, aggregate_id: Uuid) -> String {
    format!("{}:{}", tenant.as_str(), aggregate_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::OrderCreated;

    #[test]
    fn envelope_shape_matches_cloudevents_1_0() {
        let tenant = TenantId::new("acme").unwrap();
        let event = OrderCreated {
            order_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            total_amount: "100.00".into(),
            currency: "USD".into(),
        };
        let ce = CloudEvent::from_domain_event(Uuid::new_v4(), &tenant, &event).unwrap();
        assert_eq!(ce.specversion, "1.0");
        assert_eq!(ce.source, "fluxpay-engine");
        assert_eq!(ce.event_type, "com.fluxpay.order.created");
        assert_eq!(ce.datacontenttype, "application/json");
        assert_eq!(ce.tenantid, "acme");
    }

    #[test]
    fn topic_naming_lowercases_aggregate_type() {
        assert_eq!(topic_for("Payment"), "fluxpay.payment.events");
        assert_eq!(topic_for("refund"), "fluxpay.refund.events");
    }

    #[test]
    fn partition_key_combines_tenant_and_aggregate() {
        let tenant = TenantId::new("acme").unwrap();
        let id = Uuid::nil();
        assert_eq!(partition_key(&tenant, id), format!("acme:{id}"));
    }
}

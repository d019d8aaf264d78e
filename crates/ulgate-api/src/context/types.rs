// ── NGSI-v2 wire types ──
//
// Only the shapes the gateway exchanges with the broker: entity updates,
// attribute queries, subscriptions, and inbound notifications.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A typed NGSI attribute: `{ "type": ..., "value": ..., "metadata": {...} }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(rename = "type", default = "default_attr_type")]
    pub attr_type: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub metadata: IndexMap<String, Value>,
}

fn default_attr_type() -> String {
    "Text".into()
}

impl Attribute {
    pub fn new(attr_type: impl Into<String>, value: Value) -> Self {
        Self {
            attr_type: attr_type.into(),
            value,
            metadata: IndexMap::new(),
        }
    }

    /// Plain text attribute, the type used for command status and info.
    pub fn text(value: impl Into<String>) -> Self {
        Self::new("Text", Value::String(value.into()))
    }

    pub fn with_metadata(mut self, name: impl Into<String>, meta: Value) -> Self {
        self.metadata.insert(name.into(), meta);
        self
    }
}

/// An entity in normalized representation. Attributes keep insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(flatten)]
    pub attributes: IndexMap<String, Attribute>,
}

impl Entity {
    pub fn new(id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entity_type: entity_type.into(),
            attributes: IndexMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.attributes.insert(name.into(), attr);
        self
    }
}

/// Body of `POST /v2/op/update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUpdate {
    pub action_type: ActionType,
    pub entities: Vec<Entity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionType {
    /// Create or update attributes, creating the entity if missing.
    Append,
    AppendStrict,
    Update,
    Delete,
}

// ── Subscriptions ───────────────────────────────────────────────────

/// Body of `POST /v2/subscriptions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub subject: SubscriptionSubject,
    pub notification: SubscriptionNotification,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionSubject {
    pub entities: Vec<EntityRef>,
    pub condition: SubscriptionCondition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionCondition {
    pub attrs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionNotification {
    pub http: HttpEndpoint,
    pub attrs: Vec<String>,
    pub attrs_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpEndpoint {
    pub url: String,
}

impl Subscription {
    /// Subscribe `callback` to changes of `attrs` on a single entity.
    pub fn for_entity(entity: EntityRef, attrs: Vec<String>, callback: impl Into<String>) -> Self {
        Self {
            description: Some(format!("ulgate subscription for {}", entity.id)),
            subject: SubscriptionSubject {
                entities: vec![entity],
                condition: SubscriptionCondition {
                    attrs: attrs.clone(),
                },
            },
            notification: SubscriptionNotification {
                http: HttpEndpoint {
                    url: callback.into(),
                },
                attrs,
                attrs_format: "normalized".into(),
            },
        }
    }
}

/// Payload the broker POSTs to a subscription callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub subscription_id: String,
    #[serde(default)]
    pub data: Vec<Entity>,
}

/// NGSI-v2 error body: `{"error": "BadRequest", "description": "..."}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorResponse {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entity_serializes_attributes_inline() {
        let entity = Entity::new("dev1", "Thing")
            .with_attribute("temperature", Attribute::new("Number", json!(21.5)));

        let value = serde_json::to_value(&entity).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "dev1",
                "type": "Thing",
                "temperature": { "type": "Number", "value": 21.5 }
            })
        );
    }

    #[test]
    fn notification_collects_entity_attributes() {
        let raw = json!({
            "subscriptionId": "5f1e",
            "data": [{
                "id": "Light:l1",
                "type": "Light",
                "brightness": { "type": "Number", "value": 80, "metadata": {} }
            }]
        });

        let notification: Notification = serde_json::from_value(raw).unwrap();
        assert_eq!(notification.subscription_id, "5f1e");
        let entity = &notification.data[0];
        assert_eq!(entity.id, "Light:l1");
        assert_eq!(entity.attributes["brightness"].value, json!(80));
    }

    #[test]
    fn subscription_watches_and_notifies_same_attrs() {
        let sub = Subscription::for_entity(
            EntityRef {
                id: "dev1".into(),
                entity_type: "Thing".into(),
            },
            vec!["switch".into()],
            "http://agent:4041/notify",
        );
        let value = serde_json::to_value(&sub).unwrap();
        assert_eq!(value["subject"]["condition"]["attrs"], json!(["switch"]));
        assert_eq!(value["notification"]["attrs"], json!(["switch"]));
        assert_eq!(value["notification"]["attrsFormat"], "normalized");
    }
}

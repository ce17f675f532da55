//! Queue message test double.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use uuid::Uuid;

use crate::{MessageError, SerializerSettings};

/// Broker-assigned properties of a received message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemProperties {
    pub enqueued_time_utc: DateTime<Utc>,
    pub sequence_number: i64,
    pub delivery_count: u32,
    pub lock_token: Option<Uuid>,
    pub locked_until_utc: Option<DateTime<Utc>>,
}

impl Default for SystemProperties {
    fn default() -> Self {
        Self {
            enqueued_time_utc: Utc::now() + Duration::minutes(1),
            sequence_number: 1,
            delivery_count: 1,
            lock_token: None,
            locked_until_utc: None,
        }
    }
}

/// A message as delivered to a queue or topic triggered function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub message_id: String,
    #[serde(with = "base64_body")]
    pub body: Bytes,
    pub content_type: Option<String>,
    pub correlation_id: Option<String>,
    pub session_id: Option<String>,
    pub label: Option<String>,
    pub user_properties: BTreeMap<String, Value>,
    pub system_properties: SystemProperties,
}

impl QueueMessage {
    #[must_use]
    pub fn builder() -> QueueMessageBuilder {
        QueueMessageBuilder::default()
    }

    /// Message whose body is `content` serialized with `settings`.
    ///
    /// # Errors
    /// Returns error if `content` cannot be serialized.
    pub fn from_json<T: Serialize + ?Sized>(
        message_id: impl Into<String>,
        content: &T,
        settings: &SerializerSettings,
    ) -> Result<Self, MessageError> {
        Ok(Self::builder()
            .message_id(message_id)
            .content_type("application/json")
            .body(settings.to_vec(content)?)
            .build())
    }

    /// Body decoded as JSON, with any type tags removed.
    ///
    /// # Errors
    /// Returns error if the body is not JSON matching `T`.
    pub fn body_json<T: DeserializeOwned>(&self) -> Result<T, MessageError> {
        SerializerSettings::default().from_slice(&self.body)
    }

    /// Body as UTF-8 text.
    ///
    /// # Errors
    /// Returns error if the body is not valid UTF-8.
    pub fn body_text(&self) -> Result<String, MessageError> {
        Ok(String::from_utf8(self.body.to_vec())?)
    }
}

/// Builds a [`QueueMessage`] with every property settable.
#[derive(Debug, Clone, Default)]
pub struct QueueMessageBuilder {
    message_id: Option<String>,
    body: Bytes,
    content_type: Option<String>,
    correlation_id: Option<String>,
    session_id: Option<String>,
    label: Option<String>,
    user_properties: BTreeMap<String, Value>,
    system_properties: SystemProperties,
}

impl QueueMessageBuilder {
    #[must_use]
    pub fn message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    #[must_use]
    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    #[must_use]
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn user_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.user_properties.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub const fn enqueued_time_utc(mut self, time: DateTime<Utc>) -> Self {
        self.system_properties.enqueued_time_utc = time;
        self
    }

    #[must_use]
    pub const fn sequence_number(mut self, sequence_number: i64) -> Self {
        self.system_properties.sequence_number = sequence_number;
        self
    }

    #[must_use]
    pub const fn delivery_count(mut self, delivery_count: u32) -> Self {
        self.system_properties.delivery_count = delivery_count;
        self
    }

    #[must_use]
    pub const fn lock_token(mut self, lock_token: Uuid) -> Self {
        self.system_properties.lock_token = Some(lock_token);
        self
    }

    #[must_use]
    pub const fn locked_until_utc(mut self, time: DateTime<Utc>) -> Self {
        self.system_properties.locked_until_utc = Some(time);
        self
    }

    /// Assemble the message; a missing id gets a random one.
    #[must_use]
    pub fn build(self) -> QueueMessage {
        QueueMessage {
            message_id: self
                .message_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            body: self.body,
            content_type: self.content_type,
            correlation_id: self.correlation_id,
            session_id: self.session_id,
            label: self.label,
            user_properties: self.user_properties,
            system_properties: self.system_properties,
        }
    }
}

mod base64_body {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TypeNameHandling;

    #[derive(Debug, Serialize, Deserialize)]
    struct Order {
        id: u32,
        data: String,
    }

    #[test]
    fn defaults_look_like_a_fresh_delivery() {
        let before = Utc::now();
        let message = QueueMessage::builder().body("raw").build();

        assert_eq!(message.system_properties.sequence_number, 1);
        assert!(message.system_properties.enqueued_time_utc > before);
        assert!(!message.message_id.is_empty());
        assert_eq!(message.body_text().unwrap(), "raw");
    }

    #[test]
    fn every_property_is_settable() {
        let token = Uuid::new_v4();
        let enqueued = Utc::now();
        let message = QueueMessage::builder()
            .message_id("m-1")
            .correlation_id("c-1")
            .session_id("s-1")
            .label("orders")
            .user_property("priority", 3)
            .enqueued_time_utc(enqueued)
            .sequence_number(42)
            .delivery_count(2)
            .lock_token(token)
            .locked_until_utc(enqueued + Duration::seconds(30))
            .build();

        assert_eq!(message.message_id, "m-1");
        assert_eq!(message.user_properties["priority"], Value::from(3));
        assert_eq!(message.system_properties.sequence_number, 42);
        assert_eq!(message.system_properties.delivery_count, 2);
        assert_eq!(message.system_properties.lock_token, Some(token));
    }

    #[test]
    fn json_bodies_use_the_serializer_settings() {
        let settings = SerializerSettings::new(TypeNameHandling::All);
        let message = QueueMessage::from_json(
            "1000",
            &Order {
                id: 1000,
                data: "hello".into(),
            },
            &settings,
        )
        .unwrap();

        assert!(message.body_text().unwrap().contains("$type"));
        let order: Order = message.body_json().unwrap();
        assert_eq!(order.id, 1000);
        assert_eq!(order.data, "hello");
    }

    #[test]
    fn body_serializes_as_base64() {
        let message = QueueMessage::builder().message_id("m").body("hi").build();
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["body"], "aGk=");

        let back: QueueMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back.body, Bytes::from("hi"));
    }
}

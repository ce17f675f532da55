//! JSON payload settings for orchestration inputs and message bodies.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::MessageError;

/// Property holding the type name of a tagged payload.
pub const TYPE_TAG: &str = "$type";
/// Property holding the elements of a tagged array.
pub const VALUES_TAG: &str = "$values";

/// Which payloads carry a type name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeNameHandling {
    /// Plain JSON.
    None,
    /// Objects get a `$type` property.
    Objects,
    /// Objects get a `$type` property and arrays are wrapped as
    /// `{"$type": ..., "$values": [...]}`.
    #[default]
    All,
}

/// Serialization settings for payloads exchanged with functions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializerSettings {
    pub type_name_handling: TypeNameHandling,
}

impl SerializerSettings {
    #[must_use]
    pub const fn new(type_name_handling: TypeNameHandling) -> Self {
        Self { type_name_handling }
    }

    /// Serialize `value`, tagging it according to the settings.
    ///
    /// # Errors
    /// Returns error if `value` cannot be represented as JSON.
    pub fn to_value<T: Serialize + ?Sized>(&self, value: &T) -> Result<Value, MessageError> {
        let json = serde_json::to_value(value)?;
        let type_name = std::any::type_name::<T>();
        Ok(match (self.type_name_handling, json) {
            (TypeNameHandling::Objects | TypeNameHandling::All, Value::Object(mut map)) => {
                map.insert(TYPE_TAG.to_string(), Value::from(type_name));
                Value::Object(map)
            }
            (TypeNameHandling::All, Value::Array(values)) => {
                let mut map = Map::with_capacity(2);
                map.insert(TYPE_TAG.to_string(), Value::from(type_name));
                map.insert(VALUES_TAG.to_string(), Value::Array(values));
                Value::Object(map)
            }
            (_, other) => other,
        })
    }

    /// Serialize `value` to bytes.
    ///
    /// # Errors
    /// Returns error if `value` cannot be represented as JSON.
    pub fn to_vec<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, MessageError> {
        Ok(serde_json::to_vec(&self.to_value(value)?)?)
    }

    /// Deserialize a payload, accepting tagged and untagged forms.
    ///
    /// # Errors
    /// Returns error if the payload does not match `T`.
    pub fn from_value<T: DeserializeOwned>(&self, value: Value) -> Result<T, MessageError> {
        Ok(serde_json::from_value(Self::strip_tags(value))?)
    }

    /// Deserialize a payload from bytes.
    ///
    /// # Errors
    /// Returns error if the bytes are not JSON matching `T`.
    pub fn from_slice<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, MessageError> {
        let value: Value = serde_json::from_slice(bytes)?;
        self.from_value(value)
    }

    fn strip_tags(value: Value) -> Value {
        match value {
            Value::Object(mut map) if map.contains_key(TYPE_TAG) => {
                map.remove(TYPE_TAG);
                match map.remove(VALUES_TAG) {
                    Some(values) if map.is_empty() => values,
                    Some(values) => {
                        map.insert(VALUES_TAG.to_string(), values);
                        Value::Object(map)
                    }
                    None => Value::Object(map),
                }
            }
            other => other,
        }
    }
}

/// Supplies the serializer settings a host uses for payloads.
pub trait MessageSerializerSettingsFactory: Send + Sync {
    fn create_serializer_settings(&self) -> SerializerSettings;
}

/// Tags every object and array with its type name.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSerializerSettingsFactory;

impl MessageSerializerSettingsFactory for DefaultSerializerSettingsFactory {
    fn create_serializer_settings(&self) -> SerializerSettings {
        SerializerSettings::new(TypeNameHandling::All)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Order {
        data: String,
    }

    #[test]
    fn objects_are_tagged_with_their_type() {
        let settings = SerializerSettings::default();
        let value = settings
            .to_value(&Order {
                data: "hello".into(),
            })
            .unwrap();

        let tag = value[TYPE_TAG].as_str().unwrap();
        assert!(tag.ends_with("Order"));
        assert_eq!(value["data"], "hello");

        let order: Order = settings.from_value(value).unwrap();
        assert_eq!(order.data, "hello");
    }

    #[test]
    fn arrays_are_wrapped_only_for_all() {
        let all = SerializerSettings::new(TypeNameHandling::All)
            .to_value(&vec![1, 2])
            .unwrap();
        assert_eq!(all[VALUES_TAG], serde_json::json!([1, 2]));

        let objects = SerializerSettings::new(TypeNameHandling::Objects)
            .to_value(&vec![1, 2])
            .unwrap();
        assert_eq!(objects, serde_json::json!([1, 2]));

        let back: Vec<i32> = SerializerSettings::default().from_value(all).unwrap();
        assert_eq!(back, vec![1, 2]);
    }

    #[test]
    fn scalars_and_untagged_payloads_pass_through() {
        let settings = SerializerSettings::default();
        assert_eq!(settings.to_value("hello").unwrap(), Value::from("hello"));

        let plain: Order = settings
            .from_slice(br#"{"data":"plain"}"#)
            .unwrap();
        assert_eq!(plain.data, "plain");

        let none = SerializerSettings::new(TypeNameHandling::None)
            .to_value(&Order { data: "x".into() })
            .unwrap();
        assert!(none.get(TYPE_TAG).is_none());
    }
}

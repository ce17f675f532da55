//! Named arguments passed to a trigger invocation.

use std::collections::{BTreeMap, btree_map};

use serde_json::Value;

use crate::{HttpRequest, QueueMessage};

/// A single caller-supplied binding.
#[derive(Debug, Clone)]
pub enum BindingValue {
    Http(HttpRequest),
    Message(QueueMessage),
    Json(Value),
}

impl BindingValue {
    /// Short name of the variant, used in binding errors.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Http(_) => "http",
            Self::Message(_) => "message",
            Self::Json(_) => "json",
        }
    }
}

impl From<HttpRequest> for BindingValue {
    fn from(request: HttpRequest) -> Self {
        Self::Http(request)
    }
}

impl From<QueueMessage> for BindingValue {
    fn from(message: QueueMessage) -> Self {
        Self::Message(message)
    }
}

impl From<Value> for BindingValue {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// Arguments keyed by parameter name.
#[derive(Debug, Clone, Default)]
pub struct FunctionArguments {
    values: BTreeMap<String, BindingValue>,
}

impl FunctionArguments {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<BindingValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Set an argument, returning any previous value.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<BindingValue>,
    ) -> Option<BindingValue> {
        self.values.insert(name.into(), value.into())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&BindingValue> {
        self.values.get(name)
    }

    /// Remove and return an argument.
    pub fn take(&mut self, name: &str) -> Option<BindingValue> {
        self.values.remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, BindingValue> {
        self.values.iter()
    }
}

impl IntoIterator for FunctionArguments {
    type Item = (String, BindingValue);
    type IntoIter = btree_map::IntoIter<String, BindingValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl<'a> IntoIterator for &'a FunctionArguments {
    type Item = (&'a String, &'a BindingValue);
    type IntoIter = btree_map::Iter<'a, String, BindingValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

impl<K: Into<String>, V: Into<BindingValue>> FromIterator<(K, V)> for FunctionArguments {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut arguments = Self::new();
        for (name, value) in iter {
            arguments.insert(name, value);
        }
        arguments
    }
}

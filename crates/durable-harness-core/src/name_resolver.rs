//! Setting lookup used to resolve `%token%` binding expressions.

use std::{collections::HashMap, sync::Arc};

use thiserror::Error;

/// Name resolution error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("Unable to resolve the value for property '{0}'")]
    Unresolved(String),
    #[error("Unterminated '%' in binding expression '{0}'")]
    Unterminated(String),
}

/// Translates configuration tokens into concrete values.
pub trait NameResolver: Send + Sync {
    /// Resolve a single setting name.
    fn resolve(&self, name: &str) -> Option<String>;

    /// Replace every `%name%` token in `expression`.
    ///
    /// `%%` stands for a literal `%`; text outside tokens is copied verbatim.
    ///
    /// # Errors
    /// Returns error if a token cannot be resolved or a `%` is unpaired.
    fn resolve_whole_string(&self, expression: &str) -> Result<String, ResolveError> {
        let mut resolved = String::with_capacity(expression.len());
        let mut rest = expression;
        while let Some(start) = rest.find('%') {
            resolved.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let end = after
                .find('%')
                .ok_or_else(|| ResolveError::Unterminated(expression.to_string()))?;
            let token = &after[..end];
            if token.is_empty() {
                resolved.push('%');
                rest = &after[1..];
                continue;
            }
            let value = self
                .resolve(token)
                .ok_or_else(|| ResolveError::Unresolved(token.to_string()))?;
            resolved.push_str(&value);
            rest = &after[end + 1..];
        }
        resolved.push_str(rest);
        Ok(resolved)
    }
}

/// Built-in setting names that always resolve in test hosts.
const DEFAULT_SETTINGS: &[(&str, &str)] = &[("TestTaskHub", "")];

/// Resolver used by test hosts.
///
/// Looks a name up, in order, in a case-insensitive table of defaults and
/// explicit settings, then the injected resolver, then the process
/// environment. Empty names never resolve.
#[derive(Clone)]
pub struct TestNameResolver {
    settings: HashMap<String, String>,
    inner: Option<Arc<dyn NameResolver>>,
    use_environment: bool,
}

impl Default for TestNameResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TestNameResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestNameResolver")
            .field("settings", &self.settings.keys().collect::<Vec<_>>())
            .field("inner", &self.inner.is_some())
            .field("use_environment", &self.use_environment)
            .finish()
    }
}

impl TestNameResolver {
    /// Create a resolver seeded with the built-in defaults.
    #[must_use]
    pub fn new() -> Self {
        let settings = DEFAULT_SETTINGS
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), (*v).to_string()))
            .collect();
        Self {
            settings,
            inner: None,
            use_environment: true,
        }
    }

    /// Add or replace an explicit setting.
    #[must_use]
    pub fn with_setting(mut self, name: &str, value: impl Into<String>) -> Self {
        self.settings.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Add several explicit settings.
    #[must_use]
    pub fn with_settings<I, K, V>(mut self, settings: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (name, value) in settings {
            self.settings
                .insert(name.as_ref().to_ascii_lowercase(), value.into());
        }
        self
    }

    /// Consult `inner` after the settings table.
    #[must_use]
    pub fn with_inner(mut self, inner: Arc<dyn NameResolver>) -> Self {
        self.inner = Some(inner);
        self
    }

    /// Skip the process environment fallback.
    #[must_use]
    pub const fn without_environment(mut self) -> Self {
        self.use_environment = false;
        self
    }
}

impl NameResolver for TestNameResolver {
    fn resolve(&self, name: &str) -> Option<String> {
        if name.is_empty() {
            return None;
        }

        if let Some(value) = self.settings.get(&name.to_ascii_lowercase()) {
            return Some(value.clone());
        }

        if let Some(value) = self.inner.as_ref().and_then(|inner| inner.resolve(name)) {
            return Some(value);
        }

        if self.use_environment {
            return std::env::var(name).ok();
        }

        None
    }
}

impl NameResolver for HashMap<String, String> {
    fn resolve(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

//! JSON-like state maps.
//!
//! A [`State`] is what a resource wants ([`Resource::state`]) or what was
//! observed on the machine ([`Resource::query_state`]). The engine only ever
//! compares them for equality. An empty state means "does not exist".
//!
//! [`Resource::state`]: crate::Resource::state
//! [`Resource::query_state`]: crate::Resource::query_state

use crate::error::StateError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use similar::TextDiff;
use std::fmt;

/// Nested key/value map with dotted-path access.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State(Map<String, Value>);

/// Serialize any value into a [`State`].
///
/// Values that do not serialize to a JSON object give the empty state.
pub fn to_state<T: Serialize + ?Sized>(value: &T) -> State {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => State(map),
        _ => State::empty(),
    }
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// The "does not exist" state
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Build from a JSON value. `null` gives the empty state.
    pub fn from_value(value: Value) -> Result<Self, StateError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::empty()),
            _ => Err(StateError::NotAMap),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, StateError> {
        let value: Value = serde_json::from_str(json).map_err(|_| StateError::NotAMap)?;
        Self::from_value(value)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Top-level keys in order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Look up a literal top-level key.
    ///
    /// Plan states are keyed by resource ID, and IDs may contain dots.
    pub fn entry(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Look up a dotted path such as `kubelet.config.port`
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.0.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Boolean at `path`. Strings `"true"`/`"false"` are accepted.
    pub fn get_bool(&self, path: &str) -> Result<bool, StateError> {
        match self.require(path)? {
            Value::Bool(b) => Ok(*b),
            Value::String(s) => s.parse().map_err(|_| wrong_type(path, "a boolean")),
            _ => Err(wrong_type(path, "a boolean")),
        }
    }

    /// Number at `path`. Numeric strings are accepted.
    pub fn get_number(&self, path: &str) -> Result<f64, StateError> {
        match self.require(path)? {
            Value::Number(n) => n.as_f64().ok_or_else(|| wrong_type(path, "a number")),
            Value::String(s) => s.trim().parse().map_err(|_| wrong_type(path, "a number")),
            _ => Err(wrong_type(path, "a number")),
        }
    }

    /// String at `path`. Numbers and booleans are rendered.
    pub fn get_string(&self, path: &str) -> Result<String, StateError> {
        match self.require(path)? {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            _ => Err(wrong_type(path, "a string")),
        }
    }

    /// Nested object at `path`
    pub fn get_object(&self, path: &str) -> Result<Self, StateError> {
        match self.require(path)? {
            Value::Object(map) => Ok(Self(map.clone())),
            _ => Err(wrong_type(path, "an object")),
        }
    }

    /// Lenient boolean lookup, `false` when missing or mistyped
    pub fn bool(&self, path: &str) -> bool {
        self.get_bool(path).unwrap_or(false)
    }

    /// Lenient string lookup, empty when missing or mistyped
    pub fn string(&self, path: &str) -> String {
        self.get_string(path).unwrap_or_default()
    }

    /// Lenient number lookup, zero when missing or mistyped
    pub fn number(&self, path: &str) -> f64 {
        self.get_number(path).unwrap_or(0.0)
    }

    /// Lenient object lookup, empty when missing or mistyped
    pub fn object(&self, path: &str) -> Self {
        self.get_object(path).unwrap_or_default()
    }

    /// Set a value at a dotted path, creating intermediate objects.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> Result<(), StateError> {
        let segments: Vec<&str> = path.split('.').collect();
        let (last, parents) = segments
            .split_last()
            .ok_or_else(|| StateError::Missing(path.to_string()))?;

        let mut current = &mut self.0;
        for segment in parents {
            let slot = current
                .entry((*segment).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            current = slot.as_object_mut().ok_or_else(|| StateError::NotAnObject {
                path: path.to_string(),
                segment: (*segment).to_string(),
            })?;
        }
        current.insert((*last).to_string(), value.into());
        Ok(())
    }

    /// Set a literal top-level key
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Deep-merge `other` into `self`. Values from `other` win.
    pub fn merge(&mut self, other: &Self) {
        merge_maps(&mut self.0, &other.0);
    }

    /// Copy of this state without the given top-level keys
    pub fn without(&self, keys: &[&str]) -> Self {
        let mut map = self.0.clone();
        for key in keys {
            map.remove(*key);
        }
        Self(map)
    }

    /// Pretty JSON rendering
    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(&self.0).unwrap_or_default()
    }

    /// Unified diff from `self` to `other`. Empty when equal.
    pub fn diff(&self, other: &Self) -> String {
        let before = self.to_pretty_json();
        let after = other.to_pretty_json();
        TextDiff::from_lines(&before, &after)
            .unified_diff()
            .context_radius(3)
            .header("current", "desired")
            .to_string()
    }

    fn require(&self, path: &str) -> Result<&Value, StateError> {
        self.get(path)
            .ok_or_else(|| StateError::Missing(path.to_string()))
    }
}

fn wrong_type(path: &str, expected: &'static str) -> StateError {
    StateError::WrongType {
        path: path.to_string(),
        expected,
    }
}

fn merge_maps(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, value) in source {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_maps(existing, incoming);
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.0) {
            Ok(json) => f.write_str(&json),
            Err(_) => Err(fmt::Error),
        }
    }
}

impl From<Map<String, Value>> for State {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<State> for Value {
    fn from(state: State) -> Self {
        state.into_value()
    }
}

impl FromIterator<(String, Value)> for State {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

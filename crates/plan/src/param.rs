//! Late-bound strings
//!
//! Some commands can only be written once an earlier resource has run, for
//! example a path under the remote `$HOME`. An [`Output`] is a slot a
//! resource writes its result into, and a [`ParamString`] renders a
//! template from such slots at the moment it is used.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Shared, thread-safe string slot. Clones refer to the same slot.
#[derive(Debug, Clone, Default)]
pub struct Output(Arc<RwLock<String>>);

impl Output {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: impl Into<String>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = value.into();
    }

    pub fn get(&self) -> String {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_empty(&self) -> bool {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

/// A literal string, or a template whose `{}` placeholders are filled from
/// [`Output`] slots in order.
///
/// Serializes as its rendered value and deserializes as a literal.
#[derive(Debug, Clone)]
pub enum ParamString {
    Literal(String),
    Template { template: String, params: Vec<Output> },
}

impl ParamString {
    pub fn literal(s: impl Into<String>) -> Self {
        Self::Literal(s.into())
    }

    pub fn template(template: impl Into<String>, params: Vec<Output>) -> Self {
        Self::Template {
            template: template.into(),
            params,
        }
    }

    pub fn render(&self) -> String {
        match self {
            Self::Literal(s) => s.clone(),
            Self::Template { template, params } => {
                let mut out = String::with_capacity(template.len());
                let mut rest = template.as_str();
                let mut params = params.iter();
                while let Some(pos) = rest.find("{}") {
                    out.push_str(&rest[..pos]);
                    match params.next() {
                        Some(param) => out.push_str(&param.get()),
                        None => out.push_str("{}"),
                    }
                    rest = &rest[pos + 2..];
                }
                out.push_str(rest);
                out
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.render().is_empty()
    }
}

impl Default for ParamString {
    fn default() -> Self {
        Self::Literal(String::new())
    }
}

impl PartialEq for ParamString {
    fn eq(&self, other: &Self) -> bool {
        self.render() == other.render()
    }
}

impl fmt::Display for ParamString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<&str> for ParamString {
    fn from(s: &str) -> Self {
        Self::literal(s)
    }
}

impl From<String> for ParamString {
    fn from(s: String) -> Self {
        Self::Literal(s)
    }
}

impl Serialize for ParamString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.render())
    }
}

impl<'de> Deserialize<'de> for ParamString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::Literal)
    }
}

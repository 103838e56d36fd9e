//! JSON and Graphviz forms of a plan.
//!
//! JSON layout, one entry per resource:
//!
//! ```json
//! {
//!   "service:docker": {
//!     "Service": { "name": "docker", "status": "active", "enabled": true },
//!     "meta": { "dependsOn": ["rpm:docker"] }
//!   }
//! }
//! ```
//!
//! A nested plan uses the type tag `"Plan"` with the same layout inside.
//! Hidden fields are left out. The plan ID is not part of the layout, so
//! decoded plans get a fresh one.

use crate::builder::Builder;
use crate::error::{Error, Result};
use crate::plan::{Plan, resource_fields};
use crate::resource::{Resource, ResourceDecoder};
use serde_json::{Map, Value, json};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::io::Read;

const META: &str = "meta";
const DEPENDS_ON: &str = "dependsOn";
const PLAN_TYPE: &str = "Plan";

impl Plan {
    /// JSON value for this plan
    pub fn to_value(&self) -> Value {
        let mut out = Map::new();
        for (id, resource) in &self.resources {
            let mut entry = Map::new();
            entry.insert(
                resource.type_name().to_string(),
                resource_fields(resource.as_ref()),
            );
            let mut meta = Map::new();
            meta.insert(DEPENDS_ON.to_string(), json!(self.dependencies(id)));
            entry.insert(META.to_string(), Value::Object(meta));
            out.insert(id.clone(), Value::Object(entry));
        }
        Value::Object(out)
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_value())?)
    }

    /// Decode a plan, building non-plan resources with `decoder`
    pub fn from_json<R: Read>(reader: R, decoder: &dyn ResourceDecoder) -> Result<Self> {
        let value: Value = serde_json::from_reader(reader)?;
        Self::from_value(value, decoder)
    }

    pub fn from_value(value: Value, decoder: &dyn ResourceDecoder) -> Result<Self> {
        let Value::Object(entries) = value else {
            return Err(decode_error("<plan>", "expected an object keyed by resource id"));
        };

        let mut builder = Builder::new();
        for (id, entry) in entries {
            let Value::Object(mut entry) = entry else {
                return Err(decode_error(&id, "expected an object"));
            };

            let deps = match entry.remove(META) {
                Some(meta) => depends_on(&id, &meta)?,
                None => Vec::new(),
            };

            if entry.len() != 1 {
                return Err(decode_error(&id, "expected exactly one resource type tag"));
            }
            let Some((type_name, fields)) = entry.into_iter().next() else {
                return Err(decode_error(&id, "missing resource type tag"));
            };

            let resource: Box<dyn Resource> = if type_name == PLAN_TYPE {
                Box::new(Self::from_value(fields, decoder)?)
            } else {
                decoder
                    .decode(&type_name, fields)
                    .map_err(|e| decode_error(&id, &format!("{e:#}")))?
            };

            let deps: Vec<&str> = deps.iter().map(String::as_str).collect();
            builder.add_boxed(id, resource, &deps);
        }
        builder.plan()
    }

    /// Graphviz digraph with one node per resource and one edge per
    /// dependency
    pub fn to_dot(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "digraph {} {{", quote(&self.id));
        for id in &self.order {
            let _ = writeln!(out, "\t{}", quote(id));
        }
        for id in &self.order {
            for dep in self.dependencies(id) {
                let _ = writeln!(out, "\t{} -> {} [style=bold color=blue]", quote(dep), quote(id));
            }
        }
        out.push_str("}\n");
        out
    }
}

/// Structural plan equality.
///
/// Same resource IDs, same type tags, same serialized fields, same
/// dependency sets, recursing into nested plans. Plan IDs are ignored.
pub fn equal_plans(a: &Plan, b: &Plan) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.resources.iter().all(|(id, left)| {
        let Some(right) = b.resources.get(id) else {
            return false;
        };
        if left.type_name() != right.type_name() {
            return false;
        }
        let deps_a: BTreeSet<&String> = a.dependencies(id).iter().collect();
        let deps_b: BTreeSet<&String> = b.dependencies(id).iter().collect();
        if deps_a != deps_b {
            return false;
        }
        match (left.as_plan(), right.as_plan()) {
            (Some(pa), Some(pb)) => equal_plans(pa, pb),
            (None, None) => resource_fields(left.as_ref()) == resource_fields(right.as_ref()),
            _ => false,
        }
    })
}

fn depends_on(id: &str, meta: &Value) -> Result<Vec<String>> {
    match meta.get(DEPENDS_ON) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(ToString::to_string)
                    .ok_or_else(|| decode_error(id, "dependsOn must list resource ids"))
            })
            .collect(),
        Some(_) => Err(decode_error(id, "dependsOn must be an array")),
    }
}

fn decode_error(id: &str, message: &str) -> Error {
    Error::Decode {
        id: id.to_string(),
        message: message.to_string(),
    }
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

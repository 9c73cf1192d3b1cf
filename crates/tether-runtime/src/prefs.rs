#![forbid(unsafe_code)]

//! Conversion of dynamic (JSON) preference defaults.
//!
//! The host stores three kinds: bool, 32-bit int, and string. Everything
//! else is either skipped or rejected according to
//! [`UnsupportedValuePolicy`].

use serde_json::{Map, Value};
use tether_host::PrefValue;

use crate::error::{Error, Result};
use crate::policy::UnsupportedValuePolicy;

/// Kind name for a JSON value the host cannot store, or `None` if it can.
pub(crate) fn unsupported_kind(value: &Value) -> Option<&'static str> {
    match value {
        Value::Bool(_) | Value::String(_) => None,
        Value::Number(n) => match n.as_i64() {
            Some(i) if i32::try_from(i).is_ok() => None,
            Some(_) => Some("integer out of range"),
            None if n.is_u64() => Some("integer out of range"),
            None => Some("float"),
        },
        Value::Null => Some("null"),
        Value::Array(_) => Some("array"),
        Value::Object(_) => Some("object"),
    }
}

fn convert(value: &Value) -> Option<PrefValue> {
    match value {
        Value::Bool(b) => Some(PrefValue::Bool(*b)),
        Value::String(s) => Some(PrefValue::String(s.clone())),
        Value::Number(n) => n
            .as_i64()
            .and_then(|i| i32::try_from(i).ok())
            .map(PrefValue::Int),
        _ => None,
    }
}

/// Convert `map` to storable defaults.
///
/// Under [`UnsupportedValuePolicy::Reject`] the first unsupported entry
/// fails the whole conversion, so nothing is written.
pub(crate) fn convert_map(
    prefix: &str,
    map: &Map<String, Value>,
    policy: UnsupportedValuePolicy,
) -> Result<Vec<(String, PrefValue)>> {
    let mut out = Vec::with_capacity(map.len());
    for (key, value) in map {
        if let Some(pref) = convert(value) {
            out.push((key.clone(), pref));
            continue;
        }
        let kind = unsupported_kind(value).unwrap_or("unknown");
        match policy {
            UnsupportedValuePolicy::Reject => {
                return Err(Error::UnsupportedPrefValue {
                    name: format!("{prefix}{key}"),
                    kind,
                });
            }
            UnsupportedValuePolicy::Skip => {
                tracing::debug!(
                    target: "tether.starter",
                    pref = %format_args!("{prefix}{key}"),
                    kind,
                    "skipping unsupported default preference"
                );
            }
        }
    }
    Ok(out)
}

//! `${VAR}` / `${VAR:-default}` substitution in store configs.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::BaseRef;
use crate::{Error, Result};

/// A whole-string environment reference. Partial interpolation is not supported.
static ENV_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}$").expect("valid env reference pattern")
});

/// Looks up an environment variable by name.
pub type EnvLookup = dyn Fn(&str) -> Option<String> + Send + Sync;

/// Lookup backed by the process environment.
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Resolve a single string.
///
/// A set variable wins even when its value is empty; the default only applies
/// to an unset variable.
pub fn resolve_str(value: &str, lookup: &EnvLookup) -> Result<String> {
    let Some(caps) = ENV_REF.captures(value) else {
        return Ok(value.to_string());
    };

    let name = &caps[1];
    match (lookup(name), caps.get(3)) {
        (Some(found), _) => Ok(found),
        (None, Some(default)) => Ok(default.as_str().to_string()),
        (None, None) => Err(Error::Config(format!(
            "environment variable '{name}' not found; set it or provide a default with ${{{name}:-default}}"
        ))),
    }
}

/// Resolve every string inside `value`, recursing into arrays and objects.
/// Object keys are left untouched.
pub fn resolve_value(value: Value, lookup: &EnvLookup) -> Result<Value> {
    Ok(match value {
        Value::String(s) => Value::String(resolve_str(&s, lookup)?),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| resolve_value(item, lookup))
                .collect::<Result<_>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| -> Result<_> { Ok((k, resolve_value(v, lookup)?)) })
                .collect::<Result<_>>()?,
        ),
        other => other,
    })
}

/// Resolve the store names of a `base` reference. Role names are left as is.
pub fn resolve_base(base: &BaseRef, lookup: &EnvLookup) -> Result<BaseRef> {
    Ok(match base {
        BaseRef::Single(name) => BaseRef::Single(resolve_str(name, lookup)?),
        BaseRef::List(names) => BaseRef::List(
            names
                .iter()
                .map(|name| resolve_str(name, lookup))
                .collect::<Result<_>>()?,
        ),
        BaseRef::Roles(roles) => BaseRef::Roles(
            roles
                .iter()
                .map(|(role, name)| -> Result<_> { Ok((role.clone(), resolve_str(name, lookup)?)) })
                .collect::<Result<_>>()?,
        ),
    })
}

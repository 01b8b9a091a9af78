//! Parameter placeholders
//!
//! Action parameters may carry three kinds of single-key placeholder objects:
//!
//! - `{"$ref": {"type": "label", "id": "bug"}}` resolves at run time to the
//!   target id recorded for that resource
//! - `{"$user_input": "prompt"}` is filled from operator-supplied values
//! - `{"$identity": "source-user"}` is replaced at plan time with the
//!   confirmed target login

use crate::types::ResourceRef;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Reference placeholder tag
pub const REF: &str = "$ref";
/// User input placeholder tag
pub const USER_INPUT: &str = "$user_input";
/// Identity placeholder tag
pub const IDENTITY: &str = "$identity";

/// Build a `$ref` placeholder
#[must_use]
pub fn reference(resource_type: &str, id: &str) -> Value {
    let mut inner = Map::new();
    inner.insert("type".into(), Value::String(resource_type.to_string()));
    inner.insert("id".into(), Value::String(id.to_string()));
    single(REF, Value::Object(inner))
}

/// Build a `$user_input` placeholder
#[must_use]
pub fn user_input(prompt: &str) -> Value {
    single(USER_INPUT, Value::String(prompt.to_string()))
}

fn single(tag: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(tag.to_string(), value);
    Value::Object(map)
}

fn tagged<'a>(value: &'a Value, tag: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) if map.len() == 1 => map.get(tag),
        _ => None,
    }
}

fn as_ref(value: &Value) -> Option<ResourceRef> {
    let inner = tagged(value, REF)?;
    let resource_type = inner.get("type")?.as_str()?;
    let id = inner.get("id")?.as_str()?;
    Some(ResourceRef::new(resource_type, id))
}

fn as_prompt(value: &Value) -> Option<&str> {
    tagged(value, USER_INPUT)?.as_str()
}

fn walk<'a>(value: &'a Value, visit: &mut impl FnMut(&'a Value) -> bool) {
    if !visit(value) {
        return;
    }
    match value {
        Value::Array(items) => items.iter().for_each(|v| walk(v, visit)),
        Value::Object(map) => map.values().for_each(|v| walk(v, visit)),
        _ => {}
    }
}

/// Every `$ref` target in `value`, sorted and deduplicated
#[must_use]
pub fn collect_refs(value: &Value) -> Vec<ResourceRef> {
    let mut out = BTreeSet::new();
    walk(value, &mut |v| match as_ref(v) {
        Some(r) => {
            out.insert(r);
            false
        }
        None => true,
    });
    out.into_iter().collect()
}

/// Every `$user_input` prompt in `value`, in first-seen order
#[must_use]
pub fn collect_user_inputs(value: &Value) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    walk(value, &mut |v| match as_prompt(v) {
        Some(p) => {
            if !out.iter().any(|seen| seen == p) {
                out.push(p.to_string());
            }
            false
        }
        None => true,
    });
    out
}

/// Replace `$identity` placeholders with mapped logins
///
/// Unmapped identities become `$user_input` placeholders prompting for the
/// login. Returns the unmapped source users, sorted.
pub fn substitute_identities(value: &mut Value, identities: &BTreeMap<String, String>) -> Vec<String> {
    let mut unmapped = BTreeSet::new();
    substitute_identities_inner(value, identities, &mut unmapped);
    unmapped.into_iter().collect()
}

fn substitute_identities_inner(
    value: &mut Value,
    identities: &BTreeMap<String, String>,
    unmapped: &mut BTreeSet<String>,
) {
    if let Some(user) = tagged(value, IDENTITY).and_then(Value::as_str) {
        let user = user.to_string();
        *value = match identities.get(&user) {
            Some(login) => Value::String(login.clone()),
            None => {
                let replacement = user_input(&identity_prompt(&user));
                unmapped.insert(user);
                replacement
            }
        };
        return;
    }
    match value {
        Value::Array(items) => items
            .iter_mut()
            .for_each(|v| substitute_identities_inner(v, identities, unmapped)),
        Value::Object(map) => map
            .values_mut()
            .for_each(|v| substitute_identities_inner(v, identities, unmapped)),
        _ => {}
    }
}

/// Prompt used for an unmapped source identity
#[must_use]
pub fn identity_prompt(user: &str) -> String {
    format!("target login for source user {user}")
}

/// Replace `$ref` placeholders with target ids
///
/// # Errors
/// Returns the first reference `lookup` cannot resolve
pub fn resolve_refs(
    value: &Value,
    lookup: &impl Fn(&ResourceRef) -> Option<String>,
) -> Result<Value, ResourceRef> {
    if let Some(r) = as_ref(value) {
        return lookup(&r).map(Value::String).ok_or(r);
    }
    Ok(match value {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| resolve_refs(v, lookup))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), resolve_refs(v, lookup)?)))
                .collect::<Result<_, ResourceRef>>()?,
        ),
        other => other.clone(),
    })
}

/// Replace `$user_input` placeholders with supplied values
///
/// # Errors
/// Returns the first prompt with no supplied value
pub fn fill_user_inputs(value: &Value, inputs: &BTreeMap<String, Value>) -> Result<Value, String> {
    if let Some(prompt) = as_prompt(value) {
        return inputs.get(prompt).cloned().ok_or_else(|| prompt.to_string());
    }
    Ok(match value {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| fill_user_inputs(v, inputs))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), fill_user_inputs(v, inputs)?)))
                .collect::<Result<_, String>>()?,
        ),
        other => other.clone(),
    })
}

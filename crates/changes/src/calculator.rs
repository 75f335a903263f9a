// Copyright 2026 Migrator Maintainers
// SPDX-License-Identifier: Apache-2.0

//! Merge patch calculation between two versions of the same resource

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::instrument;

use crate::change::{NamespacedName, PatchChange, PatchType, ResourceReference};
use crate::mapper::{RestMapper, gvk_of};
use crate::{Error, Result};

/// Calculates the JSON merge patch that turns `old` into `new`.
///
/// Both objects must be of the same `apiVersion` and kind, the kind is
/// resolved through `mapper` to address the patch. The target name and
/// namespace come from `old`. Equal objects produce an empty patch.
///
/// # Errors
///
/// * [`Error::Validation`] if the objects are of different types
/// * [`Error::Mapping`] if the kind is not known to `mapper`
/// * [`Error::SerializationError`] if either object does not serialize
///   into a JSON object
#[instrument(skip_all)]
pub fn create_merge_patch_change<T: Serialize>(
    old: &T,
    new: &T,
    mapper: &dyn RestMapper,
) -> Result<PatchChange> {
    let old = to_object(old)?;
    let new = to_object(new)?;

    let (old_api_version, old_kind) = type_of(&old)?;
    let (new_api_version, new_kind) = type_of(&new)?;
    if old_api_version != new_api_version || old_kind != new_kind {
        return Err(Error::Validation(format!(
            "cannot diff {old_api_version}, Kind={old_kind} against {new_api_version}, Kind={new_kind}"
        )));
    }

    let ar = mapper.resource_for(&gvk_of(old_api_version, old_kind)?)?;

    let metadata = old.get("metadata");
    let name = metadata
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let namespace = metadata
        .and_then(|m| m.get("namespace"))
        .and_then(Value::as_str);

    Ok(PatchChange {
        resource_ref: ResourceReference {
            object_ref: NamespacedName::new(namespace, name),
            group: ar.group,
            resource: ar.plural,
            version: ar.version,
        },
        merge_patch: merge_patch_diff(&old, &new),
        patch_type: PatchType::MergePatchJson,
    })
}

/// Returns the merge patch between two JSON objects.
///
/// Keys whose values differ (or only exist in `new`) carry `new`'s value,
/// keys only in `old` are set to `null`, nested objects are diffed
/// recursively. Arrays are never merged: any difference replaces the whole
/// array.
#[must_use]
pub fn merge_patch_diff(old: &Map<String, Value>, new: &Map<String, Value>) -> Map<String, Value> {
    let mut patch = Map::new();

    for (key, new_value) in new {
        match (old.get(key), new_value) {
            (Some(old_value), _) if old_value == new_value => {}
            (Some(Value::Object(old_obj)), Value::Object(new_obj)) => {
                let nested = merge_patch_diff(old_obj, new_obj);
                if !nested.is_empty() {
                    patch.insert(key.clone(), Value::Object(nested));
                }
            }
            _ => {
                patch.insert(key.clone(), new_value.clone());
            }
        }
    }

    for key in old.keys() {
        if !new.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }

    patch
}

fn to_object<T: Serialize>(obj: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(obj)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::Validation(format!(
            "expected a resource object, got {other}"
        ))),
    }
}

fn type_of(obj: &Map<String, Value>) -> Result<(&str, &str)> {
    let api_version = obj
        .get("apiVersion")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Validation("resource is missing apiVersion".to_string()))?;
    let kind = obj
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Validation("resource is missing kind".to_string()))?;

    Ok((api_version, kind))
}

// Copyright 2026 Migrator Maintainers
// SPDX-License-Identifier: Apache-2.0

//! In-memory [`ResourceClient`] for tests and offline previews

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use kube::api::{DeleteParams, DynamicObject, ListParams, ObjectList, PatchParams, PostParams};
use kube::discovery::ApiResource;
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;

use crate::change::{PatchType, ResourceReference};
use crate::client::ResourceClient;
use crate::{Error, Result};

type Key = (String, String, Option<String>, String);

fn key_for(reference: &ResourceReference) -> Key {
    (
        reference.api_version(),
        reference.resource.clone(),
        reference.object_ref.namespace.clone(),
        reference.object_ref.name.clone(),
    )
}

fn reference_for(ar: &ApiResource, obj: &DynamicObject) -> ResourceReference {
    ResourceReference::from_api_resource(
        ar,
        obj.metadata.namespace.as_deref(),
        obj.metadata.name.as_deref().unwrap_or_default(),
    )
}

/// Keeps objects in memory and records every request made against it.
///
/// Writes to objects whose name was passed to [`FakeResourceClient::reject`]
/// fail, which is handy to exercise partial failures.
#[derive(Default)]
pub struct FakeResourceClient {
    objects: Mutex<BTreeMap<Key, DynamicObject>>,
    rejected: BTreeSet<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeResourceClient {
    /// Creates an empty client
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an existing object
    #[must_use]
    pub fn with_object(mut self, ar: &ApiResource, obj: DynamicObject) -> Self {
        let key = key_for(&reference_for(ar, &obj));
        self.objects.get_mut().insert(key, obj);
        self
    }

    /// Fails every write to objects named `name`
    #[must_use]
    pub fn reject(mut self, name: impl Into<String>) -> Self {
        self.rejected.insert(name.into());
        self
    }

    /// Current state of the referenced object
    pub async fn object(&self, reference: &ResourceReference) -> Option<DynamicObject> {
        self.objects.lock().await.get(&key_for(reference)).cloned()
    }

    /// Requests seen so far, as `<verb> <target>`
    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    async fn record(&self, verb: &str, reference: &ResourceReference) -> Result<()> {
        self.calls.lock().await.push(format!("{verb} {reference}"));
        if self.rejected.contains(reference.name()) {
            return Err(Error::Message(format!("{verb} {reference} rejected")));
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceClient for FakeResourceClient {
    async fn get(&self, reference: &ResourceReference) -> Result<DynamicObject> {
        self.calls.lock().await.push(format!("get {reference}"));
        self.object(reference)
            .await
            .ok_or_else(|| Error::NotFound(reference.clone()))
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        params: &ListParams,
    ) -> Result<ObjectList<DynamicObject>> {
        self.calls
            .lock()
            .await
            .push(format!("list {}/{}", resource.plural, resource.version));

        let matching: Vec<DynamicObject> = self
            .objects
            .lock()
            .await
            .iter()
            .filter(|((api_version, plural, ns, _), _)| {
                *api_version == resource.api_version
                    && *plural == resource.plural
                    && (namespace.is_none() || ns.as_deref() == namespace)
            })
            .map(|(_, obj)| obj.clone())
            .collect();

        let start = match &params.continue_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|e| Error::Message(format!("invalid continue token {token:?}: {e}")))?,
            None => 0,
        };
        let limit = params
            .limit
            .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
        let end = start.saturating_add(limit).min(matching.len());
        let next = if end < matching.len() {
            Some(end.to_string())
        } else {
            None
        };

        let items: Vec<DynamicObject> = matching
            .into_iter()
            .skip(start)
            .take(end.saturating_sub(start))
            .collect();

        Ok(serde_json::from_value(json!({
            "apiVersion": resource.api_version,
            "kind": format!("{}List", resource.kind),
            "metadata": {"continue": next},
            "items": items,
        }))?)
    }

    async fn create(
        &self,
        resource: &ApiResource,
        obj: &DynamicObject,
        params: &PostParams,
    ) -> Result<DynamicObject> {
        let reference = reference_for(resource, obj);
        self.record("create", &reference).await?;

        let mut objects = self.objects.lock().await;
        let key = key_for(&reference);
        if objects.contains_key(&key) {
            return Err(Error::Message(format!("{reference} already exists")));
        }
        if !params.dry_run {
            objects.insert(key, obj.clone());
        }
        Ok(obj.clone())
    }

    async fn patch(
        &self,
        reference: &ResourceReference,
        patch: &Map<String, Value>,
        patch_type: PatchType,
        params: &PatchParams,
    ) -> Result<DynamicObject> {
        self.record("patch", reference).await?;
        if patch_type != PatchType::MergePatchJson {
            return Err(Error::UnsupportedPatch(patch_type));
        }

        let mut objects = self.objects.lock().await;
        let key = key_for(reference);
        let current = objects
            .get(&key)
            .ok_or_else(|| Error::NotFound(reference.clone()))?;

        let mut doc = serde_json::to_value(current)?;
        json_patch::merge(&mut doc, &Value::Object(patch.clone()));
        let patched: DynamicObject = serde_json::from_value(doc)?;

        if !params.dry_run {
            objects.insert(key, patched.clone());
        }
        Ok(patched)
    }

    async fn delete(&self, reference: &ResourceReference, params: &DeleteParams) -> Result<()> {
        self.record("delete", reference).await?;

        let mut objects = self.objects.lock().await;
        let key = key_for(reference);
        if !objects.contains_key(&key) {
            return Err(Error::NotFound(reference.clone()));
        }
        if !params.dry_run {
            objects.remove(&key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Service;

    fn services() -> ApiResource {
        ApiResource::erase::<Service>(&())
    }

    #[tokio::test]
    async fn list_pages_through_objects() {
        let client = ["a", "b", "c"].into_iter().fold(FakeResourceClient::new(), |c, name| {
            c.with_object(&services(), DynamicObject::new(name, &services()).within("default"))
        });

        let first = client
            .list(&services(), Some("default"), &ListParams::default().limit(2))
            .await
            .unwrap();
        assert_eq!(first.items.len(), 2);
        let token = first.metadata.continue_.clone().unwrap();

        let second = client
            .list(
                &services(),
                Some("default"),
                &ListParams::default().limit(2).continue_token(&token),
            )
            .await
            .unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].metadata.name.as_deref(), Some("c"));
        assert!(second.metadata.continue_.is_none());

        let other = client
            .list(&services(), Some("kube-system"), &ListParams::default())
            .await
            .unwrap();
        assert!(other.items.is_empty());
    }

    #[tokio::test]
    async fn missing_objects_are_not_found() {
        let client = FakeResourceClient::new();
        let reference = ResourceReference::from_api_resource(&services(), Some("default"), "web");

        assert!(client.get(&reference).await.unwrap_err().is_not_found());
        assert!(
            client
                .delete(&reference, &DeleteParams::default())
                .await
                .unwrap_err()
                .is_not_found()
        );
    }
}

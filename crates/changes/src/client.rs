// Copyright 2026 Migrator Maintainers
// SPDX-License-Identifier: Apache-2.0

//! Narrow access to schema-less cluster resources

use async_trait::async_trait;
use kube::Client;
use kube::api::{
    Api, DeleteParams, DynamicObject, ListParams, ObjectList, Patch, PatchParams, PostParams,
};
use kube::discovery::ApiResource;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::change::{PatchType, ResourceReference};
use crate::{Error, Result};

/// Reads and writes individual cluster resources.
///
/// Missing resources are reported as [`Error::NotFound`], so callers can tell
/// them apart from any other failure.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Fetches the referenced object
    async fn get(&self, reference: &ResourceReference) -> Result<DynamicObject>;

    /// Lists objects of a resource type, across all namespaces when
    /// `namespace` is `None`
    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        params: &ListParams,
    ) -> Result<ObjectList<DynamicObject>>;

    /// Creates `obj` in its own namespace, cluster scoped if it has none
    async fn create(
        &self,
        resource: &ApiResource,
        obj: &DynamicObject,
        params: &PostParams,
    ) -> Result<DynamicObject>;

    /// Patches the referenced object
    async fn patch(
        &self,
        reference: &ResourceReference,
        patch: &Map<String, Value>,
        patch_type: PatchType,
        params: &PatchParams,
    ) -> Result<DynamicObject>;

    /// Deletes the referenced object
    async fn delete(&self, reference: &ResourceReference, params: &DeleteParams) -> Result<()>;
}

/// [`ResourceClient`] backed by the dynamic kube API
#[derive(Clone)]
pub struct KubeResourceClient {
    client: Client,
}

/// Wraps a kube client into a [`ResourceClient`]
#[must_use]
pub fn client_from(client: Client) -> KubeResourceClient {
    KubeResourceClient { client }
}

impl KubeResourceClient {
    fn dynamic_api(&self, ar: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, ar),
            None => Api::all_with(self.client.clone(), ar),
        }
    }

    fn api_for(&self, reference: &ResourceReference) -> Api<DynamicObject> {
        self.dynamic_api(&reference.api_resource(), reference.namespace())
    }
}

fn not_found(err: kube::Error, reference: &ResourceReference) -> Error {
    match err {
        kube::Error::Api(ref resp) if resp.code == 404 => Error::NotFound(reference.clone()),
        other => Error::KubeError(other),
    }
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    #[instrument(skip(self), fields(target_resource = %reference))]
    async fn get(&self, reference: &ResourceReference) -> Result<DynamicObject> {
        self.api_for(reference)
            .get(reference.name())
            .await
            .map_err(|e| not_found(e, reference))
    }

    #[instrument(skip(self, resource, params), fields(resource = %resource.plural))]
    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        params: &ListParams,
    ) -> Result<ObjectList<DynamicObject>> {
        Ok(self.dynamic_api(resource, namespace).list(params).await?)
    }

    #[instrument(skip_all, fields(
        resource = %resource.plural,
        name = obj.metadata.name.as_deref(),
        namespace = obj.metadata.namespace.as_deref(),
    ))]
    async fn create(
        &self,
        resource: &ApiResource,
        obj: &DynamicObject,
        params: &PostParams,
    ) -> Result<DynamicObject> {
        let created = self
            .dynamic_api(resource, obj.metadata.namespace.as_deref())
            .create(params, obj)
            .await?;
        debug!("created resource");
        Ok(created)
    }

    #[instrument(skip(self, patch, params), fields(target_resource = %reference))]
    async fn patch(
        &self,
        reference: &ResourceReference,
        patch: &Map<String, Value>,
        patch_type: PatchType,
        params: &PatchParams,
    ) -> Result<DynamicObject> {
        let patch = match patch_type {
            PatchType::MergePatchJson => Patch::Merge(patch),
            PatchType::StrategicMergePatch => return Err(Error::UnsupportedPatch(patch_type)),
        };

        let patched = self
            .api_for(reference)
            .patch(reference.name(), params, &patch)
            .await
            .map_err(|e| not_found(e, reference))?;
        debug!("patched resource");
        Ok(patched)
    }

    #[instrument(skip(self, params), fields(target_resource = %reference))]
    async fn delete(&self, reference: &ResourceReference, params: &DeleteParams) -> Result<()> {
        self.api_for(reference)
            .delete(reference.name(), params)
            .await
            .map_err(|e| not_found(e, reference))?;
        debug!("deleted resource");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, Request, Response, StatusCode};
    use k8s_openapi::api::core::v1::{Namespace, Service};
    use kube::client::Body;
    use serde_json::json;

    type Handle = tower_test::mock::Handle<Request<Body>, Response<Body>>;

    fn mocked() -> (KubeResourceClient, Handle) {
        let (service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        (client_from(Client::new(service, "default")), handle)
    }

    fn services() -> ApiResource {
        ApiResource::erase::<Service>(&())
    }

    fn respond(status: StatusCode, body: &Value) -> Response<Body> {
        Response::builder()
            .status(status)
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    }

    fn not_found_status(name: &str) -> Value {
        json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": format!("{name} not found"),
            "reason": "NotFound",
            "code": 404,
        })
    }

    fn service_json(name: &str) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {"name": name, "namespace": "default"},
        })
    }

    #[tokio::test]
    async fn get_addresses_namespaced_resources() {
        let (client, mut handle) = mocked();
        let server = tokio::spawn(async move {
            let (request, send) = handle.next_request().await.unwrap();
            assert_eq!(request.method(), Method::GET);
            assert_eq!(request.uri().path(), "/api/v1/namespaces/default/services/web");
            send.send_response(respond(StatusCode::OK, &service_json("web")));
        });

        let reference = ResourceReference::from_api_resource(&services(), Some("default"), "web");
        let obj = client.get(&reference).await.unwrap();

        assert_eq!(obj.metadata.name.as_deref(), Some("web"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn missing_cluster_scoped_resources_are_not_found() {
        let (client, mut handle) = mocked();
        let server = tokio::spawn(async move {
            let (request, send) = handle.next_request().await.unwrap();
            assert_eq!(request.uri().path(), "/api/v1/namespaces/legacy");
            send.send_response(respond(StatusCode::NOT_FOUND, &not_found_status("legacy")));
        });

        let namespaces = ApiResource::erase::<Namespace>(&());
        let reference = ResourceReference::from_api_resource(&namespaces, None, "legacy");
        let err = client.get(&reference).await.unwrap_err();

        assert!(matches!(err, Error::NotFound(ref r) if *r == reference));
        assert!(err.is_not_found());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn delete_of_missing_resources_is_not_found() {
        let (client, mut handle) = mocked();
        let server = tokio::spawn(async move {
            let (request, send) = handle.next_request().await.unwrap();
            assert_eq!(request.method(), Method::DELETE);
            assert_eq!(request.uri().path(), "/api/v1/namespaces/default/services/gone");
            send.send_response(respond(StatusCode::NOT_FOUND, &not_found_status("gone")));
        });

        let reference = ResourceReference::from_api_resource(&services(), Some("default"), "gone");
        let err = client
            .delete(&reference, &DeleteParams::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NotFound(_)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn dry_run_patches_are_sent_as_merge_patches() {
        let (client, mut handle) = mocked();
        let server = tokio::spawn(async move {
            let (request, send) = handle.next_request().await.unwrap();
            assert_eq!(request.method(), Method::PATCH);
            assert_eq!(request.uri().path(), "/api/v1/namespaces/default/services/web");
            assert!(request.uri().query().unwrap_or_default().contains("dryRun=All"));
            assert_eq!(
                request.headers()[http::header::CONTENT_TYPE],
                "application/merge-patch+json"
            );
            send.send_response(respond(StatusCode::OK, &service_json("web")));
        });

        let reference = ResourceReference::from_api_resource(&services(), Some("default"), "web");
        let patch = json!({"metadata": {"labels": {"migrated": "true"}}});
        let params = PatchParams {
            dry_run: true,
            ..PatchParams::default()
        };
        client
            .patch(
                &reference,
                patch.as_object().unwrap(),
                PatchType::MergePatchJson,
                &params,
            )
            .await
            .unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn dry_run_creates_target_the_object_namespace() {
        let (client, mut handle) = mocked();
        let server = tokio::spawn(async move {
            let (request, send) = handle.next_request().await.unwrap();
            assert_eq!(request.method(), Method::POST);
            assert_eq!(request.uri().path(), "/api/v1/namespaces/default/services");
            assert!(request.uri().query().unwrap_or_default().contains("dryRun=All"));
            send.send_response(respond(StatusCode::CREATED, &service_json("web")));
        });

        let obj = DynamicObject::new("web", &services()).within("default");
        let params = PostParams {
            dry_run: true,
            ..PostParams::default()
        };
        let created = client.create(&services(), &obj, &params).await.unwrap();

        assert_eq!(created.metadata.name.as_deref(), Some("web"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn strategic_merge_patches_are_rejected_locally() {
        let (client, _handle) = mocked();

        let reference = ResourceReference::from_api_resource(&services(), Some("default"), "web");
        let err = client
            .patch(
                &reference,
                &Map::new(),
                PatchType::StrategicMergePatch,
                &PatchParams::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::UnsupportedPatch(PatchType::StrategicMergePatch)
        ));
    }
}

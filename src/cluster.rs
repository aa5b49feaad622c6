/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/cluster.rs
*
* The cluster reads the converter needs beyond the Application itself: the
* standalone `Workflow` an Application can point to, and standalone `Policy`
* objects referenced from deploy steps.
*
* `ClusterClient` is the seam; `KubeClusterClient` implements it against the
* API server. Both kinds are `core.oam.dev/v1alpha1` objects that keep their
* payload at the top level, so they are fetched as `DynamicObject`s and their
* remaining fields are decoded into typed structs.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::crds::{PolicyObject, WorkflowObject};
use crate::error::ClusterError;
use async_trait::async_trait;
use kube::{
    api::{Api, ApiResource, DynamicObject},
    core::GroupVersionKind,
    Client,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

const OAM_GROUP: &str = "core.oam.dev";
const OAM_V1ALPHA1: &str = "v1alpha1";

#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get_workflow(&self, namespace: &str, name: &str) -> Result<WorkflowObject, ClusterError>;

    async fn get_policy(&self, namespace: &str, name: &str) -> Result<PolicyObject, ClusterError>;
}

#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        kind: &'static str,
        namespace: &str,
        name: &str,
    ) -> Result<T, ClusterError> {
        let gvk = GroupVersionKind::gvk(OAM_GROUP, OAM_V1ALPHA1, kind);
        let resource = ApiResource::from_gvk(&gvk);
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &resource);

        debug!(kind, namespace, name, "Fetching referenced object");
        let obj = api
            .get_opt(name)
            .await?
            .ok_or_else(|| ClusterError::NotFound {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;
        decode_payload(kind, obj.data)
    }
}

fn decode_payload<T: DeserializeOwned>(kind: &'static str, data: Value) -> Result<T, ClusterError> {
    serde_json::from_value(data).map_err(|source| ClusterError::Decode { kind, source })
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_workflow(&self, namespace: &str, name: &str) -> Result<WorkflowObject, ClusterError> {
        self.fetch("Workflow", namespace, name).await
    }

    async fn get_policy(&self, namespace: &str, name: &str) -> Result<PolicyObject, ClusterError> {
        self.fetch("Policy", namespace, name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_workflow_payload() {
        let wf: WorkflowObject = decode_payload(
            "Workflow",
            json!({
                "steps": [
                    {"name": "deploy-prod", "type": "deploy", "properties": {"policies": ["topo"]}}
                ]
            }),
        )
        .unwrap();
        assert_eq!(wf.steps.len(), 1);
        assert_eq!(wf.steps[0].type_, "deploy");
    }

    #[test]
    fn test_decode_policy_payload_requires_type() {
        let err = decode_payload::<PolicyObject>("Policy", json!({"properties": {}})).unwrap_err();
        assert!(matches!(err, ClusterError::Decode { kind: "Policy", .. }));
    }
}

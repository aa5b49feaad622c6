/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/crds.rs
*
* This file defines the Rust data structures for the Kubernetes resources the
* synchronisation engine consumes. The operator does not own any of these
* definitions; it only reads them.
*
* Architecture:
* - `Application` (core.oam.dev/v1beta1) is declared with the
*   `kube::CustomResource` derive macro so that the watch driver decodes events
*   straight into a typed value.
* - `WorkflowObject` and `PolicyObject` (core.oam.dev/v1alpha1) keep their
*   payload at the top level instead of under `spec`, so they are fetched as
*   `DynamicObject`s and decoded into these plain structs by the cluster client.
* - Component, trait, policy and step properties are opaque JSON payloads and
*   are carried as `serde_json::Value` without interpretation.
* - `serde` attributes map between Rust `snake_case` and Kubernetes `camelCase`.
*
* SPDX-License-Identifier: Apache-2.0
*/

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Annotation marking an Application as internal, never synced.
pub const ANNOTATION_SOT_FROM_INNER: &str = "app.oam.dev/source-of-truth";
/// Annotation set on Applications deployed from the UX side.
pub const ANNOTATION_APP_NAME: &str = "app.oam.dev/appName";
/// Label carried by Applications installed by an addon.
pub const LABEL_ADDON_NAME: &str = "addons.oam.dev/name";

/// Workflow step type whose `policies` property may reference standalone policies.
pub const DEPLOY_STEP_TYPE: &str = "deploy";

// --- Application Custom Resource ---

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "core.oam.dev",
    version = "v1beta1",
    kind = "Application",
    namespaced,
    status = "ApplicationStatus",
    shortname = "app"
)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    #[serde(default)]
    pub components: Vec<AppComponent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<AppPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<AppWorkflow>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppComponent {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<StepInput>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<StepOutput>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traits: Vec<AppTrait>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scopes: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppTrait {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppPolicy {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
}

/// The workflow section: either inline steps or a reference to a `Workflow` object.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppWorkflow {
    #[serde(rename = "ref", default, skip_serializing_if = "String::is_empty")]
    pub ref_: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<WorkflowStep>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<StepInput>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<StepOutput>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_steps: Vec<WorkflowStep>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepInput {
    pub from: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parameter_key: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepOutput {
    pub name: String,
    pub value_from: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applied_resources: Vec<AppliedResource>,
}

/// A resource the Application has actually deployed somewhere.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppliedResource {
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

impl Application {
    /// The workflow reference, if the workflow section is an indirection.
    pub fn workflow_ref(&self) -> Option<&str> {
        self.spec
            .workflow
            .as_ref()
            .map(|wf| wf.ref_.as_str())
            .filter(|r| !r.is_empty())
    }

    pub fn generation(&self) -> i64 {
        self.metadata.generation.unwrap_or_default()
    }

    pub fn app_name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// The Application's namespace; objects read without one live in `default`.
    pub fn app_namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("default")
    }
}

// --- Standalone objects referenced by an Application ---

/// The payload of a `core.oam.dev/v1alpha1` `Workflow` object.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowObject {
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
}

/// The payload of a `core.oam.dev/v1alpha1` `Policy` object.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyObject {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
}

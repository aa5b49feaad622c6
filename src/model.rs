/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/model.rs
*
* Datastore entities produced by the synchronisation engine, together with the
* labels, name prefixes and creator tags that tie a persisted record back to the
* Application CR it was generated from.
*
* Architecture:
* - Every record kind implements `datastore::Entity`: its primary key, its
*   filterable index labels and the timestamps the store stamps on write.
* - Child records (components, policies, workflows, env bindings) are keyed by
*   the owning application's persisted key, never by the raw CR name.
* - `Creator` is a closed enum for the tags this engine writes plus an `Other`
*   case for anything produced through another path. It is stored as its plain
*   string so records written elsewhere stay readable.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::crds::{StepInput, StepOutput};
use crate::datastore::{index_of, Entity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Namespace of the CR a record was synced from.
pub const LABEL_SYNC_NAMESPACE: &str = "ux.oam.dev/synced-namespace";
/// CR generation at the last successful sync.
pub const LABEL_SYNC_GENERATION: &str = "ux.oam.dev/synced-generation";
/// Which side is allowed to drive changes to the application.
pub const LABEL_SOURCE_OF_TRUTH: &str = "ux.oam.dev/source-of-truth";

pub const ENV_NAME_PREFIX: &str = "env-";
pub const WORKFLOW_NAME_PREFIX: &str = "wf-";
pub const TARGET_NAME_PREFIX: &str = "target-";
pub const LOCAL_CLUSTER: &str = "local";

pub const DEFAULT_PROJECT: &str = "default";
pub const ADDON_PROJECT: &str = "addons";
pub const ADDON_APP_PREFIX: &str = "addon-";

pub const AUTO_GEN_DESCRIPTION: &str =
    "Automatically converted from KubeVela Application in Kubernetes.";
pub const AUTO_GEN_TRAIT_DESCRIPTION: &str = "auto gen";

const CREATOR_SYNC: &str = "Automatically generated";
const CREATOR_SYNC_POLICY_REF: &str = "Automatically generated from outside policy reference";

/// Structured property payload of components, traits, policies and steps.
pub type JsonStruct = serde_json::Map<String, Value>;

/// The key disambiguating same-named applications across namespaces.
pub fn composed_app_name(name: &str, namespace: &str) -> String {
    format!("{name}-{namespace}")
}

pub fn env_name(namespace: &str) -> String {
    format!("{ENV_NAME_PREFIX}{namespace}")
}

pub fn target_name(cluster: &str, namespace: &str) -> String {
    format!("{TARGET_NAME_PREFIX}{cluster}-{namespace}")
}

/// Who produced a child record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Creator {
    /// Converted from the CR by this engine.
    Sync,
    /// A standalone policy pulled in because a deploy step references it.
    SyncPolicyRef,
    Other(String),
}

impl Creator {
    pub fn as_str(&self) -> &str {
        match self {
            Creator::Sync => CREATOR_SYNC,
            Creator::SyncPolicyRef => CREATOR_SYNC_POLICY_REF,
            Creator::Other(s) => s,
        }
    }

    /// Records this engine may overwrite.
    pub fn is_sync_owned(&self) -> bool {
        matches!(self, Creator::Sync | Creator::SyncPolicyRef)
    }

    /// Records this engine may remove. Reference policies can be shared, so
    /// they stay once added.
    pub fn is_deletable_by_sync(&self) -> bool {
        matches!(self, Creator::Sync)
    }
}

impl Default for Creator {
    fn default() -> Self {
        Creator::Other(String::new())
    }
}

impl From<String> for Creator {
    fn from(s: String) -> Self {
        match s.as_str() {
            CREATOR_SYNC => Creator::Sync,
            CREATOR_SYNC_POLICY_REF => Creator::SyncPolicyRef,
            _ => Creator::Other(s),
        }
    }
}

impl From<Creator> for String {
    fn from(c: Creator) -> Self {
        match c {
            Creator::Other(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for Creator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceOfTruth {
    FromCR,
    FromUX,
    FromInner,
}

impl SourceOfTruth {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceOfTruth::FromCR => "from-CR",
            SourceOfTruth::FromUX => "from-UX",
            SourceOfTruth::FromInner => "from-inner",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "from-CR" => Some(SourceOfTruth::FromCR),
            "from-UX" => Some(SourceOfTruth::FromUX),
            "from-inner" => Some(SourceOfTruth::FromInner),
            _ => None,
        }
    }
}

impl fmt::Display for SourceOfTruth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Application ---

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    #[serde(default)]
    pub create_time: DateTime<Utc>,
    #[serde(default)]
    pub update_time: DateTime<Utc>,
    pub name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Application {
    pub fn named(name: impl Into<String>) -> Self {
        Application {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn sync_namespace(&self) -> Option<&str> {
        self.label(LABEL_SYNC_NAMESPACE)
    }

    pub fn sync_generation(&self) -> Option<&str> {
        self.label(LABEL_SYNC_GENERATION)
    }

    /// The explicit source-of-truth label, if present and recognised.
    pub fn source_of_truth(&self) -> Option<SourceOfTruth> {
        self.label(LABEL_SOURCE_OF_TRUTH).and_then(SourceOfTruth::parse)
    }
}

impl Entity for Application {
    const TABLE: &'static str = "vela_application";
    const SHORT_TABLE: &'static str = "app";

    fn primary_key(&self) -> String {
        self.name.clone()
    }

    fn index(&self) -> BTreeMap<String, String> {
        index_of([("name", self.name.as_str()), ("project", self.project.as_str())])
    }

    fn set_create_time(&mut self, time: DateTime<Utc>) {
        self.create_time = time;
    }

    fn set_update_time(&mut self, time: DateTime<Utc>) {
        self.update_time = time;
    }
}

// --- ApplicationComponent ---

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationTrait {
    #[serde(default)]
    pub create_time: DateTime<Utc>,
    #[serde(default)]
    pub update_time: DateTime<Utc>,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<JsonStruct>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationComponent {
    #[serde(default)]
    pub create_time: DateTime<Utc>,
    #[serde(default)]
    pub update_time: DateTime<Utc>,
    pub app_primary_key: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_revision: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub inputs: Vec<StepInput>,
    #[serde(default)]
    pub outputs: Vec<StepOutput>,
    #[serde(default)]
    pub scopes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<JsonStruct>,
    #[serde(default)]
    pub traits: Vec<ApplicationTrait>,
    #[serde(default)]
    pub creator: Creator,
}

impl ApplicationComponent {
    pub fn owned_by(app_primary_key: impl Into<String>) -> Self {
        ApplicationComponent {
            app_primary_key: app_primary_key.into(),
            ..Default::default()
        }
    }
}

impl Entity for ApplicationComponent {
    const TABLE: &'static str = "vela_application_component";
    const SHORT_TABLE: &'static str = "app_cmp";

    fn primary_key(&self) -> String {
        format!("{}-{}", self.app_primary_key, self.name)
    }

    fn index(&self) -> BTreeMap<String, String> {
        index_of([
            ("appPrimaryKey", self.app_primary_key.as_str()),
            ("name", self.name.as_str()),
            ("type", self.type_.as_str()),
        ])
    }

    fn set_create_time(&mut self, time: DateTime<Utc>) {
        self.create_time = time;
    }

    fn set_update_time(&mut self, time: DateTime<Utc>) {
        self.update_time = time;
    }
}

// --- ApplicationPolicy ---

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationPolicy {
    #[serde(default)]
    pub create_time: DateTime<Utc>,
    #[serde(default)]
    pub update_time: DateTime<Utc>,
    pub app_primary_key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<JsonStruct>,
    #[serde(default)]
    pub creator: Creator,
}

impl ApplicationPolicy {
    pub fn owned_by(app_primary_key: impl Into<String>) -> Self {
        ApplicationPolicy {
            app_primary_key: app_primary_key.into(),
            ..Default::default()
        }
    }
}

impl Entity for ApplicationPolicy {
    const TABLE: &'static str = "vela_application_policy";
    const SHORT_TABLE: &'static str = "app_plc";

    fn primary_key(&self) -> String {
        format!("{}-{}", self.app_primary_key, self.name)
    }

    fn index(&self) -> BTreeMap<String, String> {
        index_of([
            ("appPrimaryKey", self.app_primary_key.as_str()),
            ("name", self.name.as_str()),
            ("type", self.type_.as_str()),
        ])
    }

    fn set_create_time(&mut self, time: DateTime<Utc>) {
        self.create_time = time;
    }

    fn set_update_time(&mut self, time: DateTime<Utc>) {
        self.update_time = time;
    }
}

// --- Workflow ---

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub inputs: Vec<StepInput>,
    #[serde(default)]
    pub outputs: Vec<StepOutput>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<JsonStruct>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    #[serde(default)]
    pub create_time: DateTime<Utc>,
    #[serde(default)]
    pub update_time: DateTime<Utc>,
    pub app_primary_key: String,
    pub name: String,
    #[serde(default)]
    pub env_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
}

impl Entity for Workflow {
    const TABLE: &'static str = "vela_workflow";
    const SHORT_TABLE: &'static str = "wf";

    fn primary_key(&self) -> String {
        format!("{}-{}", self.app_primary_key, self.name)
    }

    fn index(&self) -> BTreeMap<String, String> {
        index_of([
            ("appPrimaryKey", self.app_primary_key.as_str()),
            ("name", self.name.as_str()),
            ("envName", self.env_name.as_str()),
        ])
    }

    fn set_create_time(&mut self, time: DateTime<Utc>) {
        self.create_time = time;
    }

    fn set_update_time(&mut self, time: DateTime<Utc>) {
        self.update_time = time;
    }
}

// --- Env / EnvBinding ---

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Env {
    #[serde(default)]
    pub create_time: DateTime<Utc>,
    #[serde(default)]
    pub update_time: DateTime<Utc>,
    pub name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub targets: Vec<String>,
}

impl Entity for Env {
    const TABLE: &'static str = "vela_env";
    const SHORT_TABLE: &'static str = "env";

    fn primary_key(&self) -> String {
        self.name.clone()
    }

    fn index(&self) -> BTreeMap<String, String> {
        index_of([
            ("name", self.name.as_str()),
            ("namespace", self.namespace.as_str()),
            ("project", self.project.as_str()),
        ])
    }

    fn set_create_time(&mut self, time: DateTime<Utc>) {
        self.create_time = time;
    }

    fn set_update_time(&mut self, time: DateTime<Utc>) {
        self.update_time = time;
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvBinding {
    #[serde(default)]
    pub create_time: DateTime<Utc>,
    #[serde(default)]
    pub update_time: DateTime<Utc>,
    pub app_primary_key: String,
    /// Name of the bound env.
    pub name: String,
}

impl Entity for EnvBinding {
    const TABLE: &'static str = "vela_envbinding";
    const SHORT_TABLE: &'static str = "envb";

    fn primary_key(&self) -> String {
        format!("{}-{}", self.app_primary_key, self.name)
    }

    fn index(&self) -> BTreeMap<String, String> {
        index_of([
            ("appPrimaryKey", self.app_primary_key.as_str()),
            ("name", self.name.as_str()),
        ])
    }

    fn set_create_time(&mut self, time: DateTime<Utc>) {
        self.create_time = time;
    }

    fn set_update_time(&mut self, time: DateTime<Utc>) {
        self.update_time = time;
    }
}

// --- Target ---

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTarget {
    pub cluster_name: String,
    #[serde(default)]
    pub namespace: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    #[serde(default)]
    pub create_time: DateTime<Utc>,
    #[serde(default)]
    pub update_time: DateTime<Utc>,
    pub name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub project: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterTarget>,
}

impl Entity for Target {
    const TABLE: &'static str = "vela_target";
    const SHORT_TABLE: &'static str = "tg";

    fn primary_key(&self) -> String {
        self.name.clone()
    }

    fn index(&self) -> BTreeMap<String, String> {
        index_of([("name", self.name.as_str()), ("project", self.project.as_str())])
    }

    fn set_create_time(&mut self, time: DateTime<Utc>) {
        self.create_time = time;
    }

    fn set_update_time(&mut self, time: DateTime<Utc>) {
        self.update_time = time;
    }
}

// --- Project ---

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(default)]
    pub create_time: DateTime<Utc>,
    #[serde(default)]
    pub update_time: DateTime<Utc>,
    pub name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub description: String,
}

impl Entity for Project {
    const TABLE: &'static str = "vela_project";
    const SHORT_TABLE: &'static str = "pj";

    fn primary_key(&self) -> String {
        self.name.clone()
    }

    fn index(&self) -> BTreeMap<String, String> {
        index_of([("name", self.name.as_str())])
    }

    fn set_create_time(&mut self, time: DateTime<Utc>) {
        self.create_time = time;
    }

    fn set_update_time(&mut self, time: DateTime<Utc>) {
        self.update_time = time;
    }
}

/// Everything one Application CR converts into, ready to be written.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DataStoreApp {
    pub app_meta: Application,
    pub env: Env,
    pub env_binding: EnvBinding,
    pub components: Vec<ApplicationComponent>,
    pub policies: Vec<ApplicationPolicy>,
    pub workflow: Workflow,
    pub targets: Vec<Target>,
}

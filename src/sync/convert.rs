/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/sync/convert.rs
*
* Converts an Application CR into the datastore records that represent it.
*
* Conversion never writes. The only I/O it performs is reading: the persisted
* application record (to resolve the key under the collision rule), a
* referenced standalone Workflow, and standalone Policies referenced from
* deploy steps. If any part fails the whole conversion fails and nothing has
* been persisted.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::cluster::ClusterClient;
use crate::crds::{self, AppComponent, AppPolicy, DEPLOY_STEP_TYPE, LABEL_ADDON_NAME};
use crate::datastore::DataStore;
use crate::error::{ConvertError, StoreError};
use crate::model::{
    self, composed_app_name, env_name, target_name, ApplicationComponent, ApplicationPolicy,
    ApplicationTrait, ClusterTarget, Creator, DataStoreApp, Env, EnvBinding, JsonStruct,
    SourceOfTruth, Target, Workflow, WorkflowStep, ADDON_APP_PREFIX, ADDON_PROJECT,
    AUTO_GEN_DESCRIPTION, AUTO_GEN_TRAIT_DESCRIPTION, DEFAULT_PROJECT, LABEL_SOURCE_OF_TRUTH,
    LABEL_SYNC_GENERATION, LABEL_SYNC_NAMESPACE, LOCAL_CLUSTER, WORKFLOW_NAME_PREFIX,
};
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

fn value_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Properties must be a JSON object; null and absent both mean "none".
fn to_json_struct(
    entity: &'static str,
    name: &str,
    value: Option<&Value>,
) -> Result<Option<JsonStruct>, ConvertError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map.clone())),
        Some(other) => Err(ConvertError::InvalidProperties {
            entity,
            name: name.to_string(),
            reason: format!("expected an object, got {}", value_kind(other)),
        }),
    }
}

pub fn convert_component(
    app_key: &str,
    component: &AppComponent,
) -> Result<ApplicationComponent, ConvertError> {
    let now = Utc::now();
    let traits = component
        .traits
        .iter()
        .map(|t| {
            let properties = to_json_struct(
                "trait",
                &format!("{}/{}", component.name, t.type_),
                t.properties.as_ref(),
            )?;
            Ok(ApplicationTrait {
                create_time: now,
                update_time: now,
                type_: t.type_.clone(),
                alias: t.type_.clone(),
                description: AUTO_GEN_TRAIT_DESCRIPTION.to_string(),
                properties,
            })
        })
        .collect::<Result<Vec<_>, ConvertError>>()?;

    Ok(ApplicationComponent {
        app_primary_key: app_key.to_string(),
        name: component.name.clone(),
        type_: component.type_.clone(),
        external_revision: component.external_revision.clone(),
        depends_on: component.depends_on.clone(),
        inputs: component.inputs.clone(),
        outputs: component.outputs.clone(),
        scopes: component.scopes.clone(),
        properties: to_json_struct("component", &component.name, component.properties.as_ref())?,
        traits,
        creator: Creator::Sync,
        ..Default::default()
    })
}

pub fn convert_policy(
    app_key: &str,
    policy: &AppPolicy,
    creator: Creator,
) -> Result<ApplicationPolicy, ConvertError> {
    Ok(ApplicationPolicy {
        app_primary_key: app_key.to_string(),
        name: policy.name.clone(),
        type_: policy.type_.clone(),
        properties: to_json_struct("policy", &policy.name, policy.properties.as_ref())?,
        creator,
        ..Default::default()
    })
}

/// The deterministic name of the synthetic workflow of `app`.
pub fn workflow_name(app: &crds::Application) -> String {
    let base = app.workflow_ref().unwrap_or_else(|| app.app_name());
    format!("{WORKFLOW_NAME_PREFIX}{base}")
}

/// Converts the workflow section, resolving a workflow reference through the
/// cluster. Returns the raw steps too, for external policy discovery.
pub async fn convert_workflow<C: ClusterClient + ?Sized>(
    client: &C,
    app_key: &str,
    app: &crds::Application,
) -> Result<(Workflow, Vec<crds::WorkflowStep>), ConvertError> {
    let mut workflow = Workflow {
        app_primary_key: app_key.to_string(),
        name: workflow_name(app),
        env_name: env_name(app.app_namespace()),
        ..Default::default()
    };

    let steps = match (&app.spec.workflow, app.workflow_ref()) {
        (None, _) => return Ok((workflow, Vec::new())),
        (Some(_), Some(reference)) => {
            client
                .get_workflow(app.app_namespace(), reference)
                .await?
                .steps
        }
        (Some(inline), None) => inline.steps.clone(),
    };

    for step in &steps {
        let Some(properties) = to_json_struct("workflow step", &step.name, step.properties.as_ref())? else {
            continue;
        };
        workflow.steps.push(WorkflowStep {
            name: step.name.clone(),
            type_: step.type_.clone(),
            inputs: step.inputs.clone(),
            outputs: step.outputs.clone(),
            depends_on: step.depends_on.clone(),
            properties: Some(properties),
        });
    }
    Ok((workflow, steps))
}

fn collect_policy_refs(
    steps: &[crds::WorkflowStep],
    out: &mut Vec<String>,
) -> Result<(), ConvertError> {
    for step in steps {
        if step.type_ == DEPLOY_STEP_TYPE {
            let refs = step.properties.as_ref().and_then(|p| p.get("policies"));
            match refs {
                None | Some(Value::Null) => {}
                Some(Value::Array(items)) => {
                    for item in items {
                        let Some(name) = item.as_str() else {
                            return Err(ConvertError::InvalidProperties {
                                entity: "workflow step",
                                name: step.name.clone(),
                                reason: format!("policy reference is {}", value_kind(item)),
                            });
                        };
                        out.push(name.to_string());
                    }
                }
                Some(other) => {
                    return Err(ConvertError::InvalidProperties {
                        entity: "workflow step",
                        name: step.name.clone(),
                        reason: format!("'policies' must be an array, got {}", value_kind(other)),
                    })
                }
            }
        }
        collect_policy_refs(&step.sub_steps, out)?;
    }
    Ok(())
}

/// Fetches the standalone policies deploy steps reference but the
/// Application does not declare, each at most once, in reference order.
pub async fn load_external_policies<C: ClusterClient + ?Sized>(
    client: &C,
    namespace: &str,
    steps: &[crds::WorkflowStep],
    declared: &[AppPolicy],
) -> Result<Vec<AppPolicy>, ConvertError> {
    let mut refs = Vec::new();
    collect_policy_refs(steps, &mut refs)?;

    let mut seen: HashSet<&str> = declared.iter().map(|p| p.name.as_str()).collect();
    let mut policies = Vec::new();
    for name in &refs {
        if !seen.insert(name.as_str()) {
            continue;
        }
        let obj = client.get_policy(namespace, name).await?;
        policies.push(AppPolicy {
            name: name.clone(),
            type_: obj.type_,
            properties: obj.properties,
        });
    }
    Ok(policies)
}

/// One target per distinct (cluster, namespace) the Application was applied to.
pub fn convert_targets(app: &crds::Application) -> Vec<Target> {
    let mut seen = HashSet::new();
    let mut targets = Vec::new();
    let applied = app.status.iter().flat_map(|s| s.applied_resources.iter());
    for res in applied {
        let cluster = if res.cluster.is_empty() {
            LOCAL_CLUSTER
        } else {
            res.cluster.as_str()
        };
        let name = target_name(cluster, &res.namespace);
        if !seen.insert(name.clone()) {
            continue;
        }
        targets.push(Target {
            name,
            cluster: Some(ClusterTarget {
                cluster_name: cluster.to_string(),
                namespace: res.namespace.clone(),
            }),
            ..Default::default()
        });
    }
    targets
}

/// Resolves the persisted key of the application `name` in `namespace`.
///
/// A composed record already synced from `namespace` wins. Otherwise the bare
/// name is used when it is free or was synced from the same namespace, and the
/// composed name when another namespace holds it.
pub async fn resolve_app_key<S: DataStore + ?Sized>(
    store: &S,
    name: &str,
    namespace: &str,
) -> Result<String, StoreError> {
    let composed = composed_app_name(name, namespace);
    let mut existing = model::Application::named(composed.as_str());
    match store.get(&mut existing).await {
        Ok(()) if existing.sync_namespace() == Some(namespace) => return Ok(composed),
        Ok(()) => {}
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }

    let mut existing = model::Application::named(name);
    match store.get(&mut existing).await {
        Ok(()) if existing.sync_namespace() != Some(namespace) => Ok(composed),
        Ok(()) => Ok(name.to_string()),
        Err(e) if e.is_not_found() => Ok(name.to_string()),
        Err(e) => Err(e),
    }
}

fn project_for(app: &crds::Application) -> &'static str {
    let addon = app
        .metadata
        .labels
        .as_ref()
        .is_some_and(|l| l.contains_key(LABEL_ADDON_NAME));
    if addon && app.app_name().starts_with(ADDON_APP_PREFIX) {
        ADDON_PROJECT
    } else {
        DEFAULT_PROJECT
    }
}

/// Converts `app` into every record the engine persists for it.
pub async fn convert_app_to_datastore_app<S, C>(
    client: &C,
    app: &crds::Application,
    store: &S,
) -> Result<DataStoreApp, ConvertError>
where
    S: DataStore + ?Sized,
    C: ClusterClient + ?Sized,
{
    let name = app.app_name();
    let namespace = app.app_namespace();
    let project = project_for(app);
    let app_key = resolve_app_key(store, name, namespace).await?;
    debug!(app = name, namespace, app_key = %app_key, "Resolved application key");

    let app_meta = model::Application {
        name: app_key.clone(),
        alias: name.to_string(),
        project: project.to_string(),
        description: AUTO_GEN_DESCRIPTION.to_string(),
        labels: BTreeMap::from([
            (LABEL_SYNC_NAMESPACE.to_string(), namespace.to_string()),
            (LABEL_SYNC_GENERATION.to_string(), app.generation().to_string()),
            (
                LABEL_SOURCE_OF_TRUTH.to_string(),
                SourceOfTruth::FromCR.as_str().to_string(),
            ),
        ]),
        ..Default::default()
    };
    let mut env = Env {
        name: env_name(namespace),
        namespace: namespace.to_string(),
        description: AUTO_GEN_DESCRIPTION.to_string(),
        project: project.to_string(),
        ..Default::default()
    };
    let env_binding = EnvBinding {
        app_primary_key: app_key.clone(),
        name: env_name(namespace),
        ..Default::default()
    };

    let components = app
        .spec
        .components
        .iter()
        .map(|c| convert_component(&app_key, c))
        .collect::<Result<Vec<_>, _>>()?;

    let mut policies = app
        .spec
        .policies
        .iter()
        .map(|p| convert_policy(&app_key, p, Creator::Sync))
        .collect::<Result<Vec<_>, _>>()?;

    let (workflow, steps) = convert_workflow(client, &app_key, app).await?;

    let external = load_external_policies(client, namespace, &steps, &app.spec.policies).await?;
    for policy in &external {
        policies.push(convert_policy(&app_key, policy, Creator::SyncPolicyRef)?);
    }

    let mut targets = convert_targets(app);
    for target in &mut targets {
        target.project = project.to_string();
    }
    env.targets = targets.iter().map(|t| t.name.clone()).collect();

    Ok(DataStoreApp {
        app_meta,
        env,
        env_binding,
        components,
        policies,
        workflow,
        targets,
    })
}

/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/sync/store.rs
*
* Writes converted records into the datastore.
*
* Components and policies go through `reconcile_children`, a name-set diff
* against what is already persisted for the owner. Every other record kind has
* a small upsert helper with its own rule (create-if-absent, replace wholesale,
* compare-then-update). Deletes everywhere go through `best_effort_delete`.
*
* Ownership rules:
* - Records whose creator is not this engine are never updated or deleted.
* - Reference policies are updated when they appear again but never deleted.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::datastore::{DataStore, Entity};
use crate::error::StoreError;
use crate::model::{
    ApplicationComponent, ApplicationPolicy, Creator, DataStoreApp, Env, EnvBinding, Project,
    Target, Workflow, LABEL_SOURCE_OF_TRUTH, LABEL_SYNC_GENERATION, LABEL_SYNC_NAMESPACE,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// A record owned by an application and diffed by name.
pub trait ChildEntity: Entity {
    fn name(&self) -> &str;
    /// Primary key of the owning application.
    fn owner(&self) -> &str;
    fn creator(&self) -> &Creator;
    fn create_time(&self) -> DateTime<Utc>;
    /// A template listing every child of `app_key`.
    fn owned_by(app_key: &str) -> Self;
}

impl ChildEntity for ApplicationComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn owner(&self) -> &str {
        &self.app_primary_key
    }

    fn creator(&self) -> &Creator {
        &self.creator
    }

    fn create_time(&self) -> DateTime<Utc> {
        self.create_time
    }

    fn owned_by(app_key: &str) -> Self {
        ApplicationComponent::owned_by(app_key)
    }
}

impl ChildEntity for ApplicationPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn owner(&self) -> &str {
        &self.app_primary_key
    }

    fn creator(&self) -> &Creator {
        &self.creator
    }

    fn create_time(&self) -> DateTime<Utc> {
        self.create_time
    }

    fn owned_by(app_key: &str) -> Self {
        ApplicationPolicy::owned_by(app_key)
    }
}

/// Deletes `entity`, logging instead of failing. Not-found counts as done.
pub async fn best_effort_delete<S, E>(store: &S, entity: &E)
where
    S: DataStore + ?Sized,
    E: Entity,
{
    let key = entity.primary_key();
    match store.delete(entity).await {
        Ok(()) => debug!(table = E::TABLE, key = %key, "Deleted record"),
        Err(e) if e.is_not_found() => debug!(table = E::TABLE, key = %key, "Record already gone"),
        Err(error) => warn!(table = E::TABLE, key = %key, %error, "Failed to delete record, continuing"),
    }
}

/// Makes the persisted children of `owner` match `desired` by name.
///
/// Missing ones are added, present ones overwritten, and sync-created ones no
/// longer desired are deleted on a best-effort basis. Fails only when an add
/// or a put fails.
pub async fn reconcile_children<S, E>(store: &S, owner: &str, desired: Vec<E>) -> Result<(), StoreError>
where
    S: DataStore + ?Sized,
    E: ChildEntity,
{
    let existing: HashMap<String, E> = store
        .list(&E::owned_by(owner), None)
        .await?
        .into_iter()
        .map(|e| (e.name().to_string(), e))
        .collect();
    let wanted: HashSet<String> = desired.iter().map(|e| e.name().to_string()).collect();

    for (name, stale) in existing.iter().filter(|(name, _)| !wanted.contains(*name)) {
        if stale.creator().is_deletable_by_sync() {
            best_effort_delete(store, stale).await;
        } else {
            debug!(table = E::TABLE, owner, name = %name, creator = %stale.creator(), "Keeping record not deletable by sync");
        }
    }

    for mut entity in desired {
        match existing.get(entity.name()) {
            None => match store.add(&mut entity).await {
                Ok(()) => {}
                Err(e) if e.is_already_exists() => overwrite_if_owned(store, owner, entity).await?,
                Err(e) => return Err(e),
            },
            Some(current) if !current.creator().is_sync_owned() => {
                debug!(table = E::TABLE, owner, name = %entity.name(), creator = %current.creator(), "Leaving record with foreign creator");
            }
            Some(current) => {
                entity.set_create_time(current.create_time());
                store.put(&mut entity).await?;
            }
        }
    }
    Ok(())
}

/// Handles an add that hit an existing key the owner listing did not show.
/// Child keys join owner and name, so the record may belong to another
/// application; it is only overwritten when it is this owner's and sync-owned.
async fn overwrite_if_owned<S, E>(store: &S, owner: &str, mut entity: E) -> Result<(), StoreError>
where
    S: DataStore + ?Sized,
    E: ChildEntity,
{
    let mut stored = entity.clone();
    store.get(&mut stored).await?;
    if stored.owner() != owner || !stored.creator().is_sync_owned() {
        warn!(
            table = E::TABLE,
            owner,
            key = %entity.primary_key(),
            holder = stored.owner(),
            creator = %stored.creator(),
            "Record key taken by another owner, skipping"
        );
        return Ok(());
    }
    entity.set_create_time(stored.create_time());
    store.put(&mut entity).await
}

pub async fn store_project<S: DataStore + ?Sized>(store: &S, name: &str) -> Result<(), StoreError> {
    let mut project = Project {
        name: name.to_string(),
        alias: name.to_string(),
        ..Default::default()
    };
    if store.is_exist(&project).await? {
        return Ok(());
    }
    match store.add(&mut project).await {
        Ok(()) => {
            info!(project = name, "Created project for synced applications");
            Ok(())
        }
        Err(e) if e.is_already_exists() => Ok(()),
        Err(e) => Err(e),
    }
}

/// Adds the env, or updates its target list when the set of targets changed.
pub async fn store_env<S: DataStore + ?Sized>(store: &S, env: &Env) -> Result<(), StoreError> {
    let mut existing = Env {
        name: env.name.clone(),
        ..Default::default()
    };
    match store.get(&mut existing).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => {
            return match store.add(&mut env.clone()).await {
                Err(e) if e.is_already_exists() => Ok(()),
                other => other,
            };
        }
        Err(e) => return Err(e),
    }

    let current: HashSet<&String> = existing.targets.iter().collect();
    let desired: HashSet<&String> = env.targets.iter().collect();
    if current == desired {
        return Ok(());
    }
    debug!(env = %env.name, targets = ?env.targets, "Updating env targets");
    existing.targets = env.targets.clone();
    store.put(&mut existing).await
}

/// Adds the binding if absent; an existing binding is left as is.
pub async fn store_env_binding<S: DataStore + ?Sized>(
    store: &S,
    binding: &EnvBinding,
) -> Result<(), StoreError> {
    match store.add(&mut binding.clone()).await {
        Err(e) if e.is_already_exists() => Ok(()),
        other => other,
    }
}

/// Adds the workflow, or replaces an existing one of the same owner and name.
pub async fn store_workflow<S: DataStore + ?Sized>(store: &S, workflow: &Workflow) -> Result<(), StoreError> {
    let mut existing = Workflow {
        app_primary_key: workflow.app_primary_key.clone(),
        name: workflow.name.clone(),
        ..Default::default()
    };
    let mut desired = workflow.clone();
    match store.get(&mut existing).await {
        Ok(()) => {
            desired.create_time = existing.create_time;
            store.put(&mut desired).await
        }
        Err(e) if e.is_not_found() => store.add(&mut desired).await,
        Err(e) => Err(e),
    }
}

/// Adds the targets that do not exist yet. Never fails: a target that cannot
/// be written is logged and skipped.
pub async fn store_targets<S: DataStore + ?Sized>(store: &S, targets: &[Target]) {
    for target in targets {
        let exists = match store.is_exist(target).await {
            Ok(exists) => exists,
            Err(error) => {
                warn!(target = %target.name, %error, "Failed to check target, skipping");
                continue;
            }
        };
        if exists {
            continue;
        }
        match store.add(&mut target.clone()).await {
            Ok(()) => debug!(target = %target.name, "Added target"),
            Err(e) if e.is_already_exists() => {}
            Err(error) => warn!(target = %target.name, %error, "Failed to add target, skipping"),
        }
    }
}

/// Adds the application record. An existing record only has its sync labels
/// refreshed, and is written only if they changed.
pub async fn store_app_meta<S: DataStore + ?Sized>(store: &S, ds_app: &DataStoreApp) -> Result<(), StoreError> {
    let desired = &ds_app.app_meta;
    let mut existing = crate::model::Application::named(desired.name.as_str());
    match store.get(&mut existing).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => return store.add(&mut desired.clone()).await,
        Err(e) => return Err(e),
    }

    let before = existing.labels.clone();
    if let Some(generation) = desired.labels.get(LABEL_SYNC_GENERATION) {
        existing
            .labels
            .insert(LABEL_SYNC_GENERATION.to_string(), generation.clone());
    }
    for key in [LABEL_SYNC_NAMESPACE, LABEL_SOURCE_OF_TRUTH] {
        if existing.label(key).is_none() {
            if let Some(value) = desired.labels.get(key) {
                existing.labels.insert(key.to_string(), value.clone());
            }
        }
    }
    if existing.labels == before {
        return Ok(());
    }
    store.put(&mut existing).await
}

/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/sync/cr2ux.rs
*
* The CR-to-UX reconciler: the only entry points the rest of the process uses
* to push Application CR state into the datastore.
*
* Architecture:
* - `init` warms the generation cache from persisted records and must succeed
*   before any event is handled.
* - `add_or_update` is a single pass with no retries of its own: gate on
*   generation and source of truth, convert, then write in a fixed order with
*   the application record last. A pass that fails part way leaves the cache
*   untouched, so the next delivery of the same generation tries again.
* - `delete_app` removes the application record and the children this engine
*   created. Every delete is best-effort and the call never fails.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::cache::GenerationCache;
use super::convert::{convert_app_to_datastore_app, resolve_app_key, workflow_name};
use super::sot::{classify_from_cr, classify_from_meta};
use super::store::{
    best_effort_delete, reconcile_children, store_app_meta, store_env, store_env_binding,
    store_project, store_targets, store_workflow, ChildEntity,
};
use crate::cluster::ClusterClient;
use crate::crds;
use crate::datastore::DataStore;
use crate::error::{Result, SyncError};
use crate::model::{self, composed_app_name, DataStoreApp, SourceOfTruth, Workflow};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Pushes Application CR state into the datastore `S`, reading referenced
/// objects through `C`.
pub struct Reconciler<S, C> {
    store: Arc<S>,
    client: Arc<C>,
    cache: Arc<GenerationCache>,
}

impl<S, C> Clone for Reconciler<S, C> {
    fn clone(&self) -> Self {
        Reconciler {
            store: self.store.clone(),
            client: self.client.clone(),
            cache: self.cache.clone(),
        }
    }
}

impl<S: DataStore, C: ClusterClient> Reconciler<S, C> {
    pub fn new(store: Arc<S>, client: Arc<C>, cache: Arc<GenerationCache>) -> Self {
        Reconciler {
            store,
            client,
            cache,
        }
    }

    pub fn cache(&self) -> &GenerationCache {
        &self.cache
    }

    #[instrument(skip(self))]
    pub async fn init(&self) -> Result<()> {
        self.cache
            .rebuild(&*self.store)
            .await
            .map_err(SyncError::store("generation cache"))?;
        Ok(())
    }

    /// Decides whether an event for `app` needs a sync pass. A delete event
    /// also evicts the cached generation.
    pub async fn should_sync(&self, app: &crds::Application, is_delete: bool) -> bool {
        let name = app.app_name();
        let namespace = app.app_namespace();
        let key = composed_app_name(name, namespace);

        if let Some(entry) = self.cache.get(&key).await {
            if is_delete {
                self.cache.evict(&key).await;
            } else if entry.generation == app.generation() {
                debug!(app = name, namespace, generation = entry.generation, "Generation already synced");
                return false;
            }
        }

        let sot = classify_from_meta(&*self.store, name, namespace, classify_from_cr(app)).await;
        match sot {
            SourceOfTruth::FromCR => true,
            SourceOfTruth::FromUX | SourceOfTruth::FromInner => {
                debug!(app = name, namespace, source_of_truth = %sot, "Application not owned by the CR");
                false
            }
        }
    }

    #[instrument(skip(self, app), fields(app = %app.app_name(), namespace = %app.app_namespace(), generation = app.generation()))]
    pub async fn add_or_update(&self, app: &crds::Application) -> Result<()> {
        if !self.should_sync(app, false).await {
            return Ok(());
        }
        match self.sync(app).await {
            Ok(app_key) => {
                info!(app_key = %app_key, "Synced application");
                Ok(())
            }
            Err(error) => {
                error!(%error, "Failed to sync application");
                Err(error)
            }
        }
    }

    async fn sync(&self, app: &crds::Application) -> Result<String> {
        let store = &*self.store;
        let DataStoreApp {
            app_meta,
            env,
            env_binding,
            components,
            policies,
            workflow,
            targets,
        } = convert_app_to_datastore_app(&*self.client, app, store).await?;
        let app_key = app_meta.name.clone();

        store_project(store, &app_meta.project)
            .await
            .map_err(SyncError::store("project"))?;
        store_env(store, &env).await.map_err(SyncError::store("env"))?;
        store_env_binding(store, &env_binding)
            .await
            .map_err(SyncError::store("env binding"))?;
        reconcile_children(store, &app_key, components)
            .await
            .map_err(SyncError::store("components"))?;
        reconcile_children(store, &app_key, policies)
            .await
            .map_err(SyncError::store("policies"))?;
        store_workflow(store, &workflow)
            .await
            .map_err(SyncError::store("workflow"))?;
        store_targets(store, &targets).await;

        let target_count = targets.len();
        let ds_app = DataStoreApp {
            app_meta,
            ..Default::default()
        };
        store_app_meta(store, &ds_app)
            .await
            .map_err(SyncError::store("application"))?;

        self.cache
            .update(
                composed_app_name(app.app_name(), app.app_namespace()),
                app.generation(),
                Some(target_count),
            )
            .await;
        Ok(app_key)
    }

    #[instrument(skip(self, app), fields(app = %app.app_name(), namespace = %app.app_namespace()))]
    pub async fn delete_app(&self, app: &crds::Application) -> Result<()> {
        if !self.should_sync(app, true).await {
            return Ok(());
        }
        let store = &*self.store;
        let app_key = match resolve_app_key(store, app.app_name(), app.app_namespace()).await {
            Ok(key) => key,
            Err(error) => {
                warn!(%error, "Cannot resolve application key, skipping delete");
                return Ok(());
            }
        };

        best_effort_delete(store, &model::Application::named(app_key.as_str())).await;
        self.delete_owned::<model::ApplicationComponent>(&app_key).await;
        self.delete_owned::<model::ApplicationPolicy>(&app_key).await;
        best_effort_delete(
            store,
            &Workflow {
                app_primary_key: app_key.clone(),
                name: workflow_name(app),
                ..Default::default()
            },
        )
        .await;

        info!(app_key = %app_key, "Deleted synced application");
        Ok(())
    }

    async fn delete_owned<E: ChildEntity>(&self, app_key: &str) {
        let children = match self.store.list(&E::owned_by(app_key), None).await {
            Ok(children) => children,
            Err(error) => {
                warn!(app_key, table = E::TABLE, %error, "Failed to list children for delete");
                return;
            }
        };
        for child in children.iter().filter(|c| c.creator().is_deletable_by_sync()) {
            best_effort_delete(&*self.store, child).await;
        }
    }
}

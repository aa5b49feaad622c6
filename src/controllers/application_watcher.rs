/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/controllers/application_watcher.rs
*
* Drives the reconciler from the Kubernetes watch on `Application` resources.
*
* Architecture:
* - The generation cache is warmed through `Reconciler::init` before the watch
*   starts; a failure there aborts startup.
* - Events arrive from the `kube-runtime` watcher already decoded into the
*   typed `Application`. Payloads that fail to decode surface as stream errors
*   and are logged and dropped; the next relist delivers the current state.
* - Apply events (live or from the initial list) go to `add_or_update`,
*   deletions to `delete_app`. Events are handled one at a time, in order.
* - The watcher does not resync on its own, so an Application whose sync
*   failed is kept in a `RetryQueue` and handed to the reconciler again on
*   every retry tick until it succeeds, is superseded by a newer event, or is
*   deleted.
* - Reconnects after watch errors use the watcher's default backoff.
* - The loop stops as soon as the shutdown future resolves. An event already
*   being handled is allowed to finish.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::cluster::ClusterClient;
use crate::crds::Application;
use crate::datastore::DataStore;
use crate::error::SyncError;
use crate::model::composed_app_name;
use crate::sync::Reconciler;
use futures::StreamExt;
use kube::{Api, ResourceExt};
use kube_runtime::{watcher, WatchStreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Applications whose last sync failed, keyed by `name-namespace`. Only the
/// latest delivered state of each is kept.
#[derive(Default)]
pub struct RetryQueue {
    pending: HashMap<String, Application>,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn key(app: &Application) -> String {
        composed_app_name(app.app_name(), app.app_namespace())
    }

    fn push(&mut self, app: Application) {
        self.pending.insert(Self::key(&app), app);
    }

    fn forget(&mut self, app: &Application) {
        self.pending.remove(&Self::key(app));
    }
}

/// Runs the Application watch until `shutdown` resolves. Failed syncs are
/// retried every `retry_interval`.
pub async fn run<S, C, F>(
    api: Api<Application>,
    reconciler: Reconciler<S, C>,
    retry_interval: Duration,
    shutdown: F,
) -> Result<(), SyncError>
where
    S: DataStore,
    C: ClusterClient,
    F: Future<Output = ()>,
{
    reconciler.init().await?;
    info!(cached = reconciler.cache().len().await, "Generation cache ready, starting Application watch");

    let stream = watcher(api, watcher::Config::default()).default_backoff();
    tokio::pin!(stream);
    tokio::pin!(shutdown);

    let mut retries = RetryQueue::new();
    let mut retry_timer = tokio::time::interval(retry_interval);
    retry_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!(pending_retries = retries.len(), "Shutdown requested, stopping Application watch");
                break;
            }
            next = stream.next() => match next {
                Some(Ok(event)) => handle_event(&reconciler, &mut retries, event).await,
                Some(Err(error)) => warn!(%error, "Application watch error"),
                None => {
                    warn!("Application watch stream ended");
                    break;
                }
            },
            _ = retry_timer.tick() => retry_pending(&reconciler, &mut retries).await,
        }
    }
    Ok(())
}

/// Dispatches a single watch event to the reconciler.
pub async fn handle_event<S, C>(
    reconciler: &Reconciler<S, C>,
    retries: &mut RetryQueue,
    event: watcher::Event<Application>,
) where
    S: DataStore,
    C: ClusterClient,
{
    match event {
        watcher::Event::Apply(app) | watcher::Event::InitApply(app) => {
            // Failures are logged by the reconciler.
            match reconciler.add_or_update(&app).await {
                Ok(()) => retries.forget(&app),
                Err(_) => {
                    debug!(app = %app.name_any(), "Sync failed, queued for retry");
                    retries.push(app);
                }
            }
        }
        watcher::Event::Delete(app) => {
            retries.forget(&app);
            if let Err(error) = reconciler.delete_app(&app).await {
                error!(app = %app.name_any(), %error, "Failed to delete synced application");
            }
        }
        // TODO: on InitDone, remove synced records whose Application no longer
        // exists; deletions that happen while the operator is down are missed.
        watcher::Event::Init => debug!("Listing Applications"),
        watcher::Event::InitDone => info!("Initial Application list processed"),
    }
}

/// Hands every queued Application to the reconciler again. Successes leave
/// the queue.
pub async fn retry_pending<S, C>(reconciler: &Reconciler<S, C>, retries: &mut RetryQueue)
where
    S: DataStore,
    C: ClusterClient,
{
    if retries.is_empty() {
        return;
    }
    debug!(pending = retries.len(), "Retrying failed syncs");
    let pending = std::mem::take(&mut retries.pending);
    for (key, app) in pending {
        if reconciler.add_or_update(&app).await.is_err() {
            retries.pending.insert(key, app);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::{Entity, MemoryStore};
    use crate::model::{self, ApplicationComponent};
    use crate::sync::GenerationCache;
    use crate::testing::{self, FakeClusterClient, FaultyStore, Op};
    use std::sync::Arc;

    fn reconciler<S: DataStore>(store: Arc<S>) -> Reconciler<S, FakeClusterClient> {
        Reconciler::new(
            store,
            Arc::new(FakeClusterClient::default()),
            Arc::new(GenerationCache::new()),
        )
    }

    async fn exists<S: DataStore>(store: &S, key: &str) -> bool {
        store.is_exist(&model::Application::named(key)).await.unwrap()
    }

    #[tokio::test]
    async fn test_apply_and_delete_events_are_dispatched() {
        let store = Arc::new(MemoryStore::new());
        let rec = reconciler(store.clone());
        let mut retries = RetryQueue::new();
        let app = testing::fixture("app-basic.yaml");

        handle_event(&rec, &mut retries, watcher::Event::Init).await;
        handle_event(&rec, &mut retries, watcher::Event::InitApply(app.clone())).await;
        handle_event(&rec, &mut retries, watcher::Event::InitDone).await;
        assert!(exists(&*store, "A1").await);

        handle_event(&rec, &mut retries, watcher::Event::Delete(app)).await;
        assert!(!exists(&*store, "A1").await);
        assert!(retries.is_empty());
    }

    #[tokio::test]
    async fn test_failed_sync_does_not_stop_later_events() {
        let store = Arc::new(MemoryStore::new());
        let rec = reconciler(store.clone());
        let mut retries = RetryQueue::new();

        let mut broken = testing::application("broken", "ns1", 1);
        let mut comp = testing::component("web");
        comp.properties = Some(serde_json::json!(42));
        broken.spec.components.push(comp);
        handle_event(&rec, &mut retries, watcher::Event::Apply(broken)).await;

        handle_event(&rec, &mut retries, watcher::Event::Apply(testing::application("fine", "ns1", 1))).await;
        assert!(!exists(&*store, "broken").await);
        assert!(exists(&*store, "fine").await);
        assert_eq!(retries.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_sync_converges_after_store_recovers() {
        let store = Arc::new(FaultyStore::new());
        let rec = reconciler(store.clone());
        let mut retries = RetryQueue::new();
        let app = testing::fixture("app-basic.yaml");

        store.fail(Op::Add, ApplicationComponent::TABLE);
        handle_event(&rec, &mut retries, watcher::Event::Apply(app)).await;
        assert!(!exists(&*store, "A1").await);
        assert_eq!(retries.len(), 1);

        retry_pending(&rec, &mut retries).await;
        assert_eq!(retries.len(), 1);

        store.heal();
        retry_pending(&rec, &mut retries).await;
        assert!(retries.is_empty());
        assert!(exists(&*store, "A1").await);
        assert!(rec.cache().get("A1-N1").await.is_some());
    }

    #[tokio::test]
    async fn test_newer_event_or_delete_supersedes_queued_retry() {
        let store = Arc::new(FaultyStore::new());
        let rec = reconciler(store.clone());
        let mut retries = RetryQueue::new();
        let mut app = testing::fixture("app-basic.yaml");

        store.fail(Op::Add, ApplicationComponent::TABLE);
        handle_event(&rec, &mut retries, watcher::Event::Apply(app.clone())).await;
        assert_eq!(retries.len(), 1);

        store.heal();
        app.metadata.generation = Some(2);
        handle_event(&rec, &mut retries, watcher::Event::Apply(app.clone())).await;
        assert!(retries.is_empty());
        assert_eq!(rec.cache().get("A1-N1").await.map(|e| e.generation), Some(2));

        store.fail(Op::Add, ApplicationComponent::TABLE);
        let mut other = testing::application("other", "N1", 1);
        other.spec.components.push(testing::component("web"));
        handle_event(&rec, &mut retries, watcher::Event::Apply(other.clone())).await;
        assert_eq!(retries.len(), 1);
        handle_event(&rec, &mut retries, watcher::Event::Delete(other)).await;
        assert!(retries.is_empty());
    }
}

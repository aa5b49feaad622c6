/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/main.rs
*
* Entry point of the UX sync operator.
*
* Startup:
* 1. Read `OperatorConfig` from the environment and initialise logging.
* 2. Create the Kubernetes client and the `Application` API, cluster-wide or
*    for the configured namespace.
* 3. Open the configured datastore (ConfigMaps in the datastore namespace, or
*    the in-memory store).
* 4. Build the reconciler and run the Application watch until Ctrl-C,
*    retrying failed syncs on the configured interval.
*
* SPDX-License-Identifier: Apache-2.0
*/

use anyhow::Context;
use kube::{Api, Client};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use ux_sync::cluster::{ClusterClient, KubeClusterClient};
use ux_sync::config::{DatastoreDriver, OperatorConfig};
use ux_sync::controllers::application_watcher;
use ux_sync::crds::Application;
use ux_sync::datastore::{ConfigMapStore, DataStore, MemoryStore};
use ux_sync::sync::{GenerationCache, Reconciler};
use ux_sync::telemetry;

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "Cannot listen for Ctrl-C, running until killed");
        std::future::pending::<()>().await;
    }
}

async fn run<S: DataStore, C: ClusterClient>(
    api: Api<Application>,
    reconciler: Reconciler<S, C>,
    retry_interval: Duration,
) -> anyhow::Result<()> {
    application_watcher::run(api, reconciler, retry_interval, shutdown_signal())
        .await
        .context("Application watch failed")?;
    info!("UX sync operator shutting down.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OperatorConfig::from_env().context("invalid operator configuration")?;
    telemetry::init(config.log_format).context("failed to initialise logging")?;
    info!(?config, "UX sync operator starting...");

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    let api: Api<Application> = match &config.watch_namespace {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    };
    let cluster = Arc::new(KubeClusterClient::new(client.clone()));
    let cache = Arc::new(GenerationCache::new());

    match config.datastore {
        DatastoreDriver::ConfigMap => {
            let store = ConfigMapStore::connect(client, &config.datastore_namespace)
                .await
                .with_context(|| {
                    format!(
                        "failed to open datastore in namespace '{}'",
                        config.datastore_namespace
                    )
                })?;
            info!(namespace = %config.datastore_namespace, "Using ConfigMap datastore");
            run(api, Reconciler::new(Arc::new(store), cluster, cache), config.retry_interval).await
        }
        DatastoreDriver::Memory => {
            warn!("Using in-memory datastore, synced records are lost on restart");
            run(
                api,
                Reconciler::new(Arc::new(MemoryStore::new()), cluster, cache),
                config.retry_interval,
            )
            .await
        }
    }
}

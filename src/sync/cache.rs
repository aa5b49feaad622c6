/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/sync/cache.rs
*
* The generation cache remembers, per CR, the generation last synced into the
* datastore, so unchanged Applications are skipped without touching the store.
*
* It is a filter only: the `synced-generation` label on the persisted record is
* the durable copy, which is what `rebuild` reads back at startup. Entries are
* keyed by the CR's `name-namespace`, whatever key the application was
* persisted under.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::datastore::DataStore;
use crate::error::StoreError;
use crate::model::{self, composed_app_name};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// What the cache remembers about one Application.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    pub generation: i64,
    /// Number of deploy targets at the last sync. Recorded but not yet used
    /// to decide whether to sync.
    pub target_count: Option<usize>,
}

/// Last synced generation per Application, keyed by `name-namespace`.
#[derive(Debug, Default)]
pub struct GenerationCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

/// The CR key a persisted application record was synced from.
///
/// The alias holds the CR name on synced records. Records without one fall
/// back to treating a name that already ends in `-<namespace>` as composed.
fn cr_key_of(app: &model::Application, namespace: &str) -> String {
    if !app.alias.is_empty() {
        return composed_app_name(&app.alias, namespace);
    }
    if app.name.ends_with(&format!("-{namespace}")) {
        app.name.clone()
    } else {
        composed_app_name(&app.name, namespace)
    }
}

impl GenerationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.read().await.get(key).copied()
    }

    pub async fn update(&self, key: impl Into<String>, generation: i64, target_count: Option<usize>) {
        self.entries.write().await.insert(
            key.into(),
            CacheEntry {
                generation,
                target_count,
            },
        );
    }

    pub async fn evict(&self, key: &str) -> Option<CacheEntry> {
        self.entries.write().await.remove(key)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Loads the synced generation of every persisted application. Records
    /// that were never synced are ignored and malformed ones skipped.
    pub async fn rebuild<S: DataStore + ?Sized>(&self, store: &S) -> Result<usize, StoreError> {
        let apps = match store.list(&model::Application::default(), None).await {
            Ok(apps) => apps,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e),
        };

        let mut loaded = HashMap::new();
        for app in &apps {
            let Some(raw) = app.sync_generation() else {
                continue;
            };
            let Some(namespace) = app.sync_namespace() else {
                warn!(app_key = %app.name, "Synced application has no namespace label, skipping");
                continue;
            };
            let generation = match raw.parse::<i64>() {
                Ok(g) => g,
                Err(error) => {
                    warn!(app_key = %app.name, generation = raw, %error, "Unparsable synced generation, skipping");
                    continue;
                }
            };
            loaded.insert(
                cr_key_of(app, namespace),
                CacheEntry {
                    generation,
                    target_count: None,
                },
            );
        }

        let count = loaded.len();
        self.entries.write().await.extend(loaded);
        info!(entries = count, scanned = apps.len(), "Rebuilt generation cache");
        Ok(count)
    }
}

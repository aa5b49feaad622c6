/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/datastore/memory.rs
*
* A process-local `DataStore`. Records are kept per table as JSON documents
* next to their index labels, behind a `tokio::sync::RwLock` so concurrent
* reconciliations on different owner keys never need external locking.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::{
    apply_list_options, ensure_primary_key, matches_index, DataStore, Entity, FilterOptions,
    ListOptions,
};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Clone, Debug)]
struct StoredRecord {
    labels: BTreeMap<String, String>,
    doc: Value,
}

type Table = BTreeMap<String, StoredRecord>;

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<&'static str, Table>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn matching<E: Entity>(&self, template: &E, filter: Option<&FilterOptions>) -> Vec<Value> {
        let index = template.index();
        let tables = self.tables.read().await;
        tables
            .get(E::TABLE)
            .map(|table| {
                table
                    .values()
                    .filter(|r| matches_index(&r.labels, &index, filter))
                    .map(|r| r.doc.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn add<E: Entity>(&self, entity: &mut E) -> Result<(), StoreError> {
        let key = ensure_primary_key(entity)?;
        let now = Utc::now();
        entity.set_create_time(now);
        entity.set_update_time(now);
        let record = StoredRecord {
            labels: entity.index(),
            doc: serde_json::to_value(&*entity)?,
        };

        let mut tables = self.tables.write().await;
        let table = tables.entry(E::TABLE).or_default();
        if table.contains_key(&key) {
            return Err(StoreError::RecordExist);
        }
        table.insert(key, record);
        Ok(())
    }

    async fn put<E: Entity>(&self, entity: &mut E) -> Result<(), StoreError> {
        let key = ensure_primary_key(entity)?;
        entity.set_update_time(Utc::now());
        let record = StoredRecord {
            labels: entity.index(),
            doc: serde_json::to_value(&*entity)?,
        };

        let mut tables = self.tables.write().await;
        match tables.get_mut(E::TABLE).and_then(|t| t.get_mut(&key)) {
            Some(slot) => {
                *slot = record;
                Ok(())
            }
            None => Err(StoreError::RecordNotExist),
        }
    }

    async fn get<E: Entity>(&self, entity: &mut E) -> Result<(), StoreError> {
        let key = ensure_primary_key(entity)?;
        let doc = {
            let tables = self.tables.read().await;
            tables
                .get(E::TABLE)
                .and_then(|t| t.get(&key))
                .map(|r| r.doc.clone())
                .ok_or(StoreError::RecordNotExist)?
        };
        *entity = serde_json::from_value(doc)?;
        Ok(())
    }

    async fn delete<E: Entity>(&self, entity: &E) -> Result<(), StoreError> {
        let key = ensure_primary_key(entity)?;
        let mut tables = self.tables.write().await;
        tables
            .get_mut(E::TABLE)
            .and_then(|t| t.remove(&key))
            .map(|_| ())
            .ok_or(StoreError::RecordNotExist)
    }

    async fn is_exist<E: Entity>(&self, entity: &E) -> Result<bool, StoreError> {
        let key = ensure_primary_key(entity)?;
        let tables = self.tables.read().await;
        Ok(tables.get(E::TABLE).is_some_and(|t| t.contains_key(&key)))
    }

    async fn list<E: Entity>(
        &self,
        template: &E,
        options: Option<&ListOptions>,
    ) -> Result<Vec<E>, StoreError> {
        let docs = self.matching(template, options.map(|o| &o.filter)).await;
        apply_list_options(docs, options)
            .into_iter()
            .map(|doc| serde_json::from_value(doc).map_err(StoreError::from))
            .collect()
    }

    async fn count<E: Entity>(
        &self,
        template: &E,
        filter: Option<&FilterOptions>,
    ) -> Result<u64, StoreError> {
        let docs = self.matching(template, filter).await;
        let options = filter.map(|f| ListOptions {
            filter: f.clone(),
            ..Default::default()
        });
        Ok(apply_list_options(docs, options.as_ref()).len() as u64)
    }
}

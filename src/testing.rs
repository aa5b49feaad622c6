/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/testing.rs
*
* Test doubles and fixtures shared by the unit tests: a canned
* `ClusterClient`, a `DataStore` wrapper that injects failures and counts
* writes, and Application builders.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::cluster::ClusterClient;
use crate::crds::{AppComponent, Application, ApplicationSpec, PolicyObject, WorkflowObject};
use crate::datastore::{DataStore, Entity, FilterOptions, ListOptions, MemoryStore};
use crate::error::{ClusterError, StoreError};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

const APP_BASIC: &str = include_str!("sync/testdata/app-basic.yaml");
const APP_FULL: &str = include_str!("sync/testdata/app-full.yaml");

pub(crate) fn fixture(name: &str) -> Application {
    let raw = match name {
        "app-basic.yaml" => APP_BASIC,
        "app-full.yaml" => APP_FULL,
        other => panic!("unknown fixture {other}"),
    };
    serde_yaml::from_str(raw).unwrap()
}

pub(crate) fn application(name: &str, namespace: &str, generation: i64) -> Application {
    let mut app = Application::new(name, ApplicationSpec::default());
    app.metadata.namespace = Some(namespace.to_string());
    app.metadata.generation = Some(generation);
    app
}

pub(crate) fn component(name: &str) -> AppComponent {
    AppComponent {
        name: name.to_string(),
        type_: "webservice".to_string(),
        properties: Some(json!({"image": format!("registry.local/{name}:latest")})),
        ..Default::default()
    }
}

#[derive(Default)]
pub(crate) struct FakeClusterClient {
    workflows: HashMap<(String, String), WorkflowObject>,
    policies: HashMap<(String, String), PolicyObject>,
    policy_fetches: Mutex<Vec<String>>,
}

impl FakeClusterClient {
    pub(crate) fn with_workflow(mut self, namespace: &str, name: &str, wf: WorkflowObject) -> Self {
        self.workflows
            .insert((namespace.to_string(), name.to_string()), wf);
        self
    }

    pub(crate) fn with_policy(mut self, namespace: &str, name: &str, policy: PolicyObject) -> Self {
        self.policies
            .insert((namespace.to_string(), name.to_string()), policy);
        self
    }

    /// `namespace/name` of every policy lookup so far.
    pub(crate) fn policy_fetches(&self) -> Vec<String> {
        self.policy_fetches.lock().unwrap().clone()
    }
}

fn not_found(kind: &'static str, namespace: &str, name: &str) -> ClusterError {
    ClusterError::NotFound {
        kind,
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

#[async_trait]
impl ClusterClient for FakeClusterClient {
    async fn get_workflow(&self, namespace: &str, name: &str) -> Result<WorkflowObject, ClusterError> {
        self.workflows
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| not_found("Workflow", namespace, name))
    }

    async fn get_policy(&self, namespace: &str, name: &str) -> Result<PolicyObject, ClusterError> {
        self.policy_fetches
            .lock()
            .unwrap()
            .push(format!("{namespace}/{name}"));
        self.policies
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| not_found("Policy", namespace, name))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Op {
    Add,
    Put,
    Get,
    Delete,
    List,
}

#[derive(Clone, Copy, Debug)]
enum Fault {
    Broken,
    NotFound,
}

/// A `MemoryStore` that fails chosen operations on chosen tables.
/// `is_exist` counts as `Get` and `count` as `List`.
#[derive(Default)]
pub(crate) struct FaultyStore {
    inner: MemoryStore,
    faults: Mutex<HashMap<(Op, &'static str), Fault>>,
    writes: AtomicUsize,
}

impl FaultyStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Makes `op` on `table` fail with a non-recoverable error.
    pub(crate) fn fail(&self, op: Op, table: &'static str) {
        self.faults.lock().unwrap().insert((op, table), Fault::Broken);
    }

    /// Makes `op` on `table` report `RecordNotExist`.
    pub(crate) fn vanish(&self, op: Op, table: &'static str) {
        self.faults.lock().unwrap().insert((op, table), Fault::NotFound);
    }

    pub(crate) fn heal(&self) {
        self.faults.lock().unwrap().clear();
    }

    /// Successful adds, puts and deletes so far.
    pub(crate) fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check<E: Entity>(&self, op: Op) -> Result<(), StoreError> {
        match self.faults.lock().unwrap().get(&(op, E::TABLE)) {
            None => Ok(()),
            Some(Fault::NotFound) => Err(StoreError::RecordNotExist),
            Some(Fault::Broken) => Err(StoreError::IndexInvalid(format!(
                "injected {op:?} failure on {}",
                E::TABLE
            ))),
        }
    }

    fn count_write(&self, result: Result<(), StoreError>) -> Result<(), StoreError> {
        if result.is_ok() {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        result
    }
}

#[async_trait]
impl DataStore for FaultyStore {
    async fn add<E: Entity>(&self, entity: &mut E) -> Result<(), StoreError> {
        self.check::<E>(Op::Add)?;
        let result = self.inner.add(entity).await;
        self.count_write(result)
    }

    async fn put<E: Entity>(&self, entity: &mut E) -> Result<(), StoreError> {
        self.check::<E>(Op::Put)?;
        let result = self.inner.put(entity).await;
        self.count_write(result)
    }

    async fn get<E: Entity>(&self, entity: &mut E) -> Result<(), StoreError> {
        self.check::<E>(Op::Get)?;
        self.inner.get(entity).await
    }

    async fn delete<E: Entity>(&self, entity: &E) -> Result<(), StoreError> {
        self.check::<E>(Op::Delete)?;
        let result = self.inner.delete(entity).await;
        self.count_write(result)
    }

    async fn is_exist<E: Entity>(&self, entity: &E) -> Result<bool, StoreError> {
        self.check::<E>(Op::Get)?;
        self.inner.is_exist(entity).await
    }

    async fn list<E: Entity>(
        &self,
        template: &E,
        options: Option<&ListOptions>,
    ) -> Result<Vec<E>, StoreError> {
        self.check::<E>(Op::List)?;
        self.inner.list(template, options).await
    }

    async fn count<E: Entity>(
        &self,
        template: &E,
        filter: Option<&FilterOptions>,
    ) -> Result<u64, StoreError> {
        self.check::<E>(Op::List)?;
        self.inner.count(template, filter).await
    }
}

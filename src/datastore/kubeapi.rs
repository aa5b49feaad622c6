/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/datastore/kubeapi.rs
*
* A `DataStore` backed by Kubernetes ConfigMaps, so the operator needs no
* database beyond the cluster it already talks to.
*
* Layout of a record:
* - One ConfigMap per record, named `<short-table>-<primary-key>` with
*   underscores turned into dashes, in the datastore namespace.
* - Labels: `table`, `primaryKey` and every non-empty index field of the entity.
*   Listing is a label-selector query over these.
* - The JSON document of the entity lives under `binaryData.data`.
*
* Fuzzy queries, sorting and paging cannot be expressed as a label selector;
* they are applied in process after the selector query.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::{
    apply_list_options, ensure_primary_key, DataStore, Entity, FilterOptions, ListOptions,
};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
use k8s_openapi::ByteString;
use kube::{
    api::{Api, DeleteParams, ListParams, ObjectMeta, PostParams},
    Client,
};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info};

const LABEL_TABLE: &str = "table";
const LABEL_PRIMARY_KEY: &str = "primaryKey";
const DATA_KEY: &str = "data";

#[derive(Clone)]
pub struct ConfigMapStore {
    api: Api<ConfigMap>,
    namespace: String,
}

fn is_status(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == code)
}

fn record_name<E: Entity>(primary_key: &str) -> String {
    format!("{}-{}", E::SHORT_TABLE, primary_key).replace('_', "-")
}

fn record_labels<E: Entity>(entity: &E, primary_key: &str) -> BTreeMap<String, String> {
    let mut labels = entity.index();
    labels.insert(LABEL_TABLE.to_string(), E::TABLE.to_string());
    labels.insert(LABEL_PRIMARY_KEY.to_string(), primary_key.to_string());
    labels
}

/// Builds the label selector for a list call: table, template index, `in`
/// and `not exist` filters.
fn label_selector<E: Entity>(template: &E, filter: Option<&FilterOptions>) -> Result<String, StoreError> {
    let mut terms = vec![format!("{LABEL_TABLE}={}", E::TABLE)];
    terms.extend(template.index().into_iter().map(|(k, v)| format!("{k}={v}")));
    if let Some(filter) = filter {
        for f in &filter.in_filters {
            if f.values.is_empty() {
                return Err(StoreError::IndexInvalid(format!(
                    "'in' filter on '{}' has no values",
                    f.key
                )));
            }
            terms.push(format!("{} in ({})", f.key, f.values.join(",")));
        }
        terms.extend(filter.not_exist.iter().map(|f| format!("!{}", f.key)));
    }
    Ok(terms.join(","))
}

fn decode_document(cm: ConfigMap) -> Result<Value, StoreError> {
    let bytes = cm
        .binary_data
        .and_then(|mut d| d.remove(DATA_KEY))
        .map(|b| b.0)
        .unwrap_or_default();
    Ok(serde_json::from_slice(&bytes)?)
}

impl ConfigMapStore {
    /// Opens the store in `namespace`, creating the namespace if needed.
    pub async fn connect(client: Client, namespace: &str) -> Result<Self, StoreError> {
        let namespaces: Api<Namespace> = Api::all(client.clone());
        if namespaces.get_opt(namespace).await?.is_none() {
            let ns = Namespace {
                metadata: ObjectMeta {
                    name: Some(namespace.to_string()),
                    ..Default::default()
                },
                ..Default::default()
            };
            match namespaces.create(&PostParams::default(), &ns).await {
                Ok(_) => info!(namespace, "Created datastore namespace"),
                Err(e) if is_status(&e, 409) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(ConfigMapStore {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
        })
    }

    fn encode<E: Entity>(&self, entity: &E, primary_key: &str) -> Result<ConfigMap, StoreError> {
        let data = serde_json::to_vec(entity)?;
        Ok(ConfigMap {
            metadata: ObjectMeta {
                name: Some(record_name::<E>(primary_key)),
                namespace: Some(self.namespace.clone()),
                labels: Some(record_labels(entity, primary_key)),
                ..Default::default()
            },
            binary_data: Some(BTreeMap::from([(DATA_KEY.to_string(), ByteString(data))])),
            ..Default::default()
        })
    }

    async fn select<E: Entity>(
        &self,
        template: &E,
        filter: Option<&FilterOptions>,
    ) -> Result<Vec<Value>, StoreError> {
        let selector = label_selector(template, filter)?;
        debug!(table = E::TABLE, %selector, "Listing datastore records");
        let list = self.api.list(&ListParams::default().labels(&selector)).await?;
        list.items.into_iter().map(decode_document).collect()
    }
}

#[async_trait]
impl DataStore for ConfigMapStore {
    async fn add<E: Entity>(&self, entity: &mut E) -> Result<(), StoreError> {
        let key = ensure_primary_key(entity)?;
        let now = Utc::now();
        entity.set_create_time(now);
        entity.set_update_time(now);
        let cm = self.encode(&*entity, &key)?;
        match self.api.create(&PostParams::default(), &cm).await {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 409) => Err(StoreError::RecordExist),
            Err(e) => Err(e.into()),
        }
    }

    async fn put<E: Entity>(&self, entity: &mut E) -> Result<(), StoreError> {
        let key = ensure_primary_key(entity)?;
        let name = record_name::<E>(&key);
        let existing = self
            .api
            .get_opt(&name)
            .await?
            .ok_or(StoreError::RecordNotExist)?;

        entity.set_update_time(Utc::now());
        let mut cm = self.encode(&*entity, &key)?;
        cm.metadata.resource_version = existing.metadata.resource_version;
        match self.api.replace(&name, &PostParams::default(), &cm).await {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Err(StoreError::RecordNotExist),
            Err(e) => Err(e.into()),
        }
    }

    async fn get<E: Entity>(&self, entity: &mut E) -> Result<(), StoreError> {
        let key = ensure_primary_key(entity)?;
        let cm = self
            .api
            .get_opt(&record_name::<E>(&key))
            .await?
            .ok_or(StoreError::RecordNotExist)?;
        *entity = serde_json::from_value(decode_document(cm)?)?;
        Ok(())
    }

    async fn delete<E: Entity>(&self, entity: &E) -> Result<(), StoreError> {
        let key = ensure_primary_key(entity)?;
        match self
            .api
            .delete(&record_name::<E>(&key), &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Err(StoreError::RecordNotExist),
            Err(e) => Err(e.into()),
        }
    }

    async fn is_exist<E: Entity>(&self, entity: &E) -> Result<bool, StoreError> {
        let key = ensure_primary_key(entity)?;
        Ok(self.api.get_opt(&record_name::<E>(&key)).await?.is_some())
    }

    async fn list<E: Entity>(
        &self,
        template: &E,
        options: Option<&ListOptions>,
    ) -> Result<Vec<E>, StoreError> {
        let docs = self.select(template, options.map(|o| &o.filter)).await?;
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
        let docs = self.select(template, filter).await?;
        let options = filter.map(|f| ListOptions {
            filter: f.clone(),
            ..Default::default()
        });
        Ok(apply_list_options(docs, options.as_ref()).len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::{InQueryOption, NotExistQueryOption};
    use crate::model::{Application, ApplicationComponent};

    #[test]
    fn test_record_name_uses_short_table_and_dashes() {
        assert_eq!(record_name::<ApplicationComponent>("demo_x-web"), "app-cmp-demo-x-web");
        assert_eq!(record_name::<Application>("demo"), "app-demo");
    }

    #[test]
    fn test_record_labels_carry_table_key_and_index() {
        let comp = ApplicationComponent {
            app_primary_key: "demo".into(),
            name: "web".into(),
            ..Default::default()
        };
        let labels = record_labels(&comp, "demo-web");
        assert_eq!(labels["table"], "vela_application_component");
        assert_eq!(labels["primaryKey"], "demo-web");
        assert_eq!(labels["appPrimaryKey"], "demo");
        assert!(!labels.contains_key("type"));
    }

    #[test]
    fn test_label_selector_combines_filters() {
        let filter = FilterOptions {
            in_filters: vec![InQueryOption {
                key: "name".into(),
                values: vec!["a".into(), "b".into()],
            }],
            not_exist: vec![NotExistQueryOption {
                key: "envName".into(),
            }],
            ..Default::default()
        };
        let selector =
            label_selector(&ApplicationComponent::owned_by("demo"), Some(&filter)).unwrap();
        assert_eq!(
            selector,
            "table=vela_application_component,appPrimaryKey=demo,name in (a,b),!envName"
        );
    }

    #[test]
    fn test_label_selector_rejects_empty_in_filter() {
        let filter = FilterOptions {
            in_filters: vec![InQueryOption {
                key: "name".into(),
                values: vec![],
            }],
            ..Default::default()
        };
        let err = label_selector(&Application::default(), Some(&filter)).unwrap_err();
        assert!(matches!(err, StoreError::IndexInvalid(_)));
    }

    #[test]
    fn test_decode_document_reads_binary_data() {
        let cm = ConfigMap {
            binary_data: Some(BTreeMap::from([(
                "data".to_string(),
                ByteString(br#"{"name":"demo"}"#.to_vec()),
            )])),
            ..Default::default()
        };
        let doc = decode_document(cm).unwrap();
        assert_eq!(doc["name"], "demo");

        assert!(decode_document(ConfigMap::default()).is_err());
    }
}

/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/datastore/mod.rs
*
* The datastore contract the synchronisation engine is written against.
*
* Architecture:
* - `Entity` describes a record kind: its table, primary key, the label index
*   used for equality filtering, and the timestamps the store stamps on write.
* - `DataStore` is the async CRUD surface. Its methods are generic over the
*   entity kind, so every call site is bound to a concrete record type at
*   compile time instead of passing type-erased records around.
* - `ListOptions` carries filter/sort/page options. Fuzzy queries, sorting and
*   paging operate on the JSON document of a record and are implemented once,
*   in `apply_list_options`, for every driver.
*
* Drivers:
* - `memory::MemoryStore`: process-local, used by tests and the `memory` driver.
* - `kubeapi::ConfigMapStore`: one ConfigMap per record in a dedicated namespace.
*
* SPDX-License-Identifier: Apache-2.0
*/

pub mod kubeapi;
pub mod memory;

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub use kubeapi::ConfigMapStore;
pub use memory::MemoryStore;

/// A record kind persisted in the datastore.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Table name, used to partition records.
    const TABLE: &'static str;
    /// Short table name, used where record names have a length limit.
    const SHORT_TABLE: &'static str;

    fn primary_key(&self) -> String;

    /// Label fields used for filtering. Empty values are left out, so a
    /// template entity only filters on the fields it actually sets.
    fn index(&self) -> BTreeMap<String, String>;

    fn set_create_time(&mut self, time: DateTime<Utc>);
    fn set_update_time(&mut self, time: DateTime<Utc>);
}

/// Builds an index map from `(key, value)` pairs, skipping empty values.
pub(crate) fn index_of<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortOption {
    /// Top-level or dotted JSON path in the record document.
    pub key: String,
    pub order: SortOrder,
}

/// Substring match on a string field of the record document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FuzzyQueryOption {
    pub key: String,
    pub query: String,
}

/// The index label `key` must take one of `values`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InQueryOption {
    pub key: String,
    pub values: Vec<String>,
}

/// The index label `key` must be absent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotExistQueryOption {
    pub key: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterOptions {
    pub queries: Vec<FuzzyQueryOption>,
    pub in_filters: Vec<InQueryOption>,
    pub not_exist: Vec<NotExistQueryOption>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub filter: FilterOptions,
    pub sort_by: Vec<SortOption>,
    /// 1-based page number; paging is disabled unless both page fields are non-zero.
    pub page: usize,
    pub page_size: usize,
}

/// The datastore operations the engine consumes.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Inserts a new record. Fails with `RecordExist` if the key is taken.
    async fn add<E: Entity>(&self, entity: &mut E) -> Result<(), StoreError>;

    /// Replaces an existing record. Fails with `RecordNotExist` if absent.
    async fn put<E: Entity>(&self, entity: &mut E) -> Result<(), StoreError>;

    /// Loads the record addressed by `entity`'s primary key into `entity`.
    async fn get<E: Entity>(&self, entity: &mut E) -> Result<(), StoreError>;

    async fn delete<E: Entity>(&self, entity: &E) -> Result<(), StoreError>;

    async fn is_exist<E: Entity>(&self, entity: &E) -> Result<bool, StoreError>;

    /// Lists records of `template`'s kind whose index contains `template.index()`.
    async fn list<E: Entity>(
        &self,
        template: &E,
        options: Option<&ListOptions>,
    ) -> Result<Vec<E>, StoreError>;

    async fn count<E: Entity>(
        &self,
        template: &E,
        filter: Option<&FilterOptions>,
    ) -> Result<u64, StoreError>;
}

pub(crate) fn ensure_primary_key<E: Entity>(entity: &E) -> Result<String, StoreError> {
    let key = entity.primary_key();
    if key.is_empty() {
        return Err(StoreError::PrimaryKeyEmpty);
    }
    Ok(key)
}

/// True when `labels` satisfies the equality index of a template plus the
/// label-level filters (`in` and `not exist`).
pub(crate) fn matches_index(
    labels: &BTreeMap<String, String>,
    template: &BTreeMap<String, String>,
    filter: Option<&FilterOptions>,
) -> bool {
    if !template.iter().all(|(k, v)| labels.get(k) == Some(v)) {
        return false;
    }
    let Some(filter) = filter else {
        return true;
    };
    filter
        .in_filters
        .iter()
        .all(|f| labels.get(&f.key).is_some_and(|v| f.values.contains(v)))
        && filter.not_exist.iter().all(|f| !labels.contains_key(&f.key))
}

fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |v, segment| v.get(segment))
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => {
            match (
                DateTime::parse_from_rfc3339(x),
                DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(tx), Ok(ty)) => tx.cmp(&ty),
                _ => x.cmp(y),
            }
        }
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

/// Applies fuzzy queries, sorting and paging to already index-filtered
/// documents, in that order.
pub(crate) fn apply_list_options(mut docs: Vec<Value>, options: Option<&ListOptions>) -> Vec<Value> {
    let Some(options) = options else {
        return docs;
    };

    if !options.filter.queries.is_empty() {
        docs.retain(|doc| {
            options.filter.queries.iter().all(|q| {
                lookup(doc, &q.key)
                    .and_then(Value::as_str)
                    .is_some_and(|s| s.contains(&q.query))
            })
        });
    }

    if !options.sort_by.is_empty() {
        docs.sort_by(|a, b| {
            for op in &options.sort_by {
                let ord = compare_values(lookup(a, &op.key), lookup(b, &op.key));
                let ord = match op.order {
                    SortOrder::Ascending => ord,
                    SortOrder::Descending => ord.reverse(),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }

    if options.page > 0 && options.page_size > 0 {
        let skip = options.page_size * (options.page - 1);
        docs = docs.into_iter().skip(skip).take(options.page_size).collect();
    }
    docs
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn docs() -> Vec<Value> {
        vec![
            json!({"name": "b", "meta": {"rank": 2}, "createTime": "2025-01-02T00:00:00Z"}),
            json!({"name": "a", "meta": {"rank": 3}, "createTime": "2025-01-01T00:00:00Z"}),
            json!({"name": "c", "meta": {"rank": 1}, "createTime": "2025-01-03T00:00:00Z"}),
        ]
    }

    fn names(docs: &[Value]) -> Vec<&str> {
        docs.iter().map(|d| d["name"].as_str().unwrap()).collect()
    }

    #[test]
    fn test_sort_by_nested_number_descending() {
        let opts = ListOptions {
            sort_by: vec![SortOption {
                key: "meta.rank".into(),
                order: SortOrder::Descending,
            }],
            ..Default::default()
        };
        let out = apply_list_options(docs(), Some(&opts));
        assert_eq!(names(&out), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_sort_by_timestamp_then_page() {
        let opts = ListOptions {
            sort_by: vec![SortOption {
                key: "createTime".into(),
                order: SortOrder::Ascending,
            }],
            page: 2,
            page_size: 2,
            ..Default::default()
        };
        let out = apply_list_options(docs(), Some(&opts));
        assert_eq!(names(&out), vec!["c"]);
    }

    #[test]
    fn test_page_past_end_is_empty() {
        let opts = ListOptions {
            page: 5,
            page_size: 2,
            ..Default::default()
        };
        assert!(apply_list_options(docs(), Some(&opts)).is_empty());
    }

    #[test]
    fn test_fuzzy_query_filters_on_string_fields() {
        let opts = ListOptions {
            filter: FilterOptions {
                queries: vec![FuzzyQueryOption {
                    key: "createTime".into(),
                    query: "01-03".into(),
                }],
                ..Default::default()
            },
            ..Default::default()
        };
        let out = apply_list_options(docs(), Some(&opts));
        assert_eq!(names(&out), vec!["c"]);
    }

    #[test]
    fn test_matches_index_with_label_filters() {
        let labels = index_of([("appPrimaryKey", "demo"), ("name", "web")]);
        let template = index_of([("appPrimaryKey", "demo"), ("name", "")]);
        assert!(matches_index(&labels, &template, None));

        let filter = FilterOptions {
            in_filters: vec![InQueryOption {
                key: "name".into(),
                values: vec!["api".into(), "web".into()],
            }],
            not_exist: vec![NotExistQueryOption {
                key: "envName".into(),
            }],
            ..Default::default()
        };
        assert!(matches_index(&labels, &template, Some(&filter)));

        let other = index_of([("appPrimaryKey", "other")]);
        assert!(!matches_index(&labels, &other, None));

        let excluding = FilterOptions {
            not_exist: vec![NotExistQueryOption { key: "name".into() }],
            ..Default::default()
        };
        assert!(!matches_index(&labels, &template, Some(&excluding)));
    }
}

/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/sync/sot.rs
*
* Source-of-truth arbitration. Decides which side owns an application: the CR,
* the UX datastore, or neither (internal use). Only CR-owned applications are
* ever written by the engine, which is what keeps UX-originated applications
* from bouncing back into the datastore through their own CRs.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::crds::{self, ANNOTATION_APP_NAME, ANNOTATION_SOT_FROM_INNER};
use crate::datastore::DataStore;
use crate::model::{self, composed_app_name, SourceOfTruth};
use kube::ResourceExt;
use tracing::debug;

/// Classifies an Application by its annotations alone.
pub fn classify_from_cr(app: &crds::Application) -> SourceOfTruth {
    let annotations = app.annotations();
    if annotations.contains_key(ANNOTATION_SOT_FROM_INNER) {
        SourceOfTruth::FromInner
    } else if annotations.contains_key(ANNOTATION_APP_NAME) {
        SourceOfTruth::FromUX
    } else {
        SourceOfTruth::FromCR
    }
}

/// Returns the source of truth recorded on the persisted application, looked
/// up by composed key first and bare name second. Records synced from another
/// namespace are not consulted. Any lookup failure, or no matching record with
/// the label, yields `fallback`.
pub async fn classify_from_meta<S: DataStore>(
    store: &S,
    name: &str,
    namespace: &str,
    fallback: SourceOfTruth,
) -> SourceOfTruth {
    for key in [composed_app_name(name, namespace), name.to_string()] {
        let mut app = model::Application::named(key.as_str());
        match store.get(&mut app).await {
            Ok(()) if app.sync_namespace().is_some_and(|ns| ns != namespace) => {
                debug!(app = name, namespace, record = %key, "Record belongs to another namespace");
            }
            Ok(()) => return app.source_of_truth().unwrap_or(fallback),
            Err(error) if error.is_not_found() => {}
            Err(error) => {
                debug!(app = name, namespace, %error, "Falling back to CR source of truth");
                return fallback;
            }
        }
    }
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::{Entity, MemoryStore};
    use crate::model::{LABEL_SOURCE_OF_TRUTH, LABEL_SYNC_NAMESPACE};
    use crate::testing::{self, FaultyStore, Op};

    #[test]
    fn test_classify_from_cr_annotations() {
        let mut app = testing::application("demo", "default", 1);
        assert_eq!(classify_from_cr(&app), SourceOfTruth::FromCR);

        app.annotations_mut()
            .insert(ANNOTATION_APP_NAME.into(), "demo".into());
        assert_eq!(classify_from_cr(&app), SourceOfTruth::FromUX);

        app.annotations_mut()
            .insert(ANNOTATION_SOT_FROM_INNER.into(), "true".into());
        assert_eq!(classify_from_cr(&app), SourceOfTruth::FromInner);
    }

    async fn persist<S: DataStore>(store: &S, name: &str, sot: Option<&str>) {
        let mut app = model::Application::named(name);
        if let Some(sot) = sot {
            app.labels.insert(LABEL_SOURCE_OF_TRUTH.into(), sot.into());
        }
        store.add(&mut app).await.unwrap();
    }

    #[tokio::test]
    async fn test_meta_label_overrides_fallback() {
        let store = MemoryStore::new();
        persist(&store, "demo", Some("from-UX")).await;
        let sot = classify_from_meta(&store, "demo", "ns1", SourceOfTruth::FromCR).await;
        assert_eq!(sot, SourceOfTruth::FromUX);
    }

    #[tokio::test]
    async fn test_composed_key_is_consulted_first() {
        let store = MemoryStore::new();
        persist(&store, "demo", Some("from-UX")).await;
        persist(&store, "demo-ns2", Some("from-CR")).await;
        let sot = classify_from_meta(&store, "demo", "ns2", SourceOfTruth::FromInner).await;
        assert_eq!(sot, SourceOfTruth::FromCR);
    }

    #[tokio::test]
    async fn test_missing_record_or_label_uses_fallback() {
        let store = MemoryStore::new();
        let sot = classify_from_meta(&store, "ghost", "ns1", SourceOfTruth::FromCR).await;
        assert_eq!(sot, SourceOfTruth::FromCR);

        persist(&store, "plain", None).await;
        let sot = classify_from_meta(&store, "plain", "ns1", SourceOfTruth::FromInner).await;
        assert_eq!(sot, SourceOfTruth::FromInner);
    }

    #[tokio::test]
    async fn test_store_errors_degrade_to_fallback() {
        let store = FaultyStore::new();
        persist(&store, "demo", Some("from-UX")).await;
        store.fail(Op::Get, model::Application::TABLE);
        let sot = classify_from_meta(&store, "demo", "ns1", SourceOfTruth::FromCR).await;
        assert_eq!(sot, SourceOfTruth::FromCR);
    }

    #[tokio::test]
    async fn test_record_from_other_namespace_is_ignored() {
        let store = MemoryStore::new();
        let mut other = model::Application::named("example");
        other.labels.insert(LABEL_SOURCE_OF_TRUTH.into(), "from-CR".into());
        other.labels.insert(LABEL_SYNC_NAMESPACE.into(), "ns1".into());
        store.add(&mut other).await.unwrap();

        let sot = classify_from_meta(&store, "example", "ns2", SourceOfTruth::FromInner).await;
        assert_eq!(sot, SourceOfTruth::FromInner);
        let sot = classify_from_meta(&store, "example", "ns1", SourceOfTruth::FromInner).await;
        assert_eq!(sot, SourceOfTruth::FromCR);
    }
}

/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/sync/mod.rs
*
* The CR-to-datastore synchronisation engine.
*
* - `sot`: source-of-truth classification.
* - `convert`: Application CR to datastore records.
* - `store`: name-set diff for children and upserts for everything else.
* - `cache`: generation cache.
* - `cr2ux`: the reconciler tying them together.
*
* SPDX-License-Identifier: Apache-2.0
*/

pub mod cache;
pub mod convert;
pub mod cr2ux;
pub mod sot;
pub mod store;

pub use cache::{CacheEntry, GenerationCache};
pub use cr2ux::Reconciler;

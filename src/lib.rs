/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/lib.rs
*
* Library root of the UX sync operator. It keeps the datastore behind the
* KubeVela UX in step with the Application custom resources of a cluster.
*
* SPDX-License-Identifier: Apache-2.0
*/

pub mod cluster;
pub mod config;
pub mod controllers;
pub mod crds;
pub mod datastore;
pub mod error;
pub mod model;
pub mod sync;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;

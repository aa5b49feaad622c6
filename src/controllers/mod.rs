/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/controllers/mod.rs
*
* Event sources that drive the synchronisation engine.
*
* SPDX-License-Identifier: Apache-2.0
*/

pub mod application_watcher;

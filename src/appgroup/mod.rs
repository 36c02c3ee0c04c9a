// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
pub mod api;
pub mod wrapper;

pub use api::{AppGroupApi, PersistOutcome};
pub use wrapper::AppGroupWrapper;

// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Reconciliation that runs on a schedule rather than per event.

pub mod helm;

pub use helm::{release_to_appgroup, HelmWorkloadSync};

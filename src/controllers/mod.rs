// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Handlers that turn cached cluster state into AppGroups and derived objects.

pub mod app_controller;
pub mod cleanup;
pub mod ingress;
pub mod lifecycle;
pub mod services;
pub mod utils;
pub mod workload_manager;

pub use app_controller::AppController;
pub use ingress::IngressHooks;
pub use workload_manager::WorkloadManager;

// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes plumbing: CRD discovery, watch caches and untyped custom resources.

pub mod cache;
pub mod crd;
pub mod dynamic;

pub use cache::{caches, CacheWriters, ResourceCaches, ResourceChange};
pub use crd::wait_for_appgroup_crd;

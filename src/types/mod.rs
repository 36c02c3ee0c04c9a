// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
pub mod appgroup;
pub mod event;
pub mod workload;

pub use appgroup::{
    AppGroup, AppGroupItemStatus, AppGroupSpec, AppGroupStatus, DeployItem, DeployStatus,
    GroupType, HelmConfig, ResourceInfo,
};
pub use event::{object_id_of, EventType, K8sResourceEvent};
pub use workload::{Workload, WorkloadRef, WorkloadStatus};

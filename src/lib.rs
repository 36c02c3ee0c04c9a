// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
pub mod appgroup;
pub mod config;
pub mod constants;
pub mod controllers;
pub mod error;
pub mod helm;
pub mod kubernetes;
pub mod metrics;
pub mod notify;
pub mod queue;
pub mod static_assets;
pub mod sync;
pub mod types;

#[cfg(test)]
pub mod test_utils;

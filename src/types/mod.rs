// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Custom resource definitions and the types shared by their status.

pub mod condition;
pub mod duration;
pub mod image_policy;
pub mod image_repository;

pub use condition::Condition;
pub use image_policy::{ImagePolicy, ImagePolicySpec, ImagePolicyStatus, PolicyChoice};
pub use image_repository::{
    FailedScan, ImageRepository, ImageRepositorySpec, ImageRepositoryStatus, ScanResult,
};

// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::Result;
use kube::CustomResourceExt;

use image_reflector::types::{ImagePolicy, ImageRepository};

/// Print the CustomResourceDefinitions as a multi-document YAML stream
fn main() -> Result<()> {
    print!("{}", serde_yaml::to_string(&ImageRepository::crd())?);
    println!("---");
    print!("{}", serde_yaml::to_string(&ImagePolicy::crd())?);
    Ok(())
}

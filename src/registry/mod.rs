// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Image reference handling, registry credentials and tag scanning.

pub mod credentials;
pub mod reference;
pub mod scanner;

pub use credentials::{credentials_from_secret, Credentials, CredentialsError};
pub use reference::{canonicalize, ImageName, ReferenceError};
pub use scanner::{scan, scan_image, OciScanner, RegistryScanner, ScanError, ScanOutcome};

// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Durable tag store shared by the repository and policy reconcilers.
//!
//! Keys are canonical image names, values are JSON-encoded [`TagEntry`] records.
//! Every `put` replaces the whole entry inside one committed write transaction,
//! so readers observe either the previous or the new tag set, never a mix.

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Tag sets keyed by canonical image name.
const TAGS: TableDefinition<&str, &[u8]> = TableDefinition::new("tags");

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] redb::Error),

    #[error("failed to create storage directory: {0}")]
    Directory(#[from] std::io::Error),

    #[error("corrupt entry for '{key}': {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode entry for '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

fn io(err: impl Into<redb::Error>) -> StoreError {
    StoreError::Io(err.into())
}

/// Most recently observed tags of one repository
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TagEntry {
    pub tags: Vec<String>,
    pub scan_time: DateTime<Utc>,
}

/// Cloneable handle to the embedded tag database
#[derive(Clone)]
pub struct TagStore {
    db: Arc<Database>,
}

impl TagStore {
    /// Open (or create) the store at `path`
    #[instrument]
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(io)?;

        // Create the table up front so reads on a fresh store see "not found".
        let txn = db.begin_write().map_err(io)?;
        txn.open_table(TAGS).map_err(io)?;
        txn.commit().map_err(io)?;

        info!("Tag store opened at {}", path.display());
        Ok(Self { db: Arc::new(db) })
    }

    /// Atomically replace the entry for `canonical_name`
    pub fn put(
        &self,
        canonical_name: &str,
        tags: &[String],
        scan_time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let entry = TagEntry {
            tags: tags.to_vec(),
            scan_time,
        };
        let bytes = serde_json::to_vec(&entry).map_err(|source| StoreError::Encode {
            key: canonical_name.to_string(),
            source,
        })?;

        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = txn.open_table(TAGS).map_err(io)?;
            table.insert(canonical_name, bytes.as_slice()).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        debug!("Stored {} tags for {}", tags.len(), canonical_name);
        Ok(())
    }

    /// Entry for `canonical_name`, or `None` if it was never written
    pub fn get(&self, canonical_name: &str) -> Result<Option<TagEntry>, StoreError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(TAGS).map_err(io)?;
        let Some(value) = table.get(canonical_name).map_err(io)? else {
            return Ok(None);
        };

        serde_json::from_slice(value.value())
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                key: canonical_name.to_string(),
                source,
            })
    }

    /// Release this handle. Writes are durable once `put` returns; the file is
    /// closed when the last clone is dropped.
    pub fn close(self) -> Result<(), StoreError> {
        match Arc::try_unwrap(self.db) {
            Ok(db) => {
                drop(db);
                info!("Tag store closed");
            }
            Err(_) => debug!("Tag store handle released, other handles still open"),
        }
        Ok(())
    }
}

//! File-level metadata records.
//!
//! One record per stored file, keyed by stored name, persisted as a single
//! JSON object in `metadata.json` under the storage root. The whole record
//! set is read-modify-written on every change; an in-process mutex
//! serialises writers. Concurrent processes writing the same file would race
//! (last write wins) — single-writer operation is an assumption of this
//! store, not something it defends against.
//!
//! Missing records are defaulted at read time (original name = stored name,
//! group = [`DEFAULT_GROUP`]), never an error.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Error, Result};

/// Group assigned to files that were never explicitly grouped.
pub const DEFAULT_GROUP: &str = "ungrouped";

/// Name of the record-set file inside the storage root.
pub const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub original_filename: String,
    #[serde(default = "default_group")]
    pub group: String,
}

fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}

pub struct MetadataStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl MetadataStore {
    pub fn new(storage_root: &Path) -> Self {
        Self {
            path: storage_root.join(METADATA_FILE),
            lock: Mutex::new(()),
        }
    }

    /// Read the full record set. An absent file is an empty set.
    pub fn load(&self) -> Result<BTreeMap<String, MetadataRecord>> {
        let _guard = self.lock.lock().unwrap();
        self.read_records()
    }

    /// Persist the full record set, replacing whatever was there.
    pub fn save(&self, records: &BTreeMap<String, MetadataRecord>) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        self.write_records(records)
    }

    pub fn upsert(&self, stored_name: &str, original_name: &str, group: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        let mut records = self.read_records()?;
        records.insert(
            stored_name.to_string(),
            MetadataRecord {
                original_filename: original_name.to_string(),
                group: group.to_string(),
            },
        );
        self.write_records(&records)
    }

    /// Move a record to a new key, carrying its fields over. A missing old
    /// key is tolerated: the read path defaults absent records anyway.
    pub fn rename_key(&self, old: &str, new: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        let mut records = self.read_records()?;
        if let Some(record) = records.remove(old) {
            records.insert(new.to_string(), record);
        }
        self.write_records(&records)
    }

    pub fn remove(&self, stored_name: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        let mut records = self.read_records()?;
        records.remove(stored_name);
        self.write_records(&records)
    }

    pub fn set_group(&self, stored_name: &str, group: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        let mut records = self.read_records()?;
        records
            .entry(stored_name.to_string())
            .or_insert_with(|| MetadataRecord {
                original_filename: stored_name.to_string(),
                group: default_group(),
            })
            .group = group.to_string();
        self.write_records(&records)
    }

    /// Record for `stored_name`, defaulted when absent.
    pub fn get(&self, stored_name: &str) -> Result<MetadataRecord> {
        Ok(self
            .load()?
            .remove(stored_name)
            .unwrap_or_else(|| MetadataRecord {
                original_filename: stored_name.to_string(),
                group: default_group(),
            }))
    }

    pub fn get_group(&self, stored_name: &str) -> Result<String> {
        Ok(self.get(stored_name)?.group)
    }

    /// Aggregate stored names by group.
    pub fn groups(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, record) in self.load()? {
            groups.entry(record.group).or_default().push(name);
        }
        Ok(groups)
    }

    fn read_records(&self) -> Result<BTreeMap<String, MetadataRecord>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "malformed metadata file {}: {e}",
                self.path.display()
            ))
        })
    }

    fn write_records(&self, records: &BTreeMap<String, MetadataRecord>) -> Result<()> {
        let content = serde_json::to_string_pretty(records)
            .map_err(|e| Error::Config(format!("failed to encode metadata: {e}")))?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

//! Physical storage of uploaded documents.
//!
//! Files land under a single storage root with collision-free names: a second
//! `report.pdf` is stored as `report_1.pdf`, a third as `report_2.pdf`, and
//! so on. The store owns only the bytes; the file-level record lives in
//! [`crate::metadata`] and the derived chunks in [`crate::index`].

use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Upload allow-list, matched case-insensitively against the file extension.
pub const ALLOWED_EXTENSIONS: [&str; 3] = ["docx", "xlsx", "pdf"];

/// Bookkeeping files that live in the storage root but are never listed as
/// documents: the metadata record set and the held API credential. The
/// vector index lives in its own subdirectory and is skipped by the
/// regular-files-only listing.
pub const RESERVED_NAMES: [&str; 2] = ["metadata.json", "api.key"];

/// A physical file in the store, before metadata enrichment.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_of(name).is_file()
    }

    /// Store `bytes` under a collision-free variant of `original_name` and
    /// return the resolved name. Rejects names outside the extension
    /// allow-list before touching the filesystem.
    pub fn save(&self, original_name: &str, bytes: &[u8]) -> Result<String> {
        check_name(original_name)?;
        let ext = extension_of(original_name)
            .ok_or_else(|| Error::Validation(format!("file has no extension: {original_name}")))?;
        if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(Error::Validation(format!(
                "unsupported file type '.{ext}': only docx, xlsx and pdf are accepted"
            )));
        }

        let stored_name = self.resolve_collision(original_name);
        std::fs::write(self.path_of(&stored_name), bytes)?;
        Ok(stored_name)
    }

    /// Append `_1`, `_2`, ... before the extension until the name is free.
    fn resolve_collision(&self, name: &str) -> String {
        if !self.path_of(name).exists() {
            return name.to_string();
        }
        let (stem, suffix) = split_name(name);
        let mut counter = 1;
        loop {
            let candidate = format!("{stem}_{counter}{suffix}");
            if !self.path_of(&candidate).exists() {
                return candidate;
            }
            counter += 1;
        }
    }

    /// Regular files only, reserved bookkeeping names excluded, newest first.
    pub fn list(&self) -> Result<Vec<FileEntry>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if RESERVED_NAMES.contains(&name.as_str()) {
                continue;
            }
            let meta = entry.metadata()?;
            let created = meta.created().or_else(|_| meta.modified())?;
            entries.push(FileEntry {
                name,
                size: meta.len(),
                created_at: DateTime::<Utc>::from(created),
            });
        }
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        check_name(old)?;
        check_name(new)?;
        if !self.exists(old) {
            return Err(Error::NotFound(format!("file not found: {old}")));
        }
        if self.path_of(new).exists() {
            return Err(Error::Conflict(format!("target name already exists: {new}")));
        }
        std::fs::rename(self.path_of(old), self.path_of(new))?;
        Ok(())
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        check_name(name)?;
        if !self.exists(name) {
            return Err(Error::NotFound(format!("file not found: {name}")));
        }
        std::fs::remove_file(self.path_of(name))?;
        Ok(())
    }
}

/// Lowercased extension, if any.
pub fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Split into stem and suffix including the dot, so `report.pdf` becomes
/// `("report", ".pdf")`.
fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) => name.split_at(pos),
        None => (name, ""),
    }
}

/// Names must stay inside the storage root: a single normal path component,
/// no separators, no `..`.
fn check_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(Error::Validation(format!("invalid file name: {name}"))),
    }
}

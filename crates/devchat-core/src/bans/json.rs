//! Ban list persisted as a JSON array of identity strings.

#![allow(clippy::disallowed_types, reason = "Ban list is locked for synchronous lookups only")]

use std::{
    collections::BTreeSet,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use serde::Serialize;

use super::BanStore;
use crate::error::BanStoreError;

/// File-backed ban list.
///
/// The file holds a pretty-printed JSON array. A missing file at load time
/// is an empty list. Saves go through a temp file in the same directory and
/// an atomic rename, so a crash mid-save leaves the old list intact.
#[derive(Debug, Clone)]
pub struct JsonBanStore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    path: PathBuf,
    bans: Mutex<Vec<String>>,
}

impl JsonBanStore {
    /// Load the ban list at `path`, treating a missing file as empty.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, BanStoreError> {
        let path = path.into();
        let bans = match fs::read(&path) {
            Ok(bytes) => parse(&bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(path = %path.display(), count = bans.len(), "loaded ban list");
        Ok(Self { inner: Arc::new(Inner { path, bans: Mutex::new(bans) }) })
    }

    /// Re-read the file, replacing the in-memory list.
    ///
    /// Unlike [`JsonBanStore::load`], the file must exist. On error the
    /// current list is kept.
    pub fn reload(&self) -> Result<(), BanStoreError> {
        let bans = parse(&fs::read(&self.inner.path)?)?;
        *self.lock() = bans;
        Ok(())
    }

    /// Banned identities in file order.
    pub fn ids(&self) -> Vec<String> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.inner.bans.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BanStore for JsonBanStore {
    fn contains(&self, identity: &str) -> bool {
        self.lock().iter().any(|id| id == identity)
    }

    fn save(&self) -> Result<(), BanStoreError> {
        let bytes = encode(&self.lock())?;
        atomic_write(&self.inner.path, &bytes)?;
        tracing::debug!(path = %self.inner.path.display(), "saved ban list");
        Ok(())
    }
}

fn parse(bytes: &[u8]) -> Result<Vec<String>, BanStoreError> {
    let ids: Vec<String> = serde_json::from_slice(bytes)?;
    // Keep file order but drop repeats.
    let mut seen = BTreeSet::new();
    Ok(ids.into_iter().filter(|id| seen.insert(id.clone())).collect())
}

fn encode(ids: &[String]) -> Result<Vec<u8>, BanStoreError> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"   ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    ids.serialize(&mut serializer)?;
    out.push(b'\n');
    Ok(out)
}

fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

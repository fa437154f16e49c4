//! Persistence of [`ZarrArchive`] records
//!
//! Records carry a `version` that every successful
//! [`compare_and_swap()`][ArchiveRepository::compare_and_swap] increments, so
//! that concurrent read-modify-write cycles on the same archive cannot
//! silently overwrite each other.
use crate::archive::ZarrArchive;
use crate::errors::RepositoryError;
use log::trace;
use std::collections::BTreeMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

pub trait ArchiveRepository: fmt::Debug + Send + Sync {
    /// Store a new record.  Fails with [`RepositoryError::AlreadyExists`] if
    /// a record with the same ID is present.
    fn insert(&self, archive: &ZarrArchive) -> Result<(), RepositoryError>;

    /// Fetch the record with the given ID
    fn get(&self, id: &str) -> Result<ZarrArchive, RepositoryError>;

    /// Replace the stored record with `archive` if the stored record's
    /// version equals `archive.version`, and return the record as stored
    /// (with its version incremented).  Fails with
    /// [`RepositoryError::VersionConflict`] if the record has changed in the
    /// meantime.
    fn compare_and_swap(&self, archive: ZarrArchive) -> Result<ZarrArchive, RepositoryError>;

    fn remove(&self, id: &str) -> Result<(), RepositoryError>;

    /// Return the IDs of all stored records in sorted order
    fn ids(&self) -> Result<Vec<String>, RepositoryError>;
}

/// An [`ArchiveRepository`] that keeps records in memory
#[derive(Debug, Default)]
pub struct MemoryRepository {
    records: Mutex<BTreeMap<String, ZarrArchive>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        MemoryRepository::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, ZarrArchive>> {
        self.records
            .lock()
            .expect("Mutex should not have been poisoned")
    }
}

impl ArchiveRepository for MemoryRepository {
    fn insert(&self, archive: &ZarrArchive) -> Result<(), RepositoryError> {
        let mut records = self.lock();
        if records.contains_key(&archive.id) {
            return Err(RepositoryError::AlreadyExists {
                id: archive.id.clone(),
            });
        }
        records.insert(archive.id.clone(), archive.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<ZarrArchive, RepositoryError> {
        self.lock()
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound { id: id.to_owned() })
    }

    fn compare_and_swap(&self, mut archive: ZarrArchive) -> Result<ZarrArchive, RepositoryError> {
        let mut records = self.lock();
        let Some(current) = records.get_mut(&archive.id) else {
            return Err(RepositoryError::NotFound { id: archive.id });
        };
        if current.version != archive.version {
            return Err(RepositoryError::VersionConflict { id: archive.id });
        }
        archive.version += 1;
        *current = archive.clone();
        Ok(archive)
    }

    fn remove(&self, id: &str) -> Result<(), RepositoryError> {
        match self.lock().remove(id) {
            Some(_) => Ok(()),
            None => Err(RepositoryError::NotFound { id: id.to_owned() }),
        }
    }

    fn ids(&self) -> Result<Vec<String>, RepositoryError> {
        Ok(self.lock().keys().cloned().collect())
    }
}

/// An [`ArchiveRepository`] that stores each record as a JSON file named
/// `{id}.json` in a directory.
///
/// Compare-and-swap is serialized within the process only; two processes
/// sharing a directory can still race.  Each write goes to a temporary file
/// that is then renamed over the record.
#[derive(Debug)]
pub struct JsonFileRepository {
    dir: PathBuf,
    guard: Mutex<()>,
}

impl JsonFileRepository {
    /// Open (creating if necessary) a repository in `dir`
    pub fn open<P: Into<PathBuf>>(dir: P) -> Result<Self, RepositoryError> {
        let dir = dir.into();
        fs_err::create_dir_all(&dir)?;
        Ok(JsonFileRepository {
            dir,
            guard: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.guard
            .lock()
            .expect("Mutex should not have been poisoned")
    }

    fn read(&self, id: &str) -> Result<Option<ZarrArchive>, RepositoryError> {
        let path = self.path_for(id);
        let src = match fs_err::read_to_string(&path) {
            Ok(src) => src,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&src)
            .map(Some)
            .map_err(|e| RepositoryError::serde(&path, e))
    }

    fn write(&self, archive: &ZarrArchive) -> Result<(), RepositoryError> {
        let path = self.path_for(&archive.id);
        let tmp = self.dir.join(format!(".{}.json.tmp", archive.id));
        let mut src =
            serde_json::to_string_pretty(archive).map_err(|e| RepositoryError::serde(&path, e))?;
        src.push('\n');
        trace!("Writing archive record to {}", path.display());
        fs_err::write(&tmp, src)?;
        fs_err::rename(&tmp, &path)?;
        Ok(())
    }
}

impl ArchiveRepository for JsonFileRepository {
    fn insert(&self, archive: &ZarrArchive) -> Result<(), RepositoryError> {
        let _guard = self.lock();
        if self.read(&archive.id)?.is_some() {
            return Err(RepositoryError::AlreadyExists {
                id: archive.id.clone(),
            });
        }
        self.write(archive)
    }

    fn get(&self, id: &str) -> Result<ZarrArchive, RepositoryError> {
        let _guard = self.lock();
        self.read(id)?
            .ok_or_else(|| RepositoryError::NotFound { id: id.to_owned() })
    }

    fn compare_and_swap(&self, mut archive: ZarrArchive) -> Result<ZarrArchive, RepositoryError> {
        let _guard = self.lock();
        let Some(current) = self.read(&archive.id)? else {
            return Err(RepositoryError::NotFound { id: archive.id });
        };
        if current.version != archive.version {
            return Err(RepositoryError::VersionConflict { id: archive.id });
        }
        archive.version += 1;
        self.write(&archive)?;
        Ok(archive)
    }

    fn remove(&self, id: &str) -> Result<(), RepositoryError> {
        let _guard = self.lock();
        match fs_err::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(RepositoryError::NotFound { id: id.to_owned() })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn ids(&self) -> Result<Vec<String>, RepositoryError> {
        let _guard = self.lock();
        let mut ids = Vec::new();
        for entry in fs_err::read_dir(&self.dir)? {
            let name = entry?.file_name();
            if let Some(id) = name
                .to_str()
                .filter(|n| !n.starts_with('.'))
                .and_then(|n| n.strip_suffix(".json"))
            {
                ids.push(id.to_owned());
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }
}

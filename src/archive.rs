//! Zarr archive records and the upload-session lifecycle around the tree
//! updater
use crate::checksum::EMPTY_CHECKSUM;
use crate::config::Config;
use crate::errors::{
    ArchiveError, CommitError, EntryNameError, ParseVisibilityError, RepositoryError,
};
use crate::manifest::ChecksumFileStore;
use crate::repository::ArchiveRepository;
use crate::store::ObjectStore;
use crate::updater::{CommitSummary, FileChange, TreeUpdater};
use crate::zarr::{chunk_key, is_path_name, EntryPath};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use termtree::Tree;

/// How many times a state transition is retried after losing a
/// compare-and-swap race before giving up
const TRANSITION_ATTEMPTS: usize = 5;

/// Who may read an archive.  The checksum machinery never looks at this.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Embargoed,
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visibility::Public => f.write_str("public"),
            Visibility::Embargoed => f.write_str("embargoed"),
        }
    }
}

impl FromStr for Visibility {
    type Err = ParseVisibilityError;

    fn from_str(s: &str) -> Result<Visibility, ParseVisibilityError> {
        match s {
            "public" => Ok(Visibility::Public),
            "embargoed" => Ok(Visibility::Embargoed),
            _ => Err(ParseVisibilityError(s.to_owned())),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveStatus {
    /// Created, but nothing has been committed or ingested yet
    Pending,
    /// A full rebuild of the manifests is running
    Ingesting,
    Complete,
    /// A commit was interrupted part-way through writing; the manifests must
    /// be rebuilt with [`ArchiveManager::ingest()`]
    NeedsRepair,
}

/// A file declared at the start of an upload session
#[derive(Clone, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
pub struct UploadFile {
    pub path: EntryPath,
    /// The etag the client expects object storage to report once the file
    /// is written
    pub etag: String,
}

/// Where a client should write one declared file
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct UploadTicket {
    pub path: EntryPath,
    pub upload_url: String,
}

/// The upload session state of an archive.  At most one session may be
/// active at a time.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    /// Files have been declared and are being written by the client
    Uploading { files: Vec<UploadFile> },
    /// The manifest tree is being rewritten.  For an upload, `files` are the
    /// declared files, restored to [`SessionState::Uploading`] if the commit
    /// fails validation.
    Completing { files: Vec<UploadFile> },
}

/// One chunked dataset and the checksum of its current contents
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct ZarrArchive {
    pub id: String,
    pub visibility: Visibility,
    pub status: ArchiveStatus,
    /// Digest of the root manifest
    pub checksum: String,
    pub size: u64,
    pub file_count: u64,
    pub session: SessionState,
    /// Incremented by every stored update
    pub version: u64,
}

impl ZarrArchive {
    pub fn new<S: Into<String>>(id: S, visibility: Visibility) -> ZarrArchive {
        ZarrArchive {
            id: id.into(),
            visibility,
            status: ArchiveStatus::Pending,
            checksum: String::from(EMPTY_CHECKSUM),
            size: 0,
            file_count: 0,
            session: SessionState::Idle,
            version: 0,
        }
    }

    pub fn upload_in_progress(&self) -> bool {
        matches!(self.session, SessionState::Uploading { .. })
    }

    pub fn summary(&self) -> ArchiveSummary {
        ArchiveSummary {
            checksum: self.checksum.clone(),
            size: self.size,
            file_count: self.file_count,
        }
    }

    fn apply(&mut self, summary: &CommitSummary) {
        self.checksum.clone_from(&summary.checksum);
        self.size = summary.size;
        self.file_count = summary.file_count;
    }
}

/// The aggregate checksum, size, and file count of an archive
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ArchiveSummary {
    pub checksum: String,
    pub size: u64,
    pub file_count: u64,
}

/// Coordinates upload sessions, commits, and ingestion for the archives in a
/// repository whose files live in one object store
#[derive(Debug)]
pub struct ArchiveManager<S, R> {
    store: S,
    repo: R,
    config: Config,
}

impl<S: ObjectStore, R: ArchiveRepository> ArchiveManager<S, R> {
    pub fn new(store: S, repo: R, config: Config) -> Self {
        ArchiveManager {
            store,
            repo,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn create_archive(
        &self,
        id: &str,
        visibility: Visibility,
    ) -> Result<ZarrArchive, ArchiveError> {
        if !is_path_name(id) {
            return Err(EntryNameError(id.to_owned()).into());
        }
        let archive = ZarrArchive::new(id, visibility);
        self.repo.insert(&archive)?;
        info!("Created {visibility} Zarr archive {id:?}");
        Ok(archive)
    }

    pub fn get_archive(&self, id: &str) -> Result<ZarrArchive, ArchiveError> {
        Ok(self.repo.get(id)?)
    }

    /// Open an upload session for `files` and return a write URL for each.
    ///
    /// # Errors
    ///
    /// Fails with [`ArchiveError::SimultaneousUpload`] if the archive already
    /// has a session in progress.
    pub fn start_upload(
        &self,
        id: &str,
        files: Vec<UploadFile>,
    ) -> Result<Vec<UploadTicket>, ArchiveError> {
        if files.len() > self.config.max_upload_files {
            return Err(ArchiveError::TooManyFiles {
                count: files.len(),
                max: self.config.max_upload_files,
            });
        }
        let mut seen = HashSet::new();
        for f in &files {
            if !seen.insert(&f.path) {
                return Err(ArchiveError::DuplicateUploadPath {
                    path: f.path.clone(),
                });
            }
        }
        let prefix = self.config.archive_staging_prefix(id);
        let tickets = files
            .iter()
            .map(|f| {
                Ok(UploadTicket {
                    path: f.path.clone(),
                    upload_url: self.store.presign_put(&chunk_key(&prefix, &f.path))?,
                })
            })
            .collect::<Result<Vec<_>, ArchiveError>>()?;
        let count = files.len();
        self.transition(id, |archive| {
            if archive.session != SessionState::Idle {
                return Err(ArchiveError::SimultaneousUpload { id: id.to_owned() });
            }
            archive.session = SessionState::Uploading {
                files: files.clone(),
            };
            Ok(())
        })?;
        info!("Started upload of {count} file(s) to Zarr archive {id:?}");
        Ok(tickets)
    }

    /// Abandon the active upload session, deleting every staged object
    /// written for it.  Committed chunks are never touched.
    pub fn cancel_upload(&self, id: &str) -> Result<ZarrArchive, ArchiveError> {
        let (archive, files) = self.transition(id, |archive| match &archive.session {
            SessionState::Uploading { files } => {
                let files = files.clone();
                archive.session = SessionState::Idle;
                Ok(files)
            }
            SessionState::Idle => Err(ArchiveError::NoUploadInProgress { id: id.to_owned() }),
            SessionState::Completing { .. } => {
                Err(ArchiveError::UploadInProgress { id: id.to_owned() })
            }
        })?;
        let prefix = self.config.archive_staging_prefix(id);
        for f in &files {
            self.store.delete_object(&chunk_key(&prefix, &f.path))?;
        }
        info!(
            "Cancelled upload to Zarr archive {id:?}; deleted {} staged object(s)",
            files.len()
        );
        Ok(archive)
    }

    /// Commit the active upload session and return the updated archive.
    ///
    /// If validation fails, the session is left open so that the bad files
    /// can be re-uploaded and the completion retried.
    pub fn complete_upload(&self, id: &str) -> Result<ZarrArchive, ArchiveError> {
        let (_, files) = self.transition(id, |archive| match &archive.session {
            SessionState::Uploading { files } => {
                let files = files.clone();
                archive.session = SessionState::Completing {
                    files: files.clone(),
                };
                Ok(files)
            }
            SessionState::Idle => Err(ArchiveError::NoUploadInProgress { id: id.to_owned() }),
            SessionState::Completing { .. } => {
                Err(ArchiveError::UploadInProgress { id: id.to_owned() })
            }
        })?;
        info!("Completing upload of {} file(s) to Zarr archive {id:?}", files.len());
        let changes = files
            .iter()
            .map(|f| FileChange::Upsert {
                path: f.path.clone(),
                etag: f.etag.clone(),
            })
            .collect();
        let guard = CommitGuard::new(self, id, SessionState::Uploading { files });
        let result = self
            .updater(id)
            .with_staging(self.config.archive_staging_prefix(id))
            .commit(changes);
        self.finish_commit(guard, result)
    }

    /// Remove files from an archive, deleting their chunks
    pub fn delete_files(
        &self,
        id: &str,
        paths: Vec<EntryPath>,
    ) -> Result<ZarrArchive, ArchiveError> {
        let guard = self.lock_for_commit(id, None)?;
        info!("Deleting {} file(s) from Zarr archive {id:?}", paths.len());
        let changes = paths
            .into_iter()
            .map(|path| FileChange::Remove { path })
            .collect();
        let result = self.updater(id).commit(changes);
        self.finish_commit(guard, result)
    }

    /// Recompute all of an archive's manifests from the chunks in storage.
    /// Used for data written out of band and to repair an archive after an
    /// interrupted commit.
    pub fn ingest(&self, id: &str) -> Result<ZarrArchive, ArchiveError> {
        let guard = self.lock_for_commit(id, Some(ArchiveStatus::Ingesting))?;
        info!("Ingesting Zarr archive {id:?}");
        let result = self.updater(id).rebuild();
        self.finish_commit(guard, result)
    }

    /// Delete an archive's chunks, manifests, staged uploads, and record.
    ///
    /// If this fails after deleting anything, the archive is released and
    /// marked [`ArchiveStatus::NeedsRepair`] so that the deletion can be
    /// retried.
    pub fn delete_archive(&self, id: &str) -> Result<(), ArchiveError> {
        let mut guard = self.lock_for_commit(id, None)?;
        let mut deleted = 0;
        for prefix in [
            self.config.archive_data_prefix(id),
            self.config.archive_manifest_prefix(id),
            self.config.archive_staging_prefix(id),
        ] {
            for entry in self.store.list_prefix(&format!("{prefix}/"))? {
                self.store.delete_object(&entry.key)?;
                guard.repair = true;
                deleted += 1;
            }
        }
        self.repo.remove(id)?;
        guard.disarm();
        info!("Deleted Zarr archive {id:?} ({deleted} objects)");
        Ok(())
    }

    pub fn set_visibility(
        &self,
        id: &str,
        visibility: Visibility,
    ) -> Result<ZarrArchive, ArchiveError> {
        let (archive, ()) = self.transition(id, |archive| {
            archive.visibility = visibility;
            Ok(())
        })?;
        info!("Zarr archive {id:?} is now {visibility}");
        Ok(archive)
    }

    /// Render the archive's manifest tree for display
    pub fn manifest_tree(&self, id: &str) -> Result<Tree<String>, ArchiveError> {
        let archive = self.repo.get(id)?;
        let manifests = ChecksumFileStore::new(
            &self.store,
            self.config.archive_manifest_prefix(&archive.id),
        );
        Ok(manifests.render_tree()?)
    }

    fn updater(&self, id: &str) -> TreeUpdater<'_, S> {
        TreeUpdater::new(
            &self.store,
            self.config.archive_data_prefix(id),
            self.config.archive_manifest_prefix(id),
            self.config.threads,
        )
    }

    /// Claim exclusive use of an idle archive for a commit not driven by an
    /// upload session
    fn lock_for_commit<'a>(
        &'a self,
        id: &'a str,
        status: Option<ArchiveStatus>,
    ) -> Result<CommitGuard<'a, S, R>, ArchiveError> {
        self.transition(id, |archive| {
            if archive.session != SessionState::Idle {
                return Err(ArchiveError::UploadInProgress { id: id.to_owned() });
            }
            archive.session = SessionState::Completing { files: Vec::new() };
            if let Some(st) = status {
                archive.status = st;
            }
            Ok(())
        })?;
        Ok(CommitGuard::new(self, id, SessionState::Idle))
    }

    /// Record the outcome of a commit and release the session.  A commit that
    /// failed without writing anything returns the session to the state the
    /// guard restores (reopening an upload); one that failed part-way marks
    /// the archive for repair.
    fn finish_commit(
        &self,
        mut guard: CommitGuard<'_, S, R>,
        result: Result<CommitSummary, CommitError>,
    ) -> Result<ZarrArchive, ArchiveError> {
        let id = guard.id;
        match result {
            Ok(summary) => {
                // If the record cannot be updated, it no longer matches the
                // manifests.
                guard.restore = SessionState::Idle;
                guard.repair = true;
                let (archive, ()) = self.transition(id, |archive| {
                    archive.apply(&summary);
                    archive.status = ArchiveStatus::Complete;
                    archive.session = SessionState::Idle;
                    Ok(())
                })?;
                guard.disarm();
                info!(
                    "Zarr archive {id:?} now has checksum {} ({} files, {} bytes)",
                    archive.checksum, archive.file_count, archive.size
                );
                Ok(archive)
            }
            Err(e) => {
                if e.is_clean() {
                    debug!("Commit to Zarr archive {id:?} failed before writing: {e}");
                } else {
                    warn!("Commit to Zarr archive {id:?} was interrupted; marking for repair: {e}");
                    guard.restore = SessionState::Idle;
                    guard.repair = true;
                }
                guard.release()?;
                Err(e.into())
            }
        }
    }

    /// Load the archive, let `f` modify it, and store it back if nobody else
    /// has changed it in the meantime, retrying a few times on conflict
    fn transition<T, F>(&self, id: &str, mut f: F) -> Result<(ZarrArchive, T), ArchiveError>
    where
        F: FnMut(&mut ZarrArchive) -> Result<T, ArchiveError>,
    {
        for attempt in 1..=TRANSITION_ATTEMPTS {
            let mut archive = self.repo.get(id)?;
            let out = f(&mut archive)?;
            match self.repo.compare_and_swap(archive) {
                Ok(stored) => return Ok((stored, out)),
                Err(RepositoryError::VersionConflict { .. }) => {
                    debug!("Zarr archive {id:?} changed concurrently (attempt {attempt}); retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ArchiveError::Contention { id: id.to_owned() })
    }
}

/// Releases the session an archive was claimed with if the operation holding
/// it ends, by an error or a panic, without recording its outcome
struct CommitGuard<'a, S: ObjectStore, R: ArchiveRepository> {
    manager: &'a ArchiveManager<S, R>,
    id: &'a str,
    /// The session the archive is given back on release
    restore: SessionState,
    /// Whether storage may already have been modified, in which case the
    /// archive is marked for repair on release
    repair: bool,
    armed: bool,
}

impl<'a, S: ObjectStore, R: ArchiveRepository> CommitGuard<'a, S, R> {
    fn new(manager: &'a ArchiveManager<S, R>, id: &'a str, restore: SessionState) -> Self {
        CommitGuard {
            manager,
            id,
            restore,
            repair: false,
            armed: true,
        }
    }

    fn release(&mut self) -> Result<ZarrArchive, ArchiveError> {
        let (archive, ()) = self.manager.transition(self.id, |archive| {
            archive.session = self.restore.clone();
            // An unfinished rebuild leaves the manifests in an unknown state
            if self.repair || archive.status == ArchiveStatus::Ingesting {
                archive.status = ArchiveStatus::NeedsRepair;
            }
            Ok(())
        })?;
        self.armed = false;
        Ok(archive)
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<S: ObjectStore, R: ArchiveRepository> Drop for CommitGuard<'_, S, R> {
    fn drop(&mut self) {
        if self.armed {
            warn!(
                "Operation on Zarr archive {:?} ended early; releasing its session",
                self.id
            );
            if let Err(e) = self.release() {
                warn!("Could not release session on Zarr archive {:?}: {e}", self.id);
            }
        }
    }
}

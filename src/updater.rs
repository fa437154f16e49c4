//! Incremental maintenance of an archive's checksum manifests
//!
//! A commit validates every changed file against object storage, then
//! recomputes only the manifests of the directories containing the changes
//! and of their ancestors.  Directories are processed by a pool of worker
//! threads; a directory becomes ready once every touched subdirectory has
//! reported its new entry (or that it did not change).  All manifest writes
//! are buffered until every directory has been recomputed.
mod jobstack;
use self::jobstack::JobStack;
use crate::checksum::nodes::{Checksum, DirChecksum, FileChecksum};
use crate::checksum::{digest_matches, ChecksumListing, ChecksumTree};
use crate::errors::{CommitError, ListingError, ManifestError, ValidationError};
use crate::manifest::ChecksumFileStore;
use crate::store::ObjectStore;
use crate::zarr::{chunk_key, relative_to, DirPath, EntryPath};
use log::{debug, info, trace, warn};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::mem::take;
use std::num::NonZeroUsize;
use std::panic::resume_unwind;
use std::sync::{Mutex, MutexGuard};

/// One change to the file set of an archive
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum FileChange {
    /// The file at `path` has been written (or overwritten) in object storage
    /// and is declared to have the given etag
    Upsert { path: EntryPath, etag: String },
    /// The file at `path` is to be removed from the archive
    Remove { path: EntryPath },
}

impl FileChange {
    pub fn path(&self) -> &EntryPath {
        match self {
            FileChange::Upsert { path, .. } | FileChange::Remove { path } => path,
        }
    }
}

/// The outcome of a successful commit or rebuild
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommitSummary {
    /// Digest of the root manifest after the commit
    pub checksum: String,
    pub size: u64,
    pub file_count: u64,
    pub manifests_written: usize,
    pub manifests_deleted: usize,
    pub chunks_deleted: usize,
    /// Number of staged objects moved to their final keys
    pub chunks_promoted: usize,
}

impl CommitSummary {
    /// The summary of an archive with nothing in it
    pub fn empty() -> CommitSummary {
        CommitSummary::for_root(&ChecksumListing::empty())
    }

    fn for_root(root: &ChecksumListing) -> CommitSummary {
        CommitSummary {
            checksum: root.digest().to_owned(),
            size: root.size(),
            file_count: root.file_count(),
            manifests_written: 0,
            manifests_deleted: 0,
            chunks_deleted: 0,
            chunks_promoted: 0,
        }
    }
}

/// Applies batches of [`FileChange`]s to one archive's manifest tree
#[derive(Debug)]
pub struct TreeUpdater<'a, S> {
    store: &'a S,
    data_prefix: String,
    staging_prefix: Option<String>,
    manifests: ChecksumFileStore<'a, S>,
    threads: NonZeroUsize,
}

impl<'a, S: ObjectStore> TreeUpdater<'a, S> {
    /// `data_prefix` is the key prefix under which the archive's chunks are
    /// stored, and `manifest_prefix` the one under which its manifests are
    /// stored.  Neither should have a trailing slash.
    pub fn new<D, M>(store: &'a S, data_prefix: D, manifest_prefix: M, threads: NonZeroUsize) -> Self
    where
        D: Into<String>,
        M: Into<String>,
    {
        TreeUpdater {
            store,
            data_prefix: data_prefix.into(),
            staging_prefix: None,
            manifests: ChecksumFileStore::new(store, manifest_prefix),
            threads,
        }
    }

    /// Expect upserted files to have been written under `staging_prefix`
    /// rather than at their final keys.  They are validated there, and a
    /// successful commit moves them into place before any manifest is
    /// written.
    #[must_use]
    pub fn with_staging<P: Into<String>>(mut self, staging_prefix: P) -> Self {
        self.staging_prefix = Some(staging_prefix.into());
        self
    }

    pub fn manifests(&self) -> &ChecksumFileStore<'a, S> {
        &self.manifests
    }

    /// Read the archive's current root checksum, size, and file count from
    /// the root manifest
    pub fn current(&self) -> Result<CommitSummary, ManifestError> {
        let root = self
            .manifests
            .read_checksum_file(&DirPath::Root)?
            .unwrap_or_default();
        Ok(CommitSummary::for_root(&root))
    }

    /// Validate `changes` and, if they are all valid, update every affected
    /// manifest and delete the chunks of removed files.
    ///
    /// # Errors
    ///
    /// If any change fails validation, returns [`CommitError::Validation`]
    /// listing every failure, and nothing is written.  If a storage write
    /// fails after some writes have already succeeded, returns
    /// [`CommitError::PartialCommit`].
    pub fn commit(&self, changes: Vec<FileChange>) -> Result<CommitSummary, CommitError> {
        let validated = self.validate(changes)?;
        if validated.is_empty() {
            return Ok(self.current()?);
        }
        let removed_chunks = validated
            .iter()
            .filter(|(_, fc)| fc.is_none())
            .map(|(path, _)| chunk_key(&self.data_prefix, path))
            .collect::<Vec<_>>();
        let promoted = match &self.staging_prefix {
            Some(staging) => validated
                .iter()
                .filter(|(_, fc)| fc.is_some())
                .map(|(path, _)| {
                    (
                        chunk_key(staging, path),
                        chunk_key(&self.data_prefix, path),
                    )
                })
                .collect(),
            None => Vec::new(),
        };
        let dirs = DirStates::new(validated);
        let total_dirs = dirs.len();
        let ready = dirs.ready();
        let stack = JobStack::new(ready);
        stack.expect_jobs(total_dirs - dirs.ready_count());
        let plans = Mutex::new(Vec::new());
        let root = Mutex::new(None);
        let workers = self.threads.get().min(total_dirs);
        debug!("Recomputing {total_dirs} directories on {workers} thread(s)");
        let outcome = crossbeam_utils::thread::scope(|s| {
            let mut handles = Vec::with_capacity(workers);
            for thread_no in 0..workers {
                let stack = &stack;
                let dirs = &dirs;
                let plans = &plans;
                let root = &root;
                handles.push(s.spawn(move |_| {
                    trace!("[{thread_no}] Starting thread");
                    let r = stack.handle_many_jobs(|dir| {
                        trace!("[{thread_no}] Popped {dir} from stack");
                        self.process_dir(dir, dirs, plans, root)
                    });
                    trace!("[{thread_no}] Ending thread");
                    r
                }));
            }
            let mut first_err = None;
            for h in handles {
                match h.join() {
                    Ok(Ok(())) => (),
                    Ok(Err(e)) => {
                        first_err.get_or_insert(e);
                    }
                    Err(panic) => resume_unwind(panic),
                }
            }
            first_err
        })
        .unwrap_or_else(|panic| resume_unwind(panic));
        if let Some(e) = outcome {
            return Err(e);
        }
        let root = match lock(&root).take() {
            Some(listing) => listing,
            None => self
                .manifests
                .read_checksum_file(&DirPath::Root)?
                .unwrap_or_default(),
        };
        let mut plans = take(&mut *lock(&plans));
        let mut summary = CommitSummary::for_root(&root);
        self.flush(&mut plans, &promoted, &removed_chunks, &mut summary)?;
        info!(
            "Committed changes; new root checksum is {} ({} manifests written, {} deleted)",
            summary.checksum, summary.manifests_written, summary.manifests_deleted
        );
        Ok(summary)
    }

    /// Recompute every manifest of the archive from the chunks currently in
    /// object storage, deleting any manifest for a directory that no longer
    /// exists
    pub fn rebuild(&self) -> Result<CommitSummary, CommitError> {
        let mut tree = ChecksumTree::new();
        for entry in self.store.list_prefix(&format!("{}/", self.data_prefix))? {
            let Some(path) = relative_to(&entry.key, &self.data_prefix) else {
                warn!("Skipping object with unusable key {:?}", entry.key);
                continue;
            };
            tree.add_file(&path, normalize_etag(&entry.info.etag), entry.info.size)?;
        }
        let listings = tree.into_listings()?;
        let root = listings.get(&DirPath::Root).cloned().unwrap_or_default();
        let keep = listings
            .iter()
            .filter(|(dir, listing)| !(dir.is_root() && listing.is_empty()))
            .map(|(dir, _)| self.manifests.manifest_key(dir))
            .collect::<BTreeSet<_>>();
        let stale = self
            .manifests
            .manifest_keys()?
            .into_iter()
            .filter(|k| !keep.contains(k))
            .collect::<Vec<_>>();
        let mut plans = listings
            .into_iter()
            .filter(|(dir, listing)| !(dir.is_root() && listing.is_empty()))
            .map(|(dir, listing)| (dir, Some(listing)))
            .collect::<Vec<_>>();
        let mut summary = CommitSummary::for_root(&root);
        self.flush(&mut plans, &[], &[], &mut summary)?;
        let total = summary.manifests_written + stale.len();
        for key in stale {
            debug!("Deleting stale manifest {key}");
            let applied = summary.manifests_written + summary.manifests_deleted;
            self.store
                .delete_object(&key)
                .map_err(|e| partial(applied, total, e.into()))?;
            summary.manifests_deleted += 1;
        }
        info!(
            "Rebuilt {} manifests; root checksum is {}",
            summary.manifests_written, summary.checksum
        );
        Ok(summary)
    }

    fn validate(
        &self,
        changes: Vec<FileChange>,
    ) -> Result<Vec<(EntryPath, Option<FileChecksum>)>, CommitError> {
        let mut seen = HashSet::new();
        let mut errors = Vec::new();
        let mut validated = Vec::with_capacity(changes.len());
        for change in changes {
            if !seen.insert(change.path().clone()) {
                errors.push(ValidationError::DuplicatePath {
                    path: change.path().clone(),
                });
                continue;
            }
            let key = match (&change, &self.staging_prefix) {
                (FileChange::Upsert { path, .. }, Some(staging)) => chunk_key(staging, path),
                _ => chunk_key(&self.data_prefix, change.path()),
            };
            let info = match self.store.head_object(&key) {
                Ok(info) => info,
                Err(e) if e.is_not_found() => {
                    errors.push(ValidationError::FileNotFound {
                        path: change.path().clone(),
                    });
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            match change {
                FileChange::Upsert { path, etag } => {
                    if digest_matches(&etag, &info.etag) {
                        let fc = FileChecksum::for_path(&path, normalize_etag(&info.etag), info.size);
                        validated.push((path, Some(fc)));
                    } else {
                        errors.push(ValidationError::ETagMismatch {
                            path,
                            expected: etag,
                            actual: info.etag,
                        });
                    }
                }
                FileChange::Remove { path } => validated.push((path, None)),
            }
        }
        if errors.is_empty() {
            Ok(validated)
        } else {
            warn!("{} file(s) failed validation; nothing written", errors.len());
            Err(CommitError::Validation(errors))
        }
    }

    /// Recompute the listing of `dir` and report its new entry to its parent.
    /// Returns the parent if that made it ready.
    fn process_dir(
        &self,
        dir: DirPath,
        dirs: &DirStates,
        plans: &Mutex<Vec<Plan>>,
        root: &Mutex<Option<ChecksumListing>>,
    ) -> Result<Option<DirPath>, CommitError> {
        let (files, subdirs) = dirs.take_updates(&dir);
        let report = if files.is_empty() && subdirs.is_empty() {
            trace!("Directory {dir} has no changes");
            Report::Unchanged
        } else {
            let old = self.manifests.read_checksum_file(&dir)?;
            let existed = old.is_some();
            let old = old.unwrap_or_default();
            let new = apply_updates(&dir, &old, files, subdirs)
                .map_err(|source| CommitError::Listing {
                    dir: dir.clone(),
                    source,
                })?;
            if dir.is_root() {
                *lock(root) = Some(new.clone());
            }
            if existed && new.digest() == old.digest() {
                debug!("Checksum of {dir} unchanged");
                Report::Unchanged
            } else if new.is_empty() {
                if existed {
                    debug!("Directory {dir} is now empty");
                    lock(plans).push((dir.clone(), None));
                }
                Report::Removed
            } else {
                debug!("Checksum of {dir} changed to {}", new.digest());
                let entry = new.to_dir_checksum(dir.name().unwrap_or_default());
                lock(plans).push((dir.clone(), Some(new)));
                Report::Changed(entry)
            }
        };
        Ok(dirs.report(&dir, report))
    }

    /// Copy staged objects to their final keys, write out the planned
    /// manifests deepest-first, then delete the chunks of removed files and
    /// the staged copies
    fn flush(
        &self,
        plans: &mut [Plan],
        promoted: &[(String, String)],
        removed_chunks: &[String],
        summary: &mut CommitSummary,
    ) -> Result<(), CommitError> {
        plans.sort_by(|(a, _), (b, _)| b.depth().cmp(&a.depth()).then_with(|| a.cmp(b)));
        let total = 2 * promoted.len() + plans.len() + removed_chunks.len();
        let mut applied = 0;
        for (staged, key) in promoted {
            debug!("Moving staged object {staged} to {key}");
            self.store
                .copy_object(staged, key)
                .map_err(|e| partial(applied, total, e.into()))?;
            summary.chunks_promoted += 1;
            applied += 1;
        }
        for (dir, plan) in &*plans {
            let r = match plan {
                Some(listing) => self.manifests.write_checksum_file(dir, listing),
                None => self.manifests.delete_checksum_file(dir),
            };
            r.map_err(|e| partial(applied, total, e))?;
            match plan {
                Some(_) => summary.manifests_written += 1,
                None => summary.manifests_deleted += 1,
            }
            applied += 1;
        }
        for key in removed_chunks {
            debug!("Deleting removed chunk {key}");
            self.store
                .delete_object(key)
                .map_err(|e| partial(applied, total, e.into()))?;
            summary.chunks_deleted += 1;
            applied += 1;
        }
        for (staged, _) in promoted {
            self.store
                .delete_object(staged)
                .map_err(|e| partial(applied, total, e.into()))?;
            applied += 1;
        }
        Ok(())
    }
}

/// A buffered manifest write, or a deletion if the listing is `None`
type Plan = (DirPath, Option<ChecksumListing>);

/// What a directory reports to its parent once recomputed
#[derive(Clone, Debug, Eq, PartialEq)]
enum Report {
    Unchanged,
    Changed(DirChecksum),
    Removed,
}

/// Pending updates for one touched directory
#[derive(Debug, Default)]
struct DirState {
    files: BTreeMap<String, Option<FileChecksum>>,
    subdirs: BTreeMap<String, Option<DirChecksum>>,
    /// Number of touched subdirectories that have not yet reported
    todo: usize,
}

/// The set of directories touched by a commit, keyed by path rather than
/// linked by pointers
#[derive(Debug)]
struct DirStates {
    states: Mutex<BTreeMap<DirPath, DirState>>,
}

impl DirStates {
    fn new(validated: Vec<(EntryPath, Option<FileChecksum>)>) -> DirStates {
        let mut states = BTreeMap::<DirPath, DirState>::new();
        for (path, fc) in validated {
            let parent = path.parent();
            for d in parent.ancestry() {
                states.entry(d).or_default();
            }
            states
                .entry(parent)
                .or_default()
                .files
                .insert(path.file_name().to_owned(), fc);
        }
        let children = states.keys().filter_map(DirPath::parent).collect::<Vec<_>>();
        for p in children {
            if let Some(st) = states.get_mut(&p) {
                st.todo += 1;
            }
        }
        DirStates {
            states: Mutex::new(states),
        }
    }

    fn len(&self) -> usize {
        lock(&self.states).len()
    }

    fn ready(&self) -> Vec<DirPath> {
        lock(&self.states)
            .iter()
            .filter(|(_, st)| st.todo == 0)
            .map(|(d, _)| d.clone())
            .collect()
    }

    fn ready_count(&self) -> usize {
        lock(&self.states).values().filter(|st| st.todo == 0).count()
    }

    #[allow(clippy::type_complexity)]
    fn take_updates(
        &self,
        dir: &DirPath,
    ) -> (
        BTreeMap<String, Option<FileChecksum>>,
        BTreeMap<String, Option<DirChecksum>>,
    ) {
        let mut states = lock(&self.states);
        match states.get_mut(dir) {
            Some(st) => (take(&mut st.files), take(&mut st.subdirs)),
            None => (BTreeMap::new(), BTreeMap::new()),
        }
    }

    fn report(&self, dir: &DirPath, report: Report) -> Option<DirPath> {
        let (Some(parent), Some(name)) = (dir.parent(), dir.name()) else {
            return None;
        };
        let mut states = lock(&self.states);
        let st = states.get_mut(&parent)?;
        match report {
            Report::Unchanged => (),
            Report::Removed => {
                st.subdirs.insert(name.to_owned(), None);
            }
            Report::Changed(entry) => {
                st.subdirs.insert(name.to_owned(), Some(entry));
            }
        }
        st.todo = st.todo.saturating_sub(1);
        (st.todo == 0).then_some(parent)
    }
}

fn apply_updates(
    dir: &DirPath,
    old: &ChecksumListing,
    files: BTreeMap<String, Option<FileChecksum>>,
    subdirs: BTreeMap<String, Option<DirChecksum>>,
) -> Result<ChecksumListing, ListingError> {
    let mut file_map = old
        .files()
        .iter()
        .map(|f| (f.name().to_owned(), f.clone()))
        .collect::<BTreeMap<_, _>>();
    for (name, update) in files {
        match update {
            Some(fc) => {
                file_map.insert(name, fc);
            }
            None => {
                if file_map.remove(&name).is_none() {
                    warn!("Removed file {name:?} was not listed in the manifest for {dir}; ignoring");
                }
            }
        }
    }
    let mut dir_map = old
        .directories()
        .iter()
        .map(|d| (d.name().to_owned(), d.clone()))
        .collect::<BTreeMap<_, _>>();
    for (name, update) in subdirs {
        match update {
            Some(dc) => {
                dir_map.insert(name, dc);
            }
            None => {
                dir_map.remove(&name);
            }
        }
    }
    ChecksumListing::generate(file_map.into_values(), dir_map.into_values())
}

fn partial(applied: usize, total: usize, source: ManifestError) -> CommitError {
    if applied == 0 {
        CommitError::Manifest(source)
    } else {
        CommitError::PartialCommit {
            applied,
            total,
            source,
        }
    }
}

fn normalize_etag(etag: &str) -> String {
    etag.trim_matches('"').to_ascii_lowercase()
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().expect("Mutex should not have been poisoned")
}

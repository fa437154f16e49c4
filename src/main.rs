use clap::{Parser, Subcommand};
use log::LevelFilter;
use md5::{Digest, Md5};
use std::io;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;
use thiserror::Error;
use zarr_checksum_tree::zarr::EntryPath;
use zarr_checksum_tree::{
    ArchiveError, ArchiveManager, Config, EntryPathError, JsonFileRepository, LocalStore,
    ObjectStore, RepositoryError, StoreError, UploadFile, Visibility, ZarrArchive,
};

/// Maintain Dandi Zarr checksum manifests for archives stored in a local
/// directory
#[derive(Clone, Debug, Eq, Parser, PartialEq)]
#[command(version)]
struct Arguments {
    /// Directory holding the object store (`objects/`) and archive records
    /// (`archives/`)
    #[arg(long, default_value = ".", value_name = "DIR")]
    root: PathBuf,

    /// Number of worker threads for recomputing directories
    #[arg(short = 'J', long, value_name = "N")]
    threads: Option<NonZeroUsize>,

    #[arg(long, default_value = "zarr", value_name = "PREFIX")]
    data_prefix: String,

    #[arg(long, default_value = "zarr-checksums", value_name = "PREFIX")]
    manifest_prefix: String,

    #[arg(long, default_value = "zarr-uploads", value_name = "PREFIX")]
    staging_prefix: String,

    /// Log messages at or above this level to stderr
    #[arg(short, long, default_value = "info", value_name = "LEVEL")]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, Eq, PartialEq, Subcommand)]
enum Command {
    /// Create a new, empty archive
    Create {
        #[arg(long)]
        embargoed: bool,
        id: String,
    },
    /// Declare files to upload and print a write URL for each
    Start {
        id: String,
        #[arg(value_name = "PATH=ETAG", value_parser = parse_upload_file, required = true)]
        files: Vec<UploadFile>,
    },
    /// Commit the active upload session
    Complete { id: String },
    /// Abandon the active upload session
    Cancel { id: String },
    /// Upload files from a local directory in a single session
    Upload {
        id: String,
        #[arg(long = "from", value_name = "DIR")]
        srcdir: PathBuf,
        #[arg(value_parser = parse_entry_path, required = true)]
        paths: Vec<EntryPath>,
    },
    /// Remove files from an archive
    DeleteFiles {
        id: String,
        #[arg(value_parser = parse_entry_path, required = true)]
        paths: Vec<EntryPath>,
    },
    /// Rebuild an archive's manifests from the chunks in storage
    Ingest { id: String },
    /// Show an archive's record
    Info { id: String },
    /// Show an archive's manifest tree
    Tree { id: String },
    SetVisibility { id: String, visibility: Visibility },
    /// Delete an archive and everything in it
    Delete { id: String },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("failed to initialize logging: {0}")]
    Log(#[from] log::SetLoggerError),
}

fn main() -> ExitCode {
    let args = Arguments::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("zarr-checksum-tree: {e}");
            if let CliError::Archive(ref ae) = e {
                for ve in ae.validation_errors().unwrap_or_default() {
                    eprintln!("  {ve}");
                }
            }
            ExitCode::FAILURE
        }
    }
}

fn run(args: Arguments) -> Result<(), CliError> {
    init_logging(args.log_level)?;
    let mut config = Config {
        data_prefix: args.data_prefix,
        manifest_prefix: args.manifest_prefix,
        staging_prefix: args.staging_prefix,
        ..Config::default()
    };
    if let Some(threads) = args.threads {
        config.threads = threads;
    }
    let store = LocalStore::new(args.root.join("objects"));
    let repo = JsonFileRepository::open(args.root.join("archives"))?;
    let manager = ArchiveManager::new(store, repo, config);
    match args.command {
        Command::Create { embargoed, id } => {
            let visibility = if embargoed {
                Visibility::Embargoed
            } else {
                Visibility::Public
            };
            show(&manager.create_archive(&id, visibility)?);
        }
        Command::Start { id, files } => {
            for ticket in manager.start_upload(&id, files)? {
                println!("{}\t{}", ticket.path, ticket.upload_url);
            }
        }
        Command::Complete { id } => show(&manager.complete_upload(&id)?),
        Command::Cancel { id } => show(&manager.cancel_upload(&id)?),
        Command::Upload { id, srcdir, paths } => {
            let mut files = Vec::with_capacity(paths.len());
            let mut bodies = Vec::with_capacity(paths.len());
            for path in paths {
                let mut src = srcdir.clone();
                src.extend(path.components());
                let body = fs_err::read(&src)?;
                files.push(UploadFile {
                    path,
                    etag: hex::encode(Md5::digest(&body)),
                });
                bodies.push(body);
            }
            let prefix = manager.config().archive_staging_prefix(&id);
            manager.start_upload(&id, files.clone())?;
            for (f, body) in files.iter().zip(bodies) {
                let key = zarr_checksum_tree::zarr::chunk_key(&prefix, &f.path);
                if let Err(e) = manager.store().put_object(&key, body.into()) {
                    manager.cancel_upload(&id)?;
                    return Err(e.into());
                }
            }
            show(&manager.complete_upload(&id)?);
        }
        Command::DeleteFiles { id, paths } => show(&manager.delete_files(&id, paths)?),
        Command::Ingest { id } => show(&manager.ingest(&id)?),
        Command::Info { id } => show(&manager.get_archive(&id)?),
        Command::Tree { id } => print!("{}", manager.manifest_tree(&id)?),
        Command::SetVisibility { id, visibility } => {
            show(&manager.set_visibility(&id, visibility)?);
        }
        Command::Delete { id } => manager.delete_archive(&id)?,
    }
    Ok(())
}

fn show(archive: &ZarrArchive) {
    println!("id: {}", archive.id);
    println!("visibility: {}", archive.visibility);
    println!("status: {:?}", archive.status);
    println!("checksum: {}", archive.checksum);
    println!("size: {}", archive.size);
    println!("file_count: {}", archive.file_count);
    println!("upload_in_progress: {}", archive.upload_in_progress());
}

fn init_logging(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{:<5}] {}: {}",
                record.level(),
                record.target(),
                message
            ));
        })
        .level(level)
        .chain(io::stderr())
        .apply()
}

fn parse_entry_path(s: &str) -> Result<EntryPath, EntryPathError> {
    EntryPath::try_from(s)
}

fn parse_upload_file(s: &str) -> Result<UploadFile, String> {
    let (path, etag) = s
        .rsplit_once('=')
        .ok_or_else(|| format!("expected PATH=ETAG, got {s:?}"))?;
    let path = EntryPath::try_from(path).map_err(|e| e.to_string())?;
    if etag.is_empty() {
        return Err(format!("missing ETag for {path}"));
    }
    Ok(UploadFile {
        path,
        etag: etag.to_owned(),
    })
}

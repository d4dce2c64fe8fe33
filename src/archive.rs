//! High-level operations on container files.
//!
//! ```no_run
//! use blobby::archive::{self, ArchiveOptions};
//!
//! let opts = ArchiveOptions::default();
//! archive::create("out.blob", &["notes", "todo.txt"], &opts)?;
//! archive::list("out.blob", &opts, |entry| println!("{entry}"))?;
//! let report = archive::extract("out.blob", &opts)?;
//! assert!(report.is_clean());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Every operation streams: at most one record is in flight, and content
//! moves through a fixed-size buffer.  `create` leaves whatever it managed
//! to write in place when it fails.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::blobette::{BlobetteError, DecodedBlobette, EntryKind, PendingBlobette};
use crate::fsx;
use crate::io_stream::{BlobReader, BlobWriter, ListEntry};

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ArchiveError {
    /// A source entry is missing or unreadable; `create` stops.
    #[error("cannot read '{}': {source}", .path.display())]
    SourceUnreadable { path: PathBuf, source: io::Error },
    /// The container or an extracted entry cannot be written.
    #[error("cannot write '{}': {source}", .path.display())]
    DestinationUnwritable { path: PathBuf, source: io::Error },
    #[error("cannot read container '{}': {source}", .path.display())]
    ContainerUnreadable { path: PathBuf, source: io::Error },
    /// Bad magic or truncation, or a checksum mismatch under
    /// [`ChecksumPolicy::Abort`].  `index` is zero-based.
    #[error("record {index}: {source}")]
    Corrupt { index: u64, source: BlobetteError },
    /// An entry does not fit the record format (path or size too long).
    #[error("cannot archive '{}': {source}", .path.display())]
    Unencodable { path: PathBuf, source: BlobetteError },
}

// ── Options ──────────────────────────────────────────────────────────────────

/// What to do when a record's trailer does not match its bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumPolicy {
    /// Log it, note it in the report, keep going.
    #[default]
    Continue,
    /// Stop with [`ArchiveError::Corrupt`].
    Abort,
}

/// Configuration shared by [`create`], [`list`] and [`extract`].
#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    /// Inputs to `create` are resolved against this directory and `extract`
    /// materialises records under it.  Record paths are stored as given.
    pub base_dir:        PathBuf,
    pub checksum_policy: ChecksumPolicy,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            base_dir:        PathBuf::from("."),
            checksum_policy: ChecksumPolicy::Continue,
        }
    }
}

// ── Report ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumFailure {
    pub index:    u64,
    pub path:     String,
    pub stored:   u8,
    pub computed: u8,
}

/// Outcome of a completed operation.
#[derive(Debug, Clone, Default)]
pub struct ArchiveReport {
    /// Records written, listed or extracted.
    pub records:           u64,
    /// Sum of their content lengths.
    pub content_bytes:     u64,
    pub checksum_failures: Vec<ChecksumFailure>,
}

impl ArchiveReport {
    pub fn is_clean(&self) -> bool {
        self.checksum_failures.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} record(s), {} content byte(s), {} checksum failure(s)",
            self.records,
            self.content_bytes,
            self.checksum_failures.len(),
        )
    }

    /// Count one decoded record and apply the checksum policy to it.
    fn record(
        &mut self,
        index:    u64,
        path:     &str,
        size:     u64,
        stored:   u8,
        computed: u8,
        policy:   ChecksumPolicy,
    ) -> Result<(), ArchiveError> {
        self.records += 1;
        self.content_bytes += size;
        if stored == computed {
            return Ok(());
        }

        warn!(index, path, stored, computed, "checksum mismatch");
        self.checksum_failures.push(ChecksumFailure {
            index,
            path: path.to_owned(),
            stored,
            computed,
        });
        match policy {
            ChecksumPolicy::Continue => Ok(()),
            ChecksumPolicy::Abort => Err(ArchiveError::Corrupt {
                index,
                source: BlobetteError::BadChecksum { path: path.to_owned(), stored, computed },
            }),
        }
    }

    fn record_decoded(
        &mut self,
        index:  u64,
        record: &DecodedBlobette,
        policy: ChecksumPolicy,
    ) -> Result<(), ArchiveError> {
        self.record(
            index,
            &record.path_lossy(),
            record.header.content_len,
            record.stored_checksum,
            record.computed_checksum,
            policy,
        )
    }
}

// ── Operations ───────────────────────────────────────────────────────────────

/// Write `inputs` (files or directory trees, in order) into a new container
/// at `container`, truncating any existing file.
///
/// Every input must exist before the container is touched.
pub fn create<P, I>(container: P, inputs: &[I], opts: &ArchiveOptions) -> Result<ArchiveReport, ArchiveError>
where
    P: AsRef<Path>,
    I: AsRef<Path>,
{
    let container = container.as_ref();
    for input in inputs {
        let source = opts.base_dir.join(input.as_ref());
        fs::metadata(&source)
            .map_err(|e| ArchiveError::SourceUnreadable { path: source.clone(), source: e })?;
    }

    let file = File::create(container).map_err(|e| ArchiveError::DestinationUnwritable {
        path:   container.to_path_buf(),
        source: e,
    })?;
    let identity = file.metadata().ok().and_then(|m| fsx::identity(&m));

    let mut writer = BlobWriter::new(BufWriter::new(file))
        .base_dir(&opts.base_dir)
        .container_path(container);
    if let Some(id) = identity {
        writer = writer.skip_identity(id);
    }

    for input in inputs {
        writer.add_path(input.as_ref())?;
    }

    let report = ArchiveReport {
        records:       writer.records(),
        content_bytes: writer.content_bytes(),
        ..ArchiveReport::default()
    };
    writer.finish()?;
    info!(container = %container.display(), "{}", report.summary());
    Ok(report)
}

/// Decode every record of `container`, handing each to `on_entry` as soon
/// as it is read.  Content is hashed but never stored.
pub fn list<P, F>(container: P, opts: &ArchiveOptions, mut on_entry: F) -> Result<ArchiveReport, ArchiveError>
where
    P: AsRef<Path>,
    F: FnMut(&ListEntry),
{
    let container = container.as_ref();
    let mut reader = BlobReader::open(container)?;
    let mut report = ArchiveReport::default();

    while let Some(item) = reader.next() {
        let entry = item.map_err(|e| read_error(container, reader.next_index(), e))?;
        on_entry(&entry);
        report.record(
            entry.index,
            &entry.path_lossy(),
            entry.size,
            entry.stored_checksum,
            entry.computed_checksum,
            opts.checksum_policy,
        )?;
    }
    Ok(report)
}

/// Materialise every record of `container` under `opts.base_dir`.
///
/// Records are applied in order; ancestors are expected to precede their
/// descendants, as [`create`] guarantees.  Bad magic and truncation stop
/// extraction at the failing record.  A file whose record fails part-way,
/// or fails its checksum under [`ChecksumPolicy::Abort`], is removed.
///
/// Directory permissions are applied last, deepest first, so a read-only
/// directory does not block its own contents.  This also happens when
/// extraction stops early.
pub fn extract<P: AsRef<Path>>(container: P, opts: &ArchiveOptions) -> Result<ArchiveReport, ArchiveError> {
    let container = container.as_ref();
    let mut reader = BlobReader::open(container)?;
    let mut report = ArchiveReport::default();
    let mut dir_modes = Vec::new();

    let outcome = extract_records(&mut reader, container, opts, &mut report, &mut dir_modes);
    let restored = restore_dir_modes(dir_modes);
    outcome?;
    restored?;

    info!(container = %container.display(), "{}", report.summary());
    Ok(report)
}

fn extract_records<R: Read>(
    reader:    &mut BlobReader<R>,
    container: &Path,
    opts:      &ArchiveOptions,
    report:    &mut ArchiveReport,
    dir_modes: &mut Vec<(PathBuf, u32)>,
) -> Result<(), ArchiveError> {
    loop {
        let index = reader.next_index();
        let pending = match reader.next_header() {
            Ok(Some(p)) => p,
            Ok(None) => return Ok(()),
            Err(e) => return Err(read_error(container, index, e)),
        };
        let dest = opts.base_dir.join(fsx::bytes_to_path(&pending.path));
        info!(path = %pending.path_lossy(), "extracting");

        match pending.kind() {
            EntryKind::Directory => {
                create_dir(&dest)?;
                let record = reader
                    .finish(pending, &mut io::sink())
                    .map_err(|e| read_error(container, index, e))?;
                dir_modes.push((dest, record.header.mode));
                report.record_decoded(index, &record, opts.checksum_policy)?;
            }
            EntryKind::File => {
                let record = write_file(reader, pending, &dest, container, index)?;
                fsx::set_permissions(&dest, record.header.mode).map_err(|e| unwritable(&dest, e))?;
                if let Err(e) = report.record_decoded(index, &record, opts.checksum_policy) {
                    discard(&dest);
                    return Err(e);
                }
            }
        }
    }
}

/// Stream one file record's content to `dest`.  On failure after `dest`
/// was created, the partial file is removed.
fn write_file<R: Read>(
    reader:    &mut BlobReader<R>,
    pending:   PendingBlobette,
    dest:      &Path,
    container: &Path,
    index:     u64,
) -> Result<DecodedBlobette, ArchiveError> {
    let file = File::create(dest).map_err(|e| unwritable(dest, e))?;
    let mut sink = BufWriter::new(file);
    let result = reader
        .finish(pending, &mut sink)
        .map_err(|e| match e {
            BlobetteError::Sink(e) => unwritable(dest, e),
            other => read_error(container, index, other),
        })
        .and_then(|record| sink.flush().map(|()| record).map_err(|e| unwritable(dest, e)));

    if result.is_err() {
        drop(sink);
        discard(dest);
    }
    result
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        debug!(path = %path.display(), error = %e, "could not remove partial file");
    }
}

/// Apply deferred directory modes, descendants before their ancestors.
fn restore_dir_modes(dir_modes: Vec<(PathBuf, u32)>) -> Result<(), ArchiveError> {
    let mut first_err = None;
    for (dest, mode) in dir_modes.into_iter().rev() {
        if let Err(e) = fsx::set_permissions(&dest, mode) {
            first_err.get_or_insert(unwritable(&dest, e));
        }
    }
    first_err.map_or(Ok(()), Err)
}

fn create_dir(path: &Path) -> Result<(), ArchiveError> {
    match fs::create_dir(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(e) => Err(unwritable(path, e)),
    }
}

fn unwritable(path: &Path, source: io::Error) -> ArchiveError {
    ArchiveError::DestinationUnwritable { path: path.to_path_buf(), source }
}

fn read_error(container: &Path, index: u64, err: BlobetteError) -> ArchiveError {
    match err {
        BlobetteError::Io(e) => ArchiveError::ContainerUnreadable {
            path:   container.to_path_buf(),
            source: e,
        },
        other => ArchiveError::Corrupt { index, source: other },
    }
}

//! Streaming container engine: writer and reader.
//!
//! # Writer
//! [`BlobWriter`] turns filesystem paths into blobettes appended to any
//! `Write`.  Each path is decomposed into its ancestor chain and every link
//! of the chain that has not yet been written is emitted, outermost first,
//! so extraction always meets a directory before anything inside it.
//! Directories are expanded depth-first with `walkdir`; the set
//! of emitted paths lives on the writer and spans every `add_path` call.
//!
//! # Reader
//! [`BlobReader`] decodes records one at a time from any `Read`.  It can be
//! driven record by record ([`BlobReader::next_header`] +
//! [`BlobReader::finish`]) when the caller wants the content, or used as an
//! iterator of [`ListEntry`] values when only metadata is needed.  The
//! iterator stops for good after the first unrecoverable error; checksum
//! mismatches are carried on the entry instead.

use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File, Metadata};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::archive::ArchiveError;
use crate::blobette::{
    decode_header, encode_into, BlobetteError, DecodedBlobette, EntryKind, PendingBlobette,
    MAX_MODE,
};
use crate::decompose::{self, prefixes};
use crate::fsx;

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct BlobWriter<W: Write> {
    writer:        W,
    base_dir:      PathBuf,
    container:     PathBuf,
    skip_identity: Option<(u64, u64)>,
    /// Every record path emitted so far.
    written:       HashSet<Vec<u8>>,
    records:       u64,
    content_bytes: u64,
}

impl<W: Write> BlobWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            base_dir:      PathBuf::from("."),
            container:     PathBuf::from("<stream>"),
            skip_identity: None,
            written:       HashSet::new(),
            records:       0,
            content_bytes: 0,
        }
    }

    /// Directory that input paths are resolved against.  Record paths stay
    /// exactly as given to [`add_path`](Self::add_path).
    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    /// Name used for the output in error messages.
    pub fn container_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.container = path.into();
        self
    }

    /// Never archive the entry with this `(device, inode)`; used to keep a
    /// container out of itself.
    pub fn skip_identity(mut self, id: (u64, u64)) -> Self {
        self.skip_identity = Some(id);
        self
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn content_bytes(&self) -> u64 {
        self.content_bytes
    }

    /// Archive `input` (a file or a whole directory tree) with any missing
    /// ancestors.
    ///
    /// The tree is walked depth-first in enumeration order.  Symlinks are
    /// followed for metadata, but a symlinked directory below `input` is
    /// recorded without being descended.
    pub fn add_path(&mut self, input: &Path) -> Result<(), ArchiveError> {
        let root = decompose::trim_trailing_separators(&fsx::path_to_bytes(input)).to_vec();
        let walk_root = self.source_path(&root);

        for entry in WalkDir::new(&walk_root).follow_links(false) {
            let entry = entry.map_err(|e| ArchiveError::SourceUnreadable {
                path:   e.path().unwrap_or(&walk_root).to_path_buf(),
                source: e.into(),
            })?;
            let source = entry.path();
            let meta = fs::metadata(source).map_err(|e| ArchiveError::SourceUnreadable {
                path:   source.to_path_buf(),
                source: e,
            })?;

            if self.is_container(&meta) {
                debug!(path = %source.display(), "skipping the container itself");
                continue;
            }

            let path = match source.strip_prefix(&walk_root) {
                Ok(rel) if entry.depth() > 0 => decompose::join(&root, &fsx::path_to_bytes(rel)),
                _ => root.clone(),
            };
            self.emit_chain(&path, source, &meta)?;

            if meta.is_dir() {
                if entry.depth() > 0 && entry.path_is_symlink() {
                    debug!(path = %source.display(), "not descending into symlinked directory");
                } else {
                    debug!(path = %source.display(), depth = entry.depth(), "walking");
                }
            }
        }
        Ok(())
    }

    /// Flush and hand back the underlying writer.
    pub fn finish(mut self) -> Result<W, ArchiveError> {
        self.writer.flush().map_err(|e| ArchiveError::DestinationUnwritable {
            path:   self.container.clone(),
            source: e,
        })?;
        Ok(self.writer)
    }

    /// Emit every not-yet-written link of `path`'s ancestor chain, ending
    /// with `path` itself.
    fn emit_chain(&mut self, path: &[u8], source: &Path, meta: &Metadata) -> Result<(), ArchiveError> {
        for prefix in prefixes(path) {
            if self.written.contains(prefix) {
                debug!(path = %String::from_utf8_lossy(prefix), "already written");
                continue;
            }
            if prefix.len() == path.len() {
                self.write_entry(prefix, source, meta)?;
            } else {
                let ancestor = self.source_path(prefix);
                let ancestor_meta = fs::metadata(&ancestor).map_err(|e| {
                    ArchiveError::SourceUnreadable { path: ancestor.clone(), source: e }
                })?;
                self.write_entry(prefix, &ancestor, &ancestor_meta)?;
            }
            self.written.insert(prefix.to_vec());
        }
        Ok(())
    }

    fn write_entry(&mut self, path: &[u8], source: &Path, meta: &Metadata) -> Result<(), ArchiveError> {
        let mode = fsx::mode_of(meta) & MAX_MODE;
        info!(path = %String::from_utf8_lossy(path), "adding");

        let len = if meta.is_file() { meta.len() } else { 0 };
        let result = if meta.is_file() {
            let file = File::open(source).map_err(|e| ArchiveError::SourceUnreadable {
                path:   source.to_path_buf(),
                source: e,
            })?;
            encode_into(&mut self.writer, mode, path, len, file)
        } else {
            // Directories, and special files whose content is not archived.
            encode_into(&mut self.writer, mode, path, 0, io::empty())
        };

        result.map_err(|e| self.encode_error(source, e))?;
        self.records += 1;
        self.content_bytes += len;
        Ok(())
    }

    fn encode_error(&self, source: &Path, err: BlobetteError) -> ArchiveError {
        match err {
            BlobetteError::Source(e) => ArchiveError::SourceUnreadable {
                path:   source.to_path_buf(),
                source: e,
            },
            BlobetteError::ShortContent { .. } => ArchiveError::SourceUnreadable {
                path:   source.to_path_buf(),
                source: io::Error::new(io::ErrorKind::UnexpectedEof, err.to_string()),
            },
            BlobetteError::Io(e) => ArchiveError::DestinationUnwritable {
                path:   self.container.clone(),
                source: e,
            },
            other => ArchiveError::Unencodable { path: source.to_path_buf(), source: other },
        }
    }

    fn source_path(&self, record_path: &[u8]) -> PathBuf {
        self.base_dir.join(fsx::bytes_to_path(record_path))
    }

    fn is_container(&self, meta: &Metadata) -> bool {
        match (self.skip_identity, fsx::identity(meta)) {
            (Some(skip), Some(id)) => skip == id,
            _ => false,
        }
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

/// Metadata of one decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    /// Zero-based position of the record in the container.
    pub index:             u64,
    pub mode:              u32,
    pub size:              u64,
    pub path:              Vec<u8>,
    pub stored_checksum:   u8,
    pub computed_checksum: u8,
}

impl ListEntry {
    fn new(index: u64, record: DecodedBlobette) -> Self {
        Self {
            index,
            mode:              record.header.mode,
            size:              record.header.content_len,
            path:              record.path,
            stored_checksum:   record.stored_checksum,
            computed_checksum: record.computed_checksum,
        }
    }

    pub fn checksum_ok(&self) -> bool {
        self.stored_checksum == self.computed_checksum
    }

    pub fn kind(&self) -> EntryKind {
        EntryKind::of(self.mode, self.size)
    }

    pub fn path_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.path)
    }
}

/// `mode size path`, as printed by `blobby list`.
impl fmt::Display for ListEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06o} {:5} {}", self.mode, self.size, self.path_lossy())
    }
}

pub struct BlobReader<R: Read> {
    rdr:        BufReader<R>,
    next_index: u64,
    fused:      bool,
}

impl BlobReader<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        let path = path.as_ref();
        let f = File::open(path).map_err(|e| ArchiveError::ContainerUnreadable {
            path:   path.to_path_buf(),
            source: e,
        })?;
        Ok(Self::from_reader(f))
    }
}

impl<R: Read> BlobReader<R> {
    pub fn from_reader(reader: R) -> Self {
        Self { rdr: BufReader::new(reader), next_index: 0, fused: false }
    }

    /// Index the next record will get; after an error, the index of the
    /// record that failed.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Start the next record.  `Ok(None)` at a clean end of stream.
    pub fn next_header(&mut self) -> Result<Option<PendingBlobette>, BlobetteError> {
        decode_header(&mut self.rdr)
    }

    /// Stream `pending`'s content into `sink` and read its trailer.
    pub fn finish<W: Write>(
        &mut self,
        pending: PendingBlobette,
        sink:    &mut W,
    ) -> Result<DecodedBlobette, BlobetteError> {
        let record = pending.read_content(&mut self.rdr, sink)?;
        self.next_index += 1;
        Ok(record)
    }
}

impl<R: Read> Iterator for BlobReader<R> {
    type Item = Result<ListEntry, BlobetteError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.fused {
            return None;
        }
        let index = self.next_index;
        let result = match self.next_header() {
            Ok(None) => {
                self.fused = true;
                return None;
            }
            Ok(Some(pending)) => self.finish(pending, &mut io::sink()),
            Err(e) => Err(e),
        };
        match result {
            Ok(record) => Some(Ok(ListEntry::new(index, record))),
            Err(e) => {
                self.fused = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobette::encode;
    use std::io::Cursor;

    fn container(records: &[(u32, &str, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        for (mode, path, content) in records {
            out.extend(encode(*mode, path.as_bytes(), content).unwrap());
        }
        out
    }

    #[test]
    fn iterates_all_records() {
        let bytes = container(&[
            (0o040755, "a", b""),
            (0o100644, "a/x.txt", b"xx"),
            (0o100600, "a/y.txt", b"yyyy"),
        ]);
        let entries: Vec<ListEntry> =
            BlobReader::from_reader(Cursor::new(bytes)).collect::<Result<_, _>>().unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.path_lossy().into_owned()).collect();
        assert_eq!(paths, ["a", "a/x.txt", "a/y.txt"]);
        assert_eq!(entries[2].index, 2);
        assert_eq!(entries[2].size, 4);
        assert_eq!(entries[0].kind(), EntryKind::Directory);
        assert!(entries.iter().all(ListEntry::checksum_ok));
    }

    #[test]
    fn empty_container_yields_nothing() {
        let mut r = BlobReader::from_reader(Cursor::new(Vec::new()));
        assert!(r.next().is_none());
        assert!(r.next().is_none());
    }

    #[test]
    fn checksum_mismatch_is_carried_and_iteration_continues() {
        let mut bytes = container(&[(0o100644, "f", b"abc"), (0o100644, "g", b"def")]);
        // first content byte of the first record
        bytes[crate::blobette::HEADER_SIZE + 1] ^= 0xFF;
        let entries: Vec<_> = BlobReader::from_reader(Cursor::new(bytes)).collect();
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].as_ref().unwrap().checksum_ok());
        assert!(entries[1].as_ref().unwrap().checksum_ok());
    }

    #[test]
    fn bad_magic_fuses_the_iterator() {
        let first = container(&[(0o100644, "f", b"abc")]);
        let mut bytes = first.clone();
        bytes.extend(container(&[(0o100644, "g", b"def"), (0o100644, "h", b"ghi")]));
        bytes[first.len()] = 0x00;

        let mut r = BlobReader::from_reader(Cursor::new(bytes));
        assert!(r.next().unwrap().is_ok());
        let err = r.next().unwrap().unwrap_err();
        assert!(matches!(err, BlobetteError::BadMagic { found: 0 }));
        assert_eq!(r.next_index(), 1);
        assert!(r.next().is_none());
    }

    #[test]
    fn display_matches_listing_format() {
        let entry = ListEntry {
            index:             0,
            mode:              0o100644,
            size:              42,
            path:              b"dir/file".to_vec(),
            stored_checksum:   7,
            computed_checksum: 7,
        };
        assert_eq!(entry.to_string(), "100644    42 dir/file");
    }

    #[test]
    fn writer_dedups_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("a/b/x.txt"), b"x").unwrap();
        fs::write(dir.path().join("a/b/y.txt"), b"y").unwrap();

        let mut w = BlobWriter::new(Vec::new()).base_dir(dir.path());
        w.add_path(Path::new("a/b/x.txt")).unwrap();
        w.add_path(Path::new("a/b/y.txt")).unwrap();
        assert_eq!(w.records(), 4);
        assert_eq!(w.content_bytes(), 2);
        let bytes = w.finish().unwrap();

        let paths: Vec<String> = BlobReader::from_reader(Cursor::new(bytes))
            .map(|e| e.unwrap().path_lossy().into_owned())
            .collect();
        assert_eq!(paths, ["a", "a/b", "a/b/x.txt", "a/b/y.txt"]);
    }

    #[test]
    fn missing_source_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = BlobWriter::new(Vec::new()).base_dir(dir.path());
        let err = w.add_path(Path::new("nope")).unwrap_err();
        assert!(matches!(err, ArchiveError::SourceUnreadable { .. }));
    }
}

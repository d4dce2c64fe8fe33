//! Blobette record codec.
//!
//! # Layout
//!
//! ```text
//! [magic 0x42: 1][mode: 3 BE][path_len: 2 BE][content_len: 6 BE][path][content][checksum: 1]
//! ```
//!
//! The checksum is the Pearson fold (see [`crate::checksum`]) over every
//! byte from the magic through the last content byte.  There is no framing
//! beyond this: a container is blobettes back to back.
//!
//! # Decoding
//!
//! Decoding is two-phase so content never has to sit in memory:
//! [`decode_header`] reads magic, fixed fields and path and returns a
//! [`PendingBlobette`]; the caller then streams the content into any sink
//! with [`PendingBlobette::read_content`] (or discards it with
//! [`PendingBlobette::skip_content`]).  Either way the content is hashed and
//! the trailer compared.  A checksum mismatch is not an `Err` at this level:
//! the record's fields were consumed correctly, so the decoded record is
//! returned with both checksum bytes and the caller decides what to do
//! (see [`DecodedBlobette::verify`]).

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use std::borrow::Cow;
use std::fmt;
use std::io::{self, Read, Write};
use thiserror::Error;

use crate::checksum::Checksum;

pub const BLOBETTE_MAGIC: u8 = 0x42;

pub const MAGIC_BYTES:          usize = 1;
pub const MODE_BYTES:           usize = 3;
pub const PATH_LENGTH_BYTES:    usize = 2;
pub const CONTENT_LENGTH_BYTES: usize = 6;
pub const CHECKSUM_BYTES:       usize = 1;

/// Magic plus the three fixed-width fields.
pub const HEADER_SIZE: usize =
    MAGIC_BYTES + MODE_BYTES + PATH_LENGTH_BYTES + CONTENT_LENGTH_BYTES;

pub const MAX_MODE:        u32   = (1 << (8 * MODE_BYTES)) - 1;
pub const MAX_PATH_LEN:    usize = (1 << (8 * PATH_LENGTH_BYTES)) - 1;
pub const MAX_CONTENT_LEN: u64   = (1 << (8 * CONTENT_LENGTH_BYTES)) - 1;

const S_IFMT:  u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;

const COPY_BUF_SIZE: usize = 64 * 1024;

// ── Errors ───────────────────────────────────────────────────────────────────

/// The field being read when a record ran out of bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Mode,
    PathLength,
    ContentLength,
    Path,
    Content,
    Checksum,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Field::Mode          => "mode",
            Field::PathLength    => "path length",
            Field::ContentLength => "content length",
            Field::Path          => "path",
            Field::Content       => "content",
            Field::Checksum      => "checksum",
        })
    }
}

#[derive(Error, Debug)]
pub enum BlobetteError {
    /// Stream is desynchronised; nothing after this point can be trusted.
    #[error("bad magic byte 0x{found:02x} (expected 0x{:02x})", BLOBETTE_MAGIC)]
    BadMagic { found: u8 },
    #[error("checksum mismatch for '{path}': stored 0x{stored:02x}, computed 0x{computed:02x}")]
    BadChecksum { path: String, stored: u8, computed: u8 },
    #[error("record truncated while reading {field}")]
    Truncated { field: Field },
    #[error("path is {len} bytes (maximum {})", MAX_PATH_LEN)]
    PathTooLong { len: usize },
    #[error("content is {len} bytes (maximum {})", MAX_CONTENT_LEN)]
    ContentTooLong { len: u64 },
    #[error("mode 0o{mode:o} does not fit in {} bytes", MODE_BYTES)]
    ModeOutOfRange { mode: u32 },
    /// The content source ended before the announced length.
    #[error("content source ended after {actual} of {expected} bytes")]
    ShortContent { expected: u64, actual: u64 },
    /// Reading the content source failed while encoding.
    #[error("content source error: {0}")]
    Source(#[source] io::Error),
    /// Writing decoded content to its destination failed.
    #[error("content sink error: {0}")]
    Sink(#[source] io::Error),
    /// Container stream I/O.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl BlobetteError {
    /// Only a checksum mismatch leaves record boundaries intact.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, BlobetteError::BadChecksum { .. })
    }
}

// ── Big-endian field primitive ───────────────────────────────────────────────

/// Store `value` big-endian across the whole of `field`.
#[inline]
fn put_be(field: &mut [u8], value: u64) {
    BigEndian::write_uint(field, value, field.len());
}

/// Load a big-endian integer spanning the whole of `field`.
#[inline]
fn get_be(field: &[u8]) -> u64 {
    BigEndian::read_uint(field, field.len())
}

// ── Header ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobetteHeader {
    pub mode:        u32,
    pub path_len:    u16,
    pub content_len: u64,
}

impl BlobetteHeader {
    /// Validate field capacities.  Nothing is written for a record that
    /// fails here.
    pub fn new(mode: u32, path_len: usize, content_len: u64) -> Result<Self, BlobetteError> {
        if mode > MAX_MODE {
            return Err(BlobetteError::ModeOutOfRange { mode });
        }
        if path_len > MAX_PATH_LEN {
            return Err(BlobetteError::PathTooLong { len: path_len });
        }
        if content_len > MAX_CONTENT_LEN {
            return Err(BlobetteError::ContentTooLong { len: content_len });
        }
        Ok(Self { mode, path_len: path_len as u16, content_len })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let (magic, rest)         = out.split_at_mut(MAGIC_BYTES);
        let (mode, rest)          = rest.split_at_mut(MODE_BYTES);
        let (path_len, content_len) = rest.split_at_mut(PATH_LENGTH_BYTES);
        magic[0] = BLOBETTE_MAGIC;
        put_be(mode, (self.mode & MAX_MODE) as u64);
        put_be(path_len, self.path_len as u64);
        put_be(content_len, self.content_len & MAX_CONTENT_LEN);
        out
    }

    pub fn kind(&self) -> EntryKind {
        EntryKind::of(self.mode, self.content_len)
    }

    /// Encoded size of the whole record this header describes.
    pub fn record_len(&self) -> u64 {
        (HEADER_SIZE + self.path_len as usize + CHECKSUM_BYTES) as u64 + self.content_len
    }
}

/// What a record materialises as on extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

impl EntryKind {
    /// Type bits in `mode` win.  A record without type bits is a directory
    /// exactly when it has no content.
    pub fn of(mode: u32, content_len: u64) -> Self {
        match mode & S_IFMT {
            S_IFDIR if content_len == 0 => EntryKind::Directory,
            0 if content_len == 0       => EntryKind::Directory,
            _                           => EntryKind::File,
        }
    }
}

// ── Encode ───────────────────────────────────────────────────────────────────

/// Encode one record into a fresh buffer.
pub fn encode(mode: u32, path: &[u8], content: &[u8]) -> Result<Vec<u8>, BlobetteError> {
    let mut out = Vec::with_capacity(HEADER_SIZE + path.len() + content.len() + CHECKSUM_BYTES);
    encode_into(&mut out, mode, path, content.len() as u64, content)?;
    Ok(out)
}

/// Stream one record into `w`, pulling exactly `content_len` bytes from
/// `content`.  Returns the checksum byte that was written.
///
/// Capacity checks run before the first byte is written.  If `content`
/// runs dry early the record is left incomplete in `w` and
/// [`BlobetteError::ShortContent`] is returned.
pub fn encode_into<W: Write, R: Read>(
    w:           &mut W,
    mode:        u32,
    path:        &[u8],
    content_len: u64,
    mut content: R,
) -> Result<u8, BlobetteError> {
    let header = BlobetteHeader::new(mode, path.len(), content_len)?;

    let header_bytes = header.to_bytes();
    w.write_all(&header_bytes)?;
    w.write_all(path)?;
    let state = Checksum::new().update(&header_bytes).update(path);

    let state = copy_from_source(&mut content, w, content_len, state)?;

    w.write_u8(state.value())?;
    Ok(state.value())
}

fn copy_from_source<R: Read, W: Write>(
    src:       &mut R,
    w:         &mut W,
    len:       u64,
    mut state: Checksum,
) -> Result<Checksum, BlobetteError> {
    let mut buf = vec![0u8; len.min(COPY_BUF_SIZE as u64) as usize];
    let mut remaining = len;
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = match src.read(&mut buf[..want]) {
            Ok(0) => {
                return Err(BlobetteError::ShortContent { expected: len, actual: len - remaining });
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(BlobetteError::Source(e)),
        };
        state = state.update(&buf[..n]);
        w.write_all(&buf[..n])?;
        remaining -= n as u64;
    }
    Ok(state)
}

// ── Decode ───────────────────────────────────────────────────────────────────

/// A record whose header and path have been read; content and trailer are
/// still in the stream.
#[derive(Debug)]
#[must_use = "the record's content is still unread"]
pub struct PendingBlobette {
    pub header: BlobetteHeader,
    pub path:   Vec<u8>,
    state:      Checksum,
}

/// A fully consumed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBlobette {
    pub header:            BlobetteHeader,
    pub path:              Vec<u8>,
    pub stored_checksum:   u8,
    pub computed_checksum: u8,
}

/// Read the next record's magic, fixed fields and path.
///
/// `Ok(None)` means the stream ended cleanly on a record boundary.
pub fn decode_header<R: Read>(r: &mut R) -> Result<Option<PendingBlobette>, BlobetteError> {
    let mut magic = [0u8; MAGIC_BYTES];
    loop {
        match r.read(&mut magic) {
            Ok(0) => return Ok(None),
            Ok(_) => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(BlobetteError::Io(e)),
        }
    }
    if magic[0] != BLOBETTE_MAGIC {
        return Err(BlobetteError::BadMagic { found: magic[0] });
    }
    let state = Checksum::new().update(&magic);

    let mut mode = [0u8; MODE_BYTES];
    let state = read_hashed(r, &mut mode, Field::Mode, state)?;
    let mut path_len = [0u8; PATH_LENGTH_BYTES];
    let state = read_hashed(r, &mut path_len, Field::PathLength, state)?;
    let mut content_len = [0u8; CONTENT_LENGTH_BYTES];
    let state = read_hashed(r, &mut content_len, Field::ContentLength, state)?;

    let header = BlobetteHeader {
        mode:        get_be(&mode) as u32,
        path_len:    get_be(&path_len) as u16,
        content_len: get_be(&content_len),
    };

    let mut path = vec![0u8; header.path_len as usize];
    let state = read_hashed(r, &mut path, Field::Path, state)?;

    Ok(Some(PendingBlobette { header, path, state }))
}

impl PendingBlobette {
    pub fn kind(&self) -> EntryKind {
        self.header.kind()
    }

    pub fn path_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.path)
    }

    /// Stream the content into `sink`, then read and compare the trailer.
    pub fn read_content<R: Read, W: Write>(
        self,
        r:    &mut R,
        sink: &mut W,
    ) -> Result<DecodedBlobette, BlobetteError> {
        let mut buf = vec![0u8; self.header.content_len.min(COPY_BUF_SIZE as u64) as usize];
        let mut remaining = self.header.content_len;
        let mut state = self.state;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            state = read_hashed(r, &mut buf[..want], Field::Content, state)?;
            sink.write_all(&buf[..want]).map_err(BlobetteError::Sink)?;
            remaining -= want as u64;
        }

        let mut trailer = [0u8; CHECKSUM_BYTES];
        read_exact_field(r, &mut trailer, Field::Checksum)?;

        Ok(DecodedBlobette {
            header:            self.header,
            path:              self.path,
            stored_checksum:   trailer[0],
            computed_checksum: state.value(),
        })
    }

    /// Hash and discard the content.
    pub fn skip_content<R: Read>(self, r: &mut R) -> Result<DecodedBlobette, BlobetteError> {
        self.read_content(r, &mut io::sink())
    }
}

impl DecodedBlobette {
    pub fn checksum_ok(&self) -> bool {
        self.stored_checksum == self.computed_checksum
    }

    /// `Err(BadChecksum)` on a trailer mismatch.
    pub fn verify(&self) -> Result<(), BlobetteError> {
        if self.checksum_ok() {
            Ok(())
        } else {
            Err(BlobetteError::BadChecksum {
                path:     self.path_lossy().into_owned(),
                stored:   self.stored_checksum,
                computed: self.computed_checksum,
            })
        }
    }

    pub fn kind(&self) -> EntryKind {
        self.header.kind()
    }

    pub fn path_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.path)
    }
}

/// Decode one whole record with its content in memory.
pub fn decode<R: Read>(r: &mut R) -> Result<Option<(DecodedBlobette, Vec<u8>)>, BlobetteError> {
    let Some(pending) = decode_header(r)? else {
        return Ok(None);
    };
    let mut content = Vec::with_capacity(pending.header.content_len.min(COPY_BUF_SIZE as u64) as usize);
    let decoded = pending.read_content(r, &mut content)?;
    Ok(Some((decoded, content)))
}

fn read_exact_field<R: Read>(r: &mut R, buf: &mut [u8], field: Field) -> Result<(), BlobetteError> {
    r.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => BlobetteError::Truncated { field },
        _                            => BlobetteError::Io(e),
    })
}

fn read_hashed<R: Read>(
    r:     &mut R,
    buf:   &mut [u8],
    field: Field,
    state: Checksum,
) -> Result<Checksum, BlobetteError> {
    read_exact_field(r, buf, field)?;
    Ok(state.update(buf))
}

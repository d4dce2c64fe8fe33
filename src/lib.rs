pub mod checksum;
pub mod blobette;
pub mod decompose;
pub mod fsx;
pub mod io_stream;
pub mod archive;

pub use checksum::Checksum;
pub use blobette::{BlobetteError, BlobetteHeader, DecodedBlobette, EntryKind, encode, decode};
pub use io_stream::{BlobReader, BlobWriter, ListEntry};
pub use archive::{ArchiveError, ArchiveOptions, ArchiveReport, ChecksumPolicy};

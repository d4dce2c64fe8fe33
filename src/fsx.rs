//! Platform shims for the pieces of a filesystem entry the container keeps.
//!
//! On Unix the record mode is `st_mode`, record paths are the raw bytes of
//! the `OsStr`, and permissions are restored with `chmod`.  Elsewhere the
//! mode is synthesised from the entry type and read-only flag, paths go
//! through UTF-8 with `/` separators, and only the read-only bit is
//! restored.

use std::borrow::Cow;
use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};

#[cfg(unix)]
pub fn mode_of(meta: &Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode()
}

#[cfg(not(unix))]
pub fn mode_of(meta: &Metadata) -> u32 {
    let perm = if meta.permissions().readonly() { 0o444 } else { 0o644 };
    if meta.is_dir() {
        0o040000 | perm | 0o111
    } else {
        0o100000 | perm
    }
}

/// Apply the permission bits (`0o7777`) of a record mode to `path`.
#[cfg(unix)]
pub fn set_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
pub fn set_permissions(path: &Path, mode: u32) -> io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(mode & 0o222 == 0);
    fs::set_permissions(path, perms)
}

#[cfg(unix)]
pub fn path_to_bytes(path: &Path) -> Cow<'_, [u8]> {
    use std::os::unix::ffi::OsStrExt;
    Cow::Borrowed(path.as_os_str().as_bytes())
}

#[cfg(not(unix))]
pub fn path_to_bytes(path: &Path) -> Cow<'_, [u8]> {
    Cow::Owned(path.to_string_lossy().replace('\\', "/").into_bytes())
}

#[cfg(unix)]
pub fn bytes_to_path(bytes: &[u8]) -> PathBuf {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
pub fn bytes_to_path(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}

/// `(device, inode)` of an entry, where the platform has one.
#[cfg(unix)]
pub fn identity(meta: &Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    Some((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
pub fn identity(_meta: &Metadata) -> Option<(u64, u64)> {
    None
}

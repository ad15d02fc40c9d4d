use std::fs;
use std::io;
use std::path::Path;

pub(crate) fn is_directory<P: AsRef<Path>>(path: P) -> bool {
    fs::metadata(path).ok().as_ref().map(fs::Metadata::is_dir) == Some(true)
}

pub(crate) fn is_file<P: AsRef<Path>>(path: P) -> bool {
    fs::metadata(path).ok().as_ref().map(fs::Metadata::is_file) == Some(true)
}

pub(crate) fn path_exists<P: AsRef<Path>>(path: P) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Returns `Ok(true)` if the directory had to be created.
pub(crate) fn ensure_dir_exists(path: &Path) -> io::Result<bool> {
    if !is_directory(path) {
        fs::create_dir_all(path).map(|()| true)
    } else {
        Ok(false)
    }
}

pub(crate) fn write_bytes(path: &Path, contents: &[u8]) -> io::Result<()> {
    fs::write(path, contents)
}

pub(crate) fn read_file(path: &Path) -> io::Result<String> {
    fs::read_to_string(path)
}

pub(crate) fn read_bytes(path: &Path) -> io::Result<Vec<u8>> {
    fs::read(path)
}

#[cfg(unix)]
pub(crate) fn symlink_file(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
pub(crate) fn symlink_file(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

/// Remove whatever sits at `path`, whichever kind it is. Missing paths
/// are not an error.
pub(crate) fn remove_any(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
    }
}

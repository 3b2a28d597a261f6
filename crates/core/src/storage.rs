//! Filesystem primitives the executor applies plans through.
//!
//! Every primitive is synchronous and either completes or returns a
//! [`StorageError`]; none of them observe cancellation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::archive;
use crate::model::DeleteMode;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("source path not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("{action} failed for {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("archive error for {}: {source}", .path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("archive {} has no entry {entry}", .archive.display())]
    MissingEntry { archive: PathBuf, entry: String },

    #[error("recycle failed for {}: {message}", .path.display())]
    Recycle { path: PathBuf, message: String },
}

impl StorageError {
    fn io(action: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn archive(path: &Path, source: zip::result::ZipError) -> Self {
        Self::Archive {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Creates `path` and any missing ancestors. Succeeds if it already exists.
pub fn ensure_directory(path: &Path) -> StorageResult<()> {
    fs::create_dir_all(path).map_err(|err| StorageError::io("create directory", path, err))
}

/// Moves `source` to `destination`, deleting whatever already sits at the destination first.
pub fn move_with_overwrite(
    source: &Path,
    destination: &Path,
    delete_mode: DeleteMode,
) -> StorageResult<()> {
    if path_exists(destination) {
        delete_path(destination, delete_mode)?;
    }

    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_directory(parent)?;
        }
    }

    let metadata = match fs::symlink_metadata(source) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(StorageError::NotFound(source.to_path_buf()))
        }
        Err(err) => return Err(StorageError::io("stat", source, err)),
    };

    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(err) => {
            // rename cannot cross filesystems; copy and remove instead
            warn!(
                "rename {} -> {} failed ({}); falling back to copy",
                source.display(),
                destination.display(),
                err
            );
            if metadata.is_dir() {
                copy_dir_recursive(source, destination)?;
                fs::remove_dir_all(source)
                    .map_err(|err| StorageError::io("remove directory", source, err))
            } else {
                fs::copy(source, destination)
                    .map_err(|err| StorageError::io("copy file", source, err))?;
                fs::remove_file(source).map_err(|err| StorageError::io("remove file", source, err))
            }
        }
    }
}

/// Deletes a file or directory tree. A missing path is not an error.
pub fn delete_path(path: &Path, delete_mode: DeleteMode) -> StorageResult<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(StorageError::io("stat", path, err)),
    };

    match delete_mode {
        DeleteMode::Recycle => trash::delete(path).map_err(|err| StorageError::Recycle {
            path: path.to_path_buf(),
            message: err.to_string(),
        }),
        DeleteMode::Permanent if metadata.is_dir() => {
            fs::remove_dir_all(path).map_err(|err| StorageError::io("remove directory", path, err))
        }
        DeleteMode::Permanent => {
            fs::remove_file(path).map_err(|err| StorageError::io("remove file", path, err))
        }
    }
}

/// Writes a fresh deflate-compressed archive at `archive_path` holding `source`
/// under its own top-level name. A directory source is stored recursively; a
/// file source (an archive unit) is stored as a single entry.
pub fn backup_archive(source: &Path, archive_path: &Path) -> StorageResult<()> {
    if let Some(parent) = archive_path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_directory(parent)?;
        }
    }
    if archive_path.is_file() {
        fs::remove_file(archive_path)
            .map_err(|err| StorageError::io("remove file", archive_path, err))?;
    }

    let metadata = fs::metadata(source).map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            StorageError::NotFound(source.to_path_buf())
        } else {
            StorageError::io("stat", source, err)
        }
    })?;
    let base_name = source
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "backup".to_string());

    let file = fs::File::create(archive_path)
        .map_err(|err| StorageError::io("create archive", archive_path, err))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    if metadata.is_dir() {
        writer
            .add_directory(base_name.as_str(), options)
            .map_err(|err| StorageError::archive(archive_path, err))?;

        for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|err| {
                let path = err.path().unwrap_or(source).to_path_buf();
                StorageError::io("walk", &path, io::Error::other(err))
            })?;
            let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
            let name = format!("{base_name}/{}", zip_entry_name(relative));

            if entry.file_type().is_dir() {
                writer
                    .add_directory(name.as_str(), options)
                    .map_err(|err| StorageError::archive(archive_path, err))?;
            } else if entry.file_type().is_file() {
                write_file_entry(&mut writer, &name, entry.path(), options, archive_path)?;
            }
        }
    } else {
        write_file_entry(&mut writer, &base_name, source, options, archive_path)?;
    }

    writer
        .finish()
        .map_err(|err| StorageError::archive(archive_path, err))?;
    debug!("wrote backup archive {}", archive_path.display());
    Ok(())
}

/// Copies one named entry out of `archive_path` into `destination`.
pub fn extract_archive_entry(
    archive_path: &Path,
    entry_path: &str,
    destination: &Path,
) -> StorageResult<()> {
    let bytes = archive::read_entry(archive_path, entry_path)?;
    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_directory(parent)?;
        }
    }
    fs::write(destination, bytes).map_err(|err| StorageError::io("write file", destination, err))
}

pub(crate) fn path_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn write_file_entry(
    writer: &mut ZipWriter<fs::File>,
    name: &str,
    source: &Path,
    options: SimpleFileOptions,
    archive_path: &Path,
) -> StorageResult<()> {
    let mut file =
        fs::File::open(source).map_err(|err| StorageError::io("open file", source, err))?;
    writer
        .start_file(name, options)
        .map_err(|err| StorageError::archive(archive_path, err))?;
    io::copy(&mut file, writer)
        .map_err(|err| StorageError::io("write archive", archive_path, err))?;
    Ok(())
}

fn zip_entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

fn copy_dir_recursive(source: &Path, destination: &Path) -> StorageResult<()> {
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(source).to_path_buf();
            StorageError::io("walk", &path, io::Error::other(err))
        })?;
        let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            ensure_directory(&target)?;
        } else {
            fs::copy(entry.path(), &target)
                .map_err(|err| StorageError::io("copy file", entry.path(), err))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Read;

    use tempfile::tempdir;

    use super::{
        backup_archive, delete_path, ensure_directory, extract_archive_entry,
        move_with_overwrite, StorageError,
    };
    use crate::model::DeleteMode;

    #[test]
    fn ensure_directory_is_idempotent() {
        let dir = tempdir().expect("tempdir");
        let nested = dir.path().join("a").join("b");
        ensure_directory(&nested).expect("first create");
        ensure_directory(&nested).expect("second create");
        assert!(nested.is_dir());
    }

    #[test]
    fn move_overwrites_existing_destination() {
        let dir = tempdir().expect("tempdir");
        let source = dir.path().join("src.json");
        let destination = dir.path().join("out").join("dst.json");
        fs::write(&source, "new").expect("write source");
        fs::create_dir_all(destination.parent().expect("parent")).expect("mkdir");
        fs::write(&destination, "old").expect("write destination");

        move_with_overwrite(&source, &destination, DeleteMode::Permanent).expect("move");

        assert!(!source.exists());
        assert_eq!(fs::read_to_string(&destination).expect("read"), "new");
    }

    #[test]
    fn move_replaces_directory_destination_with_file() {
        let dir = tempdir().expect("tempdir");
        let source = dir.path().join("en_us.json");
        let destination = dir.path().join("lang").join("en_us.json");
        fs::write(&source, "{}").expect("write source");
        fs::create_dir_all(destination.join("junk")).expect("mkdir");

        move_with_overwrite(&source, &destination, DeleteMode::Permanent).expect("move");

        assert!(destination.is_file());
    }

    #[test]
    fn move_reports_missing_source() {
        let dir = tempdir().expect("tempdir");
        let err = move_with_overwrite(
            &dir.path().join("missing"),
            &dir.path().join("dst"),
            DeleteMode::Permanent,
        )
        .expect_err("missing source fails");
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn delete_is_noop_for_missing_path_and_recursive_for_directories() {
        let dir = tempdir().expect("tempdir");
        delete_path(&dir.path().join("missing"), DeleteMode::Permanent).expect("noop");

        let tree = dir.path().join("tree");
        fs::create_dir_all(tree.join("inner")).expect("mkdir");
        fs::write(tree.join("inner").join("file.txt"), "x").expect("write");
        delete_path(&tree, DeleteMode::Permanent).expect("delete tree");
        assert!(!tree.exists());
    }

    #[test]
    fn backup_archive_includes_top_level_name_and_replaces_old_archive() {
        let dir = tempdir().expect("tempdir");
        let unit = dir.path().join("ModA");
        fs::create_dir_all(unit.join("assets").join("moda")).expect("mkdir");
        fs::write(unit.join("assets").join("moda").join("a.json"), "{}").expect("write");
        let archive_path = dir.path().join("_backup").join("run").join("ModA.zip");
        fs::create_dir_all(archive_path.parent().expect("parent")).expect("mkdir");
        fs::write(&archive_path, "stale").expect("write stale");

        backup_archive(&unit, &archive_path).expect("backup");

        let file = fs::File::open(&archive_path).expect("open");
        let mut archive = zip::ZipArchive::new(file).expect("valid zip");
        let names = archive.file_names().map(str::to_string).collect::<Vec<_>>();
        assert!(names.contains(&"ModA/".to_string()));
        assert!(names.contains(&"ModA/assets/moda/a.json".to_string()));

        let mut contents = String::new();
        archive
            .by_name("ModA/assets/moda/a.json")
            .expect("entry")
            .read_to_string(&mut contents)
            .expect("read");
        assert_eq!(contents, "{}");
    }

    #[test]
    fn backup_archive_stores_single_file_sources() {
        let dir = tempdir().expect("tempdir");
        let unit = dir.path().join("mod.jar");
        fs::write(&unit, "jar-bytes").expect("write");
        let archive_path = dir.path().join("mod.jar.zip");

        backup_archive(&unit, &archive_path).expect("backup");

        let file = fs::File::open(&archive_path).expect("open");
        let archive = zip::ZipArchive::new(file).expect("valid zip");
        let names = archive.file_names().map(str::to_string).collect::<Vec<_>>();
        assert_eq!(names, vec!["mod.jar".to_string()]);
    }

    #[test]
    fn backup_archive_copies_large_files_intact() {
        let dir = tempdir().expect("tempdir");
        let unit = dir.path().join("ModA");
        fs::create_dir_all(&unit).expect("mkdir");
        let contents = (0..512 * 1024).map(|i| (i % 251) as u8).collect::<Vec<_>>();
        fs::write(unit.join("big.bin"), &contents).expect("write");
        let archive_path = dir.path().join("ModA.zip");

        backup_archive(&unit, &archive_path).expect("backup");

        let file = fs::File::open(&archive_path).expect("open");
        let mut archive = zip::ZipArchive::new(file).expect("valid zip");
        let mut stored = Vec::new();
        archive
            .by_name("ModA/big.bin")
            .expect("entry")
            .read_to_end(&mut stored)
            .expect("read");
        assert_eq!(stored, contents);
    }

    #[test]
    fn extracts_single_entry_creating_parents() {
        let dir = tempdir().expect("tempdir");
        let unit = dir.path().join("src");
        fs::create_dir_all(&unit).expect("mkdir");
        fs::write(unit.join("en_us.json"), "{\"k\":\"v\"}").expect("write");
        let archive_path = dir.path().join("src.zip");
        backup_archive(&unit, &archive_path).expect("backup");

        let destination = dir.path().join("out").join("lang").join("en_us.json");
        extract_archive_entry(&archive_path, "src/en_us.json", &destination).expect("extract");

        assert_eq!(
            fs::read_to_string(&destination).expect("read"),
            "{\"k\":\"v\"}"
        );
    }

    #[test]
    fn extract_fails_for_missing_entry() {
        let dir = tempdir().expect("tempdir");
        let unit = dir.path().join("src");
        fs::create_dir_all(&unit).expect("mkdir");
        let archive_path = dir.path().join("src.zip");
        backup_archive(&unit, &archive_path).expect("backup");

        let err = extract_archive_entry(&archive_path, "nope.json", &dir.path().join("x.json"))
            .expect_err("missing entry");
        assert!(matches!(err, StorageError::MissingEntry { .. }));
    }
}

//! Removing an installed package from a prefix.

use std::{
    collections::HashSet,
    ffi::OsString,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use krait_conda_types::PrefixRecord;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while unlinking a package.
#[derive(Debug, Error)]
pub enum UnlinkError {
    /// A file of the package could not be deleted.
    #[error("failed to delete file {0}")]
    FailedToDeleteFile(String, #[source] std::io::Error),

    /// An empty directory could not be deleted.
    #[error("failed to delete directory {0}")]
    FailedToDeleteDirectory(String, #[source] std::io::Error),

    /// A directory could not be listed.
    #[error("failed to read directory {0}")]
    FailedToReadDirectory(String, #[source] std::io::Error),

    /// The trash directory could not be created.
    #[error("failed to create directory {0}")]
    FailedToCreateDirectory(String, #[source] std::io::Error),

    /// A busy file could not be moved aside.
    #[error("failed to move {0} to {1}")]
    FailedToMoveFile(String, String, #[source] std::io::Error),
}

/// Removes every file of `prefix_record` from the prefix, then the
/// `conda-meta` record itself (last, so a crash never leaves an unlisted
/// half-removed package). Files that are still in use are moved into
/// `<prefix>/.trash` instead.
pub fn unlink_package(
    target_prefix: &Path,
    prefix_record: &PrefixRecord,
) -> Result<(), UnlinkError> {
    for relative_path in &prefix_record.files {
        let path = target_prefix.join(relative_path);
        match fs_err::remove_file(&path) {
            Ok(()) => {}
            // Already gone is fine.
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            // Windows refuses to delete running executables; park them in
            // the trash to be cleaned up by a later transaction.
            Err(err) if err.kind() == ErrorKind::PermissionDenied => {
                move_to_trash(target_prefix, &path)?;
            }
            Err(err) => {
                return Err(UnlinkError::FailedToDeleteFile(
                    relative_path.to_string_lossy().to_string(),
                    err,
                ));
            }
        }
    }

    let conda_meta_path = target_prefix
        .join("conda-meta")
        .join(prefix_record.file_name());
    fs_err::remove_file(&conda_meta_path).map_err(|err| {
        UnlinkError::FailedToDeleteFile(conda_meta_path.to_string_lossy().to_string(), err)
    })?;

    Ok(())
}

/// Removes directories that became empty after an unlink, walking upwards
/// until (but never including) the prefix root. For noarch-python packages a
/// directory holding only a `__pycache__` leftover counts as empty.
pub fn remove_empty_parent_directories(
    directory: &Path,
    target_prefix: &Path,
    is_python_noarch: bool,
    keep_directories: &HashSet<PathBuf>,
) -> Result<(), UnlinkError> {
    if directory == target_prefix
        || keep_directories.contains(directory)
        || !directory.starts_with(target_prefix)
        || !directory.exists()
    {
        return Ok(());
    }

    let mut entries = fs_err::read_dir(directory).map_err(|err| {
        UnlinkError::FailedToReadDirectory(directory.to_string_lossy().to_string(), err)
    })?;

    let removable = match entries.next().transpose().ok().flatten() {
        None => true,
        Some(entry)
            if is_python_noarch
                && entry.file_name() == "__pycache__"
                && entries.next().is_none() =>
        {
            fs_err::remove_dir_all(entry.path()).map_err(|err| {
                UnlinkError::FailedToDeleteDirectory(
                    entry.path().to_string_lossy().to_string(),
                    err,
                )
            })?;
            true
        }
        Some(_) => false,
    };

    if removable {
        fs_err::remove_dir(directory).map_err(|err| {
            UnlinkError::FailedToDeleteDirectory(directory.to_string_lossy().to_string(), err)
        })?;
        if let Some(parent) = directory.parent() {
            remove_empty_parent_directories(
                parent,
                target_prefix,
                is_python_noarch,
                keep_directories,
            )?;
        }
    }

    Ok(())
}

fn move_to_trash(target_prefix: &Path, path: &Path) -> Result<(), UnlinkError> {
    let trash_dir = target_prefix.join(".trash");
    fs_err::create_dir_all(&trash_dir).map_err(|err| {
        UnlinkError::FailedToCreateDirectory(trash_dir.to_string_lossy().to_string(), err)
    })?;

    let mut file_name = OsString::new();
    if let Some(name) = path.file_name() {
        file_name.push(name);
        file_name.push(".");
    }
    file_name.push(format!("{}.trash", Uuid::new_v4().simple()));
    let trash_path = trash_dir.join(file_name);

    fs_err::rename(path, &trash_path).map_err(|err| {
        UnlinkError::FailedToMoveFile(
            path.to_string_lossy().to_string(),
            trash_path.to_string_lossy().to_string(),
            err,
        )
    })
}

/// Deletes trash files parked by earlier transactions; files that are still
/// busy stay for the next run.
pub fn empty_trash(target_prefix: &Path) -> Result<(), UnlinkError> {
    let trash_dir = target_prefix.join(".trash");
    let entries = match fs_err::read_dir(&trash_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => {
            return Err(UnlinkError::FailedToReadDirectory(
                trash_dir.to_string_lossy().to_string(),
                err,
            ));
        }
    };

    let mut files_left = false;
    for entry in entries {
        let entry = entry.map_err(|err| {
            UnlinkError::FailedToReadDirectory(trash_dir.to_string_lossy().to_string(), err)
        })?;
        match fs_err::remove_file(entry.path()) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) if err.kind() == ErrorKind::PermissionDenied => files_left = true,
            Err(err) => {
                return Err(UnlinkError::FailedToDeleteFile(
                    entry.path().to_string_lossy().to_string(),
                    err,
                ));
            }
        }
    }

    if !files_left {
        fs_err::remove_dir(&trash_dir).map_err(|err| {
            UnlinkError::FailedToDeleteDirectory(trash_dir.to_string_lossy().to_string(), err)
        })?;
    }
    Ok(())
}

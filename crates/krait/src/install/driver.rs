//! One-shot execution of a transaction against a prefix.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
};

use krait_cache::{CacheKey, PackageCache, PackageCacheError};
use krait_conda_types::{
    package::PathsJson, History, HistoryEntry, HistoryError, MatchSpec, PrefixRecord,
    RepoDataRecord,
};
use krait_fetch::{
    Checksum, DownloadError, DownloadRequest, Downloader, FileMirror, HttpMirror, Mirror,
};
use thiserror::Error;
use url::Url;

use super::{
    link::{link_file, InstallOptions, LinkFileError},
    order::{link_order, unlink_order},
    pyc,
    transaction::{Transaction, TransactionOperation},
    unlink::{empty_trash, remove_empty_parent_directories, unlink_package, UnlinkError},
};
use crate::interrupt;

/// The user intent recorded in the history journal alongside an executed
/// transaction.
#[derive(Debug, Clone, Default)]
pub struct RequestedChanges {
    /// The command line that caused the transaction.
    pub cmd: String,

    /// The tool version performing it.
    pub tool_version: String,

    /// Specs the user asked to install or update.
    pub update_specs: Vec<String>,

    /// Specs the user asked to remove.
    pub remove_specs: Vec<String>,

    /// Specs that were weakened to make the request solvable.
    pub neutered_specs: Vec<String>,
}

/// Errors raised while executing a transaction.
#[derive(Debug, Error)]
pub enum InstallError {
    /// No extracted directory was supplied for a package that must be
    /// linked. Raised before any mutation.
    #[error("no extracted package directory for '{0}'")]
    MissingPackageDirectory(String),

    /// Linking a file failed.
    #[error("failed to link '{package}'")]
    Link {
        /// The package whose file failed.
        package: String,
        /// The underlying link error.
        #[source]
        source: LinkFileError,
    },

    /// Unlinking a package failed.
    #[error(transparent)]
    Unlink(#[from] UnlinkError),

    /// The `paths.json` of an extracted package is unreadable.
    #[error("unable to read paths.json of '{0}'")]
    InvalidPackage(String, #[source] std::io::Error),

    /// A filesystem operation outside linking failed.
    #[error(transparent)]
    Filesystem(#[from] std::io::Error),

    /// Appending the history journal failed.
    #[error(transparent)]
    History(#[from] HistoryError),

    /// The transaction was cancelled between steps.
    #[error(transparent)]
    Cancelled(#[from] interrupt::Cancelled),

    /// The transaction failed *and* rolling back the completed steps failed
    /// too; the prefix is in a mixed state.
    #[error("rollback incomplete after failure: {original}")]
    RollbackIncomplete {
        /// The error that aborted the transaction.
        original: Box<InstallError>,
        /// Descriptions of everything that could not be rolled back.
        failures: Vec<String>,
    },
}

/// What a successful execution did.
#[derive(Debug, Default)]
pub struct ExecuteReport {
    /// The prefix records written for newly linked packages.
    pub linked: Vec<PrefixRecord>,

    /// The dist strings of the packages that were unlinked.
    pub unlinked: Vec<String>,
}

/// Executes transactions against one prefix.
///
/// The driver is synchronous: all filesystem mutation is serialized, every
/// step completing before the next starts. Downloading and extraction happen
/// up front through [`fetch_packages`].
pub struct InstallDriver {
    prefix: PathBuf,
    options: InstallOptions,
}

impl InstallDriver {
    /// Creates a driver for the given prefix.
    pub fn new(prefix: impl Into<PathBuf>, options: InstallOptions) -> Self {
        Self {
            prefix: prefix.into(),
            options,
        }
    }

    /// The target prefix.
    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// Executes the transaction. `package_dirs` maps the archive filename of
    /// every record to be linked to its extracted directory.
    ///
    /// Unlinks run first (dependents before dependencies), then links in
    /// dependency order so python is present before anything that needs it.
    /// On a mid-transaction failure the completed link steps are rolled back
    /// best-effort; packages already unlinked are *not* restored.
    pub fn execute(
        &self,
        transaction: &Transaction<PrefixRecord, RepoDataRecord>,
        package_dirs: &HashMap<String, PathBuf>,
        changes: &RequestedChanges,
    ) -> Result<ExecuteReport, InstallError> {
        interrupt::checkpoint()?;

        // Fail fast, before any mutation, when inputs are missing.
        let to_install: Vec<&RepoDataRecord> = {
            let records: Vec<&RepoDataRecord> = transaction
                .operations
                .iter()
                .filter_map(TransactionOperation::record_to_install)
                .collect();
            let order = link_order(&records);
            order.into_iter().map(|idx| records[idx]).collect()
        };
        for record in &to_install {
            if !package_dirs.contains_key(&record.file_name) {
                return Err(InstallError::MissingPackageDirectory(
                    record.file_name.clone(),
                ));
            }
        }

        let to_remove: Vec<&PrefixRecord> = {
            let records: Vec<&PrefixRecord> = transaction
                .operations
                .iter()
                .filter_map(TransactionOperation::record_to_remove)
                .collect();
            let order = unlink_order(&records);
            order.into_iter().map(|idx| records[idx]).collect()
        };

        fs_err::create_dir_all(self.prefix.join("conda-meta"))?;

        // Unlink phase: dependents first, python last.
        let mut report = ExecuteReport::default();
        let mut removed_parents: HashSet<PathBuf> = HashSet::new();
        for old in &to_remove {
            interrupt::checkpoint()?;
            unlink_package(&self.prefix, old)?;
            for file in &old.files {
                if let Some(parent) = self.prefix.join(file).parent().map(Path::to_path_buf) {
                    removed_parents.insert(parent);
                }
            }
            report.unlinked.push(old.dist_string());
        }

        // Link phase, with rollback of everything linked so far on failure.
        for new in &to_install {
            if let Err(err) = interrupt::checkpoint() {
                return Err(self.rollback(&report.linked, &[], err.into()));
            }
            let package_dir = &package_dirs[&new.file_name];
            match self.link_package(new, package_dir, transaction, changes) {
                Ok(record) => report.linked.push(record),
                Err((err, partial_files)) => {
                    return Err(self.rollback(&report.linked, &partial_files, err));
                }
            }
        }

        // Compile bytecode for the python sources that just got linked.
        // Failures are logged, never fatal.
        if self.options.compile_pyc {
            if let Some(python_info) = &transaction.python_info {
                let sources: Vec<PathBuf> = report
                    .linked
                    .iter()
                    .filter(|record| record.repodata_record.package_record.noarch.is_python())
                    .flat_map(|record| record.files.iter())
                    .filter(|file| file.extension().is_some_and(|ext| ext == "py"))
                    .cloned()
                    .collect();
                if let Err(err) = pyc::compile_pyc(&self.prefix, python_info.path(), &sources) {
                    tracing::warn!("pyc compilation skipped: {err}");
                }
            }
        }

        // Prune directories the unlink phase emptied; everything that
        // received new files stays untouched.
        let keep: HashSet<PathBuf> = report
            .linked
            .iter()
            .flat_map(|record| record.files.iter())
            .filter_map(|file| self.prefix.join(file).parent().map(Path::to_path_buf))
            .collect();
        let is_python_noarch = to_remove
            .iter()
            .any(|record| record.repodata_record.package_record.noarch.is_python());
        for parent in removed_parents {
            if let Err(err) =
                remove_empty_parent_directories(&parent, &self.prefix, is_python_noarch, &keep)
            {
                tracing::warn!("failed to prune {}: {err}", parent.display());
            }
        }

        if let Err(err) = empty_trash(&self.prefix) {
            tracing::debug!("trash not emptied: {err}");
        }

        // Journal the applied change.
        if !report.linked.is_empty() || !report.unlinked.is_empty() {
            let history = History::from_prefix(&self.prefix);
            history.append(&HistoryEntry {
                timestamp: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
                cmd: Some(changes.cmd.clone()),
                tool_version: Some(changes.tool_version.clone()),
                removed: report.unlinked.iter().cloned().collect(),
                added: report
                    .linked
                    .iter()
                    .map(PrefixRecord::dist_string)
                    .collect(),
                update_specs: changes.update_specs.clone(),
                remove_specs: changes.remove_specs.clone(),
                neutered_specs: changes.neutered_specs.clone(),
            })?;
        }

        Ok(report)
    }

    /// Links all files of one package and writes its prefix record. On error
    /// the relative paths linked so far are handed back for rollback.
    fn link_package(
        &self,
        record: &RepoDataRecord,
        package_dir: &Path,
        transaction: &Transaction<PrefixRecord, RepoDataRecord>,
        changes: &RequestedChanges,
    ) -> Result<PrefixRecord, (InstallError, Vec<PathBuf>)> {
        let paths = PathsJson::from_package_directory(package_dir)
            .map_err(|err| (InstallError::InvalidPackage(record.file_name.clone(), err), Vec::new()))?;

        let target_prefix = self.prefix.to_string_lossy().to_string();
        let noarch = record.package_record.noarch;
        let mut linked_paths = Vec::with_capacity(paths.paths.len());
        let mut linked_entries = Vec::with_capacity(paths.paths.len());

        for entry in &paths.paths {
            let linked = match link_file(
                noarch,
                entry,
                package_dir,
                &self.prefix,
                &target_prefix,
                &self.options,
                transaction.python_info.as_ref(),
            ) {
                Ok(linked) => linked,
                Err(source) => {
                    return Err((
                        InstallError::Link {
                            package: record.file_name.clone(),
                            source,
                        },
                        linked_paths,
                    ));
                }
            };
            if linked.clobbered {
                tracing::warn!(
                    "{} clobbered an existing file at {}",
                    record.file_name,
                    linked.relative_path.display()
                );
            }

            let mut linked_entry = entry.clone();
            linked_entry.relative_path = linked.relative_path.clone();
            linked_entry.sha256 = linked.sha256;
            linked_entry.size_in_bytes = linked.file_size;
            linked_paths.push(linked.relative_path);
            linked_entries.push(linked_entry);
        }

        let requested_spec = changes
            .update_specs
            .iter()
            .find(|spec| {
                spec.parse::<MatchSpec>()
                    .ok()
                    .and_then(|parsed| parsed.name)
                    .is_some_and(|name| name == record.package_record.name)
            })
            .cloned();

        let prefix_record = PrefixRecord::from_repodata_record(
            record.clone(),
            PathsJson {
                paths_version: paths.paths_version,
                paths: linked_entries,
            },
            requested_spec,
            None,
        );
        let record_path = self
            .prefix
            .join("conda-meta")
            .join(prefix_record.file_name());
        if let Err(err) = prefix_record.write_to_path(&record_path, true) {
            return Err((InstallError::Filesystem(err), linked_paths));
        }

        Ok(prefix_record)
    }

    /// Best-effort rollback: removes the partially linked files of the
    /// failing package and unlinks every package completed by this
    /// transaction. Unlinked (removed) packages are not restored.
    fn rollback(
        &self,
        linked: &[PrefixRecord],
        partial_files: &[PathBuf],
        original: InstallError,
    ) -> InstallError {
        let mut failures = Vec::new();
        let mut parents: HashSet<PathBuf> = HashSet::new();

        for file in partial_files {
            let path = self.prefix.join(file);
            if let Some(parent) = path.parent() {
                parents.insert(parent.to_path_buf());
            }
            match fs_err::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => failures.push(format!("{}: {err}", path.display())),
            }
        }
        for record in linked {
            for file in &record.files {
                if let Some(parent) = self.prefix.join(file).parent() {
                    parents.insert(parent.to_path_buf());
                }
            }
            if let Err(err) = unlink_package(&self.prefix, record) {
                failures.push(err.to_string());
            }
        }
        for parent in parents {
            let _ = remove_empty_parent_directories(&parent, &self.prefix, false, &HashSet::new());
        }

        if failures.is_empty() {
            original
        } else {
            for failure in &failures {
                tracing::error!("rollback failure: {failure}");
            }
            InstallError::RollbackIncomplete {
                original: Box::new(original),
                failures,
            }
        }
    }
}

/// Errors raised while bringing packages into the cache.
#[derive(Debug, Error)]
pub enum FetchPackagesError {
    /// A record carries a URL the fetcher cannot split into mirror and
    /// filename.
    #[error("cannot derive a mirror from '{0}'")]
    InvalidUrl(Url),

    /// The package cache failed.
    #[error(transparent)]
    Cache(#[from] PackageCacheError),
}

#[derive(Debug, Error)]
enum FetchExtractError {
    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("failed to extract the package archive")]
    Extract(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Downloads and extracts all `records` into the package cache, returning
/// the extracted directory per archive filename. `extract` unpacks an
/// archive into a directory; the archive format itself is outside the core.
///
/// Downloads are verified against the record hashes and coalesced by the
/// cache, so each package is fetched at most once even across concurrent
/// callers.
pub async fn fetch_packages<E>(
    records: &[RepoDataRecord],
    cache: &PackageCache,
    downloader: &Downloader,
    extract: impl Fn(&Path, &Path) -> Result<(), E> + Clone,
) -> Result<HashMap<String, PathBuf>, FetchPackagesError>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let fetches = records.iter().map(|record| {
        let extract = extract.clone();
        async move {
            let (mirror, path) = mirror_for(&record.url)
                .ok_or_else(|| FetchPackagesError::InvalidUrl(record.url.clone()))?;
            let expected = checksum_of(record);
            let archive_path = cache.path().join(&record.file_name);
            let key =
                CacheKey::from(&record.package_record);

            let directory = cache
                .get_or_fetch(key, |destination| {
                    let mirror = mirror.clone();
                    let path = path.clone();
                    let archive_path = archive_path.clone();
                    let extract = extract.clone();
                    async move {
                        let results = downloader
                            .run(vec![DownloadRequest {
                                mirrors: vec![mirror],
                                path,
                                expected,
                                size_hint: record.package_record.size,
                                destination: archive_path.clone(),
                            }])
                            .await;
                        let (_, result) = results
                            .into_iter()
                            .next()
                            .expect("one request yields one result");
                        result?;
                        extract(&archive_path, &destination)
                            .map_err(|err| FetchExtractError::Extract(Box::new(err)))
                    }
                })
                .await?;
            Ok::<(String, PathBuf), FetchPackagesError>((record.file_name.clone(), directory))
        }
    });

    let pairs = futures::future::try_join_all(fetches).await?;
    Ok(pairs.into_iter().collect())
}

fn checksum_of(record: &RepoDataRecord) -> Option<Checksum> {
    if let Some(sha256) = record.package_record.sha256 {
        Some(Checksum::Sha256(sha256))
    } else {
        record.package_record.md5.map(Checksum::Md5)
    }
}

/// Splits a package URL into a mirror for its directory and the archive
/// filename.
fn mirror_for(url: &Url) -> Option<(Arc<dyn Mirror>, String)> {
    let file_name = url.path_segments()?.next_back()?.to_string();
    if file_name.is_empty() {
        return None;
    }
    let mut base = url.clone();
    base.path_segments_mut().ok()?.pop();

    let mirror: Arc<dyn Mirror> = if base.scheme() == "file" {
        Arc::new(FileMirror::new(&base.to_file_path().ok()?).ok()?)
    } else {
        Arc::new(HttpMirror::new(base))
    };
    Some((mirror, file_name))
}
